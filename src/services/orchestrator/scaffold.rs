//! Build files for cloned services
//!
//! Fixed templates: a Dockerfile, an HTTP shim exposing the resource contract,
//! and a fallback in-memory resource module for services without an entry file.

use serde_json::{json, Value};
use std::io;
use std::path::Path;

pub const MANIFEST_FILE: &str = "package.json";
pub const SHIM_FILE: &str = "__shim__.js";
pub const SCAFFOLD_ENTRY_FILE: &str = "__resource__.js";
pub const DEFAULT_RESOURCE: &str = "items";

const SHIM_TEMPLATE: &str = r#"'use strict';
const http = require('http');
const handlers = require(__ENTRY__);

const RESOURCE = '__RESOURCE__';
const PORT = Number(process.env.PORT || __PORT__);

function send(res, status, payload) {
  res.writeHead(status, { 'Content-Type': 'application/json' });
  res.end(payload === undefined ? '' : JSON.stringify(payload));
}

function readBody(req) {
  return new Promise((resolve, reject) => {
    let raw = '';
    req.on('data', (chunk) => { raw += chunk; });
    req.on('end', () => {
      if (!raw) return resolve({});
      try { resolve(JSON.parse(raw)); } catch (err) { reject(err); }
    });
    req.on('error', reject);
  });
}

const server = http.createServer(async (req, res) => {
  const url = new URL(req.url, 'http://localhost');
  const parts = url.pathname.split('/').filter(Boolean);

  if (parts.length === 1 && parts[0] === 'health') {
    return send(res, 200, { status: 'ok', resource: RESOURCE });
  }
  if (parts[0] !== RESOURCE || parts.length > 2) {
    return send(res, 404, { error: 'not found' });
  }

  const id = parts[1];
  try {
    if (req.method === 'GET' && !id) return send(res, 200, await handlers.list());
    if (req.method === 'GET') {
      const item = await handlers.get(id);
      return item ? send(res, 200, item) : send(res, 404, { error: 'not found' });
    }
    if (req.method === 'POST' && !id) {
      const body = await readBody(req);
      if (!body || Object.keys(body).length === 0) {
        return send(res, 400, { error: 'request body is required' });
      }
      return send(res, 201, await handlers.create(body));
    }
    if ((req.method === 'PUT' || req.method === 'PATCH') && id) {
      const item = await handlers.update(id, await readBody(req));
      return item ? send(res, 200, item) : send(res, 404, { error: 'not found' });
    }
    if (req.method === 'DELETE' && id) {
      const removed = await handlers.delete(id);
      return removed ? send(res, 204) : send(res, 404, { error: 'not found' });
    }
    return send(res, 405, { error: 'method not allowed' });
  } catch (err) {
    console.error(err);
    return send(res, 500, { error: String(err && err.message || err) });
  }
});

server.listen(PORT, () => console.log(`[shim] ${RESOURCE} listening on ${PORT}`));
"#;

const SCAFFOLD_ENTRY_TEMPLATE: &str = r#"'use strict';
// In-memory '__RESOURCE__' collection.
const items = new Map();
let nextId = 1;

module.exports = {
  async list() { return Array.from(items.values()); },
  async get(id) { return items.get(String(id)) || null; },
  async create(data) {
    const item = { ...data, id: String(nextId++) };
    items.set(item.id, item);
    return item;
  },
  async update(id, data) {
    const current = items.get(String(id));
    if (!current) return null;
    const item = { ...current, ...data, id: current.id };
    items.set(item.id, item);
    return item;
  },
  async delete(id) { return items.delete(String(id)); },
};
"#;

/// Restrict a resource name to URL- and JS-safe characters
pub fn sanitize_resource(resource: Option<&str>) -> String {
    let cleaned: String = resource
        .unwrap_or_default()
        .trim()
        .trim_matches('/')
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || *c == '-' || *c == '_')
        .collect();
    if cleaned.is_empty() {
        DEFAULT_RESOURCE.to_string()
    } else {
        cleaned
    }
}

pub fn dockerfile(internal_port: u16) -> String {
    format!(
        "FROM node:20-alpine\n\
         WORKDIR /app\n\
         COPY package*.json ./\n\
         RUN npm install --omit=dev --no-audit --no-fund\n\
         COPY . .\n\
         ENV NODE_ENV=production\n\
         ENV PORT={internal_port}\n\
         EXPOSE {internal_port}\n\
         CMD [\"node\", \"{SHIM_FILE}\"]\n"
    )
}

/// `entry` comes from the service manifest and is emitted as a quoted JS string
pub fn shim(entry: &str, resource: &str, internal_port: u16) -> String {
    let entry = format!("./{}", entry.trim_start_matches("./"));
    SHIM_TEMPLATE
        .replace("__ENTRY__", &Value::String(entry).to_string())
        .replace("__RESOURCE__", resource)
        .replace("__PORT__", &internal_port.to_string())
}

pub fn scaffold_entry(resource: &str) -> String {
    SCAFFOLD_ENTRY_TEMPLATE.replace("__RESOURCE__", resource)
}

/// Result of preparing a service directory
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PreparedService {
    /// Entry module loaded by the shim
    pub entry: String,
    pub scaffolded: bool,
}

/// Write the Dockerfile and shim into `service_dir`, scaffolding an entry
/// module first when the manifest has none.
pub async fn prepare_service(
    service_dir: &Path,
    resource: &str,
    internal_port: u16,
) -> io::Result<PreparedService> {
    let manifest_path = service_dir.join(MANIFEST_FILE);
    let raw = tokio::fs::read_to_string(&manifest_path).await?;
    let mut manifest: Value = serde_json::from_str(&raw)
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
    if !manifest.is_object() {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            "package.json must contain a JSON object",
        ));
    }

    let declared = manifest
        .get("main")
        .and_then(Value::as_str)
        .map(str::to_string);
    let existing = match declared {
        Some(main) if tokio::fs::try_exists(service_dir.join(&main)).await.unwrap_or(false) => {
            Some(main)
        }
        _ => None,
    };

    let prepared = match existing {
        Some(entry) => PreparedService {
            entry,
            scaffolded: false,
        },
        None => {
            tokio::fs::write(service_dir.join(SCAFFOLD_ENTRY_FILE), scaffold_entry(resource)).await?;
            manifest["main"] = json!(SCAFFOLD_ENTRY_FILE);
            if manifest.get("dependencies").is_none() {
                manifest["dependencies"] = json!({});
            }
            let updated = serde_json::to_string_pretty(&manifest)
                .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
            tokio::fs::write(&manifest_path, updated).await?;
            PreparedService {
                entry: SCAFFOLD_ENTRY_FILE.to_string(),
                scaffolded: true,
            }
        }
    };

    tokio::fs::write(service_dir.join("Dockerfile"), dockerfile(internal_port)).await?;
    tokio::fs::write(
        service_dir.join(SHIM_FILE),
        shim(&prepared.entry, resource, internal_port),
    )
    .await?;
    Ok(prepared)
}
