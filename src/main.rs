//! Module Deploy Agent - 模块部署代理
//!
//! Usage:
//! - HTTP agent: `module-deploy-agent` or `module-deploy-agent serve --port 9876`
//! - One-off deployment: `module-deploy-agent deploy ./todo-api.json --port 8080`

use std::path::PathBuf;
use std::process::ExitCode;

use module_deploy_agent::domain::WorkloadStatus;
use module_deploy_agent::{cli, init_and_run_agent_with_config, init_tracing, RuntimeConfig};

/// 子命令
#[derive(Debug)]
enum Command {
    Serve(RuntimeConfig),
    Deploy { file: PathBuf, port: Option<u16> },
    Help,
}

/// 解析命令行参数
fn parse_args(args: &[String]) -> Result<Command, String> {
    let mut positional = Vec::new();
    let mut port = None;

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--port" => {
                let value = args.get(i + 1).ok_or("--port requires a value")?;
                port = Some(
                    value
                        .parse::<u16>()
                        .map_err(|_| format!("invalid port: {}", value))?,
                );
                i += 2;
            }
            "--help" | "-h" => return Ok(Command::Help),
            other if other.starts_with('-') => return Err(format!("unknown option: {}", other)),
            other => {
                positional.push(other.to_string());
                i += 1;
            }
        }
    }

    match positional.first().map(String::as_str) {
        None | Some("serve") => Ok(Command::Serve(RuntimeConfig {
            port_override: port,
        })),
        Some("deploy") => {
            let file = positional
                .get(1)
                .ok_or("deploy requires a module definition file")?;
            Ok(Command::Deploy {
                file: PathBuf::from(file),
                port,
            })
        }
        Some(other) => Err(format!("unknown command: {}", other)),
    }
}

fn print_help() {
    println!("Module Deploy Agent - 模块部署代理");
    println!();
    println!("USAGE:");
    println!("    module-deploy-agent [COMMAND] [OPTIONS]");
    println!();
    println!("COMMANDS:");
    println!("    serve                 Run the HTTP agent (default)");
    println!("    deploy <FILE>         Deploy a module definition to local Docker");
    println!();
    println!("OPTIONS:");
    println!("    --port <PORT>    Listening port (serve) or host port (deploy)");
    println!("    -h, --help       Print help information");
    println!();
    println!("EXAMPLES:");
    println!("    module-deploy-agent serve --port 9876");
    println!("    module-deploy-agent deploy ./todo-api.json --port 8080");
}

fn main() -> ExitCode {
    let args: Vec<String> = std::env::args().collect();
    let command = match parse_args(&args) {
        Ok(command) => command,
        Err(message) => {
            eprintln!("Error: {}", message);
            eprintln!();
            print_help();
            return ExitCode::FAILURE;
        }
    };

    if let Command::Help = command {
        print_help();
        return ExitCode::SUCCESS;
    }

    init_tracing();
    let rt = tokio::runtime::Runtime::new().expect("Failed to create runtime");
    rt.block_on(async {
        match command {
            Command::Serve(config) => match init_and_run_agent_with_config(config).await {
                Ok(()) => ExitCode::SUCCESS,
                Err(e) => {
                    eprintln!("Error: {}", e);
                    ExitCode::FAILURE
                }
            },
            Command::Deploy { file, port } => match cli::run_deploy(&file, port).await {
                Ok(workload) if workload.status == WorkloadStatus::Success => ExitCode::SUCCESS,
                Ok(_) => ExitCode::FAILURE,
                Err(e) => {
                    eprintln!("Error: {}", e);
                    ExitCode::FAILURE
                }
            },
            Command::Help => ExitCode::SUCCESS,
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(list: &[&str]) -> Vec<String> {
        std::iter::once("module-deploy-agent")
            .chain(list.iter().copied())
            .map(str::to_string)
            .collect()
    }

    #[test]
    fn test_default_is_serve() {
        match parse_args(&args(&[])).unwrap() {
            Command::Serve(config) => assert_eq!(config.port_override, None),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_deploy_with_port() {
        match parse_args(&args(&["deploy", "todo.json", "--port", "8080"])).unwrap() {
            Command::Deploy { file, port } => {
                assert_eq!(file, PathBuf::from("todo.json"));
                assert_eq!(port, Some(8080));
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_invalid_arguments() {
        assert!(parse_args(&args(&["deploy"])).is_err());
        assert!(parse_args(&args(&["serve", "--port", "nope"])).is_err());
        assert!(parse_args(&args(&["launch"])).is_err());
        assert!(matches!(parse_args(&args(&["-h"])).unwrap(), Command::Help));
    }
}
