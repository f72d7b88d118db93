//! Console progress output for the `deploy` command
//!
//! Turns pipeline events into one line each and prints them as they arrive.

use tokio::sync::mpsc;

use crate::domain::{DeployEvent, StageStatus, WorkloadStatus};

const PASS: &str = "✓";
const FAIL: &str = "✗";
const SKIP: &str = "-";

/// One console line for an event, `None` for events that are not shown
pub fn render(event: &DeployEvent) -> Option<String> {
    match event {
        DeployEvent::StageStart { stage, .. } => Some(format!("▶ {}", stage)),
        DeployEvent::Log { level, message, .. } => match level.as_str() {
            "info" => Some(format!("    {}", message)),
            other => Some(format!("    [{}] {}", other, message)),
        },
        DeployEvent::StageComplete { stage, result, .. } => Some(match result.status {
            StageStatus::Success => format!("{} {} ({} ms)", PASS, stage, result.duration),
            StageStatus::Failed => format!(
                "{} {} ({} ms): {}",
                FAIL,
                stage,
                result.duration,
                result.error.as_deref().unwrap_or("failed")
            ),
        }),
        DeployEvent::TestStart { .. } => None,
        DeployEvent::TestComplete {
            name,
            passed,
            skipped,
            error,
            ..
        } => Some(if *skipped {
            format!("    {} {} (skipped)", SKIP, name)
        } else if *passed {
            format!("    {} {}", PASS, name)
        } else {
            format!(
                "    {} {}: {}",
                FAIL,
                name,
                error.as_deref().unwrap_or("failed")
            )
        }),
        DeployEvent::Artifact { key, value, .. } => Some(format!("    {} = {}", key, value)),
        DeployEvent::WorkloadComplete { status, error, .. } => Some(match (status, error) {
            (WorkloadStatus::Success, _) => format!("{} Deployment succeeded", PASS),
            (_, Some(error)) => format!("{} Deployment {}: {}", FAIL, status.as_str(), error),
            (_, None) => format!("{} Deployment {}", FAIL, status.as_str()),
        }),
    }
}

/// Print events until every sender is dropped
pub async fn print_events(mut rx: mpsc::UnboundedReceiver<DeployEvent>) {
    while let Some(event) = rx.recv().await {
        if let Some(line) = render(&event) {
            println!("{}", line);
        }
    }
}
