//! Post-deploy service validation

use std::time::{Duration, Instant};

use hostkit_api::ValidationReport;
use tracing::{debug, info, warn};

use crate::services::supervisor::{ServiceController, ServiceStatus};

/// How long and how often to poll
#[derive(Debug, Clone, Copy)]
pub struct ValidationPolicy {
    pub interval: Duration,
    pub timeout: Duration,
    pub log_lines: u32,
}

/// Log markers and the hint they map to, checked in order
const HINTS: &[(&[&str], &str)] = &[
    (
        &["cannot find module", "module_not_found", "modulenotfounderror", "no module named"],
        "A dependency is missing. Redeploy with dependency install enabled, or make sure the standalone bundle carries node_modules.",
    ),
    (
        &["eaddrinuse", "address already in use"],
        "The port is already in use. Stop the other process or change the project's port.",
    ),
    (
        &["enoent", "no such file or directory"],
        "A file the app needs is missing from the release. Check the entry point and the build output.",
    ),
    (
        &["eacces", "permission denied"],
        "Permission denied. Check file ownership under the project directory.",
    ),
    (
        &["syntaxerror", "unexpected token"],
        "The app failed to parse. Check the deployed code for syntax errors.",
    ),
    (
        &["econnrefused", "could not connect to server", "connection refused", "operationalerror"],
        "The database connection failed. Check that the database is running and the credentials in .env.",
    ),
    (
        &["heap out of memory", "memoryerror", "out of memory", "oom-kill"],
        "The app ran out of memory. Reduce its memory use or raise the service memory limit.",
    ),
];

/// First matching hint for `logs`
pub fn diagnose(logs: &str) -> Option<&'static str> {
    let logs = logs.to_lowercase();
    HINTS
        .iter()
        .find(|(markers, _)| markers.iter().any(|m| logs.contains(m)))
        .map(|(_, hint)| *hint)
}

/// Poll the service of `project` until it is active, fails, or time runs out
pub async fn validate_service(
    service: &dyn ServiceController,
    project: &str,
    policy: ValidationPolicy,
) -> ValidationReport {
    let start = Instant::now();

    loop {
        let status = match service.status(project).await {
            Ok(status) => status,
            Err(e) => {
                warn!(project = %project, "Service status check failed: {}", e);
                ServiceStatus::Unknown
            }
        };
        debug!(project = %project, status = %status, "Polled service");

        match status {
            ServiceStatus::Active => {
                info!(project = %project, "Service is active");
                return passed(status, start, None);
            }
            ServiceStatus::Failed | ServiceStatus::Inactive => {
                let message = format!("Service is {status} after restart");
                return failed(service, project, policy, status, start, message).await;
            }
            ServiceStatus::Activating | ServiceStatus::Unknown => {}
        }

        if start.elapsed() >= policy.timeout {
            if status == ServiceStatus::Activating {
                let warning = format!(
                    "Service still starting after {}s; treating as a slow start",
                    policy.timeout.as_secs()
                );
                warn!(project = %project, "{}", warning);
                return passed(status, start, Some(warning));
            }
            let message = format!(
                "Service did not become active within {}s (last status: {status})",
                policy.timeout.as_secs()
            );
            return failed(service, project, policy, status, start, message).await;
        }

        tokio::time::sleep(policy.interval).await;
    }
}

fn passed(status: ServiceStatus, start: Instant, warning: Option<String>) -> ValidationReport {
    ValidationReport {
        passed: true,
        status: status.to_string(),
        elapsed_ms: start.elapsed().as_millis() as u64,
        warning,
        message: None,
        hint: None,
    }
}

async fn failed(
    service: &dyn ServiceController,
    project: &str,
    policy: ValidationPolicy,
    status: ServiceStatus,
    start: Instant,
    message: String,
) -> ValidationReport {
    let hint = match service.recent_logs(project, policy.log_lines).await {
        Ok(logs) => diagnose(&logs).map(str::to_string),
        Err(e) => {
            warn!(project = %project, "Failed to read service logs: {}", e);
            None
        }
    };
    warn!(project = %project, "Validation failed: {}", message);

    ValidationReport {
        passed: false,
        status: status.to_string(),
        elapsed_ms: start.elapsed().as_millis() as u64,
        warning: None,
        message: Some(message),
        hint,
    }
}
