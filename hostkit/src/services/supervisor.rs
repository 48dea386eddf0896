//! Process supervisor control

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, info};

use crate::errors::HostkitError;
use crate::filesys::file::File;
use crate::services::process::{CommandSpec, ProcessRunner};

/// Supervisor-reported state of a project's service
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServiceStatus {
    Active,
    Activating,
    Inactive,
    Failed,
    Unknown,
}

impl ServiceStatus {
    /// Parse `systemctl is-active` output
    pub fn parse(s: &str) -> Self {
        match s.trim() {
            "active" | "reloading" => ServiceStatus::Active,
            "activating" => ServiceStatus::Activating,
            "inactive" | "deactivating" => ServiceStatus::Inactive,
            "failed" => ServiceStatus::Failed,
            _ => ServiceStatus::Unknown,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ServiceStatus::Active => "active",
            ServiceStatus::Activating => "activating",
            ServiceStatus::Inactive => "inactive",
            ServiceStatus::Failed => "failed",
            ServiceStatus::Unknown => "unknown",
        }
    }
}

impl std::fmt::Display for ServiceStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Controls the long-running service of a project
#[async_trait]
pub trait ServiceController: Send + Sync {
    async fn start(&self, project: &str) -> Result<(), HostkitError>;

    async fn stop(&self, project: &str) -> Result<(), HostkitError>;

    async fn restart(&self, project: &str) -> Result<(), HostkitError>;

    async fn status(&self, project: &str) -> Result<ServiceStatus, HostkitError>;

    /// Last `lines` lines of the service log
    async fn recent_logs(&self, project: &str, lines: u32) -> Result<String, HostkitError>;

    /// Override the start command of the service; `None` restores the default
    async fn set_entry_point(&self, project: &str, command: Option<&str>) -> Result<(), HostkitError>;
}

/// systemd-backed [`ServiceController`]
pub struct SystemdController {
    runner: Arc<dyn ProcessRunner>,
    unit_prefix: String,
    dropin_root: PathBuf,
    timeout: Duration,
}

impl SystemdController {
    pub fn new(runner: Arc<dyn ProcessRunner>, unit_prefix: impl Into<String>, timeout: Duration) -> Self {
        Self {
            runner,
            unit_prefix: unit_prefix.into(),
            dropin_root: PathBuf::from("/etc/systemd/system"),
            timeout,
        }
    }

    /// Write drop-ins below `root` instead of `/etc/systemd/system`
    pub fn with_dropin_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.dropin_root = root.into();
        self
    }

    pub fn unit_name(&self, project: &str) -> String {
        format!("{}{}.service", self.unit_prefix, project)
    }

    fn dropin_file(&self, project: &str) -> PathBuf {
        self.dropin_root
            .join(format!("{}.d", self.unit_name(project)))
            .join("entry-point.conf")
    }

    async fn systemctl(&self, verb: &str, project: &str) -> Result<(), HostkitError> {
        let spec = CommandSpec::new("systemctl")
            .args([verb, self.unit_name(project).as_str()])
            .timeout(self.timeout);
        self.runner.run_checked(&spec).await?;
        Ok(())
    }

    async fn daemon_reload(&self) -> Result<(), HostkitError> {
        let spec = CommandSpec::new("systemctl")
            .arg("daemon-reload")
            .timeout(self.timeout);
        self.runner.run_checked(&spec).await?;
        Ok(())
    }
}

#[async_trait]
impl ServiceController for SystemdController {
    async fn start(&self, project: &str) -> Result<(), HostkitError> {
        info!(project = %project, "Starting service");
        self.systemctl("start", project).await
    }

    async fn stop(&self, project: &str) -> Result<(), HostkitError> {
        info!(project = %project, "Stopping service");
        self.systemctl("stop", project).await
    }

    async fn restart(&self, project: &str) -> Result<(), HostkitError> {
        info!(project = %project, "Restarting service");
        self.systemctl("restart", project).await
    }

    async fn status(&self, project: &str) -> Result<ServiceStatus, HostkitError> {
        // is-active exits non-zero for anything but active
        let spec = CommandSpec::new("systemctl")
            .args(["is-active", self.unit_name(project).as_str()])
            .timeout(self.timeout);
        let output = self.runner.run(&spec).await?;
        Ok(ServiceStatus::parse(&output.stdout))
    }

    async fn recent_logs(&self, project: &str, lines: u32) -> Result<String, HostkitError> {
        let spec = CommandSpec::new("journalctl")
            .args(["-u", self.unit_name(project).as_str(), "-n"])
            .arg(lines.to_string())
            .args(["--no-pager", "-o", "cat"])
            .timeout(self.timeout);
        let output = self.runner.run(&spec).await?;
        Ok(output.stdout)
    }

    async fn set_entry_point(&self, project: &str, command: Option<&str>) -> Result<(), HostkitError> {
        let path = self.dropin_file(project);
        match command {
            Some(command) => {
                debug!(project = %project, command = %command, "Writing entry point override");
                let contents = format!("[Service]\nExecStart=\nExecStart=/usr/bin/env {command}\n");
                File::new(&path)
                    .write_atomic(contents.as_bytes())
                    .await?;
            }
            None => {
                debug!(project = %project, "Removing entry point override");
                File::new(&path).delete().await?;
            }
        }
        self.daemon_reload().await
    }
}
