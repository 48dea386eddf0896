//! Runtime dependency installation

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, info};

use crate::errors::HostkitError;
use crate::ledger::RuntimeKind;
use crate::services::process::{CommandSpec, ProcessRunner};
use crate::storage::layout::HostLayout;

/// Installs the dependencies of the live release of a project
#[async_trait]
pub trait RuntimeInstaller: Send + Sync {
    /// Returns whether anything was installed
    async fn install(&self, project: &str, runtime: RuntimeKind) -> Result<bool, HostkitError>;
}

/// [`RuntimeInstaller`] using npm and pip against the current pointer
pub struct CommandRuntimeInstaller {
    runner: Arc<dyn ProcessRunner>,
    layout: HostLayout,
    timeout: Duration,
}

impl CommandRuntimeInstaller {
    pub fn new(runner: Arc<dyn ProcessRunner>, layout: HostLayout, timeout: Duration) -> Self {
        Self {
            runner,
            layout,
            timeout,
        }
    }

    async fn install_node(&self, project: &str) -> Result<bool, HostkitError> {
        let app = self.layout.current_path(project);
        if !app.join("package.json").exists() {
            debug!(project = %project, "No package.json, skipping npm install");
            return Ok(false);
        }

        let args: &[&str] = if app.join("package-lock.json").exists() {
            &["ci", "--omit=dev"]
        } else {
            &["install", "--omit=dev"]
        };
        let spec = CommandSpec::new("npm")
            .args(args.iter().copied())
            .current_dir(&app)
            .timeout(self.timeout);
        self.runner.run_checked(&spec).await?;
        Ok(true)
    }

    async fn install_python(&self, project: &str) -> Result<bool, HostkitError> {
        let app = self.layout.current_path(project);
        let requirements = app.join("requirements.txt");
        if !requirements.exists() {
            debug!(project = %project, "No requirements.txt, skipping pip install");
            return Ok(false);
        }

        let venv = self.layout.venv_dir(project);
        if !venv.exists().await {
            let spec = CommandSpec::new("python3")
                .args(["-m", "venv"])
                .arg(venv.path().to_string_lossy())
                .timeout(self.timeout);
            self.runner.run_checked(&spec).await?;
        }

        let pip = venv.path().join("bin").join("pip");
        let spec = CommandSpec::new(pip.to_string_lossy())
            .args(["install", "-r"])
            .arg(requirements.to_string_lossy())
            .current_dir(&app)
            .timeout(self.timeout);
        self.runner.run_checked(&spec).await?;
        Ok(true)
    }
}

#[async_trait]
impl RuntimeInstaller for CommandRuntimeInstaller {
    async fn install(&self, project: &str, runtime: RuntimeKind) -> Result<bool, HostkitError> {
        info!(project = %project, runtime = %runtime, "Installing runtime dependencies");
        match runtime {
            RuntimeKind::Node => self.install_node(project).await,
            RuntimeKind::Python => self.install_python(project).await,
            RuntimeKind::Static => Ok(false),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::mock::MockProcessRunner;

    #[tokio::test]
    async fn test_node_install_prefers_ci_with_lockfile() {
        let home = tempfile::tempdir().unwrap();
        let layout = HostLayout::new(home.path());
        let app = layout.current_path("shop");
        std::fs::create_dir_all(&app).unwrap();
        std::fs::write(app.join("package.json"), "{}").unwrap();
        std::fs::write(app.join("package-lock.json"), "{}").unwrap();

        let runner = Arc::new(MockProcessRunner::new());
        let installer = CommandRuntimeInstaller::new(runner.clone(), layout, Duration::from_secs(5));

        assert!(installer.install("shop", RuntimeKind::Node).await.unwrap());
        assert_eq!(runner.calls(), vec!["npm ci --omit=dev"]);
    }

    #[tokio::test]
    async fn test_static_and_empty_projects_install_nothing() {
        let home = tempfile::tempdir().unwrap();
        let layout = HostLayout::new(home.path());
        std::fs::create_dir_all(layout.current_path("site")).unwrap();

        let runner = Arc::new(MockProcessRunner::new());
        let installer = CommandRuntimeInstaller::new(runner.clone(), layout, Duration::from_secs(5));

        assert!(!installer.install("site", RuntimeKind::Static).await.unwrap());
        assert!(!installer.install("site", RuntimeKind::Python).await.unwrap());
        assert!(runner.calls().is_empty());
    }
}
