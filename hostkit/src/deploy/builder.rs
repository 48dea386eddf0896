//! Optional build step run in an ephemeral copy of the source

use std::path::{Component, Path};
use std::time::Duration;

use tempfile::TempDir;
use tracing::{debug, info};

use crate::deploy::detect::has_build_script;
use crate::errors::{DeployError, DeployErrorKind, HostkitError, ProcessError};
use crate::filesys::dir::Dir;
use crate::services::process::{CommandSpec, ProcessRunner};

/// Timeouts of the build step
#[derive(Debug, Clone, Copy)]
pub struct BuildLimits {
    pub install: Duration,
    pub build: Duration,
}

/// Source directory after the build step
#[derive(Debug)]
pub struct BuiltSource {
    /// Removed when dropped
    pub dir: TempDir,
    /// Commands run, for the report
    pub steps: Vec<String>,
}

impl BuiltSource {
    pub fn path(&self) -> &Path {
        self.dir.path()
    }
}

/// Top-level entries never copied into a build directory
fn is_build_excluded(rel: &Path) -> bool {
    match rel.components().next() {
        Some(Component::Normal(first)) => {
            matches!(first.to_str(), Some(".git" | "node_modules" | ".next" | ".venv" | "venv"))
        }
        _ => false,
    }
}

fn copy_nothing_excluded(_: &Path) -> bool {
    false
}

fn build_error(step: &str, err: ProcessError) -> DeployError {
    if err.is_timeout() {
        DeployError::new(DeployErrorKind::BuildTimeout, format!("{step} timed out: {err}"))
            .with_suggestion("raise deploy.build_timeout_secs in settings.json, or build locally and deploy the output")
    } else {
        DeployError::new(DeployErrorKind::BuildFailed, format!("{step} failed: {err}"))
            .with_suggestion("run the build locally to reproduce, or deploy a prebuilt tree without --build")
    }
}

fn io_error(err: HostkitError) -> DeployError {
    DeployError::new(DeployErrorKind::BuildFailed, format!("Failed to prepare build directory: {err}"))
}

/// Copy `source` into a fresh directory under `tmp`, then install and build there.
///
/// On error the build directory is dropped, which removes it.
pub async fn build_source(
    runner: &dyn ProcessRunner,
    tmp: &Dir,
    source: &Path,
    limits: BuildLimits,
) -> Result<BuiltSource, DeployError> {
    let dir = tmp.temp_dir("build-").await.map_err(io_error)?;
    let copied = Dir::new(source)
        .copy_into(dir.path(), is_build_excluded)
        .await
        .map_err(io_error)?;
    info!("Building in {} ({} files)", dir.path().display(), copied);

    let mut steps = Vec::new();

    if dir.path().join("package.json").is_file() {
        let install: &[&str] = if dir.path().join("package-lock.json").is_file() {
            &["ci"]
        } else {
            &["install"]
        };
        let spec = CommandSpec::new("npm")
            .args(install.iter().copied())
            .current_dir(dir.path())
            .timeout(limits.install);
        runner
            .run_checked(&spec)
            .await
            .map_err(|e| build_error("npm install", e))?;
        steps.push(spec.display());

        if has_build_script(dir.path()) {
            let spec = CommandSpec::new("npm")
                .args(["run", "build"])
                .current_dir(dir.path())
                .env("NODE_ENV", "production")
                .timeout(limits.build);
            runner
                .run_checked(&spec)
                .await
                .map_err(|e| build_error("npm run build", e))?;
            steps.push(spec.display());
        }
    } else {
        debug!("No package.json, nothing to build");
    }

    finish_standalone_bundle(dir.path()).await.map_err(io_error)?;

    Ok(BuiltSource { dir, steps })
}

/// Copy static assets into a standalone bundle so it serves them itself
pub async fn finish_standalone_bundle(root: &Path) -> Result<bool, HostkitError> {
    let standalone = root.join(".next").join("standalone");
    if !standalone.is_dir() {
        return Ok(false);
    }

    let assets = Dir::new(root.join(".next").join("static"));
    if assets.exists().await {
        assets
            .copy_into(&standalone.join(".next").join("static"), copy_nothing_excluded)
            .await?;
    }
    let public = Dir::new(root.join("public"));
    if public.exists().await {
        public
            .copy_into(&standalone.join("public"), copy_nothing_excluded)
            .await?;
    }

    debug!("Finished standalone bundle at {}", standalone.display());
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::mock::MockProcessRunner;
    use crate::services::process::CommandOutput;
    use std::fs;

    fn limits() -> BuildLimits {
        BuildLimits {
            install: Duration::from_secs(5),
            build: Duration::from_secs(5),
        }
    }

    #[tokio::test]
    async fn test_build_runs_install_and_build_in_copy() {
        let src = tempfile::tempdir().unwrap();
        let tmp = tempfile::tempdir().unwrap();
        fs::write(
            src.path().join("package.json"),
            r#"{"scripts":{"build":"next build"}}"#,
        )
        .unwrap();
        fs::write(src.path().join("package-lock.json"), "{}").unwrap();
        fs::create_dir_all(src.path().join("node_modules/x")).unwrap();
        fs::create_dir_all(src.path().join("public")).unwrap();
        fs::write(src.path().join("public/logo.svg"), "<svg/>").unwrap();

        let runner = MockProcessRunner::new();
        runner.handle("npm run build", |spec| {
            let root = spec.cwd.clone().unwrap();
            fs::create_dir_all(root.join(".next/standalone/node_modules")).unwrap();
            fs::create_dir_all(root.join(".next/static/chunks")).unwrap();
            fs::write(root.join(".next/static/chunks/main.js"), "//").unwrap();
            Ok(CommandOutput::default())
        });

        let built = build_source(&runner, &Dir::new(tmp.path()), src.path(), limits())
            .await
            .unwrap();

        assert_eq!(built.steps, vec!["npm ci", "npm run build"]);
        assert!(!built.path().join("node_modules").exists());
        assert!(built
            .path()
            .join(".next/standalone/.next/static/chunks/main.js")
            .is_file());
        assert!(built.path().join(".next/standalone/public/logo.svg").is_file());

        let path = built.path().to_path_buf();
        drop(built);
        assert!(!path.exists());
        // the source is never touched
        assert!(src.path().join("node_modules/x").is_dir());
    }

    #[tokio::test]
    async fn test_build_timeout_maps_to_kind() {
        let src = tempfile::tempdir().unwrap();
        let tmp = tempfile::tempdir().unwrap();
        fs::write(src.path().join("package.json"), r#"{"scripts":{"build":"x"}}"#).unwrap();

        let runner = MockProcessRunner::new();
        runner.time_out("npm run build");

        let err = build_source(&runner, &Dir::new(tmp.path()), src.path(), limits())
            .await
            .unwrap_err();
        assert_eq!(err.kind, DeployErrorKind::BuildTimeout);
        assert!(err.kind.is_retryable());
        // the failed build directory is gone
        assert_eq!(fs::read_dir(tmp.path()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn test_install_failure_is_build_failure() {
        let src = tempfile::tempdir().unwrap();
        let tmp = tempfile::tempdir().unwrap();
        fs::write(src.path().join("package.json"), "{}").unwrap();

        let runner = MockProcessRunner::new();
        runner.respond("npm install", 1, "", "ERESOLVE");

        let err = build_source(&runner, &Dir::new(tmp.path()), src.path(), limits())
            .await
            .unwrap_err();
        assert_eq!(err.kind, DeployErrorKind::BuildFailed);
        assert!(err.message.contains("ERESOLVE"));
    }
}
