//! Git source fetching

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use hostkit_api::GitRevision;
use tracing::{debug, info};

use crate::errors::HostkitError;
use crate::services::process::{CommandSpec, ProcessRunner};

/// Which revision of a repository to deploy
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GitRef {
    Branch(String),
    Tag(String),
    Commit(String),
}

impl GitRef {
    pub fn kind(&self) -> &'static str {
        match self {
            GitRef::Branch(_) => "branch",
            GitRef::Tag(_) => "tag",
            GitRef::Commit(_) => "commit",
        }
    }

    pub fn name(&self) -> &str {
        match self {
            GitRef::Branch(name) | GitRef::Tag(name) | GitRef::Commit(name) => name,
        }
    }
}

/// Clones a repository revision into a directory
#[async_trait]
pub trait GitFetcher: Send + Sync {
    /// Clone `repo_url` at `git_ref` into `dir` (which must not exist or be
    /// empty) and report the resolved revision
    async fn clone_to_directory(
        &self,
        repo_url: &str,
        dir: &Path,
        git_ref: Option<&GitRef>,
    ) -> Result<GitRevision, HostkitError>;
}

/// [`GitFetcher`] shelling out to the `git` binary
pub struct CommandGitFetcher {
    runner: Arc<dyn ProcessRunner>,
    timeout: Duration,
}

impl CommandGitFetcher {
    pub fn new(runner: Arc<dyn ProcessRunner>, timeout: Duration) -> Self {
        Self { runner, timeout }
    }

    fn git(&self) -> CommandSpec {
        CommandSpec::new("git")
            .env("GIT_TERMINAL_PROMPT", "0")
            .timeout(self.timeout)
    }
}

#[async_trait]
impl GitFetcher for CommandGitFetcher {
    async fn clone_to_directory(
        &self,
        repo_url: &str,
        dir: &Path,
        git_ref: Option<&GitRef>,
    ) -> Result<GitRevision, HostkitError> {
        let target = dir.to_string_lossy().to_string();
        info!("Cloning git repository {} into {}", repo_url, target);

        let mut revision = GitRevision {
            repo: repo_url.to_string(),
            ..Default::default()
        };

        match git_ref {
            Some(GitRef::Branch(name)) | Some(GitRef::Tag(name)) => {
                let clone = self.git().args([
                    "clone",
                    "--depth",
                    "1",
                    "--branch",
                    name.as_str(),
                    "--",
                    repo_url,
                    target.as_str(),
                ]);
                self.runner.run_checked(&clone).await?;
            }
            Some(GitRef::Commit(sha)) => {
                // a shallow clone can't check out an arbitrary commit
                let clone = self.git().args(["clone", "--", repo_url, target.as_str()]);
                self.runner.run_checked(&clone).await?;
                let checkout = self
                    .git()
                    .args(["checkout", "--detach", sha.as_str()])
                    .current_dir(dir);
                self.runner.run_checked(&checkout).await?;
            }
            None => {
                let clone = self.git().args(["clone", "--depth", "1", "--", repo_url, target.as_str()]);
                self.runner.run_checked(&clone).await?;
            }
        }

        match git_ref {
            Some(GitRef::Branch(name)) => revision.branch = Some(name.clone()),
            Some(GitRef::Tag(name)) => revision.tag = Some(name.clone()),
            Some(GitRef::Commit(_)) => {}
            None => {
                let head = self
                    .git()
                    .args(["rev-parse", "--abbrev-ref", "HEAD"])
                    .current_dir(dir);
                let output = self.runner.run_checked(&head).await?;
                let branch = output.stdout.trim();
                if !branch.is_empty() && branch != "HEAD" {
                    revision.branch = Some(branch.to_string());
                }
            }
        }

        let rev_parse = self.git().args(["rev-parse", "HEAD"]).current_dir(dir);
        let output = self.runner.run_checked(&rev_parse).await?;
        let commit = output.stdout.trim().to_string();
        if commit.is_empty() {
            return Err(HostkitError::Internal("git rev-parse returned no commit".to_string()));
        }
        debug!("Resolved HEAD to {}", commit);
        revision.commit = Some(commit);

        Ok(revision)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::mock::MockProcessRunner;

    #[tokio::test]
    async fn test_branch_clone_is_shallow() {
        let runner = Arc::new(MockProcessRunner::new());
        runner.respond("git rev-parse HEAD", 0, "abc123\n", "");
        let fetcher = CommandGitFetcher::new(runner.clone(), Duration::from_secs(10));

        let revision = fetcher
            .clone_to_directory(
                "https://example.com/app.git",
                Path::new("/tmp/clone"),
                Some(&GitRef::Branch("main".to_string())),
            )
            .await
            .unwrap();

        assert_eq!(revision.commit.as_deref(), Some("abc123"));
        assert_eq!(revision.branch.as_deref(), Some("main"));
        assert!(revision.tag.is_none());
        assert_eq!(
            runner.calls()[0],
            "git clone --depth 1 --branch main -- https://example.com/app.git /tmp/clone"
        );
    }

    #[tokio::test]
    async fn test_commit_clone_checks_out_sha() {
        let runner = Arc::new(MockProcessRunner::new());
        runner.respond("git rev-parse HEAD", 0, "deadbeef\n", "");
        let fetcher = CommandGitFetcher::new(runner.clone(), Duration::from_secs(10));

        let revision = fetcher
            .clone_to_directory(
                "https://example.com/app.git",
                Path::new("/tmp/clone"),
                Some(&GitRef::Commit("deadbeef".to_string())),
            )
            .await
            .unwrap();

        assert_eq!(revision.commit.as_deref(), Some("deadbeef"));
        let calls = runner.calls();
        assert_eq!(calls[0], "git clone -- https://example.com/app.git /tmp/clone");
        assert_eq!(calls[1], "git checkout --detach deadbeef");
    }

    #[tokio::test]
    async fn test_option_like_url_stays_positional() {
        let runner = Arc::new(MockProcessRunner::new());
        runner.respond("git rev-parse HEAD", 0, "abc123\n", "");
        let fetcher = CommandGitFetcher::new(runner.clone(), Duration::from_secs(10));

        fetcher
            .clone_to_directory("--upload-pack=touch /tmp/pwned", Path::new("/tmp/clone"), None)
            .await
            .unwrap();

        assert_eq!(
            runner.calls()[0],
            "git clone --depth 1 -- --upload-pack=touch /tmp/pwned /tmp/clone"
        );
    }

    #[tokio::test]
    async fn test_clone_failure_propagates() {
        let runner = Arc::new(MockProcessRunner::new());
        runner.respond("git clone", 128, "", "fatal: repository not found");
        let fetcher = CommandGitFetcher::new(runner, Duration::from_secs(10));

        let err = fetcher
            .clone_to_directory("https://example.com/nope.git", Path::new("/tmp/x"), None)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("repository not found"));
    }
}
