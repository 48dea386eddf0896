//! Mock collaborators for testing.
//!
//! Every collaborator trait has an in-memory implementation here that
//! records its calls and can be scripted to fail, so the deploy workflow can
//! be exercised without real processes, a supervisor, git or a database.

use std::collections::VecDeque;
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use hostkit_api::GitRevision;

use crate::deploy::git::{GitFetcher, GitRef};
use crate::deploy::Collaborators;
use crate::errors::{HostkitError, ProcessError};
use crate::ledger::RuntimeKind;
use crate::services::checkpoint::{CheckpointService, DatabasePresenceCheck};
use crate::services::env::{EnvSnapshotService, SecretInjector};
use crate::services::installer::RuntimeInstaller;
use crate::services::process::{CommandOutput, CommandSpec, ProcessRunner};
use crate::services::supervisor::{ServiceController, ServiceStatus};

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

fn scripted_failure(what: &str) -> HostkitError {
    HostkitError::Internal(format!("mock {what} failure"))
}

type CommandHandler = Arc<dyn Fn(&CommandSpec) -> Result<CommandOutput, ProcessError> + Send + Sync>;

/// Process runner answering from a script keyed by command prefix.
///
/// Unscripted commands succeed with empty output.
#[derive(Default)]
pub struct MockProcessRunner {
    handlers: Mutex<Vec<(String, CommandHandler)>>,
    calls: Mutex<Vec<String>>,
}

impl MockProcessRunner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Answer commands starting with `prefix` with a fixed output
    pub fn respond(&self, prefix: &str, status: i32, stdout: &str, stderr: &str) {
        let output = CommandOutput {
            status,
            stdout: stdout.to_string(),
            stderr: stderr.to_string(),
        };
        self.handle(prefix, move |_| Ok(output.clone()));
    }

    /// Make commands starting with `prefix` time out
    pub fn time_out(&self, prefix: &str) {
        self.handle(prefix, |spec| {
            Err(ProcessError::Timeout {
                program: spec.program.clone(),
                secs: spec.timeout.as_secs(),
            })
        });
    }

    /// Run `handler` for commands starting with `prefix`
    pub fn handle<F>(&self, prefix: &str, handler: F)
    where
        F: Fn(&CommandSpec) -> Result<CommandOutput, ProcessError> + Send + Sync + 'static,
    {
        lock(&self.handlers).push((prefix.to_string(), Arc::new(handler)));
    }

    /// Commands run so far, as `program arg1 arg2 ...`
    pub fn calls(&self) -> Vec<String> {
        lock(&self.calls).clone()
    }
}

#[async_trait]
impl ProcessRunner for MockProcessRunner {
    async fn run(&self, spec: &CommandSpec) -> Result<CommandOutput, ProcessError> {
        let line = spec.display();
        lock(&self.calls).push(line.clone());

        // later scripts win over earlier ones
        let handler = lock(&self.handlers)
            .iter()
            .rev()
            .find(|(prefix, _)| line.starts_with(prefix.as_str()))
            .map(|(_, handler)| handler.clone());

        match handler {
            Some(handler) => handler(spec),
            None => Ok(CommandOutput::default()),
        }
    }
}

/// Supervisor mock with a scripted status sequence.
///
/// `status` pops the next scripted value; the last one repeats. With no
/// script the service reports active.
#[derive(Default)]
pub struct MockServiceController {
    statuses: Mutex<VecDeque<ServiceStatus>>,
    logs: Mutex<String>,
    calls: Mutex<Vec<String>>,
    entry_points: Mutex<Vec<(String, Option<String>)>>,
    fail_restart: AtomicBool,
}

impl MockServiceController {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn script_statuses(&self, statuses: &[ServiceStatus]) {
        *lock(&self.statuses) = statuses.iter().copied().collect();
    }

    pub fn set_logs(&self, logs: &str) {
        *lock(&self.logs) = logs.to_string();
    }

    pub fn fail_restart(&self, fail: bool) {
        self.fail_restart.store(fail, Ordering::SeqCst);
    }

    /// Calls made, as `verb project`
    pub fn calls(&self) -> Vec<String> {
        lock(&self.calls).clone()
    }

    pub fn restarts(&self) -> usize {
        self.calls().iter().filter(|c| c.starts_with("restart ")).count()
    }

    /// Entry point changes applied, in order
    pub fn entry_points(&self) -> Vec<(String, Option<String>)> {
        lock(&self.entry_points).clone()
    }

    fn record(&self, verb: &str, project: &str) {
        lock(&self.calls).push(format!("{verb} {project}"));
    }
}

#[async_trait]
impl ServiceController for MockServiceController {
    async fn start(&self, project: &str) -> Result<(), HostkitError> {
        self.record("start", project);
        Ok(())
    }

    async fn stop(&self, project: &str) -> Result<(), HostkitError> {
        self.record("stop", project);
        Ok(())
    }

    async fn restart(&self, project: &str) -> Result<(), HostkitError> {
        self.record("restart", project);
        if self.fail_restart.load(Ordering::SeqCst) {
            return Err(scripted_failure("restart"));
        }
        Ok(())
    }

    async fn status(&self, project: &str) -> Result<ServiceStatus, HostkitError> {
        self.record("status", project);
        let mut statuses = lock(&self.statuses);
        let status = if statuses.len() > 1 {
            statuses.pop_front()
        } else {
            statuses.front().copied()
        };
        Ok(status.unwrap_or(ServiceStatus::Active))
    }

    async fn recent_logs(&self, project: &str, _lines: u32) -> Result<String, HostkitError> {
        self.record("logs", project);
        Ok(lock(&self.logs).clone())
    }

    async fn set_entry_point(&self, project: &str, command: Option<&str>) -> Result<(), HostkitError> {
        self.record("set_entry_point", project);
        lock(&self.entry_points).push((project.to_string(), command.map(str::to_string)));
        Ok(())
    }
}

/// Git fetcher writing a fixed file tree into the clone directory
pub struct MockGitFetcher {
    files: Mutex<Vec<(String, String)>>,
    commit: String,
    fail: AtomicBool,
    calls: Mutex<Vec<(String, Option<GitRef>)>>,
}

impl Default for MockGitFetcher {
    fn default() -> Self {
        Self::new()
    }
}

impl MockGitFetcher {
    pub fn new() -> Self {
        Self {
            files: Mutex::new(vec![("index.html".to_string(), "<h1>hi</h1>".to_string())]),
            commit: "0123456789abcdef0123456789abcdef01234567".to_string(),
            fail: AtomicBool::new(false),
            calls: Mutex::new(Vec::new()),
        }
    }

    /// Replace the tree written on clone
    pub fn with_files(self, files: &[(&str, &str)]) -> Self {
        *lock(&self.files) = files
            .iter()
            .map(|(p, c)| (p.to_string(), c.to_string()))
            .collect();
        self
    }

    pub fn fail(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    pub fn commit(&self) -> &str {
        &self.commit
    }

    /// Clones requested, as `(repo, ref)`
    pub fn calls(&self) -> Vec<(String, Option<GitRef>)> {
        lock(&self.calls).clone()
    }
}

#[async_trait]
impl GitFetcher for MockGitFetcher {
    async fn clone_to_directory(
        &self,
        repo_url: &str,
        dir: &Path,
        git_ref: Option<&GitRef>,
    ) -> Result<GitRevision, HostkitError> {
        lock(&self.calls).push((repo_url.to_string(), git_ref.cloned()));
        if self.fail.load(Ordering::SeqCst) {
            return Err(scripted_failure("clone"));
        }

        let files = lock(&self.files).clone();
        for (rel, contents) in files {
            let path = dir.join(rel);
            if let Some(parent) = path.parent() {
                tokio::fs::create_dir_all(parent).await?;
            }
            tokio::fs::write(&path, contents).await?;
        }

        Ok(GitRevision {
            repo: repo_url.to_string(),
            commit: Some(self.commit.clone()),
            branch: match git_ref {
                Some(GitRef::Branch(b)) => Some(b.clone()),
                None => Some("main".to_string()),
                _ => None,
            },
            tag: match git_ref {
                Some(GitRef::Tag(t)) => Some(t.clone()),
                _ => None,
            },
        })
    }
}

/// Checkpoint service handing out sequential ids
#[derive(Default)]
pub struct MockCheckpointService {
    counter: AtomicU32,
    fail: AtomicBool,
    calls: Mutex<Vec<String>>,
}

impl MockCheckpointService {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    /// Projects checkpointed, in order
    pub fn calls(&self) -> Vec<String> {
        lock(&self.calls).clone()
    }
}

#[async_trait]
impl CheckpointService for MockCheckpointService {
    async fn create_checkpoint(
        &self,
        project: &str,
        _label: &str,
        _checkpoint_type: &str,
        _trigger: &str,
    ) -> Result<String, HostkitError> {
        lock(&self.calls).push(project.to_string());
        if self.fail.load(Ordering::SeqCst) {
            return Err(scripted_failure("checkpoint"));
        }
        let n = self.counter.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(format!("cp-{n}"))
    }
}

/// Env snapshot service returning fixed content
pub struct MockEnvSnapshotService {
    snapshot: Mutex<String>,
    fail: AtomicBool,
}

impl Default for MockEnvSnapshotService {
    fn default() -> Self {
        Self::new()
    }
}

impl MockEnvSnapshotService {
    pub fn new() -> Self {
        Self {
            snapshot: Mutex::new("PORT=3000\n".to_string()),
            fail: AtomicBool::new(false),
        }
    }

    pub fn set_snapshot(&self, snapshot: &str) {
        *lock(&self.snapshot) = snapshot.to_string();
    }

    pub fn fail(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }
}

#[async_trait]
impl EnvSnapshotService for MockEnvSnapshotService {
    async fn capture(&self, _project: &str) -> Result<String, HostkitError> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(scripted_failure("env snapshot"));
        }
        Ok(lock(&self.snapshot).clone())
    }
}

/// Secret injector reporting a fixed count
#[derive(Default)]
pub struct MockSecretInjector {
    count: AtomicU32,
    fail: AtomicBool,
}

impl MockSecretInjector {
    pub fn new(count: u32) -> Self {
        Self {
            count: AtomicU32::new(count),
            fail: AtomicBool::new(false),
        }
    }

    pub fn fail(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }
}

#[async_trait]
impl SecretInjector for MockSecretInjector {
    async fn inject(&self, _project: &str) -> Result<u32, HostkitError> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(scripted_failure("secret injection"));
        }
        Ok(self.count.load(Ordering::SeqCst))
    }
}

/// Runtime installer recording the runtimes it was asked for
#[derive(Default)]
pub struct MockRuntimeInstaller {
    fail: AtomicBool,
    calls: Mutex<Vec<(String, RuntimeKind)>>,
}

impl MockRuntimeInstaller {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    pub fn calls(&self) -> Vec<(String, RuntimeKind)> {
        lock(&self.calls).clone()
    }
}

#[async_trait]
impl RuntimeInstaller for MockRuntimeInstaller {
    async fn install(&self, project: &str, runtime: RuntimeKind) -> Result<bool, HostkitError> {
        lock(&self.calls).push((project.to_string(), runtime));
        if self.fail.load(Ordering::SeqCst) {
            return Err(scripted_failure("install"));
        }
        Ok(runtime != RuntimeKind::Static)
    }
}

/// Database presence with a fixed answer
#[derive(Default)]
pub struct MockDatabasePresence {
    exists: AtomicBool,
}

impl MockDatabasePresence {
    pub fn new(exists: bool) -> Self {
        Self {
            exists: AtomicBool::new(exists),
        }
    }

    pub fn set(&self, exists: bool) {
        self.exists.store(exists, Ordering::SeqCst);
    }
}

#[async_trait]
impl DatabasePresenceCheck for MockDatabasePresence {
    async fn exists(&self, _project: &str) -> Result<bool, HostkitError> {
        Ok(self.exists.load(Ordering::SeqCst))
    }
}

/// One of every mock, kept as concrete handles for assertions
pub struct MockCollaborators {
    pub runner: Arc<MockProcessRunner>,
    pub service: Arc<MockServiceController>,
    pub git: Arc<MockGitFetcher>,
    pub checkpoints: Arc<MockCheckpointService>,
    pub env: Arc<MockEnvSnapshotService>,
    pub secrets: Arc<MockSecretInjector>,
    pub installer: Arc<MockRuntimeInstaller>,
    pub database: Arc<MockDatabasePresence>,
}

impl Default for MockCollaborators {
    fn default() -> Self {
        Self::new()
    }
}

impl MockCollaborators {
    pub fn new() -> Self {
        Self {
            runner: Arc::new(MockProcessRunner::new()),
            service: Arc::new(MockServiceController::new()),
            git: Arc::new(MockGitFetcher::new()),
            checkpoints: Arc::new(MockCheckpointService::new()),
            env: Arc::new(MockEnvSnapshotService::new()),
            secrets: Arc::new(MockSecretInjector::new(2)),
            installer: Arc::new(MockRuntimeInstaller::new()),
            database: Arc::new(MockDatabasePresence::new(false)),
        }
    }

    /// Trait-object view handed to the orchestrator
    pub fn collaborators(&self) -> Collaborators {
        Collaborators {
            runner: self.runner.clone(),
            service: self.service.clone(),
            git: self.git.clone(),
            checkpoints: self.checkpoints.clone(),
            env: self.env.clone(),
            secrets: self.secrets.clone(),
            installer: self.installer.clone(),
            database: self.database.clone(),
        }
    }
}
