//! Deploy engine

pub mod auto_pause;
pub mod builder;
pub mod detect;
pub mod fsm;
pub mod git;
pub mod lease;
pub mod orchestrator;
pub mod rate_limit;
pub mod release;
pub mod source;
pub mod validate;

use std::sync::Arc;
use std::time::Duration;

use crate::deploy::git::{CommandGitFetcher, GitFetcher};
use crate::ledger::Store;
use crate::services::{
    CheckpointService, CommandRuntimeInstaller, DatabasePresenceCheck, EnvSnapshotService,
    FileEnvSnapshotService, FileSecretInjector, LedgerDatabasePresence, PgDumpCheckpointService,
    ProcessRunner, RuntimeInstaller, SecretInjector, ServiceController, SystemdController,
    TokioProcessRunner,
};
use crate::storage::layout::HostLayout;
use crate::storage::settings::Settings;

pub use orchestrator::{DeployOptions, DeployOrchestrator, RollbackOptions};
pub use source::GitSource;

/// Everything the orchestrator talks to outside the ledger and the
/// release tree
#[derive(Clone)]
pub struct Collaborators {
    pub runner: Arc<dyn ProcessRunner>,
    pub service: Arc<dyn ServiceController>,
    pub git: Arc<dyn GitFetcher>,
    pub checkpoints: Arc<dyn CheckpointService>,
    pub env: Arc<dyn EnvSnapshotService>,
    pub secrets: Arc<dyn SecretInjector>,
    pub installer: Arc<dyn RuntimeInstaller>,
    pub database: Arc<dyn DatabasePresenceCheck>,
}

impl Collaborators {
    /// Production wiring: real processes, systemd, git and pg_dump
    pub fn system(store: &Store, layout: &HostLayout, settings: &Settings) -> Self {
        let deploy = &settings.deploy;
        let runner: Arc<dyn ProcessRunner> = Arc::new(TokioProcessRunner);

        Self {
            runner: runner.clone(),
            service: Arc::new(SystemdController::new(
                runner.clone(),
                deploy.unit_prefix.clone(),
                Duration::from_secs(deploy.service_timeout_secs),
            )),
            git: Arc::new(CommandGitFetcher::new(
                runner.clone(),
                Duration::from_secs(deploy.clone_timeout_secs),
            )),
            checkpoints: Arc::new(PgDumpCheckpointService::new(
                runner.clone(),
                store.clone(),
                layout.clone(),
                Duration::from_secs(deploy.install_timeout_secs),
            )),
            env: Arc::new(FileEnvSnapshotService::new(layout.clone())),
            secrets: Arc::new(FileSecretInjector::new(layout.clone())),
            installer: Arc::new(CommandRuntimeInstaller::new(
                runner,
                layout.clone(),
                Duration::from_secs(deploy.install_timeout_secs),
            )),
            database: Arc::new(LedgerDatabasePresence::new(store.clone())),
        }
    }
}
