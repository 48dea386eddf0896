//! External collaborators of the deploy engine.
//!
//! Each collaborator is a small async trait with one production
//! implementation and a mock in [`mock`].

pub mod checkpoint;
pub mod env;
pub mod installer;
pub mod mock;
pub mod process;
pub mod supervisor;

pub use checkpoint::{CheckpointService, DatabasePresenceCheck, LedgerDatabasePresence, PgDumpCheckpointService};
pub use env::{EnvSnapshotService, FileEnvSnapshotService, FileSecretInjector, SecretInjector};
pub use installer::{CommandRuntimeInstaller, RuntimeInstaller};
pub use process::{CommandOutput, CommandSpec, ProcessRunner, TokioProcessRunner};
pub use supervisor::{ServiceController, ServiceStatus, SystemdController};
