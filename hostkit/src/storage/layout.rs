//! Storage layout on the host

use std::path::PathBuf;

use crate::errors::HostkitError;
use crate::filesys::dir::Dir;
use crate::filesys::file::File;

/// Environment variable overriding the base directory
pub const HOME_ENV: &str = "HOSTKIT_HOME";

/// Storage layout for the host
#[derive(Debug, Clone)]
pub struct HostLayout {
    /// Base directory for all storage
    pub base_dir: PathBuf,
}

impl HostLayout {
    /// Create a new storage layout
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
        }
    }

    /// Layout rooted at `$HOSTKIT_HOME`, or the default
    pub fn from_env() -> Self {
        match std::env::var_os(HOME_ENV) {
            Some(dir) if !dir.is_empty() => Self::new(dir),
            _ => Self::default(),
        }
    }

    /// Get the settings file path
    pub fn settings_file(&self) -> File {
        File::new(self.base_dir.join("settings.json"))
    }

    /// Get the ledger database path
    pub fn ledger_file(&self) -> File {
        File::new(self.base_dir.join("hostkit.db"))
    }

    /// Get the projects directory
    pub fn projects_dir(&self) -> Dir {
        Dir::new(self.base_dir.join("projects"))
    }

    /// Get the root directory of one project
    pub fn project_dir(&self, project: &str) -> Dir {
        self.projects_dir().subdir(project)
    }

    /// Get the releases directory of a project
    pub fn releases_dir(&self, project: &str) -> Dir {
        self.project_dir(project).subdir("releases")
    }

    /// Get the current pointer of a project.
    ///
    /// The process supervisor's working directory resolves through this path.
    /// In the legacy layout it is a plain directory; once migrated it is a
    /// symlink into `releases/`.
    pub fn current_path(&self, project: &str) -> PathBuf {
        self.project_dir(project).path().join("app")
    }

    /// Get the env file of a project
    pub fn env_file(&self, project: &str) -> File {
        self.project_dir(project).file(".env")
    }

    /// Get the python virtualenv of a project
    pub fn venv_dir(&self, project: &str) -> Dir {
        self.project_dir(project).subdir("venv")
    }

    /// Get the directory holding ephemeral build and clone directories
    pub fn tmp_dir(&self) -> Dir {
        Dir::new(self.base_dir.join("tmp"))
    }

    /// Get the checkpoint directory of a project
    pub fn checkpoints_dir(&self, project: &str) -> Dir {
        Dir::new(self.base_dir.join("checkpoints").join(project))
    }

    /// Get the plaintext secret store of a project
    pub fn secrets_file(&self, project: &str) -> File {
        File::new(self.base_dir.join("secrets").join(format!("{project}.json")))
    }

    /// Get the logs directory
    pub fn logs_dir(&self) -> Dir {
        Dir::new(self.base_dir.join("logs"))
    }

    /// Setup the storage layout (create directories)
    pub async fn setup(&self) -> Result<(), HostkitError> {
        self.projects_dir().create().await?;
        self.tmp_dir().create().await?;
        self.logs_dir().create().await?;
        Ok(())
    }
}

impl Default for HostLayout {
    fn default() -> Self {
        Self::new("/var/lib/hostkit")
    }
}
