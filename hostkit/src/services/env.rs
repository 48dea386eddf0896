//! Environment capture and secret injection

use std::collections::BTreeMap;

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use tracing::{debug, info};

use crate::errors::HostkitError;
use crate::storage::layout::HostLayout;

/// Captures the environment configuration of a project
#[async_trait]
pub trait EnvSnapshotService: Send + Sync {
    async fn capture(&self, project: &str) -> Result<String, HostkitError>;
}

/// Pulls secrets from the vault into the project environment
#[async_trait]
pub trait SecretInjector: Send + Sync {
    /// Returns the number of variables written
    async fn inject(&self, project: &str) -> Result<u32, HostkitError>;
}

/// Snapshots the project's `.env` file verbatim
pub struct FileEnvSnapshotService {
    layout: HostLayout,
}

impl FileEnvSnapshotService {
    pub fn new(layout: HostLayout) -> Self {
        Self { layout }
    }
}

#[async_trait]
impl EnvSnapshotService for FileEnvSnapshotService {
    async fn capture(&self, project: &str) -> Result<String, HostkitError> {
        let file = self.layout.env_file(project);
        let contents = file.read_string_opt().await?.unwrap_or_default();
        debug!(project = %project, bytes = contents.len(), "Captured env snapshot");
        Ok(contents)
    }
}

/// Merges `secrets/<project>.json` into the project's `.env`
pub struct FileSecretInjector {
    layout: HostLayout,
}

impl FileSecretInjector {
    pub fn new(layout: HostLayout) -> Self {
        Self { layout }
    }

    async fn load_secrets(&self, project: &str) -> Result<BTreeMap<String, SecretString>, HostkitError> {
        let file = self.layout.secrets_file(project);
        let Some(contents) = file.read_string_opt().await? else {
            return Ok(BTreeMap::new());
        };
        let raw: BTreeMap<String, String> = serde_json::from_str(&contents)?;
        Ok(raw
            .into_iter()
            .map(|(key, value)| (key, SecretString::from(value)))
            .collect())
    }
}

#[async_trait]
impl SecretInjector for FileSecretInjector {
    async fn inject(&self, project: &str) -> Result<u32, HostkitError> {
        let secrets = self.load_secrets(project).await?;
        if secrets.is_empty() {
            return Ok(0);
        }

        let env_file = self.layout.env_file(project);
        let existing = env_file.read_string_opt().await?.unwrap_or_default();
        let merged = merge_env(&existing, &secrets);

        env_file.write_atomic(merged.as_bytes()).await?;
        env_file.set_permissions_600().await?;

        info!(project = %project, count = secrets.len(), "Injected secrets");
        Ok(secrets.len() as u32)
    }
}

/// Replace or append `KEY=value` lines; comments and unrelated keys are kept
fn merge_env(existing: &str, secrets: &BTreeMap<String, SecretString>) -> String {
    let mut written = Vec::new();
    let mut out = String::with_capacity(existing.len());

    for line in existing.lines() {
        let key = line
            .split_once('=')
            .map(|(k, _)| k.trim().trim_start_matches("export ").trim());
        match key.and_then(|k| secrets.get_key_value(k)) {
            Some((key, value)) => {
                out.push_str(&format!("{}={}\n", key, value.expose_secret()));
                written.push(key.as_str());
            }
            None => {
                out.push_str(line);
                out.push('\n');
            }
        }
    }

    for (key, value) in secrets {
        if !written.contains(&key.as_str()) {
            out.push_str(&format!("{}={}\n", key, value.expose_secret()));
        }
    }

    out
}
