//! Shared fixtures for the integration tests

use std::path::{Path, PathBuf};

use hostkit::deploy::DeployOrchestrator;
use hostkit::ledger::{NewProject, RuntimeKind, Store};
use hostkit::services::mock::MockCollaborators;
use hostkit::storage::layout::HostLayout;
use hostkit::storage::settings::Settings;
use tempfile::TempDir;

/// A throwaway host: its own HOSTKIT_HOME, an in-memory ledger and mock
/// collaborators
pub struct Host {
    pub home: TempDir,
    pub layout: HostLayout,
    pub store: Store,
    pub mocks: MockCollaborators,
    pub orchestrator: DeployOrchestrator,
}

pub fn fast_settings() -> Settings {
    let mut settings = Settings::default();
    settings.deploy.validation_interval_ms = 5;
    settings.deploy.validation_timeout_secs = 0;
    settings
}

impl Host {
    pub async fn new() -> Self {
        Self::with_settings(fast_settings()).await
    }

    pub async fn with_settings(settings: Settings) -> Self {
        let home = tempfile::tempdir().unwrap();
        let layout = HostLayout::new(home.path());
        layout.setup().await.unwrap();

        let store = Store::in_memory().await.unwrap();
        let mocks = MockCollaborators::new();
        let orchestrator = DeployOrchestrator::new(
            store.clone(),
            layout.clone(),
            settings,
            mocks.collaborators(),
        );

        Self {
            home,
            layout,
            store,
            mocks,
            orchestrator,
        }
    }

    pub async fn add_project(&self, name: &str, runtime: RuntimeKind) {
        self.store
            .insert_project(&NewProject::new(name, runtime, 3000))
            .await
            .unwrap();
    }

    /// Where the `app` pointer of `project` currently resolves
    pub fn current_target(&self, project: &str) -> PathBuf {
        std::fs::read_link(self.layout.current_path(project)).unwrap()
    }

    pub fn release_dirs(&self, project: &str) -> Vec<String> {
        let dir = self.layout.releases_dir(project);
        let mut names: Vec<String> = match std::fs::read_dir(dir.path()) {
            Ok(entries) => entries
                .filter_map(|e| e.ok())
                .map(|e| e.file_name().to_string_lossy().into_owned())
                .collect(),
            Err(_) => Vec::new(),
        };
        names.sort();
        names
    }
}

/// A directory holding `files` (`(relative path, contents)`)
pub fn source_tree(files: &[(&str, &str)]) -> TempDir {
    let dir = tempfile::tempdir().unwrap();
    for (rel, contents) in files {
        write(dir.path(), rel, contents);
    }
    dir
}

pub fn static_site() -> TempDir {
    source_tree(&[
        ("index.html", "<h1>hello</h1>"),
        ("assets/site.css", "body { margin: 0 }"),
    ])
}

pub fn write(root: &Path, rel: &str, contents: &str) {
    let path = root.join(rel);
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).unwrap();
    }
    std::fs::write(path, contents).unwrap();
}
