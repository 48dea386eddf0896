//! Versioned, atomically activatable releases.
//!
//! Each project keeps one directory per release under `releases/` and an
//! `app` symlink pointing at the live one. The ledger row's `is_current`
//! flag and the symlink are moved together by [`ReleaseManager::activate`]:
//! the flag changes inside a transaction, the symlink is swapped while the
//! transaction is still open, and a failed commit puts the old symlink back.

use std::future::Future;
use std::path::{Path, PathBuf};

use chrono::Utc;
use hostkit_api::{GitRevision, ReleaseSummary};
use tracing::{debug, error, info};

use crate::deploy::fsm::{ReleaseEvent, ReleaseState};
use crate::errors::{DeployError, DeployErrorKind, HostkitError};
use crate::filesys::dir::Dir;
use crate::filesys::link::{pointer_state, remove_symlink, swap_symlink, PointerState};
use crate::ledger::releases::mark_current;
use crate::ledger::{Release, Store};
use crate::storage::layout::HostLayout;
use crate::utils::release_name;

/// Actor recorded on releases created by the legacy migration
pub const MIGRATION_ACTOR: &str = "migration";

/// Release lifecycle for all projects on the host
#[derive(Clone)]
pub struct ReleaseManager {
    store: Store,
    layout: HostLayout,
    retention: u32,
}

impl ReleaseManager {
    pub fn new(store: Store, layout: HostLayout, retention: u32) -> Self {
        Self {
            store,
            layout,
            retention: retention.max(1),
        }
    }

    /// Whether the project already uses the release layout
    pub async fn is_release_based(&self, project: &str) -> Result<bool, HostkitError> {
        match pointer_state(&self.layout.current_path(project)).await? {
            PointerState::Link(_) => Ok(true),
            PointerState::Missing => Ok(self.layout.releases_dir(project).exists().await),
            PointerState::Directory | PointerState::Other => Ok(false),
        }
    }

    /// Move a legacy in-place `app` directory into the release layout.
    ///
    /// The directory becomes the first release and is activated. A project
    /// without any code just gets an empty `releases/`. Safe to call again.
    pub async fn migrate_to_releases(&self, project: &str) -> Result<Option<Release>, DeployError> {
        let failed = |e: HostkitError| {
            DeployError::new(
                DeployErrorKind::LegacyMigrationFailed,
                format!("Failed to migrate {project} to releases: {e}"),
            )
            .with_suggestion("check ownership and free space under the project directory, then retry")
        };

        let current = self.layout.current_path(project);
        let releases = self.layout.releases_dir(project);

        match pointer_state(&current).await.map_err(failed)? {
            PointerState::Link(_) => Ok(None),
            PointerState::Missing => {
                releases.create().await.map_err(failed)?;
                Ok(None)
            }
            PointerState::Other => Err(failed(HostkitError::Internal(format!(
                "{} is neither a directory nor a symlink",
                current.display()
            )))),
            PointerState::Directory => {
                info!(project = %project, "Migrating legacy layout to releases");
                releases.create().await.map_err(failed)?;

                let now = Utc::now();
                let name = release_name(now);
                let target = releases.path().join(&name);
                tokio::fs::rename(&current, &target)
                    .await
                    .map_err(|e| failed(e.into()))?;

                let result: Result<Release, HostkitError> = async {
                    let release = self
                        .store
                        .insert_release(project, &name, &path_str(&target), MIGRATION_ACTOR, now)
                        .await?;
                    self.activate(project, &release).await
                }
                .await;

                match result {
                    Ok(release) => Ok(Some(release)),
                    Err(e) => {
                        // put the code back where the service expects it
                        if matches!(pointer_state(&current).await, Ok(PointerState::Missing)) {
                            if let Err(restore) = tokio::fs::rename(&target, &current).await {
                                error!(project = %project, "Failed to restore legacy app directory: {}", restore);
                            }
                        }
                        Err(failed(e))
                    }
                }
            }
        }
    }

    /// Allocate a staged release with an empty directory
    pub async fn create_release(&self, project: &str, deployed_by: &str) -> Result<Release, HostkitError> {
        let now = Utc::now();
        let name = release_name(now);
        let dir = self.layout.releases_dir(project).subdir(&name);
        dir.create().await?;

        let release = self
            .store
            .insert_release(project, &name, &path_str(dir.path()), deployed_by, now)
            .await?;
        debug!(project = %project, release = %name, "Created release");
        Ok(release)
    }

    pub async fn update_files(&self, release: &Release, files_synced: u64) -> Result<(), HostkitError> {
        self.store.set_release_files(release.id, files_synced).await
    }

    pub async fn update_git_info(&self, release: &Release, git: &GitRevision) -> Result<(), HostkitError> {
        self.store.set_release_git(release.id, git).await
    }

    pub async fn update_snapshot(
        &self,
        release: &Release,
        checkpoint_id: Option<&str>,
        env_snapshot: Option<&str>,
    ) -> Result<(), HostkitError> {
        self.store
            .set_release_snapshot(release.id, checkpoint_id, env_snapshot)
            .await
    }

    /// Make `release` the live release of `project`.
    ///
    /// The ledger flag and the `app` symlink change together or not at all.
    pub async fn activate(&self, project: &str, release: &Release) -> Result<Release, HostkitError> {
        if release.project != project {
            return Err(HostkitError::NotFound(format!(
                "release {} in project {project}",
                release.release_name
            )));
        }

        let state = ReleaseState::of(release);
        let link = self.layout.current_path(project);
        let target = PathBuf::from(&release.release_path);

        if state == ReleaseState::Active {
            // already live; make sure the pointer agrees
            if pointer_state(&link).await? != PointerState::Link(target.clone()) {
                swap_symlink(&link, &target).await?;
            }
            return self.reload(release).await;
        }

        let event = match state {
            ReleaseState::Superseded => ReleaseEvent::Reactivate,
            _ => ReleaseEvent::Activate,
        };
        state.process(event).map_err(HostkitError::Internal)?;

        if !Dir::new(&target).exists().await {
            return Err(HostkitError::NotFound(format!(
                "release directory {}",
                target.display()
            )));
        }

        let previous = pointer_state(&link).await?;

        let mut tx = self.store.pool().begin().await?;
        if !mark_current(&mut tx, project, release.id, Utc::now()).await? {
            return Err(HostkitError::NotFound(format!(
                "release {} in project {project}",
                release.release_name
            )));
        }

        // a failed swap drops the unpolled commit, which rolls the flag back
        swap_then_commit(&link, &target, &previous, tx.commit())
            .await
            .inspect_err(|e| {
                error!(project = %project, release = %release.release_name, "Activation failed: {}", e);
            })?;

        info!(project = %project, release = %release.release_name, "Activated release");
        self.reload(release).await
    }

    /// Delete releases beyond the retention count, oldest first.
    ///
    /// The live release is never removed. Returns how many were pruned.
    pub async fn cleanup_old_releases(&self, project: &str) -> Result<u32, HostkitError> {
        let releases = self.store.list_releases(project).await?;
        let mut pruned = 0;

        for release in releases.into_iter().skip(self.retention as usize) {
            if ReleaseState::of(&release).process(ReleaseEvent::Prune).is_err() {
                continue;
            }
            Dir::new(&release.release_path).delete().await?;
            self.store.delete_release(release.id).await?;
            debug!(project = %project, release = %release.release_name, "Pruned release");
            pruned += 1;
        }

        if pruned > 0 {
            info!(project = %project, pruned, "Pruned old releases");
        }
        Ok(pruned)
    }

    /// All releases of a project, newest first
    pub async fn list_releases(&self, project: &str) -> Result<Vec<Release>, HostkitError> {
        self.store.list_releases(project).await
    }

    pub async fn current_release(&self, project: &str) -> Result<Option<Release>, HostkitError> {
        self.store.current_release(project).await
    }

    pub async fn get_release(&self, project: &str, name: &str) -> Result<Option<Release>, HostkitError> {
        self.store.find_release(project, name).await
    }

    pub fn release_state(&self, release: &Release) -> ReleaseState {
        ReleaseState::of(release)
    }

    async fn reload(&self, release: &Release) -> Result<Release, HostkitError> {
        self.store
            .get_release(release.id)
            .await?
            .ok_or_else(|| HostkitError::NotFound(format!("release {}", release.release_name)))
    }
}

/// Operator-facing view of a release
pub fn summarize(release: &Release) -> ReleaseSummary {
    ReleaseSummary {
        name: release.release_name.clone(),
        path: release.release_path.clone(),
        state: ReleaseState::of(release).to_string(),
        is_current: release.is_current,
        deployed_at: release.deployed_at,
        deployed_by: release.deployed_by.clone(),
        files_synced: release.files_synced.max(0) as u64,
        checkpoint_id: release.checkpoint_id.clone(),
        has_env_snapshot: release.env_snapshot.is_some(),
        git_commit: release.git_commit.clone(),
        git_branch: release.git_branch.clone(),
    }
}

fn path_str(path: &Path) -> String {
    path.to_string_lossy().to_string()
}

/// Point `link` at `target`, then run `commit`; a failed commit puts `previous` back
async fn swap_then_commit<C>(
    link: &Path,
    target: &Path,
    previous: &PointerState,
    commit: C,
) -> Result<(), HostkitError>
where
    C: Future<Output = Result<(), sqlx::Error>>,
{
    swap_symlink(link, target).await?;

    if let Err(e) = commit.await {
        let restored = match previous {
            PointerState::Link(old) => swap_symlink(link, old).await,
            _ => remove_symlink(link).await,
        };
        if let Err(restore) = restored {
            error!("Failed to restore {}: {}", link.display(), restore);
        }
        return Err(e.into());
    }
    Ok(())
}
