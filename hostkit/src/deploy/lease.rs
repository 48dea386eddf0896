//! Per-project deploy lease
//!
//! A lease is a `deploy_leases` row with an expiry. While a deploy runs, a
//! keepalive task pushes the expiry forward every third of the TTL, so the
//! TTL bounds how long a crashed holder blocks the project rather than how
//! long a deploy may take.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, error, warn};

use crate::errors::{DeployError, DeployErrorKind, HostkitError};
use crate::ledger::Store;
use crate::utils::generate_uuid;

const MIN_RENEW_INTERVAL: Duration = Duration::from_millis(10);

/// A held lease; hand it back with [`LeaseManager::release`]
#[derive(Debug)]
pub struct DeployLease {
    pub project: String,
    pub holder: String,
    lost: Arc<AtomicBool>,
    shutdown: Option<oneshot::Sender<()>>,
    keepalive: Option<JoinHandle<()>>,
}

impl DeployLease {
    /// Fail once another holder has taken the project over
    pub fn ensure_held(&self) -> Result<(), DeployError> {
        if self.lost.load(Ordering::SeqCst) {
            return Err(DeployError::new(
                DeployErrorKind::DeployInProgress,
                format!("Deploy lease of {} was lost to another deploy", self.project),
            )
            .with_suggestion("check `hostkit history` and deploy again once the other deploy finished"));
        }
        Ok(())
    }
}

/// Grants at most one live deploy per project
#[derive(Clone)]
pub struct LeaseManager {
    store: Store,
    ttl: Duration,
}

impl LeaseManager {
    pub fn new(store: Store, ttl: Duration) -> Self {
        Self { store, ttl }
    }

    fn expiry(&self) -> chrono::DateTime<Utc> {
        Utc::now() + chrono::Duration::from_std(self.ttl).unwrap_or_else(|_| chrono::Duration::minutes(30))
    }

    /// Take the lease or fail with `DeployInProgress`
    pub async fn acquire(&self, project: &str) -> Result<DeployLease, DeployError> {
        let holder = generate_uuid();
        let acquired = self
            .store
            .try_acquire_lease(project, &holder, Utc::now(), self.expiry())
            .await?;

        if !acquired {
            return Err(DeployError::new(
                DeployErrorKind::DeployInProgress,
                format!("Another deploy of {project} is in progress"),
            )
            .with_suggestion("wait for it to finish and retry"));
        }

        debug!(project = %project, holder = %holder, "Acquired deploy lease");

        let lost = Arc::new(AtomicBool::new(false));
        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        let keepalive = tokio::spawn(keep_alive(
            self.clone(),
            project.to_string(),
            holder.clone(),
            lost.clone(),
            shutdown_rx,
        ));

        Ok(DeployLease {
            project: project.to_string(),
            holder,
            lost,
            shutdown: Some(shutdown_tx),
            keepalive: Some(keepalive),
        })
    }

    /// Give the lease back; a failure only delays the next deploy until expiry
    pub async fn release(&self, mut lease: DeployLease) {
        if let Some(shutdown) = lease.shutdown.take() {
            let _ = shutdown.send(());
        }
        if let Some(keepalive) = lease.keepalive.take() {
            if let Err(e) = keepalive.await {
                error!(project = %lease.project, "Lease keepalive task failed: {}", e);
            }
        }

        if let Err(e) = self.try_release(&lease).await {
            warn!(project = %lease.project, "Failed to release deploy lease: {}", e);
        }
    }

    async fn try_release(&self, lease: &DeployLease) -> Result<(), HostkitError> {
        self.store.release_lease(&lease.project, &lease.holder).await?;
        debug!(project = %lease.project, "Released deploy lease");
        Ok(())
    }
}

/// Renew the lease until `shutdown` fires or the lease is found taken over
async fn keep_alive(
    leases: LeaseManager,
    project: String,
    holder: String,
    lost: Arc<AtomicBool>,
    mut shutdown: oneshot::Receiver<()>,
) {
    let interval = (leases.ttl / 3).max(MIN_RENEW_INTERVAL);

    loop {
        tokio::select! {
            _ = &mut shutdown => return,
            _ = tokio::time::sleep(interval) => {}
        }

        match leases.store.renew_lease(&project, &holder, leases.expiry()).await {
            Ok(true) => debug!(project = %project, "Renewed deploy lease"),
            Ok(false) => {
                error!(project = %project, holder = %holder, "Deploy lease was taken over");
                lost.store(true, Ordering::SeqCst);
                return;
            }
            // retried on the next tick; the lease stays valid until its expiry
            Err(e) => warn!(project = %project, "Failed to renew deploy lease: {}", e),
        }
    }
}
