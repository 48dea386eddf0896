//! Release lifecycle state machine

use serde::{Deserialize, Serialize};

use crate::ledger::Release;

/// Lifecycle state of a release
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReleaseState {
    /// Directory populated, never activated
    Staged,

    /// The live release of its project
    Active,

    /// Was active, replaced by a newer activation
    Superseded,

    /// Deleted from disk and ledger
    Pruned,
}

impl ReleaseState {
    /// State derived from a ledger row
    pub fn of(release: &Release) -> Self {
        if release.is_current {
            ReleaseState::Active
        } else if release.activated_at.is_some() {
            ReleaseState::Superseded
        } else {
            ReleaseState::Staged
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ReleaseState::Staged => "staged",
            ReleaseState::Active => "active",
            ReleaseState::Superseded => "superseded",
            ReleaseState::Pruned => "pruned",
        }
    }

    /// Process an event and return the next state
    pub fn process(self, event: ReleaseEvent) -> Result<ReleaseState, String> {
        let next = match (self, event) {
            (ReleaseState::Staged, ReleaseEvent::Activate) => ReleaseState::Active,
            (ReleaseState::Active, ReleaseEvent::Supersede) => ReleaseState::Superseded,

            // rollback
            (ReleaseState::Superseded, ReleaseEvent::Reactivate) => ReleaseState::Active,

            // orphaned stages and old releases; never the live one
            (ReleaseState::Staged, ReleaseEvent::Prune) => ReleaseState::Pruned,
            (ReleaseState::Superseded, ReleaseEvent::Prune) => ReleaseState::Pruned,

            (state, event) => {
                return Err(format!("Invalid release transition: {:?} -> {:?}", state, event));
            }
        };
        Ok(next)
    }
}

impl std::fmt::Display for ReleaseState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Release lifecycle event
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReleaseEvent {
    /// First activation after a deploy
    Activate,

    /// Another release of the project was activated
    Supersede,

    /// Rollback to a previously active release
    Reactivate,

    /// Removal by retention cleanup
    Prune,
}
