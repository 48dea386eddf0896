//! Release state machine tests

use chrono::Utc;
use hostkit::deploy::fsm::{ReleaseEvent, ReleaseState};
use hostkit::ledger::Release;

fn release(is_current: bool, activated: bool) -> Release {
    Release {
        id: 1,
        project: "site".to_string(),
        release_name: "20260301120000-abcdef01".to_string(),
        release_path: "/srv/hk/projects/site/releases/20260301120000-abcdef01".to_string(),
        deployed_at: Utc::now(),
        activated_at: activated.then(Utc::now),
        is_current,
        files_synced: 3,
        deployed_by: "cli".to_string(),
        checkpoint_id: None,
        env_snapshot: None,
        git_commit: None,
        git_branch: None,
        git_tag: None,
        git_repo: None,
    }
}

#[test]
fn test_state_is_derived_from_ledger_row() {
    assert_eq!(ReleaseState::of(&release(false, false)), ReleaseState::Staged);
    assert_eq!(ReleaseState::of(&release(true, true)), ReleaseState::Active);
    assert_eq!(ReleaseState::of(&release(false, true)), ReleaseState::Superseded);
}

#[test]
fn test_rollback_cycle() {
    let state = ReleaseState::Staged;
    let state = state.process(ReleaseEvent::Activate).unwrap();
    let state = state.process(ReleaseEvent::Supersede).unwrap();
    assert_eq!(state, ReleaseState::Superseded);

    // Superseded -> Active
    let state = state.process(ReleaseEvent::Reactivate).unwrap();
    assert_eq!(state, ReleaseState::Active);
}

#[test]
fn test_live_release_cannot_be_pruned() {
    assert!(ReleaseState::Active.process(ReleaseEvent::Prune).is_err());
    assert!(ReleaseState::Staged.process(ReleaseEvent::Prune).is_ok());
}

#[test]
fn test_pruned_is_terminal() {
    for event in [
        ReleaseEvent::Activate,
        ReleaseEvent::Supersede,
        ReleaseEvent::Reactivate,
        ReleaseEvent::Prune,
    ] {
        assert!(ReleaseState::Pruned.process(event).is_err());
    }
}

#[test]
fn test_state_names() {
    assert_eq!(ReleaseState::Superseded.to_string(), "superseded");
    assert_eq!(
        serde_json::to_string(&ReleaseState::Staged).unwrap(),
        "\"staged\""
    );
}
