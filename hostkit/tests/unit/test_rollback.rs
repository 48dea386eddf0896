//! Rollback tests

use std::path::Path;

use hostkit::deploy::fsm::ReleaseState;
use hostkit::deploy::{DeployOptions, RollbackOptions};
use hostkit::errors::DeployErrorKind;
use hostkit::ledger::RuntimeKind;

use crate::helpers::{static_site, Host};

#[tokio::test]
async fn test_rollback_to_previous_release() {
    let host = Host::new().await;
    host.add_project("site", RuntimeKind::Static).await;
    host.mocks.database.set(true);
    let src = static_site();

    let first = host
        .orchestrator
        .deploy("site", src.path(), &DeployOptions::default())
        .await
        .unwrap();
    let second = host
        .orchestrator
        .deploy("site", src.path(), &DeployOptions::default())
        .await
        .unwrap();

    let report = host
        .orchestrator
        .rollback("site", &RollbackOptions::default())
        .await
        .unwrap();
    assert_eq!(report.release, first.release);
    assert_eq!(report.previous_release.as_deref(), Some(second.release.as_str()));
    assert_eq!(report.checkpoint_id, first.checkpoint_id);
    assert_eq!(report.env_snapshot.as_deref(), Some("PORT=3000\n"));
    assert!(report.validation.unwrap().passed);

    assert_eq!(host.current_target("site"), Path::new(&first.release_path));
    let releases = host.orchestrator.releases().list_releases("site").await.unwrap();
    let states: Vec<_> = releases
        .iter()
        .map(|r| host.orchestrator.releases().release_state(r))
        .collect();
    assert_eq!(states, vec![ReleaseState::Superseded, ReleaseState::Active]);

    // rollbacks are not deploy attempts
    assert_eq!(host.store.recent_attempts("site", 10).await.unwrap().len(), 2);
    assert_eq!(host.mocks.service.restarts(), 3);
}

#[tokio::test]
async fn test_rollback_to_named_release_and_forward_again() {
    let host = Host::new().await;
    host.add_project("site", RuntimeKind::Static).await;
    let src = static_site();

    let mut names = Vec::new();
    for _ in 0..3 {
        let report = host
            .orchestrator
            .deploy("site", src.path(), &DeployOptions::default())
            .await
            .unwrap();
        names.push(report.release);
    }

    let opts = RollbackOptions {
        release: Some(names[0].clone()),
        restart: false,
    };
    let report = host.orchestrator.rollback("site", &opts).await.unwrap();
    assert_eq!(report.release, names[0]);
    assert!(!report.service_restarted);
    assert!(report.validation.is_none());

    let opts = RollbackOptions {
        release: Some(names[2].clone()),
        restart: false,
    };
    host.orchestrator.rollback("site", &opts).await.unwrap();
    let current = host.store.current_release("site").await.unwrap().unwrap();
    assert_eq!(current.release_name, names[2]);
}

#[tokio::test]
async fn test_rollback_without_earlier_release() {
    let host = Host::new().await;
    host.add_project("site", RuntimeKind::Static).await;

    let err = host
        .orchestrator
        .rollback("site", &RollbackOptions::default())
        .await
        .unwrap_err();
    assert_eq!(err.kind, DeployErrorKind::ReleaseNotFound);

    let src = static_site();
    host.orchestrator
        .deploy("site", src.path(), &DeployOptions::default())
        .await
        .unwrap();
    let err = host
        .orchestrator
        .rollback("site", &RollbackOptions::default())
        .await
        .unwrap_err();
    assert_eq!(err.kind, DeployErrorKind::ReleaseNotFound);
    assert!(err.suggestion.unwrap().contains("hostkit releases"));

    let opts = RollbackOptions {
        release: Some("19990101000000-deadbeef".to_string()),
        ..Default::default()
    };
    let err = host.orchestrator.rollback("site", &opts).await.unwrap_err();
    assert_eq!(err.kind, DeployErrorKind::ReleaseNotFound);
}

#[tokio::test]
async fn test_rollback_skips_never_activated_releases() {
    let host = Host::new().await;
    host.add_project("site", RuntimeKind::Static).await;
    let src = static_site();
    let first = host
        .orchestrator
        .deploy("site", src.path(), &DeployOptions::default())
        .await
        .unwrap();

    let staged = host
        .orchestrator
        .releases()
        .create_release("site", "ops")
        .await
        .unwrap();

    let opts = RollbackOptions {
        release: Some(staged.release_name.clone()),
        ..Default::default()
    };
    let err = host.orchestrator.rollback("site", &opts).await.unwrap_err();
    assert_eq!(err.kind, DeployErrorKind::ReleaseNotFound);
    assert!(err.message.contains("never activated"));

    let current = host.store.current_release("site").await.unwrap().unwrap();
    assert_eq!(current.release_name, first.release);
}

#[tokio::test]
async fn test_rollback_respects_pause() {
    let host = Host::new().await;
    host.add_project("site", RuntimeKind::Static).await;
    let src = static_site();
    for _ in 0..2 {
        host.orchestrator
            .deploy("site", src.path(), &DeployOptions::default())
            .await
            .unwrap();
    }
    host.orchestrator.auto_pause().pause("site", "incident").await.unwrap();

    let err = host
        .orchestrator
        .rollback("site", &RollbackOptions::default())
        .await
        .unwrap_err();
    assert_eq!(err.kind, DeployErrorKind::AutoPaused);
}
