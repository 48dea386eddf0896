//! Deploy workflow tests

use std::path::Path;
use std::time::Duration;

use hostkit::deploy::detect::STANDALONE_ENTRY_POINT;
use hostkit::deploy::lease::LeaseManager;
use hostkit::deploy::DeployOptions;
use hostkit::errors::DeployErrorKind;
use hostkit::ledger::RuntimeKind;
use hostkit::services::process::CommandOutput;
use hostkit::services::supervisor::ServiceStatus;
use hostkit_api::SourceType;
use tokio_test::{assert_err, assert_ok};

use crate::helpers::{fast_settings, source_tree, static_site, write, Host};

#[tokio::test]
async fn test_static_site_end_to_end() {
    let host = Host::new().await;
    host.add_project("site", RuntimeKind::Static).await;
    let src = static_site();

    let first = assert_ok!(host.orchestrator.deploy("site", src.path(), &DeployOptions::default()).await);
    assert_eq!(first.build_type, "static");
    assert_eq!(first.source_type, SourceType::Local);
    assert_eq!(first.files_synced, 2);
    assert!(first.env_snapshot_captured);
    assert!(!first.dependencies_installed);
    assert!(first.service_restarted);
    assert!(first.validation_passed());
    assert!(first.checkpoint_id.is_none());

    let second = host
        .orchestrator
        .deploy("site", src.path(), &DeployOptions::default())
        .await
        .unwrap();

    let current = host.store.current_release("site").await.unwrap().unwrap();
    assert_eq!(current.release_name, second.release);
    assert_eq!(host.current_target("site"), Path::new(&second.release_path));
    assert!(Path::new(&second.release_path).join("index.html").exists());
    assert!(Path::new(&second.release_path).join("assets/site.css").exists());

    // the previous release stays on disk until pruned
    assert!(Path::new(&first.release_path).join("index.html").exists());
    assert_eq!(host.release_dirs("site").len(), 2);

    let history = host.store.recent_attempts("site", 10).await.unwrap();
    assert_eq!(history.len(), 2);
    assert!(history.iter().all(|a| a.success && a.source_type == "local"));
    assert_eq!(history[0].files_synced, 2);
    assert_eq!(host.mocks.service.restarts(), 2);
}

#[tokio::test]
async fn test_exactly_one_current_release() {
    let host = Host::new().await;
    host.add_project("site", RuntimeKind::Static).await;
    let src = static_site();

    for _ in 0..3 {
        host.orchestrator
            .deploy("site", src.path(), &DeployOptions::default())
            .await
            .unwrap();
        let releases = host.store.list_releases("site").await.unwrap();
        assert_eq!(releases.iter().filter(|r| r.is_current).count(), 1);
        assert!(releases[0].is_current);
    }
}

#[tokio::test]
async fn test_unknown_project_records_nothing() {
    let host = Host::new().await;
    let src = static_site();

    let err = host
        .orchestrator
        .deploy("ghost", src.path(), &DeployOptions::default())
        .await
        .unwrap_err();
    assert_eq!(err.kind, DeployErrorKind::ProjectNotFound);
    assert!(host.store.recent_attempts("ghost", 10).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_sync_failure_keeps_previous_release_live() {
    let host = Host::new().await;
    host.add_project("site", RuntimeKind::Static).await;
    let good = static_site();
    let first = host
        .orchestrator
        .deploy("site", good.path(), &DeployOptions::default())
        .await
        .unwrap();

    // a socket cannot be copied, so the sync step fails midway
    let broken = static_site();
    let _socket = std::os::unix::net::UnixListener::bind(broken.path().join("app.sock")).unwrap();

    let err = host
        .orchestrator
        .deploy("site", broken.path(), &DeployOptions::default())
        .await
        .unwrap_err();
    assert_eq!(err.kind, DeployErrorKind::SyncFailed);

    assert_eq!(host.current_target("site"), Path::new(&first.release_path));
    let current = host.store.current_release("site").await.unwrap().unwrap();
    assert_eq!(current.release_name, first.release);

    // the half-written release is left staged
    let releases = host.store.list_releases("site").await.unwrap();
    assert_eq!(releases.len(), 2);
    assert!(!releases[0].is_current);
    assert!(releases[0].activated_at.is_none());

    let history = host.store.recent_attempts("site", 10).await.unwrap();
    assert!(!history[0].success);
    assert!(history[0].error_message.as_deref().unwrap().contains("SYNC_FAILED"));
    assert_eq!(host.mocks.service.restarts(), 1);
}

#[tokio::test]
async fn test_rate_limit_window_through_orchestrator() {
    let host = Host::new().await;
    host.add_project("site", RuntimeKind::Static).await;
    let mut config = host.orchestrator.rate_limiter().get_config("site").await.unwrap();
    config.max_deploys = 3;
    config.window_minutes = 60;
    host.orchestrator.rate_limiter().set_config(&config).await.unwrap();

    let src = static_site();
    for _ in 0..3 {
        host.orchestrator
            .deploy("site", src.path(), &DeployOptions::default())
            .await
            .unwrap();
    }

    let err = assert_err!(host.orchestrator.deploy("site", src.path(), &DeployOptions::default()).await);
    assert_eq!(err.kind, DeployErrorKind::RateLimitExceeded);
    assert!(err.suggestion.as_deref().unwrap().contains("--override-ratelimit"));

    let history = host.store.recent_attempts("site", 10).await.unwrap();
    assert_eq!(history.len(), 4);
    assert!(!history[0].success);
    assert!(!history[0].override_used);
    assert_eq!(host.store.list_releases("site").await.unwrap().len(), 3);

    let opts = DeployOptions {
        override_ratelimit: true,
        ..Default::default()
    };
    let report = host.orchestrator.deploy("site", src.path(), &opts).await.unwrap();
    assert!(report.override_used);
    let history = host.store.recent_attempts("site", 10).await.unwrap();
    assert!(history[0].success && history[0].override_used);

    let later = chrono::Utc::now() + chrono::Duration::minutes(61);
    assert_ok!(host.orchestrator.rate_limiter().check_rate_limit_at("site", later).await);
}

#[tokio::test]
async fn test_consecutive_failures_cool_down() {
    let host = Host::new().await;
    host.add_project("site", RuntimeKind::Static).await;
    let missing = host.home.path().join("nowhere");

    for _ in 0..3 {
        let err = host
            .orchestrator
            .deploy("site", &missing, &DeployOptions::default())
            .await
            .unwrap_err();
        assert_eq!(err.kind, DeployErrorKind::SourceNotFound);
    }

    let src = static_site();
    let err = host
        .orchestrator
        .deploy("site", src.path(), &DeployOptions::default())
        .await
        .unwrap_err();
    assert_eq!(err.kind, DeployErrorKind::RateLimitExceeded);
    assert!(err.message.contains("cooling down"));

    let status = host.orchestrator.rate_limiter().status("site").await.unwrap();
    assert_eq!(status.consecutive_failures, 4);
    assert!(status.cooldown_until.is_some());

    let later = chrono::Utc::now() + chrono::Duration::minutes(6);
    assert_ok!(host.orchestrator.rate_limiter().check_rate_limit_at("site", later).await);
}

#[tokio::test]
async fn test_paused_project_is_untouched() {
    let host = Host::new().await;
    host.add_project("site", RuntimeKind::Static).await;
    host.orchestrator.auto_pause().pause("site", "manual hold").await.unwrap();
    let src = static_site();

    let err = host
        .orchestrator
        .deploy("site", src.path(), &DeployOptions::default())
        .await
        .unwrap_err();
    assert_eq!(err.kind, DeployErrorKind::AutoPaused);
    assert!(err.message.contains("manual hold"));
    assert!(err.suggestion.unwrap().contains("autopause clear"));

    assert!(host.store.recent_attempts("site", 10).await.unwrap().is_empty());
    assert!(host.store.list_releases("site").await.unwrap().is_empty());
    assert!(!host.layout.project_dir("site").exists().await);
    assert!(host.mocks.service.calls().is_empty());

    assert!(host.orchestrator.auto_pause().clear("site").await.unwrap());
    assert_ok!(host.orchestrator.deploy("site", src.path(), &DeployOptions::default()).await);
}

#[tokio::test]
async fn test_incomplete_bundle_rejected_before_release() {
    let host = Host::new().await;
    host.add_project("web", RuntimeKind::Node).await;
    let src = source_tree(&[
        ("package.json", r#"{"dependencies":{"next":"14.2.0"}}"#),
        (".next/standalone/server.js", "require('next')"),
    ]);

    let err = host
        .orchestrator
        .deploy("web", src.path(), &DeployOptions::default())
        .await
        .unwrap_err();
    assert_eq!(err.kind, DeployErrorKind::IncompleteBundle);
    assert!(err.suggestion.unwrap().contains("--build"));

    assert!(host.release_dirs("web").is_empty());
    assert!(host.store.list_releases("web").await.unwrap().is_empty());
    let history = host.store.recent_attempts("web", 10).await.unwrap();
    assert_eq!(history.len(), 1);
    assert!(!history[0].success);
}

#[tokio::test]
async fn test_standalone_bundle_switches_entry_point_and_back() {
    let host = Host::new().await;
    host.add_project("web", RuntimeKind::Node).await;
    let bundle = source_tree(&[
        ("package.json", r#"{"dependencies":{"next":"14.2.0"}}"#),
        (".next/standalone/server.js", "require('next')"),
        (".next/standalone/node_modules/next/package.json", "{}"),
    ]);

    let report = host
        .orchestrator
        .deploy("web", bundle.path(), &DeployOptions::default())
        .await
        .unwrap();
    assert_eq!(report.build_type, "standalone");
    assert!(!report.dependencies_installed);
    assert!(host.mocks.installer.calls().is_empty());
    assert!(Path::new(&report.release_path)
        .join(".next/standalone/node_modules/next/package.json")
        .exists());

    let project = host.store.get_project("web").await.unwrap().unwrap();
    assert_eq!(project.entry_point.as_deref(), Some(STANDALONE_ENTRY_POINT));

    let plain = source_tree(&[
        ("package.json", r#"{"scripts":{"start":"node server.js"}}"#),
        ("server.js", "require('http')"),
    ]);
    let report = host
        .orchestrator
        .deploy("web", plain.path(), &DeployOptions::default())
        .await
        .unwrap();
    assert_eq!(report.build_type, "standard");
    assert!(report.dependencies_installed);

    let project = host.store.get_project("web").await.unwrap().unwrap();
    assert!(project.entry_point.is_none());
    assert_eq!(
        host.mocks.service.entry_points(),
        vec![
            ("web".to_string(), Some(STANDALONE_ENTRY_POINT.to_string())),
            ("web".to_string(), None),
        ]
    );
}

#[tokio::test]
async fn test_checkpoint_and_snapshot_are_attached() {
    let host = Host::new().await;
    host.add_project("shop", RuntimeKind::Python).await;
    host.mocks.database.set(true);
    host.mocks.env.set_snapshot("PORT=8000\nDEBUG=0\n");
    let src = source_tree(&[("requirements.txt", "fastapi\n"), ("main.py", "app = None\n")]);

    let report = host
        .orchestrator
        .deploy("shop", src.path(), &DeployOptions::default())
        .await
        .unwrap();
    assert_eq!(report.checkpoint_id.as_deref(), Some("cp-1"));

    let release = host
        .orchestrator
        .releases()
        .get_release("shop", &report.release)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(release.checkpoint_id.as_deref(), Some("cp-1"));
    assert_eq!(release.env_snapshot.as_deref(), Some("PORT=8000\nDEBUG=0\n"));
    assert_eq!(host.mocks.checkpoints.calls(), vec!["shop".to_string()]);
    assert_eq!(host.mocks.installer.calls(), vec![("shop".to_string(), RuntimeKind::Python)]);
}

#[tokio::test]
async fn test_best_effort_steps_degrade() {
    let host = Host::new().await;
    host.add_project("shop", RuntimeKind::Static).await;
    host.mocks.database.set(true);
    host.mocks.checkpoints.fail(true);
    host.mocks.env.fail(true);
    host.mocks.secrets.fail(true);
    let src = static_site();

    let opts = DeployOptions {
        inject_secrets: true,
        ..Default::default()
    };
    let report = host.orchestrator.deploy("shop", src.path(), &opts).await.unwrap();
    assert!(report.checkpoint_id.is_none());
    assert!(!report.env_snapshot_captured);
    assert_eq!(report.secrets_injected, 0);
    assert_eq!(report.warnings.len(), 3);

    let release = host.store.current_release("shop").await.unwrap().unwrap();
    assert!(release.checkpoint_id.is_none());
    assert!(release.env_snapshot.is_none());
}

#[tokio::test]
async fn test_secrets_are_counted() {
    let host = Host::new().await;
    host.add_project("shop", RuntimeKind::Static).await;
    let src = static_site();

    let opts = DeployOptions {
        inject_secrets: true,
        ..Default::default()
    };
    let report = host.orchestrator.deploy("shop", src.path(), &opts).await.unwrap();
    assert_eq!(report.secrets_injected, 2);
    assert!(report.warnings.is_empty());
}

#[tokio::test]
async fn test_install_failure_is_fatal_and_recorded() {
    let host = Host::new().await;
    host.add_project("api", RuntimeKind::Node).await;
    host.mocks.installer.fail(true);
    let src = source_tree(&[("package.json", "{}"), ("index.js", "")]);

    let err = host
        .orchestrator
        .deploy("api", src.path(), &DeployOptions::default())
        .await
        .unwrap_err();
    assert_eq!(err.kind, DeployErrorKind::InstallFailed);
    assert_eq!(host.mocks.service.restarts(), 0);

    let history = host.store.recent_attempts("api", 10).await.unwrap();
    assert!(!history[0].success);
    assert_eq!(history[0].files_synced, 2);
}

#[tokio::test]
async fn test_restart_failure_maps_to_service_start_failed() {
    let host = Host::new().await;
    host.add_project("site", RuntimeKind::Static).await;
    host.mocks.service.fail_restart(true);
    let src = static_site();

    let err = host
        .orchestrator
        .deploy("site", src.path(), &DeployOptions::default())
        .await
        .unwrap_err();
    assert_eq!(err.kind, DeployErrorKind::ServiceStartFailed);
    assert!(err.suggestion.unwrap().contains("journalctl -u hostkit-site"));
}

#[tokio::test]
async fn test_failed_validation_is_reported_not_raised() {
    let mut settings = fast_settings();
    settings.deploy.validation_timeout_secs = 5;
    let host = Host::with_settings(settings).await;
    host.add_project("api", RuntimeKind::Node).await;
    host.mocks.service.script_statuses(&[ServiceStatus::Activating, ServiceStatus::Failed]);
    host.mocks.service.set_logs("Error: Cannot find module 'express'\n    at Module._resolveFilename");
    let src = source_tree(&[("package.json", "{}"), ("index.js", "require('express')")]);

    let report = host
        .orchestrator
        .deploy("api", src.path(), &DeployOptions::default())
        .await
        .unwrap();
    assert!(!report.validation_passed());
    let validation = report.validation.unwrap();
    assert!(validation.hint.unwrap().contains("dependency"));

    // the release stays live
    let current = host.store.current_release("api").await.unwrap().unwrap();
    assert_eq!(current.release_name, report.release);
    assert!(host.store.recent_attempts("api", 1).await.unwrap()[0].success);
}

#[tokio::test]
async fn test_no_restart_skips_validation() {
    let host = Host::new().await;
    host.add_project("site", RuntimeKind::Static).await;
    let src = static_site();

    let opts = DeployOptions {
        restart: false,
        ..Default::default()
    };
    let report = host.orchestrator.deploy("site", src.path(), &opts).await.unwrap();
    assert!(!report.service_restarted);
    assert!(report.validation.is_none());
    assert!(host.mocks.service.calls().is_empty());
}

#[tokio::test]
async fn test_concurrent_deploy_is_rejected() {
    let host = Host::new().await;
    host.add_project("site", RuntimeKind::Static).await;
    let leases = LeaseManager::new(host.store.clone(), Duration::from_secs(60));
    let held = leases.acquire("site").await.unwrap();
    let src = static_site();

    let err = host
        .orchestrator
        .deploy("site", src.path(), &DeployOptions::default())
        .await
        .unwrap_err();
    assert_eq!(err.kind, DeployErrorKind::DeployInProgress);
    assert!(host.store.list_releases("site").await.unwrap().is_empty());

    leases.release(held).await;
    assert_ok!(host.orchestrator.deploy("site", src.path(), &DeployOptions::default()).await);
}

#[tokio::test]
async fn test_lease_is_released_after_failure() {
    let host = Host::new().await;
    host.add_project("site", RuntimeKind::Static).await;
    let missing = host.home.path().join("nowhere");

    assert_err!(host.orchestrator.deploy("site", &missing, &DeployOptions::default()).await);

    let src = static_site();
    assert_ok!(host.orchestrator.deploy("site", src.path(), &DeployOptions::default()).await);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_lease_outlasts_ttl_during_slow_build() {
    let mut settings = fast_settings();
    settings.deploy.lease_ttl_secs = 1;
    let host = Host::with_settings(settings).await;
    host.add_project("site", RuntimeKind::Static).await;
    let src = source_tree(&[
        ("package.json", r#"{"scripts":{"build":"vite build"}}"#),
        ("index.html", "<h1>hello</h1>"),
    ]);

    host.mocks.runner.handle("npm run build", |_| {
        std::thread::sleep(Duration::from_millis(2500));
        Ok(CommandOutput::default())
    });

    let contender = LeaseManager::new(host.store.clone(), Duration::from_secs(60));
    let contended = tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(1500)).await;
        contender.acquire("site").await.map(|_| ())
    });

    let opts = DeployOptions {
        build: true,
        ..Default::default()
    };
    let report = assert_ok!(host.orchestrator.deploy("site", src.path(), &opts).await);
    assert!(report.built);
    assert_eq!(report.build_steps, vec!["npm install", "npm run build"]);

    let err = contended.await.unwrap().unwrap_err();
    assert_eq!(err.kind, DeployErrorKind::DeployInProgress);
}

#[tokio::test]
async fn test_retention_prunes_oldest() {
    let mut settings = fast_settings();
    settings.deploy.release_retention = 2;
    let host = Host::with_settings(settings).await;
    host.add_project("site", RuntimeKind::Static).await;
    let src = static_site();

    let mut reports = Vec::new();
    for _ in 0..4 {
        reports.push(
            host.orchestrator
                .deploy("site", src.path(), &DeployOptions::default())
                .await
                .unwrap(),
        );
    }
    assert_eq!(reports[2].releases_pruned, 1);
    assert_eq!(reports[3].releases_pruned, 1);

    let releases = host.store.list_releases("site").await.unwrap();
    let names: Vec<_> = releases.iter().map(|r| r.release_name.clone()).collect();
    assert_eq!(names, vec![reports[3].release.clone(), reports[2].release.clone()]);

    let mut kept = names.clone();
    kept.sort();
    assert_eq!(host.release_dirs("site"), kept);
    assert!(!Path::new(&reports[0].release_path).exists());
}

#[tokio::test]
async fn test_legacy_layout_is_migrated_on_first_deploy() {
    let host = Host::new().await;
    host.add_project("old", RuntimeKind::Static).await;
    let legacy = host.layout.current_path("old");
    write(&legacy, "index.html", "<h1>legacy</h1>");

    let src = static_site();
    let report = host
        .orchestrator
        .deploy("old", src.path(), &DeployOptions::default())
        .await
        .unwrap();

    let releases = host.store.list_releases("old").await.unwrap();
    assert_eq!(releases.len(), 2);
    assert_eq!(releases[0].release_name, report.release);
    assert_eq!(releases[1].deployed_by, "migration");
    assert!(releases[1].activated_at.is_some());
    assert!(Path::new(&releases[1].release_path).join("index.html").exists());
    assert_eq!(host.current_target("old"), Path::new(&report.release_path));
}
