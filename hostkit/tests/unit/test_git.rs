//! Git deploy tests

use hostkit::deploy::git::GitRef;
use hostkit::deploy::{DeployOptions, GitSource};
use hostkit::errors::DeployErrorKind;
use hostkit::ledger::RuntimeKind;
use hostkit_api::SourceType;

use crate::helpers::Host;

const REPO: &str = "https://git.example.com/acme/site.git";

#[tokio::test]
async fn test_git_deploy_uses_project_defaults() {
    let host = Host::new().await;
    host.add_project("site", RuntimeKind::Static).await;
    host.store.set_project_git("site", Some(REPO), Some("main")).await.unwrap();

    let report = host
        .orchestrator
        .deploy_from_git("site", &GitSource::default(), &DeployOptions::default())
        .await
        .unwrap();
    assert_eq!(report.source_type, SourceType::Git);
    assert_eq!(report.build_type, "static");

    assert_eq!(
        host.mocks.git.calls(),
        vec![(REPO.to_string(), Some(GitRef::Branch("main".to_string())))]
    );

    let git = report.git.unwrap();
    assert_eq!(git.repo, REPO);
    assert_eq!(git.commit.as_deref(), Some(host.mocks.git.commit()));

    let release = host.store.current_release("site").await.unwrap().unwrap();
    assert_eq!(release.git_repo.as_deref(), Some(REPO));
    assert_eq!(release.git_commit.as_deref(), Some(host.mocks.git.commit()));

    let history = host.store.recent_attempts("site", 1).await.unwrap();
    assert_eq!(history[0].source_type, "git");

    // the clone directory is gone
    let leftovers = std::fs::read_dir(host.layout.tmp_dir().path()).unwrap().count();
    assert_eq!(leftovers, 0);
}

#[tokio::test]
async fn test_explicit_ref_wins() {
    let host = Host::new().await;
    host.add_project("site", RuntimeKind::Static).await;
    host.store.set_project_git("site", Some(REPO), Some("main")).await.unwrap();

    let source = GitSource {
        repo_url: Some("https://git.example.com/acme/fork.git".to_string()),
        git_ref: Some(GitRef::Tag("v1.4.0".to_string())),
    };
    host.orchestrator
        .deploy_from_git("site", &source, &DeployOptions::default())
        .await
        .unwrap();

    let calls = host.mocks.git.calls();
    assert_eq!(calls[0].0, "https://git.example.com/acme/fork.git");
    assert_eq!(calls[0].1, Some(GitRef::Tag("v1.4.0".to_string())));
}

#[tokio::test]
async fn test_missing_repository_is_reported() {
    let host = Host::new().await;
    host.add_project("site", RuntimeKind::Static).await;

    let err = host
        .orchestrator
        .deploy_from_git("site", &GitSource::default(), &DeployOptions::default())
        .await
        .unwrap_err();
    assert_eq!(err.kind, DeployErrorKind::GitCloneFailed);
    assert!(err.suggestion.unwrap().contains("--repo"));
    assert!(host.mocks.git.calls().is_empty());
}

#[tokio::test]
async fn test_clone_failure_cleans_up_and_records() {
    let host = Host::new().await;
    host.add_project("site", RuntimeKind::Static).await;
    host.mocks.git.fail(true);

    let source = GitSource {
        repo_url: Some(REPO.to_string()),
        git_ref: None,
    };
    let err = host
        .orchestrator
        .deploy_from_git("site", &source, &DeployOptions::default())
        .await
        .unwrap_err();
    assert_eq!(err.kind, DeployErrorKind::GitCloneFailed);
    assert!(err.kind.is_retryable());

    let leftovers = std::fs::read_dir(host.layout.tmp_dir().path()).unwrap().count();
    assert_eq!(leftovers, 0);

    let history = host.store.recent_attempts("site", 1).await.unwrap();
    assert!(!history[0].success);
    assert_eq!(history[0].source_type, "git");
    assert!(host.store.list_releases("site").await.unwrap().is_empty());
}
