//! Deploy source resolution

use std::path::{Path, PathBuf};

use crate::deploy::git::GitRef;
use crate::errors::{DeployError, DeployErrorKind};

/// Where a git deploy pulls from; unset fields fall back to the project's
/// configured repository and branch
#[derive(Debug, Clone, Default)]
pub struct GitSource {
    pub repo_url: Option<String>,
    pub git_ref: Option<GitRef>,
}

/// Whether `raw` looks like a path on the operator's own machine rather
/// than on this server
pub fn looks_client_local(raw: &str) -> bool {
    let bytes = raw.as_bytes();
    let windows_drive = bytes.len() >= 2 && bytes[0].is_ascii_alphabetic() && bytes[1] == b':';
    raw.starts_with("/Users/")
        || raw.starts_with("/Volumes/")
        || raw.starts_with('~')
        || raw.contains('\\')
        || windows_drive
}

/// Check that `path` is an existing directory on this host
pub async fn validate_local_source(path: &Path) -> Result<PathBuf, DeployError> {
    let raw = path.to_string_lossy();

    let meta = match tokio::fs::metadata(path).await {
        Ok(meta) => meta,
        Err(_) if looks_client_local(&raw) => {
            return Err(DeployError::new(
                DeployErrorKind::SourceNotFound,
                format!("{raw} does not exist on this server; it looks like a path on your own machine"),
            )
            .with_suggestion(
                "upload the code first (e.g. `rsync -a ./ server:/tmp/app/`) and deploy that path, \
                 or use `hostkit deploy-git`",
            ));
        }
        Err(e) => {
            return Err(DeployError::new(
                DeployErrorKind::SourceNotFound,
                format!("{raw} is not accessible: {e}"),
            )
            .with_suggestion("check the path exists on the server and is readable"));
        }
    };

    if !meta.is_dir() {
        return Err(DeployError::new(
            DeployErrorKind::SourceNotDirectory,
            format!("{raw} is not a directory"),
        )
        .with_suggestion("pass the directory that contains the app, not a single file"));
    }

    tokio::fs::canonicalize(path).await.map_err(|e| {
        DeployError::new(DeployErrorKind::SourceNotFound, format!("{raw} cannot be resolved: {e}"))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_local_heuristics() {
        assert!(looks_client_local("/Users/sam/code/app"));
        assert!(looks_client_local("~/code/app"));
        assert!(looks_client_local("C:\\code\\app"));
        assert!(looks_client_local("D:/code/app"));
        assert!(!looks_client_local("/srv/uploads/app"));
        assert!(!looks_client_local("/tmp/app"));
    }

    #[tokio::test]
    async fn test_validate_local_source_kinds() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("index.html");
        std::fs::write(&file, "x").unwrap();

        assert!(validate_local_source(dir.path()).await.is_ok());

        let err = validate_local_source(&file).await.unwrap_err();
        assert_eq!(err.kind, DeployErrorKind::SourceNotDirectory);

        let err = validate_local_source(Path::new("/Users/sam/app")).await.unwrap_err();
        assert_eq!(err.kind, DeployErrorKind::SourceNotFound);
        assert!(err.suggestion.unwrap().contains("deploy-git"));

        let err = validate_local_source(&dir.path().join("missing")).await.unwrap_err();
        assert_eq!(err.kind, DeployErrorKind::SourceNotFound);
    }
}
