//! Symlink pointer operations

use std::path::{Path, PathBuf};

use tokio::fs;

use crate::errors::HostkitError;

/// What currently sits at a pointer path
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PointerState {
    Missing,
    /// A symlink and the path it points to
    Link(PathBuf),
    /// A real directory (legacy layout)
    Directory,
    /// Something else, e.g. a plain file
    Other,
}

/// Inspect `path` without following it
pub async fn pointer_state(path: &Path) -> Result<PointerState, HostkitError> {
    let meta = match fs::symlink_metadata(path).await {
        Ok(meta) => meta,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(PointerState::Missing),
        Err(e) => return Err(e.into()),
    };

    if meta.file_type().is_symlink() {
        Ok(PointerState::Link(fs::read_link(path).await?))
    } else if meta.is_dir() {
        Ok(PointerState::Directory)
    } else {
        Ok(PointerState::Other)
    }
}

/// Atomically repoint the symlink at `link` to `target`.
///
/// A new link is created beside `link` and renamed over it, so readers see
/// either the old target or the new one.
pub async fn swap_symlink(link: &Path, target: &Path) -> Result<(), HostkitError> {
    let file_name = link
        .file_name()
        .and_then(|n| n.to_str())
        .ok_or_else(|| HostkitError::Internal(format!("invalid pointer path {}", link.display())))?;
    let staging = link.with_file_name(format!(".{}.swap-{}", file_name, uuid::Uuid::new_v4()));

    create_symlink(target, &staging).await?;
    if let Err(e) = fs::rename(&staging, link).await {
        let _ = fs::remove_file(&staging).await;
        return Err(e.into());
    }
    Ok(())
}

/// Remove the symlink at `link` if present
pub async fn remove_symlink(link: &Path) -> Result<(), HostkitError> {
    if let PointerState::Link(_) = pointer_state(link).await? {
        fs::remove_file(link).await?;
    }
    Ok(())
}

#[cfg(unix)]
async fn create_symlink(target: &Path, link: &Path) -> Result<(), HostkitError> {
    fs::symlink(target, link).await?;
    Ok(())
}

#[cfg(not(unix))]
async fn create_symlink(_target: &Path, link: &Path) -> Result<(), HostkitError> {
    Err(HostkitError::ConfigError(format!(
        "symlink pointers are only supported on unix hosts ({})",
        link.display()
    )))
}
