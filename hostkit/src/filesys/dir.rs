//! Directory operations

use std::path::{Component, Path, PathBuf};

use tokio::fs;
use walkdir::WalkDir;

use crate::errors::HostkitError;

/// Directory names never copied into a release
const EXCLUDED_DIRS: &[&str] = &[
    ".git",
    ".hg",
    ".svn",
    "__pycache__",
    ".pytest_cache",
    ".venv",
    "venv",
    ".cache",
    ".turbo",
];

/// File names never copied into a release
const EXCLUDED_FILES: &[&str] = &[".DS_Store", "Thumbs.db", ".env"];

/// File extensions never copied into a release (key material)
const EXCLUDED_EXTENSIONS: &[&str] = &["pem", "key", "p12", "pfx"];

/// Whether `rel` (relative to the sync root) is left out of a release.
///
/// `node_modules` is a dependency cache everywhere except inside a
/// standalone bundle, which must carry its own tree.
pub fn is_sync_excluded(rel: &Path) -> bool {
    let names: Vec<&str> = rel
        .components()
        .filter_map(|c| match c {
            Component::Normal(s) => s.to_str(),
            _ => None,
        })
        .collect();

    let in_standalone = names.len() >= 2 && names[0] == ".next" && names[1] == "standalone";

    for (i, name) in names.iter().enumerate() {
        if EXCLUDED_DIRS.contains(name) {
            return true;
        }
        if *name == "node_modules" && !in_standalone {
            return true;
        }
        if i == 1 && names[0] == ".next" && *name == "cache" {
            return true;
        }
    }

    if let Some(file_name) = names.last() {
        if EXCLUDED_FILES.contains(file_name) {
            return true;
        }
        if file_name.starts_with(".env.") && !file_name.ends_with(".example") {
            return true;
        }
        if let Some(ext) = Path::new(file_name).extension().and_then(|e| e.to_str()) {
            if EXCLUDED_EXTENSIONS.contains(&ext) {
                return true;
            }
        }
    }

    false
}

/// A directory wrapper with path
#[derive(Debug, Clone)]
pub struct Dir {
    path: PathBuf,
}

impl Dir {
    /// Create a new directory reference
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Get the directory path
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Check if the directory exists
    pub async fn exists(&self) -> bool {
        fs::metadata(&self.path)
            .await
            .map(|m| m.is_dir())
            .unwrap_or(false)
    }

    /// Create the directory (and parents)
    pub async fn create(&self) -> Result<(), HostkitError> {
        fs::create_dir_all(&self.path).await?;
        Ok(())
    }

    /// Delete the directory and all contents
    pub async fn delete(&self) -> Result<(), HostkitError> {
        if self.exists().await {
            fs::remove_dir_all(&self.path).await?;
        }
        Ok(())
    }

    /// Get a file within this directory
    pub fn file(&self, name: &str) -> crate::filesys::file::File {
        crate::filesys::file::File::new(self.path.join(name))
    }

    /// Get a subdirectory
    pub fn subdir(&self, name: &str) -> Dir {
        Dir::new(self.path.join(name))
    }

    /// Create an ephemeral directory under this one, removed when dropped
    pub async fn temp_dir(&self, prefix: &str) -> Result<tempfile::TempDir, HostkitError> {
        self.create().await?;
        let dir = tempfile::Builder::new()
            .prefix(prefix)
            .tempdir_in(&self.path)?;
        Ok(dir)
    }

    /// Recursively copy everything under this directory into `dest`.
    ///
    /// Entries for which `exclude` returns true (given the path relative to
    /// this directory) are skipped along with their children. Symlinks are
    /// recreated, not followed. Returns the number of files written.
    pub async fn copy_into(
        &self,
        dest: &Path,
        exclude: fn(&Path) -> bool,
    ) -> Result<u64, HostkitError> {
        let src = self.path.clone();
        let dest = dest.to_path_buf();
        tokio::task::spawn_blocking(move || copy_tree(&src, &dest, exclude))
            .await
            .map_err(|e| HostkitError::Internal(format!("copy task failed: {e}")))?
    }
}

fn copy_tree(src: &Path, dest: &Path, exclude: fn(&Path) -> bool) -> Result<u64, HostkitError> {
    std::fs::create_dir_all(dest)?;
    let mut copied = 0u64;

    let walker = WalkDir::new(src)
        .follow_links(false)
        .min_depth(1)
        .into_iter()
        .filter_entry(|entry| {
            entry
                .path()
                .strip_prefix(src)
                .map(|rel| !exclude(rel))
                .unwrap_or(false)
        });

    for entry in walker {
        let entry = entry.map_err(|e| HostkitError::IoError(e.into()))?;
        let rel = entry
            .path()
            .strip_prefix(src)
            .map_err(|e| HostkitError::Internal(e.to_string()))?;
        let target = dest.join(rel);
        let file_type = entry.file_type();

        if file_type.is_dir() {
            std::fs::create_dir_all(&target)?;
        } else if file_type.is_symlink() {
            let link = std::fs::read_link(entry.path())?;
            if let Some(parent) = target.parent() {
                std::fs::create_dir_all(parent)?;
            }
            copy_symlink(&link, &target)?;
            copied += 1;
        } else {
            if let Some(parent) = target.parent() {
                std::fs::create_dir_all(parent)?;
            }
            std::fs::copy(entry.path(), &target)?;
            copied += 1;
        }
    }

    Ok(copied)
}

#[cfg(unix)]
fn copy_symlink(link: &Path, target: &Path) -> std::io::Result<()> {
    std::os::unix::fs::symlink(link, target)
}

#[cfg(not(unix))]
fn copy_symlink(link: &Path, target: &Path) -> std::io::Result<()> {
    std::fs::copy(link, target).map(|_| ())
}
