//! Request-owned temporary storage.
//!
//! Every download gets its own directory under the staging root. The fetcher
//! writes into it (including any `.part` files the tool leaves behind) and the
//! whole directory is removed when the [`StagingDir`] is dropped, whichever way
//! the request ends.

use std::io;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};
use tempfile::TempDir;
use tracing::{debug, info, warn};

/// Name prefix of every staging directory, used to recognise orphans.
pub const STAGING_PREFIX: &str = "grabby-";

#[derive(Debug)]
pub struct StagingDir {
    dir: Option<TempDir>,
    path: PathBuf,
}

impl StagingDir {
    pub fn create(root: &Path) -> io::Result<Self> {
        std::fs::create_dir_all(root)?;
        let dir = tempfile::Builder::new()
            .prefix(STAGING_PREFIX)
            .tempdir_in(root)?;
        let path = dir.path().to_path_buf();
        debug!("Created staging directory {}", path.display());
        Ok(Self {
            dir: Some(dir),
            path,
        })
    }

    #[cfg(test)]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// A fresh, collision-free file path inside this directory.
    pub fn file_path(&self, extension: &str) -> PathBuf {
        self.path
            .join(format!("{}.{}", uuid::Uuid::new_v4(), extension))
    }

    pub fn contains(&self, path: &Path) -> bool {
        path.parent() == Some(self.path.as_path())
    }
}

impl Drop for StagingDir {
    fn drop(&mut self) {
        let Some(dir) = self.dir.take() else {
            return;
        };
        match dir.close() {
            Ok(()) => debug!("Removed staging directory {}", self.path.display()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                debug!("Staging directory {} already gone", self.path.display())
            }
            Err(e) => warn!(
                "Failed to remove staging directory {}: {}",
                self.path.display(),
                e
            ),
        }
    }
}

/// Remove staging directories left behind by a previous process.
///
/// Only directories carrying [`STAGING_PREFIX`] and last modified more than
/// `max_age` ago are touched. Returns how many were removed.
pub fn sweep_stale(root: &Path, max_age: Duration) -> io::Result<usize> {
    let entries = match std::fs::read_dir(root) {
        Ok(entries) => entries,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(0),
        Err(e) => return Err(e),
    };

    let now = SystemTime::now();
    let mut removed = 0;

    for entry in entries {
        let entry = entry?;
        let name = entry.file_name();
        if !name.to_string_lossy().starts_with(STAGING_PREFIX) {
            continue;
        }

        let metadata = entry.metadata()?;
        if !metadata.is_dir() {
            continue;
        }

        let age = metadata
            .modified()
            .ok()
            .and_then(|modified| now.duration_since(modified).ok())
            .unwrap_or_default();
        if age < max_age {
            continue;
        }

        match std::fs::remove_dir_all(entry.path()) {
            Ok(()) => {
                info!("Removed stale staging directory {}", entry.path().display());
                removed += 1;
            }
            Err(e) => warn!(
                "Failed to remove stale staging directory {}: {}",
                entry.path().display(),
                e
            ),
        }
    }

    Ok(removed)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_staging_dir_removed_on_drop() {
        let root = tempfile::tempdir().unwrap();
        let staging = StagingDir::create(root.path()).unwrap();
        let file = staging.file_path("mp4");
        std::fs::write(&file, b"media").unwrap();
        std::fs::write(file.with_extension("mp4.part"), b"partial").unwrap();

        let path = staging.path().to_path_buf();
        assert!(path.exists());
        drop(staging);
        assert!(!path.exists());
        assert_eq!(std::fs::read_dir(root.path()).unwrap().count(), 0);
    }

    #[test]
    fn test_staging_dirs_are_unique() {
        let root = tempfile::tempdir().unwrap();
        let a = StagingDir::create(root.path()).unwrap();
        let b = StagingDir::create(root.path()).unwrap();
        assert_ne!(a.path(), b.path());
        assert_ne!(a.file_path("mp4"), a.file_path("mp4"));
        assert!(a
            .path()
            .file_name()
            .unwrap()
            .to_string_lossy()
            .starts_with(STAGING_PREFIX));
    }

    #[test]
    fn test_drop_tolerates_external_removal() {
        let root = tempfile::tempdir().unwrap();
        let staging = StagingDir::create(root.path()).unwrap();
        std::fs::remove_dir_all(staging.path()).unwrap();
        drop(staging);
    }

    #[test]
    fn test_contains() {
        let root = tempfile::tempdir().unwrap();
        let staging = StagingDir::create(root.path()).unwrap();
        assert!(staging.contains(&staging.file_path("mp4")));
        assert!(!staging.contains(&root.path().join("other.mp4")));
        assert!(!staging.contains(Path::new("/etc/passwd")));
    }

    #[test]
    fn test_sweep_stale_only_touches_old_prefixed_dirs() {
        let root = tempfile::tempdir().unwrap();
        let orphan = root.path().join(format!("{}orphan", STAGING_PREFIX));
        let unrelated = root.path().join("someone-else");
        std::fs::create_dir(&orphan).unwrap();
        std::fs::create_dir(&unrelated).unwrap();
        std::fs::write(orphan.join("abc.mp4"), b"media").unwrap();

        // Fresh directories survive a sweep with a long max age
        assert_eq!(sweep_stale(root.path(), Duration::from_secs(3600)).unwrap(), 0);
        assert!(orphan.exists());

        assert_eq!(sweep_stale(root.path(), Duration::ZERO).unwrap(), 1);
        assert!(!orphan.exists());
        assert!(unrelated.exists());
    }

    #[test]
    fn test_sweep_missing_root() {
        let root = tempfile::tempdir().unwrap();
        let missing = root.path().join("missing");
        assert_eq!(sweep_stale(&missing, Duration::ZERO).unwrap(), 0);
    }
}
