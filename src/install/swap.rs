// src/install/swap.rs

//! Atomic directory replacement with rollback

use crate::error::{Error, Result};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// The aside path of a live directory
pub fn old_path(live: &Path) -> PathBuf {
    let mut name = live.file_name().map(|n| n.to_os_string()).unwrap_or_default();
    name.push(".old");
    live.with_file_name(name)
}

/// Replace `live` with `staged` using plain renames
pub fn swap_into_place(staged: &Path, live: &Path) -> Result<Vec<String>> {
    swap_with(staged, live, |from, to| fs::rename(from, to))
}

/// Replace `live` with `staged`
///
/// An existing `live` is renamed to `<live>.old` first; if moving `staged`
/// into place then fails, `.old` is renamed back so `live` is never left
/// missing. A leftover `.old` from an interrupted run is restored when
/// `live` is absent and discarded otherwise. Failing to delete `.old` after
/// a successful swap is returned as a warning.
pub fn swap_with<F>(staged: &Path, live: &Path, mut rename: F) -> Result<Vec<String>>
where
    F: FnMut(&Path, &Path) -> io::Result<()>,
{
    let old = old_path(live);
    let mut warnings = Vec::new();

    if old.exists() {
        if live.exists() {
            debug!("Removing stale {}", old.display());
            fs::remove_dir_all(&old)?;
        } else {
            warn!("Restoring {} left by an interrupted swap", old.display());
            rename(&old, live)?;
        }
    }

    let had_previous = live.exists();
    if had_previous {
        rename(live, &old).map_err(|e| {
            Error::IoError(format!(
                "Failed to move {} aside: {}",
                live.display(),
                e
            ))
        })?;
    }

    if let Err(e) = rename(staged, live) {
        if had_previous {
            if let Err(restore) = rename(&old, live) {
                return Err(Error::IoError(format!(
                    "Failed to move {} into place ({}) and to restore {} ({})",
                    staged.display(),
                    e,
                    old.display(),
                    restore
                )));
            }
        }
        return Err(Error::IoError(format!(
            "Failed to move {} into place: {}",
            staged.display(),
            e
        )));
    }

    if had_previous {
        if let Err(e) = fs::remove_dir_all(&old) {
            let message = format!("Could not remove {}: {}", old.display(), e);
            warn!("{}", message);
            warnings.push(message);
        }
    }

    Ok(warnings)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn populated(dir: &Path, marker: &str) {
        fs::create_dir_all(dir).unwrap();
        fs::write(dir.join("marker"), marker).unwrap();
    }

    #[test]
    fn test_old_path() {
        assert_eq!(old_path(Path::new("/r/pkgs/go")), PathBuf::from("/r/pkgs/go.old"));
    }

    #[test]
    fn test_fresh_swap() {
        let dir = tempdir().unwrap();
        let staged = dir.path().join(".go-stage");
        let live = dir.path().join("go");
        populated(&staged, "new");

        assert!(swap_into_place(&staged, &live).unwrap().is_empty());
        assert_eq!(fs::read_to_string(live.join("marker")).unwrap(), "new");
        assert!(!staged.exists());
    }

    #[test]
    fn test_replace_existing() {
        let dir = tempdir().unwrap();
        let staged = dir.path().join(".go-stage");
        let live = dir.path().join("go");
        populated(&staged, "new");
        populated(&live, "old");

        swap_into_place(&staged, &live).unwrap();
        assert_eq!(fs::read_to_string(live.join("marker")).unwrap(), "new");
        assert!(!old_path(&live).exists());
    }

    #[test]
    fn test_failed_swap_restores_previous() {
        let dir = tempdir().unwrap();
        let staged = dir.path().join(".go-stage");
        let live = dir.path().join("go");
        populated(&staged, "new");
        populated(&live, "old");

        let result = swap_with(&staged, &live, |from, to| {
            if from == staged.as_path() {
                Err(io::Error::other("disk full"))
            } else {
                fs::rename(from, to)
            }
        });

        assert!(result.is_err());
        assert_eq!(fs::read_to_string(live.join("marker")).unwrap(), "old");
        assert!(!old_path(&live).exists());
        assert!(staged.exists());
    }

    #[test]
    fn test_interrupted_swap_is_recovered() {
        let dir = tempdir().unwrap();
        let staged = dir.path().join(".go-stage");
        let live = dir.path().join("go");
        populated(&staged, "new");
        populated(&old_path(&live), "old");

        swap_into_place(&staged, &live).unwrap();
        assert_eq!(fs::read_to_string(live.join("marker")).unwrap(), "new");
        assert!(!old_path(&live).exists());
    }
}
