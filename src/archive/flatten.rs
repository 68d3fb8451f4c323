// src/archive/flatten.rs

use crate::error::{Error, Result};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Hoist the contents of lone wrapper directories into `dir`
///
/// A wrapper is the only entry of `dir` and a real directory (symlinks are
/// not followed). Hoisting repeats until `dir` no longer holds a wrapper, so
/// a second call never moves anything. Returns whether anything moved.
pub fn flatten(dir: &Path) -> Result<bool> {
    let mut moved = false;
    while hoist_once(dir)? {
        moved = true;
    }
    Ok(moved)
}

fn hoist_once(dir: &Path) -> Result<bool> {
    let mut entries = fs::read_dir(dir)
        .map_err(|e| Error::IoError(format!("Failed to read {}: {}", dir.display(), e)))?;

    let Some(only) = entries.next().transpose()? else {
        return Ok(false);
    };
    if entries.next().is_some() || !only.file_type()?.is_dir() {
        return Ok(false);
    }

    // Move the wrapper aside first: it may contain an entry with its own name
    let wrapper = unique_sibling(dir)?;
    fs::rename(only.path(), &wrapper)?;

    for child in fs::read_dir(&wrapper)? {
        let child = child?;
        let target = dir.join(child.file_name());
        fs::rename(child.path(), &target).map_err(|e| {
            Error::IoError(format!(
                "Failed to move {} to {}: {}",
                child.path().display(),
                target.display(),
                e
            ))
        })?;
    }
    fs::remove_dir(&wrapper)?;

    debug!(
        "Flattened wrapper {:?} in {}",
        only.file_name(),
        dir.display()
    );
    Ok(true)
}

fn unique_sibling(dir: &Path) -> Result<PathBuf> {
    (0..u32::MAX)
        .map(|n| dir.join(format!(".flatten-{}", n)))
        .find(|candidate| !candidate.exists())
        .ok_or_else(|| Error::IoError(format!("No free name in {}", dir.display())))
}
