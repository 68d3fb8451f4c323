// src/archive/tarball.rs

use super::EntryCallback;
use crate::error::{Error, Result};
use std::io::Read;
use std::path::Path;
use tar::Archive;
use tracing::debug;

/// Unpack a (decoded) tar stream into `dest`
///
/// Entries whose path would land outside `dest` are rejected.
pub(super) fn unpack<R: Read>(reader: R, dest: &Path, progress: EntryCallback<'_>) -> Result<usize> {
    let mut archive = Archive::new(reader);
    archive.set_preserve_permissions(true);
    archive.set_overwrite(true);

    let mut count = 0;
    let entries = archive
        .entries()
        .map_err(|e| Error::IoError(format!("Failed to read tar archive: {}", e)))?;

    for entry in entries {
        let mut entry =
            entry.map_err(|e| Error::IoError(format!("Failed to read tar entry: {}", e)))?;
        let path = entry
            .path()
            .map_err(|e| Error::IoError(format!("Failed to get entry path: {}", e)))?
            .into_owned();

        if !progress(&path) {
            return Err(Error::Cancelled);
        }

        let unpacked = entry.unpack_in(dest).map_err(|e| {
            Error::IoError(format!("Failed to unpack {}: {}", path.display(), e))
        })?;
        if !unpacked {
            return Err(Error::malformed(
                "archive entry",
                format!("{} escapes the destination", path.display()),
            ));
        }
        count += 1;
    }

    debug!("Unpacked {} tar entries into {}", count, dest.display());
    Ok(count)
}
