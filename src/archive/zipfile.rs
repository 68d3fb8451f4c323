// src/archive/zipfile.rs

use super::EntryCallback;
use crate::error::{Error, Result};
use std::fs::{self, File};
use std::io::{self, BufReader, Read, Seek, SeekFrom};
use std::path::Path;
use tracing::debug;
use zip::ZipArchive;

/// A reader whose position 0 is `base` bytes into the inner reader
///
/// Lets the zip reader see an appended archive as if it started the file.
pub struct OffsetReader<R> {
    inner: R,
    base: u64,
}

impl<R: Seek> OffsetReader<R> {
    pub fn new(mut inner: R, base: u64) -> io::Result<Self> {
        inner.seek(SeekFrom::Start(base))?;
        Ok(Self { inner, base })
    }
}

impl<R: Read> Read for OffsetReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.inner.read(buf)
    }
}

impl<R: Seek> Seek for OffsetReader<R> {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        let absolute = match pos {
            SeekFrom::Start(n) => self.inner.seek(SeekFrom::Start(self.base + n))?,
            other => self.inner.seek(other)?,
        };
        if absolute < self.base {
            self.inner.seek(SeekFrom::Start(self.base))?;
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "seek before the start of the archive",
            ));
        }
        Ok(absolute - self.base)
    }
}

pub(super) fn unpack(path: &Path, base_offset: u64, dest: &Path, progress: EntryCallback<'_>) -> Result<usize> {
    let file = File::open(path)?;
    let reader = OffsetReader::new(BufReader::new(file), base_offset)?;
    let mut archive = ZipArchive::new(reader).map_err(|e| {
        Error::malformed(format!("zip archive {}", path.display()), e.to_string())
    })?;

    let mut count = 0;
    for i in 0..archive.len() {
        let mut entry = archive.by_index(i).map_err(|e| {
            Error::malformed(format!("zip archive {}", path.display()), e.to_string())
        })?;

        let relative = entry.enclosed_name().map(|p| p.to_path_buf()).ok_or_else(|| {
            Error::malformed(
                "archive entry",
                format!("{} escapes the destination", entry.name()),
            )
        })?;

        if !progress(&relative) {
            return Err(Error::Cancelled);
        }

        let target = dest.join(&relative);
        if entry.is_dir() {
            fs::create_dir_all(&target)?;
            count += 1;
            continue;
        }

        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent)?;
        }
        let mut out = File::create(&target).map_err(|e| {
            Error::IoError(format!("Failed to create file {}: {}", target.display(), e))
        })?;
        io::copy(&mut entry, &mut out)?;

        #[cfg(unix)]
        if let Some(mode) = entry.unix_mode() {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(&target, fs::Permissions::from_mode(mode & 0o777))?;
        }

        count += 1;
    }

    debug!("Unpacked {} zip entries into {}", count, dest.display());
    Ok(count)
}
