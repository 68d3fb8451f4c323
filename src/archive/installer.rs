// src/archive/installer.rs

//! Installer packages and bare executables
//!
//! Debian packages are ar containers; only the `data.tar.*` member is
//! unpacked. MSI databases are handed to the platform's extraction tool.

use super::{Compression, EntryCallback, tarball};
use crate::error::{Error, Result};
use crate::process::{ProcessRunner, argv, run_checked};
use std::fs::{self, File};
use std::io::{BufRead, BufReader};
use std::path::Path;
use tracing::debug;

const DATA_MEMBER_PREFIX: &str = "data.tar";

pub(super) fn unpack_deb(path: &Path, dest: &Path, progress: EntryCallback<'_>) -> Result<usize> {
    let file = File::open(path)?;
    let mut archive = ar::Archive::new(file);

    while let Some(entry) = archive.next_entry() {
        let entry = entry.map_err(|e| {
            Error::malformed(format!("deb package {}", path.display()), format!("bad ar entry: {}", e))
        })?;

        let member = String::from_utf8_lossy(entry.header().identifier()).to_string();
        if !member.starts_with(DATA_MEMBER_PREFIX) {
            debug!("Skipping deb member {}", member);
            continue;
        }

        let mut reader = BufReader::new(entry);
        let head = reader.fill_buf()?;
        let compression = Compression::from_magic(head).unwrap_or(Compression::None);
        debug!("Unpacking {} ({:?})", member, compression);
        return tarball::unpack(compression.decoder(reader)?, dest, progress);
    }

    Err(Error::malformed(
        format!("deb package {}", path.display()),
        "no data.tar member",
    ))
}

pub(super) fn unpack_msi(
    runner: &dyn ProcessRunner,
    path: &Path,
    dest: &Path,
    progress: EntryCallback<'_>,
) -> Result<usize> {
    if !progress(path) {
        return Err(Error::Cancelled);
    }

    let file = path.to_string_lossy();
    let target = dest.to_string_lossy();
    let command = if cfg!(windows) {
        argv([
            "msiexec".to_string(),
            "/a".to_string(),
            file.into_owned(),
            "/qn".to_string(),
            format!("TARGETDIR={}", target),
        ])
    } else {
        argv([
            "msiextract".to_string(),
            "-C".to_string(),
            target.into_owned(),
            file.into_owned(),
        ])
    };

    run_checked(runner, &command, None)?;
    Ok(0)
}

pub(super) fn copy_executable(path: &Path, dest: &Path, progress: EntryCallback<'_>) -> Result<usize> {
    let name = path
        .file_name()
        .ok_or_else(|| Error::IoError(format!("{} has no file name", path.display())))?;
    if !progress(Path::new(name)) {
        return Err(Error::Cancelled);
    }

    let target = dest.join(name);
    fs::copy(path, &target).map_err(|e| {
        Error::IoError(format!(
            "Failed to copy {} to {}: {}",
            path.display(),
            target.display(),
            e
        ))
    })?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(&target, fs::Permissions::from_mode(0o755))?;
    }

    Ok(1)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn deb_bytes() -> Vec<u8> {
        let mut data = tar::Builder::new(Vec::new());
        let content = b"#!/bin/sh\n";
        let mut header = tar::Header::new_gnu();
        header.set_size(content.len() as u64);
        header.set_mode(0o755);
        header.set_cksum();
        data.append_data(&mut header, "usr/bin/hello", &content[..]).unwrap();
        let data = data.into_inner().unwrap();

        let mut out = Vec::new();
        {
            let mut builder = ar::Builder::new(&mut out);
            let control = b"2.0\n";
            builder
                .append(&ar::Header::new(b"debian-binary".to_vec(), control.len() as u64), &control[..])
                .unwrap();
            builder
                .append(&ar::Header::new(b"data.tar".to_vec(), data.len() as u64), &data[..])
                .unwrap();
        }
        out
    }

    #[test]
    fn test_unpack_deb_data_member() {
        let dir = tempdir().unwrap();
        let deb = dir.path().join("hello.deb");
        fs::write(&deb, deb_bytes()).unwrap();

        let dest = dir.path().join("out");
        fs::create_dir_all(&dest).unwrap();
        let count = unpack_deb(&deb, &dest, &mut |_| true).unwrap();
        assert_eq!(count, 1);
        assert!(dest.join("usr/bin/hello").is_file());
    }

    #[test]
    fn test_copy_executable() {
        let dir = tempdir().unwrap();
        let exe = dir.path().join("tool");
        fs::write(&exe, b"binary").unwrap();
        let dest = dir.path().join("out");
        fs::create_dir_all(&dest).unwrap();

        assert_eq!(copy_executable(&exe, &dest, &mut |_| true).unwrap(), 1);
        assert_eq!(fs::read(dest.join("tool")).unwrap(), b"binary");
    }
}
