// src/install/launcher.rs

//! Symlinks and launcher shims in `links/`
//!
//! `links` entries become symlinks pointing into the package directory.
//! `launchers` entries become small scripts carrying a marker line naming
//! the owning package, so they can be found again on removal.

use crate::error::{Error, Result};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

const MARKER: &str = "haul-launcher:";

/// Split `relative/path[@alias]` into the target path and link name
pub fn parse_entry(entry: &str) -> Result<(PathBuf, String)> {
    let (path, alias) = match entry.rsplit_once('@') {
        Some((path, alias)) if !alias.is_empty() => (path, Some(alias)),
        _ => (entry, None),
    };

    let path = PathBuf::from(path.trim());
    if path.as_os_str().is_empty() || path.is_absolute() {
        return Err(Error::malformed(
            "link entry",
            format!("'{}' is not a relative path", entry),
        ));
    }

    let name = match alias {
        Some(alias) => alias.trim().to_string(),
        None => path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .ok_or_else(|| Error::malformed("link entry", format!("'{}' has no file name", entry)))?,
    };
    Ok((path, name))
}

/// Remove everything in `links_dir` belonging to `package`
///
/// Returns the number of entries removed.
pub fn remove_links(links_dir: &Path, package: &str, pkg_root: &Path) -> Result<usize> {
    let entries = match fs::read_dir(links_dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(0),
        Err(e) => return Err(e.into()),
    };

    let mut removed = 0;
    for entry in entries {
        let entry = entry?;
        let path = entry.path();
        let file_type = entry.file_type()?;

        let owned = if file_type.is_symlink() {
            fs::read_link(&path)
                .map(|target| target.starts_with(pkg_root))
                .unwrap_or(false)
        } else if file_type.is_file() {
            is_launcher_for(&path, package)
        } else {
            false
        };

        if owned {
            fs::remove_file(&path)?;
            debug!("Removed {}", path.display());
            removed += 1;
        }
    }
    Ok(removed)
}

/// Regenerate links and launchers for a package
///
/// Existing entries for the package are removed first, so repeating this is
/// safe. Returns the created paths.
pub fn relink(
    links_dir: &Path,
    package: &str,
    pkg_root: &Path,
    links: &[String],
    launchers: &[String],
) -> Result<Vec<PathBuf>> {
    fs::create_dir_all(links_dir)?;
    remove_links(links_dir, package, pkg_root)?;

    let mut created = Vec::new();
    for entry in links {
        let (relative, name) = parse_entry(entry)?;
        let target = pkg_root.join(&relative);
        let link = links_dir.join(link_file_name(&name, &relative));
        replace_foreign(&link)?;
        make_link(&target, &link)?;
        created.push(link);
    }

    for entry in launchers {
        let (relative, name) = parse_entry(entry)?;
        let target = pkg_root.join(&relative);
        let shim = links_dir.join(shim_file_name(&name));
        replace_foreign(&shim)?;
        write_shim(&shim, package, &target)?;
        created.push(shim);
    }

    if !created.is_empty() {
        info!("Linked {} entries for {}", created.len(), package);
    }
    Ok(created)
}

fn is_launcher_for(path: &Path, package: &str) -> bool {
    let Ok(content) = fs::read_to_string(path) else {
        return false;
    };
    content.lines().take(3).any(|line| {
        line.split_once(MARKER)
            .map(|(_, owner)| owner.trim() == package)
            .unwrap_or(false)
    })
}

/// Something else already occupies the name; replace it
fn replace_foreign(path: &Path) -> Result<()> {
    if fs::symlink_metadata(path).is_ok() {
        debug!("Replacing existing {}", path.display());
        fs::remove_file(path)?;
    }
    Ok(())
}

#[cfg(windows)]
fn link_file_name(name: &str, relative: &Path) -> String {
    match relative.extension() {
        Some(ext) if Path::new(name).extension().is_none() => {
            format!("{}.{}", name, ext.to_string_lossy())
        }
        _ => name.to_string(),
    }
}

#[cfg(not(windows))]
fn link_file_name(name: &str, _relative: &Path) -> String {
    name.to_string()
}

#[cfg(windows)]
fn shim_file_name(name: &str) -> String {
    format!("{}.cmd", name)
}

#[cfg(not(windows))]
fn shim_file_name(name: &str) -> String {
    name.to_string()
}

#[cfg(unix)]
fn make_link(target: &Path, link: &Path) -> Result<()> {
    std::os::unix::fs::symlink(target, link).map_err(|e| {
        Error::IoError(format!("Failed to link {}: {}", link.display(), e))
    })
}

#[cfg(windows)]
fn make_link(target: &Path, link: &Path) -> Result<()> {
    // Symlinks need developer mode or elevation; hard links do not
    std::os::windows::fs::symlink_file(target, link)
        .or_else(|_| fs::hard_link(target, link))
        .map_err(|e| Error::IoError(format!("Failed to link {}: {}", link.display(), e)))
}

#[cfg(unix)]
fn write_shim(shim: &Path, package: &str, target: &Path) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;

    let script = format!(
        "#!/bin/sh\n# {} {}\nexec \"{}\" \"$@\"\n",
        MARKER,
        package,
        target.display()
    );
    fs::write(shim, script)?;
    fs::set_permissions(shim, fs::Permissions::from_mode(0o755))?;
    Ok(())
}

#[cfg(windows)]
fn write_shim(shim: &Path, package: &str, target: &Path) -> Result<()> {
    let script = format!(
        "@echo off\r\n:: {} {}\r\n\"{}\" %*\r\n",
        MARKER,
        package,
        target.display()
    );
    fs::write(shim, script)?;
    Ok(())
}
