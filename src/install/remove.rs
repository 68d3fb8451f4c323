// src/install/remove.rs

//! Uninstall

use super::launcher;
use super::swap::old_path;
use crate::bucket::{Registry, validate_name};
use crate::environment::Simulator;
use crate::error::{Error, Result};
use std::fs;
use std::path::Path;
use tracing::{debug, info, warn};

/// What an uninstall did
#[derive(Debug, Clone, Default)]
pub struct RemoveReport {
    pub name: String,
    pub removed_links: usize,
    pub warnings: Vec<String>,
}

/// Uninstall a package
///
/// Deleting the record is the commit point: once it is gone the package is
/// not installed, and the remaining cleanup is best effort. Paths from the
/// metadata's `force_delete` list are removed last.
pub fn uninstall(registry: &Registry<'_>, name: &str) -> Result<RemoveReport> {
    let name = validate_name(name)?;
    let ctx = registry.context();
    let paths = &ctx.paths;

    if !registry.store().remove(&name)? {
        return Err(Error::NotFound(format!("package '{}' is not installed", name)));
    }
    info!("Uninstalling {}", name);

    let mut report = RemoveReport {
        name: name.clone(),
        ..Default::default()
    };
    let pkg_root = paths.pkg_dir(&name);

    match launcher::remove_links(&paths.links_dir, &name, &pkg_root) {
        Ok(count) => report.removed_links = count,
        Err(e) => report.warn(format!("Failed to remove links of {}: {}", name, e)),
    }

    for dir in [pkg_root.clone(), old_path(&pkg_root)] {
        if let Err(e) = remove_path(&dir) {
            report.warn(format!("Failed to remove {}: {}", dir.display(), e));
        }
    }

    let force_delete = match registry.find(&name) {
        Ok(Some(meta)) => meta.force_delete_paths,
        Ok(None) => Vec::new(),
        Err(e) => {
            debug!("No metadata for {} during uninstall: {}", name, e);
            Vec::new()
        }
    };

    let sim = Simulator::clean();
    for entry in &force_delete {
        let expanded = sim.path_expand(entry);
        let path = Path::new(&expanded);
        if !path.is_absolute() {
            report.warn(format!("Skipping relative force_delete path '{}'", entry));
            continue;
        }
        match remove_path(path) {
            Ok(true) => info!("Deleted {}", path.display()),
            Ok(false) => {}
            Err(e) => report.warn(format!("Failed to delete {}: {}", path.display(), e)),
        }
    }

    Ok(report)
}

impl RemoveReport {
    fn warn(&mut self, message: String) {
        warn!("{}", message);
        self.warnings.push(message);
    }
}

/// Remove a file or directory tree; false if nothing was there
fn remove_path(path: &Path) -> std::io::Result<bool> {
    match fs::symlink_metadata(path) {
        Ok(meta) if meta.is_dir() => fs::remove_dir_all(path).map(|_| true),
        Ok(_) => fs::remove_file(path).map(|_| true),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(e),
    }
}
