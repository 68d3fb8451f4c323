// src/local.rs

//! Install records
//!
//! One document per installed package under `locks/`. A record's presence is
//! the proof that a package is installed; files under `pkgs/` without a
//! record do not count.

use crate::bucket::{normalize_name, validate_name};
use crate::context::Paths;
use crate::error::{Error, Result};
use crate::venv::{LocalOverride, VenvDeclaration};
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::Write;
use std::path::Path;
use tracing::{debug, warn};

const RECORD_EXTENSION: &str = ".json";
const OVERRIDE_EXTENSION: &str = ".local.json";

/// Persisted proof of a completed install
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LocalInstallRecord {
    /// Taken from the document's file name
    #[serde(skip)]
    pub name: String,
    pub version: String,
    /// Name of the bucket the package was installed from
    pub bucket: String,
    /// RFC 3339 install timestamp
    pub date: String,
    /// Snapshot of the declaration at install time
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub venv: Option<VenvDeclaration>,
}

impl LocalInstallRecord {
    pub fn new(name: &str, version: &str, bucket: &str, venv: &VenvDeclaration) -> Self {
        Self {
            name: normalize_name(name),
            version: version.to_string(),
            bucket: bucket.to_string(),
            date: chrono::Utc::now().to_rfc3339(),
            venv: if venv.is_empty() {
                None
            } else {
                Some(venv.clone())
            },
        }
    }
}

/// Reads and writes install records and local overrides
#[derive(Debug, Clone)]
pub struct LocalStore {
    paths: Paths,
}

impl LocalStore {
    pub fn new(paths: &Paths) -> Self {
        Self {
            paths: paths.clone(),
        }
    }

    pub fn paths(&self) -> &Paths {
        &self.paths
    }

    /// Load a package's record; `None` means not installed
    pub fn load(&self, name: &str) -> Result<Option<LocalInstallRecord>> {
        let name = validate_name(name)?;
        let path = self.paths.record_file(&name);
        let Some(content) = read_optional(&path)? else {
            debug!("No install record for {}", name);
            return Ok(None);
        };

        let mut record: LocalInstallRecord = serde_json::from_str(&content)
            .map_err(|e| Error::malformed(format!("install record {}", path.display()), e.to_string()))?;
        record.name = name;
        Ok(Some(record))
    }

    /// Write a record atomically
    pub fn save(&self, record: &LocalInstallRecord) -> Result<()> {
        let name = validate_name(&record.name)?;
        let dir = &self.paths.locks_dir;
        fs::create_dir_all(dir).map_err(|e| {
            Error::IoError(format!("Failed to create directory {}: {}", dir.display(), e))
        })?;

        let content = serde_json::to_string_pretty(record)?;
        let mut temp = tempfile::NamedTempFile::new_in(dir)?;
        temp.write_all(content.as_bytes())?;
        temp.as_file().sync_all()?;

        let path = self.paths.record_file(&name);
        temp.persist(&path).map_err(|e| {
            Error::IoError(format!("Failed to write record {}: {}", path.display(), e))
        })?;

        debug!("Wrote install record {}", path.display());
        Ok(())
    }

    /// Delete a package's record. Returns false if none existed.
    pub fn remove(&self, name: &str) -> Result<bool> {
        let path = self.paths.record_file(&validate_name(name)?);
        match fs::remove_file(&path) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(Error::IoError(format!(
                "Failed to remove record {}: {}",
                path.display(),
                e
            ))),
        }
    }

    /// Every installed package, sorted by name
    pub fn list(&self) -> Result<Vec<LocalInstallRecord>> {
        let entries = match fs::read_dir(&self.paths.locks_dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut records = Vec::new();
        for entry in entries {
            let file_name = entry?.file_name();
            let Some(file_name) = file_name.to_str() else {
                continue;
            };
            if file_name.ends_with(OVERRIDE_EXTENSION) {
                continue;
            }
            let Some(name) = file_name.strip_suffix(RECORD_EXTENSION) else {
                continue;
            };

            match self.load(name) {
                Ok(Some(record)) => records.push(record),
                Ok(None) => {}
                Err(e) => warn!("Skipping unreadable record {}: {}", file_name, e),
            }
        }

        records.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(records)
    }

    pub fn load_override(&self, name: &str) -> Result<Option<LocalOverride>> {
        let path = self.paths.override_file(&validate_name(name)?);
        let Some(content) = read_optional(&path)? else {
            return Ok(None);
        };
        serde_json::from_str(&content)
            .map(Some)
            .map_err(|e| Error::malformed(format!("local override {}", path.display()), e.to_string()))
    }

    /// Effective declaration of an installed package
    ///
    /// `None` when the package has no record. A record without a `venv`
    /// object yields an empty declaration. Any local override is merged in.
    pub fn venv_declaration(&self, name: &str) -> Result<Option<VenvDeclaration>> {
        let Some(record) = self.load(name)? else {
            return Ok(None);
        };

        let mut declaration = record.venv.unwrap_or_default();
        if let Some(local) = self.load_override(name)? {
            debug!("Applying local override for {}", name);
            declaration.apply_override(&local)?;
        }
        Ok(Some(declaration))
    }
}

fn read_optional(path: &Path) -> Result<Option<String>> {
    match fs::read_to_string(path) {
        Ok(content) => Ok(Some(content)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(Error::IoError(format!(
            "Failed to read {}: {}",
            path.display(),
            e
        ))),
    }
}
