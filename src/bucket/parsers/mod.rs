// src/bucket/parsers/mod.rs

//! Package document parsers for the bucket schema variants
//!
//! Each bucket declares which schema its documents follow:
//! - Native: multi-architecture URL maps, `venv` declarations, dependencies
//! - Foreign: a scoop-like manifest translated into the native model

pub mod foreign;
pub mod native;

use super::SchemaVariant;
use crate::checksum::Checksum;
use crate::context::Arch;
use crate::error::{Error, Result};
use crate::venv::VenvDeclaration;
use serde::Deserialize;
use std::collections::BTreeMap;
use tracing::debug;

/// Resolved metadata for one package, for the host architecture
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PackageMetadata {
    pub name: String,
    pub version: String,
    pub description: String,
    pub homepage: String,
    pub license: String,
    pub notes: Vec<String>,

    /// Bucket the document came from
    pub source_name: String,

    /// Mirrors of one artifact, tried in order
    pub artifact_urls: Vec<String>,

    /// Declared digest of the artifact
    pub artifact_hash: Option<Checksum>,

    /// Architecture the URLs were selected for
    pub arch: Option<Arch>,

    /// Format hint (`extension` key), used only for display
    pub extension: Option<String>,

    /// `relative/path[@alias]` entries symlinked into `links/`
    pub links: Vec<String>,

    /// `relative/path[@alias]` entries that get a shim in `links/`
    pub launchers: Vec<String>,

    pub force_delete_paths: Vec<String>,
    pub suggested_packages: Vec<String>,
    pub venv: VenvDeclaration,
}

impl PackageMetadata {
    /// Minimal metadata with a single artifact, for callers building one by hand
    pub fn new(name: &str, version: &str, source_name: &str, url: &str) -> Self {
        Self {
            name: super::normalize_name(name),
            version: version.to_string(),
            description: String::new(),
            homepage: String::new(),
            license: String::new(),
            notes: Vec::new(),
            source_name: source_name.to_string(),
            artifact_urls: vec![url.to_string()],
            artifact_hash: None,
            arch: None,
            extension: None,
            links: Vec::new(),
            launchers: Vec::new(),
            force_delete_paths: Vec::new(),
            suggested_packages: Vec::new(),
            venv: VenvDeclaration::default(),
        }
    }

    pub fn has_artifact(&self) -> bool {
        !self.artifact_urls.is_empty()
    }
}

impl SchemaVariant {
    /// Parse a package document with this variant's parser
    pub fn parse(
        &self,
        name: &str,
        source_name: &str,
        content: &str,
        host: Arch,
    ) -> Result<PackageMetadata> {
        debug!("Parsing {} document for {} from {}", self.as_str(), name, source_name);
        match self {
            SchemaVariant::Native => native::parse(name, source_name, content, host),
            SchemaVariant::Foreign => foreign::parse(name, source_name, content, host),
        }
    }
}

/// A JSON value that may be a single item or a list
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
pub enum OneOrMany<T> {
    One(T),
    Many(Vec<T>),
}

impl<T> Default for OneOrMany<T> {
    fn default() -> Self {
        OneOrMany::Many(Vec::new())
    }
}

impl<T> OneOrMany<T> {
    pub fn into_vec(self) -> Vec<T> {
        match self {
            OneOrMany::One(item) => vec![item],
            OneOrMany::Many(items) => items,
        }
    }
}

/// URLs and digest offered for one architecture
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ArchSlot {
    pub urls: Vec<String>,
    pub hash: Option<String>,
}

impl ArchSlot {
    pub fn new(urls: Option<OneOrMany<String>>, hash: Option<OneOrMany<String>>) -> Self {
        Self {
            urls: urls
                .map(OneOrMany::into_vec)
                .unwrap_or_default()
                .into_iter()
                .map(|u| u.trim().to_string())
                .filter(|u| !u.is_empty())
                .collect(),
            // Mirrors carry the same artifact, so the first digest covers them all
            hash: hash.and_then(|h| h.into_vec().into_iter().next()),
        }
    }

    fn is_usable(&self) -> bool {
        !self.urls.is_empty()
    }
}

/// Walk the host's fallback chain; the first architecture with URLs wins
pub fn select_arch(slots: &BTreeMap<Arch, ArchSlot>, host: Arch) -> Option<(Arch, &ArchSlot)> {
    host.fallback_chain()
        .iter()
        .find_map(|arch| slots.get(arch).filter(|s| s.is_usable()).map(|s| (*arch, s)))
}

/// Map `architecture` object keys to architectures; unknown keys are skipped
pub(crate) fn arch_from_key(key: &str) -> Option<Arch> {
    match key.parse::<Arch>() {
        Ok(arch) => Some(arch),
        Err(_) => {
            debug!("Ignoring unknown architecture key '{}'", key);
            None
        }
    }
}

pub(crate) fn parse_hash(hash: Option<&str>) -> Result<Option<Checksum>> {
    match hash.map(str::trim) {
        None | Some("") => Ok(None),
        Some(declared) => Checksum::parse(declared).map(Some),
    }
}

pub(crate) fn document_error(name: &str, source_name: &str, err: serde_json::Error) -> Error {
    Error::malformed(
        format!("package document {}/{}", source_name, name),
        err.to_string(),
    )
}
