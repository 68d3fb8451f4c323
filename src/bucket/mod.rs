// src/bucket/mod.rs

//! Buckets: named, prioritized sources of package metadata
//!
//! This module provides:
//! - The ordered bucket list loaded from the source list document
//! - Package lookup across buckets (`Registry`)
//! - Per-variant document parsers (`parsers`)
//! - Bucket synchronization (`sync`)

pub mod parsers;
pub mod registry;
pub mod sync;

pub use parsers::PackageMetadata;
pub use registry::{Registry, SearchHit, UpgradeCheck};

use crate::config::BucketEntry;
use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// File holding a bucket's sync state inside its checkout
const SYNC_STATE_FILE: &str = ".haul-sync.json";

/// Package names are case-insensitive
pub fn normalize_name(name: &str) -> String {
    name.trim().to_ascii_lowercase()
}

/// Normalize a package or bucket name and reject anything that is not a
/// single path component
pub fn validate_name(name: &str) -> Result<String> {
    let normalized = normalize_name(name);
    if normalized.is_empty() {
        return Err(Error::malformed("package name", "name is empty"));
    }
    if normalized.contains(['/', '\\']) || normalized.contains("..") {
        return Err(Error::malformed(
            "package name",
            format!("'{}' is not a plain name", name),
        ));
    }
    Ok(normalized)
}

/// How a bucket is kept up to date
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ObserveMode {
    /// Clone / fast-forward a version-control checkout
    #[default]
    Git,

    /// Download a snapshot archive and swap it in whole
    Feed,
}

/// Which document schema a bucket's package files use
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SchemaVariant {
    /// Multi-architecture URL maps, venv declarations, dependencies
    #[default]
    Native,

    /// Single architecture slot, flat `bin` launcher list, no dependency graph
    Foreign,
}

impl ObserveMode {
    pub fn as_str(&self) -> &str {
        match self {
            ObserveMode::Git => "git",
            ObserveMode::Feed => "feed",
        }
    }
}

impl SchemaVariant {
    pub fn as_str(&self) -> &str {
        match self {
            SchemaVariant::Native => "native",
            SchemaVariant::Foreign => "foreign",
        }
    }
}

/// Local synchronization state of a bucket checkout
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncState {
    /// RFC 3339 timestamp of the last successful sync
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_sync: Option<String>,

    /// Commit id (git) or snapshot digest (feed)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub revision: Option<String>,
}

impl SyncState {
    /// Read the state stored in `bucket_dir`; absent or unreadable means never synced
    pub fn load(bucket_dir: &Path) -> Self {
        let path = bucket_dir.join(SYNC_STATE_FILE);
        match fs::read_to_string(&path) {
            Ok(content) => serde_json::from_str(&content).unwrap_or_else(|e| {
                debug!("Ignoring unreadable sync state {}: {}", path.display(), e);
                Self::default()
            }),
            Err(_) => Self::default(),
        }
    }

    pub fn save(&self, bucket_dir: &Path) -> Result<()> {
        let content = serde_json::to_string_pretty(self)?;
        fs::write(bucket_dir.join(SYNC_STATE_FILE), content)?;
        Ok(())
    }

    pub fn is_synced(&self) -> bool {
        self.last_sync.is_some()
    }
}

/// A configured bucket
#[derive(Debug, Clone)]
pub struct Bucket {
    pub name: String,
    pub description: String,
    pub url: String,
    /// Lower weight means higher priority
    pub weight: u32,
    pub mode: ObserveMode,
    pub variant: SchemaVariant,
    /// Local checkout directory
    pub dir: PathBuf,
    pub sync_state: SyncState,
}

impl Bucket {
    pub fn from_entry(entry: &BucketEntry, buckets_dir: &Path) -> Self {
        let dir = buckets_dir.join(normalize_name(&entry.name));
        let sync_state = SyncState::load(&dir);
        Self {
            name: entry.name.clone(),
            description: entry.description.clone(),
            url: entry.url.clone(),
            weight: entry.weights,
            mode: entry.mode,
            variant: entry.variant,
            dir,
            sync_state,
        }
    }

    pub fn to_entry(&self) -> BucketEntry {
        BucketEntry {
            name: self.name.clone(),
            description: self.description.clone(),
            url: self.url.clone(),
            weights: self.weight,
            mode: self.mode,
            variant: self.variant,
        }
    }

    /// Directory holding one document per package
    pub fn package_dir(&self) -> PathBuf {
        self.dir.join("bucket")
    }

    /// Document path for a package in this bucket
    pub fn document_path(&self, package: &str) -> PathBuf {
        self.package_dir()
            .join(format!("{}.json", normalize_name(package)))
    }

    pub fn is_named(&self, name: &str) -> bool {
        self.name.eq_ignore_ascii_case(name.trim())
    }
}

/// Buckets in declaration order, queried in priority order
#[derive(Debug, Clone, Default)]
pub struct BucketList {
    buckets: Vec<Bucket>,
}

impl BucketList {
    /// Build from document entries; duplicate names are rejected
    pub fn from_entries(entries: &[BucketEntry], buckets_dir: &Path) -> Result<Self> {
        let mut list = Self::default();
        for entry in entries {
            list.add(Bucket::from_entry(entry, buckets_dir), false)?;
        }
        Ok(list)
    }

    /// Add a bucket. A case-insensitive duplicate is rejected unless `replace`
    /// is set, in which case it takes the existing entry's place.
    pub fn add(&mut self, bucket: Bucket, replace: bool) -> Result<()> {
        validate_name(&bucket.name)?;
        match self.position(&bucket.name) {
            Some(index) if replace => {
                info!("Replacing bucket: {}", bucket.name);
                self.buckets[index] = bucket;
            }
            Some(_) => {
                return Err(Error::ConflictError(format!(
                    "Bucket '{}' already exists",
                    bucket.name
                )));
            }
            None => self.buckets.push(bucket),
        }
        Ok(())
    }

    pub fn remove(&mut self, name: &str) -> Result<Bucket> {
        let index = self
            .position(name)
            .ok_or_else(|| Error::NotFound(format!("bucket '{}'", name)))?;
        Ok(self.buckets.remove(index))
    }

    pub fn find(&self, name: &str) -> Option<&Bucket> {
        self.buckets.iter().find(|b| b.is_named(name))
    }

    /// Ascending weight; ties keep declaration order
    pub fn prioritized(&self) -> Vec<&Bucket> {
        let mut ordered: Vec<&Bucket> = self.buckets.iter().collect();
        ordered.sort_by_key(|b| b.weight);
        ordered
    }

    /// Declaration order
    pub fn iter(&self) -> impl Iterator<Item = &Bucket> {
        self.buckets.iter()
    }

    pub fn to_entries(&self) -> Vec<BucketEntry> {
        self.buckets.iter().map(Bucket::to_entry).collect()
    }

    pub fn len(&self) -> usize {
        self.buckets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buckets.is_empty()
    }

    fn position(&self, name: &str) -> Option<usize> {
        self.buckets.iter().position(|b| b.is_named(name))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn entry(name: &str, weights: u32) -> BucketEntry {
        let mut entry = BucketEntry::new(name, format!("https://example.com/{}", name));
        entry.weights = weights;
        entry
    }

    #[test]
    fn test_prioritized_orders_by_weight_then_declaration() {
        let dir = tempdir().unwrap();
        let list = BucketList::from_entries(
            &[entry("extras", 100), entry("main", 10), entry("versions", 100)],
            dir.path(),
        )
        .unwrap();

        let names: Vec<&str> = list.prioritized().iter().map(|b| b.name.as_str()).collect();
        assert_eq!(names, ["main", "extras", "versions"]);
    }

    #[test]
    fn test_add_duplicate_bucket() {
        let dir = tempdir().unwrap();
        let mut list = BucketList::from_entries(&[entry("main", 100)], dir.path()).unwrap();

        let duplicate = Bucket::from_entry(&entry("Main", 5), dir.path());
        assert!(matches!(
            list.add(duplicate.clone(), false),
            Err(Error::ConflictError(_))
        ));

        list.add(duplicate, true).unwrap();
        assert_eq!(list.len(), 1);
        assert_eq!(list.find("main").unwrap().weight, 5);
    }

    #[test]
    fn test_remove_bucket() {
        let dir = tempdir().unwrap();
        let mut list = BucketList::from_entries(&[entry("main", 100)], dir.path()).unwrap();

        assert!(list.remove("nope").unwrap_err().is_not_found());
        list.remove("MAIN").unwrap();
        assert!(list.is_empty());
    }

    #[test]
    fn test_validate_name() {
        assert_eq!(validate_name("  Git ").unwrap(), "git");
        assert_eq!(validate_name("python3.12").unwrap(), "python3.12");
        for bad in ["", "   ", "../x", "a/b", "a\\b", "..", "x..y"] {
            assert!(
                matches!(validate_name(bad), Err(Error::Malformed { .. })),
                "{:?} should be rejected",
                bad
            );
        }
    }

    #[test]
    fn test_add_rejects_path_like_bucket_name() {
        let dir = tempdir().unwrap();
        let mut list = BucketList::default();
        let bucket = Bucket::from_entry(&entry("../escape", 1), dir.path());
        assert!(list.add(bucket, false).is_err());
        assert!(list.is_empty());
    }

    #[test]
    fn test_observe_mode_names() {
        assert_eq!(ObserveMode::Git.as_str(), "git");
        assert_eq!(ObserveMode::Feed.as_str(), "feed");
    }

    #[test]
    fn test_sync_state_round_trip() {
        let dir = tempdir().unwrap();
        assert!(!SyncState::load(dir.path()).is_synced());

        let state = SyncState {
            last_sync: Some("2026-01-01T00:00:00+00:00".to_string()),
            revision: Some("abc123".to_string()),
        };
        state.save(dir.path()).unwrap();
        assert_eq!(SyncState::load(dir.path()), state);
    }
}
