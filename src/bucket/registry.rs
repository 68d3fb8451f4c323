// src/bucket/registry.rs

//! Package lookup across buckets
//!
//! Buckets are scanned in priority order and the first document found wins;
//! documents are never merged across buckets.

use super::{Bucket, PackageMetadata, normalize_name, validate_name};
use crate::context::Context;
use crate::error::{Error, Result};
use crate::local::{LocalInstallRecord, LocalStore};
use crate::version;
use std::fs;
use std::path::PathBuf;
use tracing::{debug, warn};

/// One search result
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchHit {
    pub bucket: String,
    pub name: String,
    pub path: PathBuf,
}

/// Outcome of comparing an installed package against the buckets
#[derive(Debug, Clone)]
pub struct UpgradeCheck {
    pub upgradable: bool,
    pub installed: Option<LocalInstallRecord>,
    pub candidate: PackageMetadata,
}

/// Whether a candidate should replace the installed version
///
/// Newer versions always win. At equal versions the candidate wins only when
/// its bucket has strictly higher priority (lower weight) than the recorded
/// one; a recorded bucket that no longer exists ranks lowest.
pub fn upgrade_decision(
    installed_version: &str,
    installed_weight: Option<u32>,
    candidate_version: &str,
    candidate_weight: u32,
) -> bool {
    use std::cmp::Ordering;

    match version::compare(candidate_version, installed_version) {
        Ordering::Greater => true,
        Ordering::Less => false,
        Ordering::Equal => match installed_weight {
            Some(weight) => candidate_weight < weight,
            None => true,
        },
    }
}

/// Resolves package names against the configured buckets
pub struct Registry<'a> {
    ctx: &'a Context,
    store: LocalStore,
}

impl<'a> Registry<'a> {
    pub fn new(ctx: &'a Context) -> Self {
        Self {
            ctx,
            store: LocalStore::new(&ctx.paths),
        }
    }

    pub fn context(&self) -> &Context {
        self.ctx
    }

    pub fn store(&self) -> &LocalStore {
        &self.store
    }

    /// Look a package up in priority order
    pub fn find(&self, name: &str) -> Result<Option<PackageMetadata>> {
        let name = validate_name(name)?;
        for bucket in self.ctx.buckets.prioritized() {
            let path = bucket.document_path(&name);
            let content = match fs::read_to_string(&path) {
                Ok(content) => content,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
                Err(e) => {
                    return Err(Error::IoError(format!(
                        "Failed to read {}: {}",
                        path.display(),
                        e
                    )));
                }
            };

            debug!("Found {} in bucket {}", name, bucket.name);
            return bucket
                .variant
                .parse(&name, &bucket.name, &content, self.ctx.host)
                .map(Some);
        }

        debug!("{} not found in any bucket", name);
        Ok(None)
    }

    /// Like `find`, but absence is `NotFound`
    pub fn resolve(&self, name: &str) -> Result<PackageMetadata> {
        self.find(name)?
            .ok_or_else(|| Error::NotFound(format!("package '{}'", normalize_name(name))))
    }

    /// Lazily yield every package whose name satisfies `predicate`
    pub fn search<F>(&self, predicate: F) -> Search<'_, F>
    where
        F: FnMut(&str) -> bool,
    {
        Search {
            buckets: self.ctx.buckets.prioritized().into_iter(),
            current: None,
            predicate,
        }
    }

    /// The persisted install record, independent of any bucket
    pub fn local_meta(&self, name: &str) -> Result<Option<LocalInstallRecord>> {
        self.store.load(name)
    }

    /// Compare the installed record against the best bucket candidate
    ///
    /// A package that is not installed is always upgradable.
    pub fn is_upgradable(&self, name: &str) -> Result<UpgradeCheck> {
        let candidate = self.resolve(name)?;
        let installed = self.local_meta(name)?;
        let candidate_weight = self.weight_of(&candidate.source_name).unwrap_or(u32::MAX);

        let upgradable = match &installed {
            Some(record) => upgrade_decision(
                &record.version,
                self.weight_of(&record.bucket),
                &candidate.version,
                candidate_weight,
            ),
            None => true,
        };

        debug!(
            "{}: installed {:?}, candidate {} from {}, upgradable {}",
            name,
            installed.as_ref().map(|r| r.version.as_str()),
            candidate.version,
            candidate.source_name,
            upgradable
        );

        Ok(UpgradeCheck {
            upgradable,
            installed,
            candidate,
        })
    }

    fn weight_of(&self, bucket: &str) -> Option<u32> {
        self.ctx.buckets.find(bucket).map(|b| b.weight)
    }
}

/// Iterator returned by `Registry::search`
///
/// One pass over each bucket's package index, in priority order. A bucket's
/// index is read when the iterator reaches it.
pub struct Search<'a, F> {
    buckets: std::vec::IntoIter<&'a Bucket>,
    current: Option<(&'a Bucket, std::vec::IntoIter<String>)>,
    predicate: F,
}

impl<F> Iterator for Search<'_, F>
where
    F: FnMut(&str) -> bool,
{
    type Item = SearchHit;

    fn next(&mut self) -> Option<SearchHit> {
        loop {
            if let Some((bucket, names)) = &mut self.current {
                for name in names.by_ref() {
                    if (self.predicate)(&name) {
                        return Some(SearchHit {
                            bucket: bucket.name.clone(),
                            path: bucket.document_path(&name),
                            name,
                        });
                    }
                }
            }

            let bucket = self.buckets.next()?;
            self.current = Some((bucket, package_index(bucket).into_iter()));
        }
    }
}

/// Sorted package names of a bucket; unreadable buckets are empty
fn package_index(bucket: &Bucket) -> Vec<String> {
    let dir = bucket.package_dir();
    let entries = match fs::read_dir(&dir) {
        Ok(entries) => entries,
        Err(e) => {
            if e.kind() != std::io::ErrorKind::NotFound {
                warn!("Cannot read bucket {} at {}: {}", bucket.name, dir.display(), e);
            }
            return Vec::new();
        }
    };

    let mut names: Vec<String> = entries
        .filter_map(|entry| entry.ok())
        .filter_map(|entry| {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                return None;
            }
            path.file_stem()
                .and_then(|s| s.to_str())
                .map(normalize_name)
        })
        .collect();
    names.sort();
    names
}
