// src/bucket/parsers/foreign.rs

//! Foreign (scoop-style) manifests
//!
//! Translated into the native model with one architecture slot: a top-level
//! `url` wins, otherwise the best `architecture` entry for the host is used.
//! `bin` entries become launchers; there is no dependency graph and no venv.

use super::{ArchSlot, OneOrMany, PackageMetadata, arch_from_key, document_error, parse_hash, select_arch};
use crate::bucket::normalize_name;
use crate::context::Arch;
use crate::error::Result;
use crate::venv::VenvDeclaration;
use serde::Deserialize;
use std::collections::BTreeMap;
use tracing::debug;

#[derive(Debug, Deserialize)]
struct ForeignManifest {
    version: String,
    #[serde(default)]
    description: String,
    #[serde(default)]
    homepage: String,
    #[serde(default)]
    license: Option<License>,
    #[serde(default)]
    notes: OneOrMany<String>,
    #[serde(default)]
    url: Option<OneOrMany<String>>,
    #[serde(default)]
    hash: Option<OneOrMany<String>>,
    #[serde(default)]
    architecture: BTreeMap<String, ForeignArch>,
    #[serde(default)]
    bin: Option<Bin>,
    #[serde(default)]
    suggest: BTreeMap<String, OneOrMany<String>>,
    #[serde(default)]
    depends: Option<OneOrMany<String>>,
}

#[derive(Debug, Deserialize)]
struct ForeignArch {
    #[serde(default)]
    url: Option<OneOrMany<String>>,
    #[serde(default)]
    hash: Option<OneOrMany<String>>,
    #[serde(default)]
    bin: Option<Bin>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum License {
    Identifier(String),
    Detailed { identifier: String },
}

/// `"tool.exe"`, `["a.exe", "b.exe"]`, or `[["a.exe", "alias", "--args"], ...]`
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
enum Bin {
    Single(String),
    List(Vec<BinEntry>),
}

#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
enum BinEntry {
    Path(String),
    Aliased(Vec<String>),
}

impl Bin {
    fn into_launchers(self) -> Vec<String> {
        let entries = match self {
            Bin::Single(path) => vec![BinEntry::Path(path)],
            Bin::List(entries) => entries,
        };

        entries
            .into_iter()
            .filter_map(|entry| match entry {
                BinEntry::Path(path) => Some(path),
                BinEntry::Aliased(parts) => {
                    let mut parts = parts.into_iter();
                    let path = parts.next()?;
                    match parts.next().filter(|alias| !alias.is_empty()) {
                        Some(alias) => Some(format!("{}@{}", path, alias)),
                        None => Some(path),
                    }
                }
            })
            .collect()
    }
}

/// Parse a foreign manifest for `host`
pub fn parse(name: &str, source_name: &str, content: &str, host: Arch) -> Result<PackageMetadata> {
    let manifest: ForeignManifest =
        serde_json::from_str(content).map_err(|e| document_error(name, source_name, e))?;

    if let Some(depends) = manifest.depends {
        debug!(
            "Ignoring depends of foreign manifest {}: {:?}",
            name,
            depends.into_vec()
        );
    }

    let top_level = ArchSlot::new(manifest.url, manifest.hash);
    let mut arch_bin = None;
    let (arch, slot) = if !top_level.urls.is_empty() {
        (None, top_level)
    } else {
        let mut slots = BTreeMap::new();
        let mut bins = BTreeMap::new();
        for (key, entry) in manifest.architecture {
            if let Some(arch) = arch_from_key(&key) {
                slots.insert(arch, ArchSlot::new(entry.url, entry.hash));
                if let Some(bin) = entry.bin {
                    bins.insert(arch, bin);
                }
            }
        }
        match select_arch(&slots, host) {
            Some((arch, slot)) => {
                arch_bin = bins.remove(&arch);
                (Some(arch), slot.clone())
            }
            None => (None, ArchSlot::default()),
        }
    };

    let launchers = manifest
        .bin
        .or(arch_bin)
        .map(Bin::into_launchers)
        .unwrap_or_default();

    let suggested_packages = manifest
        .suggest
        .into_values()
        .flat_map(OneOrMany::into_vec)
        .collect();

    let license = match manifest.license {
        Some(License::Identifier(id)) | Some(License::Detailed { identifier: id }) => id,
        None => String::new(),
    };

    Ok(PackageMetadata {
        name: normalize_name(name),
        version: manifest.version.trim().to_string(),
        description: manifest.description,
        homepage: manifest.homepage,
        license,
        notes: manifest.notes.into_vec(),
        source_name: source_name.to_string(),
        artifact_hash: parse_hash(slot.hash.as_deref())?,
        artifact_urls: slot.urls,
        arch,
        extension: None,
        links: Vec::new(),
        launchers,
        force_delete_paths: Vec::new(),
        suggested_packages,
        venv: VenvDeclaration::default(),
    })
}
