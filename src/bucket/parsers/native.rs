// src/bucket/parsers/native.rs

//! Native package documents
//!
//! ```json
//! {
//!   "version": "1.22.0",
//!   "description": "...",
//!   "architecture": {
//!     "64bit": { "url": "https://.../go-amd64.zip", "hash": "SHA256:..." },
//!     "arm64": { "url": ["https://a/...", "https://b/..."], "hash": "..." }
//!   },
//!   "links": ["bin/go.exe@go"],
//!   "venv": { "path": ["bin"], "env": ["GOROOT=%HAUL_PKGROOT%"] }
//! }
//! ```
//!
//! Instead of `architecture`, a document may use the flat keys `url`,
//! `url64`, `urlarm64` with `hash`, `hash64`, `hasharm64`. A flat `url` is
//! architecture neutral and is used when no architecture-specific key fits.

use super::{ArchSlot, OneOrMany, PackageMetadata, arch_from_key, document_error, parse_hash, select_arch};
use crate::bucket::normalize_name;
use crate::context::Arch;
use crate::error::Result;
use crate::venv::VenvDeclaration;
use serde::Deserialize;
use std::collections::BTreeMap;

#[derive(Debug, Deserialize)]
struct NativeDocument {
    version: String,
    #[serde(default)]
    description: String,
    #[serde(default)]
    homepage: String,
    #[serde(default)]
    notes: OneOrMany<String>,
    #[serde(default)]
    license: String,
    #[serde(default)]
    extension: Option<String>,
    #[serde(default)]
    suggest: Vec<String>,
    #[serde(default)]
    force_delete: Vec<String>,
    #[serde(default)]
    links: Vec<String>,
    #[serde(default)]
    launchers: Vec<String>,

    #[serde(default)]
    url: Option<OneOrMany<String>>,
    #[serde(default)]
    url64: Option<OneOrMany<String>>,
    #[serde(default)]
    urlarm64: Option<OneOrMany<String>>,
    #[serde(default)]
    hash: Option<OneOrMany<String>>,
    #[serde(default)]
    hash64: Option<OneOrMany<String>>,
    #[serde(default)]
    hasharm64: Option<OneOrMany<String>>,

    #[serde(default)]
    architecture: BTreeMap<String, ArchEntry>,

    #[serde(default)]
    venv: Option<VenvDeclaration>,
}

#[derive(Debug, Deserialize)]
struct ArchEntry {
    #[serde(default)]
    url: Option<OneOrMany<String>>,
    #[serde(default)]
    hash: Option<OneOrMany<String>>,
}

/// Parse a native document for `host`
pub fn parse(name: &str, source_name: &str, content: &str, host: Arch) -> Result<PackageMetadata> {
    let doc: NativeDocument =
        serde_json::from_str(content).map_err(|e| document_error(name, source_name, e))?;

    let (arch, slot) = choose_slot(&doc, host);
    let artifact_hash = parse_hash(slot.hash.as_deref())?;

    Ok(PackageMetadata {
        name: normalize_name(name),
        version: doc.version.trim().to_string(),
        description: doc.description,
        homepage: doc.homepage,
        license: doc.license,
        notes: doc.notes.into_vec(),
        source_name: source_name.to_string(),
        artifact_urls: slot.urls,
        artifact_hash,
        arch,
        extension: doc.extension,
        links: doc.links,
        launchers: doc.launchers,
        force_delete_paths: doc.force_delete,
        suggested_packages: doc.suggest,
        venv: doc.venv.unwrap_or_default(),
    })
}

fn choose_slot(doc: &NativeDocument, host: Arch) -> (Option<Arch>, ArchSlot) {
    if !doc.architecture.is_empty() {
        let slots: BTreeMap<Arch, ArchSlot> = doc
            .architecture
            .iter()
            .filter_map(|(key, entry)| {
                arch_from_key(key).map(|arch| (arch, ArchSlot::new(entry.url.clone(), entry.hash.clone())))
            })
            .collect();
        if let Some((arch, slot)) = select_arch(&slots, host) {
            return (Some(arch), slot.clone());
        }
    }

    let mut flat = BTreeMap::new();
    flat.insert(
        Arch::X64,
        ArchSlot::new(doc.url64.clone(), doc.hash64.clone().or_else(|| doc.hash.clone())),
    );
    flat.insert(
        Arch::Arm64,
        ArchSlot::new(doc.urlarm64.clone(), doc.hasharm64.clone().or_else(|| doc.hash.clone())),
    );
    if let Some((arch, slot)) = select_arch(&flat, host) {
        return (Some(arch), slot.clone());
    }

    (None, ArchSlot::new(doc.url.clone(), doc.hash.clone()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;

    const HASH: &str = "SHA256:2cf24dba5fb0a30e26e83b2ac5b9e29e1b161e5c1fa7425e73043362938b9824";

    #[test]
    fn test_architecture_map_on_64bit_host() {
        let doc = format!(
            r#"{{
                "version": "1.22.0",
                "architecture": {{ "64bit": {{ "url": "https://dl/go-amd64.zip", "hash": "{}" }} }}
            }}"#,
            HASH
        );
        let meta = parse("Go", "main", &doc, Arch::X64).unwrap();
        assert_eq!(meta.name, "go");
        assert_eq!(meta.artifact_urls, ["https://dl/go-amd64.zip"]);
        assert_eq!(meta.artifact_hash.unwrap().to_string(), HASH);
        assert_eq!(meta.arch, Some(Arch::X64));
    }

    #[test]
    fn test_architecture_map_without_match_has_no_urls() {
        let doc = r#"{
            "version": "1.22.0",
            "architecture": { "64bit": { "url": "https://dl/go-amd64.zip" } }
        }"#;
        let meta = parse("go", "main", doc, Arch::X86).unwrap();
        assert!(!meta.has_artifact());
        assert!(meta.artifact_hash.is_none());
    }

    #[test]
    fn test_flat_keys() {
        let doc = r#"{
            "version": "3.0",
            "url": "https://dl/tool-any.zip",
            "url64": ["https://a/tool64.zip", "https://b/tool64.zip"],
            "hash": "abcd",
            "hash64": "ef01"
        }"#;

        let x64 = parse("tool", "main", doc, Arch::X64).unwrap();
        assert_eq!(x64.artifact_urls.len(), 2);
        assert_eq!(x64.artifact_hash.unwrap().hex, "ef01");

        let x86 = parse("tool", "main", doc, Arch::X86).unwrap();
        assert_eq!(x86.artifact_urls, ["https://dl/tool-any.zip"]);
        assert_eq!(x86.arch, None);
    }

    #[test]
    fn test_lists_and_venv() {
        let doc = r#"{
            "version": "13.2.0",
            "description": "GNU toolchain",
            "notes": "Restart your shell",
            "suggest": ["make"],
            "force_delete": ["~/.gcc-cache"],
            "links": ["bin/gcc@gcc"],
            "launchers": ["bin/g++"],
            "url": "https://dl/gcc.tar.xz",
            "venv": { "path": ["bin"], "dependencies": ["binutils"] }
        }"#;
        let meta = parse("gcc", "main", doc, Arch::X64).unwrap();
        assert_eq!(meta.notes, ["Restart your shell"]);
        assert_eq!(meta.suggested_packages, ["make"]);
        assert_eq!(meta.force_delete_paths, ["~/.gcc-cache"]);
        assert_eq!(meta.links, ["bin/gcc@gcc"]);
        assert_eq!(meta.venv.dependencies, ["binutils"]);
    }

    #[test]
    fn test_missing_version_is_malformed() {
        let result = parse("x", "main", r#"{"url": "https://dl/x.zip"}"#, Arch::X64);
        assert!(matches!(result, Err(Error::Malformed { .. })));
    }
}
