// src/venv/mod.rs

//! Per-package environment declarations
//!
//! A package's `venv` object declares what it contributes to a runtime
//! environment (search paths, include/lib paths, variables) and which
//! installed packages it depends on. The resolver merges these across the
//! dependency graph.

pub mod resolver;

pub use resolver::{LoadedPackage, MAX_DEPTH, ResolvedEnvironment, Resolver, WorkingSet};

use crate::bucket::normalize_name;
use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Separator between a dependency name and its replacement
pub const REPLACE_SEPARATOR: &str = "=>";

/// The `venv` sub-object of metadata, install records and local overrides
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VenvDeclaration {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub category: String,

    #[serde(default, rename = "path", skip_serializing_if = "Vec::is_empty")]
    pub search_paths: Vec<String>,

    #[serde(default, rename = "include", skip_serializing_if = "Vec::is_empty")]
    pub include_paths: Vec<String>,

    #[serde(default, rename = "lib", skip_serializing_if = "Vec::is_empty")]
    pub lib_paths: Vec<String>,

    #[serde(default, rename = "mkdir", skip_serializing_if = "Vec::is_empty")]
    pub mkdir_paths: Vec<String>,

    /// `KEY=VALUE` strings
    #[serde(default, rename = "env", skip_serializing_if = "Vec::is_empty")]
    pub env_assignments: Vec<String>,

    /// Package names, optionally `name=>replacement`
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub dependencies: Vec<String>,
}

impl VenvDeclaration {
    pub fn is_empty(&self) -> bool {
        self == &Self::default()
    }

    pub fn has_dependencies(&self) -> bool {
        !self.dependencies.is_empty()
    }

    /// Dependency names after applying `name=>replacement` rewrites
    pub fn effective_dependencies(&self) -> Vec<String> {
        self.dependencies
            .iter()
            .map(|dep| match dep.split_once(REPLACE_SEPARATOR) {
                Some((_, replacement)) => normalize_name(replacement),
                None => normalize_name(dep),
            })
            .filter(|dep| !dep.is_empty())
            .collect()
    }

    /// Merge a local override into this declaration
    ///
    /// Lists are appended (skipping entries already present), a non-empty
    /// category replaces ours, and each `replace` entry rewrites the
    /// dependency it names.
    pub fn apply_override(&mut self, local: &LocalOverride) -> Result<()> {
        let extra = &local.venv;
        if !extra.category.is_empty() {
            self.category = extra.category.clone();
        }
        append_unique(&mut self.search_paths, &extra.search_paths);
        append_unique(&mut self.include_paths, &extra.include_paths);
        append_unique(&mut self.lib_paths, &extra.lib_paths);
        append_unique(&mut self.mkdir_paths, &extra.mkdir_paths);
        append_unique(&mut self.env_assignments, &extra.env_assignments);
        append_unique(&mut self.dependencies, &extra.dependencies);

        for rule in &local.replace {
            let (from, to) = rule
                .split_once(REPLACE_SEPARATOR)
                .map(|(from, to)| (from.trim(), to.trim()))
                .filter(|(from, to)| !from.is_empty() && !to.is_empty())
                .ok_or_else(|| {
                    Error::malformed("replace rule", format!("'{}' is not 'name=>replacement'", rule))
                })?;

            let prefix = format!("{}{}", normalize_name(from), REPLACE_SEPARATOR);
            let target = self.dependencies.iter_mut().find(|dep| {
                let dep = normalize_name(dep);
                dep == normalize_name(from) || dep.starts_with(&prefix)
            });

            match target {
                Some(dep) => *dep = format!("{}{}{}", from, REPLACE_SEPARATOR, to),
                None => debug!("Replace rule '{}' matches no dependency", rule),
            }
        }

        Ok(())
    }
}

/// Optional per-package local override document
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LocalOverride {
    #[serde(flatten)]
    pub venv: VenvDeclaration,

    /// `dependency=>replacement` rewrites
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub replace: Vec<String>,
}

fn append_unique(into: &mut Vec<String>, from: &[String]) {
    for item in from {
        if !into.contains(item) {
            into.push(item.clone());
        }
    }
}
