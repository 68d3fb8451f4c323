// src/config.rs

//! Source list document (`config/haul.json`)
//!
//! ```json
//! {
//!   "bucket": [{ "name": "main", "url": "https://...", "weights": 100, "mode": "git" }],
//!   "freeze": ["node"],
//!   "channel": "stable"
//! }
//! ```

use crate::bucket::{ObserveMode, SchemaVariant, normalize_name};
use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use tracing::debug;

/// Default priority weight for buckets that do not declare one
pub const DEFAULT_WEIGHT: u32 = 100;

fn default_weights() -> u32 {
    DEFAULT_WEIGHT
}

/// One entry of the `bucket` array
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BucketEntry {
    pub name: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub description: String,
    pub url: String,
    #[serde(default = "default_weights")]
    pub weights: u32,
    #[serde(default)]
    pub mode: ObserveMode,
    #[serde(default)]
    pub variant: SchemaVariant,
}

impl BucketEntry {
    pub fn new(name: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: String::new(),
            url: url.into(),
            weights: DEFAULT_WEIGHT,
            mode: ObserveMode::default(),
            variant: SchemaVariant::default(),
        }
    }
}

/// The whole source list document
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub bucket: Vec<BucketEntry>,
    #[serde(default)]
    pub freeze: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub channel: Option<String>,
    /// Keys this version does not know about, preserved on save
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl Config {
    /// Load the document; a missing file is an empty configuration
    pub fn load(path: &Path) -> Result<Self> {
        let content = match fs::read_to_string(path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!("No configuration at {}, using defaults", path.display());
                return Ok(Self::default());
            }
            Err(e) => {
                return Err(Error::ConfigError(format!(
                    "Failed to read {}: {}",
                    path.display(),
                    e
                )));
            }
        };

        serde_json::from_str(&content)
            .map_err(|e| Error::ConfigError(format!("Failed to parse {}: {}", path.display(), e)))
    }

    /// Write the document atomically
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|e| {
                Error::IoError(format!("Failed to create directory {}: {}", parent.display(), e))
            })?;
        }

        let content = serde_json::to_string_pretty(self)?;
        let temp_path = path.with_extension("json.tmp");
        fs::write(&temp_path, content)?;
        fs::rename(&temp_path, path).map_err(|e| {
            Error::IoError(format!(
                "Failed to move {} to {}: {}",
                temp_path.display(),
                path.display(),
                e
            ))
        })?;
        Ok(())
    }

    pub fn is_frozen(&self, name: &str) -> bool {
        let name = normalize_name(name);
        self.freeze.iter().any(|f| normalize_name(f) == name)
    }

    /// Add to the frozen list. Returns false if already frozen.
    pub fn freeze(&mut self, name: &str) -> bool {
        if self.is_frozen(name) {
            return false;
        }
        self.freeze.push(normalize_name(name));
        true
    }

    /// Remove from the frozen list. Returns false if it was not frozen.
    pub fn unfreeze(&mut self, name: &str) -> bool {
        let name = normalize_name(name);
        let before = self.freeze.len();
        self.freeze.retain(|f| normalize_name(f) != name);
        before != self.freeze.len()
    }
}
