// src/context.rs

//! Process-wide context
//!
//! Built once at startup from the managed root and the source list document,
//! then passed by reference into every component. Read-only after load.

use crate::bucket::{BucketList, normalize_name};
use crate::config::Config;
use crate::error::{Error, Result};
use std::collections::BTreeSet;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use tracing::debug;

/// Default channel when the document does not name one
pub const DEFAULT_CHANNEL: &str = "stable";

/// Host / artifact architecture
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Arch {
    X86,
    X64,
    Arm64,
}

impl Arch {
    /// Architecture of the running binary
    pub fn host() -> Self {
        match std::env::consts::ARCH {
            "x86" => Arch::X86,
            "aarch64" => Arch::Arm64,
            _ => Arch::X64,
        }
    }

    /// Key used in bucket documents' `architecture` object
    pub fn key(&self) -> &'static str {
        match self {
            Arch::X86 => "32bit",
            Arch::X64 => "64bit",
            Arch::Arm64 => "arm64",
        }
    }

    /// Architectures this host can run, most preferred first
    pub fn fallback_chain(&self) -> &'static [Arch] {
        match self {
            Arch::X64 => &[Arch::X64, Arch::X86],
            Arch::Arm64 => &[Arch::Arm64, Arch::X64, Arch::X86],
            Arch::X86 => &[Arch::X86],
        }
    }
}

impl fmt::Display for Arch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.key())
    }
}

impl FromStr for Arch {
    type Err = Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "32bit" | "x86" | "i686" => Ok(Arch::X86),
            "64bit" | "x64" | "x86_64" | "amd64" => Ok(Arch::X64),
            "arm64" | "aarch64" => Ok(Arch::Arm64),
            other => Err(Error::Unsupported(format!("architecture '{}'", other))),
        }
    }
}

/// Filesystem layout under the managed root
#[derive(Debug, Clone)]
pub struct Paths {
    pub root: PathBuf,
    pub config_file: PathBuf,
    pub buckets_dir: PathBuf,
    pub pkgs_dir: PathBuf,
    pub locks_dir: PathBuf,
    pub cache_dir: PathBuf,
    pub links_dir: PathBuf,
    pub lock_file: PathBuf,
}

impl Paths {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        Self {
            config_file: root.join("config").join("haul.json"),
            buckets_dir: root.join("buckets"),
            pkgs_dir: root.join("pkgs"),
            locks_dir: root.join("locks"),
            cache_dir: root.join("downloads"),
            links_dir: root.join("links"),
            lock_file: root.join("haul.lock"),
            root,
        }
    }

    /// Default root: `~/.haul`
    pub fn default_root() -> Option<PathBuf> {
        dirs::home_dir().map(|home| home.join(".haul"))
    }

    /// Live install directory of a package
    pub fn pkg_dir(&self, name: &str) -> PathBuf {
        self.pkgs_dir.join(normalize_name(name))
    }

    /// Install record of a package
    pub fn record_file(&self, name: &str) -> PathBuf {
        self.locks_dir
            .join(format!("{}.json", normalize_name(name)))
    }

    /// Optional local override document of a package
    pub fn override_file(&self, name: &str) -> PathBuf {
        self.locks_dir
            .join(format!("{}.local.json", normalize_name(name)))
    }

    pub fn bucket_dir(&self, name: &str) -> PathBuf {
        self.buckets_dir.join(normalize_name(name))
    }

    /// Create every directory the layout needs
    pub fn ensure(&self) -> Result<()> {
        for dir in [
            &self.buckets_dir,
            &self.pkgs_dir,
            &self.locks_dir,
            &self.cache_dir,
            &self.links_dir,
        ] {
            fs::create_dir_all(dir).map_err(|e| {
                Error::IoError(format!("Failed to create directory {}: {}", dir.display(), e))
            })?;
        }
        Ok(())
    }
}

/// Everything components need, constructed once
#[derive(Debug, Clone)]
pub struct Context {
    pub paths: Paths,
    pub buckets: BucketList,
    pub frozen: BTreeSet<String>,
    pub channel: String,
    pub host: Arch,
}

impl Context {
    /// Load the source list document under `root`
    pub fn load(root: &Path) -> Result<Self> {
        let paths = Paths::new(root);
        let config = Config::load(&paths.config_file)?;
        Self::from_config(paths, &config, Arch::host())
    }

    pub fn from_config(paths: Paths, config: &Config, host: Arch) -> Result<Self> {
        let buckets = BucketList::from_entries(&config.bucket, &paths.buckets_dir)
            .map_err(|e| Error::ConfigError(format!("{}: {}", paths.config_file.display(), e)))?;
        let frozen = config.freeze.iter().map(|f| normalize_name(f)).collect();
        let channel = config
            .channel
            .clone()
            .unwrap_or_else(|| DEFAULT_CHANNEL.to_string());

        debug!(
            "Loaded context at {} ({} buckets, host {})",
            paths.root.display(),
            buckets.len(),
            host
        );

        Ok(Self {
            paths,
            buckets,
            frozen,
            channel,
            host,
        })
    }

    pub fn is_frozen(&self, name: &str) -> bool {
        self.frozen.contains(&normalize_name(name))
    }
}
