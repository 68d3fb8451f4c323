// src/install/mod.rs

//! Install / upgrade transactions
//!
//! One `InstallTransaction` drives one package through
//! `Start → (CachedArtifactFound | Downloading) → Verifying → Extracting →
//! Flattening → Swapping → WritingRecord → RelinkingLaunchers → Done`,
//! with `Failed` reachable from every state.
//!
//! Extraction always happens in a staging directory next to the live one.
//! Failures before the record is written leave any previous install in
//! place; writing the record commits the install, after which launcher
//! problems are only reported.

pub mod launcher;
pub mod remove;
pub mod swap;

pub use remove::{RemoveReport, uninstall};
pub use swap::{swap_into_place, swap_with};

use crate::archive::{ArchiveHandle, Dispatcher, flatten};
use crate::bucket::{PackageMetadata, Registry, UpgradeCheck, validate_name};
use crate::checksum::Checksum;
use crate::download::{Downloader, PARTIAL_SUFFIX, cache_slot};
use crate::error::{Error, Result};
use crate::local::LocalInstallRecord;
use crate::process::ProcessRunner;
use crate::progress::ProgressTicker;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{debug, info, warn};

/// Downloads attempted per artifact before a hash mismatch is final
const VERIFY_ATTEMPTS: u32 = 2;

/// Position of a transaction in its state machine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InstallState {
    Start,
    CachedArtifactFound,
    Downloading,
    Verifying,
    Extracting,
    Flattening,
    Swapping,
    WritingRecord,
    RelinkingLaunchers,
    Done,
    Failed,
}

impl InstallState {
    pub fn as_str(&self) -> &str {
        match self {
            InstallState::Start => "start",
            InstallState::CachedArtifactFound => "cached-artifact-found",
            InstallState::Downloading => "downloading",
            InstallState::Verifying => "verifying",
            InstallState::Extracting => "extracting",
            InstallState::Flattening => "flattening",
            InstallState::Swapping => "swapping",
            InstallState::WritingRecord => "writing-record",
            InstallState::RelinkingLaunchers => "relinking-launchers",
            InstallState::Done => "done",
            InstallState::Failed => "failed",
        }
    }
}

/// Per-transaction options
#[derive(Debug, Clone, Default)]
pub struct InstallOptions {
    /// Install even when up to date or frozen
    pub force: bool,
    /// Draw download progress on stderr
    pub progress: bool,
    /// Cooperative cancellation, checked between steps and archive entries
    pub cancel: Arc<AtomicBool>,
}

/// How a transaction ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InstallOutcome {
    Installed { version: String },
    Upgraded { from: String, to: String },
    UpToDate { version: String },
    Frozen { version: String },
}

impl fmt::Display for InstallOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InstallOutcome::Installed { version } => write!(f, "installed {}", version),
            InstallOutcome::Upgraded { from, to } => write!(f, "upgraded {} -> {}", from, to),
            InstallOutcome::UpToDate { version } => write!(f, "{} is up to date", version),
            InstallOutcome::Frozen { version } => write!(f, "frozen at {}", version),
        }
    }
}

#[derive(Debug, Clone)]
pub struct InstallReport {
    pub name: String,
    pub outcome: InstallOutcome,
    /// Problems that did not fail the transaction
    pub warnings: Vec<String>,
    /// Every state the transaction passed through
    pub states: Vec<InstallState>,
}

/// One install or upgrade attempt
pub struct InstallTransaction<'a> {
    registry: &'a Registry<'a>,
    downloader: &'a dyn Downloader,
    runner: &'a dyn ProcessRunner,
    options: InstallOptions,
    states: Vec<InstallState>,
    warnings: Vec<String>,
}

impl<'a> InstallTransaction<'a> {
    pub fn new(
        registry: &'a Registry<'a>,
        downloader: &'a dyn Downloader,
        runner: &'a dyn ProcessRunner,
        options: InstallOptions,
    ) -> Self {
        Self {
            registry,
            downloader,
            runner,
            options,
            states: vec![InstallState::Start],
            warnings: Vec::new(),
        }
    }

    pub fn state(&self) -> InstallState {
        self.states.last().copied().unwrap_or(InstallState::Start)
    }

    /// Resolve `name` and install or upgrade it
    pub fn run(mut self, name: &str) -> Result<InstallReport> {
        let name = match validate_name(name) {
            Ok(name) => name,
            Err(e) => return Err(self.fail(name, e)),
        };
        match self.run_inner(&name) {
            Ok(outcome) => Ok(self.finish(name, outcome)),
            Err(e) => Err(self.fail(&name, e)),
        }
    }

    fn run_inner(&mut self, name: &str) -> Result<InstallOutcome> {
        let registry = self.registry;

        if !self.options.force && registry.context().is_frozen(name) {
            if let Some(record) = registry.local_meta(name)? {
                info!("{} is frozen at {}, skipping", name, record.version);
                self.transition(InstallState::Done);
                return Ok(InstallOutcome::Frozen {
                    version: record.version,
                });
            }
        }

        let UpgradeCheck {
            upgradable,
            installed,
            candidate,
        } = registry.is_upgradable(name)?;

        if let Some(record) = &installed {
            if !upgradable && !self.options.force {
                info!("{} {} is up to date", name, record.version);
                self.transition(InstallState::Done);
                return Ok(InstallOutcome::UpToDate {
                    version: record.version.clone(),
                });
            }
        }

        self.install_inner(&candidate, installed.as_ref())
    }

    fn install_inner(
        &mut self,
        meta: &PackageMetadata,
        previous: Option<&LocalInstallRecord>,
    ) -> Result<InstallOutcome> {
        let registry = self.registry;
        let paths = &registry.context().paths;
        let name = meta.name.as_str();

        if !meta.has_artifact() {
            return Err(Error::malformed(
                format!("package {}", name),
                format!("no URL for host architecture {}", registry.context().host),
            ));
        }
        paths.ensure()?;

        info!(
            "Installing {} {} from {}",
            name, meta.version, meta.source_name
        );

        let artifact = self.acquire(meta)?;
        self.check_cancel()?;

        self.transition(InstallState::Extracting);
        let staging = tempfile::Builder::new()
            .prefix(&format!(".{}-", name))
            .tempdir_in(&paths.pkgs_dir)
            .map_err(|e| Error::IoError(format!("Failed to create staging directory: {}", e)))?;

        let handle = ArchiveHandle::open(&artifact)?;
        let cancel = Arc::clone(&self.options.cancel);
        let mut on_entry = |entry: &Path| {
            debug!("Extracting {}", entry.display());
            !cancel.load(Ordering::Relaxed)
        };
        Dispatcher::new(self.runner).dispatch(handle, staging.path(), &mut on_entry)?;

        self.transition(InstallState::Flattening);
        flatten(staging.path())?;
        self.check_cancel()?;

        self.transition(InstallState::Swapping);
        let live = paths.pkg_dir(name);
        let swap_warnings = swap_into_place(staging.path(), &live)?;
        self.warnings.extend(swap_warnings);

        self.transition(InstallState::WritingRecord);
        let record = LocalInstallRecord::new(name, &meta.version, &meta.source_name, &meta.venv);
        registry.store().save(&record)?;

        self.transition(InstallState::RelinkingLaunchers);
        if let Err(e) = launcher::relink(&paths.links_dir, name, &live, &meta.links, &meta.launchers) {
            self.warn(format!("Failed to regenerate launchers for {}: {}", name, e));
        }

        for suggestion in &meta.suggested_packages {
            if registry.local_meta(suggestion)?.is_none() {
                info!("{} suggests installing {}", name, suggestion);
            }
        }

        Ok(match previous {
            Some(prev) => InstallOutcome::Upgraded {
                from: prev.version.clone(),
                to: meta.version.clone(),
            },
            None => InstallOutcome::Installed {
                version: meta.version.clone(),
            },
        })
    }

    /// Produce a local artifact: from the cache, or downloaded and verified
    fn acquire(&mut self, meta: &PackageMetadata) -> Result<PathBuf> {
        let Some(hash) = &meta.artifact_hash else {
            self.warn(format!(
                "{} declares no hash; installing without verification",
                meta.name
            ));
            self.transition(InstallState::Downloading);
            return self.download(meta);
        };

        if let Some(cached) = self.cached_artifact(meta, hash)? {
            info!("Using cached {}", cached.display());
            self.transition(InstallState::CachedArtifactFound);
            return Ok(cached);
        }

        let mut attempt = 0;
        loop {
            attempt += 1;
            self.check_cancel()?;
            self.transition(InstallState::Downloading);
            let path = self.download(meta)?;

            self.transition(InstallState::Verifying);
            match hash.verify(&path) {
                Ok(()) => return Ok(path),
                Err(e @ Error::Unverified { .. }) => {
                    if let Err(rm) = fs::remove_file(&path) {
                        debug!("Could not remove {}: {}", path.display(), rm);
                    }
                    if attempt >= VERIFY_ATTEMPTS {
                        return Err(e);
                    }
                    warn!("{}; downloading again", e);
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// A file in one of the URLs' cache slots whose digest already matches
    ///
    /// The slot is searched rather than a fixed name because the server
    /// chooses the stored file name.
    fn cached_artifact(&self, meta: &PackageMetadata, hash: &Checksum) -> Result<Option<PathBuf>> {
        let cache = &self.registry.context().paths.cache_dir;
        for url in &meta.artifact_urls {
            let slot = cache_slot(cache, url);
            let entries = match fs::read_dir(&slot) {
                Ok(entries) => entries,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
                Err(e) => return Err(e.into()),
            };
            for entry in entries {
                let candidate = entry?.path();
                if candidate.to_string_lossy().ends_with(PARTIAL_SUFFIX) || !candidate.is_file() {
                    continue;
                }
                if hash.matches(&candidate)? {
                    return Ok(Some(candidate));
                }
            }
        }
        Ok(None)
    }

    /// Try each mirror in order
    fn download(&mut self, meta: &PackageMetadata) -> Result<PathBuf> {
        let registry = self.registry;
        let cache = &registry.context().paths.cache_dir;
        let mut last_error = None;

        for url in &meta.artifact_urls {
            let ticker = if self.options.progress {
                self.downloader
                    .progress()
                    .and_then(|p| ProgressTicker::stderr(p, &meta.name))
            } else {
                None
            };

            let result = self.downloader.fetch(url, &cache_slot(cache, url), true);
            if let Some(ticker) = ticker {
                ticker.finish();
                eprintln!();
            }

            match result {
                Ok(path) => return Ok(path),
                Err(Error::Cancelled) => return Err(Error::Cancelled),
                Err(e) => {
                    warn!("Mirror {} failed: {}", url, e);
                    last_error = Some(e);
                }
            }
        }

        Err(last_error.unwrap_or_else(|| {
            Error::DownloadError(format!("no URL to download {} from", meta.name))
        }))
    }

    fn check_cancel(&self) -> Result<()> {
        if self.options.cancel.load(Ordering::Relaxed) {
            Err(Error::Cancelled)
        } else {
            Ok(())
        }
    }

    fn transition(&mut self, state: InstallState) {
        debug!("{} -> {}", self.state().as_str(), state.as_str());
        self.states.push(state);
    }

    fn warn(&mut self, message: String) {
        warn!("{}", message);
        self.warnings.push(message);
    }

    fn finish(mut self, name: String, outcome: InstallOutcome) -> InstallReport {
        if self.state() != InstallState::Done {
            self.transition(InstallState::Done);
        }
        InstallReport {
            name,
            outcome,
            warnings: self.warnings,
            states: self.states,
        }
    }

    fn fail(&mut self, name: &str, err: Error) -> Error {
        let at = self.state();
        self.transition(InstallState::Failed);
        if err.is_not_found() {
            debug!("{}: {}", name, err);
        } else {
            warn!("Installing {} failed while {}: {}", name, at.as_str(), err);
        }
        err
    }
}

/// Installed, unfrozen packages that have an upgrade available
///
/// Packages no bucket carries any more are skipped.
pub fn pending_upgrades(registry: &Registry<'_>) -> Result<Vec<UpgradeCheck>> {
    let ctx = registry.context();
    let mut pending = Vec::new();

    for record in registry.store().list()? {
        if ctx.is_frozen(&record.name) {
            debug!("{} is frozen", record.name);
            continue;
        }
        match registry.is_upgradable(&record.name) {
            Ok(check) if check.upgradable => pending.push(check),
            Ok(_) => {}
            Err(e) if e.is_not_found() => debug!("{} is no longer in any bucket", record.name),
            Err(e) => return Err(e),
        }
    }

    Ok(pending)
}
