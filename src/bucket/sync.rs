// src/bucket/sync.rs

//! Bucket synchronization
//!
//! Git buckets are shallow clones updated with fast-forward pulls. Feed
//! buckets are snapshot archives that replace the checkout wholesale using
//! the same aside-and-rename swap as package installs.

use super::{Bucket, ObserveMode, SyncState};
use crate::archive::{ArchiveHandle, Dispatcher};
use crate::checksum::{ChecksumType, compute_file};
use crate::context::Paths;
use crate::download::{Downloader, cache_slot};
use crate::error::{Error, Result};
use crate::install::swap_into_place;
use crate::process::{ProcessRunner, argv, run_checked};
use chrono::Utc;
use std::fs;
use tracing::{debug, info, warn};

/// Bring one bucket's checkout up to date and persist its sync state
pub fn sync_bucket(
    bucket: &Bucket,
    paths: &Paths,
    downloader: &dyn Downloader,
    runner: &dyn ProcessRunner,
) -> Result<SyncState> {
    fs::create_dir_all(&paths.buckets_dir)?;
    info!("Syncing bucket {} ({})", bucket.name, bucket.mode.as_str());

    let revision = match bucket.mode {
        ObserveMode::Git => sync_git(bucket, runner)?,
        ObserveMode::Feed => sync_feed(bucket, paths, downloader, runner)?,
    };

    if bucket.sync_state.revision.as_deref() == Some(revision.as_str()) {
        debug!("Bucket {} unchanged at {}", bucket.name, revision);
    }

    let state = SyncState {
        last_sync: Some(Utc::now().to_rfc3339()),
        revision: Some(revision),
    };
    state.save(&bucket.dir)?;
    Ok(state)
}

/// Sync every bucket in order, collecting per-bucket outcomes
///
/// One failing bucket does not stop the others.
pub fn sync_all<'b, I>(
    buckets: I,
    paths: &Paths,
    downloader: &dyn Downloader,
    runner: &dyn ProcessRunner,
) -> Vec<(String, Result<SyncState>)>
where
    I: IntoIterator<Item = &'b Bucket>,
{
    buckets
        .into_iter()
        .map(|bucket| {
            let result = sync_bucket(bucket, paths, downloader, runner);
            if let Err(e) = &result {
                warn!("Failed to sync bucket {}: {}", bucket.name, e);
            }
            (bucket.name.clone(), result)
        })
        .collect()
}

fn sync_git(bucket: &Bucket, runner: &dyn ProcessRunner) -> Result<String> {
    let dir = bucket.dir.to_string_lossy().into_owned();

    if bucket.dir.join(".git").is_dir() {
        run_checked(
            runner,
            &argv(["git", "-C", dir.as_str(), "pull", "--ff-only", "--quiet"]),
            None,
        )?;
    } else {
        if bucket.dir.exists() {
            return Err(Error::IoError(format!(
                "{} exists but is not a git checkout",
                bucket.dir.display()
            )));
        }
        run_checked(
            runner,
            &argv([
                "git",
                "clone",
                "--depth",
                "1",
                "--quiet",
                bucket.url.as_str(),
                dir.as_str(),
            ]),
            None,
        )?;
    }

    let head = run_checked(runner, &argv(["git", "-C", dir.as_str(), "rev-parse", "HEAD"]), None)?;
    if head.is_empty() {
        return Err(Error::ProcessError(format!(
            "git reported no HEAD for bucket {}",
            bucket.name
        )));
    }
    Ok(head)
}

fn sync_feed(
    bucket: &Bucket,
    paths: &Paths,
    downloader: &dyn Downloader,
    runner: &dyn ProcessRunner,
) -> Result<String> {
    let slot = cache_slot(&paths.cache_dir, &bucket.url);
    fs::create_dir_all(&slot)?;
    let snapshot = downloader.fetch(&bucket.url, &slot, true)?;
    let revision = compute_file(&snapshot, ChecksumType::Sha256)?;

    let staging = tempfile::Builder::new()
        .prefix(&format!(".{}-", bucket.name))
        .tempdir_in(&paths.buckets_dir)
        .map_err(|e| Error::IoError(format!("Failed to create staging directory: {}", e)))?;

    let handle = ArchiveHandle::open(&snapshot)?;
    Dispatcher::new(runner).extract(handle, staging.path(), &mut |_| true)?;

    if !staging.path().join("bucket").is_dir() {
        return Err(Error::malformed(
            format!("snapshot of bucket {}", bucket.name),
            "no bucket/ directory",
        ));
    }

    for warning in swap_into_place(staging.path(), &bucket.dir)? {
        debug!("{}", warning);
    }
    Ok(revision)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::BucketEntry;
    use crate::process::ProcessOutput;
    use flate2::Compression as GzLevel;
    use flate2::write::GzEncoder;
    use std::cell::RefCell;
    use std::path::{Path, PathBuf};
    use tempfile::tempdir;

    struct ScriptedGit {
        calls: RefCell<Vec<Vec<String>>>,
    }

    impl ProcessRunner for ScriptedGit {
        fn run(&self, argv: &[String], _env: &[(String, String)], _cwd: Option<&Path>) -> Result<ProcessOutput> {
            self.calls.borrow_mut().push(argv.to_vec());
            if argv.iter().any(|a| a == "clone") {
                let target = PathBuf::from(&argv[argv.len() - 1]);
                fs::create_dir_all(target.join(".git")).unwrap();
                fs::create_dir_all(target.join("bucket")).unwrap();
            }
            let stdout = if argv.iter().any(|a| a == "rev-parse") {
                "abc123\n".to_string()
            } else {
                String::new()
            };
            Ok(ProcessOutput { code: 0, stdout })
        }

        fn run_attached(&self, _argv: &[String], _env: &[(String, String)], _cwd: Option<&Path>) -> Result<i32> {
            Ok(0)
        }
    }

    struct LocalFile(PathBuf);

    impl Downloader for LocalFile {
        fn fetch(&self, _url: &str, dest_dir: &Path, _overwrite: bool) -> Result<PathBuf> {
            let target = dest_dir.join(self.0.file_name().unwrap());
            fs::copy(&self.0, &target)?;
            Ok(target)
        }
    }

    fn snapshot(path: &Path) {
        let file = fs::File::create(path).unwrap();
        let mut builder = tar::Builder::new(GzEncoder::new(file, GzLevel::default()));
        let doc: &[u8] = br#"{"version": "1.0.0", "url": "https://example.com/a.zip"}"#;
        for (name, data) in [("main-master/bucket/a.json", doc), ("main-master/README.md", &b"main"[..])] {
            let mut header = tar::Header::new_gnu();
            header.set_size(data.len() as u64);
            header.set_mode(0o644);
            header.set_cksum();
            builder.append_data(&mut header, name, data).unwrap();
        }
        builder.into_inner().unwrap().finish().unwrap();
    }

    #[test]
    fn test_git_clone_then_pull() {
        let dir = tempdir().unwrap();
        let paths = Paths::new(dir.path());
        let entry = BucketEntry::new("main", "https://example.com/main.git");
        let runner = ScriptedGit {
            calls: RefCell::new(Vec::new()),
        };
        let downloader = LocalFile(PathBuf::new());

        let bucket = Bucket::from_entry(&entry, &paths.buckets_dir);
        let state = sync_bucket(&bucket, &paths, &downloader, &runner).unwrap();
        assert_eq!(state.revision.as_deref(), Some("abc123"));
        assert!(state.is_synced());

        let bucket = Bucket::from_entry(&entry, &paths.buckets_dir);
        assert_eq!(bucket.sync_state, state);
        sync_bucket(&bucket, &paths, &downloader, &runner).unwrap();

        let calls = runner.calls.borrow();
        assert!(calls[0].contains(&"clone".to_string()));
        assert!(calls[0].contains(&"--depth".to_string()));
        assert!(calls[2].contains(&"--ff-only".to_string()));
    }

    #[test]
    fn test_feed_snapshot_replaces_checkout() {
        let dir = tempdir().unwrap();
        let paths = Paths::new(dir.path().join("root"));
        let archive = dir.path().join("main.tar.gz");
        snapshot(&archive);

        let mut entry = BucketEntry::new("main", "https://example.com/main.tar.gz");
        entry.mode = ObserveMode::Feed;
        let bucket = Bucket::from_entry(&entry, &paths.buckets_dir);
        fs::create_dir_all(bucket.dir.join("bucket")).unwrap();
        fs::write(bucket.dir.join("bucket/stale.json"), "{}").unwrap();

        let runner = ScriptedGit {
            calls: RefCell::new(Vec::new()),
        };
        let state = sync_bucket(&bucket, &paths, &LocalFile(archive.clone()), &runner).unwrap();

        assert_eq!(
            state.revision,
            Some(compute_file(&archive, ChecksumType::Sha256).unwrap())
        );
        assert!(bucket.document_path("a").is_file());
        assert!(!bucket.document_path("stale").exists());
        assert!(runner.calls.borrow().is_empty());
    }
}
