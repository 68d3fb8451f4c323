// src/download.rs

//! Artifact downloads
//!
//! `Downloader` is the seam the install transaction and bucket sync fetch
//! through. `HttpDownloader` is the blocking HTTP implementation with a
//! bounded transport retry loop.

use crate::error::{Error, Result};
use crate::progress::Progress;
use reqwest::blocking::Client;
use reqwest::header::CONTENT_DISPOSITION;
use sha2::{Digest, Sha256};
use std::fs::{self, File};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Default timeout for HTTP requests
const HTTP_TIMEOUT: Duration = Duration::from_secs(30);

/// Maximum retry attempts for failed transfers
const MAX_RETRIES: u32 = 3;

/// Delay between retries (in milliseconds), multiplied by the attempt number
const RETRY_DELAY_MS: u64 = 1000;

/// Bytes per read from the response body
const CHUNK_SIZE: usize = 64 * 1024;

/// Suffix of files being written
pub const PARTIAL_SUFFIX: &str = ".part";

/// Fetches a URL into a directory
pub trait Downloader {
    /// Download `url` into `dest_dir`, returning the written file
    ///
    /// The file name comes from a `Content-Disposition` header when present,
    /// else from the URL path. An existing file is replaced only when
    /// `overwrite` is set; otherwise it is returned as is.
    fn fetch(&self, url: &str, dest_dir: &Path, overwrite: bool) -> Result<PathBuf>;

    /// Counters updated while fetching, if the implementation reports progress
    fn progress(&self) -> Option<Arc<Progress>> {
        None
    }
}

/// Blocking HTTP downloader
pub struct HttpDownloader {
    client: Client,
    max_retries: u32,
    progress: Arc<Progress>,
    cancel: Arc<AtomicBool>,
}

impl HttpDownloader {
    pub fn new() -> Result<Self> {
        let client = Client::builder()
            .timeout(HTTP_TIMEOUT)
            .user_agent(concat!("haul/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| Error::DownloadError(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            client,
            max_retries: MAX_RETRIES,
            progress: Progress::new(),
            cancel: Arc::new(AtomicBool::new(false)),
        })
    }

    /// Share a cancellation flag checked between chunks
    pub fn with_cancel(mut self, cancel: Arc<AtomicBool>) -> Self {
        self.cancel = cancel;
        self
    }

    fn fetch_once(&self, url: &str, dest_dir: &Path, overwrite: bool) -> Result<PathBuf> {
        let mut response = self
            .client
            .get(url)
            .send()
            .map_err(|e| Error::DownloadError(format!("Failed to request {}: {}", url, e)))?;

        if !response.status().is_success() {
            return Err(Error::DownloadError(format!(
                "HTTP {} from {}",
                response.status(),
                url
            )));
        }

        let file_name = response
            .headers()
            .get(CONTENT_DISPOSITION)
            .and_then(|v| v.to_str().ok())
            .and_then(file_name_from_disposition)
            .or_else(|| file_name_from_url(url))
            .ok_or_else(|| Error::DownloadError(format!("Cannot derive a file name from {}", url)))?;

        let dest = dest_dir.join(&file_name);
        if dest.exists() && !overwrite {
            debug!("{} already present, not overwriting", dest.display());
            return Ok(dest);
        }

        self.progress.reset();
        if let Some(length) = response.content_length() {
            self.progress.set_total(length);
        }

        self.stream_to(&mut response, dest_dir, &file_name, url)?;
        info!("Downloaded {} to {}", url, dest.display());
        Ok(dest)
    }

    /// Copy `body` chunk by chunk into `<file_name>.part`, then rename it
    ///
    /// The partial file is removed on every failure, cancellation included.
    fn stream_to(
        &self,
        body: &mut dyn Read,
        dest_dir: &Path,
        file_name: &str,
        url: &str,
    ) -> Result<PathBuf> {
        let dest = dest_dir.join(file_name);
        let (partial, mut file) =
            PartialFile::create(dest_dir.join(format!("{}{}", file_name, PARTIAL_SUFFIX)))?;

        let mut buffer = vec![0u8; CHUNK_SIZE];
        loop {
            if self.cancel.load(Ordering::Relaxed) {
                debug!("Download of {} cancelled", url);
                return Err(Error::Cancelled);
            }

            let read = body
                .read(&mut buffer)
                .map_err(|e| Error::DownloadError(format!("Failed to read {}: {}", url, e)))?;
            if read == 0 {
                break;
            }
            file.write_all(&buffer[..read]).map_err(|e| {
                Error::IoError(format!("Failed to write downloaded data: {}", e))
            })?;
            self.progress.advance(read as u64);
        }
        file.sync_all()?;
        drop(file);

        partial.persist(&dest)?;
        Ok(dest)
    }
}

/// A `.part` file that is deleted on drop unless persisted
struct PartialFile {
    path: PathBuf,
    keep: bool,
}

impl PartialFile {
    fn create(path: PathBuf) -> Result<(Self, File)> {
        let file = File::create(&path).map_err(|e| {
            Error::IoError(format!("Failed to create file {}: {}", path.display(), e))
        })?;
        Ok((Self { path, keep: false }, file))
    }

    fn persist(mut self, dest: &Path) -> Result<()> {
        fs::rename(&self.path, dest).map_err(|e| {
            Error::IoError(format!(
                "Failed to move {} to {}: {}",
                self.path.display(),
                dest.display(),
                e
            ))
        })?;
        self.keep = true;
        Ok(())
    }
}

impl Drop for PartialFile {
    fn drop(&mut self) {
        if !self.keep {
            if let Err(e) = fs::remove_file(&self.path) {
                debug!("Could not remove {}: {}", self.path.display(), e);
            }
        }
    }
}

impl Downloader for HttpDownloader {
    fn fetch(&self, url: &str, dest_dir: &Path, overwrite: bool) -> Result<PathBuf> {
        fs::create_dir_all(dest_dir).map_err(|e| {
            Error::IoError(format!("Failed to create directory {}: {}", dest_dir.display(), e))
        })?;

        let mut attempt = 0;
        loop {
            attempt += 1;
            match self.fetch_once(url, dest_dir, overwrite) {
                Ok(path) => return Ok(path),
                Err(Error::DownloadError(e)) if attempt < self.max_retries => {
                    warn!("Download attempt {} failed: {}, retrying...", attempt, e);
                    std::thread::sleep(Duration::from_millis(RETRY_DELAY_MS * attempt as u64));
                }
                Err(Error::DownloadError(e)) => {
                    return Err(Error::DownloadError(format!(
                        "Failed to download after {} attempts: {}",
                        attempt, e
                    )));
                }
                Err(e) => return Err(e),
            }
        }
    }

    fn progress(&self) -> Option<Arc<Progress>> {
        Some(Arc::clone(&self.progress))
    }
}

/// Per-URL directory inside the download cache
///
/// Servers may name the file through `Content-Disposition`, so lookups
/// cannot rely on the URL's last segment. Every artifact fetched from `url`
/// lands in this directory instead, keyed by a digest of the URL.
pub fn cache_slot(cache_dir: &Path, url: &str) -> PathBuf {
    let digest = format!("{:x}", Sha256::digest(url.as_bytes()));
    cache_dir.join(&digest[..16])
}

/// Last path segment of a URL, percent-decoded; query and fragment ignored
pub fn file_name_from_url(url: &str) -> Option<String> {
    let parsed = reqwest::Url::parse(url).ok()?;
    let segment = parsed.path_segments()?.rfind(|s| !s.is_empty())?;
    let decoded = percent_decode(segment);
    sanitize(&decoded)
}

/// `filename*=UTF-8''...` or `filename="..."` from a Content-Disposition value
pub fn file_name_from_disposition(value: &str) -> Option<String> {
    let mut plain = None;
    for part in value.split(';').map(str::trim) {
        let Some((key, raw)) = part.split_once('=') else {
            continue;
        };
        match key.trim().to_ascii_lowercase().as_str() {
            "filename*" => {
                let encoded = raw.trim().trim_matches('"');
                let encoded = encoded.rsplit_once('\'').map(|(_, v)| v).unwrap_or(encoded);
                if let Some(name) = sanitize(&percent_decode(encoded)) {
                    return Some(name);
                }
            }
            "filename" => plain = sanitize(raw.trim().trim_matches('"')),
            _ => {}
        }
    }
    plain
}

/// Keep only the final component so a server cannot pick the directory
fn sanitize(name: &str) -> Option<String> {
    let name = name.rsplit(['/', '\\']).next()?.trim();
    if name.is_empty() || name == "." || name == ".." {
        None
    } else {
        Some(name.to_string())
    }
}

fn percent_decode(input: &str) -> String {
    let bytes = input.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' && i + 2 < bytes.len() {
            let hex = std::str::from_utf8(&bytes[i + 1..i + 3]).ok();
            if let Some(byte) = hex.and_then(|h| u8::from_str_radix(h, 16).ok()) {
                out.push(byte);
                i += 3;
                continue;
            }
        }
        out.push(bytes[i]);
        i += 1;
    }
    String::from_utf8_lossy(&out).into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;
    use tempfile::TempDir;

    /// Yields one chunk, then raises the shared cancel flag
    struct CancelAfterFirst {
        cancel: Arc<AtomicBool>,
        sent: bool,
    }

    impl Read for CancelAfterFirst {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            if self.sent {
                return Ok(0);
            }
            self.sent = true;
            self.cancel.store(true, Ordering::Relaxed);
            buf[..4].copy_from_slice(b"data");
            Ok(4)
        }
    }

    /// Yields one chunk, then fails like a dropped connection
    struct BrokenBody {
        sent: bool,
    }

    impl Read for BrokenBody {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            if self.sent {
                return Err(io::Error::new(io::ErrorKind::ConnectionReset, "reset"));
            }
            self.sent = true;
            buf[..4].copy_from_slice(b"data");
            Ok(4)
        }
    }

    fn entries(dir: &Path) -> Vec<String> {
        let mut names: Vec<String> = fs::read_dir(dir)
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        names.sort();
        names
    }

    #[test]
    fn test_stream_to_writes_and_renames() {
        let temp = TempDir::new().unwrap();
        let downloader = HttpDownloader::new().unwrap();
        let mut body: &[u8] = b"payload bytes";

        let path = downloader
            .stream_to(&mut body, temp.path(), "tool.zip", "https://example.com/tool.zip")
            .unwrap();

        assert_eq!(path, temp.path().join("tool.zip"));
        assert_eq!(fs::read(&path).unwrap(), b"payload bytes");
        assert_eq!(entries(temp.path()), vec!["tool.zip"]);
        assert_eq!(downloader.progress.snapshot().0, 13);
    }

    #[test]
    fn test_cancel_between_chunks_removes_partial() {
        let temp = TempDir::new().unwrap();
        let cancel = Arc::new(AtomicBool::new(false));
        let downloader = HttpDownloader::new().unwrap().with_cancel(Arc::clone(&cancel));
        let mut body = CancelAfterFirst { cancel, sent: false };

        let result = downloader.stream_to(&mut body, temp.path(), "tool.zip", "https://example.com/tool.zip");

        assert!(matches!(result, Err(Error::Cancelled)));
        assert!(entries(temp.path()).is_empty());
    }

    #[test]
    fn test_read_error_removes_partial() {
        let temp = TempDir::new().unwrap();
        let downloader = HttpDownloader::new().unwrap();
        let mut body = BrokenBody { sent: false };

        let result = downloader.stream_to(&mut body, temp.path(), "tool.zip", "https://example.com/tool.zip");

        assert!(matches!(result, Err(Error::DownloadError(_))));
        assert!(entries(temp.path()).is_empty());
    }

    #[test]
    fn test_fetch_uses_disposition_name() {
        let mut server = mockito::Server::new();
        let mock = server
            .mock("GET", "/download/latest")
            .with_status(200)
            .with_header("content-disposition", r#"attachment; filename="tool-2.0.zip""#)
            .with_body("zip bytes")
            .create();
        let temp = TempDir::new().unwrap();
        let downloader = HttpDownloader::new().unwrap();

        let path = downloader
            .fetch(&format!("{}/download/latest", server.url()), temp.path(), true)
            .unwrap();

        mock.assert();
        assert_eq!(path, temp.path().join("tool-2.0.zip"));
        assert_eq!(fs::read(&path).unwrap(), b"zip bytes");
    }

    #[test]
    fn test_fetch_with_cancel_set_leaves_nothing() {
        let mut server = mockito::Server::new();
        let _mock = server
            .mock("GET", "/tool.zip")
            .with_status(200)
            .with_body("zip bytes")
            .create();
        let temp = TempDir::new().unwrap();
        let downloader = HttpDownloader::new()
            .unwrap()
            .with_cancel(Arc::new(AtomicBool::new(true)));

        let result = downloader.fetch(&format!("{}/tool.zip", server.url()), temp.path(), true);

        assert!(matches!(result, Err(Error::Cancelled)));
        assert!(entries(temp.path()).is_empty());
    }

    #[test]
    fn test_cache_slot_is_stable_per_url() {
        let cache = Path::new("/cache");
        let a = cache_slot(cache, "https://example.com/a.zip");
        assert_eq!(a, cache_slot(cache, "https://example.com/a.zip"));
        assert_ne!(a, cache_slot(cache, "https://example.com/b.zip"));
        assert_eq!(a.parent(), Some(cache));
        assert_eq!(a.file_name().unwrap().len(), 16);
    }

    #[test]
    fn test_file_name_from_url() {
        assert_eq!(
            file_name_from_url("https://dl.example.com/v1/go1.22.windows-amd64.zip?sig=abc#x"),
            Some("go1.22.windows-amd64.zip".to_string())
        );
        assert_eq!(
            file_name_from_url("https://example.com/files/my%20tool.tar.gz"),
            Some("my tool.tar.gz".to_string())
        );
        assert_eq!(file_name_from_url("https://example.com/"), None);
        assert_eq!(file_name_from_url("not a url"), None);
    }

    #[test]
    fn test_file_name_from_disposition() {
        assert_eq!(
            file_name_from_disposition(r#"attachment; filename="tool-1.0.zip""#),
            Some("tool-1.0.zip".to_string())
        );
        assert_eq!(
            file_name_from_disposition(
                r#"attachment; filename="fallback.zip"; filename*=UTF-8''r%C3%A9sum%C3%A9.zip"#
            ),
            Some("résumé.zip".to_string())
        );
        assert_eq!(
            file_name_from_disposition(r#"attachment; filename="../../etc/passwd""#),
            Some("passwd".to_string())
        );
        assert_eq!(file_name_from_disposition("inline"), None);
    }
}
