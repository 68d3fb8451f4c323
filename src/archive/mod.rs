// src/archive/mod.rs

//! Archive format detection and extraction dispatch
//!
//! Formats are identified by their leading bytes, never by file extension.
//! A file with no recognized magic is checked for an appended zip (a
//! self-extracting executable) by locating the end-of-central-directory
//! record from the end of the file; failing that it is a bare executable.

mod flatten;
mod installer;
mod tarball;
mod zipfile;

pub use flatten::flatten;
pub use zipfile::OffsetReader;

use crate::error::{Error, Result};
use crate::process::ProcessRunner;
use std::fmt;
use std::fs::{self, File};
use std::io::{self, BufReader, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Called with each entry's path before it is written; returning false cancels
pub type EntryCallback<'a> = &'a mut dyn FnMut(&Path) -> bool;

/// Bytes read from the head of a file for sniffing
const SNIFF_LEN: usize = 512;

/// Fixed part of the zip end-of-central-directory record
const EOCD_LEN: usize = 22;

/// Largest zip archive comment
const MAX_COMMENT_LEN: usize = 65535;

const ZIP_LOCAL_HEADER: &[u8] = b"PK\x03\x04";
const ZIP_EMPTY: &[u8] = b"PK\x05\x06";
const ZIP_SPANNED: &[u8] = b"PK\x07\x08";
const ZIP_EOCD: &[u8] = b"PK\x05\x06";
const ZIP_CENTRAL_HEADER: &[u8] = b"PK\x01\x02";
const GZIP_MAGIC: &[u8] = &[0x1f, 0x8b];
const BZIP2_MAGIC: &[u8] = b"BZh";
const XZ_MAGIC: &[u8] = &[0xfd, 0x37, 0x7a, 0x58, 0x5a, 0x00];
const ZSTD_MAGIC: &[u8] = &[0x28, 0xb5, 0x2f, 0xfd];
const AR_MAGIC: &[u8] = b"!<arch>\n";
const OLE_MAGIC: &[u8] = &[0xd0, 0xcf, 0x11, 0xe0, 0xa1, 0xb1, 0x1a, 0xe1];
const SEVEN_ZIP_MAGIC: &[u8] = &[0x37, 0x7a, 0xbc, 0xaf, 0x27, 0x1c];
const RAR_MAGIC: &[u8] = b"Rar!\x1a\x07";
const RPM_MAGIC: &[u8] = &[0xed, 0xab, 0xee, 0xdb];
const USTAR_OFFSET: usize = 257;
const USTAR_MAGIC: &[u8] = b"ustar";

/// Compression filter wrapped around a tar stream
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Compression {
    None,
    Gzip,
    Bzip2,
    Xz,
    Zstd,
}

impl Compression {
    /// Identify a compression filter from leading bytes
    pub fn from_magic(head: &[u8]) -> Option<Self> {
        if head.starts_with(GZIP_MAGIC) {
            Some(Compression::Gzip)
        } else if head.starts_with(BZIP2_MAGIC) {
            Some(Compression::Bzip2)
        } else if head.starts_with(XZ_MAGIC) {
            Some(Compression::Xz)
        } else if head.starts_with(ZSTD_MAGIC) {
            Some(Compression::Zstd)
        } else {
            None
        }
    }

    /// Wrap `reader` in the matching decoder
    pub fn decoder<'r, R: Read + 'r>(&self, reader: R) -> Result<Box<dyn Read + 'r>> {
        Ok(match self {
            Compression::None => Box::new(reader),
            Compression::Gzip => Box::new(flate2::read::GzDecoder::new(reader)),
            Compression::Bzip2 => Box::new(bzip2::read::BzDecoder::new(reader)),
            Compression::Xz => Box::new(xz2::read::XzDecoder::new(reader)),
            Compression::Zstd => Box::new(zstd::stream::read::Decoder::new(reader)?),
        })
    }
}

/// Detected container format
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArchiveFormat {
    Zip,
    Tar(Compression),
    /// Debian package (ar container holding `data.tar.*`)
    Deb,
    /// Windows Installer / OLE compound document
    Msi,
    /// Nothing detected; installed as a single program file
    Executable,
}

impl fmt::Display for ArchiveFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ArchiveFormat::Zip => f.write_str("zip"),
            ArchiveFormat::Tar(Compression::None) => f.write_str("tar"),
            ArchiveFormat::Tar(Compression::Gzip) => f.write_str("tar.gz"),
            ArchiveFormat::Tar(Compression::Bzip2) => f.write_str("tar.bz2"),
            ArchiveFormat::Tar(Compression::Xz) => f.write_str("tar.xz"),
            ArchiveFormat::Tar(Compression::Zstd) => f.write_str("tar.zst"),
            ArchiveFormat::Deb => f.write_str("deb"),
            ArchiveFormat::Msi => f.write_str("msi"),
            ArchiveFormat::Executable => f.write_str("executable"),
        }
    }
}

/// A sniffed file, consumed by exactly one extraction
#[derive(Debug)]
pub struct ArchiveHandle {
    pub format: ArchiveFormat,
    /// Where the archive starts inside the file; nonzero for self-extractors
    pub base_offset: u64,
    pub path: PathBuf,
}

impl ArchiveHandle {
    pub fn open(path: &Path) -> Result<Self> {
        let (format, base_offset) = detect(path)?;
        debug!(
            "Detected {} at offset {} in {}",
            format,
            base_offset,
            path.display()
        );
        Ok(Self {
            format,
            base_offset,
            path: path.to_path_buf(),
        })
    }
}

/// Classify a file by content
pub fn detect(path: &Path) -> Result<(ArchiveFormat, u64)> {
    let mut file = File::open(path).map_err(|e| {
        Error::IoError(format!("Failed to open {}: {}", path.display(), e))
    })?;

    let mut head = Vec::with_capacity(SNIFF_LEN);
    (&mut file).take(SNIFF_LEN as u64).read_to_end(&mut head)?;

    if head.is_empty() {
        return Err(Error::Unsupported(format!("{} is empty", path.display())));
    }
    if head.starts_with(ZIP_LOCAL_HEADER) || head.starts_with(ZIP_EMPTY) || head.starts_with(ZIP_SPANNED) {
        return Ok((ArchiveFormat::Zip, 0));
    }
    if let Some(compression) = Compression::from_magic(&head) {
        return Ok((ArchiveFormat::Tar(compression), 0));
    }
    if head.get(USTAR_OFFSET..USTAR_OFFSET + USTAR_MAGIC.len()) == Some(USTAR_MAGIC) {
        return Ok((ArchiveFormat::Tar(Compression::None), 0));
    }
    if head.starts_with(AR_MAGIC) {
        return Ok((ArchiveFormat::Deb, 0));
    }
    if head.starts_with(OLE_MAGIC) {
        return Ok((ArchiveFormat::Msi, 0));
    }

    for (magic, name) in [(SEVEN_ZIP_MAGIC, "7z"), (RAR_MAGIC, "rar"), (RPM_MAGIC, "rpm")] {
        if head.starts_with(magic) {
            return Err(Error::Unsupported(format!(
                "{} archive {}",
                name,
                path.display()
            )));
        }
    }

    match find_zip_base(&mut file)? {
        Some(base) => Ok((ArchiveFormat::Zip, base)),
        None => Ok((ArchiveFormat::Executable, 0)),
    }
}

/// Locate an appended zip by its end-of-central-directory record
///
/// The record must end exactly at EOF (after its comment). Offsets already
/// counted from the start of the file (as `zip -A` writes them) give base 0;
/// otherwise the central directory it describes must lead back to a local
/// file header at the base.
fn find_zip_base<R: Read + Seek>(reader: &mut R) -> Result<Option<u64>> {
    let file_len = reader.seek(SeekFrom::End(0))?;
    if file_len < EOCD_LEN as u64 {
        return Ok(None);
    }

    let window_len = file_len.min((EOCD_LEN + MAX_COMMENT_LEN) as u64) as usize;
    let window_start = file_len - window_len as u64;
    reader.seek(SeekFrom::Start(window_start))?;
    let mut window = vec![0u8; window_len];
    reader.read_exact(&mut window)?;

    for i in (0..=window_len - EOCD_LEN).rev() {
        if &window[i..i + 4] != ZIP_EOCD {
            continue;
        }
        let comment_len = u16::from_le_bytes([window[i + 20], window[i + 21]]) as usize;
        if i + EOCD_LEN + comment_len != window_len {
            continue;
        }

        let cd_size = u32_le(&window[i + 12..i + 16]);
        let cd_offset = u32_le(&window[i + 16..i + 20]);
        let eocd_pos = window_start + i as u64;
        if cd_offset + cd_size == eocd_pos && starts_with_at(reader, cd_offset, ZIP_CENTRAL_HEADER)? {
            return Ok(Some(0));
        }
        let Some(base) = eocd_pos.checked_sub(cd_size + cd_offset) else {
            continue;
        };

        if starts_with_at(reader, base, ZIP_LOCAL_HEADER)? {
            return Ok(Some(base));
        }
    }

    Ok(None)
}

fn starts_with_at<R: Read + Seek>(reader: &mut R, offset: u64, magic: &[u8]) -> Result<bool> {
    let mut found = [0u8; 4];
    reader.seek(SeekFrom::Start(offset))?;
    match reader.read_exact(&mut found) {
        Ok(()) => Ok(found == magic),
        Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => Ok(false),
        Err(e) => Err(e.into()),
    }
}

fn u32_le(bytes: &[u8]) -> u64 {
    u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]) as u64
}

/// What an extraction produced
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExtractResult {
    pub format: ArchiveFormat,
    /// Entries written (0 when an external tool did the work)
    pub entries: usize,
    pub flattened: bool,
}

/// Routes a handle to the extraction strategy for its format
pub struct Dispatcher<'a> {
    runner: &'a dyn ProcessRunner,
}

impl<'a> Dispatcher<'a> {
    pub fn new(runner: &'a dyn ProcessRunner) -> Self {
        Self { runner }
    }

    /// Extract into `dest` without post-processing
    pub fn dispatch(
        &self,
        handle: ArchiveHandle,
        dest: &Path,
        progress: EntryCallback<'_>,
    ) -> Result<usize> {
        fs::create_dir_all(dest).map_err(|e| {
            Error::IoError(format!("Failed to create directory {}: {}", dest.display(), e))
        })?;

        match handle.format {
            ArchiveFormat::Zip => zipfile::unpack(&handle.path, handle.base_offset, dest, progress),
            ArchiveFormat::Tar(compression) => {
                let file = File::open(&handle.path)?;
                let reader = compression.decoder(BufReader::new(file))?;
                tarball::unpack(reader, dest, progress)
            }
            ArchiveFormat::Deb => installer::unpack_deb(&handle.path, dest, progress),
            ArchiveFormat::Msi => installer::unpack_msi(self.runner, &handle.path, dest, progress),
            ArchiveFormat::Executable => installer::copy_executable(&handle.path, dest, progress),
        }
    }

    /// Extract into `dest`, then flatten a lone wrapper directory
    pub fn extract(
        &self,
        handle: ArchiveHandle,
        dest: &Path,
        progress: EntryCallback<'_>,
    ) -> Result<ExtractResult> {
        let format = handle.format;
        let source = handle.path.clone();
        let entries = self.dispatch(handle, dest, progress)?;
        let flattened = flatten(dest)?;

        info!(
            "Extracted {} ({}, {} entries) into {}",
            source.display(),
            format,
            entries,
            dest.display()
        );
        Ok(ExtractResult {
            format,
            entries,
            flattened,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::process::{ProcessOutput, SystemRunner};
    use std::io::Write;
    use tempfile::tempdir;

    fn zip_bytes(files: &[(&str, &[u8])]) -> Vec<u8> {
        let mut cursor = io::Cursor::new(Vec::new());
        {
            let mut writer = zip::ZipWriter::new(&mut cursor);
            let options = zip::write::SimpleFileOptions::default();
            for (name, data) in files {
                writer.start_file(*name, options).unwrap();
                writer.write_all(data).unwrap();
            }
            writer.finish().unwrap();
        }
        cursor.into_inner()
    }

    fn tar_gz_bytes(files: &[(&str, &[u8])]) -> Vec<u8> {
        let encoder = flate2::write::GzEncoder::new(Vec::new(), flate2::Compression::default());
        let mut builder = tar::Builder::new(encoder);
        for (name, data) in files {
            let mut header = tar::Header::new_gnu();
            header.set_size(data.len() as u64);
            header.set_mode(0o644);
            header.set_cksum();
            builder.append_data(&mut header, name, *data).unwrap();
        }
        builder.into_inner().unwrap().finish().unwrap()
    }

    fn write(dir: &Path, name: &str, bytes: &[u8]) -> PathBuf {
        let path = dir.join(name);
        fs::write(&path, bytes).unwrap();
        path
    }

    #[test]
    fn test_detect_ignores_extension() {
        let dir = tempdir().unwrap();
        let zip = write(dir.path(), "archive.tar.gz", &zip_bytes(&[("a.txt", b"a")]));
        let tgz = write(dir.path(), "archive.zip", &tar_gz_bytes(&[("a.txt", b"a")]));
        let exe = write(dir.path(), "tool", b"#!/bin/sh\necho hi\n");

        assert_eq!(detect(&zip).unwrap(), (ArchiveFormat::Zip, 0));
        assert_eq!(detect(&tgz).unwrap(), (ArchiveFormat::Tar(Compression::Gzip), 0));
        assert_eq!(detect(&exe).unwrap(), (ArchiveFormat::Executable, 0));
    }

    #[test]
    fn test_detect_unsupported() {
        let dir = tempdir().unwrap();
        let empty = write(dir.path(), "empty", b"");
        let rar = write(dir.path(), "x.rar", b"Rar!\x1a\x07\x00rest");
        assert!(matches!(detect(&empty), Err(Error::Unsupported(_))));
        assert!(matches!(detect(&rar), Err(Error::Unsupported(_))));
    }

    #[test]
    fn test_self_extracting_zip_offset() {
        let dir = tempdir().unwrap();
        let prefix = vec![0x4du8; 1000];
        let mut bytes = prefix.clone();
        bytes.extend(zip_bytes(&[("payload/readme.txt", b"hello")]));
        let sfx = write(dir.path(), "setup.exe", &bytes);

        let handle = ArchiveHandle::open(&sfx).unwrap();
        assert_eq!(handle.format, ArchiveFormat::Zip);
        assert_eq!(handle.base_offset, prefix.len() as u64);

        let dest = dir.path().join("out");
        let runner = SystemRunner;
        let result = Dispatcher::new(&runner)
            .extract(handle, &dest, &mut |_| true)
            .unwrap();
        assert!(result.flattened);
        assert_eq!(fs::read(dest.join("readme.txt")).unwrap(), b"hello");
    }

    #[test]
    fn test_self_extractor_with_absolute_offsets() {
        let dir = tempdir().unwrap();
        let mut cursor = io::Cursor::new(vec![0x4du8; 1000]);
        cursor.seek(SeekFrom::End(0)).unwrap();
        {
            let mut writer = zip::ZipWriter::new(&mut cursor);
            writer
                .start_file("readme.txt", zip::write::SimpleFileOptions::default())
                .unwrap();
            writer.write_all(b"hello").unwrap();
            writer.finish().unwrap();
        }
        let sfx = write(dir.path(), "setup.exe", &cursor.into_inner());

        assert_eq!(detect(&sfx).unwrap(), (ArchiveFormat::Zip, 0));

        let dest = dir.path().join("out");
        let runner = SystemRunner;
        Dispatcher::new(&runner)
            .extract(ArchiveHandle::open(&sfx).unwrap(), &dest, &mut |_| true)
            .unwrap();
        assert_eq!(fs::read(dest.join("readme.txt")).unwrap(), b"hello");
    }

    #[test]
    fn test_tar_gz_extract_and_flatten() {
        let dir = tempdir().unwrap();
        let tgz = write(
            dir.path(),
            "tool.tgz",
            &tar_gz_bytes(&[("tool-1.0/bin/tool", b"bin"), ("tool-1.0/README", b"doc")]),
        );
        let dest = dir.path().join("out");
        let runner = SystemRunner;
        let mut seen = Vec::new();
        let result = Dispatcher::new(&runner)
            .extract(ArchiveHandle::open(&tgz).unwrap(), &dest, &mut |p| {
                seen.push(p.to_path_buf());
                true
            })
            .unwrap();

        assert_eq!(result.entries, 2);
        assert!(result.flattened);
        assert_eq!(seen.len(), 2);
        assert!(dest.join("bin/tool").is_file());
        assert!(dest.join("README").is_file());
    }

    #[test]
    fn test_progress_callback_cancels() {
        let dir = tempdir().unwrap();
        let zip = write(dir.path(), "a.zip", &zip_bytes(&[("a", b"1"), ("b", b"2")]));
        let runner = SystemRunner;
        let result = Dispatcher::new(&runner).dispatch(
            ArchiveHandle::open(&zip).unwrap(),
            &dir.path().join("out"),
            &mut |_| false,
        );
        assert!(matches!(result, Err(Error::Cancelled)));
    }

    struct RecordingRunner(std::cell::RefCell<Vec<Vec<String>>>);

    impl ProcessRunner for RecordingRunner {
        fn run(&self, argv: &[String], _env: &[(String, String)], _cwd: Option<&Path>) -> Result<ProcessOutput> {
            self.0.borrow_mut().push(argv.to_vec());
            Ok(ProcessOutput {
                code: 0,
                stdout: String::new(),
            })
        }

        fn run_attached(&self, _argv: &[String], _env: &[(String, String)], _cwd: Option<&Path>) -> Result<i32> {
            Ok(0)
        }
    }

    #[test]
    fn test_msi_is_delegated_to_runner() {
        let dir = tempdir().unwrap();
        let mut bytes = OLE_MAGIC.to_vec();
        bytes.extend([0u8; 64]);
        let msi = write(dir.path(), "setup.msi", &bytes);

        let runner = RecordingRunner(Default::default());
        Dispatcher::new(&runner)
            .dispatch(ArchiveHandle::open(&msi).unwrap(), &dir.path().join("out"), &mut |_| true)
            .unwrap();

        let calls = runner.0.borrow();
        assert_eq!(calls.len(), 1);
        assert!(calls[0].iter().any(|arg| arg.contains("setup.msi")));
    }
}
