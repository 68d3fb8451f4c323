// src/checksum.rs

//! Artifact digests
//!
//! Bucket documents declare hashes as `ALGO:hex` or bare hex (SHA-256).

use crate::error::{Error, Result};
use sha2::{Digest, Sha256, Sha512};
use std::fmt;
use std::fs::File;
use std::io;
use std::path::Path;
use tracing::debug;

/// Checksum algorithm type
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChecksumType {
    /// SHA-256 (default for bare hex)
    Sha256,

    /// SHA-512
    Sha512,
}

impl ChecksumType {
    pub fn as_str(&self) -> &str {
        match self {
            ChecksumType::Sha256 => "SHA256",
            ChecksumType::Sha512 => "SHA512",
        }
    }
}

/// A declared digest
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Checksum {
    pub algorithm: ChecksumType,
    /// Lowercase hex
    pub hex: String,
}

impl Checksum {
    /// Parse `SHA256:abcd...`, `sha512:...`, or bare hex
    pub fn parse(declared: &str) -> Result<Self> {
        let declared = declared.trim();
        let (algorithm, hex) = match declared.split_once(':') {
            Some((algo, hex)) => {
                let algorithm = match algo.to_ascii_uppercase().as_str() {
                    "SHA256" => ChecksumType::Sha256,
                    "SHA512" => ChecksumType::Sha512,
                    other => {
                        return Err(Error::Unsupported(format!(
                            "hash algorithm '{}'",
                            other
                        )));
                    }
                };
                (algorithm, hex)
            }
            None => (ChecksumType::Sha256, declared),
        };

        if hex.is_empty() || !hex.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(Error::malformed("hash", format!("'{}' is not hex", declared)));
        }

        Ok(Self {
            algorithm,
            hex: hex.to_ascii_lowercase(),
        })
    }

    /// Hash a file with the same algorithm as `self`
    pub fn compute(&self, path: &Path) -> Result<String> {
        compute_file(path, self.algorithm)
    }

    /// Compute the file's digest and compare it to `self`
    pub fn matches(&self, path: &Path) -> Result<bool> {
        let actual = self.compute(path)?;
        Ok(actual == self.hex)
    }

    /// Verify file checksum, returning `Unverified` on mismatch
    pub fn verify(&self, path: &Path) -> Result<()> {
        debug!("Verifying checksum for {}", path.display());

        let actual = self.compute(path)?;
        if actual != self.hex {
            return Err(Error::Unverified {
                path: path.to_path_buf(),
                expected: self.to_string(),
                actual: format!("{}:{}", self.algorithm.as_str(), actual),
            });
        }

        debug!("Checksum verified: {}", self);
        Ok(())
    }
}

impl fmt::Display for Checksum {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.algorithm.as_str(), self.hex)
    }
}

/// Hash a file's contents
pub fn compute_file(path: &Path, algorithm: ChecksumType) -> Result<String> {
    let mut file = File::open(path).map_err(|e| {
        Error::IoError(format!("Failed to open {} for checksum: {}", path.display(), e))
    })?;

    let digest = match algorithm {
        ChecksumType::Sha256 => {
            let mut hasher = Sha256::new();
            io::copy(&mut file, &mut hasher)?;
            format!("{:x}", hasher.finalize())
        }
        ChecksumType::Sha512 => {
            let mut hasher = Sha512::new();
            io::copy(&mut file, &mut hasher)?;
            format!("{:x}", hasher.finalize())
        }
    };

    Ok(digest)
}
