// src/version.rs

//! Version parsing and ordering
//!
//! Versions come from untrusted bucket documents and from scraping external
//! tool output, so parsing never fails: any segment that cannot be read
//! parses as zero.
//!
//! Accepted shape: `[v]MAJOR.MINOR.PATCH[-PRERELEASE[.NUMBER]][+BUILD]`.

use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

/// Pre-release tag, ordered `Alpha < Beta < Rc < Final`
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum PreRelease {
    Alpha,
    Beta,
    Rc,
    Final,
}

impl PreRelease {
    fn from_tag(tag: &str) -> Self {
        let tag = tag.to_ascii_lowercase();
        if tag.starts_with("rc") || tag.starts_with("pre") {
            PreRelease::Rc
        } else if tag.starts_with('b') {
            PreRelease::Beta
        } else {
            // "alpha", "a1", "dev", and anything unrecognized all sort before beta
            PreRelease::Alpha
        }
    }
}

/// A parsed version tuple
///
/// Field order is the comparison order, so the derived `Ord` is the
/// lexicographic tuple comparison.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Version {
    pub major: u64,
    pub minor: u64,
    pub patch: u64,
    pub pre: PreRelease,
    pub pre_number: u64,
}

impl Version {
    /// Parse a version string. Total over all inputs.
    pub fn parse(input: &str) -> Self {
        let trimmed = input.trim();
        let trimmed = trimmed
            .strip_prefix('v')
            .or_else(|| trimmed.strip_prefix('V'))
            .unwrap_or(trimmed);
        let trimmed = trimmed.split('+').next().unwrap_or_default();

        let (core, pre) = match trimmed.split_once('-') {
            Some((core, pre)) => (core, Some(pre)),
            None => (trimmed, None),
        };

        let mut segments = core.split('.').map(leading_number);
        let major = segments.next().unwrap_or(0);
        let minor = segments.next().unwrap_or(0);
        let patch = segments.next().unwrap_or(0);

        let (pre, pre_number) = match pre {
            None => (PreRelease::Final, 0),
            Some(pre) => {
                let (tag, number) = match pre.split_once('.') {
                    Some((tag, number)) => (tag, leading_number(number)),
                    // "rc1" carries its number inline
                    None => (pre, trailing_number(pre)),
                };
                (PreRelease::from_tag(tag), number)
            }
        };

        Self {
            major,
            minor,
            patch,
            pre,
            pre_number,
        }
    }
}

impl FromStr for Version {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Ok(Version::parse(s))
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)?;
        let tag = match self.pre {
            PreRelease::Final => return Ok(()),
            PreRelease::Alpha => "alpha",
            PreRelease::Beta => "beta",
            PreRelease::Rc => "rc",
        };
        write!(f, "-{}", tag)?;
        if self.pre_number > 0 {
            write!(f, ".{}", self.pre_number)?;
        }
        Ok(())
    }
}

/// Compare two version strings
pub fn compare(a: &str, b: &str) -> Ordering {
    Version::parse(a).cmp(&Version::parse(b))
}

/// True if `candidate` is strictly newer than `current`
pub fn is_newer(current: &str, candidate: &str) -> bool {
    compare(candidate, current) == Ordering::Greater
}

fn leading_number(segment: &str) -> u64 {
    let digits: String = segment
        .trim()
        .chars()
        .take_while(|c| c.is_ascii_digit())
        .collect();
    digits.parse().unwrap_or(0)
}

fn trailing_number(segment: &str) -> u64 {
    let start = segment
        .rfind(|c: char| !c.is_ascii_digit())
        .map(|i| i + 1)
        .unwrap_or(0);
    segment[start..].parse().unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_numeric_ordering() {
        assert_eq!(compare("1.35.0", "1.2.0"), Ordering::Greater);
        assert_eq!(compare("0.10.4", "0.11.5"), Ordering::Less);
        assert_eq!(compare("2.0", "2.0.0"), Ordering::Equal);
    }

    #[test]
    fn test_prerelease_ordering() {
        assert!(compare("2.0.0-rc.1", "2.0.0") == Ordering::Less);
        assert!(compare("2.0.0-alpha", "2.0.0-beta") == Ordering::Less);
        assert!(compare("2.0.0-beta", "2.0.0-rc") == Ordering::Less);
        assert!(compare("2.0.0-rc", "2.0.0") == Ordering::Less);
        assert!(compare("2.0.0-rc.2", "2.0.0-rc.10") == Ordering::Less);
        assert_eq!(compare("2.0.0-rc3", "2.0.0-rc.3"), Ordering::Equal);
    }

    #[test]
    fn test_leading_v_is_ignored() {
        assert_eq!(compare("v1.2.3", "1.2.3"), Ordering::Equal);
        assert_eq!(compare("V1.2.3", "1.2.3"), Ordering::Equal);
    }

    #[test]
    fn test_garbage_degrades_to_zero() {
        assert_eq!(Version::parse("garbage"), Version::parse("0.0.0"));
        assert_eq!(compare("garbage", "1.0.0"), Ordering::Less);
        assert_eq!(compare("", "0"), Ordering::Equal);
        assert_eq!(Version::parse("1.x.3").minor, 0);
    }

    #[test]
    fn test_comparison_is_antisymmetric() {
        let samples = [
            "1.0.0", "1.0.0-rc.1", "v2", "2.0.0-beta", "garbage", "", "1.2.3+build.7", "10.0",
        ];
        for a in samples {
            assert_eq!(compare(a, a), Ordering::Equal);
            for b in samples {
                assert_eq!(compare(a, b), compare(b, a).reverse(), "{a} vs {b}");
            }
        }
    }

    #[test]
    fn test_build_metadata_is_ignored() {
        assert_eq!(compare("1.2.3+abc", "1.2.3"), Ordering::Equal);
    }

    #[test]
    fn test_is_newer() {
        assert!(is_newer("1.1.0", "1.2.0"));
        assert!(!is_newer("1.2.0", "1.2.0"));
        assert!(!is_newer("1.2.0", "1.2.0-rc.1"));
    }

    #[test]
    fn test_display() {
        assert_eq!(Version::parse("v1.2").to_string(), "1.2.0");
        assert_eq!(Version::parse("3.0.0-rc.2").to_string(), "3.0.0-rc.2");
    }
}
