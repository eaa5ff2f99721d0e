//! Lenient semver parsing for implementation selection.
//!
//! Registrations carry free-form version strings. Selection strategies only
//! need a total order over the numeric triple, so parsing is forgiving: a
//! segment's trailing non-digits are dropped (`"2-beta"` parses as 2),
//! missing segments are zero, and garbage collapses to `0.0.0`.

use std::cmp::Ordering;
use std::fmt;

use serde::{Deserialize, Serialize};

/// A comparable version triple with pre-release awareness.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Version {
    raw: String,
}

impl Version {
    pub fn new(raw: impl Into<String>) -> Self {
        Self { raw: raw.into() }
    }

    /// The original version string as registered.
    pub fn as_str(&self) -> &str {
        &self.raw
    }

    /// The numeric (major, minor, patch) triple.
    pub fn triple(&self) -> (u64, u64, u64) {
        let mut nums = [0u64; 3];
        for (i, seg) in self.raw.split('.').take(3).enumerate() {
            let digits: String = seg.chars().take_while(|c| c.is_ascii_digit()).collect();
            nums[i] = digits.parse().unwrap_or(0);
        }
        (nums[0], nums[1], nums[2])
    }

    /// True when the version carries a pre-release tag (`1.2.0-rc.1`,
    /// `0.9.0-alpha`). The `stable` strategy excludes these.
    pub fn is_prerelease(&self) -> bool {
        self.raw.contains('-')
    }
}

impl PartialOrd for Version {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Version {
    fn cmp(&self, other: &Self) -> Ordering {
        // Raw-string tiebreak keeps the order consistent with `Eq`.
        self.triple()
            .cmp(&other.triple())
            .then_with(|| self.raw.cmp(&other.raw))
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.raw)
    }
}

impl From<&str> for Version {
    fn from(v: &str) -> Self {
        Version::new(v)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn triples() {
        assert_eq!(Version::new("1.2.3").triple(), (1, 2, 3));
        assert_eq!(Version::new("2.0").triple(), (2, 0, 0));
        assert_eq!(Version::new("").triple(), (0, 0, 0));
        assert_eq!(Version::new("3.1-beta.2").triple(), (3, 1, 0));
        assert_eq!(Version::new("junk").triple(), (0, 0, 0));
    }

    #[test]
    fn ordering() {
        assert!(Version::new("2.0.0") > Version::new("1.9.9"));
        assert!(Version::new("1.10.0") > Version::new("1.9.0"));
        assert_eq!(
            Version::new("1.0.0").triple(),
            Version::new("1.0").triple()
        );
        assert_eq!(
            Version::new("1.2.3").cmp(&Version::new("1.2.3")),
            Ordering::Equal
        );
    }

    #[test]
    fn prerelease_detection() {
        assert!(Version::new("1.0.0-rc.1").is_prerelease());
        assert!(!Version::new("1.0.0").is_prerelease());
    }
}
