//! Semantic application versions

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

use super::ManifestError;

/// `major.minor.patch[-prerelease]`, optionally written with a `v` prefix
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Version {
    pub major: u32,
    pub minor: u32,
    pub patch: u32,
    pub prerelease: Option<String>,
}

impl Version {
    /// Create a new version
    pub fn new(major: u32, minor: u32, patch: u32) -> Self {
        Self {
            major,
            minor,
            patch,
            prerelease: None,
        }
    }

    /// Create a version with prerelease tag
    pub fn with_prerelease(
        major: u32,
        minor: u32,
        patch: u32,
        prerelease: impl Into<String>,
    ) -> Self {
        Self {
            major,
            minor,
            patch,
            prerelease: Some(prerelease.into()),
        }
    }

    /// Parse version from string (e.g., "1.2.3", "v1.2.3" or "1.2.3-beta.1")
    pub fn parse(s: &str) -> Result<Self, ManifestError> {
        let trimmed = s.trim();
        let s = trimmed.strip_prefix('v').unwrap_or(trimmed);

        let (version_part, prerelease) = match s.split_once('-') {
            Some((_, "")) => {
                return Err(ManifestError::InvalidVersion(format!(
                    "Empty prerelease tag in {}",
                    trimmed
                )))
            }
            Some((version, pre)) => (version, Some(pre.to_string())),
            None => (s, None),
        };

        let parts: Vec<&str> = version_part.split('.').collect();
        if parts.len() != 3 {
            return Err(ManifestError::InvalidVersion(format!(
                "Expected 3 version components in {}, got {}",
                trimmed,
                parts.len()
            )));
        }

        let component = |name: &str, value: &str| {
            value.parse::<u32>().map_err(|_| {
                ManifestError::InvalidVersion(format!("Invalid {} version: {}", name, value))
            })
        };

        Ok(Self {
            major: component("major", parts[0])?,
            minor: component("minor", parts[1])?,
            patch: component("patch", parts[2])?,
            prerelease,
        })
    }

    pub fn is_prerelease(&self) -> bool {
        self.prerelease.is_some()
    }
}

impl std::fmt::Display for Version {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if let Some(ref pre) = self.prerelease {
            write!(f, "{}.{}.{}-{}", self.major, self.minor, self.patch, pre)
        } else {
            write!(f, "{}.{}.{}", self.major, self.minor, self.patch)
        }
    }
}

impl std::str::FromStr for Version {
    type Err = ManifestError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for Version {
    type Error = ManifestError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        Self::parse(&s)
    }
}

impl From<Version> for String {
    fn from(version: Version) -> Self {
        version.to_string()
    }
}

impl PartialOrd for Version {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Version {
    fn cmp(&self, other: &Self) -> Ordering {
        self.major
            .cmp(&other.major)
            .then(self.minor.cmp(&other.minor))
            .then(self.patch.cmp(&other.patch))
            // Prerelease versions are less than release versions
            .then_with(|| match (&self.prerelease, &other.prerelease) {
                (None, None) => Ordering::Equal,
                (Some(_), None) => Ordering::Less,
                (None, Some(_)) => Ordering::Greater,
                (Some(a), Some(b)) => a.cmp(b),
            })
    }
}
