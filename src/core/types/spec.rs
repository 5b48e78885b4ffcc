//! Update requests and their identity

use reqwest::Url;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

use super::digest::{Digest, DigestAlgorithm};

/// Errors raised while building an [`UpdateSpec`]
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SpecError {
    #[error("Invalid source URL '{url}': {reason}")]
    InvalidUrl { url: String, reason: String },

    #[error("Invalid destination key '{key}': {reason}")]
    InvalidKey { key: String, reason: String },

    #[error("Invalid digest '{value}': {reason}")]
    InvalidDigest { value: String, reason: String },

    #[error("No digest or size given; call allow_unverified() to fetch without integrity checks")]
    MissingIntegrity,
}

/// Identity of an artifact: names its staging and final files and keys the
/// coordinator's in-flight table.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ArtifactKey(String);

impl ArtifactKey {
    /// Suffix of staging files; keys may not end with it
    pub const STAGING_SUFFIX: &'static str = ".part";

    /// Validate a caller-supplied key
    pub fn new(key: impl Into<String>) -> Result<Self, SpecError> {
        let key = key.into();
        let invalid = |reason: &str| SpecError::InvalidKey {
            key: key.clone(),
            reason: reason.to_string(),
        };

        if key.is_empty() {
            return Err(invalid("key is empty"));
        }
        if key.len() > 200 {
            return Err(invalid("key is longer than 200 characters"));
        }
        if key.starts_with('.') {
            return Err(invalid("key may not start with '.'"));
        }
        if key.ends_with(Self::STAGING_SUFFIX) {
            return Err(invalid("key may not end with '.part'"));
        }
        if !key
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-'))
        {
            return Err(invalid("only [A-Za-z0-9._-] are allowed"));
        }

        Ok(Self(key))
    }

    /// Key derived from a source URL when no destination key is given
    pub fn from_url(url: &str) -> Self {
        let digest = Digest::of_bytes(DigestAlgorithm::Sha256, url.as_bytes());
        Self(format!("url-{}", &digest.hex()[..16]))
    }

    /// File name of the committed artifact
    pub fn final_file_name(&self) -> String {
        self.0.clone()
    }

    /// File name of the staging file
    pub fn staging_file_name(&self) -> String {
        format!("{}{}", self.0, Self::STAGING_SUFFIX)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ArtifactKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for ArtifactKey {
    type Error = SpecError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<ArtifactKey> for String {
    fn from(value: ArtifactKey) -> Self {
        value.0
    }
}

/// Immutable description of one artifact to fetch.
///
/// Deserialized specs pass the same checks as [`UpdateSpecBuilder::build`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "UpdateSpecRecord")]
pub struct UpdateSpec {
    source_url: String,
    expected_digest: Option<Digest>,
    expected_size: Option<u64>,
    key: ArtifactKey,
    allow_unverified: bool,
}

impl UpdateSpec {
    /// Start building a spec for `source_url`
    pub fn builder(source_url: impl Into<String>) -> UpdateSpecBuilder {
        UpdateSpecBuilder {
            source_url: source_url.into(),
            expected_digest: None,
            expected_size: None,
            destination_key: None,
            allow_unverified: false,
        }
    }

    pub fn source_url(&self) -> &str {
        &self.source_url
    }

    pub fn expected_digest(&self) -> Option<&Digest> {
        self.expected_digest.as_ref()
    }

    pub fn expected_size(&self) -> Option<u64> {
        self.expected_size
    }

    pub fn key(&self) -> &ArtifactKey {
        &self.key
    }

    /// Whether the caller opted out of integrity checks
    pub fn is_unverified(&self) -> bool {
        self.expected_digest.is_none() && self.expected_size.is_none()
    }
}

/// Builder for [`UpdateSpec`]
#[derive(Debug, Clone)]
pub struct UpdateSpecBuilder {
    source_url: String,
    expected_digest: Option<String>,
    expected_size: Option<u64>,
    destination_key: Option<String>,
    allow_unverified: bool,
}

impl UpdateSpecBuilder {
    /// Expected digest, `algo:hex` or bare sha256 hex
    pub fn digest(mut self, digest: impl Into<String>) -> Self {
        self.expected_digest = Some(digest.into());
        self
    }

    pub fn size(mut self, size: u64) -> Self {
        self.expected_size = Some(size);
        self
    }

    pub fn destination_key(mut self, key: impl Into<String>) -> Self {
        self.destination_key = Some(key.into());
        self
    }

    /// Accept an artifact with neither digest nor size
    pub fn allow_unverified(mut self) -> Self {
        self.allow_unverified = true;
        self
    }

    pub fn build(self) -> Result<UpdateSpec, SpecError> {
        let expected_digest = self.expected_digest.as_deref().map(Digest::parse).transpose()?;
        let key = self.destination_key.map(ArtifactKey::new).transpose()?;

        UpdateSpecRecord {
            source_url: self.source_url,
            expected_digest,
            expected_size: self.expected_size,
            key,
            allow_unverified: self.allow_unverified,
        }
        .try_into()
    }
}

/// Wire form of [`UpdateSpec`]; the key is optional as in the builder
#[derive(Deserialize)]
struct UpdateSpecRecord {
    source_url: String,
    #[serde(default)]
    expected_digest: Option<Digest>,
    #[serde(default)]
    expected_size: Option<u64>,
    #[serde(default)]
    key: Option<ArtifactKey>,
    #[serde(default)]
    allow_unverified: bool,
}

impl TryFrom<UpdateSpecRecord> for UpdateSpec {
    type Error = SpecError;

    fn try_from(record: UpdateSpecRecord) -> Result<Self, Self::Error> {
        let url = Url::parse(&record.source_url).map_err(|e| SpecError::InvalidUrl {
            url: record.source_url.clone(),
            reason: e.to_string(),
        })?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(SpecError::InvalidUrl {
                url: record.source_url.clone(),
                reason: format!("unsupported scheme '{}'", url.scheme()),
            });
        }

        if record.expected_digest.is_none()
            && record.expected_size.is_none()
            && !record.allow_unverified
        {
            return Err(SpecError::MissingIntegrity);
        }

        let key = record
            .key
            .unwrap_or_else(|| ArtifactKey::from_url(&record.source_url));

        Ok(UpdateSpec {
            source_url: record.source_url,
            expected_digest: record.expected_digest,
            expected_size: record.expected_size,
            key,
            allow_unverified: record.allow_unverified,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const DIGEST: &str = "b94d27b9934d3e08a52e52d7da7dabfac484efe37a5380ee9088f7ace2efcde9";

    #[test]
    fn test_builder_with_digest_and_key() {
        let spec = UpdateSpec::builder("https://x/app.bin")
            .digest(DIGEST)
            .size(11)
            .destination_key("app-v2")
            .build()
            .unwrap();

        assert_eq!(spec.source_url(), "https://x/app.bin");
        assert_eq!(spec.expected_digest().unwrap().hex(), DIGEST);
        assert_eq!(spec.expected_size(), Some(11));
        assert_eq!(spec.key().as_str(), "app-v2");
        assert!(!spec.is_unverified());
    }

    #[test]
    fn test_missing_integrity_requires_opt_in() {
        let err = UpdateSpec::builder("https://x/app.bin").build().unwrap_err();
        assert_eq!(err, SpecError::MissingIntegrity);

        let spec = UpdateSpec::builder("https://x/app.bin")
            .allow_unverified()
            .build()
            .unwrap();
        assert!(spec.is_unverified());
    }

    #[test]
    fn test_size_alone_is_enough() {
        assert!(UpdateSpec::builder("https://x/app.bin").size(10).build().is_ok());
    }

    #[test]
    fn test_key_derived_from_url_is_stable() {
        let a = UpdateSpec::builder("https://x/app.bin").size(1).build().unwrap();
        let b = UpdateSpec::builder("https://x/app.bin").size(2).build().unwrap();
        let c = UpdateSpec::builder("https://x/other.bin").size(1).build().unwrap();

        assert_eq!(a.key(), b.key());
        assert_ne!(a.key(), c.key());
        assert!(a.key().as_str().starts_with("url-"));
        assert_eq!(a.key().as_str().len(), "url-".len() + 16);
    }

    #[test]
    fn test_invalid_urls() {
        assert!(matches!(
            UpdateSpec::builder("not a url").size(1).build(),
            Err(SpecError::InvalidUrl { .. })
        ));
        assert!(matches!(
            UpdateSpec::builder("ftp://x/app.bin").size(1).build(),
            Err(SpecError::InvalidUrl { .. })
        ));
    }

    #[test]
    fn test_invalid_keys() {
        for key in ["", "../etc", ".hidden", "a/b", "app.part", "sp ace"] {
            assert!(ArtifactKey::new(key).is_err(), "key {:?} should be rejected", key);
        }
        assert!(ArtifactKey::new("app-v2.apk").is_ok());
    }

    #[test]
    fn test_spec_json_round_trip() {
        let spec = UpdateSpec::builder("https://x/app.bin")
            .digest(DIGEST)
            .destination_key("app-v2")
            .build()
            .unwrap();
        let json = serde_json::to_string(&spec).unwrap();
        let back: UpdateSpec = serde_json::from_str(&json).unwrap();
        assert_eq!(back, spec);
    }

    #[test]
    fn test_spec_json_rejects_what_the_builder_rejects() {
        let escaping_key = r#"{"source_url":"https://x/app","expected_size":1,"key":"../../escape"}"#;
        assert!(serde_json::from_str::<UpdateSpec>(escaping_key).is_err());

        let ftp = r#"{"source_url":"ftp://x/app","expected_size":1,"key":"app"}"#;
        assert!(serde_json::from_str::<UpdateSpec>(ftp).is_err());

        let implicit_unverified = r#"{"source_url":"https://x/app","allow_unverified":false}"#;
        assert!(serde_json::from_str::<UpdateSpec>(implicit_unverified).is_err());

        let explicit_unverified = r#"{"source_url":"https://x/app","allow_unverified":true}"#;
        let spec: UpdateSpec = serde_json::from_str(explicit_unverified).unwrap();
        assert!(spec.is_unverified());
        assert_eq!(spec.key(), &ArtifactKey::from_url("https://x/app"));
    }

    #[test]
    fn test_artifact_key_json_is_validated() {
        assert!(serde_json::from_str::<ArtifactKey>(r#""../x""#).is_err());
        let key: ArtifactKey = serde_json::from_str(r#""app-v2""#).unwrap();
        assert_eq!(key.as_str(), "app-v2");
        assert_eq!(serde_json::to_string(&key).unwrap(), r#""app-v2""#);
    }

    #[test]
    fn test_file_names() {
        let key = ArtifactKey::new("app-v2").unwrap();
        assert_eq!(key.final_file_name(), "app-v2");
        assert_eq!(key.staging_file_name(), "app-v2.part");
    }
}
