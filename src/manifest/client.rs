//! Manifest document and fetching

use reqwest::header::{CACHE_CONTROL, PRAGMA};
use serde::{Deserialize, Serialize};

use super::{ManifestError, Result, Version};
use crate::core::config::HttpConfig;
use crate::core::types::{ArtifactKey, SpecError, UpdateSpec};

/// Latest release as published by the update server
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdateManifest {
    pub version: Version,

    /// Download location of the artifact
    #[serde(alias = "apkUrl")]
    pub artifact_url: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sha256: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub blake3: Option<String>,

    /// Artifact size in bytes
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<u64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
}

impl UpdateManifest {
    /// True only for strictly newer versions; equal or older never qualify
    pub fn is_newer_than(&self, current: &Version) -> bool {
        self.version > *current
    }

    /// Cache key of this release's artifact: `app-<version>`
    pub fn artifact_key(&self) -> std::result::Result<ArtifactKey, SpecError> {
        ArtifactKey::new(format!("app-{}", self.version))
    }

    /// Build the fetch request for this release.
    ///
    /// sha256 is preferred when both digests are published.
    pub fn to_spec(&self, allow_unverified: bool) -> Result<UpdateSpec> {
        let mut builder = UpdateSpec::builder(self.artifact_url.clone())
            .destination_key(self.artifact_key()?.as_str());

        if let Some(sha256) = &self.sha256 {
            builder = builder.digest(tagged_digest("sha256", sha256));
        } else if let Some(blake3) = &self.blake3 {
            builder = builder.digest(tagged_digest("blake3", blake3));
        }
        if let Some(size) = self.size {
            builder = builder.size(size);
        }
        if allow_unverified {
            builder = builder.allow_unverified();
        }

        Ok(builder.build()?)
    }
}

/// `algorithm:hex`, whether or not the published value already carries the tag
fn tagged_digest(algorithm: &str, value: &str) -> String {
    let value = value.trim();
    let hex = match value.split_once(':') {
        Some((tag, hex)) if tag.eq_ignore_ascii_case(algorithm) => hex,
        _ => value,
    };
    format!("{}:{}", algorithm, hex)
}

/// Fetches the manifest, bypassing intermediate caches
#[derive(Debug, Clone)]
pub struct ManifestClient {
    client: reqwest::Client,
    url: String,
}

impl ManifestClient {
    pub fn new(url: impl Into<String>, http: &HttpConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .connect_timeout(http.connect_timeout())
            .timeout(http.connect_timeout() + http.idle_timeout())
            .user_agent(http.user_agent.clone())
            .build()?;

        Ok(Self {
            client,
            url: url.into(),
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// Download and parse the current manifest
    pub async fn fetch(&self) -> Result<UpdateManifest> {
        let response = self
            .client
            .get(&self.url)
            .header(CACHE_CONTROL, "no-cache")
            .header(PRAGMA, "no-cache")
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            tracing::warn!(url = %self.url, status = status.as_u16(), "Manifest fetch failed");
            return Err(ManifestError::Status {
                status: status.as_u16(),
            });
        }

        let body = response.bytes().await?;
        let manifest: UpdateManifest = serde_json::from_slice(&body)?;
        tracing::debug!(url = %self.url, version = %manifest.version, "Fetched manifest");
        Ok(manifest)
    }
}
