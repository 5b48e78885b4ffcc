//! Content digests used for artifact integrity checks

use serde::{Deserialize, Serialize};
use sha2::Digest as _;
use std::fmt;
use std::str::FromStr;

use super::spec::SpecError;

/// Hash algorithm backing a [`Digest`]
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "lowercase")]
pub enum DigestAlgorithm {
    #[default]
    Sha256,
    Blake3,
}

impl DigestAlgorithm {
    /// Length of the raw digest in bytes
    pub const fn output_len(&self) -> usize {
        32
    }

    /// Start an incremental hasher for this algorithm
    pub fn hasher(&self) -> DigestHasher {
        match self {
            DigestAlgorithm::Sha256 => DigestHasher::Sha256(sha2::Sha256::new()),
            DigestAlgorithm::Blake3 => DigestHasher::Blake3(Box::new(blake3::Hasher::new())),
        }
    }
}

impl fmt::Display for DigestAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DigestAlgorithm::Sha256 => write!(f, "sha256"),
            DigestAlgorithm::Blake3 => write!(f, "blake3"),
        }
    }
}

/// Incremental hasher over either supported algorithm
pub enum DigestHasher {
    Sha256(sha2::Sha256),
    Blake3(Box<blake3::Hasher>),
}

impl DigestHasher {
    pub fn update(&mut self, data: &[u8]) {
        match self {
            DigestHasher::Sha256(h) => h.update(data),
            DigestHasher::Blake3(h) => {
                h.update(data);
            }
        }
    }

    pub fn finalize(self) -> Digest {
        match self {
            DigestHasher::Sha256(h) => Digest {
                algorithm: DigestAlgorithm::Sha256,
                hex: format!("{:x}", h.finalize()),
            },
            DigestHasher::Blake3(h) => Digest {
                algorithm: DigestAlgorithm::Blake3,
                hex: h.finalize().to_hex().to_string(),
            },
        }
    }
}

/// A fixed-size fingerprint of file content.
///
/// Textual form is `sha256:<hex>` or `blake3:<hex>`; a bare 64-character hex
/// string is read as sha256. Hex is always stored lowercase.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Digest {
    algorithm: DigestAlgorithm,
    hex: String,
}

impl Digest {
    /// Build a digest from an algorithm and a hex string
    pub fn new(algorithm: DigestAlgorithm, hex: &str) -> Result<Self, SpecError> {
        let hex = hex.trim().to_ascii_lowercase();
        let bytes = hex::decode(&hex).map_err(|_| SpecError::InvalidDigest {
            value: hex.clone(),
            reason: "not a hex string".to_string(),
        })?;
        if bytes.len() != algorithm.output_len() {
            return Err(SpecError::InvalidDigest {
                value: hex,
                reason: format!(
                    "{} digests are {} bytes, got {}",
                    algorithm,
                    algorithm.output_len(),
                    bytes.len()
                ),
            });
        }
        Ok(Self { algorithm, hex })
    }

    /// Parse `algo:hex` or bare sha256 hex
    pub fn parse(s: &str) -> Result<Self, SpecError> {
        let s = s.trim();
        match s.split_once(':') {
            Some((algo, hex)) => {
                let algorithm = match algo.to_ascii_lowercase().as_str() {
                    "sha256" | "sha-256" => DigestAlgorithm::Sha256,
                    "blake3" => DigestAlgorithm::Blake3,
                    other => {
                        return Err(SpecError::InvalidDigest {
                            value: s.to_string(),
                            reason: format!("unsupported algorithm '{}'", other),
                        })
                    }
                };
                Self::new(algorithm, hex)
            }
            None => Self::new(DigestAlgorithm::Sha256, s),
        }
    }

    /// Digest of an in-memory buffer
    pub fn of_bytes(algorithm: DigestAlgorithm, data: &[u8]) -> Self {
        let mut hasher = algorithm.hasher();
        hasher.update(data);
        hasher.finalize()
    }

    pub fn algorithm(&self) -> DigestAlgorithm {
        self.algorithm
    }

    /// Lowercase hex of the raw digest
    pub fn hex(&self) -> &str {
        &self.hex
    }
}

impl fmt::Display for Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.algorithm, self.hex)
    }
}

impl FromStr for Digest {
    type Err = SpecError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for Digest {
    type Error = SpecError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<Digest> for String {
    fn from(value: Digest) -> Self {
        value.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const EMPTY_SHA256: &str = "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855";

    #[test]
    fn test_parse_bare_hex_is_sha256() {
        let d = Digest::parse(EMPTY_SHA256).unwrap();
        assert_eq!(d.algorithm(), DigestAlgorithm::Sha256);
        assert_eq!(d.hex(), EMPTY_SHA256);
    }

    #[test]
    fn test_parse_prefixed_and_uppercase() {
        let d = Digest::parse(&format!("SHA256:{}", EMPTY_SHA256.to_uppercase())).unwrap();
        assert_eq!(d.hex(), EMPTY_SHA256);
        assert_eq!(d.to_string(), format!("sha256:{}", EMPTY_SHA256));
    }

    #[test]
    fn test_parse_rejects_bad_input() {
        assert!(Digest::parse("abc123").is_err());
        assert!(Digest::parse("md5:d41d8cd98f00b204e9800998ecf8427e").is_err());
        assert!(Digest::parse(&"zz".repeat(32)).is_err());
    }

    #[test]
    fn test_of_bytes_matches_known_values() {
        assert_eq!(
            Digest::of_bytes(DigestAlgorithm::Sha256, b"hello world").hex(),
            "b94d27b9934d3e08a52e52d7da7dabfac484efe37a5380ee9088f7ace2efcde9"
        );
        let b3 = Digest::of_bytes(DigestAlgorithm::Blake3, b"hello world");
        assert_eq!(b3.hex(), blake3::hash(b"hello world").to_hex().as_str());
    }

    #[test]
    fn test_serde_uses_text_form() {
        let d = Digest::of_bytes(DigestAlgorithm::Blake3, b"x");
        let json = serde_json::to_string(&d).unwrap();
        assert_eq!(json, format!("\"blake3:{}\"", d.hex()));
        let back: Digest = serde_json::from_str(&json).unwrap();
        assert_eq!(back, d);
    }
}
