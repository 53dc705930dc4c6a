//! Checksum parsing and verification
//!
//! Declared checksums come in three shapes:
//! - `md5:<hex>`
//! - `sha256:<hex>`
//! - bare hex, where 32 characters means md5 and 64 means sha256
//!
//! Comparison is case-insensitive. Anything else is an invalid descriptor,
//! never a silently skipped check.

use crate::error::{Error, Result};
use sha2::{Digest, Sha256};
use std::path::Path;
use tokio::io::AsyncReadExt;

const READ_CHUNK: usize = 64 * 1024;

/// Digest algorithm of a declared checksum
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Algorithm {
    /// MD5, 32 hex characters
    Md5,
    /// SHA-256, 64 hex characters
    Sha256,
}

impl Algorithm {
    fn hex_len(self) -> usize {
        match self {
            Algorithm::Md5 => 32,
            Algorithm::Sha256 => 64,
        }
    }
}

/// A parsed, normalized (lowercase hex) expected checksum
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ExpectedChecksum {
    /// Digest algorithm
    pub algorithm: Algorithm,
    /// Lowercase hex digest
    pub hex: String,
}

impl ExpectedChecksum {
    /// Parse a declared checksum string
    pub fn parse(raw: &str) -> Result<Self> {
        let raw = raw.trim();
        let (algorithm, hex) = match raw.split_once(':') {
            Some((prefix, hex)) => {
                let algorithm = match prefix.to_ascii_lowercase().as_str() {
                    "md5" => Algorithm::Md5,
                    "sha256" | "sha-256" => Algorithm::Sha256,
                    other => {
                        return Err(Error::InvalidDescriptor(format!(
                            "unsupported checksum algorithm '{other}'"
                        )));
                    }
                };
                (algorithm, hex.trim())
            }
            None => match raw.len() {
                32 => (Algorithm::Md5, raw),
                64 => (Algorithm::Sha256, raw),
                len => {
                    return Err(Error::InvalidDescriptor(format!(
                        "cannot infer checksum algorithm from {len} hex characters"
                    )));
                }
            },
        };

        if hex.len() != algorithm.hex_len() || !hex.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(Error::InvalidDescriptor(format!(
                "malformed {algorithm:?} checksum '{hex}'"
            )));
        }

        Ok(Self {
            algorithm,
            hex: hex.to_ascii_lowercase(),
        })
    }
}

/// Compute the lowercase hex digest of a file
pub async fn digest_file(path: &Path, algorithm: Algorithm) -> Result<String> {
    let mut file = tokio::fs::File::open(path).await?;
    let mut buf = vec![0u8; READ_CHUNK];

    match algorithm {
        Algorithm::Md5 => {
            let mut context = md5::Context::new();
            loop {
                let n = file.read(&mut buf).await?;
                if n == 0 {
                    break;
                }
                context.consume(&buf[..n]);
            }
            Ok(format!("{:x}", context.compute()))
        }
        Algorithm::Sha256 => {
            let mut hasher = Sha256::new();
            loop {
                let n = file.read(&mut buf).await?;
                if n == 0 {
                    break;
                }
                hasher.update(&buf[..n]);
            }
            Ok(format!("{:x}", hasher.finalize()))
        }
    }
}

/// Verify a file against a declared checksum
///
/// Returns [`Error::ChecksumMismatch`] when the digests differ.
pub async fn verify_file(path: &Path, declared: &str) -> Result<()> {
    let expected = ExpectedChecksum::parse(declared)?;
    let actual = digest_file(path, expected.algorithm).await?;

    if actual != expected.hex {
        return Err(Error::ChecksumMismatch {
            expected: expected.hex,
            actual,
        });
    }
    Ok(())
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    // md5("hello world") and sha256("hello world")
    const HELLO_MD5: &str = "5eb63bbbe01eeed093cb22bb8f5acdc3";
    const HELLO_SHA256: &str = "b94d27b9934d3e08a52e52d7da7dabfac484efe37a5380ee9088f7ace2efcde9";

    #[test]
    fn parses_prefixed_forms() {
        let md5 = ExpectedChecksum::parse(&format!("md5:{HELLO_MD5}")).unwrap();
        assert_eq!(md5.algorithm, Algorithm::Md5);

        let sha = ExpectedChecksum::parse(&format!("SHA256:{}", HELLO_SHA256.to_uppercase()))
            .unwrap();
        assert_eq!(sha.algorithm, Algorithm::Sha256);
        assert_eq!(sha.hex, HELLO_SHA256, "hex is normalized to lowercase");
    }

    #[test]
    fn infers_algorithm_from_bare_hex_length() {
        assert_eq!(
            ExpectedChecksum::parse(HELLO_MD5).unwrap().algorithm,
            Algorithm::Md5
        );
        assert_eq!(
            ExpectedChecksum::parse(HELLO_SHA256).unwrap().algorithm,
            Algorithm::Sha256
        );
    }

    #[test]
    fn rejects_unknown_and_malformed() {
        assert!(ExpectedChecksum::parse("crc32:deadbeef").is_err());
        assert!(ExpectedChecksum::parse("abc123").is_err());
        assert!(ExpectedChecksum::parse(&format!("md5:{HELLO_SHA256}")).is_err());
        assert!(ExpectedChecksum::parse(&"z".repeat(32)).is_err());
    }

    #[tokio::test]
    async fn verifies_matching_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("hello.bin");
        tokio::fs::write(&path, b"hello world").await.unwrap();

        verify_file(&path, HELLO_MD5).await.unwrap();
        verify_file(&path, &format!("sha256:{HELLO_SHA256}"))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn reports_mismatch_with_both_digests() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("other.bin");
        tokio::fs::write(&path, b"something else").await.unwrap();

        match verify_file(&path, HELLO_MD5).await {
            Err(Error::ChecksumMismatch { expected, actual }) => {
                assert_eq!(expected, HELLO_MD5);
                assert_ne!(actual, HELLO_MD5);
                assert_eq!(actual.len(), 32);
            }
            other => panic!("expected checksum mismatch, got {other:?}"),
        }
    }
}
