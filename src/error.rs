//! Error types for audio-dl
//!
//! This module provides the error taxonomy for the download engine:
//! - Transport failures (network, HTTP status, I/O)
//! - Validation failures (size and checksum mismatch)
//! - Part-level failures inside one multipart transfer
//! - Cancellation, which is propagated immediately and never retried
//! - Exhaustion, the terminal error once every candidate and retry is consumed

use std::sync::Arc;
use thiserror::Error;

/// Result type alias for audio-dl operations
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for audio-dl
///
/// Each variant carries enough context to diagnose the failure without
/// consulting logs. Use [`Error::kind`] for coarse classification and
/// [`crate::retry::IsRetryable`] for retry decisions.
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration error with context about which setting is invalid
    #[error("configuration error: {message}")]
    Config {
        /// Human-readable error message describing the configuration issue
        message: String,
        /// The configuration key that caused the error (e.g., "multipart_concurrency")
        key: Option<String>,
    },

    /// The download descriptor cannot be used (empty URL, malformed checksum, ...)
    #[error("invalid download descriptor: {0}")]
    InvalidDescriptor(String),

    /// Network error from the HTTP client
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),

    /// Origin answered with a non-success status
    #[error("HTTP {status} from {url}")]
    HttpStatus {
        /// The URL that was requested
        url: String,
        /// The status code the server returned
        status: u16,
    },

    /// I/O error while writing, merging or copying files
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// One part of a multipart transfer failed
    #[error("part {index} failed: {reason}")]
    PartFailed {
        /// Index of the failed part
        index: usize,
        /// Why the part failed
        reason: String,
    },

    /// The number of bytes written does not match the declared size
    #[error("incomplete transfer: expected {expected} bytes, wrote {actual}")]
    SizeMismatch {
        /// Declared size in bytes
        expected: u64,
        /// Bytes actually written
        actual: u64,
    },

    /// The digest of the written file does not match the declared checksum
    #[error("checksum mismatch: expected {expected}, got {actual}")]
    ChecksumMismatch {
        /// Declared checksum (hex)
        expected: String,
        /// Computed checksum (hex)
        actual: String,
    },

    /// The caller cancelled the download
    #[error("download cancelled")]
    Cancelled,

    /// Every candidate URL and retry attempt was consumed
    #[error("all {attempts} download attempts failed: {source}")]
    Exhausted {
        /// Total number of transfer attempts made
        attempts: u32,
        /// The last underlying cause
        source: Box<Error>,
    },

    /// A leader's terminal error, surfaced verbatim to coalesced followers
    #[error(transparent)]
    Shared(Arc<Error>),

    /// Other error
    #[error("{0}")]
    Other(String),
}

/// Coarse classification of an [`Error`]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ErrorKind {
    /// Caller cancellation
    Cancelled,
    /// Network, HTTP status, or part failure
    TransientNetwork,
    /// Written size does not match the declared size
    SizeMismatch,
    /// Digest does not match the declared checksum
    ChecksumMismatch,
    /// All candidates and retries consumed
    Exhausted,
    /// Invalid configuration or descriptor
    Config,
    /// Local filesystem failure
    Io,
    /// Anything else
    Other,
}

impl Error {
    /// Classify this error, looking through shared leader errors
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Config { .. } | Error::InvalidDescriptor(_) => ErrorKind::Config,
            Error::Network(_) | Error::HttpStatus { .. } | Error::PartFailed { .. } => {
                ErrorKind::TransientNetwork
            }
            Error::Io(_) => ErrorKind::Io,
            Error::SizeMismatch { .. } => ErrorKind::SizeMismatch,
            Error::ChecksumMismatch { .. } => ErrorKind::ChecksumMismatch,
            Error::Cancelled => ErrorKind::Cancelled,
            Error::Exhausted { .. } => ErrorKind::Exhausted,
            Error::Shared(inner) => inner.kind(),
            Error::Other(_) => ErrorKind::Other,
        }
    }

    /// Whether this error (or the cause it wraps) is a caller cancellation
    pub fn is_cancelled(&self) -> bool {
        match self {
            Error::Cancelled => true,
            Error::Shared(inner) => inner.is_cancelled(),
            Error::Exhausted { source, .. } => source.is_cancelled(),
            _ => false,
        }
    }

    /// The innermost cause, unwrapping `Exhausted` and `Shared`
    pub fn root_cause(&self) -> &Error {
        match self {
            Error::Exhausted { source, .. } => source.root_cause(),
            Error::Shared(inner) => inner.root_cause(),
            other => other,
        }
    }

    /// Shorthand for a configuration error on a specific key
    pub(crate) fn config(key: &str, message: impl Into<String>) -> Self {
        Error::Config {
            message: message.into(),
            key: Some(key.to_string()),
        }
    }
}
