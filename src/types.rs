//! Core types for audio-dl

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;

use crate::error::{Error, Result};

/// Progress callback: `(bytes_written, total_bytes)`
///
/// `total_bytes` is 0 when the size is unknown. Callbacks may be invoked
/// from any worker task, so they must be cheap and thread-safe.
pub type ProgressFn = Arc<dyn Fn(u64, u64) + Send + Sync>;

/// Everything the engine needs to fetch one remote payload
///
/// Produced by a platform resolver and read-only to the engine. Unknown
/// values are left at their zero/empty defaults; the engine reports any
/// metadata it learns from the origin in [`DownloadReport`].
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
pub struct DownloadDescriptor {
    /// Primary source URL
    pub url: String,

    /// Alternate mirrors, tried in order once the primary is exhausted
    #[serde(default, alias = "candidateURLs")]
    pub candidate_urls: Vec<String>,

    /// Extra request headers (e.g. Referer, Authorization)
    #[serde(default)]
    pub headers: HashMap<String, String>,

    /// Expected size in bytes, 0 when unknown
    #[serde(default)]
    pub size: u64,

    /// Expected format tag ("mp3", "flac", ...), empty when unknown
    #[serde(default)]
    pub format: String,

    /// Bitrate in kbps, informational
    #[serde(default)]
    pub bitrate: u32,

    /// Expected checksum (`md5:<hex>`, `sha256:<hex>` or bare hex)
    #[serde(default)]
    pub checksum: Option<String>,

    /// Quality tag, informational
    #[serde(default)]
    pub quality: String,

    /// When the source URL stops working, informational
    #[serde(default, alias = "expiresAt")]
    pub expires_at: Option<DateTime<Utc>>,
}

impl DownloadDescriptor {
    /// Create a descriptor for a single URL with everything else unknown
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ..Self::default()
        }
    }

    /// Reject descriptors the engine cannot act on
    pub fn validate(&self) -> Result<()> {
        let url = self.url.trim();
        if url.is_empty() {
            return Err(Error::InvalidDescriptor("source URL is empty".to_string()));
        }
        url::Url::parse(url)
            .map_err(|e| Error::InvalidDescriptor(format!("source URL '{url}': {e}")))?;
        Ok(())
    }

    /// The declared checksum, treating a blank string as none
    pub fn declared_checksum(&self) -> Option<&str> {
        self.checksum
            .as_deref()
            .map(str::trim)
            .filter(|c| !c.is_empty())
    }

    /// Whether the declared expiry has passed
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }

    /// Fill unknown size/format from what the engine learned during transfer
    pub fn backfill(&mut self, report: &DownloadReport) {
        if self.size == 0 && report.size > 0 {
            self.size = report.size;
        }
        if let (true, Some(format)) = (self.format.is_empty(), &report.format) {
            self.format = format.clone();
        }
    }
}

/// Which code path produced the output file
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransferPath {
    /// Parallel ranged transfer
    Multipart,
    /// Sequential single-stream transfer
    SingleStream,
    /// Copied from another caller's in-flight transfer
    Coalesced,
}

/// Result of a successful download
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DownloadReport {
    /// Bytes written to the destination path
    pub bytes_written: u64,
    /// Resolved size (declared, or learned from the origin)
    pub size: u64,
    /// Resolved format (declared, or learned from response headers)
    pub format: Option<String>,
    /// Code path that produced this caller's file
    pub path: TransferPath,
    /// The candidate URL the transfer succeeded against
    pub source_url: String,
}
