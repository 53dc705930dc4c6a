//! Parallel ranged transfer
//!
//! Composed from focused submodules:
//! - [`probe`] - `HEAD` capability check for byte ranges
//! - [`worker`] - Part planning and the fixed-size worker pool
//! - [`progress`] - Throttled progress aggregation across parts
//! - [`merge`] - Index-ordered concatenation of part files
//!
//! Ineligible resources (unknown size, below the minimum size, no range
//! support) are reported as [`MultipartOutcome::Ineligible`] so the caller
//! can fall back to a single-stream transfer.

mod merge;
mod probe;
pub(crate) mod progress;
mod worker;

use crate::config::MultipartConfig;
use crate::error::Result;
use crate::types::ProgressFn;
use crate::utils;
use progress::ProgressAggregator;
use reqwest::header::HeaderMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use worker::{PartPoolParams, plan_parts, run_part_pool};

/// Result of a multipart attempt that did not fail
#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) enum MultipartOutcome {
    /// All parts fetched and merged
    Completed {
        bytes_written: u64,
        parts: usize,
        format: Option<String>,
    },
    /// The resource cannot be fetched in ranges; use single-stream
    Ineligible(&'static str),
}

/// Parameters for [`download`]
pub(crate) struct MultipartParams<'a> {
    pub(crate) client: &'a reqwest::Client,
    pub(crate) url: &'a str,
    pub(crate) headers: &'a HeaderMap,
    /// Declared size, 0 when unknown
    pub(crate) declared_size: u64,
    pub(crate) dest: &'a Path,
    pub(crate) progress: Option<ProgressFn>,
    pub(crate) config: &'a MultipartConfig,
    pub(crate) cancel: &'a CancellationToken,
}

/// Fetch `url` into `dest` using parallel ranged requests
///
/// On failure the working directory and any partial `dest` are removed.
pub(crate) async fn download(params: MultipartParams<'_>) -> Result<MultipartOutcome> {
    let MultipartParams {
        client,
        url,
        headers,
        declared_size,
        dest,
        progress,
        config,
        cancel,
    } = params;

    if !config.enable_multipart {
        return Ok(MultipartOutcome::Ineligible("multipart disabled"));
    }
    if declared_size == 0 {
        return Ok(MultipartOutcome::Ineligible("size unknown"));
    }
    if declared_size < config.multipart_min_size_bytes {
        return Ok(MultipartOutcome::Ineligible("below minimum size"));
    }

    let probed = probe::probe(client, url, headers, cancel).await?;
    if !probed.supports_range {
        return Ok(MultipartOutcome::Ineligible("no range support"));
    }

    let total = probed.content_length;
    let work_dir = WorkDir::create(work_dir_for(dest)).await?;

    let parts = plan_parts(
        total,
        config.multipart_concurrency,
        config.multipart_min_part_size,
        work_dir.path(),
    );
    let part_count = parts.len();

    tracing::debug!(
        url = %url,
        total,
        parts = part_count,
        concurrency = config.multipart_concurrency,
        "Starting multipart transfer"
    );

    let aggregator = Arc::new(ProgressAggregator::new(
        progress,
        total,
        config.progress_interval,
    ));

    let result = async {
        run_part_pool(PartPoolParams {
            client: client.clone(),
            url: url.to_string(),
            headers: headers.clone(),
            parts: parts.clone(),
            concurrency: config.multipart_concurrency,
            progress: Arc::clone(&aggregator),
            cancel: cancel.clone(),
        })
        .await?;
        merge::merge_parts(&parts, dest).await
    }
    .await;

    drop(work_dir);

    match result {
        Ok(bytes_written) => {
            aggregator.finish();
            Ok(MultipartOutcome::Completed {
                bytes_written,
                parts: part_count,
                format: probed.format,
            })
        }
        Err(e) => {
            utils::remove_quietly(dest).await;
            Err(e)
        }
    }
}

/// Directory holding the part files of one transfer
///
/// Removed on drop, so a transfer whose future is abandoned mid-flight
/// cleans up as well as one that returns.
struct WorkDir(PathBuf);

impl WorkDir {
    async fn create(path: PathBuf) -> Result<Self> {
        tokio::fs::create_dir_all(&path).await?;
        Ok(Self(path))
    }

    fn path(&self) -> &Path {
        &self.0
    }
}

impl Drop for WorkDir {
    fn drop(&mut self) {
        match std::fs::remove_dir_all(&self.0) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => {
                tracing::warn!(path = %self.0.display(), error = %e, "Failed to remove part directory");
            }
        }
    }
}

fn work_dir_for(dest: &Path) -> PathBuf {
    let mut name = dest
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_else(|| "download".into());
    name.push(".parts");
    dest.with_file_name(name)
}
