//! Download engine split into focused submodules.
//!
//! [`DownloadService`] is the entry point; it wires the coalescer around the
//! orchestrator:
//! - [`client`] - HTTP client cache keyed by route (direct, override, proxy)
//! - [`coalescer`] - At most one transfer per source key; followers copy
//! - [`orchestrator`] - Candidate URLs, multipart then single-stream, backoff
//! - [`multipart`] - Range probe, part worker pool, progress, merge
//! - [`single_stream`] - Sequential transfer

mod client;
mod coalescer;
mod multipart;
mod orchestrator;
mod single_stream;

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
pub(crate) mod test_helpers;

use crate::config::Config;
use crate::error::{Error, Result};
use crate::resolver::ResolverRegistry;
use crate::types::{DownloadDescriptor, DownloadReport, ProgressFn, TransferPath};
use crate::utils;
use coalescer::{CallHandle, Coalescer, CopyMode, TransferSummary};
use orchestrator::Orchestrator;
use std::path::Path;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Coalescing, retrying audio download service (cloneable - all fields are Arc-wrapped)
///
/// Safe to call concurrently from any number of tasks. Concurrent requests
/// for the same source URL share one network transfer.
///
/// # Example
///
/// ```no_run
/// use audio_dl::{Config, DownloadDescriptor, DownloadService};
/// use tokio_util::sync::CancellationToken;
///
/// # async fn example() -> audio_dl::Result<()> {
/// let service = DownloadService::new(Config::default())?;
/// let descriptor = DownloadDescriptor::new("https://cdn.example.com/track.mp3");
/// let report = service
///     .download(&descriptor, "/tmp/track.mp3".as_ref(), None, &CancellationToken::new())
///     .await?;
/// println!("wrote {} bytes", report.bytes_written);
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct DownloadService {
    config: Arc<Config>,
    orchestrator: Arc<Orchestrator>,
    coalescer: Arc<Coalescer>,
}

impl DownloadService {
    /// Validate `config` and build the service
    pub fn new(config: Config) -> Result<Self> {
        config.validate()?;
        std::fs::create_dir_all(&config.temp_dir)?;

        let config = Arc::new(config);
        let orchestrator = Arc::new(Orchestrator::new(Arc::clone(&config))?);
        let coalescer = Arc::new(Coalescer::new(config.temp_dir.clone()));

        Ok(Self {
            config,
            orchestrator,
            coalescer,
        })
    }

    /// The configuration this service was built with
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Download `descriptor` to `dest`
    ///
    /// `progress` receives `(bytes_written, total_bytes)`. On success `dest`
    /// holds exactly the source bytes; on failure nothing is left at `dest`.
    pub async fn download(
        &self,
        descriptor: &DownloadDescriptor,
        dest: &Path,
        progress: Option<ProgressFn>,
        cancel: &CancellationToken,
    ) -> Result<DownloadReport> {
        descriptor.validate()?;
        if descriptor.is_expired(chrono::Utc::now()) {
            tracing::warn!(
                url = %descriptor.url,
                expires_at = ?descriptor.expires_at,
                "Descriptor has expired, attempting anyway"
            );
        }

        let key = utils::normalize_url(&descriptor.url, &self.config.host_rewrites);
        let handle = self.coalescer.acquire(&key);

        if handle.is_leader() {
            self.lead(handle, descriptor, dest, progress, cancel).await
        } else {
            tracing::info!(url = %key, "Joining in-flight download");
            self.follow(handle, dest, progress, cancel).await
        }
    }

    /// Resolve a track on a platform, then download it
    ///
    /// Returns the descriptor with any learned size and format filled in.
    pub async fn download_track(
        &self,
        registry: &ResolverRegistry,
        platform: &str,
        track_id: &str,
        dest: &Path,
        progress: Option<ProgressFn>,
        cancel: &CancellationToken,
    ) -> Result<(DownloadDescriptor, DownloadReport)> {
        let mut descriptor = registry.resolve(platform, track_id).await?;
        let report = self.download(&descriptor, dest, progress, cancel).await?;
        descriptor.backfill(&report);
        Ok((descriptor, report))
    }

    /// Number of source keys with an unreleased in-flight call
    pub fn inflight_count(&self) -> usize {
        self.coalescer.len()
    }

    async fn lead(
        &self,
        handle: CallHandle,
        descriptor: &DownloadDescriptor,
        dest: &Path,
        progress: Option<ProgressFn>,
        cancel: &CancellationToken,
    ) -> Result<DownloadReport> {
        let result = self
            .orchestrator
            .download_to_path(descriptor, handle.temp_path(), progress, cancel)
            .await;

        match result {
            Ok(summary) => {
                handle.complete(Ok(summary.clone()));
                let bytes_written = coalescer::materialize(
                    handle.temp_path(),
                    dest,
                    None,
                    summary.size,
                    CopyMode::Private,
                )
                .await?;
                drop(handle);
                Ok(report(summary, bytes_written, None))
            }
            Err(e) => {
                let shared = Arc::new(e);
                handle.complete(Err(Arc::clone(&shared)));
                drop(handle);
                // Followers may still hold the error; hand back our own copy when we can
                Err(Arc::try_unwrap(shared).unwrap_or_else(Error::Shared))
            }
        }
    }

    async fn follow(
        &self,
        handle: CallHandle,
        dest: &Path,
        progress: Option<ProgressFn>,
        cancel: &CancellationToken,
    ) -> Result<DownloadReport> {
        let summary = handle.wait(cancel).await?.map_err(Error::Shared)?;
        let bytes_written = coalescer::materialize(
            handle.temp_path(),
            dest,
            progress.as_ref(),
            summary.size,
            CopyMode::LinkWhenQuiet,
        )
        .await?;
        drop(handle);

        tracing::debug!(dest = %dest.display(), bytes = bytes_written, "Copied coalesced result");
        Ok(report(summary, bytes_written, Some(TransferPath::Coalesced)))
    }
}

fn report(summary: TransferSummary, bytes_written: u64, path: Option<TransferPath>) -> DownloadReport {
    DownloadReport {
        bytes_written,
        size: summary.size,
        format: summary.format,
        path: path.unwrap_or(summary.path),
        source_url: summary.source_url,
    }
}
