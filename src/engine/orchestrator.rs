//! Retry and fallback orchestration
//!
//! For each candidate URL in order, a multipart transfer is attempted once,
//! then single-stream attempts follow with exponential backoff. Attempts
//! after the first single-stream try may be routed through the configured
//! proxy override. Every successful transfer is validated against the
//! declared size and checksum before it counts.

use super::client::{ClientCache, header_map};
use super::coalescer::TransferSummary;
use super::multipart::{self, MultipartOutcome, MultipartParams};
use super::single_stream::{self, StreamParams};
use crate::checksum::{self, ExpectedChecksum};
use crate::config::Config;
use crate::error::{Error, Result};
use crate::retry::download_with_retry;
use crate::types::{DownloadDescriptor, ProgressFn, TransferPath};
use crate::utils;
use reqwest::header::HeaderMap;
use std::path::Path;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

pub(crate) struct Orchestrator {
    config: Arc<Config>,
    clients: ClientCache,
}

impl Orchestrator {
    pub(crate) fn new(config: Arc<Config>) -> Result<Self> {
        let clients = ClientCache::new(Arc::clone(&config))?;
        Ok(Self { config, clients })
    }

    /// Download `descriptor` into `dest`, trying every candidate in order
    ///
    /// On failure `dest` does not exist. Cancellation is returned as
    /// [`Error::Cancelled`]; anything else that consumes every candidate is
    /// [`Error::Exhausted`] wrapping the last cause.
    pub(crate) async fn download_to_path(
        &self,
        descriptor: &DownloadDescriptor,
        dest: &Path,
        progress: Option<ProgressFn>,
        cancel: &CancellationToken,
    ) -> Result<TransferSummary> {
        descriptor.validate()?;
        if self.config.check_checksum {
            if let Some(declared) = descriptor.declared_checksum() {
                ExpectedChecksum::parse(declared)?;
            }
        }
        if let Some(parent) = dest.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let headers = header_map(&descriptor.headers);
        let candidates = utils::candidate_urls(descriptor, &self.config.host_rewrites);
        let mut attempts = 0u32;
        let mut last_error: Option<Error> = None;

        for (position, url) in candidates.iter().enumerate() {
            if cancel.is_cancelled() {
                return Err(Error::Cancelled);
            }
            let attempt = CandidateAttempt {
                orchestrator: self,
                descriptor,
                url,
                headers: &headers,
                dest,
                progress: progress.clone(),
                cancel,
            };

            match attempt.multipart().await {
                Ok(Some(summary)) => return Ok(summary),
                Ok(None) => {}
                Err(e) if e.is_cancelled() => return Err(Error::Cancelled),
                Err(e) => {
                    attempts += 1;
                    tracing::warn!(url = %url, error = %e, "Multipart transfer failed, falling back to single-stream");
                    last_error = Some(e);
                }
            }

            let (result, made) = attempt.single_stream().await;
            attempts += made;
            match result {
                Ok(summary) => return Ok(summary),
                Err(e) if e.is_cancelled() => return Err(Error::Cancelled),
                Err(e) => {
                    if position + 1 < candidates.len() {
                        tracing::warn!(url = %url, error = %e, "Candidate exhausted, trying next mirror");
                    }
                    last_error = Some(e);
                }
            }
        }

        let source = last_error.unwrap_or_else(|| Error::Other("no candidate URLs".to_string()));
        tracing::error!(
            url = %descriptor.url,
            candidates = candidates.len(),
            attempts,
            error = %source,
            "All download candidates exhausted"
        );
        Err(Error::Exhausted {
            attempts,
            source: Box::new(source),
        })
    }

    /// Check the written artifact against the declared size and checksum
    async fn validate(&self, descriptor: &DownloadDescriptor, path: &Path, written: u64) -> Result<()> {
        if descriptor.size > 0 {
            let acceptable = if self.config.lenient_size {
                written >= descriptor.size
            } else {
                written == descriptor.size
            };
            if !acceptable {
                return Err(Error::SizeMismatch {
                    expected: descriptor.size,
                    actual: written,
                });
            }
        }

        if self.config.check_checksum {
            if let Some(declared) = descriptor.declared_checksum() {
                checksum::verify_file(path, declared).await?;
            }
        }
        Ok(())
    }
}

/// One candidate URL's worth of attempts
struct CandidateAttempt<'a> {
    orchestrator: &'a Orchestrator,
    descriptor: &'a DownloadDescriptor,
    url: &'a str,
    headers: &'a HeaderMap,
    dest: &'a Path,
    progress: Option<ProgressFn>,
    cancel: &'a CancellationToken,
}

impl CandidateAttempt<'_> {
    /// `Ok(None)` when the resource is not eligible for ranged transfer
    async fn multipart(&self) -> Result<Option<TransferSummary>> {
        let config = &self.orchestrator.config;
        let outcome = multipart::download(MultipartParams {
            client: self.orchestrator.clients.direct(),
            url: self.url,
            headers: self.headers,
            declared_size: self.descriptor.size,
            dest: self.dest,
            progress: self.progress.clone(),
            config: &config.multipart,
            cancel: self.cancel,
        })
        .await?;

        let (bytes_written, parts, format) = match outcome {
            MultipartOutcome::Completed {
                bytes_written,
                parts,
                format,
            } => (bytes_written, parts, format),
            MultipartOutcome::Ineligible(reason) => {
                tracing::debug!(url = %self.url, reason, "Using single-stream transfer");
                return Ok(None);
            }
        };

        self.validated(bytes_written, None, format, TransferPath::Multipart)
            .await
            .map(|summary| {
                tracing::info!(url = %self.url, bytes = bytes_written, parts, "Multipart transfer complete");
                Some(summary)
            })
    }

    /// Single-stream attempts with backoff; returns the attempt count too
    async fn single_stream(&self) -> (Result<TransferSummary>, u32) {
        let orchestrator = self.orchestrator;
        download_with_retry(&orchestrator.config.retry, self.cancel, |attempt| async move {
            let client = orchestrator.clients.for_attempt(self.url, attempt).await?;
            if attempt > 0 && orchestrator.config.proxy_address.is_some() {
                tracing::debug!(url = %self.url, attempt, "Routing attempt through proxy");
            }

            let outcome = single_stream::download(StreamParams {
                client: &client,
                url: self.url,
                headers: self.headers,
                declared_size: self.descriptor.size,
                dest: self.dest,
                progress: self.progress.clone(),
                progress_interval: orchestrator.config.multipart.progress_interval,
                cancel: self.cancel,
            })
            .await?;

            let summary = self
                .validated(
                    outcome.bytes_written,
                    outcome.content_length,
                    outcome.format,
                    TransferPath::SingleStream,
                )
                .await?;
            tracing::info!(url = %self.url, bytes = summary.bytes_written, attempt, "Single-stream transfer complete");
            Ok(summary)
        })
        .await
    }

    /// Validate the artifact and fill in what the origin told us
    ///
    /// A rejected artifact is deleted before the error is returned.
    async fn validated(
        &self,
        bytes_written: u64,
        content_length: Option<u64>,
        learned_format: Option<String>,
        path: TransferPath,
    ) -> Result<TransferSummary> {
        if let Err(e) = self
            .orchestrator
            .validate(self.descriptor, self.dest, bytes_written)
            .await
        {
            utils::remove_quietly(self.dest).await;
            return Err(e);
        }

        let size = match self.descriptor.size {
            0 => content_length.unwrap_or(bytes_written),
            declared => declared,
        };
        let format = if self.descriptor.format.is_empty() {
            learned_format
        } else {
            Some(self.descriptor.format.clone())
        };

        Ok(TransferSummary {
            bytes_written,
            size,
            format,
            path,
            source_url: self.url.to_string(),
        })
    }
}
