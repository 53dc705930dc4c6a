//! Part planning and the part worker pool
//!
//! A fixed number of workers pull part indices from a shared counter. Each
//! worker issues a ranged `GET`, streams the body into the part's own file
//! and checks that exactly the expected number of bytes arrived. The first
//! failure wins: it is recorded once and trips the transfer's cancellation
//! token so sibling workers stop promptly.

use super::progress::ProgressAggregator;
use crate::error::{Error, Result};
use futures::StreamExt;
use reqwest::StatusCode;
use reqwest::header::{HeaderMap, RANGE};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::io::AsyncWriteExt;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

/// One contiguous byte range of the resource
#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) struct Part {
    pub(crate) index: usize,
    /// First byte, inclusive
    pub(crate) start: u64,
    /// Last byte, exclusive
    pub(crate) end: u64,
    pub(crate) path: PathBuf,
}

impl Part {
    pub(crate) fn len(&self) -> u64 {
        self.end - self.start
    }

    fn range_header(&self) -> String {
        format!("bytes={}-{}", self.start, self.end.saturating_sub(1))
    }
}

/// Part size for a transfer: `total / concurrency`, floored at `min_part_size`
pub(crate) fn part_size(total: u64, concurrency: usize, min_part_size: u64) -> u64 {
    let concurrency = concurrency.max(1) as u64;
    (total / concurrency).max(min_part_size).max(1)
}

/// Split `[0, total)` into parts written under `work_dir`
///
/// The count is `ceil(total / part_size)`; only the last part may be short.
pub(crate) fn plan_parts(
    total: u64,
    concurrency: usize,
    min_part_size: u64,
    work_dir: &Path,
) -> Vec<Part> {
    let size = part_size(total, concurrency, min_part_size);
    let count = total.div_ceil(size);

    (0..count)
        .map(|i| {
            let start = i * size;
            Part {
                index: i as usize,
                start,
                end: (start + size).min(total),
                path: work_dir.join(format!("part-{i:05}")),
            }
        })
        .collect()
}

/// Records the first part failure and cancels the siblings
struct FirstError {
    tripped: AtomicBool,
    error: Mutex<Option<Error>>,
    cancel: CancellationToken,
}

impl FirstError {
    fn new(cancel: CancellationToken) -> Self {
        Self {
            tripped: AtomicBool::new(false),
            error: Mutex::new(None),
            cancel,
        }
    }

    fn record(&self, error: Error) {
        if self
            .tripped
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
        {
            *self.error.lock().unwrap_or_else(|e| e.into_inner()) = Some(error);
            self.cancel.cancel();
        }
    }

    fn take(&self) -> Option<Error> {
        self.error.lock().unwrap_or_else(|e| e.into_inner()).take()
    }
}

/// Parameters for [`run_part_pool`]
pub(crate) struct PartPoolParams {
    pub(crate) client: reqwest::Client,
    pub(crate) url: String,
    pub(crate) headers: HeaderMap,
    pub(crate) parts: Vec<Part>,
    pub(crate) concurrency: usize,
    pub(crate) progress: Arc<ProgressAggregator>,
    /// The caller's token; the pool derives a child token for its siblings
    pub(crate) cancel: CancellationToken,
}

/// Download every part, returning the first failure if any
pub(crate) async fn run_part_pool(params: PartPoolParams) -> Result<()> {
    let PartPoolParams {
        client,
        url,
        headers,
        parts,
        concurrency,
        progress,
        cancel,
    } = params;

    let transfer_cancel = cancel.child_token();
    let first_error = Arc::new(FirstError::new(transfer_cancel.clone()));
    let parts: Arc<[Part]> = parts.into();
    let next = Arc::new(AtomicUsize::new(0));
    let workers = concurrency.max(1).min(parts.len());

    let mut set = JoinSet::new();
    for worker in 0..workers {
        let client = client.clone();
        let url = url.clone();
        let headers = headers.clone();
        let parts = Arc::clone(&parts);
        let next = Arc::clone(&next);
        let progress = Arc::clone(&progress);
        let first_error = Arc::clone(&first_error);
        let cancel = transfer_cancel.clone();

        set.spawn(async move {
            loop {
                if cancel.is_cancelled() {
                    break;
                }
                let index = next.fetch_add(1, Ordering::Relaxed);
                let Some(part) = parts.get(index) else {
                    break;
                };

                tracing::debug!(worker, part = part.index, range = %part.range_header(), "Fetching part");
                let fetch = FetchPart {
                    client: &client,
                    url: &url,
                    headers: &headers,
                    part,
                    progress: &progress,
                    cancel: &cancel,
                };
                if let Err(e) = fetch.run().await {
                    if !e.is_cancelled() {
                        tracing::warn!(part = part.index, error = %e, "Part failed");
                    }
                    first_error.record(e);
                    break;
                }
            }
        });
    }

    while let Some(joined) = set.join_next().await {
        if let Err(e) = joined {
            first_error.record(Error::Other(format!("part worker panicked: {e}")));
        }
    }

    if cancel.is_cancelled() {
        return Err(Error::Cancelled);
    }
    match first_error.take() {
        Some(e) => Err(e),
        None => Ok(()),
    }
}

struct FetchPart<'a> {
    client: &'a reqwest::Client,
    url: &'a str,
    headers: &'a HeaderMap,
    part: &'a Part,
    progress: &'a ProgressAggregator,
    cancel: &'a CancellationToken,
}

impl FetchPart<'_> {
    async fn run(&self) -> Result<u64> {
        let part = self.part;
        let expected = part.len();

        let request = self
            .client
            .get(self.url)
            .headers(self.headers.clone())
            .header(RANGE, part.range_header())
            .send();
        let response = tokio::select! {
            _ = self.cancel.cancelled() => return Err(Error::Cancelled),
            response = request => response.map_err(|e| self.failed(e.to_string()))?,
        };

        let status = response.status();
        if status != StatusCode::OK && status != StatusCode::PARTIAL_CONTENT {
            return Err(self.failed(format!("HTTP {}", status.as_u16())));
        }

        let mut file = tokio::fs::File::create(&part.path).await?;
        let mut stream = response.bytes_stream();
        let mut written = 0u64;

        loop {
            let chunk = tokio::select! {
                _ = self.cancel.cancelled() => return Err(Error::Cancelled),
                chunk = stream.next() => chunk,
            };
            let Some(chunk) = chunk else {
                break;
            };
            let chunk = chunk.map_err(|e| self.failed(e.to_string()))?;

            written += chunk.len() as u64;
            if written > expected {
                // Server ignored the range and is sending the whole resource
                return Err(self.failed(format!(
                    "received more than the expected {expected} bytes"
                )));
            }
            file.write_all(&chunk).await?;
            self.progress.update(part.index, written);
        }
        file.flush().await?;

        if written != expected {
            return Err(self.failed(format!("expected {expected} bytes, got {written}")));
        }
        Ok(written)
    }

    fn failed(&self, reason: String) -> Error {
        Error::PartFailed {
            index: self.part.index,
            reason,
        }
    }
}
