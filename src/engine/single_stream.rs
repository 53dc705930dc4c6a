//! Sequential single-request transfer

use super::multipart::progress::ProgressAggregator;
use crate::error::{Error, Result};
use crate::types::ProgressFn;
use crate::utils;
use futures::StreamExt;
use reqwest::header::HeaderMap;
use std::path::Path;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio_util::sync::CancellationToken;

/// What one successful single-stream attempt produced
#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) struct StreamOutcome {
    pub(crate) bytes_written: u64,
    pub(crate) content_length: Option<u64>,
    pub(crate) format: Option<String>,
}

/// Parameters for [`download`]
pub(crate) struct StreamParams<'a> {
    pub(crate) client: &'a reqwest::Client,
    pub(crate) url: &'a str,
    pub(crate) headers: &'a HeaderMap,
    /// Declared size, 0 when unknown
    pub(crate) declared_size: u64,
    pub(crate) dest: &'a Path,
    pub(crate) progress: Option<ProgressFn>,
    pub(crate) progress_interval: Duration,
    pub(crate) cancel: &'a CancellationToken,
}

/// Stream `url` into `dest`, removing `dest` on any failure
pub(crate) async fn download(params: StreamParams<'_>) -> Result<StreamOutcome> {
    let dest = params.dest;
    let result = transfer(params).await;
    if result.is_err() {
        utils::remove_quietly(dest).await;
    }
    result
}

async fn transfer(params: StreamParams<'_>) -> Result<StreamOutcome> {
    let StreamParams {
        client,
        url,
        headers,
        declared_size,
        dest,
        progress,
        progress_interval,
        cancel,
    } = params;

    let request = client.get(url).headers(headers.clone()).send();
    let response = tokio::select! {
        _ = cancel.cancelled() => return Err(Error::Cancelled),
        response = request => response?,
    };

    let status = response.status();
    if !status.is_success() {
        return Err(Error::HttpStatus {
            url: url.to_string(),
            status: status.as_u16(),
        });
    }

    let content_length = utils::content_length(response.headers());
    let format = utils::response_format(response.headers());
    let total = if declared_size > 0 {
        declared_size
    } else {
        content_length.unwrap_or(0)
    };
    let aggregator = ProgressAggregator::new(progress, total, progress_interval);

    let mut file = tokio::fs::File::create(dest).await?;
    let mut stream = response.bytes_stream();
    let mut written = 0u64;

    loop {
        let chunk = tokio::select! {
            _ = cancel.cancelled() => return Err(Error::Cancelled),
            chunk = stream.next() => chunk,
        };
        let Some(chunk) = chunk else {
            break;
        };
        let chunk = chunk?;
        file.write_all(&chunk).await?;
        written += chunk.len() as u64;
        aggregator.update(0, written);
    }

    file.flush().await?;
    file.sync_all().await?;
    aggregator.finish();

    // A body shorter than its own Content-Length is a truncated transfer
    if let Some(expected) = content_length {
        if written < expected {
            return Err(Error::SizeMismatch {
                expected,
                actual: written,
            });
        }
    }

    tracing::debug!(url = %url, bytes = written, "Single-stream transfer finished");

    Ok(StreamOutcome {
        bytes_written: written,
        content_length,
        format,
    })
}
