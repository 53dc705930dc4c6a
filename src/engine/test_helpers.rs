//! Shared test helpers: a range-aware mock origin and fast test configs.

use crate::config::{Config, MultipartConfig, RetryConfig};
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use wiremock::{Request, Respond, ResponseTemplate};

/// Deterministic, non-repeating-per-part payload
pub(crate) fn payload(len: usize) -> Vec<u8> {
    (0..len).map(|i| ((i * 31 + i / 251) % 256) as u8).collect()
}

/// A mock origin serving one payload, honoring `Range` unless told not to
#[derive(Clone)]
pub(crate) struct RangeOrigin {
    body: Arc<Vec<u8>>,
    accept_ranges: bool,
    honor_ranges: bool,
    content_type: Option<&'static str>,
    truncate_range_at: Option<u64>,
    fail_full_gets: bool,
    delay: Option<Duration>,
    gets: Arc<AtomicUsize>,
    full_gets: Arc<AtomicUsize>,
}

impl RangeOrigin {
    pub(crate) fn new(body: Vec<u8>) -> Self {
        Self {
            body: Arc::new(body),
            accept_ranges: true,
            honor_ranges: true,
            content_type: None,
            truncate_range_at: None,
            fail_full_gets: false,
            delay: None,
            gets: Arc::new(AtomicUsize::new(0)),
            full_gets: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Advertise ranges on `HEAD` but answer every `GET` with the full body
    pub(crate) fn ignoring_ranges(mut self) -> Self {
        self.honor_ranges = false;
        self
    }

    pub(crate) fn without_accept_ranges(mut self) -> Self {
        self.accept_ranges = false;
        self
    }

    pub(crate) fn with_content_type(mut self, content_type: &'static str) -> Self {
        self.content_type = Some(content_type);
        self
    }

    /// Send a short body for the range starting at `start`
    pub(crate) fn truncating_range_at(mut self, start: u64) -> Self {
        self.truncate_range_at = Some(start);
        self
    }

    /// Answer non-range `GET`s with 500
    pub(crate) fn failing_full_gets(mut self) -> Self {
        self.fail_full_gets = true;
        self
    }

    pub(crate) fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub(crate) fn gets(&self) -> usize {
        self.gets.load(Ordering::SeqCst)
    }

    pub(crate) fn full_gets(&self) -> usize {
        self.full_gets.load(Ordering::SeqCst)
    }

    fn template(&self, status: u16) -> ResponseTemplate {
        let mut template = ResponseTemplate::new(status);
        if self.accept_ranges {
            template = template.insert_header("accept-ranges", "bytes");
        }
        if let Some(content_type) = self.content_type {
            template = template.insert_header("content-type", content_type);
        }
        if let Some(delay) = self.delay {
            template = template.set_delay(delay);
        }
        template
    }
}

fn parse_range(value: &str, len: u64) -> Option<(u64, u64)> {
    let bounds = value.strip_prefix("bytes=")?;
    let (start, end) = bounds.split_once('-')?;
    let start: u64 = start.parse().ok()?;
    let end: u64 = if end.is_empty() {
        len - 1
    } else {
        end.parse().ok()?
    };
    (start <= end && end < len).then_some((start, end))
}

impl Respond for RangeOrigin {
    fn respond(&self, request: &Request) -> ResponseTemplate {
        let len = self.body.len() as u64;

        if request.method.as_str() == "HEAD" {
            return self
                .template(200)
                .insert_header("content-length", len.to_string().as_str())
                .set_body_bytes(self.body.as_ref().clone());
        }

        self.gets.fetch_add(1, Ordering::SeqCst);
        let range = request
            .headers
            .get("range")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| parse_range(v, len));

        match range {
            Some((start, end)) if self.honor_ranges => {
                let mut slice = self.body[start as usize..=end as usize].to_vec();
                if self.truncate_range_at == Some(start) {
                    slice.truncate(slice.len() / 2);
                }
                self.template(206)
                    .insert_header(
                        "content-range",
                        format!("bytes {start}-{end}/{len}").as_str(),
                    )
                    .set_body_bytes(slice)
            }
            _ => {
                self.full_gets.fetch_add(1, Ordering::SeqCst);
                if self.fail_full_gets {
                    return self.template(500);
                }
                self.template(200).set_body_bytes(self.body.as_ref().clone())
            }
        }
    }
}

/// A config with millisecond backoff and small multipart thresholds
pub(crate) fn fast_config(temp_dir: &Path) -> Config {
    Config {
        timeout: Duration::from_secs(10),
        temp_dir: temp_dir.join("engine-tmp"),
        retry: RetryConfig {
            max_retries: 2,
            base_delay: Duration::from_millis(5),
            max_backoff: Duration::from_millis(20),
            jitter: true,
        },
        multipart: MultipartConfig {
            enable_multipart: true,
            multipart_concurrency: 4,
            multipart_min_size_bytes: 1024,
            multipart_min_part_size: 256,
            progress_interval: Duration::ZERO,
        },
        ..Config::default()
    }
}
