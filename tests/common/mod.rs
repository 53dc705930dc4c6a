//! Common test utilities for audio-dl integration tests

#![allow(dead_code)]

use audio_dl::{Config, MultipartConfig, RetryConfig};
use sha2::{Digest, Sha256};
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use wiremock::matchers::any;
use wiremock::{Mock, MockServer, Request, Respond, ResponseTemplate};

/// Deterministic payload whose bytes differ between neighbouring parts
pub fn payload(len: usize) -> Vec<u8> {
    (0..len).map(|i| ((i * 7 + i / 509) % 251) as u8).collect()
}

pub fn sha256_hex(bytes: &[u8]) -> String {
    format!("{:x}", Sha256::digest(bytes))
}

/// Mock origin for a single audio file
///
/// Honors `Range` on `GET`, counts requests, and can be told to misbehave.
#[derive(Clone)]
pub struct Origin {
    body: Arc<Vec<u8>>,
    accept_ranges: bool,
    honor_ranges: bool,
    truncate_range_at: Option<u64>,
    full_get_status: Option<u16>,
    delay: Option<Duration>,
    gets: Arc<AtomicUsize>,
    full_gets: Arc<AtomicUsize>,
    ranges: Arc<Mutex<Vec<(u64, u64)>>>,
}

impl Origin {
    pub fn new(body: Vec<u8>) -> Self {
        Self {
            body: Arc::new(body),
            accept_ranges: true,
            honor_ranges: true,
            truncate_range_at: None,
            full_get_status: None,
            delay: None,
            gets: Arc::new(AtomicUsize::new(0)),
            full_gets: Arc::new(AtomicUsize::new(0)),
            ranges: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn without_accept_ranges(mut self) -> Self {
        self.accept_ranges = false;
        self
    }

    /// Advertise ranges but answer every `GET` with the full body
    pub fn ignoring_ranges(mut self) -> Self {
        self.honor_ranges = false;
        self
    }

    /// Close the range starting at `start` after half its bytes
    pub fn truncating_range_at(mut self, start: u64) -> Self {
        self.truncate_range_at = Some(start);
        self
    }

    /// Answer `GET`s without a `Range` header with `status`
    pub fn failing_full_gets(mut self, status: u16) -> Self {
        self.full_get_status = Some(status);
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn gets(&self) -> usize {
        self.gets.load(Ordering::SeqCst)
    }

    pub fn full_gets(&self) -> usize {
        self.full_gets.load(Ordering::SeqCst)
    }

    /// Inclusive ranges requested so far, sorted by start
    pub fn ranges(&self) -> Vec<(u64, u64)> {
        let mut ranges = self.ranges.lock().unwrap().clone();
        ranges.sort_unstable();
        ranges
    }

    pub async fn serve(&self) -> MockServer {
        let server = MockServer::start().await;
        Mock::given(any())
            .respond_with(self.clone())
            .mount(&server)
            .await;
        server
    }

    fn template(&self, status: u16) -> ResponseTemplate {
        let mut template = ResponseTemplate::new(status).insert_header("content-type", "audio/flac");
        if self.accept_ranges {
            template = template.insert_header("accept-ranges", "bytes");
        }
        if let Some(delay) = self.delay {
            template = template.set_delay(delay);
        }
        template
    }
}

fn parse_range(value: &str, len: u64) -> Option<(u64, u64)> {
    let (start, end) = value.strip_prefix("bytes=")?.split_once('-')?;
    let start: u64 = start.parse().ok()?;
    let end: u64 = match end {
        "" => len.checked_sub(1)?,
        end => end.parse().ok()?,
    };
    (start <= end && end < len).then_some((start, end))
}

impl Respond for Origin {
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
            .and_then(|v| parse_range(v, len))
            .filter(|_| self.honor_ranges);

        match range {
            Some((start, end)) => {
                self.ranges.lock().unwrap().push((start, end));
                let mut slice = self.body[start as usize..=end as usize].to_vec();
                if self.truncate_range_at == Some(start) {
                    slice.truncate(slice.len() / 2);
                }
                self.template(206)
                    .insert_header("content-range", format!("bytes {start}-{end}/{len}").as_str())
                    .set_body_bytes(slice)
            }
            None => {
                self.full_gets.fetch_add(1, Ordering::SeqCst);
                match self.full_get_status {
                    Some(status) => self.template(status),
                    None => self.template(200).set_body_bytes(self.body.as_ref().clone()),
                }
            }
        }
    }
}

/// Config with small multipart thresholds and millisecond backoff
pub fn test_config(root: &Path) -> Config {
    Config {
        timeout: Duration::from_secs(10),
        temp_dir: root.join("engine"),
        retry: RetryConfig {
            max_retries: 2,
            base_delay: Duration::from_millis(5),
            max_backoff: Duration::from_millis(25),
            jitter: true,
        },
        multipart: MultipartConfig {
            enable_multipart: true,
            multipart_concurrency: 4,
            multipart_min_size_bytes: 4096,
            multipart_min_part_size: 1024,
            progress_interval: Duration::ZERO,
        },
        ..Config::default()
    }
}

/// Number of engine-owned files left in `dir`
pub fn leftover_artifacts(dir: &Path) -> usize {
    std::fs::read_dir(dir)
        .map(|entries| {
            entries
                .filter_map(|e| e.ok())
                .filter(|e| {
                    let name = e.file_name().to_string_lossy().into_owned();
                    name.ends_with(".inflight") || name.ends_with(".parts")
                })
                .count()
        })
        .unwrap_or(0)
}
