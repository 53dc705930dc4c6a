//! Configuration types for audio-dl

use serde::{Deserialize, Serialize};
use std::{collections::HashMap, net::SocketAddr, path::PathBuf, time::Duration};

use crate::error::{Error, Result};

/// Retry configuration for single-stream attempts
///
/// Backoff between attempts is `min(base_delay * 2^attempt, max_backoff)`,
/// scaled by a random factor in `[0.75, 1.25]` when `jitter` is enabled.
/// With the default one-second base this is `2^attempt` seconds.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Single-stream attempts per candidate URL (default: 3)
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Unit of the exponential backoff (default: 1 second)
    #[serde(default = "default_base_delay", with = "millis_serde")]
    pub base_delay: Duration,

    /// Upper bound on the base backoff delay (default: 30 seconds)
    #[serde(default = "default_max_backoff", with = "duration_serde")]
    pub max_backoff: Duration,

    /// Scale each delay by a random factor (default: true)
    #[serde(default = "default_true")]
    pub jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            base_delay: default_base_delay(),
            max_backoff: default_max_backoff(),
            jitter: true,
        }
    }
}

/// Parallel ranged transfer settings
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct MultipartConfig {
    /// Try a parallel ranged transfer before single-stream (default: true)
    #[serde(default = "default_true")]
    pub enable_multipart: bool,

    /// Number of part workers per transfer (default: 4)
    #[serde(default = "default_multipart_concurrency")]
    pub multipart_concurrency: usize,

    /// Resources smaller than this always use single-stream (default: 2 MiB)
    #[serde(default = "default_multipart_min_size")]
    pub multipart_min_size_bytes: u64,

    /// Floor for the computed part size (default: 1 MiB)
    ///
    /// The part size is `total / concurrency`, but never less than this,
    /// which keeps modest files from fanning out into many tiny requests.
    #[serde(default = "default_multipart_min_part_size")]
    pub multipart_min_part_size: u64,

    /// Minimum time between progress callbacks (default: 500 ms)
    #[serde(default = "default_progress_interval", with = "millis_serde")]
    pub progress_interval: Duration,
}

impl Default for MultipartConfig {
    fn default() -> Self {
        Self {
            enable_multipart: true,
            multipart_concurrency: default_multipart_concurrency(),
            multipart_min_size_bytes: default_multipart_min_size(),
            multipart_min_part_size: default_multipart_min_part_size(),
            progress_interval: default_progress_interval(),
        }
    }
}

/// Main configuration for [`crate::DownloadService`]
///
/// Retry and multipart settings are flattened, so the serialized form is a
/// single flat object:
///
/// ```json
/// { "timeout": 60, "max_retries": 3, "enable_multipart": true, "multipart_concurrency": 4 }
/// ```
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Config {
    /// Whole-request timeout (default: 60 seconds)
    #[serde(default = "default_timeout", with = "duration_serde")]
    pub timeout: Duration,

    /// Route retried attempts through this address or proxy URL
    ///
    /// Either `ip:port` / `host:port` (connection override: the request
    /// still carries the origin's `Host` header and TLS server name) or an
    /// `http://` / `https://` forward proxy URL.
    #[serde(default)]
    pub proxy_address: Option<String>,

    /// Verify declared checksums after transfer (default: true)
    #[serde(default = "default_true")]
    pub check_checksum: bool,

    /// Accept `written >= expected` instead of exact size equality (default: false)
    #[serde(default)]
    pub lenient_size: bool,

    /// Directory for private leader artifacts and part files
    #[serde(default = "default_temp_dir")]
    pub temp_dir: PathBuf,

    /// Stale CDN edge hostname → stable hostname
    #[serde(default = "default_host_rewrites")]
    pub host_rewrites: HashMap<String, String>,

    /// User-Agent sent when the descriptor does not set one
    #[serde(default = "default_user_agent")]
    pub user_agent: String,

    /// Retry behavior
    #[serde(flatten)]
    pub retry: RetryConfig,

    /// Parallel ranged transfer behavior
    #[serde(flatten)]
    pub multipart: MultipartConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            timeout: default_timeout(),
            proxy_address: None,
            check_checksum: true,
            lenient_size: false,
            temp_dir: default_temp_dir(),
            host_rewrites: default_host_rewrites(),
            user_agent: default_user_agent(),
            retry: RetryConfig::default(),
            multipart: MultipartConfig::default(),
        }
    }
}

/// Where retried attempts are sent
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ProxyTarget {
    /// Connect to this address instead of resolving the URL host
    Override(String),
    /// Forward through an HTTP(S) proxy
    Forward(String),
}

impl Config {
    /// Check invariants that cannot be expressed in the type system
    pub fn validate(&self) -> Result<()> {
        if self.timeout.is_zero() {
            return Err(Error::config("timeout", "timeout must be greater than zero"));
        }
        if self.retry.max_retries == 0 {
            return Err(Error::config(
                "max_retries",
                "at least one single-stream attempt is required",
            ));
        }
        if self.multipart.multipart_concurrency == 0 {
            return Err(Error::config(
                "multipart_concurrency",
                "multipart concurrency must be at least 1",
            ));
        }
        if self.multipart.multipart_min_part_size == 0 {
            return Err(Error::config(
                "multipart_min_part_size",
                "minimum part size must be greater than zero",
            ));
        }
        self.proxy_target()?;
        Ok(())
    }

    /// Parse `proxy_address` into a [`ProxyTarget`]
    pub fn proxy_target(&self) -> Result<Option<ProxyTarget>> {
        let Some(raw) = self.proxy_address.as_deref().map(str::trim) else {
            return Ok(None);
        };
        if raw.is_empty() {
            return Ok(None);
        }

        if raw.starts_with("http://") || raw.starts_with("https://") {
            url::Url::parse(raw)
                .map_err(|e| Error::config("proxy_address", format!("invalid proxy URL: {e}")))?;
            return Ok(Some(ProxyTarget::Forward(raw.to_string())));
        }

        if raw.parse::<SocketAddr>().is_ok() {
            return Ok(Some(ProxyTarget::Override(raw.to_string())));
        }

        // host:port, resolved when the override client is built
        match raw.rsplit_once(':') {
            Some((host, port)) if !host.is_empty() && port.parse::<u16>().is_ok() => {
                Ok(Some(ProxyTarget::Override(raw.to_string())))
            }
            _ => Err(Error::config(
                "proxy_address",
                format!("expected host:port or http(s) proxy URL, got '{raw}'"),
            )),
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_timeout() -> Duration {
    Duration::from_secs(60)
}

fn default_max_retries() -> u32 {
    3
}

fn default_base_delay() -> Duration {
    Duration::from_secs(1)
}

fn default_max_backoff() -> Duration {
    Duration::from_secs(30)
}

fn default_multipart_concurrency() -> usize {
    4
}

fn default_multipart_min_size() -> u64 {
    2 * 1024 * 1024
}

fn default_multipart_min_part_size() -> u64 {
    1024 * 1024
}

fn default_progress_interval() -> Duration {
    Duration::from_millis(500)
}

fn default_temp_dir() -> PathBuf {
    std::env::temp_dir().join("audio-dl")
}

fn default_user_agent() -> String {
    concat!("audio-dl/", env!("CARGO_PKG_VERSION")).to_string()
}

fn default_host_rewrites() -> HashMap<String, String> {
    [
        ("dl-edge1.tunecdn.net", "dl.tunecdn.net"),
        ("dl-edge2.tunecdn.net", "dl.tunecdn.net"),
        ("old-media.sndstatic.com", "media.sndstatic.com"),
    ]
    .into_iter()
    .map(|(from, to)| (from.to_string(), to.to_string()))
    .collect()
}

// Duration serialization helper (whole seconds)
mod duration_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(duration.as_secs())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let secs = u64::deserialize(deserializer)?;
        Ok(Duration::from_secs(secs))
    }
}

// Duration serialization helper (milliseconds)
mod millis_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(duration.as_millis() as u64)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}
