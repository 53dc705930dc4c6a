//! # audio-dl
//!
//! Reliable audio download engine for bot-style applications that serve many
//! simultaneous requests against a small set of frequently repeated URLs.
//!
//! ## Design Philosophy
//!
//! audio-dl is designed to be:
//! - **Stampede-proof** - Concurrent requests for one source share a single transfer
//! - **Fast** - Range-capable origins are fetched in parallel parts
//! - **Resilient** - Mirrors, proxy override and jittered backoff between attempts
//! - **Library-first** - Consumes a download descriptor, produces bytes on disk
//!
//! ## Quick Start
//!
//! ```no_run
//! use audio_dl::{Config, DownloadDescriptor, DownloadService, ProgressFn};
//! use std::sync::Arc;
//! use tokio_util::sync::CancellationToken;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let service = DownloadService::new(Config {
//!         proxy_address: Some("203.0.113.7:443".to_string()),
//!         ..Default::default()
//!     })?;
//!
//!     let descriptor = DownloadDescriptor {
//!         candidate_urls: vec!["https://mirror.example.com/t/1.flac".to_string()],
//!         size: 31_457_280,
//!         format: "flac".to_string(),
//!         ..DownloadDescriptor::new("https://cdn.example.com/t/1.flac")
//!     };
//!
//!     let progress: ProgressFn = Arc::new(|written, total| {
//!         println!("{written}/{total}");
//!     });
//!
//!     let report = service
//!         .download(
//!             &descriptor,
//!             "/tmp/1.flac".as_ref(),
//!             Some(progress),
//!             &CancellationToken::new(),
//!         )
//!         .await?;
//!     println!("{:?} via {:?}", report.bytes_written, report.path);
//!
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::unwrap_used)]
#![warn(clippy::expect_used)]

/// Checksum parsing and verification
pub mod checksum;
/// Configuration types
pub mod config;
/// Download engine (decomposed into focused submodules)
pub mod engine;
/// Error types
pub mod error;
/// Download-source resolver registry
pub mod resolver;
/// Retry logic with exponential backoff
pub mod retry;
/// Core types
pub mod types;
/// URL normalization and response metadata helpers
pub mod utils;

// Re-export commonly used types
pub use config::{Config, MultipartConfig, ProxyTarget, RetryConfig};
pub use engine::DownloadService;
pub use error::{Error, ErrorKind, Result};
pub use resolver::{DescriptorSource, ResolverRegistry, ScriptedSource, SourceResolver};
pub use retry::IsRetryable;
pub use types::{DownloadDescriptor, DownloadReport, ProgressFn, TransferPath};
