//! Download-source resolvers
//!
//! A platform turns a track identifier into a [`DownloadDescriptor`]. Two
//! kinds of platform exist:
//! - [`DescriptorSource`]: compiled into the host application, returns a
//!   descriptor directly
//! - [`ScriptedSource`]: backed by an interpreter or plugin host, returns a
//!   JSON payload that is deserialized into a descriptor at the boundary
//!
//! Both are held in an explicit [`ResolverRegistry`] passed to whoever
//! needs it. There is no process-wide table.

use crate::error::{Error, Result};
use crate::types::DownloadDescriptor;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;

/// A compiled platform that resolves identifiers to descriptors
#[async_trait]
pub trait DescriptorSource: Send + Sync {
    /// Resolve a platform-specific track identifier
    async fn resolve(&self, track_id: &str) -> Result<DownloadDescriptor>;
}

/// A dynamically loaded platform that speaks JSON
#[async_trait]
pub trait ScriptedSource: Send + Sync {
    /// Resolve a track identifier into a descriptor-shaped JSON payload
    async fn resolve_raw(&self, track_id: &str) -> Result<serde_json::Value>;
}

/// A registered platform
#[derive(Clone)]
pub enum SourceResolver {
    /// Native implementation
    Compiled(Arc<dyn DescriptorSource>),
    /// Interpreted implementation crossing a serialized boundary
    Scripted(Arc<dyn ScriptedSource>),
}

impl SourceResolver {
    /// Resolve and validate a descriptor, whichever variant this is
    pub async fn resolve(&self, track_id: &str) -> Result<DownloadDescriptor> {
        let descriptor = match self {
            SourceResolver::Compiled(source) => source.resolve(track_id).await?,
            SourceResolver::Scripted(source) => {
                let payload = source.resolve_raw(track_id).await?;
                serde_json::from_value(payload).map_err(|e| {
                    Error::InvalidDescriptor(format!("scripted resolver payload: {e}"))
                })?
            }
        };
        descriptor.validate()?;
        Ok(descriptor)
    }

    fn kind(&self) -> &'static str {
        match self {
            SourceResolver::Compiled(_) => "compiled",
            SourceResolver::Scripted(_) => "scripted",
        }
    }
}

impl std::fmt::Debug for SourceResolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("SourceResolver").field(&self.kind()).finish()
    }
}

/// Platform name → resolver
#[derive(Clone, Debug, Default)]
pub struct ResolverRegistry {
    resolvers: HashMap<String, SourceResolver>,
}

impl ResolverRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a resolver under a platform name, replacing any previous one
    pub fn register(&mut self, platform: impl Into<String>, resolver: SourceResolver) {
        let platform = platform.into();
        tracing::debug!(platform = %platform, kind = resolver.kind(), "Registered resolver");
        self.resolvers.insert(platform, resolver);
    }

    /// Look up a platform
    pub fn get(&self, platform: &str) -> Option<&SourceResolver> {
        self.resolvers.get(platform)
    }

    /// Registered platform names, sorted
    pub fn platforms(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.resolvers.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    /// Resolve a track identifier on the named platform
    pub async fn resolve(&self, platform: &str, track_id: &str) -> Result<DownloadDescriptor> {
        let resolver = self.get(platform).ok_or_else(|| Error::Config {
            message: format!("no resolver registered for platform '{platform}'"),
            key: None,
        })?;
        resolver.resolve(track_id).await
    }
}
