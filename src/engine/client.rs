//! HTTP client cache keyed by route
//!
//! The direct client is built once. Override and forward-proxy clients are
//! built lazily on first use per route, under a write lock, and read-locked
//! afterwards. All clients share the same timeout and User-Agent.

use crate::config::{Config, ProxyTarget};
use crate::error::{Error, Result};
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, RANGE};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::RwLock;

/// How a request reaches the origin
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub(crate) enum Route {
    /// Normal DNS resolution
    Direct,
    /// Connect to `addr` for `host`; the URL port, `Host` header and TLS
    /// server name stay those of the origin
    Override { host: String, addr: SocketAddr },
    /// Through an HTTP(S) forward proxy
    Forward(String),
}

pub(crate) struct ClientCache {
    config: Arc<Config>,
    proxy: Option<ProxyTarget>,
    direct: reqwest::Client,
    routed: RwLock<HashMap<Route, reqwest::Client>>,
}

impl ClientCache {
    pub(crate) fn new(config: Arc<Config>) -> Result<Self> {
        let proxy = config.proxy_target()?;
        let direct = base_builder(&config).build()?;
        Ok(Self {
            config,
            proxy,
            direct,
            routed: RwLock::new(HashMap::new()),
        })
    }

    /// Client for the first attempt and for multipart transfers
    pub(crate) fn direct(&self) -> &reqwest::Client {
        &self.direct
    }

    /// Client for single-stream attempt `attempt` (zero-based) against `url`
    ///
    /// Attempts after the first go through the configured proxy, if any.
    pub(crate) async fn for_attempt(&self, url: &str, attempt: u32) -> Result<reqwest::Client> {
        let route = match (&self.proxy, attempt) {
            (None, _) | (_, 0) => return Ok(self.direct.clone()),
            (Some(target), _) => self.route_for(url, target).await?,
        };

        if let Some(client) = self.routed.read().await.get(&route) {
            return Ok(client.clone());
        }

        let mut routed = self.routed.write().await;
        // Another task may have built it while we waited for the write lock
        if let Some(client) = routed.get(&route) {
            return Ok(client.clone());
        }

        let client = self.build_routed(&route)?;
        tracing::debug!(route = ?route, "Built routed HTTP client");
        routed.insert(route, client.clone());
        Ok(client)
    }

    async fn route_for(&self, url: &str, target: &ProxyTarget) -> Result<Route> {
        match target {
            ProxyTarget::Forward(proxy) => Ok(Route::Forward(proxy.clone())),
            ProxyTarget::Override(address) => {
                let host = url::Url::parse(url)
                    .ok()
                    .and_then(|u| u.host_str().map(str::to_string))
                    .ok_or_else(|| Error::InvalidDescriptor(format!("URL has no host: {url}")))?;
                let addr = resolve_override(address).await?;
                Ok(Route::Override { host, addr })
            }
        }
    }

    fn build_routed(&self, route: &Route) -> Result<reqwest::Client> {
        let builder = base_builder(&self.config);
        let builder = match route {
            Route::Direct => builder,
            Route::Override { host, addr } => builder.resolve(host, *addr),
            Route::Forward(proxy) => builder.proxy(
                reqwest::Proxy::all(proxy.as_str())
                    .map_err(|e| Error::config("proxy_address", e.to_string()))?,
            ),
        };
        Ok(builder.build()?)
    }

    #[cfg(test)]
    pub(crate) async fn routed_len(&self) -> usize {
        self.routed.read().await.len()
    }
}

fn base_builder(config: &Config) -> reqwest::ClientBuilder {
    reqwest::Client::builder()
        .timeout(config.timeout)
        .user_agent(config.user_agent.clone())
}

async fn resolve_override(address: &str) -> Result<SocketAddr> {
    if let Ok(addr) = address.parse::<SocketAddr>() {
        return Ok(addr);
    }
    tokio::net::lookup_host(address)
        .await?
        .next()
        .ok_or_else(|| Error::config("proxy_address", format!("'{address}' did not resolve")))
}

/// Convert descriptor headers into a [`HeaderMap`]
///
/// `Range` is dropped since the engine sets it per request. Invalid names or
/// values are skipped with a warning.
pub(crate) fn header_map(headers: &HashMap<String, String>) -> HeaderMap {
    let mut map = HeaderMap::with_capacity(headers.len());
    for (name, value) in headers {
        let parsed = (
            HeaderName::from_bytes(name.as_bytes()),
            HeaderValue::from_str(value),
        );
        match parsed {
            (Ok(name), _) if name == RANGE => {}
            (Ok(name), Ok(value)) => {
                map.insert(name, value);
            }
            _ => tracing::warn!(header = %name, "Skipping invalid request header"),
        }
    }
    map
}
