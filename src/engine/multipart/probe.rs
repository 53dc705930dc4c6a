//! Range capability probe
//!
//! A `HEAD` request decides whether a resource can be fetched in parallel
//! ranges. Both an explicit `Accept-Ranges: bytes` and a positive
//! `Content-Length` are required; missing either one is a normal negative
//! answer, not an error.

use crate::error::{Error, Result};
use crate::utils;
use reqwest::header::{ACCEPT_RANGES, HeaderMap};
use tokio_util::sync::CancellationToken;

/// What the origin told us about a resource
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub(crate) struct ProbeResult {
    pub(crate) supports_range: bool,
    pub(crate) content_length: u64,
    pub(crate) format: Option<String>,
}

/// Probe `url` for byte-range support
///
/// Returns an error only on transport failure or cancellation.
pub(crate) async fn probe(
    client: &reqwest::Client,
    url: &str,
    headers: &HeaderMap,
    cancel: &CancellationToken,
) -> Result<ProbeResult> {
    let request = client.head(url).headers(headers.clone()).send();
    let response = tokio::select! {
        _ = cancel.cancelled() => return Err(Error::Cancelled),
        response = request => response?,
    };

    if !response.status().is_success() {
        tracing::debug!(url = %url, status = response.status().as_u16(), "Range probe rejected");
        return Ok(ProbeResult::default());
    }

    let headers = response.headers();
    let accepts_bytes = headers
        .get_all(ACCEPT_RANGES)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(','))
        .any(|unit| unit.trim().eq_ignore_ascii_case("bytes"));
    let content_length = utils::content_length(headers).unwrap_or(0);

    let result = ProbeResult {
        supports_range: accepts_bytes && content_length > 0,
        content_length,
        format: utils::response_format(headers),
    };

    tracing::debug!(
        url = %url,
        supports_range = result.supports_range,
        content_length = result.content_length,
        "Range probe finished"
    );

    Ok(result)
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    async fn probe_path(server: &MockServer, route: &str) -> Result<ProbeResult> {
        let client = reqwest::Client::new();
        probe(
            &client,
            &format!("{}{}", server.uri(), route),
            &HeaderMap::new(),
            &CancellationToken::new(),
        )
        .await
    }

    #[tokio::test]
    async fn range_capable_resource_is_eligible() {
        let mock_server = MockServer::start().await;
        Mock::given(method("HEAD"))
            .and(path("/track.mp3"))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("accept-ranges", "bytes")
                    .insert_header("content-type", "audio/mpeg")
                    .insert_header("content-length", "4096")
                    .set_body_bytes(vec![0u8; 4096]),
            )
            .mount(&mock_server)
            .await;

        let result = probe_path(&mock_server, "/track.mp3").await.unwrap();
        assert!(result.supports_range);
        assert_eq!(result.content_length, 4096);
        assert_eq!(result.format.as_deref(), Some("mp3"));
    }

    #[tokio::test]
    async fn missing_accept_ranges_fails_closed() {
        let mock_server = MockServer::start().await;
        Mock::given(method("HEAD"))
            .and(path("/plain"))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("content-length", "4096")
                    .set_body_bytes(vec![0u8; 4096]),
            )
            .mount(&mock_server)
            .await;

        let result = probe_path(&mock_server, "/plain").await.unwrap();
        assert!(!result.supports_range);
        assert_eq!(result.content_length, 4096);
    }

    #[tokio::test]
    async fn accept_ranges_none_fails_closed() {
        let mock_server = MockServer::start().await;
        Mock::given(method("HEAD"))
            .and(path("/none"))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("accept-ranges", "none")
                    .insert_header("content-length", "4096")
                    .set_body_bytes(vec![0u8; 4096]),
            )
            .mount(&mock_server)
            .await;

        assert!(!probe_path(&mock_server, "/none").await.unwrap().supports_range);
    }

    #[tokio::test]
    async fn error_status_is_a_negative_answer() {
        let mock_server = MockServer::start().await;
        Mock::given(method("HEAD"))
            .respond_with(ResponseTemplate::new(405))
            .mount(&mock_server)
            .await;

        let result = probe_path(&mock_server, "/anything").await.unwrap();
        assert_eq!(result, ProbeResult::default());
    }

    #[tokio::test]
    async fn transport_failure_is_an_error() {
        let client = reqwest::Client::new();
        // Nothing listens on the discard port
        let result = probe(
            &client,
            "http://127.0.0.1:9/track.mp3",
            &HeaderMap::new(),
            &CancellationToken::new(),
        )
        .await;

        assert!(matches!(result, Err(Error::Network(_))));
    }

    #[tokio::test]
    async fn cancelled_probe_returns_cancelled() {
        let mock_server = MockServer::start().await;
        Mock::given(method("HEAD"))
            .respond_with(
                ResponseTemplate::new(200).set_delay(std::time::Duration::from_secs(10)),
            )
            .mount(&mock_server)
            .await;

        let cancel = CancellationToken::new();
        cancel.cancel();
        let result = probe(
            &reqwest::Client::new(),
            &format!("{}/slow", mock_server.uri()),
            &HeaderMap::new(),
            &cancel,
        )
        .await;

        assert!(matches!(result, Err(Error::Cancelled)));
    }
}
