//! Utility functions for URL normalization, response metadata and file cleanup

use crate::types::DownloadDescriptor;
use reqwest::header::{CONTENT_DISPOSITION, CONTENT_LENGTH, CONTENT_TYPE, HeaderMap};
use std::collections::HashMap;
use std::path::Path;

/// Canonicalize a source URL, rewriting a known-stale CDN edge hostname
///
/// Parsed URLs are re-serialized (lowercase scheme and host, default port
/// dropped) so equivalent spellings share one coalescing key. URLs that do
/// not parse are returned trimmed but otherwise unchanged.
///
/// # Examples
///
/// ```
/// use audio_dl::utils::normalize_url;
/// use std::collections::HashMap;
///
/// let rewrites = HashMap::from([("edge1.cdn.test".to_string(), "cdn.test".to_string())]);
/// assert_eq!(
///     normalize_url("https://edge1.cdn.test/a.mp3?sig=1", &rewrites),
///     "https://cdn.test/a.mp3?sig=1"
/// );
/// ```
pub fn normalize_url(raw: &str, rewrites: &HashMap<String, String>) -> String {
    let raw = raw.trim();
    let Ok(mut parsed) = url::Url::parse(raw) else {
        return raw.to_string();
    };

    let replacement = parsed
        .host_str()
        .map(str::to_ascii_lowercase)
        .and_then(|host| rewrites.get(&host).cloned());

    match replacement {
        Some(stable) => match parsed.set_host(Some(&stable)) {
            Ok(()) => parsed.to_string(),
            Err(e) => {
                tracing::warn!(url = raw, replacement = %stable, error = %e, "Host rewrite rejected");
                parsed.to_string()
            }
        },
        None => parsed.to_string(),
    }
}

/// Ordered, de-duplicated candidate list: primary first, then mirrors
///
/// Every entry is normalized through the host-rewrite table before
/// de-duplication, so a stale edge and its stable host count once.
pub fn candidate_urls(
    descriptor: &DownloadDescriptor,
    rewrites: &HashMap<String, String>,
) -> Vec<String> {
    let mut candidates: Vec<String> = Vec::with_capacity(1 + descriptor.candidate_urls.len());

    for raw in std::iter::once(&descriptor.url).chain(descriptor.candidate_urls.iter()) {
        if raw.trim().is_empty() {
            continue;
        }
        let normalized = normalize_url(raw, rewrites);
        if !candidates.contains(&normalized) {
            candidates.push(normalized);
        }
    }

    candidates
}

/// Map an audio `Content-Type` to a format tag
///
/// # Examples
///
/// ```
/// use audio_dl::utils::format_from_content_type;
///
/// assert_eq!(format_from_content_type("audio/mpeg").as_deref(), Some("mp3"));
/// assert_eq!(format_from_content_type("audio/flac; charset=binary").as_deref(), Some("flac"));
/// assert_eq!(format_from_content_type("text/html"), None);
/// ```
#[must_use]
pub fn format_from_content_type(content_type: &str) -> Option<String> {
    let mime = content_type
        .split(';')
        .next()
        .unwrap_or("")
        .trim()
        .to_ascii_lowercase();

    let format = match mime.as_str() {
        "audio/mpeg" | "audio/mp3" => "mp3",
        "audio/flac" | "audio/x-flac" => "flac",
        "audio/ogg" | "audio/vorbis" => "ogg",
        "audio/opus" => "opus",
        "audio/mp4" | "audio/aac" | "audio/x-m4a" => "m4a",
        "audio/wav" | "audio/x-wav" | "audio/wave" => "wav",
        _ => return None,
    };
    Some(format.to_string())
}

/// Extract the filename extension from a `Content-Disposition` header value
///
/// Handles both `filename="track.flac"` and the RFC 5987
/// `filename*=UTF-8''track%20one.flac` form.
#[must_use]
pub fn format_from_content_disposition(value: &str) -> Option<String> {
    for part in value.split(';') {
        let part = part.trim();
        let filename = if let Some(encoded) = part.strip_prefix("filename*=") {
            // charset'lang'encoded-filename
            let encoded = match encoded.rfind('\'') {
                Some(idx) => &encoded[idx + 1..],
                None => encoded,
            };
            match urlencoding::decode(encoded) {
                Ok(decoded) => decoded.into_owned(),
                Err(_) => continue,
            }
        } else if let Some(plain) = part.strip_prefix("filename=") {
            plain.trim_matches('"').to_string()
        } else {
            continue;
        };

        let extension = Path::new(&filename)
            .extension()
            .and_then(|e| e.to_str())
            .map(str::to_ascii_lowercase);
        if extension.is_some() {
            return extension;
        }
    }
    None
}

/// Format tag learned from response headers
///
/// `Content-Type` wins; `Content-Disposition` is consulted when the type is
/// generic (e.g. `application/octet-stream`).
pub fn response_format(headers: &HeaderMap) -> Option<String> {
    let from_type = headers
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .and_then(format_from_content_type);
    if from_type.is_some() {
        return from_type;
    }

    headers
        .get(CONTENT_DISPOSITION)
        .and_then(|v| v.to_str().ok())
        .and_then(format_from_content_disposition)
}

/// Declared `Content-Length`, if present and positive
pub fn content_length(headers: &HeaderMap) -> Option<u64> {
    headers
        .get(CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|s| s.trim().parse::<u64>().ok())
        .filter(|len| *len > 0)
}

/// Remove a file, ignoring "not found" and logging anything else
pub async fn remove_quietly(path: &Path) {
    match tokio::fs::remove_file(path).await {
        Ok(()) => {}
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => {
            tracing::warn!(path = %path.display(), error = %e, "Failed to remove file");
        }
    }
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn rewrites() -> HashMap<String, String> {
        HashMap::from([("dl-edge1.tunecdn.net".to_string(), "dl.tunecdn.net".to_string())])
    }

    #[test]
    fn test_normalize_url_rewrites_stale_edge() {
        assert_eq!(
            normalize_url("https://dl-edge1.tunecdn.net/t/9.mp3?token=abc", &rewrites()),
            "https://dl.tunecdn.net/t/9.mp3?token=abc"
        );
    }

    #[test]
    fn test_normalize_url_leaves_unknown_hosts_alone() {
        let url = "https://media.example.org/t/9.mp3";
        assert_eq!(normalize_url(url, &rewrites()), url);
        assert_eq!(normalize_url("  not a url  ", &rewrites()), "not a url");
    }

    #[test]
    fn test_normalize_url_canonicalizes_equivalent_spellings() {
        let canonical = "http://cdn.test/a.mp3";
        assert_eq!(normalize_url("HTTP://CDN.test/a.mp3", &rewrites()), canonical);
        assert_eq!(normalize_url("http://cdn.test:80/a.mp3", &rewrites()), canonical);
        assert_eq!(
            normalize_url("HTTPS://DL-EDGE1.tunecdn.net/a.mp3", &rewrites()),
            "https://dl.tunecdn.net/a.mp3"
        );
    }

    #[test]
    fn test_normalize_url_keeps_port() {
        assert_eq!(
            normalize_url("http://dl-edge1.tunecdn.net:8080/x", &rewrites()),
            "http://dl.tunecdn.net:8080/x"
        );
    }

    #[test]
    fn test_candidate_urls_orders_and_dedupes() {
        let descriptor = DownloadDescriptor {
            url: "https://dl-edge1.tunecdn.net/a.flac".into(),
            candidate_urls: vec![
                "https://dl.tunecdn.net/a.flac".into(),
                "".into(),
                "https://mirror.example.org/a.flac".into(),
                "https://mirror.example.org/a.flac".into(),
            ],
            ..DownloadDescriptor::default()
        };

        assert_eq!(
            candidate_urls(&descriptor, &rewrites()),
            vec![
                "https://dl.tunecdn.net/a.flac".to_string(),
                "https://mirror.example.org/a.flac".to_string(),
            ]
        );
    }

    #[test]
    fn test_format_from_content_type() {
        assert_eq!(format_from_content_type("audio/mpeg").as_deref(), Some("mp3"));
        assert_eq!(format_from_content_type("Audio/OGG").as_deref(), Some("ogg"));
        assert_eq!(format_from_content_type("audio/mp4").as_deref(), Some("m4a"));
        assert_eq!(format_from_content_type("audio/x-wav").as_deref(), Some("wav"));
        assert_eq!(format_from_content_type("application/octet-stream"), None);
    }

    #[test]
    fn test_format_from_content_disposition() {
        assert_eq!(
            format_from_content_disposition(r#"attachment; filename="Song Title.FLAC""#)
                .as_deref(),
            Some("flac")
        );
        assert_eq!(
            format_from_content_disposition("attachment; filename*=UTF-8''caf%C3%A9.opus")
                .as_deref(),
            Some("opus")
        );
        assert_eq!(format_from_content_disposition("inline"), None);
        assert_eq!(
            format_from_content_disposition(r#"attachment; filename="noext""#),
            None
        );
    }

    #[tokio::test]
    async fn test_response_format_prefers_content_type() {
        let mock_server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/typed"))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("content-type", "audio/flac")
                    .insert_header("content-disposition", r#"attachment; filename="a.mp3""#)
                    .set_body_bytes(vec![0u8; 16]),
            )
            .mount(&mock_server)
            .await;

        Mock::given(method("GET"))
            .and(path("/generic"))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("content-type", "application/octet-stream")
                    .insert_header("content-disposition", r#"attachment; filename="a.mp3""#)
                    .set_body_bytes(vec![0u8; 16]),
            )
            .mount(&mock_server)
            .await;

        let typed = reqwest::get(format!("{}/typed", mock_server.uri()))
            .await
            .unwrap();
        assert_eq!(response_format(typed.headers()).as_deref(), Some("flac"));
        assert_eq!(content_length(typed.headers()), Some(16));

        let generic = reqwest::get(format!("{}/generic", mock_server.uri()))
            .await
            .unwrap();
        assert_eq!(response_format(generic.headers()).as_deref(), Some("mp3"));
    }

    #[tokio::test]
    async fn test_remove_quietly_ignores_missing_files() {
        let temp_dir = TempDir::new().unwrap();
        let file = temp_dir.path().join("gone.part");

        remove_quietly(&file).await;

        tokio::fs::write(&file, b"x").await.unwrap();
        remove_quietly(&file).await;
        assert!(!file.exists());
    }
}
