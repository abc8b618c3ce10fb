//! Source clients and shared HTTP utilities for the upstream evidence APIs.
//!
//! One process-wide client carries the retry and pacing middleware; each
//! source module wraps it with its own base URL, query shapes, and typed
//! fragment parsing. Nothing here persists responses: the only on-disk
//! artifact is the CGI catalog handled in `utils::download`.

use std::borrow::Cow;
use std::future::Future;
use std::sync::OnceLock;
use std::time::Duration;

use reqwest::header::{HeaderMap, HeaderValue, RETRY_AFTER};
use reqwest_middleware::{ClientBuilder, ClientWithMiddleware};
use reqwest_retry::{Jitter, RetryTransientMiddleware, policies::ExponentialBackoff};
use tracing::warn;

use crate::config;
use crate::error::OncoTierError;

pub(crate) mod cgi;
pub(crate) mod civic;
pub(crate) mod clinicaltrials;
pub(crate) mod myvariant;
pub(crate) mod oncokb;
pub(crate) mod openfda;
pub(crate) mod rate_limit;
pub(crate) mod semantic_scholar;
pub(crate) mod vicc;

const ERROR_BODY_MAX_CHARS: usize = 600;
pub(crate) const DEFAULT_MAX_BODY_BYTES: usize = 8 * 1024 * 1024;
/// The CGI catalog TSV is a bulk download and gets a larger allowance.
pub(crate) const CATALOG_MAX_BODY_BYTES: usize = 64 * 1024 * 1024;

static HTTP_CLIENT: OnceLock<ClientWithMiddleware> = OnceLock::new();
static STREAMING_HTTP_CLIENT: OnceLock<reqwest::Client> = OnceLock::new();

/// Base URL for a source, taken from its env override when one is set.
pub(crate) fn env_base(default: &'static str, env_var: &str) -> Cow<'static, str> {
    match std::env::var(env_var) {
        Ok(value) if !value.trim().is_empty() => Cow::Owned(value.trim().to_string()),
        _ => Cow::Borrowed(default),
    }
}

/// HGNC-style symbols: leading alphanumeric, then alphanumerics, `-`, `_`.
pub(crate) fn is_valid_gene_symbol(symbol: &str) -> bool {
    let mut chars = symbol.chars();
    let Some(first) = chars.next() else {
        return false;
    };
    first.is_ascii_alphanumeric()
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
}

/// Returns the shared HTTP client with retry and pacing middleware.
///
/// - Retry: 3 attempts, exponential backoff 2 s..10 s, no jitter
/// - Pacing: per-lane minimum intervals (`rate_limit`)
pub(crate) fn shared_client() -> Result<ClientWithMiddleware, OncoTierError> {
    if let Some(client) = HTTP_CLIENT.get() {
        return Ok(client.clone());
    }

    let base_client = reqwest::Client::builder()
        .timeout(Duration::from_secs(30))
        .connect_timeout(Duration::from_secs(10))
        .pool_max_idle_per_host(4)
        .user_agent(concat!("oncotier/", env!("CARGO_PKG_VERSION")))
        .build()
        .map_err(OncoTierError::HttpClientInit)?;

    let retry_policy = ExponentialBackoff::builder()
        .retry_bounds(config::RETRY_BASE, config::RETRY_CAP)
        .jitter(Jitter::None)
        .build_with_max_retries(config::DEFAULT_RETRIES);

    let client = ClientBuilder::new(base_client)
        .with(RetryTransientMiddleware::new_with_policy(retry_policy))
        .with(rate_limit::PacingMiddleware::new())
        .build();

    match HTTP_CLIENT.set(client.clone()) {
        Ok(()) => Ok(client),
        Err(_) => HTTP_CLIENT.get().cloned().ok_or_else(|| OncoTierError::Api {
            api: "http-client".into(),
            message: "Shared HTTP client initialization race".into(),
        }),
    }
}

/// Returns the shared HTTP client without middleware, for bulk downloads
/// whose bodies are streamed and therefore cannot replay through the retry
/// middleware. Use [`send_with_retry`] around it.
pub(crate) fn streaming_client() -> Result<reqwest::Client, OncoTierError> {
    if let Some(client) = STREAMING_HTTP_CLIENT.get() {
        return Ok(client.clone());
    }

    let client = reqwest::Client::builder()
        .timeout(Duration::from_secs(120))
        .connect_timeout(Duration::from_secs(10))
        .user_agent(concat!("oncotier/", env!("CARGO_PKG_VERSION")))
        .build()
        .map_err(OncoTierError::HttpClientInit)?;

    match STREAMING_HTTP_CLIENT.set(client.clone()) {
        Ok(()) => Ok(client),
        Err(_) => STREAMING_HTTP_CLIENT
            .get()
            .cloned()
            .ok_or_else(|| OncoTierError::Api {
                api: "http-client".into(),
                message: "Shared streaming HTTP client initialization race".into(),
            }),
    }
}

fn is_retryable_status(status: reqwest::StatusCode) -> bool {
    status.is_server_error() || status == reqwest::StatusCode::TOO_MANY_REQUESTS
}

/// Retry-After carrying integer seconds; HTTP-date forms are ignored.
fn retry_after_hint(headers: &HeaderMap) -> Option<Duration> {
    let field = headers.get(RETRY_AFTER)?.to_str().ok()?;
    field.trim().parse::<u64>().ok().map(Duration::from_secs)
}

/// Delay before retry number `attempt` (1-based): doubling from the base,
/// capped, never shorter than a server-provided Retry-After.
fn backoff_delay(attempt: u32, floor: Option<Duration>) -> Duration {
    let exponent = attempt.saturating_sub(1).min(8);
    let delay = config::RETRY_BASE
        .saturating_mul(1u32 << exponent)
        .min(config::RETRY_CAP);
    match floor {
        Some(hint) => delay.max(hint),
        None => delay,
    }
}

/// Retry wrapper for requests that bypass the middleware stack.
///
/// `build_request` runs once per attempt so non-replayable bodies can be
/// rebuilt. Retries cover 5xx, 429 (honoring Retry-After as a delay
/// floor), timeouts, and connect failures; anything else returns at once.
pub(crate) async fn send_with_retry<F, Fut>(
    api: &str,
    max_retries: u32,
    build_request: F,
) -> Result<reqwest::Response, OncoTierError>
where
    F: Fn() -> Fut,
    Fut: Future<Output = Result<reqwest::Response, reqwest::Error>>,
{
    let mut attempt = 0u32;
    loop {
        attempt += 1;
        let (floor, failure) = match build_request().await {
            Ok(resp) if is_retryable_status(resp.status()) => {
                let floor = (resp.status() == reqwest::StatusCode::TOO_MANY_REQUESTS)
                    .then(|| retry_after_hint(resp.headers()))
                    .flatten();
                (floor, format!("HTTP {}", resp.status()))
            }
            Ok(resp) => return Ok(resp),
            Err(err) if err.is_timeout() || err.is_connect() => (None, err.to_string()),
            Err(err) => return Err(OncoTierError::Http(err)),
        };

        if attempt > max_retries {
            return Err(OncoTierError::Api {
                api: api.to_string(),
                message: format!("{failure} (gave up after {attempt} attempts)"),
            });
        }
        tokio::time::sleep(backoff_delay(attempt, floor)).await;
    }
}

/// Collapses an upstream error body onto one short line for messages.
pub(crate) fn body_excerpt(bytes: &[u8]) -> String {
    let text = String::from_utf8_lossy(bytes);
    let mut flat = text.split_whitespace().collect::<Vec<_>>().join(" ");
    if flat.chars().count() > ERROR_BODY_MAX_CHARS {
        flat = flat.chars().take(ERROR_BODY_MAX_CHARS).collect();
        flat.push('…');
    }
    flat
}

/// Guard before JSON parsing: an HTML body is an upstream error page and is
/// surfaced as such. Other unexpected content types only log; several of
/// these APIs serve JSON under `text/plain`.
pub(crate) fn reject_html_payload(
    api: &str,
    content_type: Option<&HeaderValue>,
    body: &[u8],
) -> Result<(), OncoTierError> {
    let media_type = content_type
        .and_then(|value| value.to_str().ok())
        .and_then(|raw| raw.split(';').next())
        .map(|m| m.trim().to_ascii_lowercase())
        .unwrap_or_default();

    if media_type == "text/html" || media_type == "application/xhtml+xml" {
        return Err(OncoTierError::Api {
            api: api.to_string(),
            message: format!(
                "HTML error page instead of JSON: {}",
                body_excerpt(body)
            ),
        });
    }

    let json_like = media_type.is_empty()
        || media_type == "application/json"
        || media_type == "text/json"
        || media_type.ends_with("+json");
    if !json_like {
        warn!(
            source = api,
            content_type = %media_type,
            "Content type is not JSON; attempting to parse anyway"
        );
    }
    Ok(())
}

pub(crate) async fn read_limited_body(
    resp: reqwest::Response,
    api: &str,
) -> Result<Vec<u8>, OncoTierError> {
    read_body_with_limit(resp, api, DEFAULT_MAX_BODY_BYTES).await
}

pub(crate) async fn read_body_with_limit(
    mut resp: reqwest::Response,
    api: &str,
    max_bytes: usize,
) -> Result<Vec<u8>, OncoTierError> {
    let mut body: Vec<u8> = Vec::new();

    while let Some(chunk) = resp.chunk().await? {
        let next_len = body.len().saturating_add(chunk.len());
        if next_len > max_bytes {
            return Err(OncoTierError::Api {
                api: api.to_string(),
                message: format!("Response body exceeded {max_bytes} bytes"),
            });
        }
        body.extend_from_slice(&chunk);
    }

    Ok(body)
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[test]
    fn html_payloads_are_rejected_with_an_excerpt() {
        let err = reject_html_payload(
            "civic",
            Some(&HeaderValue::from_static("text/html; charset=utf-8")),
            b"<html><h1>503 Service Unavailable</h1></html>",
        )
        .expect_err("HTML must not reach the JSON parser");
        let msg = err.to_string();
        assert!(msg.contains("civic"));
        assert!(msg.contains("503 Service Unavailable"));
    }

    #[test]
    fn json_and_lenient_content_types_pass() {
        let body = b"{\"hits\":[]}";
        for content_type in [
            Some(HeaderValue::from_static("application/json")),
            Some(HeaderValue::from_static("application/vnd.api+json")),
            Some(HeaderValue::from_static("text/plain")),
            None,
        ] {
            assert!(reject_html_payload("myvariant.info", content_type.as_ref(), body).is_ok());
        }
    }

    #[test]
    fn body_excerpt_flattens_and_caps() {
        let short = body_excerpt(b"  upstream\n\terror:\r\n  try later  ");
        assert_eq!(short, "upstream error: try later");

        let long = body_excerpt("x".repeat(5000).as_bytes());
        assert!(long.ends_with('…'));
        assert_eq!(long.chars().count(), ERROR_BODY_MAX_CHARS + 1);
    }

    #[test]
    fn retry_after_hint_reads_integer_seconds_only() {
        let mut headers = HeaderMap::new();
        headers.insert(RETRY_AFTER, HeaderValue::from_static("5"));
        assert_eq!(retry_after_hint(&headers), Some(Duration::from_secs(5)));

        headers.insert(
            RETRY_AFTER,
            HeaderValue::from_static("Wed, 21 Oct 2026 07:28:00 GMT"),
        );
        assert_eq!(retry_after_hint(&headers), None);
        assert_eq!(retry_after_hint(&HeaderMap::new()), None);
    }

    #[test]
    fn backoff_doubles_to_the_cap_and_respects_the_hint() {
        assert_eq!(backoff_delay(1, None), Duration::from_secs(2));
        assert_eq!(backoff_delay(2, None), Duration::from_secs(4));
        assert_eq!(backoff_delay(3, None), Duration::from_secs(8));
        assert_eq!(backoff_delay(4, None), Duration::from_secs(10));
        assert_eq!(backoff_delay(30, None), Duration::from_secs(10));

        assert_eq!(
            backoff_delay(1, Some(Duration::from_secs(6))),
            Duration::from_secs(6)
        );
        assert_eq!(
            backoff_delay(3, Some(Duration::from_secs(1))),
            Duration::from_secs(8)
        );
    }

    #[test]
    fn gene_symbol_validation() {
        for ok in ["BRAF", "NKX2-1", "H3F3A", "MT_CO1"] {
            assert!(is_valid_gene_symbol(ok), "{ok}");
        }
        for bad in ["", "BR AF", "-BRAF", "TP53;EGFR"] {
            assert!(!is_valid_gene_symbol(bad), "{bad}");
        }
    }

    #[tokio::test]
    async fn send_with_retry_survives_a_transient_503() {
        let server = MockServer::start().await;
        // First hit fails, the mock then retires and the fallback answers.
        Mock::given(method("GET"))
            .and(path("/catalog"))
            .respond_with(ResponseTemplate::new(503))
            .up_to_n_times(1)
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/catalog"))
            .respond_with(ResponseTemplate::new(200).set_body_string("gene\tvariant"))
            .expect(1)
            .mount(&server)
            .await;

        let client = reqwest::Client::new();
        let url = format!("{}/catalog", server.uri());
        let resp = send_with_retry("test-api", 2, || client.get(&url).send())
            .await
            .expect("second attempt should succeed");
        assert_eq!(resp.status(), reqwest::StatusCode::OK);
    }

    #[tokio::test]
    async fn send_with_retry_gives_up_after_its_budget() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/broken"))
            .respond_with(ResponseTemplate::new(500))
            .expect(2)
            .mount(&server)
            .await;

        let client = reqwest::Client::new();
        let url = format!("{}/broken", server.uri());
        let err = send_with_retry("test-api", 1, || client.get(&url).send())
            .await
            .expect_err("permanent 500 should exhaust the budget");
        let msg = err.to_string();
        assert!(msg.contains("test-api"));
        assert!(msg.contains("gave up after 2 attempts"));
    }

    #[tokio::test]
    async fn send_with_retry_does_not_retry_client_errors() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/forbidden"))
            .respond_with(ResponseTemplate::new(403))
            .expect(1)
            .mount(&server)
            .await;

        let client = reqwest::Client::new();
        let url = format!("{}/forbidden", server.uri());
        let resp = send_with_retry("test-api", 3, || client.get(&url).send())
            .await
            .expect("4xx statuses are returned to the caller untouched");
        assert_eq!(resp.status(), reqwest::StatusCode::FORBIDDEN);
    }
}
