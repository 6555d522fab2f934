//! HTTP retry policy for provider requests.
//!
//! The schedule itself is `push-config`'s [`push_config::RetryPolicy`]; this
//! module is the mechanism that walks it — deciding what's retryable,
//! computing the delay for a given attempt, and driving the retry loop
//! around a caller-supplied request builder so `claude.rs`/`openai.rs`/
//! `gemini.rs` share one implementation of `ProviderError`'s retry rule.
//!
//! # Retryable conditions
//!
//! - HTTP 408, 409, 429, 5xx
//! - Connection errors
//! - `x-should-retry: true` forces retry
//! - `x-should-retry: false` forbids retry
//!
//! # Headers sent on every attempt
//!
//! - `X-Push-Retry-Count`: 0 for the initial request, 1+ for retries
//! - `Idempotency-Key`: `push-retry-{uuid}`, same value across all attempts
//! - `X-Push-Timeout`: request timeout in seconds (non-streaming only)

use std::time::Duration;

use reqwest::{RequestBuilder, Response, StatusCode, header::HeaderMap};
use uuid::Uuid;

pub use push_config::RetryPolicy as RetryConfig;

/// Parse `Retry-After` or `Retry-After-Ms` headers.
///
/// Returns `Some(duration)` if a valid value is found and `0 < duration < 60s`.
/// Returns `None` if headers are missing, invalid, or out of range.
#[must_use]
pub fn parse_retry_after(headers: &HeaderMap) -> Option<Duration> {
    if let Some(val) = headers.get("retry-after-ms")
        && let Ok(s) = val.to_str()
        && let Ok(ms) = s.parse::<f64>()
    {
        let duration = Duration::from_secs_f64(ms / 1000.0);
        if duration > Duration::ZERO && duration < Duration::from_secs(60) {
            return Some(duration);
        }
    }

    if let Some(val) = headers.get("retry-after")
        && let Ok(s) = val.to_str()
        && let Ok(secs) = s.parse::<u64>()
    {
        let duration = Duration::from_secs(secs);
        if duration > Duration::ZERO && duration < Duration::from_secs(60) {
            return Some(duration);
        }
    }

    None
}

/// Determine if a response status is retryable. Respects an explicit
/// `x-should-retry` header override if the server sends one.
#[must_use]
pub fn should_retry(status: StatusCode, headers: &HeaderMap) -> bool {
    if let Some(val) = headers.get("x-should-retry")
        && let Ok(s) = val.to_str()
    {
        if s.eq_ignore_ascii_case("true") {
            return true;
        }
        if s.eq_ignore_ascii_case("false") {
            return false;
        }
    }

    matches!(status.as_u16(), 408 | 409 | 429 | 500 | 502 | 503 | 504 | 520..=599)
}

/// The delay to wait before the next attempt: `Retry-After`/`Retry-After-Ms`
/// wins if the server sent one, otherwise `config`'s fixed schedule (spec
/// §7: 1s then 3s).
#[must_use]
pub fn calculate_retry_delay(backoff_step: u32, config: &RetryConfig, headers: Option<&HeaderMap>) -> Duration {
    if let Some(headers) = headers
        && let Some(delay) = parse_retry_after(headers)
    {
        return delay;
    }
    config.delay_for(backoff_step)
}

/// Add retry-related headers to a request.
///
/// - `retry_count`: 0 for the initial request, 1+ for retries
/// - `idempotency_key`: same UUID across all attempts
/// - `timeout`: request timeout (omit for streaming)
pub fn add_retry_headers(builder: RequestBuilder, retry_count: u32, idempotency_key: &str, timeout: Option<Duration>) -> RequestBuilder {
    let mut builder = builder.header("X-Push-Retry-Count", retry_count.to_string()).header("Idempotency-Key", idempotency_key);

    if let Some(t) = timeout {
        builder = builder.header("X-Push-Timeout", t.as_secs().to_string());
    }

    builder
}

#[must_use]
pub fn generate_idempotency_key() -> String {
    format!("push-retry-{}", Uuid::new_v4())
}

/// Outcome of a retry operation — a sum type so callers cannot accidentally
/// treat an error response as success.
#[derive(Debug)]
pub enum RetryOutcome {
    /// Request succeeded (2xx status).
    Success(Response),
    /// Request failed with an HTTP error after exhausting retries. The
    /// response is provided for error body inspection.
    HttpError(Response),
    /// Request failed with a connection/transport error after exhausting
    /// retries.
    ConnectionError { attempts: u32, source: reqwest::Error },
    /// Request failed with a non-retryable connection error on first
    /// attempt.
    NonRetryable(reqwest::Error),
}

impl RetryOutcome {
    /// Returns the successful response, or an error description. A
    /// convenience method for callers that want simple error handling.
    pub fn into_response(self) -> Result<Response, String> {
        match self {
            Self::Success(r) => Ok(r),
            Self::HttpError(r) => Err(format!("HTTP error: {}", r.status())),
            Self::ConnectionError { attempts, source } => Err(format!("connection error after {attempts} attempts: {source}")),
            Self::NonRetryable(e) => Err(format!("request error: {e}")),
        }
    }

    #[must_use]
    pub const fn is_success(&self) -> bool {
        matches!(self, Self::Success(_))
    }
}

/// Send a request with automatic retries, following `config`'s schedule:
/// retries on connection errors and retryable HTTP statuses, respects the
/// server's `x-should-retry` override, and sends a consistent
/// `Idempotency-Key` across all attempts.
pub async fn send_with_retry<F>(build_request: F, timeout: Option<Duration>, config: &RetryConfig) -> RetryOutcome
where
    F: Fn() -> RequestBuilder,
{
    let idempotency_key = generate_idempotency_key();

    if config.max_retries == 0 {
        return execute_single_attempt(&build_request, &idempotency_key, timeout, 0).await;
    }

    for retry_count in 0..config.max_retries {
        let request = add_retry_headers(build_request(), retry_count, &idempotency_key, timeout);

        match request.send().await {
            Ok(response) => {
                let status = response.status();
                let headers = response.headers().clone();

                if status.is_success() {
                    return RetryOutcome::Success(response);
                }

                if should_retry(status, &headers) {
                    let delay = calculate_retry_delay(retry_count, config, Some(&headers));
                    tracing::debug!(status = %status, retry_count = retry_count + 1, delay_ms = delay.as_millis(), "retrying after error status");
                    tokio::time::sleep(delay).await;
                    continue;
                }

                return RetryOutcome::HttpError(response);
            }
            Err(e) => {
                if is_retryable_error(&e) {
                    let delay = calculate_retry_delay(retry_count, config, None);
                    tracing::debug!(error = %e, retry_count = retry_count + 1, delay_ms = delay.as_millis(), "retrying after connection error");
                    tokio::time::sleep(delay).await;
                    continue;
                }

                if retry_count == 0 {
                    return RetryOutcome::NonRetryable(e);
                }
                return RetryOutcome::ConnectionError { attempts: retry_count + 1, source: e };
            }
        }
    }

    // Final attempt (retry_count == max_retries): no more retries possible.
    let request = add_retry_headers(build_request(), config.max_retries, &idempotency_key, timeout);

    match request.send().await {
        Ok(response) => {
            if response.status().is_success() {
                RetryOutcome::Success(response)
            } else {
                RetryOutcome::HttpError(response)
            }
        }
        Err(e) => RetryOutcome::ConnectionError { attempts: config.max_retries + 1, source: e },
    }
}

/// Single-attempt path for `max_retries == 0`.
async fn execute_single_attempt<F>(build_request: &F, idempotency_key: &str, timeout: Option<Duration>, retry_count: u32) -> RetryOutcome
where
    F: Fn() -> RequestBuilder,
{
    let request = add_retry_headers(build_request(), retry_count, idempotency_key, timeout);

    match request.send().await {
        Ok(response) => {
            if response.status().is_success() {
                RetryOutcome::Success(response)
            } else {
                RetryOutcome::HttpError(response)
            }
        }
        Err(e) => RetryOutcome::NonRetryable(e),
    }
}

fn is_retryable_error(error: &reqwest::Error) -> bool {
    error.is_connect() || error.is_timeout() || error.is_request()
}


#[cfg(test)]
mod integration_tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    /// Fast schedule for tests: same two-retry cap, no real delay.
    fn fast_retry_config() -> RetryConfig {
        RetryConfig { max_retries: 2, backoff: vec![Duration::from_millis(1), Duration::from_millis(1)] }
    }

    #[tokio::test]
    async fn succeeds_on_first_attempt() {
        let server = MockServer::start().await;
        Mock::given(method("GET")).and(path("/test")).respond_with(ResponseTemplate::new(200).set_body_string("ok")).expect(1).mount(&server).await;

        let client = reqwest::Client::new();
        let url = format!("{}/test", server.uri());
        let outcome = send_with_retry(|| client.get(&url), None, &fast_retry_config()).await;

        match outcome {
            RetryOutcome::Success(response) => assert_eq!(response.status(), StatusCode::OK),
            other => panic!("expected Success, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn retries_a_retryable_status_then_succeeds() {
        let server = MockServer::start().await;
        let attempt = AtomicU32::new(0);
        Mock::given(method("GET"))
            .and(path("/test"))
            .respond_with(move |_: &wiremock::Request| {
                if attempt.fetch_add(1, Ordering::SeqCst) == 0 { ResponseTemplate::new(429) } else { ResponseTemplate::new(200) }
            })
            .expect(2)
            .mount(&server)
            .await;

        let client = reqwest::Client::new();
        let url = format!("{}/test", server.uri());
        let outcome = send_with_retry(|| client.get(&url), None, &fast_retry_config()).await;
        assert!(outcome.is_success());
    }

    #[tokio::test]
    async fn exhausting_retries_returns_http_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET")).and(path("/test")).respond_with(ResponseTemplate::new(503)).expect(3).mount(&server).await;

        let client = reqwest::Client::new();
        let url = format!("{}/test", server.uri());
        let outcome = send_with_retry(|| client.get(&url), None, &fast_retry_config()).await;

        match outcome {
            RetryOutcome::HttpError(response) => assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE),
            other => panic!("expected HttpError, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn non_retryable_status_returns_immediately_without_retrying() {
        let server = MockServer::start().await;
        Mock::given(method("GET")).and(path("/test")).respond_with(ResponseTemplate::new(400)).expect(1).mount(&server).await;

        let client = reqwest::Client::new();
        let url = format!("{}/test", server.uri());
        let outcome = send_with_retry(|| client.get(&url), None, &fast_retry_config()).await;

        match outcome {
            RetryOutcome::HttpError(response) => assert_eq!(response.status(), StatusCode::BAD_REQUEST),
            other => panic!("expected HttpError, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn x_should_retry_header_overrides_default_retry_decision() {
        let server = MockServer::start().await;
        Mock::given(method("GET")).and(path("/test")).respond_with(ResponseTemplate::new(429).insert_header("x-should-retry", "false")).expect(1).mount(&server).await;

        let client = reqwest::Client::new();
        let url = format!("{}/test", server.uri());
        let outcome = send_with_retry(|| client.get(&url), None, &fast_retry_config()).await;

        match outcome {
            RetryOutcome::HttpError(response) => assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS),
            other => panic!("expected HttpError, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn idempotency_key_stays_consistent_across_retries() {
        let server = MockServer::start().await;
        let keys: std::sync::Arc<std::sync::Mutex<Vec<String>>> = std::sync::Arc::new(std::sync::Mutex::new(Vec::new()));
        let keys_clone = keys.clone();

        Mock::given(method("GET"))
            .and(path("/test"))
            .respond_with(move |req: &wiremock::Request| {
                let key = req.headers.get("Idempotency-Key").and_then(|v| v.to_str().ok()).unwrap_or("").to_string();
                let mut seen = keys_clone.lock().unwrap();
                seen.push(key);
                if seen.len() < 3 { ResponseTemplate::new(500) } else { ResponseTemplate::new(200) }
            })
            .expect(3)
            .mount(&server)
            .await;

        let client = reqwest::Client::new();
        let url = format!("{}/test", server.uri());
        let _ = send_with_retry(|| client.get(&url), None, &fast_retry_config()).await;

        let seen = keys.lock().unwrap();
        assert_eq!(seen.len(), 3);
        assert!(seen.iter().all(|k| k == &seen[0]));
    }

    #[tokio::test]
    async fn timeout_header_is_included_when_a_timeout_is_given() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/test"))
            .respond_with(|req: &wiremock::Request| {
                let timeout = req.headers.get("X-Push-Timeout").and_then(|v| v.to_str().ok()).unwrap_or("");
                assert_eq!(timeout, "30");
                ResponseTemplate::new(200)
            })
            .expect(1)
            .mount(&server)
            .await;

        let client = reqwest::Client::new();
        let url = format!("{}/test", server.uri());
        let outcome = send_with_retry(|| client.get(&url), Some(Duration::from_secs(30)), &fast_retry_config()).await;
        assert!(outcome.is_success());
    }
}
