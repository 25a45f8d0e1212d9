//! HTTP client wrapper with retry logic.

use std::time::Instant;

use reqwest::{Client, StatusCode};
use serde::de::DeserializeOwned;

use super::error::ExchangeClientError;
use super::retry::RetryPolicy;
use crate::domain::market::Exchange;
use crate::infrastructure::config::UpstreamSettings;
use crate::infrastructure::metrics::{self, UpstreamOperation, UpstreamOutcome};

const USER_AGENT: &str = concat!("market-crypto-proxy/", env!("CARGO_PKG_VERSION"));
const MAX_ERROR_BODY: usize = 512;

/// HTTP client for one exchange's public REST API.
#[derive(Debug, Clone)]
pub struct ExchangeHttpClient {
    client: Client,
    exchange: Exchange,
    base_url: String,
    retry: RetryPolicy,
}

impl ExchangeHttpClient {
    /// Create a client for `exchange` using the shared upstream settings.
    ///
    /// # Errors
    ///
    /// Returns [`ExchangeClientError::Build`] if the underlying client
    /// cannot be constructed.
    pub fn new(exchange: Exchange, settings: &UpstreamSettings) -> Result<Self, ExchangeClientError> {
        let client = Client::builder()
            .timeout(settings.timeout)
            .user_agent(USER_AGENT)
            .build()
            .map_err(|e| ExchangeClientError::Build(e.to_string()))?;

        Ok(Self {
            client,
            exchange,
            base_url: settings
                .endpoints
                .url_for(exchange)
                .trim_end_matches('/')
                .to_string(),
            retry: RetryPolicy::from_settings(settings),
        })
    }

    /// Replace the retry policy.
    #[must_use]
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// GET `path` with `query` and decode the JSON body.
    ///
    /// Network failures, 408 and 5xx are retried with backoff; 429 is
    /// retried honoring `Retry-After` (capped at the policy's maximum
    /// delay). Other statuses fail immediately with
    /// [`ExchangeClientError::Status`].
    ///
    /// # Errors
    ///
    /// Returns an [`ExchangeClientError`] describing the last failure.
    pub async fn get_json<T: DeserializeOwned>(
        &self,
        operation: UpstreamOperation,
        path: &str,
        query: &[(&str, String)],
    ) -> Result<T, ExchangeClientError> {
        let started = Instant::now();
        let result = self.request(path, query).await;

        let outcome = match &result {
            Ok(_) => UpstreamOutcome::Success,
            Err(ExchangeClientError::Decode(_)) => UpstreamOutcome::DecodeError,
            Err(
                ExchangeClientError::Network(_)
                | ExchangeClientError::Build(_)
                | ExchangeClientError::MaxRetriesExceeded { .. },
            ) => UpstreamOutcome::NetworkError,
            Err(_) => UpstreamOutcome::ApiError,
        };
        metrics::record_upstream_request(self.exchange, operation, outcome, started.elapsed());

        result
    }

    async fn request<T: DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, String)],
    ) -> Result<T, ExchangeClientError> {
        let url = format!("{}{path}", self.base_url);
        let mut backoff = self.retry.backoff();

        loop {
            let response = match self.client.get(&url).query(query).send().await {
                Ok(resp) => resp,
                Err(e) => {
                    let message = describe_reqwest_error(&e);
                    if let Some(delay) = backoff.next_backoff() {
                        tracing::warn!(
                            exchange = %self.exchange,
                            path,
                            error = %message,
                            delay_ms = delay.as_millis(),
                            attempt = backoff.attempt(),
                            "Network error, retrying"
                        );
                        tokio::time::sleep(delay).await;
                        continue;
                    }
                    return Err(if backoff.attempt() > 1 {
                        ExchangeClientError::MaxRetriesExceeded {
                            attempts: backoff.attempt(),
                            last_error: message,
                        }
                    } else {
                        ExchangeClientError::Network(message)
                    });
                }
            };

            let status = response.status();

            if status.is_success() {
                let text = response
                    .text()
                    .await
                    .map_err(|e| ExchangeClientError::Network(describe_reqwest_error(&e)))?;
                return serde_json::from_str(&text)
                    .map_err(|e| ExchangeClientError::Decode(e.to_string()));
            }

            let retry_after = response
                .headers()
                .get(reqwest::header::RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.trim().parse::<u64>().ok());

            let mut body = response.text().await.unwrap_or_default();
            truncate_on_char_boundary(&mut body, MAX_ERROR_BODY);

            match categorize_status(status) {
                ErrorCategory::RateLimited => {
                    if let Some(delay) = backoff.next_backoff() {
                        let delay = retry_after
                            .map_or(delay, std::time::Duration::from_secs)
                            .min(backoff.max_backoff());
                        tracing::warn!(
                            exchange = %self.exchange,
                            path,
                            delay_ms = delay.as_millis(),
                            "Rate limited, retrying"
                        );
                        tokio::time::sleep(delay).await;
                        continue;
                    }
                    return Err(ExchangeClientError::RateLimited {
                        retry_after_secs: retry_after.unwrap_or(1),
                    });
                }
                ErrorCategory::Retryable => {
                    if let Some(delay) = backoff.next_backoff() {
                        tracing::warn!(
                            exchange = %self.exchange,
                            path,
                            status = status.as_u16(),
                            delay_ms = delay.as_millis(),
                            attempt = backoff.attempt(),
                            "Retryable error, retrying"
                        );
                        tokio::time::sleep(delay).await;
                        continue;
                    }
                    let last_error = format!("HTTP {}: {body}", status.as_u16());
                    return Err(if backoff.attempt() > 1 {
                        ExchangeClientError::MaxRetriesExceeded {
                            attempts: backoff.attempt(),
                            last_error,
                        }
                    } else {
                        ExchangeClientError::Status {
                            status: status.as_u16(),
                            body,
                        }
                    });
                }
                ErrorCategory::NonRetryable => {
                    tracing::debug!(
                        exchange = %self.exchange,
                        path,
                        status = status.as_u16(),
                        body = %body,
                        "Exchange rejected request"
                    );
                    return Err(ExchangeClientError::Status {
                        status: status.as_u16(),
                        body,
                    });
                }
            }
        }
    }
}

/// Error category for determining retry behavior.
#[derive(Debug, PartialEq, Eq)]
enum ErrorCategory {
    RateLimited,
    Retryable,
    NonRetryable,
}

/// Categorize HTTP status code for retry handling.
const fn categorize_status(status: StatusCode) -> ErrorCategory {
    match status.as_u16() {
        429 => ErrorCategory::RateLimited,
        408 | 500 | 502 | 503 | 504 => ErrorCategory::Retryable,
        _ => ErrorCategory::NonRetryable,
    }
}

fn describe_reqwest_error(err: &reqwest::Error) -> String {
    if err.is_timeout() {
        format!("request timed out: {err}")
    } else if err.is_connect() {
        format!("connection failed: {err}")
    } else {
        err.to_string()
    }
}

fn truncate_on_char_boundary(s: &mut String, max: usize) {
    if s.len() <= max {
        return;
    }
    let mut cut = max;
    while !s.is_char_boundary(cut) {
        cut -= 1;
    }
    s.truncate(cut);
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use serde_json::Value;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::*;

    fn settings_for(server: &MockServer) -> UpstreamSettings {
        let mut settings = UpstreamSettings {
            timeout: Duration::from_secs(2),
            initial_backoff: Duration::from_millis(1),
            max_backoff: Duration::from_millis(5),
            jitter_factor: 0.0,
            ..UpstreamSettings::default()
        };
        settings.endpoints.binance = server.uri();
        settings
    }

    #[test]
    fn categorize_rate_limited() {
        assert_eq!(
            categorize_status(StatusCode::TOO_MANY_REQUESTS),
            ErrorCategory::RateLimited
        );
    }

    #[test]
    fn categorize_retryable() {
        for status in [
            StatusCode::REQUEST_TIMEOUT,
            StatusCode::INTERNAL_SERVER_ERROR,
            StatusCode::BAD_GATEWAY,
            StatusCode::SERVICE_UNAVAILABLE,
            StatusCode::GATEWAY_TIMEOUT,
        ] {
            assert_eq!(categorize_status(status), ErrorCategory::Retryable);
        }
    }

    #[test]
    fn categorize_non_retryable() {
        for status in [
            StatusCode::BAD_REQUEST,
            StatusCode::NOT_FOUND,
            StatusCode::FORBIDDEN,
        ] {
            assert_eq!(categorize_status(status), ErrorCategory::NonRetryable);
        }
    }

    #[test]
    fn truncate_respects_char_boundaries() {
        let mut s = "ab€cd".to_string();
        truncate_on_char_boundary(&mut s, 3);
        assert_eq!(s, "ab");
    }

    #[tokio::test]
    async fn get_json_decodes_success() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/ping"))
            .and(query_param("a", "1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"ok": true})))
            .expect(1)
            .mount(&server)
            .await;

        let client = ExchangeHttpClient::new(Exchange::Binance, &settings_for(&server)).unwrap();
        let body: Value = client
            .get_json(UpstreamOperation::Ticker, "/ping", &[("a", "1".to_string())])
            .await
            .unwrap();

        assert_eq!(body["ok"], true);
    }

    #[tokio::test]
    async fn retries_server_errors_until_exhausted() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/flaky"))
            .respond_with(ResponseTemplate::new(503).set_body_string("busy"))
            .expect(3)
            .mount(&server)
            .await;

        let client = ExchangeHttpClient::new(Exchange::Binance, &settings_for(&server)).unwrap();
        let err = client
            .get_json::<Value>(UpstreamOperation::Ticker, "/flaky", &[])
            .await
            .unwrap_err();

        assert_eq!(
            err,
            ExchangeClientError::MaxRetriesExceeded {
                attempts: 3,
                last_error: "HTTP 503: busy".to_string(),
            }
        );
    }

    #[tokio::test]
    async fn client_errors_are_not_retried() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/missing"))
            .respond_with(ResponseTemplate::new(404).set_body_string("nope"))
            .expect(1)
            .mount(&server)
            .await;

        let client = ExchangeHttpClient::new(Exchange::Binance, &settings_for(&server)).unwrap();
        let err = client
            .get_json::<Value>(UpstreamOperation::Ticker, "/missing", &[])
            .await
            .unwrap_err();

        assert_eq!(
            err,
            ExchangeClientError::Status {
                status: 404,
                body: "nope".to_string(),
            }
        );
    }

    #[tokio::test]
    async fn malformed_body_is_decode_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/garbage"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<html>"))
            .mount(&server)
            .await;

        let client = ExchangeHttpClient::new(Exchange::Binance, &settings_for(&server)).unwrap();
        let err = client
            .get_json::<Value>(UpstreamOperation::Ticker, "/garbage", &[])
            .await
            .unwrap_err();

        assert!(matches!(err, ExchangeClientError::Decode(_)));
    }

    #[tokio::test]
    async fn slow_upstream_times_out() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/slow"))
            .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_millis(500)))
            .mount(&server)
            .await;

        let mut settings = settings_for(&server);
        settings.timeout = Duration::from_millis(50);
        let client = ExchangeHttpClient::new(Exchange::Binance, &settings)
            .unwrap()
            .with_retry(RetryPolicy::no_retry());

        let err = client
            .get_json::<Value>(UpstreamOperation::Ticker, "/slow", &[])
            .await
            .unwrap_err();

        match err {
            ExchangeClientError::Network(message) => assert!(message.contains("timed out")),
            other => panic!("expected timeout, got {other:?}"),
        }
    }
}
