//! Exchange client error types.

use thiserror::Error;

use crate::application::ports::MarketDataError;
use crate::domain::market::Exchange;

/// Errors from the shared exchange HTTP client.
///
/// Never crosses the port boundary; adapters convert it with
/// [`ExchangeClientError::into_market_error`].
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ExchangeClientError {
    /// The HTTP client could not be constructed.
    #[error("HTTP client build failed: {0}")]
    Build(String),

    /// Connect, timeout or body read failure.
    #[error("Network error: {0}")]
    Network(String),

    /// Non-success HTTP status that is not retried.
    #[error("HTTP {status}: {body}")]
    Status {
        /// Status code.
        status: u16,
        /// Response body, possibly truncated.
        body: String,
    },

    /// Exchange kept answering 429 until attempts ran out.
    #[error("Rate limited, retry after {retry_after_secs}s")]
    RateLimited {
        /// Suggested retry delay in seconds.
        retry_after_secs: u64,
    },

    /// Body did not match the expected shape.
    #[error("Unexpected response: {0}")]
    Decode(String),

    /// Retryable failures persisted through every attempt.
    #[error("Max retries exceeded after {attempts} attempts: {last_error}")]
    MaxRetriesExceeded {
        /// Attempts made.
        attempts: u32,
        /// Last failure seen.
        last_error: String,
    },
}

impl ExchangeClientError {
    /// Convert into the port error for `exchange`.
    #[must_use]
    pub fn into_market_error(self, exchange: Exchange) -> MarketDataError {
        MarketDataError::external(exchange, self.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn converts_to_external_api() {
        let err = ExchangeClientError::Network("connection refused".to_string())
            .into_market_error(Exchange::Coinbase);

        assert_eq!(
            err,
            MarketDataError::ExternalApi {
                exchange: "coinbase".to_string(),
                message: "Network error: connection refused".to_string(),
            }
        );
    }

    #[test]
    fn max_retries_message() {
        let err = ExchangeClientError::MaxRetriesExceeded {
            attempts: 3,
            last_error: "HTTP 503".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "Max retries exceeded after 3 attempts: HTTP 503"
        );
    }
}
