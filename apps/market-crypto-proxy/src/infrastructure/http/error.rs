//! HTTP error mapping.
//!
//! Every failed request answers with `{"error": "<message>"}` and a status
//! derived from the [`MarketDataError`] kind.

use axum::Json;
use axum::extract::rejection::QueryRejection;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;

use crate::application::ports::MarketDataError;

/// Error body shared by every endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ErrorBody {
    /// Human-readable message.
    pub error: String,
}

/// Error returned by HTTP handlers.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error(transparent)]
pub struct ApiError(#[from] MarketDataError);

impl ApiError {
    /// Status code this error is reported with.
    #[must_use]
    pub const fn status(&self) -> StatusCode {
        match &self.0 {
            MarketDataError::ExchangeNotSupported { .. } | MarketDataError::SymbolNotFound { .. } => {
                StatusCode::NOT_FOUND
            }
            MarketDataError::InvalidRequest { .. } => StatusCode::BAD_REQUEST,
            MarketDataError::ExternalApi { .. } => StatusCode::BAD_GATEWAY,
            MarketDataError::Internal { .. } => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Underlying domain error.
    #[must_use]
    pub const fn inner(&self) -> &MarketDataError {
        &self.0
    }

    /// Reject a request that omits a required query parameter.
    #[must_use]
    pub fn missing_parameter(name: &str) -> Self {
        Self(MarketDataError::invalid_request(format!(
            "missing required parameter: {name}"
        )))
    }
}

impl From<QueryRejection> for ApiError {
    fn from(rejection: QueryRejection) -> Self {
        Self(MarketDataError::invalid_request(rejection.body_text()))
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::warn!(status = status.as_u16(), kind = self.0.kind(), error = %self.0, "Request failed");
        } else {
            tracing::debug!(status = status.as_u16(), kind = self.0.kind(), error = %self.0, "Request rejected");
        }

        let body = ErrorBody {
            error: self.0.to_string(),
        };
        (status, Json(body)).into_response()
    }
}
