//! HTTP API
//!
//! Axum router exposing ticker, history and streaming endpoints, plus the
//! health and metrics probes used by orchestrators and monitoring.
//!
//! Errors always answer with `{"error": "<message>"}`:
//!
//! | Error                  | Status |
//! |------------------------|--------|
//! | `ExchangeNotSupported` | 404    |
//! | `SymbolNotFound`       | 404    |
//! | `InvalidRequest`       | 400    |
//! | `ExternalApi`          | 502    |
//! | `Internal`             | 500    |

mod error;
mod handlers;
mod server;

pub use error::{ApiError, ErrorBody};
pub use handlers::{HealthResponse, HistoryResponse};
pub use server::{AppState, HttpServer, HttpServerError, SharedState, router};
