//! Infrastructure Layer - Adapters and external integrations.
//!
//! This layer contains the exchange adapters implementing the application
//! ports, plus the cache, HTTP surface and process-level plumbing.

/// TTL + LRU cache used for tickers.
pub mod cache;

/// Configuration loaded from the environment.
pub mod config;

/// REST adapters for the supported exchanges.
pub mod exchanges;

/// Public HTTP API, health probes and metrics endpoint.
pub mod http;

/// Prometheus metrics instrumentation.
pub mod metrics;

/// OpenTelemetry tracing integration.
pub mod telemetry;
