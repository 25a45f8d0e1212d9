//! Application Layer - Use cases and port definitions.
//!
//! This layer contains the market data services and the port interfaces
//! exchange adapters implement.

/// Port interfaces for exchange adapters.
pub mod ports;

/// Ticker fetching, adapter registry and stream brokering.
pub mod services;
