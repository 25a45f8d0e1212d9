//! Configuration Module
//!
//! Environment-driven configuration for the proxy service.

mod settings;

pub use settings::{
    CacheSettings, ConfigError, ExchangeEndpoints, ProxyConfig, ServerSettings, StreamSettings,
    UpstreamSettings,
};
