//! Proxy Configuration Settings
//!
//! Configuration types for the market data proxy, loaded from environment
//! variables. Every setting has a default, so an empty environment yields a
//! working configuration.

use std::time::Duration;

use crate::domain::market::Exchange;

/// HTTP listener settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerSettings {
    /// Interface to bind.
    pub host: String,
    /// Port to bind.
    pub port: u16,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8000,
        }
    }
}

/// Ticker cache settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheSettings {
    /// How long a cached ticker stays fresh.
    pub ttl: Duration,
    /// Maximum cached `(exchange, symbol)` pairs.
    pub capacity: usize,
    /// Period of the background expiry sweep.
    pub sweep_interval: Duration,
    /// Share one upstream call between concurrent misses on the same key.
    pub coalesce_requests: bool,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            ttl: Duration::from_secs(10),
            capacity: 1_000,
            sweep_interval: Duration::from_secs(30),
            coalesce_requests: true,
        }
    }
}

/// Streaming subscription settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamSettings {
    /// Poll interval used when the client does not pass one.
    pub default_interval: Duration,
    /// Smallest poll interval a client may request.
    pub min_interval: Duration,
    /// Buffered events per subscription before the poller waits on the client.
    pub channel_capacity: usize,
}

impl Default for StreamSettings {
    fn default() -> Self {
        Self {
            default_interval: Duration::from_secs(5),
            min_interval: Duration::from_secs(1),
            channel_capacity: 16,
        }
    }
}

/// REST base URLs per exchange.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExchangeEndpoints {
    /// Binance spot API.
    pub binance: String,
    /// Kraken public API.
    pub kraken: String,
    /// Coinbase Exchange API.
    pub coinbase: String,
    /// Huobi spot API.
    pub huobi: String,
}

impl Default for ExchangeEndpoints {
    fn default() -> Self {
        Self {
            binance: "https://api.binance.com".to_string(),
            kraken: "https://api.kraken.com".to_string(),
            coinbase: "https://api.exchange.coinbase.com".to_string(),
            huobi: "https://api.huobi.pro".to_string(),
        }
    }
}

impl ExchangeEndpoints {
    /// Base URL for `exchange`.
    #[must_use]
    pub fn url_for(&self, exchange: Exchange) -> &str {
        match exchange {
            Exchange::Binance => &self.binance,
            Exchange::Kraken => &self.kraken,
            Exchange::Coinbase => &self.coinbase,
            Exchange::Huobi => &self.huobi,
        }
    }
}

/// Outbound HTTP settings shared by every exchange adapter.
#[derive(Debug, Clone, PartialEq)]
pub struct UpstreamSettings {
    /// Per-request timeout.
    pub timeout: Duration,
    /// Total attempts per call, including the first.
    pub max_attempts: u32,
    /// Delay before the first retry.
    pub initial_backoff: Duration,
    /// Cap on the retry delay.
    pub max_backoff: Duration,
    /// Growth factor between retries.
    pub backoff_multiplier: f64,
    /// Jitter as a fraction of the delay (0.1 = ±10%).
    pub jitter_factor: f64,
    /// Base URLs.
    pub endpoints: ExchangeEndpoints,
}

impl Default for UpstreamSettings {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(10),
            max_attempts: 3,
            initial_backoff: Duration::from_millis(200),
            max_backoff: Duration::from_millis(2_000),
            backoff_multiplier: 2.0,
            jitter_factor: 0.1,
            endpoints: ExchangeEndpoints::default(),
        }
    }
}

/// Complete proxy configuration.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProxyConfig {
    /// HTTP listener.
    pub server: ServerSettings,
    /// Ticker cache.
    pub cache: CacheSettings,
    /// Streaming subscriptions.
    pub stream: StreamSettings,
    /// Exchange HTTP calls.
    pub upstream: UpstreamSettings,
}

impl ProxyConfig {
    /// Create configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidValue`] if a setting is out of range.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Create configuration from an arbitrary key lookup.
    ///
    /// Unset or unparsable values fall back to their defaults.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidValue`] if a setting is out of range.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let env = EnvReader { lookup };

        let server_defaults = ServerSettings::default();
        let server = ServerSettings {
            host: env.string("MCP_HTTP_HOST", server_defaults.host),
            port: env.parse("MCP_HTTP_PORT", server_defaults.port),
        };

        let cache_defaults = CacheSettings::default();
        let cache = CacheSettings {
            ttl: env.duration_secs("MCP_CACHE_TTL_SECS", cache_defaults.ttl),
            capacity: env.parse("MCP_CACHE_CAPACITY", cache_defaults.capacity),
            sweep_interval: env.duration_secs(
                "MCP_CACHE_SWEEP_INTERVAL_SECS",
                cache_defaults.sweep_interval,
            ),
            coalesce_requests: env.bool("MCP_COALESCE_REQUESTS", cache_defaults.coalesce_requests),
        };

        let stream_defaults = StreamSettings::default();
        let stream = StreamSettings {
            default_interval: env.duration_secs(
                "MCP_STREAM_DEFAULT_INTERVAL_SECS",
                stream_defaults.default_interval,
            ),
            min_interval: env
                .duration_secs("MCP_STREAM_MIN_INTERVAL_SECS", stream_defaults.min_interval),
            channel_capacity: env.parse(
                "MCP_STREAM_CHANNEL_CAPACITY",
                stream_defaults.channel_capacity,
            ),
        };

        let upstream_defaults = UpstreamSettings::default();
        let endpoints = ExchangeEndpoints {
            binance: env.string("MCP_BINANCE_URL", upstream_defaults.endpoints.binance),
            kraken: env.string("MCP_KRAKEN_URL", upstream_defaults.endpoints.kraken),
            coinbase: env.string("MCP_COINBASE_URL", upstream_defaults.endpoints.coinbase),
            huobi: env.string("MCP_HUOBI_URL", upstream_defaults.endpoints.huobi),
        };
        let upstream = UpstreamSettings {
            timeout: env.duration_secs("MCP_UPSTREAM_TIMEOUT_SECS", upstream_defaults.timeout),
            max_attempts: env.parse("MCP_UPSTREAM_MAX_ATTEMPTS", upstream_defaults.max_attempts),
            initial_backoff: env.duration_millis(
                "MCP_UPSTREAM_INITIAL_BACKOFF_MS",
                upstream_defaults.initial_backoff,
            ),
            max_backoff: env.duration_millis(
                "MCP_UPSTREAM_MAX_BACKOFF_MS",
                upstream_defaults.max_backoff,
            ),
            backoff_multiplier: upstream_defaults.backoff_multiplier,
            jitter_factor: upstream_defaults.jitter_factor,
            endpoints,
        };

        let config = Self {
            server,
            cache,
            stream,
            upstream,
        };
        config.validate()?;
        Ok(config)
    }

    /// Check cross-field and range constraints.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidValue`] naming the first offending key.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.cache.capacity == 0 {
            return Err(ConfigError::invalid("MCP_CACHE_CAPACITY", "must be at least 1"));
        }
        if self.cache.ttl < Duration::from_secs(1) {
            return Err(ConfigError::invalid("MCP_CACHE_TTL_SECS", "must be at least 1"));
        }
        if self.cache.sweep_interval.is_zero() {
            return Err(ConfigError::invalid(
                "MCP_CACHE_SWEEP_INTERVAL_SECS",
                "must be at least 1",
            ));
        }
        if self.stream.min_interval < Duration::from_secs(1) {
            return Err(ConfigError::invalid(
                "MCP_STREAM_MIN_INTERVAL_SECS",
                "must be at least 1",
            ));
        }
        if self.stream.default_interval < self.stream.min_interval {
            return Err(ConfigError::invalid(
                "MCP_STREAM_DEFAULT_INTERVAL_SECS",
                "must not be below MCP_STREAM_MIN_INTERVAL_SECS",
            ));
        }
        if self.stream.channel_capacity == 0 {
            return Err(ConfigError::invalid(
                "MCP_STREAM_CHANNEL_CAPACITY",
                "must be at least 1",
            ));
        }
        if self.upstream.max_attempts == 0 {
            return Err(ConfigError::invalid(
                "MCP_UPSTREAM_MAX_ATTEMPTS",
                "must be at least 1",
            ));
        }
        if self.upstream.timeout.is_zero() {
            return Err(ConfigError::invalid(
                "MCP_UPSTREAM_TIMEOUT_SECS",
                "must be at least 1",
            ));
        }
        Ok(())
    }

    /// `host:port` the HTTP server binds to.
    #[must_use]
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }
}

/// Configuration error.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Environment variable holds a value outside its allowed range.
    #[error("invalid value for {key}: {reason}")]
    InvalidValue {
        /// Offending variable.
        key: String,
        /// Why it was rejected.
        reason: String,
    },
}

impl ConfigError {
    fn invalid(key: &str, reason: &str) -> Self {
        Self::InvalidValue {
            key: key.to_string(),
            reason: reason.to_string(),
        }
    }
}

struct EnvReader<F> {
    lookup: F,
}

impl<F> EnvReader<F>
where
    F: Fn(&str) -> Option<String>,
{
    fn raw(&self, key: &str) -> Option<String> {
        (self.lookup)(key)
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
    }

    fn string(&self, key: &str, default: String) -> String {
        self.raw(key).unwrap_or(default)
    }

    fn parse<T: std::str::FromStr>(&self, key: &str, default: T) -> T {
        self.raw(key)
            .and_then(|v| v.parse().ok())
            .unwrap_or(default)
    }

    fn bool(&self, key: &str, default: bool) -> bool {
        self.raw(key)
            .and_then(|v| match v.to_ascii_lowercase().as_str() {
                "1" | "true" | "yes" | "on" => Some(true),
                "0" | "false" | "no" | "off" => Some(false),
                _ => None,
            })
            .unwrap_or(default)
    }

    fn duration_secs(&self, key: &str, default: Duration) -> Duration {
        self.raw(key)
            .and_then(|v| v.parse::<u64>().ok())
            .map_or(default, Duration::from_secs)
    }

    fn duration_millis(&self, key: &str, default: Duration) -> Duration {
        self.raw(key)
            .and_then(|v| v.parse::<u64>().ok())
            .map_or(default, Duration::from_millis)
    }
}
