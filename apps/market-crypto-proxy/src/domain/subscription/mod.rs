//! Subscription Tracking Types
//!
//! Domain types for tracking streaming price subscriptions.
//!
//! # Design
//!
//! Each subscription is an independent polling session owned by the stream
//! broker. The registry here only records which sessions are alive so the
//! health endpoint and metrics can report on them:
//! - Per-subscription metadata (exchange, symbol, interval, start time)
//! - Reference counting of `(exchange, symbol)` pairs across sessions
//!
//! Sessions never share upstream calls; the refcount is informational.

use std::collections::HashMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::Serialize;

use super::market::{Exchange, MarketSymbol};

// =============================================================================
// Types
// =============================================================================

/// Unique identifier for a streaming subscription.
pub type SubscriptionId = u64;

/// Generate a fresh random subscription id.
#[must_use]
pub fn new_subscription_id() -> SubscriptionId {
    uuid::Uuid::new_v4().as_u64_pair().0
}

/// One live streaming session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Subscription {
    /// Unique id.
    pub id: SubscriptionId,
    /// Exchange being polled.
    pub exchange: Exchange,
    /// Symbol being polled.
    pub symbol: MarketSymbol,
    /// Delay between polls.
    pub interval: Duration,
    /// When the session was opened.
    pub started_at: DateTime<Utc>,
}

impl Subscription {
    /// Create a subscription record starting now.
    #[must_use]
    pub fn new(exchange: Exchange, symbol: MarketSymbol, interval: Duration) -> Self {
        Self {
            id: new_subscription_id(),
            exchange,
            symbol,
            interval,
            started_at: Utc::now(),
        }
    }

    fn key(&self) -> StreamKey {
        (self.exchange, self.symbol.clone())
    }
}

type StreamKey = (Exchange, MarketSymbol);

// =============================================================================
// Subscription State Machine
// =============================================================================

/// Lifecycle of a single subscription.
///
/// `Connected → Polling → {Polling, ErrorNotified, Disconnected}`, with
/// `ErrorNotified` returning to `Polling` on the next tick. `Disconnected`
/// is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubscriptionState {
    /// Session accepted, first poll not yet started.
    Connected,
    /// Fetching or waiting for the next tick after a successful push.
    Polling,
    /// Last poll failed and an error event was pushed.
    ErrorNotified,
    /// Client went away or the broker was cancelled.
    Disconnected,
}

impl SubscriptionState {
    /// Whether moving from `self` to `next` is a legal transition.
    #[must_use]
    pub const fn can_transition_to(self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::Connected, Self::Polling | Self::Disconnected)
                | (
                    Self::Polling | Self::ErrorNotified,
                    Self::Polling | Self::ErrorNotified | Self::Disconnected
                )
        )
    }

    /// Whether the state is terminal.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Disconnected)
    }

    /// Lowercase name for logs.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Connected => "connected",
            Self::Polling => "polling",
            Self::ErrorNotified => "error_notified",
            Self::Disconnected => "disconnected",
        }
    }
}

// =============================================================================
// Registry
// =============================================================================

#[derive(Debug, Default)]
struct RegistryState {
    subscriptions: HashMap<SubscriptionId, Subscription>,
    key_refcount: HashMap<StreamKey, usize>,
}

/// Thread-safe registry of live subscriptions.
///
/// # Example
///
/// ```rust
/// use std::time::Duration;
/// use market_crypto_proxy::domain::market::{Exchange, MarketSymbol};
/// use market_crypto_proxy::domain::subscription::{Subscription, SubscriptionRegistry};
///
/// let registry = SubscriptionRegistry::new();
/// let symbol = MarketSymbol::parse("BTC/USDT").unwrap();
///
/// let first = Subscription::new(Exchange::Binance, symbol.clone(), Duration::from_secs(5));
/// assert!(registry.register(first.clone()));
///
/// // A second session on the same pair is not the first for its key.
/// let second = Subscription::new(Exchange::Binance, symbol, Duration::from_secs(1));
/// assert!(!registry.register(second));
///
/// assert_eq!(registry.stats().subscription_count, 2);
/// assert_eq!(registry.stats().key_count, 1);
///
/// registry.remove(first.id);
/// assert_eq!(registry.stats().subscription_count, 1);
/// ```
#[derive(Debug, Default)]
pub struct SubscriptionRegistry {
    state: RwLock<RegistryState>,
}

impl SubscriptionRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a new subscription.
    ///
    /// Returns `true` if it is the only live session for its
    /// `(exchange, symbol)` pair. Registering an id twice is a no-op that
    /// returns `false`.
    pub fn register(&self, subscription: Subscription) -> bool {
        let mut state = self.state.write();
        if state.subscriptions.contains_key(&subscription.id) {
            return false;
        }

        let refcount = state.key_refcount.entry(subscription.key()).or_insert(0);
        *refcount += 1;
        let first_for_key = *refcount == 1;

        state.subscriptions.insert(subscription.id, subscription);
        first_for_key
    }

    /// Drop a subscription, returning its record if it was registered.
    pub fn remove(&self, id: SubscriptionId) -> Option<Subscription> {
        let mut state = self.state.write();
        let subscription = state.subscriptions.remove(&id)?;

        let key = subscription.key();
        if let Some(refcount) = state.key_refcount.get_mut(&key) {
            *refcount = refcount.saturating_sub(1);
            if *refcount == 0 {
                state.key_refcount.remove(&key);
            }
        }

        Some(subscription)
    }

    /// Look up a live subscription.
    #[must_use]
    pub fn get(&self, id: SubscriptionId) -> Option<Subscription> {
        self.state.read().subscriptions.get(&id).cloned()
    }

    /// Number of live subscriptions.
    #[must_use]
    pub fn active_count(&self) -> usize {
        self.state.read().subscriptions.len()
    }

    /// Number of live sessions polling `(exchange, symbol)`.
    #[must_use]
    pub fn subscribers_for(&self, exchange: Exchange, symbol: &MarketSymbol) -> usize {
        self.state
            .read()
            .key_refcount
            .get(&(exchange, symbol.clone()))
            .copied()
            .unwrap_or(0)
    }

    /// Copy of every live subscription, oldest first.
    #[must_use]
    pub fn snapshot(&self) -> Vec<Subscription> {
        let mut all: Vec<_> = self.state.read().subscriptions.values().cloned().collect();
        all.sort_by_key(|s| s.started_at);
        all
    }

    /// Aggregate counts.
    #[must_use]
    pub fn stats(&self) -> SubscriptionStats {
        let state = self.state.read();
        SubscriptionStats {
            subscription_count: state.subscriptions.len(),
            key_count: state.key_refcount.len(),
        }
    }
}

// =============================================================================
// Statistics
// =============================================================================

/// Subscription counts reported by the health endpoint.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SubscriptionStats {
    /// Live sessions.
    pub subscription_count: usize,
    /// Distinct `(exchange, symbol)` pairs being polled.
    pub key_count: usize,
}

// =============================================================================
// Tests
// =============================================================================
