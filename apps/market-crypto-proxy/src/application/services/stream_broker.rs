//! Streaming Broker
//!
//! Runs one polling task per streaming subscription. Each task fetches a
//! ticker through the [`TickerService`], pushes either a ticker update or an
//! error notice, waits the subscription's interval and repeats.
//!
//! # Lifecycle
//!
//! ```text
//! Connected ──► Polling ──► Polling (ticker pushed)
//!                  │   └──► ErrorNotified ──► Polling
//!                  └──────► Disconnected
//! ```
//!
//! Fetch errors never end a subscription. Only the client dropping its
//! [`PriceStream`] or the broker's cancellation token does, and both are
//! observed while waiting and while a fetch is in flight.

use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;

use tokio::sync::mpsc;
use tokio_stream::Stream;
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::CancellationToken;

use super::registry::ExchangeRegistry;
use super::ticker_service::TickerService;
use crate::application::ports::MarketDataError;
use crate::domain::market::{Exchange, MarketSymbol, TickerUpdate};
use crate::domain::subscription::{
    Subscription, SubscriptionId, SubscriptionRegistry, SubscriptionState, SubscriptionStats,
};
use crate::infrastructure::config::StreamSettings;
use crate::infrastructure::metrics::{self, StreamEventKind};

// =============================================================================
// Events
// =============================================================================

/// One message pushed to a subscriber.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamEvent {
    /// Fresh ticker data.
    Ticker(TickerUpdate),
    /// Human-readable description of a failed poll.
    Error(String),
}

impl StreamEvent {
    const fn kind(&self) -> StreamEventKind {
        match self {
            Self::Ticker(_) => StreamEventKind::Ticker,
            Self::Error(_) => StreamEventKind::Error,
        }
    }
}

/// Receiving end of a subscription.
///
/// Dropping it disconnects the subscription.
#[derive(Debug)]
pub struct PriceStream {
    subscription: Subscription,
    events: ReceiverStream<StreamEvent>,
}

impl PriceStream {
    /// Metadata of the subscription feeding this stream.
    #[must_use]
    pub const fn subscription(&self) -> &Subscription {
        &self.subscription
    }

    /// Wait for the next event. `None` once the subscription has ended.
    pub async fn recv(&mut self) -> Option<StreamEvent> {
        self.events.as_mut().recv().await
    }
}

impl Stream for PriceStream {
    type Item = StreamEvent;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        Pin::new(&mut self.events).poll_next(cx)
    }
}

// =============================================================================
// Broker
// =============================================================================

/// Owns every streaming subscription.
#[derive(Debug)]
pub struct StreamBroker {
    service: Arc<TickerService>,
    subscriptions: Arc<SubscriptionRegistry>,
    settings: StreamSettings,
    cancel: CancellationToken,
}

impl StreamBroker {
    /// Create a broker whose tasks stop when `cancel` fires.
    #[must_use]
    pub fn new(
        service: Arc<TickerService>,
        settings: StreamSettings,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            service,
            subscriptions: Arc::new(SubscriptionRegistry::new()),
            settings,
            cancel,
        }
    }

    /// Poll interval used when the client does not ask for one.
    #[must_use]
    pub const fn default_interval(&self) -> Duration {
        self.settings.default_interval
    }

    /// Open a subscription.
    ///
    /// The first fetch starts immediately. Only the exchange name, symbol
    /// format and interval are validated here; unknown symbols surface as
    /// error events.
    ///
    /// # Errors
    ///
    /// - [`MarketDataError::ExchangeNotSupported`] for unknown exchanges
    /// - [`MarketDataError::InvalidRequest`] for malformed symbols or an
    ///   interval below the configured minimum
    pub fn subscribe(
        &self,
        exchange: &str,
        symbol: &str,
        interval: Option<Duration>,
    ) -> Result<PriceStream, MarketDataError> {
        let exchange = ExchangeRegistry::parse_exchange(exchange)?;
        let symbol = MarketSymbol::parse(symbol)?;
        let interval = interval.unwrap_or(self.settings.default_interval);
        if interval < self.settings.min_interval {
            return Err(MarketDataError::invalid_request(format!(
                "interval must be at least {} second(s)",
                self.settings.min_interval.as_secs()
            )));
        }

        Ok(self.spawn(exchange, symbol, interval))
    }

    fn spawn(&self, exchange: Exchange, symbol: MarketSymbol, interval: Duration) -> PriceStream {
        let subscription = Subscription::new(exchange, symbol, interval);
        let (tx, rx) = mpsc::channel(self.settings.channel_capacity.max(1));

        let first_for_pair = self.subscriptions.register(subscription.clone());
        metrics::set_active_streams(self.subscriptions.active_count());

        tracing::info!(
            subscription_id = subscription.id,
            exchange = %exchange,
            symbol = %subscription.symbol,
            interval_secs = interval.as_secs_f64(),
            first_for_pair,
            pair_subscribers = self.subscriptions.subscribers_for(exchange, &subscription.symbol),
            "Stream subscription opened"
        );

        let task = SubscriptionTask {
            service: Arc::clone(&self.service),
            subscription: subscription.clone(),
            tx,
            cancel: self.cancel.child_token(),
            _guard: RegistrationGuard {
                registry: Arc::clone(&self.subscriptions),
                id: subscription.id,
            },
        };
        tokio::spawn(task.run());

        PriceStream {
            subscription,
            events: ReceiverStream::new(rx),
        }
    }

    /// Number of open subscriptions.
    #[must_use]
    pub fn active_subscriptions(&self) -> usize {
        self.subscriptions.active_count()
    }

    /// Every open subscription, oldest first.
    #[must_use]
    pub fn subscriptions(&self) -> Vec<Subscription> {
        self.subscriptions.snapshot()
    }

    /// Subscription counts.
    #[must_use]
    pub fn stats(&self) -> SubscriptionStats {
        self.subscriptions.stats()
    }

    /// Stop every subscription.
    pub fn shutdown(&self) {
        self.cancel.cancel();
    }
}

// =============================================================================
// Subscription Task
// =============================================================================

/// Deregisters a subscription however its task ends.
struct RegistrationGuard {
    registry: Arc<SubscriptionRegistry>,
    id: SubscriptionId,
}

impl Drop for RegistrationGuard {
    fn drop(&mut self) {
        self.registry.remove(self.id);
        metrics::set_active_streams(self.registry.active_count());
    }
}

struct SubscriptionTask {
    service: Arc<TickerService>,
    subscription: Subscription,
    tx: mpsc::Sender<StreamEvent>,
    cancel: CancellationToken,
    _guard: RegistrationGuard,
}

impl SubscriptionTask {
    async fn run(self) {
        let Subscription {
            id,
            exchange,
            ref symbol,
            interval,
            ..
        } = self.subscription;
        let mut state = SubscriptionState::Connected;

        loop {
            self.advance(&mut state, SubscriptionState::Polling);

            let result = tokio::select! {
                biased;
                () = self.cancel.cancelled() => break,
                () = self.tx.closed() => break,
                result = self.service.ticker(exchange, symbol) => result,
            };

            let (event, next) = match result {
                Ok(ticker) => (
                    StreamEvent::Ticker(TickerUpdate::from(&ticker)),
                    SubscriptionState::Polling,
                ),
                Err(e) => {
                    tracing::debug!(subscription_id = id, error = %e, "Pushing stream error");
                    (StreamEvent::Error(e.to_string()), SubscriptionState::ErrorNotified)
                }
            };
            let kind = event.kind();

            let delivered = tokio::select! {
                biased;
                () = self.cancel.cancelled() => false,
                sent = self.tx.send(event) => sent.is_ok(),
            };
            if !delivered {
                break;
            }
            metrics::record_stream_event(kind);
            self.advance(&mut state, next);

            tokio::select! {
                biased;
                () = self.cancel.cancelled() => break,
                () = self.tx.closed() => break,
                () = tokio::time::sleep(interval) => {}
            }
        }

        self.advance(&mut state, SubscriptionState::Disconnected);
        tracing::info!(subscription_id = id, exchange = %exchange, symbol = %symbol, "Stream subscription closed");
    }

    fn advance(&self, state: &mut SubscriptionState, next: SubscriptionState) {
        if *state == next {
            return;
        }
        debug_assert!(!state.is_terminal(), "subscription already disconnected");
        debug_assert!(
            state.can_transition_to(next),
            "illegal subscription transition {} -> {}",
            state.as_str(),
            next.as_str()
        );
        tracing::trace!(
            subscription_id = self.subscription.id,
            from = state.as_str(),
            to = next.as_str(),
            "Subscription state change"
        );
        *state = next;
    }
}
