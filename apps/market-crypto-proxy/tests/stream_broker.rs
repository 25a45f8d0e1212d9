//! Stream Broker Integration Tests
//!
//! Tests subscription polling, error events, disconnect cleanup and
//! cancellation with paused time.

#![allow(clippy::unwrap_used, clippy::expect_used)]

mod common;

use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;
use market_crypto_proxy::{Exchange, ExchangeAdapter, MarketDataError, StreamEvent};
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;

use common::{
    MockAdapter, PerExchangeFactory, ScriptedAdapter, broker_with, cache_settings, external_error,
    service_with, service_with_factory, snapshot,
};

/// Shorter than the poll interval so every poll reaches the adapter.
const SHORT_TTL: Duration = Duration::from_millis(500);

fn scripted_broker(
    script: Vec<Result<market_crypto_proxy::domain::market::TickerSnapshot, MarketDataError>>,
) -> (Arc<ScriptedAdapter>, Arc<market_crypto_proxy::StreamBroker>) {
    let adapter = Arc::new(ScriptedAdapter::new(Duration::ZERO, script));
    let service = service_with(adapter.clone(), &cache_settings(SHORT_TTL, true));
    (adapter, broker_with(service, CancellationToken::new()))
}

#[tokio::test(start_paused = true)]
async fn emits_ticker_then_error_then_keeps_polling() {
    let (adapter, broker) = scripted_broker(vec![
        Ok(snapshot(100, 1)),
        Err(external_error("HTTP 502")),
        Ok(snapshot(101, 2)),
    ]);

    let mut stream = broker
        .subscribe("binance", "BTC/USDT", Some(Duration::from_secs(1)))
        .unwrap();

    match stream.recv().await.unwrap() {
        StreamEvent::Ticker(update) => {
            assert_eq!(update.symbol, "BTC/USDT");
            assert_eq!(update.last, Some(100.into()));
            assert_eq!(update.timestamp, 1);
        }
        other => panic!("expected ticker, got {other:?}"),
    }

    match stream.recv().await.unwrap() {
        StreamEvent::Error(message) => assert_eq!(message, "binance API error: HTTP 502"),
        other => panic!("expected error, got {other:?}"),
    }

    match stream.recv().await.unwrap() {
        StreamEvent::Ticker(update) => assert_eq!(update.last, Some(101.into())),
        other => panic!("expected ticker, got {other:?}"),
    }

    assert_eq!(adapter.calls(), 3);
}

#[tokio::test(start_paused = true)]
async fn first_event_arrives_without_waiting_an_interval() {
    let (_adapter, broker) = scripted_broker(vec![Ok(snapshot(5, 1))]);
    let mut stream = broker
        .subscribe("kraken", "ETH/USD", Some(Duration::from_secs(60)))
        .unwrap();

    let started = tokio::time::Instant::now();
    stream.recv().await.unwrap();

    assert!(started.elapsed() < Duration::from_secs(1));
}

#[tokio::test(start_paused = true)]
async fn events_follow_the_interval() {
    let (adapter, broker) = scripted_broker(vec![Ok(snapshot(5, 1))]);
    let mut stream = broker
        .subscribe("binance", "BTC/USDT", Some(Duration::from_secs(3)))
        .unwrap();

    stream.recv().await.unwrap();
    let started = tokio::time::Instant::now();
    stream.recv().await.unwrap();

    assert!(started.elapsed() >= Duration::from_secs(3));
    assert_eq!(adapter.calls(), 2);
}

#[tokio::test(start_paused = true)]
async fn disconnect_stops_upstream_calls() {
    let (adapter, broker) = scripted_broker(vec![Ok(snapshot(5, 1))]);
    let mut stream = broker
        .subscribe("binance", "BTC/USDT", Some(Duration::from_secs(1)))
        .unwrap();

    stream.recv().await.unwrap();
    assert_eq!(broker.active_subscriptions(), 1);
    drop(stream);

    tokio::time::sleep(Duration::from_secs(10)).await;

    assert_eq!(adapter.calls(), 1);
    assert_eq!(broker.active_subscriptions(), 0);
}

#[tokio::test(start_paused = true)]
async fn disconnect_during_fetch_abandons_it() {
    let adapter = Arc::new(ScriptedAdapter::new(
        Duration::from_secs(30),
        vec![Ok(snapshot(5, 1))],
    ));
    let service = service_with(adapter.clone(), &cache_settings(SHORT_TTL, true));
    let broker = broker_with(service, CancellationToken::new());

    let stream = broker
        .subscribe("binance", "BTC/USDT", Some(Duration::from_secs(1)))
        .unwrap();
    tokio::time::sleep(Duration::from_secs(1)).await;
    assert_eq!(adapter.calls(), 1);

    drop(stream);
    tokio::time::sleep(Duration::from_secs(120)).await;

    assert_eq!(adapter.calls(), 1);
    assert_eq!(broker.active_subscriptions(), 0);
}

#[tokio::test(start_paused = true)]
async fn slow_fetch_does_not_delay_other_subscriptions() {
    let slow = Arc::new(ScriptedAdapter::new(
        Duration::from_secs(30),
        vec![Ok(snapshot(1, 1))],
    ));
    let fast = Arc::new(ScriptedAdapter::new(Duration::ZERO, vec![Ok(snapshot(2, 2))]));
    let factory = PerExchangeFactory(vec![
        (Exchange::Kraken, slow.clone() as Arc<dyn ExchangeAdapter>),
        (Exchange::Binance, fast.clone() as Arc<dyn ExchangeAdapter>),
    ]);
    let service = service_with_factory(Arc::new(factory), &cache_settings(SHORT_TTL, true));
    let broker = broker_with(service, CancellationToken::new());

    let mut slow_stream = broker
        .subscribe("kraken", "BTC/USD", Some(Duration::from_secs(1)))
        .unwrap();
    let mut fast_stream = broker
        .subscribe("binance", "BTC/USDT", Some(Duration::from_secs(1)))
        .unwrap();

    let started = tokio::time::Instant::now();
    for _ in 0..5 {
        match fast_stream.recv().await.unwrap() {
            StreamEvent::Ticker(update) => assert_eq!(update.last, Some(2.into())),
            other => panic!("expected ticker, got {other:?}"),
        }
    }

    assert!(started.elapsed() < Duration::from_secs(30));
    assert_eq!(fast.calls(), 5);
    assert_eq!(slow.calls(), 1);
    assert!(slow_stream.recv().now_or_never().is_none());

    match timeout(Duration::from_secs(40), slow_stream.recv()).await.unwrap() {
        Some(StreamEvent::Ticker(update)) => assert_eq!(update.last, Some(1.into())),
        other => panic!("expected ticker, got {other:?}"),
    }
}

#[tokio::test(start_paused = true)]
async fn shutdown_ends_every_stream() {
    let (_adapter, broker) = scripted_broker(vec![Ok(snapshot(5, 1))]);
    let mut first = broker.subscribe("binance", "BTC/USDT", None).unwrap();
    let mut second = broker.subscribe("huobi", "ETH/USDT", None).unwrap();

    first.recv().await.unwrap();
    second.recv().await.unwrap();
    broker.shutdown();

    assert!(timeout(Duration::from_secs(1), first.recv()).await.unwrap().is_none());
    assert!(timeout(Duration::from_secs(1), second.recv()).await.unwrap().is_none());

    tokio::task::yield_now().await;
    assert_eq!(broker.active_subscriptions(), 0);
}

#[tokio::test(start_paused = true)]
async fn failing_subscription_does_not_affect_others() {
    let mut adapter = MockAdapter::new();
    adapter.expect_fetch_ticker().returning(|symbol| {
        if symbol.base() == "BAD" {
            Err(external_error("unknown market"))
        } else {
            Ok(snapshot(20, 1))
        }
    });
    let service = service_with(Arc::new(adapter), &cache_settings(SHORT_TTL, true));
    let broker = broker_with(service, CancellationToken::new());

    let mut bad = broker.subscribe("binance", "BAD/USDT", None).unwrap();
    let mut good = broker.subscribe("binance", "BTC/USDT", None).unwrap();

    assert!(matches!(bad.recv().await, Some(StreamEvent::Error(_))));
    assert!(matches!(good.recv().await, Some(StreamEvent::Ticker(_))));
    assert!(matches!(bad.recv().await, Some(StreamEvent::Error(_))));
    assert!(matches!(good.recv().await, Some(StreamEvent::Ticker(_))));
}

// =============================================================================
// Subscribe validation
// =============================================================================

#[tokio::test]
async fn interval_below_minimum_is_rejected() {
    let (adapter, broker) = scripted_broker(vec![Ok(snapshot(5, 1))]);

    for interval in [Duration::ZERO, Duration::from_millis(500)] {
        let err = broker
            .subscribe("binance", "BTC/USDT", Some(interval))
            .unwrap_err();
        assert_eq!(err.kind(), "invalid_request");
    }

    assert_eq!(broker.active_subscriptions(), 0);
    assert_eq!(adapter.calls(), 0);
}

#[tokio::test]
async fn unknown_exchange_is_rejected_before_streaming() {
    let (_adapter, broker) = scripted_broker(vec![Ok(snapshot(5, 1))]);

    let err = broker.subscribe("ftx", "BTC/USDT", None).unwrap_err();

    assert_eq!(
        err,
        MarketDataError::ExchangeNotSupported {
            name: "ftx".to_string()
        }
    );
    assert_eq!(broker.active_subscriptions(), 0);
}

#[tokio::test]
async fn default_interval_applies() {
    let (_adapter, broker) = scripted_broker(vec![Ok(snapshot(5, 1))]);

    let stream = broker.subscribe("coinbase", "BTC/USD", None).unwrap();

    assert_eq!(stream.subscription().interval, broker.default_interval());
    assert_eq!(stream.subscription().interval, Duration::from_secs(5));
}

#[tokio::test]
async fn stats_count_shared_keys_once() {
    let (_adapter, broker) = scripted_broker(vec![Ok(snapshot(5, 1))]);

    let _a = broker.subscribe("binance", "BTC/USDT", None).unwrap();
    let _b = broker.subscribe("binance", "btc/usdt", None).unwrap();
    let _c = broker.subscribe("kraken", "BTC/USDT", None).unwrap();

    let stats = broker.stats();
    assert_eq!(stats.subscription_count, 3);
    assert_eq!(stats.key_count, 2);
    assert_eq!(broker.subscriptions().len(), 3);
}
