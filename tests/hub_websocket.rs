mod support;

use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use tokio::sync::mpsc;
use tokio::time::timeout;

use quotehub::market_data::adapters::{RestQuoteSource, WsConnector};
use quotehub::market_data::reconnect::ReconnectConfig;
use quotehub::market_data::retry::RetryExecutor;
use quotehub::market_data::router::{QuoteEvent, QuoteRouter};
use quotehub::market_data::{ConnectionState, Quote, QuoteFetcher, SubscriptionHub, TtlCache};

use support::{columnar_quote, spawn_rest_server, spawn_stream_server, WAIT};

fn fast_reconnect() -> ReconnectConfig {
    ReconnectConfig {
        enabled: true,
        initial_delay_ms: 20,
        max_delay_ms: 100,
        multiplier: 2.0,
        jitter_factor: 0.0,
        max_attempts: 5,
    }
}

async fn wait_state(hub: &SubscriptionHub<WsConnector>, state: ConnectionState) {
    let mut rx = hub.state_changes();
    timeout(WAIT, rx.wait_for(|s| *s == state)).await.unwrap().unwrap();
}

#[tokio::test]
async fn test_subscribe_stream_and_close() {
    let mut server = spawn_stream_server().await;
    let hub = SubscriptionHub::new(WsConnector::new(&server.url, Some("secret".into())), fast_reconnect());

    let (tx, mut rx) = mpsc::unbounded_channel::<Quote>();
    let sub = hub.subscribe(["msft", "aapl"], move |q: &Quote| {
        let _ = tx.send(q.clone());
    });

    let mut conn = server.accept().await;
    assert_eq!(conn.path, "/realtime?token=secret");
    assert_eq!(conn.next_request().await, json!({"action": "subscribe", "symbols": ["AAPL", "MSFT"]}));
    wait_state(&hub, ConnectionState::Open).await;

    conn.send(columnar_quote("AAPL", 151.0, 150.0, 1_700_000_000));
    let q = timeout(WAIT, rx.recv()).await.unwrap().unwrap();
    assert_eq!(q.symbol, "AAPL");
    assert_eq!(q.price, 151.0);
    assert!((q.change_percent - 0.6666).abs() < 1e-3);
    assert_eq!((q.bid_size, q.ask_size), (3, 5));

    sub.unsubscribe();
    wait_state(&hub, ConnectionState::Closed).await;
    // the client closed the socket without sending anything else
    assert!(timeout(WAIT, conn.requests.recv()).await.unwrap().is_none());
}

#[tokio::test]
async fn test_reconnects_and_resubscribes_after_server_drop() {
    let mut server = spawn_stream_server().await;
    let hub = SubscriptionHub::new(WsConnector::new(&server.url, None), fast_reconnect());

    let (tx, mut rx) = mpsc::unbounded_channel::<Quote>();
    let _sub = hub.subscribe(["NVDA"], move |q: &Quote| {
        let _ = tx.send(q.clone());
    });

    let mut first = server.accept().await;
    first.next_request().await;
    wait_state(&hub, ConnectionState::Open).await;
    let _tsla = hub.subscribe(["TSLA"], |_: &Quote| {});
    assert_eq!(first.next_request().await, json!({"action": "subscribe", "symbols": ["TSLA"]}));

    drop(first);
    let mut second = server.accept().await;
    assert_eq!(second.next_request().await, json!({"action": "subscribe", "symbols": ["NVDA", "TSLA"]}));

    second.send(columnar_quote("NVDA", 900.0, 900.0, 1));
    let q = timeout(WAIT, rx.recv()).await.unwrap().unwrap();
    assert_eq!(q.symbol, "NVDA");
    assert_eq!(q.change_percent, 0.0);
}

#[tokio::test]
async fn test_router_snapshot_then_live_updates_share_cache() {
    let rest = spawn_rest_server().await;
    let mut stream = spawn_stream_server().await;

    let cache = Arc::new(TtlCache::new());
    let source = RestQuoteSource::new(&rest.base_url, Duration::from_secs(5)).unwrap();
    let fetcher = QuoteFetcher::new(source, RetryExecutor::new(2, Duration::from_millis(10)), Arc::clone(&cache));
    let hub = SubscriptionHub::new(WsConnector::new(&stream.url, None), fast_reconnect())
        .with_cache(Arc::clone(&cache), Duration::from_secs(10));
    let router = QuoteRouter::new(Arc::new(fetcher), hub);

    let (tx, mut rx) = mpsc::unbounded_channel();
    let sub = router.watch(&["AAPL".to_string()], tx).await;

    match timeout(WAIT, rx.recv()).await.unwrap() {
        Some(QuoteEvent::Snapshot(q)) => assert_eq!(q.price, 101.0),
        other => panic!("expected a snapshot, got {other:?}"),
    }

    let mut conn = stream.accept().await;
    conn.next_request().await;
    conn.send(columnar_quote("AAPL", 123.0, 120.0, 2));
    match timeout(WAIT, rx.recv()).await.unwrap() {
        Some(QuoteEvent::Update(q)) => assert_eq!(q.price, 123.0),
        other => panic!("expected a live update, got {other:?}"),
    }

    // the pushed quote is what the pull path now serves
    let q = router.fetcher().get_stock_quote("AAPL").await.unwrap();
    assert_eq!(q.price, 123.0);
    assert_eq!(rest.hits.get("AAPL"), 1);

    sub.unsubscribe();
}
