mod support;

use std::sync::Arc;
use std::time::Duration;

use quotehub::market_data::adapters::RestQuoteSource;
use quotehub::market_data::retry::{RetryError, RetryExecutor};
use quotehub::market_data::{FetchError, QuoteFetcher, QuoteOutcome, TtlCache};

use support::spawn_rest_server;

fn fetcher(base_url: &str) -> QuoteFetcher<RestQuoteSource> {
    let source = RestQuoteSource::new(base_url, Duration::from_secs(5)).unwrap();
    QuoteFetcher::new(source, RetryExecutor::new(3, Duration::from_millis(10)), Arc::new(TtlCache::new()))
}

#[tokio::test]
async fn test_quote_is_normalized_and_cached() {
    let server = spawn_rest_server().await;
    let f = fetcher(&server.base_url);

    let q = f.get_stock_quote("aapl").await.unwrap();
    assert_eq!(q.symbol, "AAPL");
    assert_eq!(q.price, 101.0);
    assert_eq!(q.change_percent, 0.5);
    assert_eq!(q.volume, 1_200_000);

    let again = f.get_stock_quote("AAPL").await.unwrap();
    assert_eq!(again, q);
    assert_eq!(server.hits.get("AAPL"), 1);
}

#[tokio::test]
async fn test_server_error_is_retried() {
    let server = spawn_rest_server().await;
    let f = fetcher(&server.base_url);

    let q = f.get_stock_quote("FLAKY").await.unwrap();
    assert_eq!(q.price, 102.0);
    assert_eq!(server.hits.get("FLAKY"), 2);
}

#[tokio::test]
async fn test_rate_limits_are_not_retried() {
    let server = spawn_rest_server().await;
    let f = fetcher(&server.base_url);

    assert!(f.get_stock_quote("LIMIT").await.unwrap_err().is_rate_limited());
    assert_eq!(server.hits.get("LIMIT"), 1);

    assert!(f.get_stock_quote("NOTE").await.unwrap_err().is_rate_limited());
    assert_eq!(server.hits.get("NOTE"), 1);
}

#[tokio::test]
async fn test_not_found_aborts_after_one_attempt() {
    let server = spawn_rest_server().await;
    let f = fetcher(&server.base_url);

    match f.get_stock_quote("GONE").await {
        Err(FetchError::UpstreamUnavailable { source: RetryError::Aborted { attempt: 1, .. }, .. }) => {}
        other => panic!("expected an aborted upstream failure, got {other:?}"),
    }
    assert_eq!(server.hits.get("GONE"), 1);
}

#[tokio::test]
async fn test_watchlist_batch_flags_failures_in_order() {
    let server = spawn_rest_server().await;
    let f = fetcher(&server.base_url);

    let outcomes = f.get_watchlist_stocks(&["AAPL", "GONE", "MSFT"]).await.unwrap();
    assert_eq!(outcomes.len(), 3);
    assert!(matches!(&outcomes[0], QuoteOutcome::Ready(q) if q.symbol == "AAPL"));
    assert!(matches!(&outcomes[1], QuoteOutcome::Failed { symbol, .. } if symbol == "GONE"));
    assert!(matches!(&outcomes[2], QuoteOutcome::Ready(q) if q.symbol == "MSFT"));
}

#[tokio::test]
async fn test_remote_search_is_cached() {
    let server = spawn_rest_server().await;
    let f = fetcher(&server.base_url);

    let hits = f.search_remote("ap").await.unwrap();
    let symbols: Vec<_> = hits.iter().map(|q| q.symbol.as_str()).collect();
    assert_eq!(symbols, vec!["AAPL", "APP"]);

    f.search_remote("AP").await.unwrap();
    assert_eq!(server.hits.get("search"), 1);
}

#[tokio::test]
async fn test_prefetch_uses_bulk_endpoint() {
    let server = spawn_rest_server().await;
    let f = fetcher(&server.base_url);

    assert_eq!(f.prefetch(&["TSLA", "NVDA"]).await.unwrap(), 2);
    assert_eq!(server.hits.get("bulk"), 1);

    let q = f.get_stock_quote("TSLA").await.unwrap();
    assert_eq!(q.price, 77.0);
    assert_eq!(server.hits.get("TSLA"), 0);
}

#[tokio::test]
async fn test_top_indices() {
    let server = spawn_rest_server().await;
    let f = fetcher(&server.base_url);

    let indices = f.get_top_indices().await.unwrap();
    let symbols: Vec<_> = indices.iter().map(|i| i.symbol.as_str()).collect();
    assert_eq!(symbols, vec!["^GSPC", "^IXIC"]);
    assert!(indices[1].change < 0.0);
    assert_eq!(server.hits.get("indices"), 1);
}

#[tokio::test]
async fn test_symbol_is_sent_as_one_path_segment() {
    let server = spawn_rest_server().await;
    let f = fetcher(&server.base_url);

    let q = f.get_stock_quote("brk/b").await.unwrap();
    assert_eq!(q.symbol, "BRK/B");
    assert_eq!(server.hits.get("BRK/B"), 1);
}
