// Router wires the pull path (fetcher) and the push path (hub) into one feed:
// a snapshot per symbol first, then live updates.
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tracing::{info, warn};

use crate::config::Settings;
use crate::market_data::adapters::{QuoteSource, RestQuoteSource, StreamConnector, UpstreamError, WsConnector};
use crate::market_data::cache::TtlCache;
use crate::market_data::fetcher::QuoteFetcher;
use crate::market_data::hub::{Subscription, SubscriptionHub};
use crate::market_data::movers::format_large_number;
use crate::market_data::types::{FetchError, Quote, QuoteOutcome};

#[derive(Debug)]
pub enum QuoteEvent {
    /// Point-in-time quote from the REST provider (possibly cached).
    Snapshot(Quote),
    /// Pushed by the streaming connection.
    Update(Quote),
    Unavailable { symbol: String, reason: String },
}

pub struct QuoteRouter<S, C: StreamConnector> {
    fetcher: Arc<QuoteFetcher<S>>,
    hub: SubscriptionHub<C>,
}

impl QuoteRouter<RestQuoteSource, WsConnector> {
    /// Production wiring from settings. The hub writes into the fetcher's cache when
    /// `hub.share_cache` is set.
    pub fn from_settings(settings: &Settings) -> Result<Self, UpstreamError> {
        let source = RestQuoteSource::new(&settings.provider.rest_url, settings.http.timeout())?;
        let cache = Arc::new(TtlCache::new());
        let fetcher = QuoteFetcher::new(source, settings.retry.executor(), Arc::clone(&cache))
            .with_ttls(settings.cache.quote_ttl(), settings.cache.search_ttl());

        let connector = WsConnector::new(&settings.provider.stream_url, settings.provider.token.clone());
        let mut hub = SubscriptionHub::new(connector, settings.hub.reconnect.clone());
        if settings.hub.share_cache {
            hub = hub.with_cache(cache, settings.cache.quote_ttl());
        }
        Ok(Self::new(Arc::new(fetcher), hub))
    }
}

impl<S: QuoteSource, C: StreamConnector> QuoteRouter<S, C> {
    pub fn new(fetcher: Arc<QuoteFetcher<S>>, hub: SubscriptionHub<C>) -> Self {
        Self { fetcher, hub }
    }

    pub fn fetcher(&self) -> &QuoteFetcher<S> {
        &self.fetcher
    }

    pub fn hub(&self) -> &SubscriptionHub<C> {
        &self.hub
    }

    /// Subscribe first so no push is missed, then send one snapshot (or failure) per
    /// symbol. Updates keep flowing until the returned handle is unsubscribed.
    pub async fn watch(&self, symbols: &[String], tx: mpsc::UnboundedSender<QuoteEvent>) -> Subscription {
        let live = tx.clone();
        let subscription = self.hub.subscribe(symbols, move |quote: &Quote| {
            let _ = live.send(QuoteEvent::Update(quote.clone()));
        });

        match self.fetcher.get_watchlist_stocks(symbols).await {
            Ok(outcomes) => {
                for outcome in outcomes {
                    let event = match outcome {
                        QuoteOutcome::Ready(quote) => QuoteEvent::Snapshot(quote),
                        QuoteOutcome::Failed { symbol, error } => {
                            QuoteEvent::Unavailable { symbol, reason: error.to_string() }
                        }
                    };
                    let _ = tx.send(event);
                }
            }
            Err(e @ FetchError::AllFailed { .. }) => {
                warn!(error = %e, "no snapshot available, waiting for live updates");
                for symbol in subscription.symbols() {
                    let _ = tx.send(QuoteEvent::Unavailable { symbol: symbol.clone(), reason: e.to_string() });
                }
            }
            Err(e) => warn!(error = %e, "snapshot fetch failed"),
        }
        subscription
    }
}

pub fn describe(quote: &Quote) -> String {
    format!(
        "{:<6} {:>10.2} {:>+7.2}% | BID {:.2} x {} | ASK {:.2} x {} | VOL {}",
        quote.symbol,
        quote.price,
        quote.change_percent,
        quote.bid,
        quote.bid_size,
        quote.ask,
        quote.ask_size,
        format_large_number(quote.volume as f64),
    )
}

/// Log a live feed for `symbols` for `duration`, then tear the subscription down.
pub async fn run_demo<S: QuoteSource, C: StreamConnector>(
    router: &QuoteRouter<S, C>,
    symbols: &[String],
    duration: Duration,
) {
    info!(?symbols, secs = duration.as_secs(), "starting live quote demo");
    let (tx, mut rx) = mpsc::unbounded_channel();
    let subscription = router.watch(symbols, tx).await;

    let deadline = tokio::time::sleep(duration);
    tokio::pin!(deadline);
    loop {
        tokio::select! {
            _ = &mut deadline => break,
            event = rx.recv() => match event {
                Some(QuoteEvent::Snapshot(q)) => info!("snapshot {}", describe(&q)),
                Some(QuoteEvent::Update(q)) => info!("update   {}", describe(&q)),
                Some(QuoteEvent::Unavailable { symbol, reason }) => warn!(%symbol, %reason, "quote unavailable"),
                None => break,
            },
        }
    }

    subscription.unsubscribe();
    info!(state = ?router.hub().connection_state(), "demo finished");
}
