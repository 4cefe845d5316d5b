// Pull path: cache -> retry -> provider -> normaliser.
//
// Only successful quotes are cached. Concurrent misses for the same symbol each go
// upstream; there is no request coalescing.

use std::sync::Arc;
use std::time::Duration;

use ahash::AHashSet;
use futures::future::join_all;
use metrics::counter;
use serde_json::Value;
use tracing::{debug, instrument, warn};

use crate::market_data::adapters::{QuoteSource, UpstreamError};
use crate::market_data::cache::{quote_key, search_key, TtlCache};
use crate::market_data::normaliser::{classify, normalise, ProviderPayload};
use crate::market_data::retry::{RetryError, RetryExecutor};
use crate::market_data::symbols::SymbolDirectory;
use crate::market_data::types::{canonical_symbol, FetchError, IndexQuote, NormalizationError, Quote, QuoteOutcome};

pub const DEFAULT_QUOTE_TTL: Duration = Duration::from_secs(10);
pub const DEFAULT_SEARCH_TTL: Duration = Duration::from_secs(300);

pub struct QuoteFetcher<S> {
    source: S,
    retry: RetryExecutor,
    cache: Arc<TtlCache<Quote>>,
    search_cache: TtlCache<Vec<Quote>>,
    directory: SymbolDirectory,
    quote_ttl: Duration,
    search_ttl: Duration,
}

impl<S: QuoteSource> QuoteFetcher<S> {
    pub fn new(source: S, retry: RetryExecutor, cache: Arc<TtlCache<Quote>>) -> Self {
        Self {
            source,
            retry,
            cache,
            search_cache: TtlCache::new(),
            directory: SymbolDirectory::default(),
            quote_ttl: DEFAULT_QUOTE_TTL,
            search_ttl: DEFAULT_SEARCH_TTL,
        }
    }

    pub fn with_ttls(mut self, quote_ttl: Duration, search_ttl: Duration) -> Self {
        self.quote_ttl = quote_ttl;
        self.search_ttl = search_ttl;
        self
    }

    pub fn with_directory(mut self, directory: SymbolDirectory) -> Self {
        self.directory = directory;
        self
    }

    pub fn directory(&self) -> &SymbolDirectory {
        &self.directory
    }

    pub fn cache(&self) -> &Arc<TtlCache<Quote>> {
        &self.cache
    }

    /// One symbol, served from cache while fresh.
    #[instrument(skip(self), level = "debug")]
    pub async fn get_stock_quote(&self, symbol: &str) -> Result<Quote, FetchError> {
        let symbol = canonical_symbol(symbol);
        if symbol.is_empty() {
            return Err(FetchError::QuoteUnavailable { symbol, message: "empty symbol".into() });
        }

        let key = quote_key(&symbol);
        if let Some(quote) = self.cache.get(&key) {
            counter!("quotehub_cache_hits_total").increment(1);
            return Ok(quote);
        }
        counter!("quotehub_cache_misses_total").increment(1);

        let result = self
            .retry
            .execute_when(|| self.source.get_quote(&symbol), UpstreamError::is_retryable)
            .await;
        let value = match result {
            Ok(v) => v,
            Err(e) => {
                counter!("quotehub_fetch_failures_total").increment(1);
                return Err(upstream_failure(&symbol, e));
            }
        };

        let quote = quote_from_payload(&symbol, value)
            .and_then(|quote| matching_symbol(&symbol, quote))
            .inspect_err(|_| {
                counter!("quotehub_fetch_failures_total").increment(1);
            })?;
        self.cache.set(key, quote.clone(), self.quote_ttl);
        Ok(quote)
    }

    /// Fetch every symbol concurrently. Order follows the input; failed symbols are
    /// flagged in place. Errors only when every symbol failed.
    #[instrument(skip(self, symbols), fields(count = symbols.len()))]
    pub async fn get_watchlist_stocks<T: AsRef<str>>(&self, symbols: &[T]) -> Result<Vec<QuoteOutcome>, FetchError> {
        if symbols.is_empty() {
            return Ok(Vec::new());
        }

        let results = join_all(symbols.iter().map(|s| self.get_stock_quote(s.as_ref()))).await;
        let outcomes: Vec<QuoteOutcome> = symbols
            .iter()
            .zip(results)
            .map(|(symbol, result)| match result {
                Ok(quote) => QuoteOutcome::Ready(quote),
                Err(error) => {
                    warn!(symbol = symbol.as_ref(), %error, "quote fetch failed");
                    QuoteOutcome::Failed { symbol: canonical_symbol(symbol.as_ref()), error }
                }
            })
            .collect();

        let failed = outcomes.iter().filter(|o| o.quote().is_none()).count();
        if failed == outcomes.len() {
            return Err(FetchError::AllFailed { failed });
        }
        Ok(outcomes)
    }

    /// Match the query against the known universe and fetch the hits.
    #[instrument(skip(self))]
    pub async fn search_stocks(&self, query: &str) -> Result<Vec<Quote>, FetchError> {
        let matches = self.directory.search(query);
        if matches.is_empty() {
            return Ok(Vec::new());
        }
        let outcomes = self.get_watchlist_stocks(matches.as_slice()).await?;
        Ok(outcomes.into_iter().filter_map(QuoteOutcome::into_quote).collect())
    }

    /// Provider-side search (`GET /search?q=`), cached per lowercased query.
    #[instrument(skip(self))]
    pub async fn search_remote(&self, query: &str) -> Result<Vec<Quote>, FetchError> {
        let query = query.trim();
        if query.is_empty() {
            return Ok(Vec::new());
        }
        let key = search_key(query);
        if let Some(hit) = self.search_cache.get(&key) {
            counter!("quotehub_cache_hits_total").increment(1);
            return Ok(hit);
        }
        counter!("quotehub_cache_misses_total").increment(1);

        let matches = self
            .retry
            .execute_when(|| self.source.search(query), UpstreamError::is_retryable)
            .await
            .map_err(|e| upstream_failure(query, e))?;

        let mut quotes = Vec::with_capacity(matches.len());
        for value in matches {
            match quote_from_payload(query, value) {
                Ok(q) => quotes.push(q),
                Err(e) if e.is_rate_limited() => return Err(e),
                Err(e) => debug!(error = %e, "skipping unusable search match"),
            }
        }

        self.search_cache.purge_expired();
        self.search_cache.set(key, quotes.clone(), self.search_ttl);
        Ok(quotes)
    }

    /// Warm the cache for the symbols that are not already fresh, with one bulk
    /// request. Returns how many quotes were stored.
    #[instrument(skip(self, symbols), fields(count = symbols.len()))]
    pub async fn prefetch<T: AsRef<str>>(&self, symbols: &[T]) -> Result<usize, FetchError> {
        let mut seen = AHashSet::new();
        let missing: Vec<String> = symbols
            .iter()
            .map(|s| canonical_symbol(s.as_ref()))
            .filter(|s| !s.is_empty() && seen.insert(s.clone()))
            .filter(|s| self.cache.get(&quote_key(s)).is_none())
            .collect();
        if missing.is_empty() {
            return Ok(0);
        }

        let label = missing.join(",");
        let values = self
            .retry
            .execute_when(|| self.source.get_quotes(&missing), UpstreamError::is_retryable)
            .await
            .map_err(|e| upstream_failure(&label, e))?;

        let wanted: AHashSet<&str> = missing.iter().map(String::as_str).collect();
        let mut stored = 0;
        for value in values {
            match quote_from_payload(&label, value) {
                Ok(quote) if wanted.contains(quote.symbol.as_str()) => {
                    self.cache.set(quote_key(&quote.symbol), quote, self.quote_ttl);
                    stored += 1;
                }
                Ok(quote) => debug!(symbol = %quote.symbol, "ignoring unrequested quote"),
                Err(e) if e.is_rate_limited() => return Err(e),
                Err(e) => debug!(error = %e, "skipping unusable bulk entry"),
            }
        }
        debug!(requested = missing.len(), stored, "prefetch complete");
        Ok(stored)
    }

    /// Headline indices. Not cached; malformed entries are skipped.
    #[instrument(skip(self))]
    pub async fn get_top_indices(&self) -> Result<Vec<IndexQuote>, FetchError> {
        const LABEL: &str = "indices";
        let values = self
            .retry
            .execute_when(|| self.source.top_indices(), UpstreamError::is_retryable)
            .await
            .map_err(|e| upstream_failure(LABEL, e))?;

        let mut indices = Vec::with_capacity(values.len());
        for value in values {
            match classify(value.clone()) {
                Ok(ProviderPayload::RateLimited(message)) => {
                    return Err(FetchError::RateLimited { symbol: LABEL.into(), message });
                }
                Ok(ProviderPayload::ProviderError(message)) => {
                    return Err(FetchError::QuoteUnavailable { symbol: LABEL.into(), message });
                }
                _ => {}
            }
            match serde_json::from_value::<IndexQuote>(value) {
                Ok(index) => indices.push(index),
                Err(e) => debug!(error = %e, "skipping unusable index entry"),
            }
        }
        Ok(indices)
    }
}

fn upstream_failure(symbol: &str, err: RetryError<UpstreamError>) -> FetchError {
    match err {
        RetryError::Aborted { source: UpstreamError::RateLimited, .. } => FetchError::RateLimited {
            symbol: symbol.to_string(),
            message: "provider answered 429 Too Many Requests".into(),
        },
        other => FetchError::UpstreamUnavailable { symbol: symbol.to_string(), source: other },
    }
}

/// The provider must answer for the symbol that was asked for.
fn matching_symbol(requested: &str, quote: Quote) -> Result<Quote, FetchError> {
    if quote.symbol == requested {
        return Ok(quote);
    }
    warn!(requested, returned = %quote.symbol, "provider answered for a different symbol");
    Err(FetchError::QuoteUnavailable {
        symbol: requested.to_string(),
        message: format!("provider returned a quote for {}", quote.symbol),
    })
}

fn quote_from_payload(symbol: &str, value: Value) -> Result<Quote, FetchError> {
    let normalization = |source: NormalizationError| match source {
        NormalizationError::MissingField(field) => FetchError::QuoteUnavailable {
            symbol: symbol.to_string(),
            message: format!("response has no `{field}`"),
        },
        source => FetchError::Normalization { symbol: symbol.to_string(), source },
    };

    match classify(value).map_err(normalization)? {
        ProviderPayload::Quote(raw) => normalise(&raw).map_err(normalization),
        ProviderPayload::RateLimited(message) => {
            warn!(symbol, %message, "provider rate limit notice");
            Err(FetchError::RateLimited { symbol: symbol.to_string(), message })
        }
        ProviderPayload::ProviderError(message) => {
            Err(FetchError::QuoteUnavailable { symbol: symbol.to_string(), message })
        }
    }
}
