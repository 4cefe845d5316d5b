use serde::{Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};

use crate::market_data::adapters::UpstreamError;
use crate::market_data::retry::RetryError;

/// Canonical normalized market snapshot for one symbol.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Quote {
    pub symbol: String,
    pub price: f64,
    pub change_percent: f64,
    pub bid: f64,
    pub ask: f64,
    pub bid_size: u64,
    pub ask_size: u64,
    pub volume: u64,
    /// Unix seconds of the provider's last update.
    pub updated_at: u64,
}

/// Headline market index (`GET /indices/top`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IndexQuote {
    pub symbol: String,
    pub name: String,
    pub price: f64,
    pub change: f64,
    pub change_percent: f64,
}

impl Quote {
    pub fn is_gaining(&self) -> bool {
        self.change_percent >= 0.0
    }
}

pub fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

/// Uppercase + trim a ticker. Empty input stays empty.
pub fn canonical_symbol(raw: &str) -> String {
    raw.trim().to_ascii_uppercase()
}

#[derive(Debug, thiserror::Error)]
pub enum NormalizationError {
    #[error("missing required field `{0}`")]
    MissingField(&'static str),

    #[error("invalid value for `{field}`: {reason}")]
    InvalidField { field: &'static str, reason: String },

    #[error("malformed payload: {0}")]
    Malformed(#[from] serde_json::Error),
}

#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    #[error("upstream unavailable for {symbol}: {source}")]
    UpstreamUnavailable {
        symbol: String,
        #[source]
        source: RetryError<UpstreamError>,
    },

    #[error("quote unavailable for {symbol}: {message}")]
    QuoteUnavailable { symbol: String, message: String },

    #[error("could not normalize quote for {symbol}: {source}")]
    Normalization {
        symbol: String,
        #[source]
        source: NormalizationError,
    },

    #[error("rate limited while fetching {symbol}: {message}")]
    RateLimited { symbol: String, message: String },

    #[error("every symbol in the batch failed ({failed} symbols)")]
    AllFailed { failed: usize },
}

impl FetchError {
    pub fn is_rate_limited(&self) -> bool {
        matches!(self, FetchError::RateLimited { .. })
    }
}

/// One entry of a batch fetch. Failed symbols are flagged, never dropped.
#[derive(Debug)]
pub enum QuoteOutcome {
    Ready(Quote),
    Failed { symbol: String, error: FetchError },
}

impl QuoteOutcome {
    pub fn symbol(&self) -> &str {
        match self {
            QuoteOutcome::Ready(q) => &q.symbol,
            QuoteOutcome::Failed { symbol, .. } => symbol,
        }
    }

    pub fn quote(&self) -> Option<&Quote> {
        match self {
            QuoteOutcome::Ready(q) => Some(q),
            QuoteOutcome::Failed { .. } => None,
        }
    }

    pub fn into_quote(self) -> Option<Quote> {
        match self {
            QuoteOutcome::Ready(q) => Some(q),
            QuoteOutcome::Failed { .. } => None,
        }
    }
}
