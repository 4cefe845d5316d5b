// Shared traits + errors for market data provider adapters.
//
// `QuoteSource` is the pull side (REST), `StreamConnector` the push side (one
// streaming connection). Both hand back raw payloads; normalising is not their job.

use futures::{Sink, Stream};
use std::pin::Pin;

pub mod provider_types;
pub mod rest;
pub mod websocket;

pub use provider_types::{StreamAction, StreamRequest};
pub use rest::RestQuoteSource;
pub use websocket::WsConnector;

#[derive(Debug, thiserror::Error)]
pub enum UpstreamError {
    #[error("http request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("provider answered {status}: {body}")]
    Status { status: u16, body: String },

    #[error("provider rate limit hit (HTTP 429)")]
    RateLimited,

    #[error("could not decode provider response: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("invalid provider url: {0}")]
    InvalidUrl(String),
}

impl UpstreamError {
    /// Transport failures and 5xx/408 are worth another attempt. Other 4xx, rate
    /// limiting and malformed bodies are surfaced straight away.
    pub fn is_retryable(&self) -> bool {
        match self {
            UpstreamError::Http(_) => true,
            UpstreamError::Status { status, .. } => *status >= 500 || *status == 408,
            UpstreamError::RateLimited | UpstreamError::Decode(_) | UpstreamError::InvalidUrl(_) => false,
        }
    }
}

#[async_trait::async_trait]
pub trait QuoteSource: Send + Sync {
    /// `GET {provider}/quote/{symbol}`
    async fn get_quote(&self, symbol: &str) -> Result<serde_json::Value, UpstreamError>;

    /// `GET {provider}/search?q=` -> array of raw quote-like matches.
    async fn search(&self, query: &str) -> Result<Vec<serde_json::Value>, UpstreamError>;

    /// `POST {provider}/quotes` with `{symbols: [...]}` -> array of raw quotes.
    async fn get_quotes(&self, symbols: &[String]) -> Result<Vec<serde_json::Value>, UpstreamError>;

    /// `GET {provider}/indices/top` -> array of index records.
    async fn top_indices(&self) -> Result<Vec<serde_json::Value>, UpstreamError>;
}

#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("could not connect to {url}: {reason}")]
    Connect { url: String, reason: String },

    #[error("websocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("connection closed")]
    Closed,
}

/// Outbound half of a streaming connection: text frames.
pub type FrameSink = Pin<Box<dyn Sink<String, Error = TransportError> + Send>>;

/// Inbound half of a streaming connection: text frames in arrival order.
pub type FrameStream = Pin<Box<dyn Stream<Item = Result<String, TransportError>> + Send>>;

#[async_trait::async_trait]
pub trait StreamConnector: Send + Sync + 'static {
    /// Open the single streaming connection; resolves once the handshake completes.
    async fn connect(&self) -> Result<(FrameSink, FrameStream), TransportError>;
}
