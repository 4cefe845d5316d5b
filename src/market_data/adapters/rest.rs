// REST adapter: GET /quote/{symbol}, GET /search?q=, POST /quotes, GET /indices/top

use super::provider_types::BatchQuoteRequest;
use super::{QuoteSource, UpstreamError};
use reqwest::StatusCode;
use serde_json::Value;
use std::time::Duration;
use tracing::{debug, instrument};

pub struct RestQuoteSource {
    pub base_url: String, // e.g. "https://api.example.com/v1"
    client: reqwest::Client,
}

impl RestQuoteSource {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, UpstreamError> {
        let client = reqwest::Client::builder().timeout(timeout).gzip(true).build()?;
        Ok(Self::with_client(base_url, client))
    }

    pub fn with_client(base_url: &str, client: reqwest::Client) -> Self {
        Self { base_url: base_url.trim_end_matches('/').to_string(), client }
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path)
    }

    /// `{base}/quote/{symbol}` with the symbol encoded as one path segment.
    fn quote_url(&self, symbol: &str) -> Result<reqwest::Url, UpstreamError> {
        let mut url = reqwest::Url::parse(&self.base_url)
            .map_err(|e| UpstreamError::InvalidUrl(format!("{}: {e}", self.base_url)))?;
        url.path_segments_mut()
            .map_err(|_| UpstreamError::InvalidUrl(format!("{} cannot take a path", self.base_url)))?
            .pop_if_empty()
            .push("quote")
            .push(symbol);
        Ok(url)
    }

    async fn read_json(resp: reqwest::Response) -> Result<Value, UpstreamError> {
        let status = resp.status();
        if status == StatusCode::TOO_MANY_REQUESTS {
            return Err(UpstreamError::RateLimited);
        }
        let body = resp.text().await?;
        if !status.is_success() {
            return Err(UpstreamError::Status { status: status.as_u16(), body });
        }
        Ok(serde_json::from_str(&body)?)
    }
}

// Lists come back bare or wrapped ({"bestMatches": [...]}); anything else is handed
// through as a single entry so envelopes like rate-limit notes still get classified.
fn into_list(value: Value) -> Vec<Value> {
    match value {
        Value::Array(items) => items,
        Value::Object(mut map) => match map.remove("bestMatches").or_else(|| map.remove("quotes")) {
            Some(Value::Array(items)) => items,
            _ => vec![Value::Object(map)],
        },
        other => vec![other],
    }
}

#[async_trait::async_trait]
impl QuoteSource for RestQuoteSource {
    #[instrument(skip(self), level = "debug")]
    async fn get_quote(&self, symbol: &str) -> Result<Value, UpstreamError> {
        let resp = self.client.get(self.quote_url(symbol)?).send().await?;
        Self::read_json(resp).await
    }

    #[instrument(skip(self), level = "debug")]
    async fn search(&self, query: &str) -> Result<Vec<Value>, UpstreamError> {
        let resp = self.client.get(self.url("search")).query(&[("q", query)]).send().await?;
        let matches = into_list(Self::read_json(resp).await?);
        debug!(count = matches.len(), "search results");
        Ok(matches)
    }

    #[instrument(skip(self), level = "debug")]
    async fn get_quotes(&self, symbols: &[String]) -> Result<Vec<Value>, UpstreamError> {
        let resp = self
            .client
            .post(self.url("quotes"))
            .json(&BatchQuoteRequest { symbols })
            .send()
            .await?;
        Ok(into_list(Self::read_json(resp).await?))
    }

    #[instrument(skip(self), level = "debug")]
    async fn top_indices(&self) -> Result<Vec<Value>, UpstreamError> {
        let resp = self.client.get(self.url("indices/top")).send().await?;
        Ok(into_list(Self::read_json(resp).await?))
    }
}
