// Wire types for the quote provider (REST bodies + streaming control frames)
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StreamAction {
    Subscribe,
    Unsubscribe,
}

// {"action": "subscribe", "symbols": ["AAPL", "MSFT"]}
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamRequest {
    pub action: StreamAction,
    pub symbols: Vec<String>,
}

impl StreamRequest {
    pub fn subscribe(symbols: Vec<String>) -> Self {
        Self { action: StreamAction::Subscribe, symbols }
    }

    pub fn unsubscribe(symbols: Vec<String>) -> Self {
        Self { action: StreamAction::Unsubscribe, symbols }
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

// Body of POST /quotes
#[derive(Debug, Serialize)]
pub struct BatchQuoteRequest<'a> {
    pub symbols: &'a [String],
}
