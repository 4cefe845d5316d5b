// Convert raw provider payloads into the canonical `Quote`.
//
// Two upstream shapes are known:
//   columnar: {"symbol":["AAPL"],"last":[150.0],"mid":[148.0],...}  (every field a one-element array)
//   flat:     {"symbol":"AAPL","price":"150.00","changePercent":"1.2%",...}
// Provider envelopes (rate-limit notes, error messages, `Global Quote` wrappers) are
// peeled off by `classify` before a shape is picked.

use serde::{de, Deserialize, Deserializer};
use serde_json::{Map, Value};
use tracing::debug;

use crate::market_data::types::{canonical_symbol, unix_now, NormalizationError, Quote};

#[derive(Debug, Clone, PartialEq)]
pub enum ProviderPayload {
    Quote(RawQuote),
    RateLimited(String),
    ProviderError(String),
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum RawQuote {
    Columnar(ColumnarQuote),
    Flat(FlatQuote),
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ColumnarQuote {
    pub symbol: Vec<String>,
    pub last: Vec<f64>,
    #[serde(default)]
    pub mid: Option<Vec<f64>>,
    #[serde(default, alias = "changepct")]
    pub change_percent: Option<Vec<f64>>,
    #[serde(default)]
    pub bid: Option<Vec<f64>>,
    #[serde(default)]
    pub ask: Option<Vec<f64>>,
    #[serde(default)]
    pub bid_size: Option<Vec<f64>>,
    #[serde(default)]
    pub ask_size: Option<Vec<f64>>,
    #[serde(default)]
    pub volume: Option<Vec<f64>>,
    #[serde(default)]
    pub updated: Option<Vec<f64>>,
}

#[derive(Debug, Clone, PartialEq, Default, Deserialize)]
pub struct FlatQuote {
    #[serde(default, alias = "01. symbol")]
    pub symbol: Option<String>,
    #[serde(default, alias = "last", alias = "05. price", deserialize_with = "de_opt_number")]
    pub price: Option<f64>,
    #[serde(
        default,
        rename = "changePercent",
        alias = "percentChange",
        alias = "10. change percent",
        deserialize_with = "de_opt_number"
    )]
    pub change_percent: Option<f64>,
    #[serde(default, deserialize_with = "de_opt_number")]
    pub mid: Option<f64>,
    #[serde(default, deserialize_with = "de_opt_number")]
    pub bid: Option<f64>,
    #[serde(default, deserialize_with = "de_opt_number")]
    pub ask: Option<f64>,
    #[serde(default, rename = "bidSize", deserialize_with = "de_opt_number")]
    pub bid_size: Option<f64>,
    #[serde(default, rename = "askSize", deserialize_with = "de_opt_number")]
    pub ask_size: Option<f64>,
    #[serde(default, alias = "06. volume", deserialize_with = "de_opt_number")]
    pub volume: Option<f64>,
    #[serde(
        default,
        rename = "updatedAt",
        alias = "updated",
        alias = "timestamp",
        deserialize_with = "de_opt_number"
    )]
    pub updated_at: Option<f64>,
}

/// Peel provider envelopes off a payload and pick the quote shape.
pub fn classify(value: Value) -> Result<ProviderPayload, NormalizationError> {
    let Value::Object(mut map) = value else {
        return Err(NormalizationError::InvalidField {
            field: "payload",
            reason: "expected a JSON object".into(),
        });
    };

    if let Some(note) = map.get("Note").or_else(|| map.get("Information")) {
        return Ok(ProviderPayload::RateLimited(text_of(note)));
    }
    if let Some(msg) = map.get("Error Message") {
        return Ok(ProviderPayload::ProviderError(text_of(msg)));
    }
    match map.get("s").and_then(Value::as_str) {
        Some("error") => {
            let msg = map
                .get("errmsg")
                .map(text_of)
                .unwrap_or_else(|| "provider reported an error".to_string());
            return Ok(ProviderPayload::ProviderError(msg));
        }
        Some("no_data") => return Ok(ProviderPayload::ProviderError("no data".into())),
        _ => {}
    }

    if let Some(inner) = map.remove("Global Quote") {
        match inner {
            Value::Object(inner) if !inner.is_empty() => map = inner,
            _ => return Ok(ProviderPayload::ProviderError("no data found".into())),
        }
    }

    let raw = RawQuote::deserialize(Value::Object(strip_status(map)))?;
    Ok(ProviderPayload::Quote(raw))
}

/// Map a raw shape to the canonical quote.
pub fn normalise(raw: &RawQuote) -> Result<Quote, NormalizationError> {
    match raw {
        RawQuote::Columnar(c) => normalise_columnar(c),
        RawQuote::Flat(f) => normalise_flat(f),
    }
}

fn normalise_columnar(c: &ColumnarQuote) -> Result<Quote, NormalizationError> {
    let symbol = c.symbol.first().map(|s| canonical_symbol(s)).unwrap_or_default();
    let last = c.last.first().copied().ok_or(NormalizationError::MissingField("last"))?;
    let mid = first(&c.mid);

    build(QuoteParts {
        symbol,
        price: Some(last),
        change_percent: first(&c.change_percent),
        mid,
        bid: first(&c.bid),
        ask: first(&c.ask),
        bid_size: first(&c.bid_size),
        ask_size: first(&c.ask_size),
        volume: first(&c.volume),
        updated_at: first(&c.updated),
    })
}

fn normalise_flat(f: &FlatQuote) -> Result<Quote, NormalizationError> {
    build(QuoteParts {
        symbol: f.symbol.as_deref().map(canonical_symbol).unwrap_or_default(),
        price: f.price,
        change_percent: f.change_percent,
        mid: f.mid,
        bid: f.bid,
        ask: f.ask,
        bid_size: f.bid_size,
        ask_size: f.ask_size,
        volume: f.volume,
        updated_at: f.updated_at,
    })
}

struct QuoteParts {
    symbol: String,
    price: Option<f64>,
    change_percent: Option<f64>,
    mid: Option<f64>,
    bid: Option<f64>,
    ask: Option<f64>,
    bid_size: Option<f64>,
    ask_size: Option<f64>,
    volume: Option<f64>,
    updated_at: Option<f64>,
}

fn build(p: QuoteParts) -> Result<Quote, NormalizationError> {
    if p.symbol.is_empty() {
        return Err(NormalizationError::MissingField("symbol"));
    }
    let price = p.price.ok_or(NormalizationError::MissingField("price"))?;
    if !price.is_finite() || price <= 0.0 {
        return Err(NormalizationError::InvalidField {
            field: "price",
            reason: format!("expected a positive number, got {price}"),
        });
    }

    let change_percent = match (p.change_percent, p.mid) {
        (Some(pct), _) => finite("changePercent", pct)?,
        (None, Some(mid)) => change_from_mid(price, mid),
        (None, None) => 0.0,
    };

    Ok(Quote {
        symbol: p.symbol,
        price,
        change_percent,
        bid: finite("bid", p.bid.unwrap_or(0.0))?,
        ask: finite("ask", p.ask.unwrap_or(0.0))?,
        bid_size: count("bidSize", p.bid_size)?,
        ask_size: count("askSize", p.ask_size)?,
        volume: count("volume", p.volume)?,
        updated_at: match p.updated_at {
            Some(ts) => count("updatedAt", Some(ts))?,
            None => unix_now(),
        },
    })
}

/// `(last - mid) / mid * 100`; a zero mid has no defined change and reads as 0.
pub fn change_from_mid(last: f64, mid: f64) -> f64 {
    if mid == 0.0 || !mid.is_finite() {
        debug!(last, mid, "mid is zero, change percent set to 0");
        return 0.0;
    }
    (last - mid) / mid * 100.0
}

fn first(col: &Option<Vec<f64>>) -> Option<f64> {
    col.as_ref().and_then(|v| v.first().copied())
}

fn finite(field: &'static str, v: f64) -> Result<f64, NormalizationError> {
    if v.is_finite() {
        Ok(v)
    } else {
        Err(NormalizationError::InvalidField { field, reason: format!("not a finite number: {v}") })
    }
}

fn count(field: &'static str, v: Option<f64>) -> Result<u64, NormalizationError> {
    match v {
        None => Ok(0),
        Some(v) if v.is_finite() && v >= 0.0 => Ok(v.round() as u64),
        Some(v) => Err(NormalizationError::InvalidField {
            field,
            reason: format!("expected a non-negative number, got {v}"),
        }),
    }
}

fn text_of(v: &Value) -> String {
    match v {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

// "s":"ok" is a status marker, not quote data
fn strip_status(mut map: Map<String, Value>) -> Map<String, Value> {
    map.remove("s");
    map
}

/// Parse a provider decimal string: "1,234.50", " 1.2% ".
pub fn parse_decimal(s: &str) -> Result<f64, std::num::ParseFloatError> {
    let cleaned: String = s.trim().trim_end_matches('%').chars().filter(|c| *c != ',').collect();
    cleaned.trim().parse::<f64>()
}

fn de_opt_number<'de, D>(deserializer: D) -> Result<Option<f64>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum NumberOrString {
        Number(f64),
        Text(String),
    }

    match Option::<NumberOrString>::deserialize(deserializer)? {
        None => Ok(None),
        Some(NumberOrString::Number(n)) => Ok(Some(n)),
        Some(NumberOrString::Text(s)) => parse_decimal(&s)
            .map(Some)
            .map_err(|e| de::Error::custom(format!("invalid number {s:?}: {e}"))),
    }
}
