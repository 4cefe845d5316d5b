use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::market_data::types::{canonical_symbol, Quote};

#[derive(Debug, thiserror::Error)]
pub enum PersistError {
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("stored value under `{key}` has an unexpected shape")]
    FormatMismatch { key: &'static str },

    #[error("cannot sell {requested} share(s) of {symbol}: only {owned} owned")]
    InsufficientShares { symbol: String, requested: u64, owned: u64 },
}

pub type PersistResult<T> = Result<T, PersistError>;

/// Symbols the user follows, in the order they were added.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Watchlist {
    symbols: Vec<String>,
}

impl Watchlist {
    /// Add the symbol if absent, remove it if present. Returns true when it is now watched.
    pub fn toggle(&mut self, symbol: &str) -> bool {
        let symbol = canonical_symbol(symbol);
        if symbol.is_empty() {
            return false;
        }
        match self.symbols.iter().position(|s| *s == symbol) {
            Some(idx) => {
                self.symbols.remove(idx);
                false
            }
            None => {
                self.symbols.push(symbol);
                true
            }
        }
    }

    pub fn contains(&self, symbol: &str) -> bool {
        let symbol = canonical_symbol(symbol);
        self.symbols.iter().any(|s| *s == symbol)
    }

    pub fn symbols(&self) -> &[String] {
        &self.symbols
    }

    pub fn is_empty(&self) -> bool {
        self.symbols.is_empty()
    }
}

/// Shares held per symbol. A symbol with zero shares is not stored.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Portfolio {
    holdings: BTreeMap<String, u64>,
}

impl Portfolio {
    pub fn add(&mut self, symbol: &str, shares: u64) -> u64 {
        let symbol = canonical_symbol(symbol);
        if symbol.is_empty() || shares == 0 {
            return self.shares(&symbol);
        }
        let held = self.holdings.entry(symbol).or_insert(0);
        *held = held.saturating_add(shares);
        *held
    }

    /// Sell `shares`. Selling more than owned is rejected and leaves the holding untouched.
    pub fn remove(&mut self, symbol: &str, shares: u64) -> PersistResult<u64> {
        let symbol = canonical_symbol(symbol);
        let owned = self.shares(&symbol);
        if shares > owned {
            return Err(PersistError::InsufficientShares { symbol, requested: shares, owned });
        }
        let left = owned - shares;
        if left == 0 {
            self.holdings.remove(&symbol);
        } else {
            self.holdings.insert(symbol, left);
        }
        Ok(left)
    }

    pub fn shares(&self, symbol: &str) -> u64 {
        self.holdings.get(&canonical_symbol(symbol)).copied().unwrap_or(0)
    }

    pub fn holdings(&self) -> impl Iterator<Item = (&str, u64)> {
        self.holdings.iter().map(|(s, n)| (s.as_str(), *n))
    }

    pub fn symbols(&self) -> Vec<String> {
        self.holdings.keys().cloned().collect()
    }

    /// Market value at the given quotes. Holdings without a quote count as zero.
    pub fn total_value(&self, quotes: &[Quote]) -> f64 {
        quotes
            .iter()
            .map(|q| self.shares(&q.symbol) as f64 * q.price)
            .sum()
    }

    pub fn is_empty(&self) -> bool {
        self.holdings.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn quote(symbol: &str, price: f64) -> Quote {
        Quote {
            symbol: symbol.into(),
            price,
            change_percent: 0.0,
            bid: 0.0,
            ask: 0.0,
            bid_size: 0,
            ask_size: 0,
            volume: 0,
            updated_at: 0,
        }
    }

    #[test]
    fn test_watchlist_toggle() {
        let mut w = Watchlist::default();
        assert!(w.toggle("aapl"));
        assert!(w.toggle("MSFT"));
        assert!(w.contains("AAPL"));
        assert!(!w.toggle("AAPL"));
        assert_eq!(w.symbols(), ["MSFT".to_string()]);
        assert!(!w.toggle("  "));
    }

    #[test]
    fn test_portfolio_buy_sell() {
        let mut p = Portfolio::default();
        assert_eq!(p.add("AAPL", 5), 5);
        assert_eq!(p.add("aapl", 3), 8);
        assert_eq!(p.remove("AAPL", 2).unwrap(), 6);

        let err = p.remove("AAPL", 10).unwrap_err();
        assert!(matches!(err, PersistError::InsufficientShares { owned: 6, requested: 10, .. }));
        assert_eq!(p.shares("AAPL"), 6);

        assert_eq!(p.remove("AAPL", 6).unwrap(), 0);
        assert!(p.is_empty());
        assert!(p.remove("TSLA", 1).is_err());
        assert_eq!(p.remove("TSLA", 0).unwrap(), 0);
    }

    #[test]
    fn test_total_value() {
        let mut p = Portfolio::default();
        p.add("AAPL", 2);
        p.add("MSFT", 1);
        let value = p.total_value(&[quote("AAPL", 100.0), quote("MSFT", 300.0), quote("TSLA", 50.0)]);
        assert_eq!(value, 500.0);
    }
}
