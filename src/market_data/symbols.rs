// Known symbol universe and display names.

use ahash::AHashMap;

use crate::market_data::types::canonical_symbol;

const DEFAULT_UNIVERSE: [(&str, &str); 20] = [
    ("AAPL", "Apple Inc."),
    ("MSFT", "Microsoft Corporation"),
    ("GOOGL", "Alphabet Inc."),
    ("AMZN", "Amazon.com Inc."),
    ("NVDA", "NVIDIA Corporation"),
    ("META", "Meta Platforms Inc."),
    ("TSLA", "Tesla Inc."),
    ("JPM", "JPMorgan Chase & Co."),
    ("V", "Visa Inc."),
    ("PG", "Procter & Gamble Co."),
    ("JNJ", "Johnson & Johnson"),
    ("UNH", "UnitedHealth Group Inc."),
    ("MA", "Mastercard Inc."),
    ("HD", "The Home Depot Inc."),
    ("ADBE", "Adobe Inc."),
    ("CRM", "Salesforce Inc."),
    ("NFLX", "Netflix Inc."),
    ("DIS", "The Walt Disney Company"),
    ("CSCO", "Cisco Systems Inc."),
    ("VZ", "Verizon Communications Inc."),
];

#[derive(Debug, Clone)]
pub struct SymbolDirectory {
    // insertion order is the display order
    symbols: Vec<String>,
    names: AHashMap<String, String>,
}

impl Default for SymbolDirectory {
    fn default() -> Self {
        Self::from_pairs(DEFAULT_UNIVERSE.iter().map(|(s, n)| (s.to_string(), n.to_string())))
    }
}

impl SymbolDirectory {
    pub fn from_pairs(pairs: impl IntoIterator<Item = (String, String)>) -> Self {
        let mut symbols = Vec::new();
        let mut names = AHashMap::new();
        for (symbol, name) in pairs {
            let symbol = canonical_symbol(&symbol);
            if symbol.is_empty() {
                continue;
            }
            if names.insert(symbol.clone(), name).is_none() {
                symbols.push(symbol);
            }
        }
        Self { symbols, names }
    }

    pub fn symbols(&self) -> &[String] {
        &self.symbols
    }

    pub fn contains(&self, symbol: &str) -> bool {
        self.names.contains_key(&canonical_symbol(symbol))
    }

    /// Company name, or the symbol itself when unknown.
    pub fn company_name(&self, symbol: &str) -> String {
        let symbol = canonical_symbol(symbol);
        self.names.get(&symbol).cloned().unwrap_or(symbol)
    }

    /// Case-insensitive substring match on symbol or company name. Blank query matches nothing.
    pub fn search(&self, query: &str) -> Vec<String> {
        let needle = query.trim().to_lowercase();
        if needle.is_empty() {
            return Vec::new();
        }
        self.symbols
            .iter()
            .filter(|s| {
                s.to_lowercase().contains(&needle)
                    || self.names.get(*s).is_some_and(|n| n.to_lowercase().contains(&needle))
            })
            .cloned()
            .collect()
    }
}
