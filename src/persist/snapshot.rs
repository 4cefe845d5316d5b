//! JSON codec between the bookkeeping types and the key-value store.
//!
//! Layout matches what the browser app kept in local storage:
//!   watchlist -> ["AAPL","MSFT"]
//!   portfolio -> {"AAPL":5}

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;

use crate::persist::types::{PersistError, PersistResult, Portfolio, Watchlist};
use crate::persist::KeyValueStore;

pub const WATCHLIST_KEY: &str = "watchlist";
pub const PORTFOLIO_KEY: &str = "portfolio";

fn save<T: Serialize>(store: &dyn KeyValueStore, key: &str, value: &T) -> PersistResult<()> {
    store.set_item(key, serde_json::to_string(value)?);
    Ok(())
}

// Missing key -> default. Invalid JSON is a serialization error; valid JSON of the
// wrong shape is a format mismatch.
fn load<T: DeserializeOwned + Default>(store: &dyn KeyValueStore, key: &'static str) -> PersistResult<T> {
    let Some(raw) = store.get_item(key) else {
        return Ok(T::default());
    };
    let value: Value = serde_json::from_str(&raw)?;
    serde_json::from_value(value).map_err(|_| PersistError::FormatMismatch { key })
}

pub fn save_watchlist(store: &dyn KeyValueStore, watchlist: &Watchlist) -> PersistResult<()> {
    save(store, WATCHLIST_KEY, watchlist)
}

pub fn load_watchlist(store: &dyn KeyValueStore) -> PersistResult<Watchlist> {
    load(store, WATCHLIST_KEY)
}

pub fn save_portfolio(store: &dyn KeyValueStore, portfolio: &Portfolio) -> PersistResult<()> {
    save(store, PORTFOLIO_KEY, portfolio)
}

pub fn load_portfolio(store: &dyn KeyValueStore) -> PersistResult<Portfolio> {
    load(store, PORTFOLIO_KEY)
}
