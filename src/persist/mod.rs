// Watchlist / portfolio bookkeeping over a string key-value store.
pub mod types;
pub use types::*;
pub mod snapshot;

use ahash::AHashMap;
use parking_lot::Mutex;
use tracing::debug;

/// String key -> string value storage that outlives a view (browser local storage,
/// a file, a map in memory).
pub trait KeyValueStore: Send + Sync {
    fn get_item(&self, key: &str) -> Option<String>;
    fn set_item(&self, key: &str, value: String);
}

/// Process-lifetime store.
#[derive(Debug, Default)]
pub struct MemoryStore {
    items: Mutex<AHashMap<String, String>>,
}

impl KeyValueStore for MemoryStore {
    fn get_item(&self, key: &str) -> Option<String> {
        self.items.lock().get(key).cloned()
    }

    fn set_item(&self, key: &str, value: String) {
        self.items.lock().insert(key.to_string(), value);
    }
}

/// Watchlist + portfolio, written back to the store after every change.
pub struct Bookkeeping<K: KeyValueStore> {
    store: K,
    watchlist: Watchlist,
    portfolio: Portfolio,
}

impl<K: KeyValueStore> Bookkeeping<K> {
    pub fn load(store: K) -> PersistResult<Self> {
        let watchlist = snapshot::load_watchlist(&store)?;
        let portfolio = snapshot::load_portfolio(&store)?;
        debug!(watched = watchlist.symbols().len(), "bookkeeping restored");
        Ok(Self { store, watchlist, portfolio })
    }

    pub fn watchlist(&self) -> &Watchlist {
        &self.watchlist
    }

    pub fn portfolio(&self) -> &Portfolio {
        &self.portfolio
    }

    pub fn toggle_watchlist(&mut self, symbol: &str) -> PersistResult<bool> {
        let watched = self.watchlist.toggle(symbol);
        snapshot::save_watchlist(&self.store, &self.watchlist)?;
        Ok(watched)
    }

    pub fn buy(&mut self, symbol: &str, shares: u64) -> PersistResult<u64> {
        let held = self.portfolio.add(symbol, shares);
        snapshot::save_portfolio(&self.store, &self.portfolio)?;
        Ok(held)
    }

    pub fn sell(&mut self, symbol: &str, shares: u64) -> PersistResult<u64> {
        let held = self.portfolio.remove(symbol, shares)?;
        snapshot::save_portfolio(&self.store, &self.portfolio)?;
        Ok(held)
    }

    pub fn into_store(self) -> K {
        self.store
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_changes_survive_reload() {
        let mut books = Bookkeeping::load(MemoryStore::default()).unwrap();
        assert!(books.toggle_watchlist("nvda").unwrap());
        books.buy("NVDA", 4).unwrap();
        books.sell("NVDA", 1).unwrap();
        assert!(books.sell("NVDA", 10).is_err());

        let books = Bookkeeping::load(books.into_store()).unwrap();
        assert!(books.watchlist().contains("NVDA"));
        assert_eq!(books.portfolio().shares("NVDA"), 3);
    }
}
