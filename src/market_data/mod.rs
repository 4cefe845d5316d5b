// Market data module entrypoint
pub mod adapters;    // provider REST + streaming transports
pub mod cache;       // TTL cache shared by the pull and push paths
pub mod chart;       // synthetic price series
pub mod fetcher;     // pull path: cache -> retry -> provider
pub mod hub;         // push path: one shared streaming connection
pub mod movers;      // gainers / losers, number formatting
pub mod normaliser;  // raw provider payloads -> Quote
pub mod reconnect;   // backoff for the hub connection
pub mod retry;       // bounded retry for REST calls
pub mod router;      // wires fetcher + hub into one live feed
pub mod symbols;     // known universe + company names
pub mod types;

pub use cache::TtlCache;
pub use fetcher::QuoteFetcher;
pub use hub::{ConnectionState, Subscription, SubscriptionHub};
pub use types::{FetchError, IndexQuote, Quote, QuoteOutcome};
