// Live quote demo against the configured provider.
// Run with: cargo run --example market_data_demo -- AAPL MSFT

use std::time::Duration;

use quotehub::config::Settings;
use quotehub::market_data::router::{self, QuoteRouter};
use quotehub::telemetry;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    telemetry::init_tracing("info");

    let mut symbols: Vec<String> = std::env::args().skip(1).map(|s| s.to_ascii_uppercase()).collect();
    if symbols.is_empty() {
        symbols = vec!["AAPL".into(), "MSFT".into(), "NVDA".into()];
    }

    let settings = Settings::load(None)?;
    let router = QuoteRouter::from_settings(&settings)?;
    router::run_demo(&router, &symbols, Duration::from_secs(30)).await;
    Ok(())
}
