use anyhow::Context;
use clap::Parser;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::sync::mpsc;
use tracing::{info, warn};

use quotehub::config::Settings;
use quotehub::market_data::adapters::{RestQuoteSource, WsConnector};
use quotehub::market_data::chart::{self, TimeFilter, Trend};
use quotehub::market_data::movers::{format_large_number, top_gainers, top_losers};
use quotehub::market_data::router::{describe, QuoteEvent, QuoteRouter};
use quotehub::market_data::{QuoteOutcome, Subscription};
use quotehub::persist::{Bookkeeping, MemoryStore};
use quotehub::telemetry;

#[derive(Debug, Parser)]
#[command(name = "quotehub", about = "Real-time stock quotes from the command line")]
struct Args {
    /// Settings file (TOML). Missing file is ignored.
    #[arg(long, default_value = quotehub::config::DEFAULT_CONFIG_FILE)]
    config: String,

    /// Override provider.rest_url
    #[arg(long)]
    rest_url: Option<String>,

    /// Override provider.stream_url
    #[arg(long)]
    stream_url: Option<String>,

    /// Streaming token
    #[arg(long, env = "QUOTEHUB_TOKEN", hide_env_values = true)]
    token: Option<String>,

    /// Default log filter when RUST_LOG is unset
    #[arg(long, default_value = "info")]
    log: String,

    /// Prometheus exporter port (only with the metrics-exporter feature)
    #[arg(long, default_value_t = 9000)]
    metrics_port: u16,
}

type Router = QuoteRouter<RestQuoteSource, WsConnector>;

fn print_help() {
    println!("Available commands:");
    println!("  quote <SYM>              - Latest quote (cached for a few seconds)");
    println!("  batch <SYM> [SYM...]     - Quotes for several symbols");
    println!("  search <text>            - Search known symbols and companies");
    println!("  remote <text>            - Search through the provider");
    println!("  prefetch <SYM> [SYM...]  - Warm the cache with one bulk request");
    println!("  watch <SYM> [SYM...]     - Stream live updates");
    println!("  unwatch <SYM>            - Stop streaming a symbol");
    println!("  stop                     - Stop all live updates");
    println!("  list                     - Show the watchlist");
    println!("  toggle <SYM>             - Add/remove a watchlist symbol");
    println!("  buy <SYM> <N>            - Add shares to the portfolio");
    println!("  sell <SYM> <N>           - Sell shares from the portfolio");
    println!("  holdings                 - Portfolio with market value");
    println!("  movers                   - Top gainers and losers");
    println!("  indices                  - Headline market indices");
    println!("  chart <SYM> [1D|7D|1M|1Y|ALL]");
    println!("  state                    - Streaming connection state");
    println!("  quit, q                  - Exit");
}

fn print_outcomes(outcomes: &[QuoteOutcome]) {
    for outcome in outcomes {
        match outcome {
            QuoteOutcome::Ready(q) => println!("  {}", describe(q)),
            QuoteOutcome::Failed { symbol, error } => println!("  {symbol:<6} unavailable: {error}"),
        }
    }
}

fn symbols_of(parts: &[&str]) -> Vec<String> {
    parts.iter().map(|s| s.trim().to_ascii_uppercase()).filter(|s| !s.is_empty()).collect()
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok(); // load .env
    let args = Args::parse();
    telemetry::init_tracing(&args.log);
    telemetry::init_metrics(args.metrics_port)?;

    let mut settings = Settings::load(Some(args.config.as_str())).context("loading settings")?;
    if let Some(url) = args.rest_url {
        settings.provider.rest_url = url;
    }
    if let Some(url) = args.stream_url {
        settings.provider.stream_url = url;
    }
    if args.token.is_some() {
        settings.provider.token = args.token;
    }
    info!(rest = %settings.provider.rest_url, stream = %settings.provider.stream_url, "quotehub starting");

    let router: Router = QuoteRouter::from_settings(&settings).context("building provider client")?;
    let mut books = Bookkeeping::load(MemoryStore::default())?;

    // Live updates are printed by their own task so the prompt stays responsive.
    let (tx, mut rx) = mpsc::unbounded_channel::<QuoteEvent>();
    let printer = tokio::spawn(async move {
        while let Some(event) = rx.recv().await {
            match event {
                QuoteEvent::Snapshot(q) => println!("\n[snapshot] {}", describe(&q)),
                QuoteEvent::Update(q) => println!("\n[live]     {}", describe(&q)),
                QuoteEvent::Unavailable { symbol, reason } => println!("\n[n/a]      {symbol}: {reason}"),
            }
        }
    });
    let mut live: Vec<Subscription> = Vec::new();

    let mut stdout = tokio::io::stdout();
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    print_help();

    // CLI loop
    loop {
        stdout.write_all(b"\nquotehub> ").await?;
        stdout.flush().await?;

        let Some(line) = lines.next_line().await? else { break };
        let parts: Vec<&str> = line.split_whitespace().collect();
        let Some((command, rest)) = parts.split_first() else { continue };
        let command = command.to_lowercase();

        match command.as_str() {
            "help" | "h" => print_help(),
            "quote" => match rest.first() {
                Some(sym) => match router.fetcher().get_stock_quote(sym).await {
                    Ok(q) => println!("  {}", describe(&q)),
                    Err(e) => println!("  error: {e}"),
                },
                None => println!("Usage: quote <SYM>"),
            },
            "batch" => match router.fetcher().get_watchlist_stocks(symbols_of(rest).as_slice()).await {
                Ok(outcomes) => print_outcomes(&outcomes),
                Err(e) => println!("  error: {e}"),
            },
            "search" => match router.fetcher().search_stocks(&rest.join(" ")).await {
                Ok(quotes) if quotes.is_empty() => println!("  no matches"),
                Ok(quotes) => {
                    for q in quotes {
                        println!("  {} ({})", describe(&q), router.fetcher().directory().company_name(&q.symbol));
                    }
                }
                Err(e) => println!("  error: {e}"),
            },
            "remote" => match router.fetcher().search_remote(&rest.join(" ")).await {
                Ok(quotes) if quotes.is_empty() => println!("  no matches"),
                Ok(quotes) => quotes.iter().for_each(|q| println!("  {}", describe(q))),
                Err(e) => println!("  error: {e}"),
            },
            "prefetch" => match router.fetcher().prefetch(symbols_of(rest).as_slice()).await {
                Ok(n) => println!("  cached {n} quote(s)"),
                Err(e) => println!("  error: {e}"),
            },
            "watch" => {
                let symbols = symbols_of(rest);
                if symbols.is_empty() {
                    println!("Usage: watch <SYM> [SYM...]");
                } else {
                    live.push(router.watch(&symbols, tx.clone()).await);
                }
            }
            "unwatch" => {
                let targets = symbols_of(rest);
                live.retain(|sub| {
                    let hit = sub.symbols().iter().any(|s| targets.contains(s));
                    if hit {
                        sub.unsubscribe();
                    }
                    !hit
                });
                println!("  streaming: {:?}", router.hub().subscribed_symbols());
            }
            "stop" => {
                live.drain(..).for_each(|sub| sub.unsubscribe());
                router.hub().unsubscribe_all();
                println!("  all live updates stopped");
            }
            "list" => {
                let symbols = books.watchlist().symbols().to_vec();
                if symbols.is_empty() {
                    println!("  watchlist is empty");
                } else {
                    match router.fetcher().get_watchlist_stocks(symbols.as_slice()).await {
                        Ok(outcomes) => print_outcomes(&outcomes),
                        Err(e) => println!("  error: {e}"),
                    }
                }
            }
            "toggle" => match rest.first() {
                Some(sym) => match books.toggle_watchlist(sym) {
                    Ok(true) => println!("  added {} to watchlist", sym.to_ascii_uppercase()),
                    Ok(false) => println!("  removed {} from watchlist", sym.to_ascii_uppercase()),
                    Err(e) => println!("  error: {e}"),
                },
                None => println!("Usage: toggle <SYM>"),
            },
            "buy" | "sell" => {
                let parsed = match rest {
                    [sym, n] => n.parse::<u64>().ok().map(|n| (*sym, n)),
                    _ => None,
                };
                let Some((sym, shares)) = parsed else {
                    println!("Usage: {command} <SYM> <N>");
                    continue;
                };
                let result = if command == "buy" { books.buy(sym, shares) } else { books.sell(sym, shares) };
                match result {
                    Ok(held) => println!("  {} now holds {held} share(s)", sym.to_ascii_uppercase()),
                    Err(e) => println!("  error: {e}"),
                }
            }
            "holdings" => {
                let symbols = books.portfolio().symbols();
                if symbols.is_empty() {
                    println!("  portfolio is empty");
                    continue;
                }
                let quotes: Vec<_> = match router.fetcher().get_watchlist_stocks(symbols.as_slice()).await {
                    Ok(outcomes) => outcomes.into_iter().filter_map(QuoteOutcome::into_quote).collect(),
                    Err(e) => {
                        println!("  error: {e}");
                        Vec::new()
                    }
                };
                for (symbol, shares) in books.portfolio().holdings() {
                    println!("  {symbol:<6} {shares:>8} share(s)");
                }
                let total = books.portfolio().total_value(&quotes);
                println!("  market value: ${}", format_large_number(total));
            }
            "movers" => {
                let universe = router.fetcher().directory().symbols().to_vec();
                match router.fetcher().get_watchlist_stocks(universe.as_slice()).await {
                    Ok(outcomes) => {
                        let quotes: Vec<_> = outcomes.into_iter().filter_map(QuoteOutcome::into_quote).collect();
                        println!("  Top gainers:");
                        top_gainers(&quotes, 3).iter().for_each(|q| println!("    {}", describe(q)));
                        println!("  Top losers:");
                        top_losers(&quotes, 3).iter().for_each(|q| println!("    {}", describe(q)));
                    }
                    Err(e) => println!("  error: {e}"),
                }
            }
            "indices" => match router.fetcher().get_top_indices().await {
                Ok(indices) if indices.is_empty() => println!("  no indices"),
                Ok(indices) => indices.iter().for_each(|i| {
                    println!("  {:<8} {:>12.2} {:>+9.2} ({:+.2}%)  {}", i.symbol, i.price, i.change, i.change_percent, i.name)
                }),
                Err(e) => println!("  error: {e}"),
            },
            "chart" => {
                let Some(sym) = rest.first() else {
                    println!("Usage: chart <SYM> [1D|7D|1M|1Y|ALL]");
                    continue;
                };
                let filter = match rest.get(1).map(|f| f.parse::<TimeFilter>()).transpose() {
                    Ok(f) => f.unwrap_or(TimeFilter::OneMonth),
                    Err(e) => {
                        println!("  {e}");
                        continue;
                    }
                };
                match router.fetcher().get_stock_quote(sym).await {
                    Ok(q) => {
                        let series = chart::synthetic_series(q.price, filter);
                        let trend = match chart::trend(&series) {
                            Trend::Up => "up",
                            Trend::Down => "down",
                            Trend::Flat => "flat",
                        };
                        let (lo, hi) = series
                            .iter()
                            .fold((f64::MAX, f64::MIN), |(lo, hi), p| (lo.min(p.price), hi.max(p.price)));
                        println!("  {} {} points, low {lo:.2} high {hi:.2}, trend {trend}", q.symbol, series.len());
                    }
                    Err(e) => println!("  error: {e}"),
                }
            }
            "state" => println!(
                "  {:?}, streaming {:?}",
                router.hub().connection_state(),
                router.hub().subscribed_symbols()
            ),
            "quit" | "q" => break,
            other => println!("Unknown command {other:?}. Type 'help'."),
        }
    }

    live.drain(..).for_each(|sub| sub.unsubscribe());
    router.hub().unsubscribe_all();
    drop(tx);
    if let Err(e) = printer.await {
        warn!(error = %e, "printer task ended abnormally");
    }
    info!("bye");
    Ok(())
}
