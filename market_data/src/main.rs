//! Market data consumer — subscribes to live quotes from the feed server, keeps them
//! fresh with the polling fallback and logs every update together with periodic
//! summaries. It reads a watchlist from a text file, opens the push stream, and
//! reconnects with a bounded retry whenever the stream reports an error.
//!
//! Usage example (CLI):
//! ```bash
//! market_data --server-ip 192.168.0.10 --path ./watchlist.txt --underlyings SPY
//! ```
//!
//! The watchlist file should contain symbols separated by commas, spaces, or new lines.
#![warn(missing_docs)]
mod args;

use std::fs::File;
use std::io::BufReader;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use crossbeam_channel::{bounded, select, tick, unbounded};
use log::{error, info, warn};
use market_common::symbols::{parse_symbol_list, parse_symbols};
use market_common::{ConnectionStatus, FeedError, Result};
use market_common::net::{COMMAND_PORT, DATA_PORT};
use market_data::views::{
    Holding, calculate_portfolio_value, format_change_display, format_price, is_market_open_now,
};
use market_data::{
    FetchConfig, HubConfig, MarketDataHub, NullTransport, OrderingPolicy, Poller, PollerConfig,
    QuoteFetcher, ReconnectPolicy, StreamConfig, StreamTransport, Subscription, TcpQuoteFetcher,
    UdpStreamTransport,
};

use crate::args::Args;

fn main() -> Result<(), FeedError> {
    init_logger();
    let args = Args::parse();

    let (shutdown_tx, shutdown_rx) = unbounded::<()>();
    ctrlc::set_handler(move || {
        info!("Ctrl+C received. Shutting down consumer...");
        let _ = shutdown_tx.send(());
    })
    .map_err(|e| FeedError::Format(format!("Error setting Ctrl+C handler: {}", e)))?;

    let server_ip = args.server_ip.trim().replace('"', "");
    let file_path = normalize_path(&args.path);
    if !is_file_exist(&file_path) {
        return Err(FeedError::ParseSymbols(format!(
            "watchlist {} does not exist",
            file_path.display()
        )));
    }
    let symbols = parse_symbols(BufReader::new(File::open(&file_path)?))?;
    let underlyings = parse_symbol_list(&args.underlyings)?;
    info!("Symbols: {:?}, underlyings: {:?}", symbols, underlyings);

    let holdings = match &args.holdings {
        Some(path) => load_holdings(&normalize_path(path))?,
        None => Vec::new(),
    };

    let mut listen_port = args.listen_port;
    if listen_port == DATA_PORT {
        warn!(
            "--listen-port={} matches the server port DATA_PORT ({}). \
             A free local port will be selected.",
            listen_port, DATA_PORT
        );
        listen_port = 0;
    }

    let transport: Box<dyn StreamTransport> = if args.no_stream {
        info!("Push stream disabled; polling only");
        Box::new(NullTransport)
    } else {
        Box::new(UdpStreamTransport::new(StreamConfig {
            server_ip: server_ip.clone(),
            command_port: COMMAND_PORT,
            data_port: DATA_PORT,
            listen_addr: format!("0.0.0.0:{}", listen_port),
            symbols: symbols.clone(),
            underlyings: underlyings.clone(),
            token: args.token.clone(),
            ..StreamConfig::default()
        }))
    };

    let hub = MarketDataHub::new(
        HubConfig {
            ordering: if args.reject_stale {
                OrderingPolicy::RejectStale
            } else {
                OrderingPolicy::ArrivalOrder
            },
            reconnect: ReconnectPolicy {
                max_attempts: args.reconnect_attempts,
                delay: Duration::from_millis(args.reconnect_delay_ms),
            },
        },
        transport,
    );

    // At most one reconnect request is ever queued.
    let (reconnect_tx, reconnect_rx) = bounded::<()>(1);
    let mut subscriptions: Vec<Subscription> = Vec::new();
    subscriptions.push(hub.subscribe_to_connection_status(|status| {
        info!("Connection status: {}", status);
    }));
    subscriptions.push(hub.subscribe_to_session_loss(move || {
        let _ = reconnect_tx.try_send(());
    }));
    for symbol in &symbols {
        subscriptions.push(hub.subscribe_to_quote(symbol, |quote| {
            info!(
                "QUOTE: {} Price={} Change={} Time={}",
                quote.symbol,
                format_price(quote.last_price),
                format_change_display(quote.change, quote.change_percent),
                quote.timestamp
            );
        }));
    }
    for underlying in &underlyings {
        subscriptions.push(hub.subscribe_to_option_chain(underlying, |chain| {
            let (low, high) = match (chain.strikes().first(), chain.strikes().last()) {
                (Some(first), Some(last)) => (first.strike, last.strike),
                _ => (0.0, 0.0),
            };
            info!(
                "CHAIN: {} strikes={} range={}..{} Time={}",
                chain.underlying_symbol,
                chain.len(),
                format_price(low),
                format_price(high),
                chain.timestamp
            );
        }));
    }

    if !args.no_stream {
        if let Err(e) = hub.reconnect() {
            error!("Initial stream connection failed: {}; continuing with polling", e);
        }
    }

    let fetcher: Arc<dyn QuoteFetcher> = Arc::new(TcpQuoteFetcher::new(FetchConfig {
        server_ip,
        command_port: COMMAND_PORT,
        token: args.token.clone(),
        timeout: Duration::from_millis(args.fetch_timeout_ms),
    }));
    let mut poller = Poller::start(
        hub.clone(),
        fetcher,
        PollerConfig {
            symbols: symbols.clone(),
            interval: Duration::from_secs(args.poll_secs.max(1)),
            fetch_timeout: Duration::from_millis(args.fetch_timeout_ms),
            run_immediately: true,
        },
    );

    info!("Consumer is running. Press Ctrl+C to exit.");
    let summary = tick(Duration::from_secs(args.summary_secs.max(1)));
    let retry = tick(Duration::from_secs(args.retry_secs.max(1)));
    loop {
        select! {
            recv(shutdown_rx) -> _ => break,
            recv(reconnect_rx) -> _ => {
                warn!("Stream session lost, reconnecting");
                if let Err(e) = hub.reconnect() {
                    error!("Reconnect failed: {}; next try in {}s", e, args.retry_secs.max(1));
                }
            },
            recv(retry) -> _ => {
                if !args.no_stream && hub.connection_status() == ConnectionStatus::Error {
                    if let Err(e) = hub.reconnect() {
                        error!("Reconnect failed: {}", e);
                    }
                }
            },
            recv(summary) -> _ => log_summary(&hub, &holdings, poller.cycles()),
        }
    }

    drop(subscriptions);
    poller.stop();
    hub.shutdown();
    Ok(())
}

fn log_summary(hub: &MarketDataHub, holdings: &[Holding], cycles: u64) {
    let quotes = hub.store().snapshot();
    info!(
        "SUMMARY: status={} quoted={} poll_cycles={} market_open={}",
        hub.connection_status(),
        quotes.len(),
        cycles,
        is_market_open_now()
    );
    if !holdings.is_empty() {
        info!(
            "PORTFOLIO: value={}",
            format_price(calculate_portfolio_value(holdings, &quotes))
        );
    }
}

fn load_holdings(path: &PathBuf) -> Result<Vec<Holding>> {
    let file = File::open(path)?;
    let holdings: Vec<Holding> = serde_json::from_reader(BufReader::new(file))?;
    info!("Loaded {} holdings from {}", holdings.len(), path.display());
    Ok(holdings)
}

fn init_logger() {
    env_logger::Builder::new()
        .filter_level(log::LevelFilter::Info)
        .parse_default_env()
        .init();
}

/// Normalize a CLI-provided path string by trimming whitespace and matching quotes.
///
/// This allows passing Windows paths in quotes without breaking parsing.
fn normalize_path(raw: &str) -> PathBuf {
    let trimmed = raw.trim();
    let no_quotes = trimmed
        .strip_prefix('"')
        .and_then(|s| s.strip_suffix('"'))
        .unwrap_or(trimmed);
    PathBuf::from(no_quotes)
}

/// Returns `true` if the provided path exists and is a regular file.
fn is_file_exist(path: &PathBuf) -> bool {
    path.exists() && path.is_file()
}
