//! Snapshot fetching.
//!
//! A [`QuoteFetcher`] answers one symbol at a time. [`fetch_bulk`] fans a symbol list
//! out over one thread per symbol and gathers whatever completes before the deadline:
//! a symbol that fails or is late only loses its own update for this cycle.

use std::collections::{HashMap, HashSet};
use std::io::{ErrorKind, Read, Write};
use std::net::{Shutdown, SocketAddr, TcpStream};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use crossbeam_channel::{RecvTimeoutError, unbounded};
use log::{debug, warn};
use market_common::command::Command;
use market_common::net::{self, COMMAND_PORT};
use market_common::{FeedError, Quote, QuoteResponse, Result};

/// Largest snapshot response accepted.
const MAX_RESPONSE: u64 = 64 * 1024;

/// Source of single-symbol snapshots.
pub trait QuoteFetcher: Send + Sync {
    /// Fetch the latest quote for `symbol`.
    fn fetch_quote(&self, symbol: &str) -> Result<Quote>;
}

/// Settings for [`TcpQuoteFetcher`].
#[derive(Debug, Clone)]
pub struct FetchConfig {
    /// Feed server host.
    pub server_ip: String,
    /// TCP command port.
    pub command_port: u16,
    /// Bearer token sent with every request.
    pub token: Option<String>,
    /// Connect, write and read timeout for one request.
    pub timeout: Duration,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            server_ip: "127.0.0.1".to_string(),
            command_port: COMMAND_PORT,
            token: None,
            timeout: Duration::from_secs(5),
        }
    }
}

/// Fetches snapshots with a `SNAPSHOT` command over the feed server's TCP port.
#[derive(Debug, Clone)]
pub struct TcpQuoteFetcher {
    config: FetchConfig,
}

impl TcpQuoteFetcher {
    /// Create a fetcher.
    pub fn new(config: FetchConfig) -> Self {
        Self { config }
    }

    fn server_addr(&self) -> Result<SocketAddr> {
        let raw = net::addr(&self.config.server_ip, self.config.command_port);
        raw.parse()
            .map_err(|e| FeedError::Format(format!("Invalid server address {}: {}", raw, e)))
    }
}

impl QuoteFetcher for TcpQuoteFetcher {
    fn fetch_quote(&self, symbol: &str) -> Result<Quote> {
        let addr = self.server_addr()?;
        let timeout = self.config.timeout;
        let mut stream =
            TcpStream::connect_timeout(&addr, timeout).map_err(|e| timeout_or_io(e, symbol))?;
        stream.set_read_timeout(Some(timeout))?;
        stream.set_write_timeout(Some(timeout))?;

        let command = Command::snapshot(symbol).with_token(self.config.token.clone());
        stream.write_all(&serde_json::to_vec(&command)?)?;
        stream.shutdown(Shutdown::Write)?;

        let mut raw = Vec::new();
        stream
            .take(MAX_RESPONSE)
            .read_to_end(&mut raw)
            .map_err(|e| timeout_or_io(e, symbol))?;
        debug!("Snapshot response for {}: {} bytes", symbol, raw.len());

        let response: QuoteResponse = serde_json::from_slice(&raw)?;
        response.into_result(symbol)
    }
}

fn timeout_or_io(err: std::io::Error, symbol: &str) -> FeedError {
    match err.kind() {
        ErrorKind::WouldBlock | ErrorKind::TimedOut => {
            FeedError::Timeout(format!("snapshot of {}", symbol))
        }
        _ => FeedError::Io(err),
    }
}

/// Outcome of one bulk cycle.
#[derive(Debug, Default)]
pub struct BulkFetch {
    /// Symbols that returned data.
    pub quotes: HashMap<String, Quote>,
    /// Symbols that failed, with the reason.
    pub failures: Vec<(String, FeedError)>,
}

/// Fetch every symbol concurrently, waiting at most `timeout` for the whole batch.
///
/// Duplicate symbols are fetched once. Failures are logged and collected; a symbol
/// still pending at the deadline is reported as [`FeedError::Timeout`].
pub fn fetch_bulk(
    fetcher: &Arc<dyn QuoteFetcher>,
    symbols: &[String],
    timeout: Duration,
) -> BulkFetch {
    let mut pending: HashSet<String> = HashSet::new();
    let (tx, rx) = unbounded::<(String, Result<Quote>)>();

    for symbol in symbols {
        if !pending.insert(symbol.clone()) {
            continue;
        }
        let fetcher = Arc::clone(fetcher);
        let tx = tx.clone();
        let symbol = symbol.clone();
        thread::spawn(move || {
            let result = fetcher.fetch_quote(&symbol);
            // The collector may have given up already.
            let _ = tx.send((symbol, result));
        });
    }
    drop(tx);

    let deadline = Instant::now() + timeout;
    let mut bulk = BulkFetch::default();

    while !pending.is_empty() {
        match rx.recv_deadline(deadline) {
            Ok((symbol, Ok(quote))) => {
                pending.remove(&symbol);
                if quote.symbol != symbol {
                    warn!("Snapshot for {} came back labelled {}", symbol, quote.symbol);
                }
                bulk.quotes.insert(symbol, quote);
            }
            Ok((symbol, Err(e))) => {
                pending.remove(&symbol);
                warn!("Failed to fetch {}: {}", symbol, e);
                bulk.failures.push((symbol, e));
            }
            Err(RecvTimeoutError::Timeout) => break,
            Err(RecvTimeoutError::Disconnected) => break,
        }
    }

    let mut late: Vec<String> = pending.into_iter().collect();
    late.sort();
    for symbol in late {
        warn!("Fetch of {} did not finish within {:?}", symbol, timeout);
        let err = FeedError::Timeout(format!("snapshot of {}", symbol));
        bulk.failures.push((symbol, err));
    }
    bulk
}
