//! Command-line arguments for the market data consumer.
//!
//! This module defines the CLI interface using `clap`. See `main` for end-to-end usage.
use clap::Parser;

/// Parsed command-line arguments.
#[derive(Debug, Parser)]
#[command(version, about, long_about = None)]
pub struct Args {
    /// Feed server IP address (IPv4 or IPv6).
    #[clap(long, default_value = "127.0.0.1")]
    pub server_ip: String,

    /// Local UDP port to bind for receiving the stream; 0 picks a free port.
    #[clap(long, default_value_t = 0)]
    pub listen_port: u16,

    /// Path to the watchlist file.
    /// Symbols may be separated by commas, spaces, or new lines.
    #[clap(long)]
    pub path: String,

    /// Comma separated underlyings whose option chains to stream.
    #[clap(long, default_value = "")]
    pub underlyings: String,

    /// JSON file with holdings (`[{"symbol","quantity","avg_price"}]`) to value.
    #[clap(long)]
    pub holdings: Option<String>,

    /// Bearer token sent with every request.
    #[clap(long, env = "MARKET_DATA_TOKEN", hide_env_values = true)]
    pub token: Option<String>,

    /// Seconds between polling cycles.
    #[clap(long, default_value_t = 30)]
    pub poll_secs: u64,

    /// Per-cycle fetch deadline in milliseconds.
    #[clap(long, default_value_t = 5000)]
    pub fetch_timeout_ms: u64,

    /// Connect attempts per reconnect.
    #[clap(long, default_value_t = 3)]
    pub reconnect_attempts: u32,

    /// Pause between connect attempts in milliseconds.
    #[clap(long, default_value_t = 2000)]
    pub reconnect_delay_ms: u64,

    /// Drop quotes older than the stored ones instead of taking the latest arrival.
    #[clap(long)]
    pub reject_stale: bool,

    /// Do not open the push stream; rely on polling only.
    #[clap(long)]
    pub no_stream: bool,

    /// Seconds between reconnect attempts while the stream is in error.
    #[clap(long, default_value_t = 30)]
    pub retry_secs: u64,

    /// Seconds between status summaries.
    #[clap(long, default_value_t = 10)]
    pub summary_secs: u64,
}
