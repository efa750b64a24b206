//! Command-line arguments for the feed server.
use clap::Parser;

/// Parsed command-line arguments.
#[derive(Debug, Parser)]
#[command(version, about, long_about = None)]
pub struct Args {
    /// Address to bind both the command and the data sockets on.
    #[clap(long, default_value = "0.0.0.0")]
    pub bind_ip: String,

    /// Comma separated symbols to generate quotes for.
    #[clap(long, default_value = "AAPL,MSFT,TSLA,GOOGL")]
    pub symbols: String,

    /// Comma separated underlyings to generate option chains for.
    #[clap(long, default_value = "SPY")]
    pub underlyings: String,

    /// Milliseconds between generator ticks.
    #[clap(long, default_value_t = 500)]
    pub tick_ms: u64,

    /// Publish option chains every this many ticks.
    #[clap(long, default_value_t = 10)]
    pub chain_every: u32,

    /// Seconds without a PING before a client stream is closed.
    #[clap(long, default_value_t = 5)]
    pub ping_timeout_secs: u64,

    /// Token clients must present; open access when unset.
    #[clap(long, env = "MARKET_FEED_TOKEN", hide_env_values = true)]
    pub token: Option<String>,
}
