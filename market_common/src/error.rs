//! Error types shared between the feed server, the market data library and the CLI.
//!
//! The `FeedError` enum unifies common failure cases for I/O, serialization,
//! channel communication, upstream rejections and internal logic, allowing crates to
//! propagate a single error type.
use std::io;

use thiserror::Error;

/// Unified error type shared by every crate in the workspace.
#[derive(Error, Debug)]
pub enum FeedError {
    /// I/O error originating from the standard library or sockets/files.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Generic formatting/validation error with a human-readable message.
    #[error("Format error: {0}")]
    Format(String),

    /// Error while parsing a symbol watchlist.
    #[error("Parse symbols error: {0}")]
    ParseSymbols(String),

    /// Failure while encoding/decoding JSON via serde_json.
    #[error("JSON serialization/deserialization error: {0}")]
    SerdeJson(#[from] serde_json::Error),

    /// Crossbeam/channel send failed (e.g., receiver dropped); contains a short context string.
    #[error("Channel send failed: {0}")]
    ChannelSend(String),

    /// Crossbeam/channel receive failed (e.g., sender closed); contains a short context string.
    #[error("Channel receive failed: {0}")]
    ChannelRecv(String),

    /// The upstream answered a snapshot request with an error variant.
    #[error("Upstream rejected request for {symbol}: {message}")]
    Upstream {
        /// Symbol the request was made for.
        symbol: String,
        /// Message returned by the upstream.
        message: String,
    },

    /// A request did not complete before its deadline.
    #[error("Timed out waiting for {0}")]
    Timeout(String),

    /// The bearer token was missing or did not match.
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    /// The stream transport could not establish or keep its connection.
    #[error("Connection failed: {0}")]
    Connection(String),

    /// Requested symbol has no data on the serving side.
    #[error("Symbol not found: {0}")]
    SymbolNotFound(String),
}
