//!
//! Common types and utilities shared by the feed server, the market data library and
//! its command-line consumer.
//!
//! This crate aggregates:
//! - `error` — unified error type `FeedError` used across the workspace.
//! - `result` — handy `Result<T, FeedError>` alias.
//! - `quote` — `Quote` snapshots and the `QuoteResponse` snapshot envelope.
//! - `option_chain` — `OptionChainSnapshot` strike ladders.
//! - `connection` — `ConnectionStatus` of the push channel.
//! - `event` — `FeedEvent`, the unit carried by the push channel.
//! - `command` — TCP command payloads exchanged between consumer and server.
//! - `symbols` — watchlist parsing.
//! - `net` — networking constants and small helpers.
#![warn(missing_docs)]
pub mod command;
pub mod connection;
pub mod error;
pub mod event;
pub mod net;
pub mod option_chain;
pub mod quote;
pub mod result;
pub mod symbols;

pub use command::Command;
pub use connection::ConnectionStatus;
pub use error::FeedError;
pub use event::FeedEvent;
pub use option_chain::{OptionChainSnapshot, OptionLeg, StrikeRow};
pub use quote::{Quote, QuoteResponse};
pub use result::Result;
