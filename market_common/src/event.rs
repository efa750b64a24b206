//! Events carried by the push channel.
//!
//! Each UDP datagram from the feed server holds exactly one JSON-encoded `FeedEvent`.
//! Transports on the consuming side add their own `Status` events when the session
//! state changes.

use serde::{Deserialize, Serialize};

use crate::connection::ConnectionStatus;
use crate::option_chain::OptionChainSnapshot;
use crate::quote::Quote;
use crate::result::Result;

/// One message on the push channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "payload", rename_all = "snake_case")]
pub enum FeedEvent {
    /// New quote tick for a particular symbol.
    Quote(Quote),
    /// New strike ladder for an underlying.
    OptionChain(OptionChainSnapshot),
    /// Transport session transition.
    Status(ConnectionStatus),
}

impl FeedEvent {
    /// Symbol or underlying the event is keyed by; `None` for status changes.
    pub fn topic(&self) -> Option<&str> {
        match self {
            FeedEvent::Quote(quote) => Some(&quote.symbol),
            FeedEvent::OptionChain(chain) => Some(&chain.underlying_symbol),
            FeedEvent::Status(_) => None,
        }
    }

    /// Encode to JSON bytes for a datagram.
    pub fn to_json_bytes(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    /// Decode one datagram.
    pub fn from_json_slice(bytes: &[u8]) -> Result<Self> {
        Ok(serde_json::from_slice(bytes)?)
    }
}
