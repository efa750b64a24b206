//! Quote data model and JSON encoding helpers.
//!
//! A `Quote` is the last known market snapshot for one instrument. It travels as a
//! JSON payload in both directions: inside `FeedEvent` datagrams on the push channel
//! and inside `QuoteResponse` envelopes answered to snapshot requests.

use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::error::FeedError;
use crate::result::Result;

/// Absolute tolerance used when checking `change == last_price - previous_close`.
pub const CHANGE_TOLERANCE: f64 = 1e-6;

/// Market quote for a single symbol.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Quote {
    /// Symbol identifier, unique key in the quote store.
    pub symbol: String,
    /// Last traded price.
    pub last_price: f64,
    /// Absolute change against the previous close.
    pub change: f64,
    /// Relative change against the previous close, in percent.
    pub change_percent: f64,
    /// Session open.
    pub open_price: f64,
    /// Session high.
    pub high_price: f64,
    /// Session low.
    pub low_price: f64,
    /// Close of the previous session.
    pub previous_close: f64,
    /// UTC timestamp in milliseconds since Unix epoch.
    pub timestamp: u64,
    /// Provenance tag of the upstream that produced the snapshot.
    pub source: String,
}

impl Quote {
    /// Build a quote from raw prices, deriving `change` and `change_percent` from
    /// `last_price` and `previous_close`.
    ///
    /// A zero previous close yields a zero percent change rather than infinity.
    #[allow(clippy::too_many_arguments)]
    pub fn from_prices(
        symbol: impl Into<String>,
        last_price: f64,
        open_price: f64,
        high_price: f64,
        low_price: f64,
        previous_close: f64,
        timestamp: u64,
        source: impl Into<String>,
    ) -> Self {
        let change = last_price - previous_close;
        let change_percent = if previous_close == 0.0 {
            0.0
        } else {
            change / previous_close * 100.0
        };
        Quote {
            symbol: symbol.into(),
            last_price,
            change,
            change_percent,
            open_price,
            high_price,
            low_price,
            previous_close,
            timestamp,
            source: source.into(),
        }
    }

    /// The change implied by the prices, `last_price - previous_close`.
    pub fn expected_change(&self) -> f64 {
        self.last_price - self.previous_close
    }

    /// Whether the reported `change` agrees with the prices.
    ///
    /// Upstream data is not trusted to honour this, so consumers check it on write.
    pub fn change_is_consistent(&self) -> bool {
        (self.change - self.expected_change()).abs() <= CHANGE_TOLERANCE
    }

    /// Encode the quote to JSON bytes.
    pub fn to_json_bytes(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }
}

/// Current wall-clock time in milliseconds since the Unix epoch.
pub fn now_millis() -> u64 {
    Utc::now().timestamp_millis().max(0) as u64
}

/// Discriminated answer to a single-symbol snapshot request.
///
/// On the wire this is `{"status":"success","data":{...}}` or
/// `{"status":"error","message":"..."}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum QuoteResponse {
    /// The upstream had data for the symbol.
    Success {
        /// The quote snapshot.
        data: Quote,
    },
    /// The upstream refused or had nothing to return.
    Error {
        /// Human-readable reason.
        message: String,
    },
}

impl QuoteResponse {
    /// Collapse the envelope into a `Result`, tagging errors with `symbol`.
    pub fn into_result(self, symbol: &str) -> Result<Quote> {
        match self {
            QuoteResponse::Success { data } => Ok(data),
            QuoteResponse::Error { message } => Err(FeedError::Upstream {
                symbol: symbol.to_string(),
                message,
            }),
        }
    }
}
