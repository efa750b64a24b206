//! Latest-quote board answering snapshot requests.

use std::collections::HashMap;
use std::sync::{PoisonError, RwLock};

use market_common::{Quote, QuoteResponse};

/// Most recent quote the generator produced for each symbol.
#[derive(Debug, Default)]
pub struct QuoteBoard {
    quotes: RwLock<HashMap<String, Quote>>,
}

impl QuoteBoard {
    /// Create an empty board.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record `quote` as the latest for its symbol.
    pub fn update(&self, quote: &Quote) {
        self.quotes
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(quote.symbol.clone(), quote.clone());
    }

    /// Snapshot envelope for `symbol`.
    pub fn snapshot(&self, symbol: &str) -> QuoteResponse {
        let quotes = self.quotes.read().unwrap_or_else(PoisonError::into_inner);
        match quotes.get(&symbol.to_ascii_uppercase()) {
            Some(quote) => QuoteResponse::Success { data: quote.clone() },
            None => QuoteResponse::Error {
                message: format!("no data for {}", symbol),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn snapshot_returns_latest_or_error() {
        let board = QuoteBoard::new();
        assert!(matches!(board.snapshot("AAPL"), QuoteResponse::Error { .. }));

        board.update(&Quote::from_prices("AAPL", 1.0, 1.0, 1.0, 1.0, 1.0, 1, "FEED"));
        board.update(&Quote::from_prices("AAPL", 2.0, 1.0, 2.0, 1.0, 1.0, 2, "FEED"));
        match board.snapshot("aapl") {
            QuoteResponse::Success { data } => assert_eq!(data.last_price, 2.0),
            other => panic!("expected success, got {:?}", other),
        }
    }
}
