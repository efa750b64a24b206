//! Latest-quote store.
//!
//! `QuoteStore` maps a symbol to the most recent `Quote` applied for it. Two writers
//! feed it: bulk results from the polling fallback and single streamed updates from
//! the push channel. Reads never wait on a fetch; a symbol that was never written
//! reads as `None`.
//!
//! Writes are serialized behind an `RwLock`. Under the default
//! [`OrderingPolicy::ArrivalOrder`] the last write to arrive wins, whatever its
//! embedded timestamp. [`OrderingPolicy::RejectStale`] instead refuses a write whose
//! timestamp is strictly older than the stored one.

use std::collections::HashMap;
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use log::{debug, warn};
use market_common::Quote;

/// How conflicting writes for the same symbol are resolved.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum OrderingPolicy {
    /// Last write to arrive wins.
    #[default]
    ArrivalOrder,
    /// A write older than the stored quote (by `timestamp`) is dropped.
    RejectStale,
}

/// In-memory symbol -> latest quote map.
#[derive(Debug, Default)]
pub struct QuoteStore {
    quotes: RwLock<HashMap<String, Quote>>,
    policy: OrderingPolicy,
}

impl QuoteStore {
    /// Create an empty store using `policy` for conflicting writes.
    pub fn new(policy: OrderingPolicy) -> Self {
        Self {
            quotes: RwLock::new(HashMap::new()),
            policy,
        }
    }

    /// The policy this store was built with.
    pub fn policy(&self) -> OrderingPolicy {
        self.policy
    }

    /// Current quote for `symbol`, if one was ever applied.
    pub fn get_quote(&self, symbol: &str) -> Option<Quote> {
        self.read().get(symbol).cloned()
    }

    /// Merge a bulk fetch result.
    ///
    /// Every symbol present in `quotes` is overwritten (subject to the ordering
    /// policy); symbols absent from it are left untouched. Returns how many entries
    /// were written.
    pub fn apply_bulk_result(&self, quotes: HashMap<String, Quote>) -> usize {
        let mut map = self.write();
        let mut applied = 0;
        for (symbol, quote) in quotes {
            if Self::apply_one(&mut map, self.policy, symbol, quote) {
                applied += 1;
            }
        }
        applied
    }

    /// Overwrite one symbol with a streamed quote. Returns `false` when the ordering
    /// policy dropped it.
    pub fn apply_streamed_update(&self, quote: Quote) -> bool {
        let mut map = self.write();
        Self::apply_one(&mut map, self.policy, quote.symbol.clone(), quote)
    }

    /// Symbols that currently have a quote, sorted.
    pub fn symbols(&self) -> Vec<String> {
        let mut symbols: Vec<String> = self.read().keys().cloned().collect();
        symbols.sort();
        symbols
    }

    /// Copy of every entry.
    pub fn snapshot(&self) -> HashMap<String, Quote> {
        self.read().clone()
    }

    /// Number of populated symbols.
    pub fn len(&self) -> usize {
        self.read().len()
    }

    /// Whether nothing has been written yet.
    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    fn apply_one(
        map: &mut HashMap<String, Quote>,
        policy: OrderingPolicy,
        symbol: String,
        quote: Quote,
    ) -> bool {
        if !quote.change_is_consistent() {
            warn!(
                "Quote for {} reports change {} but last - previous close is {}",
                symbol,
                quote.change,
                quote.expected_change()
            );
        }
        if policy == OrderingPolicy::RejectStale {
            if let Some(current) = map.get(&symbol) {
                if quote.timestamp < current.timestamp {
                    debug!(
                        "Dropping stale quote for {} ({} < {})",
                        symbol, quote.timestamp, current.timestamp
                    );
                    return false;
                }
            }
        }
        map.insert(symbol, quote);
        true
    }

    // No user code runs under these locks, so a poisoned guard still holds a
    // consistent map.
    fn read(&self) -> RwLockReadGuard<'_, HashMap<String, Quote>> {
        self.quotes.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<String, Quote>> {
        self.quotes.write().unwrap_or_else(PoisonError::into_inner)
    }
}
