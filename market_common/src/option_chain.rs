//! Option chain snapshots: one underlying's strike ladder at a point in time.

use serde::{Deserialize, Serialize};

/// One side (call or put) of a strike row.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct OptionLeg {
    /// Last traded price of the contract.
    pub last_price: f64,
    /// Open interest in contracts.
    pub open_interest: u64,
}

/// Call and put legs quoted at a single strike.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct StrikeRow {
    /// Strike price.
    pub strike: f64,
    /// Call leg at this strike.
    pub call: OptionLeg,
    /// Put leg at this strike.
    pub put: OptionLeg,
}

/// Full strike ladder for one underlying.
///
/// Rows are kept in ascending strike order and strikes are unique, including for
/// snapshots decoded from the wire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(from = "RawOptionChain")]
pub struct OptionChainSnapshot {
    /// Underlying symbol this ladder belongs to.
    pub underlying_symbol: String,
    /// Strike rows, ascending by strike.
    strikes: Vec<StrikeRow>,
    /// UTC timestamp in milliseconds since Unix epoch.
    pub timestamp: u64,
}

/// Wire form of a snapshot, rows in whatever order the sender used.
#[derive(Deserialize)]
struct RawOptionChain {
    underlying_symbol: String,
    strikes: Vec<StrikeRow>,
    timestamp: u64,
}

impl From<RawOptionChain> for OptionChainSnapshot {
    fn from(raw: RawOptionChain) -> Self {
        OptionChainSnapshot::new(raw.underlying_symbol, raw.strikes, raw.timestamp)
    }
}

impl OptionChainSnapshot {
    /// Build a snapshot from rows in any order.
    ///
    /// Rows are sorted by strike. When the same strike appears more than once the row
    /// supplied last is kept.
    pub fn new(underlying_symbol: impl Into<String>, rows: Vec<StrikeRow>, timestamp: u64) -> Self {
        let mut strikes: Vec<StrikeRow> = Vec::with_capacity(rows.len());
        // Stable sort keeps input order among equal strikes, so the last one wins below.
        let mut rows = rows;
        rows.sort_by(|a, b| a.strike.total_cmp(&b.strike));
        for row in rows {
            match strikes.last_mut() {
                Some(last) if last.strike.total_cmp(&row.strike).is_eq() => *last = row,
                _ => strikes.push(row),
            }
        }
        OptionChainSnapshot {
            underlying_symbol: underlying_symbol.into(),
            strikes,
            timestamp,
        }
    }

    /// Strike rows in ascending strike order.
    pub fn strikes(&self) -> &[StrikeRow] {
        &self.strikes
    }

    /// Look up the row quoted at exactly `strike`.
    pub fn strike(&self, strike: f64) -> Option<&StrikeRow> {
        self.strikes
            .binary_search_by(|row| row.strike.total_cmp(&strike))
            .ok()
            .map(|idx| &self.strikes[idx])
    }

    /// Number of distinct strikes.
    pub fn len(&self) -> usize {
        self.strikes.len()
    }

    /// Whether the ladder has no strikes.
    pub fn is_empty(&self) -> bool {
        self.strikes.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(strike: f64, call_px: f64) -> StrikeRow {
        StrikeRow {
            strike,
            call: OptionLeg {
                last_price: call_px,
                open_interest: 10,
            },
            put: OptionLeg::default(),
        }
    }

    #[test]
    fn rows_are_sorted_ascending() {
        let rows = vec![row(110.0, 1.0), row(100.0, 5.0), row(105.0, 3.0)];
        let chain = OptionChainSnapshot::new("SPY", rows, 1);
        let strikes: Vec<f64> = chain.strikes().iter().map(|r| r.strike).collect();
        assert_eq!(strikes, vec![100.0, 105.0, 110.0]);
    }

    #[test]
    fn duplicate_strike_keeps_last_row() {
        let chain = OptionChainSnapshot::new("SPY", vec![row(100.0, 5.0), row(100.0, 6.0)], 1);
        assert_eq!(chain.len(), 1);
        assert_eq!(chain.strike(100.0).map(|r| r.call.last_price), Some(6.0));
    }

    #[test]
    fn unknown_strike_is_none() {
        let chain = OptionChainSnapshot::new("SPY", vec![row(100.0, 5.0)], 1);
        assert!(chain.strike(101.0).is_none());
    }

    #[test]
    fn decoded_chain_is_sorted_and_deduplicated() {
        let strike = |k: f64, call_px: f64| {
            serde_json::json!({
                "strike": k,
                "call": { "last_price": call_px, "open_interest": 5 },
                "put": { "last_price": 1.0, "open_interest": 5 },
            })
        };
        let raw = serde_json::json!({
            "underlying_symbol": "SPY",
            "strikes": [
                strike(510.0, 1.0),
                strike(500.0, 2.0),
                strike(500.0, 3.0),
                strike(490.0, 4.0),
            ],
            "timestamp": 7,
        });

        let chain: OptionChainSnapshot = serde_json::from_value(raw).unwrap();
        let strikes: Vec<f64> = chain.strikes().iter().map(|r| r.strike).collect();
        assert_eq!(strikes, vec![490.0, 500.0, 510.0]);
        assert_eq!(chain.strike(490.0).map(|r| r.call.last_price), Some(4.0));
        assert_eq!(chain.strike(500.0).map(|r| r.call.last_price), Some(3.0));
        assert_eq!(chain.timestamp, 7);
    }
}
