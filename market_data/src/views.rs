//! Pure helpers turning stored quotes into display values.

use std::collections::HashMap;

use chrono::{Datelike, Local, NaiveDateTime, Timelike, Weekday};
use market_common::Quote;
use serde::{Deserialize, Serialize};

use crate::hub::MarketDataHub;
use crate::store::QuoteStore;

/// First local hour the market counts as open.
pub const MARKET_OPEN_HOUR: u32 = 9;
/// First local hour the market counts as closed again.
pub const MARKET_CLOSE_HOUR: u32 = 16;

/// A position in the portfolio.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Holding {
    /// Instrument symbol.
    pub symbol: String,
    /// Units held.
    pub quantity: f64,
    /// Average cost per unit; the fallback price when no quote exists.
    pub avg_price: f64,
}

/// Read access to last prices.
pub trait PriceLookup {
    /// Last price for `symbol`, if quoted.
    fn last_price(&self, symbol: &str) -> Option<f64>;
}

impl PriceLookup for QuoteStore {
    fn last_price(&self, symbol: &str) -> Option<f64> {
        self.get_quote(symbol).map(|q| q.last_price)
    }
}

impl PriceLookup for MarketDataHub {
    fn last_price(&self, symbol: &str) -> Option<f64> {
        self.get_quote(symbol).map(|q| q.last_price)
    }
}

impl PriceLookup for HashMap<String, Quote> {
    fn last_price(&self, symbol: &str) -> Option<f64> {
        self.get(symbol).map(|q| q.last_price)
    }
}

/// Signed percent change, e.g. `"+0.06%"` or `"-0.05%"`.
///
/// The sign follows `change`; zero counts as positive.
pub fn format_change_display(change: f64, change_percent: f64) -> String {
    let sign = if change >= 0.0 { '+' } else { '-' };
    format!("{}{:.2}%", sign, change_percent.abs())
}

/// Price with two decimals.
pub fn format_price(value: f64) -> String {
    format!("{:.2}", value)
}

/// Sum of quantity times last price, falling back to the holding's average price
/// for symbols without a quote.
pub fn calculate_portfolio_value<P: PriceLookup + ?Sized>(holdings: &[Holding], prices: &P) -> f64 {
    holdings
        .iter()
        .map(|h| {
            let price = prices.last_price(&h.symbol).unwrap_or(h.avg_price);
            h.quantity * price
        })
        .sum()
}

/// Monday to Friday, local hour in `[9, 16)`.
///
/// No timezone conversion and no holiday calendar.
pub fn is_market_open(now: NaiveDateTime) -> bool {
    let weekday = !matches!(now.weekday(), Weekday::Sat | Weekday::Sun);
    weekday && (MARKET_OPEN_HOUR..MARKET_CLOSE_HOUR).contains(&now.hour())
}

/// [`is_market_open`] on the local clock.
pub fn is_market_open_now() -> bool {
    is_market_open(Local::now().naive_local())
}
