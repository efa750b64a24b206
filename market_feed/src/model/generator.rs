//! Quote and option-chain generator with event broadcasting.
//!
//! The generator runs a background thread that walks a price for every configured
//! symbol and underlying, publishes a `Quote` for each on every tick and, every few
//! ticks, an `OptionChainSnapshot` for each underlying. Events go to all subscribed
//! client streams through `crossbeam_channel`. New streams register by sending a
//! `Sender<MarketEvent>` to the channel returned by `FeedGenerator::start`.
//!
//! Design notes:
//! - Prices follow a small random walk, so every client observes the same sequence.
//! - Each instrument keeps its session open/high/low and the previous close, so
//!   quotes carry a consistent `change`.
//! - Broadcast is best-effort: a client whose channel is closed is dropped.

use std::collections::HashMap;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, unbounded};
use log::{debug, info};
use market_common::quote::now_millis;
use market_common::{FeedEvent, OptionChainSnapshot, OptionLeg, Quote, StrikeRow};
use rand::Rng;

use crate::model::board::QuoteBoard;

/// Provenance tag stamped on generated quotes.
pub const SOURCE: &str = "MOCK_FEED";
/// Strikes generated on each side of the at-the-money strike.
const STRIKES_PER_SIDE: i32 = 5;

/// Message sent by the generator to its subscribers.
#[derive(Debug, Clone)]
pub enum MarketEvent {
    /// Quote or option chain to forward.
    Feed(FeedEvent),
    /// Global shutdown notification for all consumers.
    Shutdown,
}

/// Generator settings.
#[derive(Debug, Clone)]
pub struct GeneratorConfig {
    /// Symbols quoted every tick.
    pub symbols: Vec<String>,
    /// Underlyings that also get option chains.
    pub underlyings: Vec<String>,
    /// Time between ticks.
    pub tick: Duration,
    /// Publish chains every this many ticks.
    pub chain_every: u32,
}

/// Per-instrument session state.
#[derive(Debug, Clone, PartialEq)]
pub struct Instrument {
    previous_close: f64,
    open: f64,
    high: f64,
    low: f64,
    last: f64,
}

impl Instrument {
    /// Start a session at `price`.
    pub fn new(price: f64) -> Self {
        Self {
            previous_close: price,
            open: price,
            high: price,
            low: price,
            last: price,
        }
    }

    /// Advance the walk one step.
    pub fn step(&mut self) {
        self.last = next_price(self.last);
        self.high = self.high.max(self.last);
        self.low = self.low.min(self.last);
    }

    /// Last price.
    pub fn last(&self) -> f64 {
        self.last
    }

    /// Quote for the current state.
    pub fn quote(&self, symbol: &str, timestamp: u64) -> Quote {
        Quote::from_prices(
            symbol,
            self.last,
            self.open,
            self.high,
            self.low,
            self.previous_close,
            timestamp,
            SOURCE,
        )
    }
}

/// Calculate the next synthetic price using a small random walk around `current_price`.
///
/// The change is sampled uniformly from `[-1%, +1%)` and the result is clamped to a
/// minimum positive value to avoid zero/negative prices.
pub fn next_price(current_price: f64) -> f64 {
    let mut rng = rand::rng();
    let change: f64 = rng.random_range(-0.01..0.01);
    let new_price = current_price * (1.0 + change);
    new_price.max(0.01)
}

/// Strike spacing used around `spot`.
fn strike_step(spot: f64) -> f64 {
    if spot >= 50.0 { 5.0 } else { 1.0 }
}

/// Build a strike ladder centred on `spot`.
///
/// Call and put prices are intrinsic value plus a time value that decays away from
/// the money; open interest is random.
pub fn build_chain(underlying: &str, spot: f64, timestamp: u64) -> OptionChainSnapshot {
    let mut rng = rand::rng();
    let step = strike_step(spot);
    let atm = (spot / step).round() * step;

    let rows = (-STRIKES_PER_SIDE..=STRIKES_PER_SIDE)
        .map(|i| atm + f64::from(i) * step)
        .filter(|strike| *strike > 0.0)
        .map(|strike| {
            let time_value = spot * 0.01 / (1.0 + (spot - strike).abs() / step);
            StrikeRow {
                strike,
                call: OptionLeg {
                    last_price: (spot - strike).max(0.0) + time_value,
                    open_interest: rng.random_range(100..5000),
                },
                put: OptionLeg {
                    last_price: (strike - spot).max(0.0) + time_value,
                    open_interest: rng.random_range(100..5000),
                },
            }
        })
        .collect();
    OptionChainSnapshot::new(underlying, rows, timestamp)
}

/// Background market data generator that broadcasts to subscribers.
pub struct FeedGenerator;

impl FeedGenerator {
    /// Start the generator thread.
    ///
    /// Returns a channel for registering subscribers and the thread handle. The
    /// generator pushes every event to all registered channels until `stop_rx`
    /// receives a message or is closed, then broadcasts `MarketEvent::Shutdown`.
    pub fn start(
        config: GeneratorConfig,
        board: Arc<QuoteBoard>,
        stop_rx: Receiver<()>,
    ) -> (Sender<Sender<MarketEvent>>, JoinHandle<()>) {
        let (subscribe_tx, subscribe_rx) = unbounded::<Sender<MarketEvent>>();

        let handle = thread::spawn(move || {
            let mut clients: Vec<Sender<MarketEvent>> = Vec::new();
            let mut rng = rand::rng();

            let mut names: Vec<String> = config.symbols.clone();
            for underlying in &config.underlyings {
                if !names.contains(underlying) {
                    names.push(underlying.clone());
                }
            }
            let mut instruments: HashMap<String, Instrument> = names
                .iter()
                .map(|name| (name.clone(), Instrument::new(rng.random_range(50.0..500.0))))
                .collect();

            info!(
                "Market generator started for {} instruments (Thread ID: {:?})",
                names.len(),
                thread::current().id()
            );

            let mut ticks: u64 = 0;
            loop {
                while let Ok(new_client_tx) = subscribe_rx.try_recv() {
                    clients.push(new_client_tx);
                    info!("Generator: New client added. Total clients: {}", clients.len());
                }

                let timestamp = now_millis();
                for name in &names {
                    let Some(instrument) = instruments.get_mut(name) else {
                        continue;
                    };
                    instrument.step();
                    let quote = instrument.quote(name, timestamp);
                    board.update(&quote);
                    let event = MarketEvent::Feed(FeedEvent::Quote(quote));
                    clients.retain(|client_tx| client_tx.send(event.clone()).is_ok());
                }

                if config.chain_every > 0 && ticks % u64::from(config.chain_every) == 0 {
                    for underlying in &config.underlyings {
                        if let Some(instrument) = instruments.get(underlying) {
                            let chain = build_chain(underlying, instrument.last(), timestamp);
                            debug!("Generated chain for {} ({} strikes)", underlying, chain.len());
                            let event = MarketEvent::Feed(FeedEvent::OptionChain(chain));
                            clients.retain(|client_tx| client_tx.send(event.clone()).is_ok());
                        }
                    }
                }
                ticks += 1;

                match stop_rx.recv_timeout(config.tick) {
                    Err(RecvTimeoutError::Timeout) => continue,
                    Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
                }
            }

            for client_tx in &clients {
                let _ = client_tx.send(MarketEvent::Shutdown);
            }
            info!("Market generator stopped after {} ticks", ticks);
        });
        (subscribe_tx, handle)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn next_price_stays_within_one_percent() {
        for _ in 0..1000 {
            let next = next_price(100.0);
            assert!((99.0..=101.0).contains(&next));
        }
        assert!(next_price(0.001) >= 0.01);
    }

    #[test]
    fn instrument_tracks_range_and_change() {
        let mut instrument = Instrument::new(100.0);
        for _ in 0..50 {
            instrument.step();
        }
        let quote = instrument.quote("AAPL", 1);
        assert!(quote.low_price <= quote.last_price && quote.last_price <= quote.high_price);
        assert_eq!(quote.open_price, 100.0);
        assert_eq!(quote.previous_close, 100.0);
        assert!(quote.change_is_consistent());
        assert_eq!(quote.source, SOURCE);
    }

    #[test]
    fn chain_is_centred_and_ascending() {
        let chain = build_chain("SPY", 502.0, 9);
        assert_eq!(chain.len(), 11);
        let strikes: Vec<f64> = chain.strikes().iter().map(|r| r.strike).collect();
        assert_eq!(strikes.first(), Some(&475.0));
        assert_eq!(strikes.last(), Some(&525.0));
        let atm = chain.strike(500.0).unwrap();
        assert!(atm.call.last_price > 2.0);
        assert!(atm.put.last_price > 0.0);
    }

    #[test]
    fn low_spot_chain_skips_non_positive_strikes() {
        let chain = build_chain("PENNY", 2.0, 9);
        assert!(chain.strikes().iter().all(|r| r.strike > 0.0));
    }

    #[test]
    fn generator_broadcasts_and_stops() {
        let board = Arc::new(QuoteBoard::new());
        let (stop_tx, stop_rx) = unbounded();
        let (subscribe_tx, handle) = FeedGenerator::start(
            GeneratorConfig {
                symbols: vec!["AAPL".to_string()],
                underlyings: vec!["SPY".to_string()],
                tick: Duration::from_millis(10),
                chain_every: 1,
            },
            Arc::clone(&board),
            stop_rx,
        );
        let (client_tx, client_rx) = unbounded();
        subscribe_tx.send(client_tx).unwrap();

        let mut saw_quote = false;
        let mut saw_chain = false;
        while !(saw_quote && saw_chain) {
            match client_rx.recv_timeout(Duration::from_secs(5)).unwrap() {
                MarketEvent::Feed(FeedEvent::Quote(_)) => saw_quote = true,
                MarketEvent::Feed(FeedEvent::OptionChain(_)) => saw_chain = true,
                _ => {}
            }
        }

        stop_tx.send(()).unwrap();
        handle.join().unwrap();
        let tail: Vec<MarketEvent> = client_rx.try_iter().collect();
        assert!(matches!(tail.last(), Some(MarketEvent::Shutdown)));
        assert!(matches!(board.snapshot("AAPL"), market_common::QuoteResponse::Success { .. }));
    }
}
