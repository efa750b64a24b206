//! The market data context object.
//!
//! A `MarketDataHub` is built once at start-up and shared by `Arc` with every
//! consumer. It owns the quote store, the latest option chain per underlying, the
//! subscription registry and the push transport, plus a pump thread that applies
//! queued `FeedEvent`s in arrival order.
//!
//! Stream events go transport -> `FeedSink` -> pump -> store/registry. The polling
//! fallback writes through [`QuoteTarget::apply_bulk_result`]; bulk merges do not
//! notify quote subscribers.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::{Receiver, Sender, select, unbounded};
use log::{debug, error, info, warn};
use market_common::{ConnectionStatus, FeedError, FeedEvent, OptionChainSnapshot, Quote, Result};

use crate::registry::{Subscription, SubscriptionRegistry};
use crate::store::{OrderingPolicy, QuoteStore};
use crate::transport::{FeedSink, StreamTransport};

/// Bounded retry for [`MarketDataHub::reconnect`].
///
/// Fixed delay, no jitter, no growth.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconnectPolicy {
    /// Connection attempts per `reconnect` call; `0` behaves like `1`.
    pub max_attempts: u32,
    /// Pause between failed attempts.
    pub delay: Duration,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 1,
            delay: Duration::from_secs(1),
        }
    }
}

/// Hub settings.
#[derive(Debug, Clone, Copy, Default)]
pub struct HubConfig {
    /// Conflict rule for quote and option-chain writes.
    pub ordering: OrderingPolicy,
    /// Retry rule for `reconnect`.
    pub reconnect: ReconnectPolicy,
}

/// Anything the polling fallback can merge bulk results into.
pub trait QuoteTarget: Send + Sync {
    /// Merge `quotes`, returning how many entries were written.
    fn apply_bulk_result(&self, quotes: HashMap<String, Quote>) -> usize;
}

impl QuoteTarget for QuoteStore {
    fn apply_bulk_result(&self, quotes: HashMap<String, Quote>) -> usize {
        QuoteStore::apply_bulk_result(self, quotes)
    }
}

/// State shared between the hub and its pump thread.
struct Shared {
    store: QuoteStore,
    chains: RwLock<HashMap<String, OptionChainSnapshot>>,
    registry: SubscriptionRegistry,
}

impl Shared {
    fn apply_streamed_update(&self, quote: Quote) -> bool {
        let applied = self.store.apply_streamed_update(quote.clone());
        if applied {
            self.registry.publish_quote(&quote);
        }
        applied
    }

    fn apply_option_chain(&self, chain: OptionChainSnapshot) -> bool {
        {
            let mut chains = self.chains.write().unwrap_or_else(PoisonError::into_inner);
            if self.store.policy() == OrderingPolicy::RejectStale {
                if let Some(current) = chains.get(&chain.underlying_symbol) {
                    if chain.timestamp < current.timestamp {
                        debug!("Dropping stale option chain for {}", chain.underlying_symbol);
                        return false;
                    }
                }
            }
            chains.insert(chain.underlying_symbol.clone(), chain.clone());
        }
        self.registry.publish_option_chain(&chain);
        true
    }

    fn apply_event(&self, event: FeedEvent) {
        match event {
            FeedEvent::Quote(quote) => {
                self.apply_streamed_update(quote);
            }
            FeedEvent::OptionChain(chain) => {
                self.apply_option_chain(chain);
            }
            FeedEvent::Status(status) => {
                self.registry.publish_status(status);
            }
        }
    }
}

fn pump_loop(shared: Arc<Shared>, events_rx: Receiver<FeedEvent>, stop_rx: Receiver<()>) {
    loop {
        select! {
            recv(stop_rx) -> _ => break,
            recv(events_rx) -> msg => match msg {
                Ok(event) => shared.apply_event(event),
                Err(_) => break,
            },
        }
    }
    debug!("Event pump stopped");
}

/// Process-wide market data context.
pub struct MarketDataHub {
    shared: Arc<Shared>,
    transport: Box<dyn StreamTransport>,
    events_tx: Sender<FeedEvent>,
    stop_tx: Sender<()>,
    pump: Mutex<Option<JoinHandle<()>>>,
    reconnecting: AtomicBool,
    config: HubConfig,
}

impl MarketDataHub {
    /// Build the hub and start its event pump. The transport stays closed until
    /// [`reconnect`](Self::reconnect) is called.
    pub fn new(config: HubConfig, transport: Box<dyn StreamTransport>) -> Arc<Self> {
        let shared = Arc::new(Shared {
            store: QuoteStore::new(config.ordering),
            chains: RwLock::new(HashMap::new()),
            registry: SubscriptionRegistry::new(),
        });
        let (events_tx, events_rx) = unbounded::<FeedEvent>();
        let (stop_tx, stop_rx) = unbounded::<()>();

        let pump = {
            let shared = Arc::clone(&shared);
            thread::spawn(move || pump_loop(shared, events_rx, stop_rx))
        };

        Arc::new(Self {
            shared,
            transport,
            events_tx,
            stop_tx,
            pump: Mutex::new(Some(pump)),
            reconnecting: AtomicBool::new(false),
            config,
        })
    }

    /// Sink feeding this hub's event pump.
    pub fn sink(&self) -> FeedSink {
        FeedSink::new(self.events_tx.clone())
    }

    /// The underlying quote store.
    pub fn store(&self) -> &QuoteStore {
        &self.shared.store
    }

    /// The underlying registry.
    pub fn registry(&self) -> &SubscriptionRegistry {
        &self.shared.registry
    }

    /// Current quote for `symbol`.
    pub fn get_quote(&self, symbol: &str) -> Option<Quote> {
        self.shared.store.get_quote(symbol)
    }

    /// Merge a bulk fetch result into the store.
    pub fn apply_bulk_result(&self, quotes: HashMap<String, Quote>) -> usize {
        self.shared.store.apply_bulk_result(quotes)
    }

    /// Write one streamed quote and notify its subscribers. Returns `false` when the
    /// ordering policy dropped it, in which case nobody is notified.
    pub fn apply_streamed_update(&self, quote: Quote) -> bool {
        self.shared.apply_streamed_update(quote)
    }

    /// Replace the option chain for its underlying and notify subscribers.
    pub fn apply_option_chain(&self, chain: OptionChainSnapshot) -> bool {
        self.shared.apply_option_chain(chain)
    }

    /// Latest option chain for `underlying`.
    pub fn option_chain(&self, underlying: &str) -> Option<OptionChainSnapshot> {
        self.shared
            .chains
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(underlying)
            .cloned()
    }

    /// See [`SubscriptionRegistry::subscribe_to_quote`].
    pub fn subscribe_to_quote<F>(&self, symbol: &str, callback: F) -> Subscription
    where
        F: Fn(&Quote) + Send + Sync + 'static,
    {
        self.shared.registry.subscribe_to_quote(symbol, callback)
    }

    /// See [`SubscriptionRegistry::subscribe_to_option_chain`].
    pub fn subscribe_to_option_chain<F>(&self, underlying: &str, callback: F) -> Subscription
    where
        F: Fn(&OptionChainSnapshot) + Send + Sync + 'static,
    {
        self.shared.registry.subscribe_to_option_chain(underlying, callback)
    }

    /// See [`SubscriptionRegistry::subscribe_to_connection_status`].
    pub fn subscribe_to_connection_status<F>(&self, callback: F) -> Subscription
    where
        F: Fn(ConnectionStatus) + Send + Sync + 'static,
    {
        self.shared.registry.subscribe_to_connection_status(callback)
    }

    /// Run `on_loss` for every `Connected -> Error` transition.
    ///
    /// Failed connect attempts (`Connecting -> Error`) are not reported, so a
    /// `reconnect` that gives up never schedules another one.
    pub fn subscribe_to_session_loss<F>(&self, on_loss: F) -> Subscription
    where
        F: Fn() + Send + Sync + 'static,
    {
        let previous = Mutex::new(self.connection_status());
        self.shared.registry.subscribe_to_connection_status(move |status| {
            let was_connected = {
                let mut previous = previous.lock().unwrap_or_else(PoisonError::into_inner);
                std::mem::replace(&mut *previous, status).is_connected()
            };
            if was_connected && status == ConnectionStatus::Error {
                on_loss();
            }
        })
    }

    /// Last status reported by the transport.
    pub fn connection_status(&self) -> ConnectionStatus {
        self.shared.registry.connection_status()
    }

    /// Ask the transport to (re)open its session.
    ///
    /// Does nothing when already connected, or while another `reconnect` is running.
    /// Otherwise tries up to `max_attempts` times, sleeping `delay` between failures,
    /// and returns the last error if none succeeded.
    pub fn reconnect(&self) -> Result<()> {
        if self.connection_status().is_connected() {
            debug!("Reconnect requested while connected; nothing to do");
            return Ok(());
        }
        if self.reconnecting.swap(true, Ordering::AcqRel) {
            debug!("Reconnect already in progress");
            return Ok(());
        }
        let result = self.connect_with_retry();
        self.reconnecting.store(false, Ordering::Release);
        result
    }

    fn connect_with_retry(&self) -> Result<()> {
        let policy = self.config.reconnect;
        let attempts = policy.max_attempts.max(1);
        let mut last_err = None;

        for attempt in 1..=attempts {
            match self.transport.connect(self.sink()) {
                Ok(()) => {
                    info!("Stream connected (attempt {}/{})", attempt, attempts);
                    return Ok(());
                }
                Err(e) => {
                    warn!("Connect attempt {}/{} failed: {}", attempt, attempts, e);
                    last_err = Some(e);
                    if attempt < attempts {
                        thread::sleep(policy.delay);
                    }
                }
            }
        }
        Err(last_err
            .unwrap_or_else(|| FeedError::Connection("no connect attempt made".to_string())))
    }

    /// Close the transport, stop the pump and report `Disconnected`. Idempotent.
    pub fn shutdown(&self) {
        let pump = self.pump.lock().unwrap_or_else(PoisonError::into_inner).take();
        let Some(pump) = pump else {
            return;
        };
        self.transport.disconnect();
        let _ = self.stop_tx.send(());
        if pump.join().is_err() {
            error!("Event pump panicked");
        }
        self.shared.registry.publish_status(ConnectionStatus::Disconnected);
        info!("Market data hub shut down");
    }
}

impl QuoteTarget for MarketDataHub {
    fn apply_bulk_result(&self, quotes: HashMap<String, Quote>) -> usize {
        MarketDataHub::apply_bulk_result(self, quotes)
    }
}

impl Drop for MarketDataHub {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::NullTransport;
    use market_common::{OptionLeg, StrikeRow};

    fn chain(underlying: &str, ts: u64) -> OptionChainSnapshot {
        OptionChainSnapshot::new(
            underlying,
            vec![StrikeRow {
                strike: 100.0,
                call: OptionLeg::default(),
                put: OptionLeg::default(),
            }],
            ts,
        )
    }

    #[test]
    fn option_chain_is_cached_per_underlying() {
        let hub = MarketDataHub::new(HubConfig::default(), Box::new(NullTransport));
        assert!(hub.option_chain("SPY").is_none());
        assert!(hub.apply_option_chain(chain("SPY", 1)));
        assert_eq!(hub.option_chain("SPY").map(|c| c.len()), Some(1));
        assert!(hub.option_chain("QQQ").is_none());
    }

    #[test]
    fn reject_stale_applies_to_chains() {
        let config = HubConfig {
            ordering: OrderingPolicy::RejectStale,
            ..HubConfig::default()
        };
        let hub = MarketDataHub::new(config, Box::new(NullTransport));
        assert!(hub.apply_option_chain(chain("SPY", 10)));
        assert!(!hub.apply_option_chain(chain("SPY", 9)));
        assert_eq!(hub.option_chain("SPY").map(|c| c.timestamp), Some(10));
    }

    #[test]
    fn reconnect_without_push_channel_fails_after_all_attempts() {
        let config = HubConfig {
            reconnect: ReconnectPolicy {
                max_attempts: 2,
                delay: Duration::from_millis(1),
            },
            ..HubConfig::default()
        };
        let hub = MarketDataHub::new(config, Box::new(NullTransport));
        assert!(matches!(hub.reconnect(), Err(FeedError::Connection(_))));
    }

    #[test]
    fn shutdown_is_idempotent() {
        let hub = MarketDataHub::new(HubConfig::default(), Box::new(NullTransport));
        hub.shutdown();
        hub.shutdown();
        assert_eq!(hub.connection_status(), ConnectionStatus::Disconnected);
    }
}
