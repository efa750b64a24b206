//! Subscription registry: fans quote, option-chain and connection-status updates out
//! to any number of callbacks.
//!
//! The registry owns every subscription record. A subscriber only receives a
//! [`Subscription`] handle whose `unsubscribe` removes the record; calling it twice is
//! harmless and dropping the handle unsubscribes as well.
//!
//! Dispatch rules:
//! - The callback list for a topic is copied out of the lock before any callback runs,
//!   so callbacks may subscribe and unsubscribe freely, including themselves.
//! - A callback added during a dispatch does not see the event being dispatched.
//! - A callback removed during a dispatch is not invoked for the rest of it.
//! - A panicking callback is logged and skipped; delivery continues with the next one.

use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use log::{debug, error};
use market_common::{ConnectionStatus, OptionChainSnapshot, Quote};

/// Identifier of one registration, unique for the registry's lifetime.
pub type SubscriptionId = u64;

type Callback<E> = Arc<dyn Fn(&E) + Send + Sync>;

/// What a subscription listens to.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Topic {
    /// Quotes for one symbol.
    Quote(String),
    /// Option chains for one underlying.
    OptionChain(String),
    /// Connection status transitions.
    ConnectionStatus,
}

impl fmt::Display for Topic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Topic::Quote(symbol) => write!(f, "quote:{}", symbol),
            Topic::OptionChain(underlying) => write!(f, "chain:{}", underlying),
            Topic::ConnectionStatus => write!(f, "status"),
        }
    }
}

/// Keyed callback lists with O(1) removal by id.
struct Listeners<E> {
    by_key: HashMap<String, HashMap<SubscriptionId, Callback<E>>>,
}

impl<E> Listeners<E> {
    fn new() -> Self {
        Self {
            by_key: HashMap::new(),
        }
    }

    fn insert(&mut self, key: String, id: SubscriptionId, callback: Callback<E>) {
        self.by_key.entry(key).or_default().insert(id, callback);
    }

    /// Returns the removed callback. It must be dropped after the lock is released,
    /// since it may own `Subscription`s whose drop locks this map again.
    fn remove(&mut self, key: &str, id: SubscriptionId) -> Option<Callback<E>> {
        let callbacks = self.by_key.get_mut(key)?;
        let removed = callbacks.remove(&id);
        if callbacks.is_empty() {
            self.by_key.remove(key);
        }
        removed
    }

    fn contains(&self, key: &str, id: SubscriptionId) -> bool {
        self.by_key
            .get(key)
            .is_some_and(|callbacks| callbacks.contains_key(&id))
    }

    fn snapshot(&self, key: &str) -> Vec<(SubscriptionId, Callback<E>)> {
        let mut targets: Vec<(SubscriptionId, Callback<E>)> = self
            .by_key
            .get(key)
            .map(|callbacks| {
                callbacks
                    .iter()
                    .map(|(id, cb)| (*id, Arc::clone(cb)))
                    .collect()
            })
            .unwrap_or_default();
        // Registration order.
        targets.sort_by_key(|(id, _)| *id);
        targets
    }

    fn count(&self, key: &str) -> usize {
        self.by_key.get(key).map_or(0, HashMap::len)
    }
}

struct StatusState {
    current: ConnectionStatus,
    listeners: Listeners<ConnectionStatus>,
}

/// Status listeners live under one fixed key.
const STATUS_KEY: &str = "";

struct Inner {
    next_id: AtomicU64,
    quotes: Mutex<Listeners<Quote>>,
    chains: Mutex<Listeners<OptionChainSnapshot>>,
    status: Mutex<StatusState>,
}

impl Inner {
    fn remove(&self, topic: &Topic, id: SubscriptionId) -> bool {
        // Each guard is released at the end of its arm, before the callback drops.
        match topic {
            Topic::Quote(symbol) => {
                let removed = lock(&self.quotes).remove(symbol, id);
                removed.is_some()
            }
            Topic::OptionChain(underlying) => {
                let removed = lock(&self.chains).remove(underlying, id);
                removed.is_some()
            }
            Topic::ConnectionStatus => {
                let removed = lock(&self.status).listeners.remove(STATUS_KEY, id);
                removed.is_some()
            }
        }
    }

    fn is_registered(&self, topic: &Topic, id: SubscriptionId) -> bool {
        match topic {
            Topic::Quote(symbol) => lock(&self.quotes).contains(symbol, id),
            Topic::OptionChain(underlying) => lock(&self.chains).contains(underlying, id),
            Topic::ConnectionStatus => lock(&self.status).listeners.contains(STATUS_KEY, id),
        }
    }
}

/// Handle returned by every `subscribe_*` call.
///
/// Holds only a weak reference to the registry, so an outstanding handle never keeps
/// the registry alive.
#[must_use = "dropping a Subscription unsubscribes it"]
pub struct Subscription {
    registry: Weak<Inner>,
    topic: Topic,
    id: SubscriptionId,
    active: AtomicBool,
}

impl Subscription {
    /// Remove the registration. Safe to call any number of times.
    pub fn unsubscribe(&self) {
        if !self.active.swap(false, Ordering::AcqRel) {
            return;
        }
        if let Some(inner) = self.registry.upgrade() {
            if inner.remove(&self.topic, self.id) {
                debug!("Unsubscribed #{} from {}", self.id, self.topic);
            }
        }
    }

    /// Whether `unsubscribe` has not been called yet.
    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }

}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.unsubscribe();
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("topic", &self.topic)
            .field("id", &self.id)
            .field("active", &self.is_active())
            .finish()
    }
}

/// Shared registry of quote, option-chain and status subscribers.
///
/// Cloning is cheap and every clone refers to the same registrations.
#[derive(Clone)]
pub struct SubscriptionRegistry {
    inner: Arc<Inner>,
}

impl Default for SubscriptionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl SubscriptionRegistry {
    /// Create an empty registry with status `Disconnected`.
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Inner {
                next_id: AtomicU64::new(1),
                quotes: Mutex::new(Listeners::new()),
                chains: Mutex::new(Listeners::new()),
                status: Mutex::new(StatusState {
                    current: ConnectionStatus::Disconnected,
                    listeners: Listeners::new(),
                }),
            }),
        }
    }

    /// Invoke `callback` for every future quote published for `symbol`.
    pub fn subscribe_to_quote<F>(&self, symbol: &str, callback: F) -> Subscription
    where
        F: Fn(&Quote) + Send + Sync + 'static,
    {
        let id = self.next_id();
        lock(&self.inner.quotes).insert(symbol.to_string(), id, Arc::new(callback));
        self.handle(Topic::Quote(symbol.to_string()), id)
    }

    /// Invoke `callback` for every future option chain published for `underlying`.
    pub fn subscribe_to_option_chain<F>(&self, underlying: &str, callback: F) -> Subscription
    where
        F: Fn(&OptionChainSnapshot) + Send + Sync + 'static,
    {
        let id = self.next_id();
        lock(&self.inner.chains).insert(underlying.to_string(), id, Arc::new(callback));
        self.handle(Topic::OptionChain(underlying.to_string()), id)
    }

    /// Invoke `callback` with the new status on every future transition.
    pub fn subscribe_to_connection_status<F>(&self, callback: F) -> Subscription
    where
        F: Fn(ConnectionStatus) + Send + Sync + 'static,
    {
        let id = self.next_id();
        let callback: Callback<ConnectionStatus> =
            Arc::new(move |status: &ConnectionStatus| callback(*status));
        lock(&self.inner.status)
            .listeners
            .insert(STATUS_KEY.to_string(), id, callback);
        self.handle(Topic::ConnectionStatus, id)
    }

    /// Deliver `quote` to its symbol's subscribers. Returns how many callbacks
    /// completed without panicking.
    pub fn publish_quote(&self, quote: &Quote) -> usize {
        let targets = lock(&self.inner.quotes).snapshot(&quote.symbol);
        self.dispatch(Topic::Quote(quote.symbol.clone()), targets, quote)
    }

    /// Deliver `chain` to its underlying's subscribers.
    pub fn publish_option_chain(&self, chain: &OptionChainSnapshot) -> usize {
        let targets = lock(&self.inner.chains).snapshot(&chain.underlying_symbol);
        self.dispatch(
            Topic::OptionChain(chain.underlying_symbol.clone()),
            targets,
            chain,
        )
    }

    /// Record a status transition and notify status subscribers.
    ///
    /// Repeating the current status is not a transition: nothing is delivered and
    /// `false` is returned.
    pub fn publish_status(&self, status: ConnectionStatus) -> bool {
        let targets = {
            let mut state = lock(&self.inner.status);
            if state.current == status {
                return false;
            }
            debug!("Connection status {} -> {}", state.current, status);
            state.current = status;
            state.listeners.snapshot(STATUS_KEY)
        };
        self.dispatch(Topic::ConnectionStatus, targets, &status);
        true
    }

    /// Last published connection status.
    pub fn connection_status(&self) -> ConnectionStatus {
        lock(&self.inner.status).current
    }

    /// Number of live subscriptions on `topic`.
    pub fn subscriber_count(&self, topic: &Topic) -> usize {
        match topic {
            Topic::Quote(symbol) => lock(&self.inner.quotes).count(symbol),
            Topic::OptionChain(underlying) => lock(&self.inner.chains).count(underlying),
            Topic::ConnectionStatus => lock(&self.inner.status).listeners.count(STATUS_KEY),
        }
    }

    fn next_id(&self) -> SubscriptionId {
        self.inner.next_id.fetch_add(1, Ordering::Relaxed)
    }

    fn handle(&self, topic: Topic, id: SubscriptionId) -> Subscription {
        debug!("Subscribed #{} to {}", id, topic);
        Subscription {
            registry: Arc::downgrade(&self.inner),
            topic,
            id,
            active: AtomicBool::new(true),
        }
    }

    fn dispatch<E>(
        &self,
        topic: Topic,
        targets: Vec<(SubscriptionId, Callback<E>)>,
        event: &E,
    ) -> usize {
        let mut delivered = 0;
        for (id, callback) in targets {
            if !self.inner.is_registered(&topic, id) {
                continue;
            }
            match panic::catch_unwind(AssertUnwindSafe(|| callback(event))) {
                Ok(()) => delivered += 1,
                Err(payload) => error!(
                    "Subscriber #{} on {} panicked: {}",
                    id,
                    topic,
                    panic_message(payload.as_ref())
                ),
            }
        }
        delivered
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(msg) = payload.downcast_ref::<&'static str>() {
        msg
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        msg.as_str()
    } else {
        "non-string panic payload"
    }
}

// Callbacks never run while a registry lock is held, so poisoning cannot leave a
// half-updated map behind.
fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
