//! Keep-alive tracker for streaming clients.
//!
//! Tracks the last time each client (identified by the `SocketAddr` its datagrams
//! come from) proved it was alive. A client is registered when its stream opens, so
//! one that never pings still times out.
//!
//! - `PingMonitor::register(addr)` — start tracking a client as of now.
//! - `PingMonitor::update_ping(addr)` — record a fresh ping; unknown senders are ignored.
//! - `PingMonitor::check_timeouts(now)` — remove and return every client silent for
//!   longer than the timeout.
//!
//! Time is measured with `std::time::Instant`. The monitor is not synchronized; the
//! server shares it behind a `Mutex`.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::time::{Duration, Instant};

/// Tracks client keep-alive pings and determines inactivity based on a timeout.
pub struct PingMonitor {
    /// Last ping time of every tracked client.
    clients: HashMap<SocketAddr, Instant>,
    /// Threshold after which a client is considered timed out.
    timeout: Duration,
}

impl PingMonitor {
    /// Create a monitor with the given silence threshold.
    pub fn new(timeout: Duration) -> Self {
        Self {
            clients: HashMap::new(),
            timeout,
        }
    }

    /// Start tracking `addr`, or refresh it if already tracked.
    pub fn register(&mut self, addr: SocketAddr) {
        self.clients.insert(addr, Instant::now());
    }

    /// Record a ping from `addr`. Returns `false` for addresses with no open stream.
    pub fn update_ping(&mut self, addr: SocketAddr) -> bool {
        match self.clients.get_mut(&addr) {
            Some(last_ping) => {
                *last_ping = Instant::now();
                true
            }
            None => false,
        }
    }

    /// Remove and return clients whose last ping is older than the timeout at `now`.
    pub fn check_timeouts(&mut self, now: Instant) -> Vec<SocketAddr> {
        let timeout = self.timeout;
        let mut timed_out = Vec::new();

        self.clients.retain(|addr, last_ping| {
            if now.saturating_duration_since(*last_ping) > timeout {
                timed_out.push(*addr);
                false
            } else {
                true
            }
        });
        timed_out
    }
}
