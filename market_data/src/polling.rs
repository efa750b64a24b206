//! Polling fallback.
//!
//! A `Poller` refetches a fixed symbol set on a fixed interval and merges the result
//! into a [`QuoteTarget`]. Each tick runs its cycle on a worker thread so the timer
//! keeps its cadence; a tick that finds the previous cycle still running is skipped.
//! Stopping the poller (explicitly or by drop) stops the timer, and a cycle that was
//! already running discards its results instead of writing them.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::{Sender, select, tick, unbounded};
use log::{debug, error, info};

use crate::fetch::{QuoteFetcher, fetch_bulk};
use crate::hub::QuoteTarget;

/// Default refresh cadence.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(30);

/// Poller settings.
#[derive(Debug, Clone)]
pub struct PollerConfig {
    /// Symbols refreshed every cycle.
    pub symbols: Vec<String>,
    /// Time between cycles.
    pub interval: Duration,
    /// Deadline for one cycle's fetches.
    pub fetch_timeout: Duration,
    /// Run a cycle right away instead of waiting a full interval.
    pub run_immediately: bool,
}

impl Default for PollerConfig {
    fn default() -> Self {
        Self {
            symbols: Vec::new(),
            interval: DEFAULT_POLL_INTERVAL,
            fetch_timeout: Duration::from_secs(5),
            run_immediately: true,
        }
    }
}

/// Result of one attempted cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollOutcome {
    /// The cycle ran.
    Completed {
        /// Entries written to the target.
        updated: usize,
        /// Symbols that failed or timed out.
        failed: usize,
    },
    /// Another cycle was in flight, or the poller was stopped.
    Skipped,
}

struct PollState {
    target: Arc<dyn QuoteTarget>,
    fetcher: Arc<dyn QuoteFetcher>,
    config: PollerConfig,
    in_flight: AtomicBool,
    stopped: AtomicBool,
    cycles: AtomicU64,
}

/// Clears the in-flight flag when a cycle ends, panics included.
struct InFlight<'a>(&'a AtomicBool);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

impl PollState {
    fn run_cycle(&self) -> PollOutcome {
        if self.stopped.load(Ordering::Acquire) {
            return PollOutcome::Skipped;
        }
        if self
            .in_flight
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            debug!("Previous poll still in flight, skipping");
            return PollOutcome::Skipped;
        }
        let _guard = InFlight(&self.in_flight);

        let bulk = fetch_bulk(&self.fetcher, &self.config.symbols, self.config.fetch_timeout);
        let failed = bulk.failures.len();
        if self.stopped.load(Ordering::Acquire) {
            debug!("Poller stopped during fetch, discarding {} quotes", bulk.quotes.len());
            return PollOutcome::Skipped;
        }
        let updated = self.target.apply_bulk_result(bulk.quotes);
        let cycle = self.cycles.fetch_add(1, Ordering::Relaxed) + 1;
        debug!("Poll cycle {}: {} updated, {} failed", cycle, updated, failed);
        PollOutcome::Completed { updated, failed }
    }
}

fn spawn_cycle(state: &Arc<PollState>) {
    if state.in_flight.load(Ordering::Acquire) {
        debug!("Tick while a poll is in flight, skipping");
        return;
    }
    let state = Arc::clone(state);
    thread::spawn(move || {
        state.run_cycle();
    });
}

/// Handle to a running polling loop.
pub struct Poller {
    state: Arc<PollState>,
    stop_tx: Sender<()>,
    timer: Option<JoinHandle<()>>,
}

impl Poller {
    /// Start polling `config.symbols` through `fetcher` into `target`.
    pub fn start(
        target: Arc<dyn QuoteTarget>,
        fetcher: Arc<dyn QuoteFetcher>,
        config: PollerConfig,
    ) -> Self {
        let (stop_tx, stop_rx) = unbounded::<()>();
        info!(
            "Polling {} symbols every {:?}",
            config.symbols.len(),
            config.interval
        );
        let state = Arc::new(PollState {
            target,
            fetcher,
            config,
            in_flight: AtomicBool::new(false),
            stopped: AtomicBool::new(false),
            cycles: AtomicU64::new(0),
        });

        let timer = {
            let state = Arc::clone(&state);
            thread::spawn(move || {
                let ticker = tick(state.config.interval);
                if state.config.run_immediately {
                    spawn_cycle(&state);
                }
                loop {
                    select! {
                        recv(stop_rx) -> _ => break,
                        recv(ticker) -> _ => spawn_cycle(&state),
                    }
                }
                debug!("Poll timer stopped");
            })
        };

        Self {
            state,
            stop_tx,
            timer: Some(timer),
        }
    }

    /// Run one cycle on the calling thread, honouring the in-flight guard.
    pub fn refresh_now(&self) -> PollOutcome {
        self.state.run_cycle()
    }

    /// Whether a cycle is currently running.
    pub fn is_in_flight(&self) -> bool {
        self.state.in_flight.load(Ordering::Acquire)
    }

    /// Completed cycles so far.
    pub fn cycles(&self) -> u64 {
        self.state.cycles.load(Ordering::Relaxed)
    }

    /// Stop the timer. Idempotent.
    pub fn stop(&mut self) {
        self.state.stopped.store(true, Ordering::Release);
        let Some(timer) = self.timer.take() else {
            return;
        };
        let _ = self.stop_tx.send(());
        if timer.join().is_err() {
            error!("Poll timer thread panicked");
        }
        info!("Polling stopped");
    }
}

impl Drop for Poller {
    fn drop(&mut self) {
        self.stop();
    }
}
