use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use crossbeam_channel::{Receiver, unbounded};
use market_common::{
    ConnectionStatus, FeedError, FeedEvent, OptionChainSnapshot, OptionLeg, Quote, Result,
    StrikeRow,
};
use market_data::views::{Holding, calculate_portfolio_value};
use market_data::{FeedSink, HubConfig, MarketDataHub, ReconnectPolicy, StreamTransport};

const WAIT: Duration = Duration::from_secs(5);

/// Transport that reports success or failure without any I/O.
struct ScriptedTransport {
    connects: Arc<AtomicUsize>,
    fail_first: usize,
}

impl StreamTransport for ScriptedTransport {
    fn connect(&self, sink: FeedSink) -> Result<()> {
        let attempt = self.connects.fetch_add(1, Ordering::SeqCst);
        sink.status(ConnectionStatus::Connecting);
        if attempt < self.fail_first {
            sink.status(ConnectionStatus::Error);
            return Err(FeedError::Connection("scripted failure".to_string()));
        }
        sink.status(ConnectionStatus::Connected);
        Ok(())
    }

    fn disconnect(&self) {}
}

fn hub_with(fail_first: usize, max_attempts: u32) -> (Arc<MarketDataHub>, Arc<AtomicUsize>) {
    let connects = Arc::new(AtomicUsize::new(0));
    let transport = ScriptedTransport {
        connects: Arc::clone(&connects),
        fail_first,
    };
    let config = HubConfig {
        reconnect: ReconnectPolicy {
            max_attempts,
            delay: Duration::from_millis(5),
        },
        ..HubConfig::default()
    };
    (MarketDataHub::new(config, Box::new(transport)), connects)
}

fn quote(symbol: &str, last: f64, ts: u64) -> Quote {
    Quote::from_prices(symbol, last, last, last, last, 100.0, ts, "TEST")
}

fn status_feed(hub: &MarketDataHub) -> (Receiver<ConnectionStatus>, market_data::Subscription) {
    let (tx, rx) = unbounded();
    let sub = hub.subscribe_to_connection_status(move |status| {
        let _ = tx.send(status);
    });
    (rx, sub)
}

fn wait_for(rx: &Receiver<ConnectionStatus>, wanted: ConnectionStatus) -> Vec<ConnectionStatus> {
    let mut seen = Vec::new();
    while let Ok(status) = rx.recv_timeout(WAIT) {
        seen.push(status);
        if status == wanted {
            break;
        }
    }
    seen
}

#[test]
fn never_fetched_symbol_is_absent() {
    let (hub, _) = hub_with(0, 1);
    assert!(hub.get_quote("AAPL").is_none());
}

#[test]
fn subscriber_sees_each_streamed_update_once() {
    let (hub, _) = hub_with(0, 1);
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);
    let sub = hub.subscribe_to_quote("AAPL", move |q| sink.lock().unwrap().push(q.clone()));

    let q = quote("AAPL", 150.0, 1);
    assert!(hub.apply_streamed_update(q.clone()));
    assert_eq!(*seen.lock().unwrap(), vec![q]);

    sub.unsubscribe();
    sub.unsubscribe();
    hub.apply_streamed_update(quote("AAPL", 151.0, 2));
    assert_eq!(seen.lock().unwrap().len(), 1);
    assert_eq!(hub.get_quote("AAPL").map(|q| q.last_price), Some(151.0));
}

#[test]
fn last_applied_write_wins_per_symbol() {
    let (hub, _) = hub_with(0, 1);
    hub.apply_streamed_update(quote("AAPL", 1.0, 1));
    hub.apply_bulk_result([("MSFT".to_string(), quote("MSFT", 9.0, 1))].into());
    hub.apply_bulk_result([("AAPL".to_string(), quote("AAPL", 2.0, 2))].into());
    hub.apply_streamed_update(quote("MSFT", 8.0, 2));
    hub.apply_streamed_update(quote("AAPL", 3.0, 3));

    assert_eq!(hub.get_quote("AAPL").map(|q| q.last_price), Some(3.0));
    assert_eq!(hub.get_quote("MSFT").map(|q| q.last_price), Some(8.0));
}

#[test]
fn concurrent_writers_do_not_interfere_across_symbols() {
    let (hub, _) = hub_with(0, 1);
    let writers: Vec<_> = ["AAPL", "MSFT", "TSLA", "GOOGL"]
        .into_iter()
        .map(|symbol| {
            let hub = Arc::clone(&hub);
            thread::spawn(move || {
                for i in 0..200u64 {
                    if i % 2 == 0 {
                        hub.apply_streamed_update(quote(symbol, i as f64, i));
                    } else {
                        let bulk = [(symbol.to_string(), quote(symbol, i as f64, i))];
                        hub.apply_bulk_result(bulk.into());
                    }
                }
            })
        })
        .collect();
    for writer in writers {
        writer.join().unwrap();
    }
    for symbol in ["AAPL", "MSFT", "TSLA", "GOOGL"] {
        assert_eq!(hub.get_quote(symbol).map(|q| q.last_price), Some(199.0));
    }
}

#[test]
fn panicking_subscriber_does_not_starve_the_next() {
    let (hub, _) = hub_with(0, 1);
    let hits = Arc::new(AtomicUsize::new(0));
    let _bad = hub.subscribe_to_quote("AAPL", |_| panic!("broken view"));
    let counter = Arc::clone(&hits);
    let _good = hub.subscribe_to_quote("AAPL", move |_| {
        counter.fetch_add(1, Ordering::SeqCst);
    });

    hub.apply_streamed_update(quote("AAPL", 1.0, 1));
    hub.apply_streamed_update(quote("AAPL", 2.0, 2));
    assert_eq!(hits.load(Ordering::SeqCst), 2);
}

#[test]
fn bulk_merge_does_not_notify_quote_subscribers() {
    let (hub, _) = hub_with(0, 1);
    let hits = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&hits);
    let _sub = hub.subscribe_to_quote("AAPL", move |_| {
        counter.fetch_add(1, Ordering::SeqCst);
    });
    hub.apply_bulk_result([("AAPL".to_string(), quote("AAPL", 1.0, 1))].into());
    assert_eq!(hits.load(Ordering::SeqCst), 0);
    assert!(hub.get_quote("AAPL").is_some());
}

#[test]
fn sink_events_reach_store_and_subscribers() {
    let (hub, _) = hub_with(0, 1);
    let (tx, rx) = unbounded();
    let _sub = hub.subscribe_to_quote("TSLA", move |q| {
        let _ = tx.send(q.clone());
    });
    let (chain_tx, chain_rx) = unbounded();
    let _chain_sub = hub.subscribe_to_option_chain("SPY", move |c| {
        let _ = chain_tx.send(c.clone());
    });

    let sink = hub.sink();
    assert!(sink.send(FeedEvent::Quote(quote("TSLA", 250.0, 1))));
    let chain = OptionChainSnapshot::new(
        "SPY",
        vec![StrikeRow {
            strike: 500.0,
            call: OptionLeg { last_price: 3.0, open_interest: 100 },
            put: OptionLeg { last_price: 2.5, open_interest: 80 },
        }],
        1,
    );
    assert!(sink.send(FeedEvent::OptionChain(chain.clone())));

    assert_eq!(rx.recv_timeout(WAIT).map(|q| q.last_price), Ok(250.0));
    assert_eq!(chain_rx.recv_timeout(WAIT), Ok(chain.clone()));
    assert_eq!(hub.get_quote("TSLA").map(|q| q.last_price), Some(250.0));
    assert_eq!(hub.option_chain("SPY"), Some(chain));
}

#[test]
fn reconnect_moves_through_connecting_to_connected() {
    let (hub, connects) = hub_with(0, 1);
    let (rx, _sub) = status_feed(&hub);

    hub.reconnect().unwrap();
    let seen = wait_for(&rx, ConnectionStatus::Connected);
    assert_eq!(seen, vec![ConnectionStatus::Connecting, ConnectionStatus::Connected]);
    assert_eq!(hub.connection_status(), ConnectionStatus::Connected);

    // Already connected: no new session.
    hub.reconnect().unwrap();
    assert_eq!(connects.load(Ordering::SeqCst), 1);
}

#[test]
fn bounded_retry_recovers_after_failures() {
    let (hub, connects) = hub_with(2, 3);
    let (rx, _sub) = status_feed(&hub);

    hub.reconnect().unwrap();
    assert_eq!(connects.load(Ordering::SeqCst), 3);
    let seen = wait_for(&rx, ConnectionStatus::Connected);
    assert_eq!(seen.first(), Some(&ConnectionStatus::Connecting));
    assert!(seen.contains(&ConnectionStatus::Error));
    assert_eq!(seen.last(), Some(&ConnectionStatus::Connected));
}

#[test]
fn exhausted_retry_reports_error() {
    let (hub, connects) = hub_with(5, 2);
    let (rx, _sub) = status_feed(&hub);

    assert!(hub.reconnect().is_err());
    assert_eq!(connects.load(Ordering::SeqCst), 2);
    let seen = wait_for(&rx, ConnectionStatus::Error);
    assert_eq!(seen.last(), Some(&ConnectionStatus::Error));
}

#[test]
fn shutdown_reports_disconnected() {
    let (hub, _) = hub_with(0, 1);
    let (rx, _sub) = status_feed(&hub);
    hub.reconnect().unwrap();
    wait_for(&rx, ConnectionStatus::Connected);

    hub.shutdown();
    assert_eq!(hub.connection_status(), ConnectionStatus::Disconnected);
    assert_eq!(rx.recv_timeout(WAIT), Ok(ConnectionStatus::Disconnected));
}

#[test]
fn portfolio_value_reads_through_the_hub() {
    let (hub, _) = hub_with(0, 1);
    let holdings = vec![Holding {
        symbol: "X".to_string(),
        quantity: 10.0,
        avg_price: 100.0,
    }];
    assert_eq!(calculate_portfolio_value(&holdings, hub.as_ref()), 1000.0);
    hub.apply_streamed_update(quote("X", 110.0, 1));
    assert_eq!(calculate_portfolio_value(&holdings, hub.as_ref()), 1100.0);
}

#[test]
fn failed_reconnect_attempts_do_not_count_as_session_loss() {
    let (hub, connects) = hub_with(5, 3);
    let losses = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&losses);
    let _loss = hub.subscribe_to_session_loss(move || {
        counter.fetch_add(1, Ordering::SeqCst);
    });
    let (rx, _sub) = status_feed(&hub);

    assert!(hub.reconnect().is_err());
    assert_eq!(connects.load(Ordering::SeqCst), 3);
    let mut errors = 0;
    while errors < 3 {
        if rx.recv_timeout(WAIT).unwrap() == ConnectionStatus::Error {
            errors += 1;
        }
    }
    assert_eq!(losses.load(Ordering::SeqCst), 0);
}

#[test]
fn live_session_failure_is_reported_once() {
    let (hub, _) = hub_with(0, 1);
    let (loss_tx, loss_rx) = unbounded();
    let _loss = hub.subscribe_to_session_loss(move || {
        let _ = loss_tx.send(());
    });
    let (rx, _sub) = status_feed(&hub);

    hub.reconnect().unwrap();
    wait_for(&rx, ConnectionStatus::Connected);

    let sink = hub.sink();
    sink.status(ConnectionStatus::Error);
    sink.status(ConnectionStatus::Error);
    wait_for(&rx, ConnectionStatus::Error);

    assert_eq!(loss_rx.recv_timeout(WAIT), Ok(()));
    assert!(loss_rx.recv_timeout(Duration::from_millis(100)).is_err());
}
