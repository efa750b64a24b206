//! Mock market feed server.
//!
//! Serves the two channels the market data consumer talks to:
//!
//! - a TCP command port where clients either ask for a one-shot quote snapshot or
//!   subscribe to a push stream for a set of symbols and underlyings;
//! - a UDP data port that carries JSON `FeedEvent` datagrams to subscribed clients and
//!   receives their `PING` keep-alives.
//!
//! Internally it wires together:
//!
//! - `FeedGenerator` produces quotes and option chains, records quotes on the
//!   `QuoteBoard`, and broadcasts events to every client stream.
//! - `CommandReceiver` answers snapshots from the board and forwards validated
//!   subscriptions to the main loop.
//! - One stream thread per client filters events by the client's symbols and sends the
//!   matching ones to the client's UDP address.
//! - `PingMonitor` plus `UdpPingListener` close streams whose client went silent.
//!
//! Ctrl+C stops the generator, which broadcasts `MarketEvent::Shutdown` to every stream.
#![warn(missing_docs)]
use crate::args::Args;
use crate::model::board::QuoteBoard;
use crate::model::generator::{FeedGenerator, GeneratorConfig, MarketEvent};
use crate::model::ping_monitor::PingMonitor;
use crate::receiver::{CommandReceiver, StreamRequest};
use crate::udp_listener::UdpPingListener;
use clap::Parser;
use crossbeam_channel::{Receiver, Sender, select, unbounded};
use log::{debug, error, info, warn};
use market_common::net::{COMMAND_PORT, DATA_PORT, addr};
use market_common::symbols::parse_symbol_list;
use market_common::{FeedError, FeedEvent, Result};
use std::collections::{HashMap, HashSet};
use std::net::{SocketAddr, UdpSocket};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread;
use std::time::{Duration, Instant};

mod args;
pub mod model;
mod receiver;
mod udp_listener;

/// How often the ping monitor is swept.
const TIMEOUT_CHECK_INTERVAL: Duration = Duration::from_secs(1);

/// Stream task for a single client.
///
/// Forwards every event from `data_rx` whose topic is in `topics` to `target_addr`.
/// Ends on `stop_rx`, on `MarketEvent::Shutdown`, or when the datagram cannot be sent.
pub fn handle_client_stream(
    socket: Arc<UdpSocket>,
    target_addr: SocketAddr,
    topics: HashSet<String>,
    data_rx: Receiver<MarketEvent>,
    stop_rx: Receiver<()>,
) -> Result<()> {
    loop {
        select! {
            recv(stop_rx) -> _ => break,
            recv(data_rx) -> msg => match msg {
                Ok(MarketEvent::Feed(event)) => {
                    if !event.topic().is_some_and(|topic| topics.contains(topic)) {
                        continue;
                    }
                    let data = event.to_json_bytes()?;
                    socket.send_to(&data, target_addr)?;
                },
                Ok(MarketEvent::Shutdown) => break,
                Err(e) => return Err(FeedError::ChannelRecv(e.to_string())),
            }
        }
    }
    debug!("Stream for {} finished", target_addr);
    Ok(())
}

fn main() -> Result<()> {
    init_logger();
    let args = Args::parse();

    let symbols = parse_symbol_list(&args.symbols)?;
    let underlyings = parse_symbol_list(&args.underlyings)?;
    info!("Generating {:?} with chains for {:?}", symbols, underlyings);

    let (shutdown_tx, shutdown_rx) = unbounded::<()>();
    ctrlc::set_handler(move || {
        info!("Ctrl+C received. Shutting down feed server...");
        let _ = shutdown_tx.send(());
    })
    .map_err(|e| FeedError::Format(format!("Error setting Ctrl+C handler: {}", e)))?;

    let udp_socket = Arc::new(UdpSocket::bind(addr(&args.bind_ip, DATA_PORT))?);
    udp_socket.set_read_timeout(Some(Duration::from_millis(500)))?;
    info!("UDP socket created on: {}", udp_socket.local_addr()?);

    let stopping = Arc::new(AtomicBool::new(false));
    let ping_monitor = Arc::new(Mutex::new(PingMonitor::new(Duration::from_secs(
        args.ping_timeout_secs.max(1),
    ))));
    let ping_listener = UdpPingListener::start(
        Arc::clone(&udp_socket),
        Arc::clone(&ping_monitor),
        Arc::clone(&stopping),
    );
    let (timeout_tx, timeout_rx) = unbounded::<SocketAddr>();
    start_ping_monitor(Arc::clone(&ping_monitor), timeout_tx, Arc::clone(&stopping));

    let board = Arc::new(QuoteBoard::new());
    let (stream_tx, stream_rx) = unbounded::<StreamRequest>();
    let tcp_receiver = CommandReceiver::new(
        &addr(&args.bind_ip, COMMAND_PORT),
        Arc::clone(&board),
        args.token.clone(),
    )?;
    thread::spawn(move || {
        if let Err(e) = tcp_receiver.receive_loop_with_channel(stream_tx) {
            error!("Receiver loop failed: {}", e);
        }
    });

    let (generator_stop_tx, generator_stop_rx) = unbounded::<()>();
    let (subscription_tx, generator) = FeedGenerator::start(
        GeneratorConfig {
            symbols,
            underlyings,
            tick: Duration::from_millis(args.tick_ms.max(1)),
            chain_every: args.chain_every,
        },
        board,
        generator_stop_rx,
    );

    let mut active_streams: HashMap<SocketAddr, Sender<()>> = HashMap::new();
    loop {
        select! {
            recv(shutdown_rx) -> _ => break,

            recv(stream_rx) -> msg => if let Ok(request) = msg {
                let target_udp_addr = request.target;
                if let Some(previous) = active_streams.remove(&target_udp_addr) {
                    let _ = previous.send(());
                    info!("Replacing stream for {}", target_udp_addr);
                }

                let (stop_tx, stop_rx) = unbounded::<()>();
                let (client_data_tx, client_data_rx) = unbounded::<MarketEvent>();
                if let Err(e) = subscription_tx.send(client_data_tx) {
                    error!("Failed to subscribe client: {}", e);
                    continue;
                }
                active_streams.insert(target_udp_addr, stop_tx);
                ping_monitor
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .register(target_udp_addr);

                let topics: HashSet<String> =
                    request.symbols.into_iter().chain(request.underlyings).collect();
                let socket_clone = Arc::clone(&udp_socket);
                thread::spawn(move || {
                    if let Err(e) = handle_client_stream(
                        socket_clone,
                        target_udp_addr,
                        topics,
                        client_data_rx,
                        stop_rx,
                    ) {
                        warn!("Client stream {} ended: {}", target_udp_addr, e);
                    }
                });
                info!("Stream created for client UDP address {}", target_udp_addr);
            },

            recv(timeout_rx) -> msg => if let Ok(client_addr) = msg {
                match active_streams.remove(&client_addr) {
                    Some(stop_tx) => {
                        let _ = stop_tx.send(());
                        info!("Stream for {} closed: ping timeout", client_addr);
                    }
                    None => warn!("Ping timeout for {} with no open stream", client_addr),
                }
            },
        }
    }

    let _ = generator_stop_tx.send(());
    if generator.join().is_err() {
        error!("Generator thread panicked");
    }
    stopping.store(true, Ordering::Relaxed);
    if ping_listener.join().is_err() {
        error!("Ping listener thread panicked");
    }
    info!("Feed server stopped, {} streams were open", active_streams.len());
    Ok(())
}

fn start_ping_monitor(
    ping_monitor: Arc<Mutex<PingMonitor>>,
    timeout_tx: Sender<SocketAddr>,
    stopping: Arc<AtomicBool>,
) {
    thread::spawn(move || {
        while !stopping.load(Ordering::Relaxed) {
            thread::sleep(TIMEOUT_CHECK_INTERVAL);
            let timed_out_clients = ping_monitor
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .check_timeouts(Instant::now());
            for client_addr in timed_out_clients {
                if timeout_tx.send(client_addr).is_err() {
                    return;
                }
            }
        }
    });
}

fn init_logger() {
    env_logger::Builder::from_default_env()
        .filter_level(log::LevelFilter::Info)
        .init();
}

#[cfg(test)]
mod tests {
    use super::*;
    use market_common::{ConnectionStatus, Quote};

    #[test]
    fn client_stream_forwards_only_requested_topics() {
        let socket = Arc::new(UdpSocket::bind("127.0.0.1:0").unwrap());
        let client = UdpSocket::bind("127.0.0.1:0").unwrap();
        client.set_read_timeout(Some(Duration::from_secs(5))).unwrap();
        let target = client.local_addr().unwrap();

        let (data_tx, data_rx) = unbounded();
        let (_stop_tx, stop_rx) = unbounded();
        let topics: HashSet<String> = ["AAPL".to_string()].into_iter().collect();
        let handle = thread::spawn(move || {
            handle_client_stream(socket, target, topics, data_rx, stop_rx)
        });

        let quote = |symbol: &str| Quote::from_prices(symbol, 2.0, 1.0, 2.0, 1.0, 1.0, 1, "FEED");
        data_tx.send(MarketEvent::Feed(FeedEvent::Quote(quote("MSFT")))).unwrap();
        data_tx
            .send(MarketEvent::Feed(FeedEvent::Status(ConnectionStatus::Connected)))
            .unwrap();
        data_tx.send(MarketEvent::Feed(FeedEvent::Quote(quote("AAPL")))).unwrap();
        data_tx.send(MarketEvent::Shutdown).unwrap();
        assert!(handle.join().unwrap().is_ok());

        let mut buf = [0u8; 2048];
        let (size, _) = client.recv_from(&mut buf).unwrap();
        let event = FeedEvent::from_json_slice(&buf[..size]).unwrap();
        assert_eq!(event.topic(), Some("AAPL"));
    }
}
