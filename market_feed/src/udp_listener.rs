use crate::model::ping_monitor::PingMonitor;
use log::{debug, error};
use market_common::net::PING_PAYLOAD;
use std::io::ErrorKind;
use std::net::UdpSocket;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::{self, JoinHandle};

/// Lightweight UDP listener that receives PING datagrams from clients
/// and updates the shared `PingMonitor` with the sender address.
pub struct UdpPingListener;

impl UdpPingListener {
    /// Spawn a background thread that reads UDP packets from `socket` and,
    /// when a `PING` message is observed, refreshes that sender in `ping_monitor`.
    ///
    /// The socket should have a read timeout so the thread notices `shutdown`.
    pub fn start(
        socket: Arc<UdpSocket>,
        ping_monitor: Arc<Mutex<PingMonitor>>,
        shutdown: Arc<AtomicBool>,
    ) -> JoinHandle<()> {
        thread::spawn(move || {
            let mut buf = [0u8; 128];
            while !shutdown.load(Ordering::Relaxed) {
                match socket.recv_from(&mut buf) {
                    Ok((size, addr)) if buf[..size].starts_with(PING_PAYLOAD) => {
                        let known = ping_monitor
                            .lock()
                            .unwrap_or_else(PoisonError::into_inner)
                            .update_ping(addr);
                        debug!("Received ping from {} (known: {})", addr, known);
                    }
                    Ok((size, addr)) => debug!("Ignoring {} byte datagram from {}", size, addr),
                    Err(e) if matches!(e.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut) => {}
                    // ICMP port-unreachable from a vanished client surfaces here on some platforms.
                    Err(e) if e.kind() == ErrorKind::ConnectionReset => {}
                    Err(e) => error!("Ping socket error: {}", e),
                }
            }
            debug!("Ping listener stopped");
        })
    }
}
