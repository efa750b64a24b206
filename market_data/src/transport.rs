//! Push-channel transports.
//!
//! A [`StreamTransport`] opens a session with an upstream and pushes every decoded
//! [`FeedEvent`] into the [`FeedSink`] it was given, including its own
//! [`ConnectionStatus`] transitions. The hub never sets the status itself.
//!
//! - [`UdpStreamTransport`] — sends a `J_QUOTE` command over TCP, then receives
//!   JSON `FeedEvent` datagrams over UDP and keeps the subscription alive with `PING`s.
//! - [`NullTransport`] — no push channel at all; used when only the polling fallback runs.

use std::io::{ErrorKind, Write};
use std::net::{Shutdown, SocketAddr, TcpStream, UdpSocket};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam_channel::Sender;
use log::{debug, error, info, warn};
use market_common::command::Command;
use market_common::net::{
    self, COMMAND_PORT, DATA_PORT, MAX_DATAGRAM, PING_INTERVAL, PING_PAYLOAD, PING_TIMEOUT,
};
use market_common::{ConnectionStatus, FeedError, FeedEvent, Result};

/// Write side of the hub's event queue, handed to transports.
#[derive(Clone)]
pub struct FeedSink {
    tx: Sender<FeedEvent>,
}

impl FeedSink {
    pub(crate) fn new(tx: Sender<FeedEvent>) -> Self {
        Self { tx }
    }

    /// Queue an event. Returns `false` once the hub has shut down.
    pub fn send(&self, event: FeedEvent) -> bool {
        self.tx.send(event).is_ok()
    }

    /// Queue a status transition.
    pub fn status(&self, status: ConnectionStatus) -> bool {
        self.send(FeedEvent::Status(status))
    }
}

/// A push channel that can be (re)opened and closed.
pub trait StreamTransport: Send + Sync {
    /// Open a session, replacing any previous one.
    ///
    /// Implementations report `Connecting` first and then `Connected` or `Error`
    /// through `sink`.
    fn connect(&self, sink: FeedSink) -> Result<()>;

    /// Close the current session, if any.
    fn disconnect(&self);
}

/// Transport for setups without a push channel.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullTransport;

impl StreamTransport for NullTransport {
    fn connect(&self, sink: FeedSink) -> Result<()> {
        sink.status(ConnectionStatus::Connecting);
        sink.status(ConnectionStatus::Error);
        Err(FeedError::Connection("no push channel configured".to_string()))
    }

    fn disconnect(&self) {}
}

/// Settings for [`UdpStreamTransport`].
#[derive(Debug, Clone)]
pub struct StreamConfig {
    /// Feed server host.
    pub server_ip: String,
    /// TCP command port on the server.
    pub command_port: u16,
    /// UDP data/ping port on the server.
    pub data_port: u16,
    /// Local address to bind the UDP socket to.
    pub listen_addr: String,
    /// Quote symbols to stream.
    pub symbols: Vec<String>,
    /// Underlyings whose option chains to stream.
    pub underlyings: Vec<String>,
    /// Bearer token sent with the subscription.
    pub token: Option<String>,
    /// Report `Error` when nothing arrives for this long. Defaults to the server's
    /// ping timeout; `None` waits forever.
    pub silence_timeout: Option<Duration>,
    /// Timeout for the TCP connect and write of the subscription command.
    pub connect_timeout: Duration,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            server_ip: "127.0.0.1".to_string(),
            command_port: COMMAND_PORT,
            data_port: DATA_PORT,
            listen_addr: "0.0.0.0:0".to_string(),
            symbols: Vec::new(),
            underlyings: Vec::new(),
            token: None,
            silence_timeout: Some(PING_TIMEOUT),
            connect_timeout: Duration::from_secs(5),
        }
    }
}

/// How long a blocked `recv` waits before re-checking the shutdown flag.
const RECV_POLL: Duration = Duration::from_millis(500);

struct Session {
    shutdown: Arc<AtomicBool>,
    receiver: JoinHandle<()>,
    pinger: JoinHandle<()>,
}

impl Session {
    fn stop(self) {
        self.shutdown.store(true, Ordering::SeqCst);
        if self.receiver.join().is_err() {
            error!("Receiver thread panicked");
        }
        if self.pinger.join().is_err() {
            error!("Ping thread panicked");
        }
    }
}

/// TCP-command / UDP-data transport speaking to the feed server.
pub struct UdpStreamTransport {
    config: StreamConfig,
    session: Mutex<Option<Session>>,
}

impl UdpStreamTransport {
    /// Create a transport; nothing is opened until `connect`.
    pub fn new(config: StreamConfig) -> Self {
        Self {
            config,
            session: Mutex::new(None),
        }
    }

    fn stop_session(&self) {
        let session = self
            .session
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(session) = session {
            info!("Closing stream session");
            session.stop();
        }
    }

    fn open_session(&self, sink: &FeedSink) -> Result<Session> {
        let socket = Arc::new(UdpSocket::bind(&self.config.listen_addr)?);
        socket.set_read_timeout(Some(RECV_POLL))?;
        let local_addr = socket.local_addr()?;
        info!("UDP stream socket listening on: {}", local_addr);

        self.send_subscription(local_addr)?;

        let shutdown = Arc::new(AtomicBool::new(false));
        let server_data_addr = net::addr(&self.config.server_ip, self.config.data_port);

        let receiver = {
            let socket = Arc::clone(&socket);
            let shutdown = Arc::clone(&shutdown);
            let sink = sink.clone();
            let silence = self.config.silence_timeout;
            thread::spawn(move || receive_loop(socket, sink, shutdown, silence))
        };
        let pinger = {
            let socket = Arc::clone(&socket);
            let shutdown = Arc::clone(&shutdown);
            thread::spawn(move || ping_loop(socket, server_data_addr, shutdown))
        };

        Ok(Session {
            shutdown,
            receiver,
            pinger,
        })
    }

    fn send_subscription(&self, local_addr: SocketAddr) -> Result<()> {
        let server = net::addr(&self.config.server_ip, self.config.command_port);
        let server_addr: SocketAddr = server
            .parse()
            .map_err(|e| FeedError::Format(format!("Invalid server address {}: {}", server, e)))?;

        info!("Connecting to TCP command server at {}", server_addr);
        let mut stream = TcpStream::connect_timeout(&server_addr, self.config.connect_timeout)
            .map_err(|e| {
                FeedError::Connection(format!("Failed to connect to {}: {}", server_addr, e))
            })?;
        stream.set_write_timeout(Some(self.config.connect_timeout))?;

        let command = Command::subscribe(
            &local_addr.ip().to_string(),
            &local_addr.port().to_string(),
            self.config.symbols.clone(),
            self.config.underlyings.clone(),
        )
        .with_token(self.config.token.clone());

        info!(
            "Sending J_QUOTE for {} symbols and {} underlyings",
            command.symbols.len(),
            command.underlyings.len()
        );
        stream.write_all(&serde_json::to_vec(&command)?)?;
        stream.shutdown(Shutdown::Write)?;
        Ok(())
    }
}

impl StreamTransport for UdpStreamTransport {
    fn connect(&self, sink: FeedSink) -> Result<()> {
        self.stop_session();
        sink.status(ConnectionStatus::Connecting);

        match self.open_session(&sink) {
            Ok(session) => {
                *self.session.lock().unwrap_or_else(PoisonError::into_inner) = Some(session);
                sink.status(ConnectionStatus::Connected);
                Ok(())
            }
            Err(e) => {
                error!("Stream session failed to open: {}", e);
                sink.status(ConnectionStatus::Error);
                Err(e)
            }
        }
    }

    fn disconnect(&self) {
        self.stop_session();
    }
}

impl Drop for UdpStreamTransport {
    fn drop(&mut self) {
        self.stop_session();
    }
}

/// Receives datagrams until shutdown, silence, or a socket error.
fn receive_loop(
    socket: Arc<UdpSocket>,
    sink: FeedSink,
    shutdown: Arc<AtomicBool>,
    silence_timeout: Option<Duration>,
) {
    let mut buf = vec![0u8; MAX_DATAGRAM];
    let mut last_event = Instant::now();

    while !shutdown.load(Ordering::Relaxed) {
        match socket.recv(&mut buf) {
            Ok(size) => match FeedEvent::from_json_slice(&buf[..size]) {
                // Status is a local concern; the upstream does not get to set it.
                Ok(FeedEvent::Status(status)) => {
                    debug!("Ignoring upstream status {}", status);
                }
                Ok(event) => {
                    last_event = Instant::now();
                    if !sink.send(event) {
                        info!("Hub is gone, receiver stopping");
                        return;
                    }
                }
                Err(_) => {
                    debug!(
                        "Received non-event datagram: {}",
                        String::from_utf8_lossy(&buf[..size])
                    );
                }
            },
            Err(e) if e.kind() == ErrorKind::WouldBlock || e.kind() == ErrorKind::TimedOut => {
                if let Some(limit) = silence_timeout {
                    if last_event.elapsed() > limit {
                        warn!("No stream data for {:?}, marking connection as failed", limit);
                        sink.status(ConnectionStatus::Error);
                        return;
                    }
                }
            }
            Err(e) => {
                error!("Receive data error: {}", e);
                sink.status(ConnectionStatus::Error);
                return;
            }
        }
    }
    info!("Receiver loop stopping...");
    sink.status(ConnectionStatus::Disconnected);
}

fn ping_loop(socket: Arc<UdpSocket>, target_addr: String, shutdown: Arc<AtomicBool>) {
    info!("Ping thread started. Target: {}", target_addr);
    let mut last_ping = Instant::now();
    while !shutdown.load(Ordering::Relaxed) {
        // Short sleeps so a session stop is not held up by a full ping interval.
        thread::sleep(RECV_POLL.min(PING_INTERVAL));
        if last_ping.elapsed() < PING_INTERVAL {
            continue;
        }
        last_ping = Instant::now();
        match socket.send_to(PING_PAYLOAD, &target_addr) {
            Ok(_) => debug!("PING sent to {}", target_addr),
            Err(ref e) if e.kind() == ErrorKind::ConnectionReset => continue,
            Err(e) => error!("Failed to send PING: {}", e),
        }
    }
    info!("Ping thread stopping...");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crossbeam_channel::unbounded;
    use market_common::Quote;
    use std::io::Read;
    use std::net::TcpListener;

    #[test]
    fn default_silence_limit_matches_server_ping_timeout() {
        assert_eq!(StreamConfig::default().silence_timeout, Some(PING_TIMEOUT));
    }

    #[test]
    fn silent_session_reports_error() {
        let socket = Arc::new(UdpSocket::bind("127.0.0.1:0").unwrap());
        socket.set_read_timeout(Some(Duration::from_millis(20))).unwrap();
        let (tx, rx) = unbounded();
        let shutdown = Arc::new(AtomicBool::new(false));
        receive_loop(socket, FeedSink::new(tx), shutdown, Some(Duration::from_millis(100)));
        let statuses: Vec<FeedEvent> = rx.try_iter().collect();
        assert_eq!(statuses, vec![FeedEvent::Status(ConnectionStatus::Error)]);
    }

    #[test]
    fn null_transport_reports_error() {
        let (tx, rx) = unbounded();
        assert!(NullTransport.connect(FeedSink::new(tx)).is_err());
        let statuses: Vec<FeedEvent> = rx.try_iter().collect();
        assert_eq!(
            statuses,
            vec![
                FeedEvent::Status(ConnectionStatus::Connecting),
                FeedEvent::Status(ConnectionStatus::Error)
            ]
        );
    }

    #[test]
    fn unreachable_server_reports_error() {
        // Bind then drop to get a port with nothing listening.
        let port = TcpListener::bind("127.0.0.1:0")
            .unwrap()
            .local_addr()
            .unwrap()
            .port();
        let transport = UdpStreamTransport::new(StreamConfig {
            command_port: port,
            listen_addr: "127.0.0.1:0".to_string(),
            connect_timeout: Duration::from_millis(500),
            ..StreamConfig::default()
        });
        let (tx, rx) = unbounded();
        assert!(transport.connect(FeedSink::new(tx)).is_err());
        let statuses: Vec<FeedEvent> = rx.try_iter().collect();
        assert_eq!(statuses.last(), Some(&FeedEvent::Status(ConnectionStatus::Error)));
    }

    #[test]
    fn session_subscribes_and_forwards_datagrams() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let command_port = listener.local_addr().unwrap().port();
        let transport = UdpStreamTransport::new(StreamConfig {
            command_port,
            listen_addr: "127.0.0.1:0".to_string(),
            symbols: vec!["AAPL".to_string()],
            token: Some("secret".to_string()),
            ..StreamConfig::default()
        });

        let (tx, rx) = unbounded();
        transport.connect(FeedSink::new(tx)).unwrap();

        let (mut conn, _) = listener.accept().unwrap();
        let mut raw = Vec::new();
        conn.read_to_end(&mut raw).unwrap();
        let command: Command = serde_json::from_slice(&raw).unwrap();
        assert_eq!(command.symbols, vec!["AAPL"]);
        assert_eq!(command.token.as_deref(), Some("secret"));

        let target = command.udp_addr().unwrap();
        let sender = UdpSocket::bind("127.0.0.1:0").unwrap();
        let quote = Quote::from_prices("AAPL", 2.0, 1.0, 2.0, 1.0, 1.0, 5, "FEED");
        let payload = FeedEvent::Quote(quote.clone()).to_json_bytes().unwrap();
        sender.send_to(&payload, target).unwrap();

        let mut received = None;
        let deadline = Instant::now() + Duration::from_secs(5);
        while Instant::now() < deadline {
            match rx.recv_timeout(Duration::from_millis(100)) {
                Ok(FeedEvent::Quote(q)) => {
                    received = Some(q);
                    break;
                }
                Ok(_) => continue,
                Err(_) => continue,
            }
        }
        assert_eq!(received, Some(quote));

        transport.disconnect();
        let tail: Vec<FeedEvent> = rx.try_iter().collect();
        assert_eq!(tail.last(), Some(&FeedEvent::Status(ConnectionStatus::Disconnected)));
    }
}
