use crate::model::board::QuoteBoard;
use crossbeam_channel::Sender;
use log::{debug, error, info, warn};
use market_common::command::{Command, CommandKind};
use market_common::{FeedError, QuoteResponse, Result};
use std::io::{Read, Write};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

/// Largest command accepted on one connection.
const MAX_COMMAND: u64 = 64 * 1024;
/// How long a client may take to deliver its command.
const READ_TIMEOUT: Duration = Duration::from_secs(5);

/// A validated request to open a data stream.
#[derive(Debug, Clone, PartialEq)]
pub struct StreamRequest {
    /// Where quote datagrams go.
    pub target: SocketAddr,
    /// Symbols to forward.
    pub symbols: Vec<String>,
    /// Underlyings whose chains to forward.
    pub underlyings: Vec<String>,
}

/// TCP command receiver.
///
/// Accepts one JSON `Command` per connection. Snapshot requests are answered on the
/// same connection from the quote board; stream subscriptions are forwarded to the
/// main loop together with the client's UDP target address. Every connection is
/// handled on its own thread, so a bad or stalled client only affects itself.
pub struct CommandReceiver {
    socket: TcpListener,
    board: Arc<QuoteBoard>,
    token: Option<Arc<str>>,
}

impl CommandReceiver {
    /// Bind a new TCP receiver to `bind_addr` (e.g., `0.0.0.0:8080`).
    pub fn new(bind_addr: &str, board: Arc<QuoteBoard>, token: Option<String>) -> Result<Self> {
        let socket = TcpListener::bind(bind_addr)?;
        Ok(Self {
            socket,
            board,
            token: token.map(Arc::from),
        })
    }

    /// Address the listener is bound to.
    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.socket.local_addr()?)
    }

    /// Blocking accept loop. Returns only if the listener itself fails.
    pub(crate) fn receive_loop_with_channel(self, tx: Sender<StreamRequest>) -> Result<()> {
        info!("Command TCP server is started on {}", self.socket.local_addr()?);

        for stream in self.socket.incoming() {
            match stream {
                Ok(stream) => {
                    let board = Arc::clone(&self.board);
                    let token = self.token.clone();
                    let tx = tx.clone();
                    thread::spawn(move || {
                        let peer = stream
                            .peer_addr()
                            .map(|a| a.to_string())
                            .unwrap_or_default();
                        if let Err(e) = handle_connection(stream, &board, token.as_deref(), &tx) {
                            warn!("Command from {} rejected: {}", peer, e);
                        }
                    });
                }
                Err(e) => error!("TCP connection error: {}", e),
            }
        }
        Ok(())
    }
}

fn handle_connection(
    mut stream: TcpStream,
    board: &QuoteBoard,
    token: Option<&str>,
    tx: &Sender<StreamRequest>,
) -> Result<()> {
    let client_tcp_addr = stream.peer_addr()?;
    stream.set_read_timeout(Some(READ_TIMEOUT))?;

    let mut raw = Vec::new();
    (&mut stream).take(MAX_COMMAND).read_to_end(&mut raw)?;
    let cmd: Command = serde_json::from_slice(&raw)?;
    debug!("Received command {:?} from {}", cmd.header, client_tcp_addr);

    let authorized = cmd.is_authorized(token);
    match cmd.header {
        CommandKind::Snapshot => {
            let response = match (authorized, cmd.symbols.first()) {
                (false, _) => QuoteResponse::Error {
                    message: "unauthorized".to_string(),
                },
                (true, Some(symbol)) => board.snapshot(symbol),
                (true, None) => QuoteResponse::Error {
                    message: "no symbol requested".to_string(),
                },
            };
            stream.write_all(&serde_json::to_vec(&response)?)?;
            Ok(())
        }
        CommandKind::Subscribe => {
            if !authorized {
                return Err(FeedError::Unauthorized(client_tcp_addr.to_string()));
            }
            let port: u16 = cmd
                .port
                .parse()
                .map_err(|e| FeedError::Format(format!("Invalid UDP port in command: {}", e)))?;
            let request = StreamRequest {
                target: SocketAddr::new(client_tcp_addr.ip(), port),
                symbols: cmd.symbols,
                underlyings: cmd.underlyings,
            };
            info!(
                "Subscription from {}: {} symbols, {} underlyings",
                request.target,
                request.symbols.len(),
                request.underlyings.len()
            );
            tx.send(request)
                .map_err(|e| FeedError::ChannelSend(e.to_string()))
        }
        CommandKind::Ping => {
            debug!("TCP ping from {}", client_tcp_addr);
            Ok(())
        }
    }
}
