//! Shared networking constants and helpers used by the consumer and the feed server.

use std::time::Duration;

/// TCP port for the command channel (consumer -> server).
pub const COMMAND_PORT: u16 = 8080;
/// UDP port for data streaming and pings (server <-> consumer).
pub const DATA_PORT: u16 = 8081;
/// A consumer silent for longer than this has its stream closed by the server.
pub const PING_TIMEOUT: Duration = Duration::from_secs(5);
/// How often a consumer sends `PING` datagrams.
pub const PING_INTERVAL: Duration = Duration::from_millis(2000);
/// Largest datagram either side expects to read.
pub const MAX_DATAGRAM: usize = 8192;
/// Keep-alive payload.
pub const PING_PAYLOAD: &[u8] = b"PING";

/// Helper to format an address with a port like "ip:port".
pub fn addr(ip: &str, port: u16) -> String {
    format!("{}:{}", ip, port)
}
