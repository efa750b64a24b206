//! Shared protocol command type used by the consumer and the feed server.
//!
//! A `Command` is sent as JSON over the TCP command port. It is either a stream
//! subscription (`J_QUOTE`) listing symbols and option-chain underlyings, a one-shot
//! snapshot request (`SNAPSHOT`) for a single symbol, or a keep-alive `PING`.
use std::net::SocketAddr;

use serde::{Deserialize, Serialize};
use strum_macros::{Display, EnumString};

/// Transport kind used for the data stream.
/// Keep the lowercase to match the existing consumer value.
pub const CONNECTION: &str = "udp";

/// Kind of command, carried in the `header` field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, EnumString)]
pub enum CommandKind {
    /// Open a push stream for the listed symbols and underlyings.
    #[serde(rename = "J_QUOTE")]
    #[strum(serialize = "J_QUOTE")]
    Subscribe,
    /// Answer one `QuoteResponse` for the first listed symbol on the same connection.
    #[serde(rename = "SNAPSHOT")]
    #[strum(serialize = "SNAPSHOT")]
    Snapshot,
    /// Keep-alive.
    #[serde(rename = "PING")]
    #[strum(serialize = "PING")]
    Ping,
}

/// Command payload sent from a consumer to the feed server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Command {
    /// Command kind.
    pub header: CommandKind,
    /// Transport protocol name (e.g., `udp`).
    pub connection: String,
    /// Address the consumer receives datagrams on.
    pub address: String,
    /// Port as a string.
    pub port: String,
    /// Quote symbols of interest.
    #[serde(default)]
    pub symbols: Vec<String>,
    /// Underlyings whose option chains are of interest.
    #[serde(default)]
    pub underlyings: Vec<String>,
    /// Bearer token, when the consumer has one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
}

impl Command {
    /// Creates a new subscription (`J_QUOTE`) command.
    pub fn subscribe(
        address: &str,
        port: &str,
        symbols: Vec<String>,
        underlyings: Vec<String>,
    ) -> Self {
        Command {
            header: CommandKind::Subscribe,
            connection: String::from(CONNECTION),
            address: String::from(address),
            port: String::from(port),
            symbols,
            underlyings,
            token: None,
        }
    }

    /// Creates a snapshot request for one symbol. No data stream is opened, so the
    /// address fields stay empty.
    pub fn snapshot(symbol: &str) -> Self {
        Command {
            header: CommandKind::Snapshot,
            connection: String::from(CONNECTION),
            address: String::new(),
            port: String::new(),
            symbols: vec![symbol.to_string()],
            underlyings: Vec::new(),
            token: None,
        }
    }

    /// Attach a bearer token.
    pub fn with_token(mut self, token: Option<String>) -> Self {
        self.token = token;
        self
    }

    /// Build UDP socket address from the fields.
    pub fn udp_addr(&self) -> Result<SocketAddr, std::net::AddrParseError> {
        format!("{}:{}", self.address, self.port).parse()
    }

    /// Whether the command carries `expected`, or no token is required.
    pub fn is_authorized(&self, expected: Option<&str>) -> bool {
        match expected {
            None => true,
            Some(expected) => self.token.as_deref() == Some(expected),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_uses_protocol_names() {
        let cmd = Command::subscribe("127.0.0.1", "5000", vec!["AAPL".into()], Vec::new());
        let json = serde_json::to_value(&cmd).unwrap();
        assert_eq!(json["header"], "J_QUOTE");
        assert!(json.get("token").is_none());
        assert_eq!(CommandKind::Snapshot.to_string(), "SNAPSHOT");
    }

    #[test]
    fn token_check() {
        let cmd = Command::snapshot("AAPL").with_token(Some("secret".into()));
        assert!(cmd.is_authorized(None));
        assert!(cmd.is_authorized(Some("secret")));
        assert!(!cmd.is_authorized(Some("other")));
        assert!(!Command::snapshot("AAPL").is_authorized(Some("secret")));
    }

    #[test]
    fn udp_addr_from_fields() {
        let cmd = Command::subscribe("10.0.0.2", "6000", Vec::new(), Vec::new());
        assert_eq!(cmd.udp_addr().unwrap().port(), 6000);
    }
}
