//! Connection status of the push channel.

use serde::{Deserialize, Serialize};
use strum_macros::{Display, EnumString};

/// Health of the streaming transport as observed by consumers.
///
/// Only transports push transitions; everybody else reads.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum ConnectionStatus {
    /// No session is open.
    #[default]
    Disconnected,
    /// A session is being established.
    Connecting,
    /// Events are flowing.
    Connected,
    /// The session failed; recovery goes through `reconnect`.
    Error,
}

impl ConnectionStatus {
    /// Whether the transport currently has a live session.
    pub fn is_connected(self) -> bool {
        matches!(self, ConnectionStatus::Connected)
    }
}
