//! Connection state machine states.

use serde::{Deserialize, Serialize};

/// State of the provider connection.
///
/// Mutated only by the lifecycle manager's event handlers; everyone else
/// reads copies. `Failed` is terminal for automatic recovery: reaching it
/// means the reconnect budget is spent and only an explicit force-reconnect
/// restarts the machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    /// No connection requested.
    Idle,
    /// Adapter handshake in progress.
    Connecting,
    /// Connected transport, waiting for the pairing code to be scanned.
    AwaitingPairing,
    /// Fully connected; sends are allowed.
    Connected,
    /// Unexpectedly closed, retry scheduled.
    Reconnecting,
    /// Closed without a pending retry (logged out or explicit disconnect).
    Disconnected,
    /// Reconnect attempts exhausted.
    Failed,
}

impl ConnectionState {
    /// Whether a connection attempt is already underway or established,
    /// i.e. a connect request should only register the subscriber.
    pub fn is_active(self) -> bool {
        matches!(
            self,
            Self::Connecting | Self::AwaitingPairing | Self::Connected | Self::Reconnecting
        )
    }
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Idle => "idle",
            Self::Connecting => "connecting",
            Self::AwaitingPairing => "awaiting_pairing",
            Self::Connected => "connected",
            Self::Reconnecting => "reconnecting",
            Self::Disconnected => "disconnected",
            Self::Failed => "failed",
        };
        f.write_str(s)
    }
}
