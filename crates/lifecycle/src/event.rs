//! Observer-facing lifecycle events.

use serde::Serialize;

use crate::state::ConnectionState;

/// Events fanned out to registered subscribers (UI sessions and the like).
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum LifecycleEvent {
    /// Connection status transition or progress note.
    Status {
        state: ConnectionState,
        message: String,
    },
    /// A pairing code the operator must scan.
    PairingCode { code: String },
    /// A bulk-run item was delivered.
    ItemDispatched { recipient: String },
    /// A bulk-run item failed.
    ItemFailed { recipient: String, detail: String },
}

impl LifecycleEvent {
    pub fn status(state: ConnectionState, message: impl Into<String>) -> Self {
        Self::Status {
            state,
            message: message.into(),
        }
    }
}
