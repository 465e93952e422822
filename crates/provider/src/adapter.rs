//! Messaging provider capability traits and event stream.

use std::sync::Arc;

use {anyhow::Result, async_trait::async_trait, tokio::sync::mpsc};

use crate::types::FilePayload;

/// Events emitted by a live provider connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProviderEvent {
    /// A pairing code (QR) a client must scan to authorize the session.
    PairingCode { code: String },
    /// The connection handshake completed.
    ConnectionOpened,
    /// The connection closed. `reason` and `status_code` feed
    /// [`crate::CloseClass::classify`].
    ConnectionClosed {
        reason: Option<String>,
        status_code: Option<u16>,
    },
    /// The provider acknowledged a send to `recipient`.
    SendAck { recipient: String },
    /// The provider rejected a send to `recipient`.
    SendFailed { recipient: String, error: String },
}

/// Opens provider connections.
///
/// Every (re)connect builds a fresh handle; the previous one is torn down
/// by the caller first. Events for the new connection flow through the
/// supplied channel.
#[async_trait]
pub trait ProviderConnector: Send + Sync {
    async fn connect(&self, events: mpsc::Sender<ProviderEvent>) -> Result<Arc<dyn ProviderHandle>>;
}

/// A live provider connection.
#[async_trait]
pub trait ProviderHandle: Send + Sync {
    /// Fire a send request. The acknowledgment arrives later as a
    /// [`ProviderEvent::SendAck`] / [`ProviderEvent::SendFailed`] keyed by
    /// recipient.
    async fn send_document(
        &self,
        recipient: &str,
        body: &str,
        attachment: Option<&FilePayload>,
    ) -> Result<()>;

    /// Best-effort check that the recipient is reachable on the provider.
    async fn recipient_exists(&self, recipient: &str) -> Result<bool>;

    /// Tear down the connection.
    async fn disconnect(&self);
}
