//! Data types for a bulk dispatch run.

use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

use despacho_provider::FilePayload;

/// One recipient+payload unit of a bulk run. Immutable once constructed.
#[derive(Debug, Clone, PartialEq)]
pub struct DispatchItem {
    /// Provider-facing phone identifier.
    pub recipient: String,
    pub display_name: String,
    /// Document code used for lookup and message templating.
    pub code: String,
    /// Local payload to upload before the send, if any.
    pub file: Option<FilePayload>,
}

impl DispatchItem {
    /// Item without an attached payload (text-only message).
    pub fn text_only(
        recipient: impl Into<String>,
        display_name: impl Into<String>,
        code: impl Into<String>,
    ) -> Self {
        Self {
            recipient: recipient.into(),
            display_name: display_name.into(),
            code: code.into(),
            file: None,
        }
    }
}

/// Outcome of dispatching one item.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchOutcome {
    Sent,
    Failed { detail: String },
}

impl DispatchOutcome {
    pub fn is_sent(&self) -> bool {
        matches!(self, Self::Sent)
    }
}

/// One entry in the run's result ledger.
#[derive(Debug, Clone, PartialEq)]
pub struct DispatchResult {
    pub item: DispatchItem,
    pub outcome: DispatchOutcome,
    pub completed_at_ms: u64,
}

/// Aggregate summary of a finished (or cancelled) run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunSummary {
    pub total: usize,
    pub sent: usize,
    pub failed: usize,
    pub cancelled: bool,
}

pub(crate) fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}
