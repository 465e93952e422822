//! Close-reason classification.
//!
//! The recovery path taken after an unexpected close depends entirely on
//! this classification, so the branching is kept in one place.

/// What a connection close means for recovery.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseClass {
    /// Another session replaced this one. Credentials must be purged
    /// before a retry has any chance of succeeding.
    Conflict,
    /// The session was invalidated server-side. Terminal: a new pairing
    /// is required, no automatic reconnect.
    LoggedOut,
    /// Anything else. Retried automatically up to the attempt bound.
    Transient,
}

impl CloseClass {
    /// Conflict is checked before logged-out: a 401 carrying a conflict
    /// reason still takes the purge-and-retry path.
    pub fn classify(reason: Option<&str>, status_code: Option<u16>) -> Self {
        if matches!(reason, Some("conflict") | Some("replaced")) {
            return Self::Conflict;
        }
        if status_code == Some(401) {
            return Self::LoggedOut;
        }
        Self::Transient
    }
}
