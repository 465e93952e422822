//! One-shot correlation of send requests with provider acknowledgments.
//!
//! A send is acknowledged asynchronously by a provider event keyed on the
//! recipient. Each in-flight send registers exactly one pending entry; the
//! event pump resolves it, and the entry is removed on resolution, timeout,
//! or abandonment. A oneshot channel guarantees at most one resolution.

use std::{collections::HashMap, sync::Mutex};

use {tokio::sync::oneshot, tracing::debug};

use crate::error::Error;

/// How the provider answered a send request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SendOutcome {
    Acked,
    Rejected(String),
}

/// Pending send acknowledgments keyed by recipient.
#[derive(Default)]
pub struct PendingSends {
    inner: Mutex<HashMap<String, oneshot::Sender<SendOutcome>>>,
}

impl PendingSends {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a pending send. Sends are single-flight per recipient.
    pub fn register(&self, recipient: &str) -> Result<oneshot::Receiver<SendOutcome>, Error> {
        let mut inner = self.inner.lock().unwrap();
        if inner.contains_key(recipient) {
            return Err(Error::DuplicateInFlight {
                recipient: recipient.to_string(),
            });
        }
        let (tx, rx) = oneshot::channel();
        inner.insert(recipient.to_string(), tx);
        Ok(rx)
    }

    /// Resolve the pending send for `recipient`, if any. The entry is
    /// removed either way; returns whether something was pending.
    pub fn resolve(&self, recipient: &str, outcome: SendOutcome) -> bool {
        match self.inner.lock().unwrap().remove(recipient) {
            Some(tx) => {
                // The waiter may have timed out already; that is fine.
                let _ = tx.send(outcome);
                true
            },
            None => {
                debug!(recipient, "ack for a send that is no longer pending");
                false
            },
        }
    }

    /// Drop the pending entry without resolving (timeout or abandoned wait).
    pub fn remove(&self, recipient: &str) {
        self.inner.lock().unwrap().remove(recipient);
    }

    /// Reject every pending send, e.g. when the connection is torn down.
    pub fn fail_all(&self, detail: &str) {
        let drained: Vec<_> = self.inner.lock().unwrap().drain().collect();
        for (_, tx) in drained {
            let _ = tx.send(SendOutcome::Rejected(detail.to_string()));
        }
    }

    pub fn len(&self) -> usize {
        self.inner.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
