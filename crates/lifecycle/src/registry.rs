//! Subscriber fan-out.

use std::collections::HashMap;

use {
    tokio::sync::mpsc,
    tracing::{debug, warn},
};

use crate::event::LifecycleEvent;

/// Registered observers of lifecycle events.
///
/// Delivery is fire-and-forget per subscriber: `try_send` never blocks, and
/// a sink that cannot accept (closed or full) is dropped from the registry
/// so one bad subscriber never stalls the rest.
#[derive(Default)]
pub struct SubscriberRegistry {
    sinks: HashMap<String, mpsc::Sender<LifecycleEvent>>,
}

impl SubscriberRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, id: impl Into<String>, sink: mpsc::Sender<LifecycleEvent>) {
        let id = id.into();
        debug!(subscriber = %id, "subscriber registered");
        self.sinks.insert(id, sink);
    }

    pub fn unregister(&mut self, id: &str) {
        if self.sinks.remove(id).is_some() {
            debug!(subscriber = id, "subscriber unregistered");
        }
    }

    pub fn len(&self) -> usize {
        self.sinks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sinks.is_empty()
    }

    /// Deliver to a single subscriber, removing it on failure.
    pub fn deliver(&mut self, id: &str, event: LifecycleEvent) {
        let failed = match self.sinks.get(id) {
            Some(sink) => sink.try_send(event).is_err(),
            None => false,
        };
        if failed {
            warn!(subscriber = id, "subscriber sink rejected delivery, removing");
            self.sinks.remove(id);
        }
    }

    /// Fan an event out to every subscriber. Returns how many received it;
    /// subscribers whose sink fails are removed. No ordering guarantee.
    pub fn broadcast(&mut self, event: &LifecycleEvent) -> usize {
        let mut delivered = 0;
        let mut dead = Vec::new();
        for (id, sink) in &self.sinks {
            match sink.try_send(event.clone()) {
                Ok(()) => delivered += 1,
                Err(e) => {
                    warn!(subscriber = %id, error = %e, "subscriber sink failed, removing");
                    dead.push(id.clone());
                },
            }
        }
        for id in dead {
            self.sinks.remove(&id);
        }
        delivered
    }
}
