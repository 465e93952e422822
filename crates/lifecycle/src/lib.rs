//! Connection lifecycle management for the despacho dispatch system.
//!
//! Owns the provider connection: interprets its event stream into a small
//! state machine, drives bounded automatic reconnection, tracks the current
//! pairing code for late subscribers, and fans lifecycle events out to
//! registered observers.

pub mod error;
pub mod event;
pub mod manager;
pub mod pending;
pub mod registry;
pub mod state;

pub use {
    error::{Error, Result},
    event::LifecycleEvent,
    manager::{LifecycleManager, ReconnectPolicy},
    pending::{PendingSends, SendOutcome},
    registry::SubscriberRegistry,
    state::ConnectionState,
};
