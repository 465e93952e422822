//! Bulk dispatch orchestration for the despacho dispatch system.
//!
//! Sequences one send at a time over the lifecycle manager's connection:
//! upload, templated message, acknowledgment wait, result ledger, and a
//! rate-limit cooldown between items.

pub mod config;
pub mod error;
pub mod roster;
pub mod runner;
pub mod template;
pub mod types;

pub use {
    config::{DispatchConfig, StartMode},
    error::{Error, Result},
    roster::{CodedFile, prepare_items},
    runner::{BulkDispatcher, PreparedRun},
    template::render_message,
    types::{DispatchItem, DispatchOutcome, DispatchResult, RunSummary},
};
