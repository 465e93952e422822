//! Dispatch run configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Lower bound for the inter-send cooldown.
pub const MIN_COOLDOWN_SECS: u64 = 5;
/// Upper bound for the inter-send cooldown.
pub const MAX_COOLDOWN_SECS: u64 = 300;

/// Whether a prepared run starts by itself or waits for an explicit
/// trigger.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StartMode {
    /// Prepare the item list, wait for an explicit start. The safer
    /// production default.
    #[default]
    Manual,
    /// Start dispatching as soon as recipient lookup completes.
    OnPrepare,
}

/// Configuration for bulk runs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatchConfig {
    /// Seconds to wait between consecutive sends. Clamped to
    /// [`MIN_COOLDOWN_SECS`]..=[`MAX_COOLDOWN_SECS`] when applied.
    pub cooldown_secs: u64,
    /// Bound on each payload upload.
    pub upload_timeout_secs: u64,
    /// Bound on each send acknowledgment wait.
    pub send_timeout_secs: u64,
    pub start_mode: StartMode,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            cooldown_secs: 120,
            upload_timeout_secs: 30,
            send_timeout_secs: 45,
            start_mode: StartMode::Manual,
        }
    }
}

impl DispatchConfig {
    /// Cooldown with the configured value clamped into the allowed range.
    pub fn cooldown(&self) -> Duration {
        Duration::from_secs(self.cooldown_secs.clamp(MIN_COOLDOWN_SECS, MAX_COOLDOWN_SECS))
    }

    pub(crate) fn timing(&self) -> DispatchTiming {
        DispatchTiming {
            cooldown: self.cooldown(),
            upload_timeout: Duration::from_secs(self.upload_timeout_secs),
            send_timeout: Duration::from_secs(self.send_timeout_secs),
        }
    }
}

/// Resolved durations used by the runner.
#[derive(Debug, Clone, Copy)]
pub(crate) struct DispatchTiming {
    pub cooldown: Duration,
    pub upload_timeout: Duration,
    pub send_timeout: Duration,
}
