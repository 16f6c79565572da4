//! Coordinator configuration

use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

/// Coordinator configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CoordinatorConfig {
    /// Tick cadence in milliseconds; also the minimum visible duration
    #[serde(rename = "min-display-ms", default = "default_min_display_ms")]
    pub min_display_ms: u64,

    /// Default delay before a busy period becomes cancelable
    #[serde(rename = "cancel-delay-ms", default = "default_cancel_delay_ms")]
    pub cancel_delay_ms: u64,
}

fn default_min_display_ms() -> u64 {
    debug!("default_min_display_ms: called");
    crate::DEFAULT_MIN_DISPLAY_MS
}

fn default_cancel_delay_ms() -> u64 {
    debug!("default_cancel_delay_ms: called");
    crate::DEFAULT_CANCEL_DELAY_MS
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        debug!("CoordinatorConfig::default: called");
        Self {
            min_display_ms: crate::DEFAULT_MIN_DISPLAY_MS,
            cancel_delay_ms: crate::DEFAULT_CANCEL_DELAY_MS,
        }
    }
}

impl CoordinatorConfig {
    /// Get the tick period as a Duration
    ///
    /// Never zero, so each tick deadline lands strictly after the last.
    pub fn min_display(&self) -> Duration {
        debug!(min_display_ms = %self.min_display_ms, "CoordinatorConfig::min_display: called");
        Duration::from_millis(self.min_display_ms.max(1))
    }

    /// Get the default cancel delay as a Duration
    pub fn cancel_delay(&self) -> Duration {
        debug!(cancel_delay_ms = %self.cancel_delay_ms, "CoordinatorConfig::cancel_delay: called");
        Duration::from_millis(self.cancel_delay_ms)
    }
}
