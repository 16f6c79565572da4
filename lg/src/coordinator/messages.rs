//! Message types for the Coordinator

use serde::Serialize;
use thiserror::Error;
use tokio::sync::oneshot;

use crate::machine::Machine;

/// Errors from talking to the Coordinator task
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CoordinatorError {
    #[error("Coordinator channel closed")]
    ChannelClosed,

    #[error("Coordinator shutdown before reply")]
    NoReply,
}

/// Internal requests to the Coordinator task
///
/// Submissions do not pass through here: handles apply them to the shared
/// machine directly.
#[derive(Debug)]
pub enum CoordRequest {
    /// Fire every due timer, then reply
    Flush { reply_tx: oneshot::Sender<()> },

    /// Get current metrics
    GetMetrics {
        reply_tx: oneshot::Sender<CoordinatorMetrics>,
    },

    /// Shutdown the coordinator
    Shutdown,
}

/// Coordinator metrics for observability
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CoordinatorMetrics {
    #[serde(rename = "requests-submitted")]
    pub requests_submitted: u64,
    #[serde(rename = "requests-deduplicated")]
    pub requests_deduplicated: u64,
    pub ticks: u64,
    pub transitions: u64,
    #[serde(rename = "idle-elided")]
    pub idle_elided: u64,
    #[serde(rename = "cancel-promotions")]
    pub cancel_promotions: u64,
    pub reattaches: u64,
    #[serde(rename = "queue-depth")]
    pub queue_depth: usize,
    pub ticking: bool,
}

impl From<&Machine> for CoordinatorMetrics {
    fn from(machine: &Machine) -> Self {
        let stats = machine.stats();
        Self {
            requests_submitted: stats.submitted,
            requests_deduplicated: stats.deduplicated,
            ticks: stats.ticks,
            transitions: stats.transitions,
            idle_elided: stats.elided,
            cancel_promotions: stats.cancel_promotions,
            reattaches: stats.reattaches,
            queue_depth: machine.queue().len(),
            ticking: machine.is_ticking(),
        }
    }
}
