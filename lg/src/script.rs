//! Timed request scripts and replay against a live coordinator
//!
//! A script is a YAML list of requests with submission offsets:
//!
//! ```yaml
//! hold-ms: 700
//! steps:
//!   - at-ms: 0
//!     busy: true
//!     meta: Loading A
//!   - at-ms: 10
//!     busy: false
//!   - at-ms: 20
//!     busy: true
//!     meta: Loading B
//!     timeout-ms: 100
//! ```

use std::path::Path;
use std::time::Duration;

use eyre::{Context, Result, eyre};
use serde::{Deserialize, Serialize};
use tokio::time::Instant;
use tracing::{debug, info};

use crate::coordinator::{Coordinator, CoordinatorConfig, CoordinatorMetrics};
use crate::request::{RawRequest, Request, duration_ms};
use crate::state::VisibleState;

/// A timed sequence of requests
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Script {
    pub steps: Vec<ScriptStep>,

    /// How long to keep observing after the last step
    #[serde(rename = "hold-ms", default)]
    pub hold_ms: u64,
}

/// One request and when to submit it, relative to replay start
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScriptStep {
    #[serde(rename = "at-ms")]
    pub at_ms: u64,

    #[serde(flatten)]
    pub request: RawRequest,
}

impl ScriptStep {
    fn new(at_ms: u64, request: Request) -> Self {
        Self {
            at_ms,
            request: request.into(),
        }
    }
}

impl Script {
    /// Load a script from a YAML file
    pub fn load(path: &Path) -> Result<Self> {
        debug!(path = %path.display(), "Script::load: called");
        let content = std::fs::read_to_string(path).context(format!("Failed to read script {}", path.display()))?;
        Self::from_yaml(&content)
    }

    pub fn from_yaml(content: &str) -> Result<Self> {
        serde_yaml::from_str(content).context("Failed to parse script")
    }

    /// Validate every step into a request
    ///
    /// Steps must be ordered by `at-ms`.
    pub fn requests(&self) -> Result<Vec<(Duration, Request)>> {
        let mut previous = 0;
        let mut requests = Vec::with_capacity(self.steps.len());
        for (index, step) in self.steps.iter().enumerate() {
            if step.at_ms < previous {
                return Err(eyre!(
                    "Step {} at {}ms is earlier than the step before it ({}ms)",
                    index,
                    step.at_ms,
                    previous
                ));
            }
            previous = step.at_ms;
            let request = Request::try_from(step.request.clone()).context(format!("Invalid step {}", index))?;
            requests.push((Duration::from_millis(step.at_ms), request));
        }
        Ok(requests)
    }

    /// Busy, idle and busy again within one tick: the idle must never show
    pub fn anti_flicker() -> Self {
        Self {
            steps: vec![
                ScriptStep::new(0, Request::busy("Loading A")),
                ScriptStep::new(10, Request::idle()),
                ScriptStep::new(20, Request::busy("Loading B")),
                ScriptStep::new(400, Request::idle()),
            ],
            hold_ms: 700,
        }
    }

    /// A busy period long enough to become cancelable
    pub fn cancel_window() -> Self {
        let uploading = Request::Busy {
            meta: Some("Uploading".to_string()),
            timeout: Some(Duration::from_millis(400)),
        };
        Self {
            steps: vec![
                ScriptStep::new(0, uploading),
                ScriptStep::new(50, Request::busy("Uploading 50%")),
                ScriptStep::new(650, Request::idle()),
            ],
            hold_ms: 700,
        }
    }
}

/// A visible state observed during replay
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Transition {
    #[serde(rename = "elapsed-ms")]
    pub elapsed_ms: u64,

    #[serde(flatten)]
    pub state: VisibleState,
}

/// Everything observed while replaying a script
#[derive(Debug, Clone, Serialize)]
pub struct ReplayReport {
    /// Published states in order; a subscriber may see bursts coalesced
    pub transitions: Vec<Transition>,

    #[serde(rename = "final-state")]
    pub final_state: VisibleState,

    pub metrics: CoordinatorMetrics,
}

/// Replay a script against a fresh coordinator
pub async fn replay(script: &Script, config: &CoordinatorConfig) -> Result<ReplayReport> {
    let steps = script.requests()?;
    info!(steps = steps.len(), hold_ms = script.hold_ms, "Replaying script");

    let (handle, task) = Coordinator::spawn(config.clone());
    let mut state_rx = handle.subscribe();
    let start = Instant::now();

    let recorder = tokio::spawn(async move {
        let mut transitions = Vec::new();
        while state_rx.changed().await.is_ok() {
            let state = state_rx.borrow_and_update().clone();
            transitions.push(Transition {
                elapsed_ms: duration_ms(start.elapsed()),
                state,
            });
        }
        transitions
    });

    let mut last_at = Duration::ZERO;
    for (at, request) in steps {
        tokio::time::sleep_until(start + at).await;
        debug!(?at, ?request, "replay: submitting");
        handle.submit(request)?;
        last_at = at;
    }
    tokio::time::sleep_until(start + last_at + Duration::from_millis(script.hold_ms)).await;

    handle.flush().await?;
    let metrics = handle.metrics().await?;
    let final_state = handle.current_state();
    handle.shutdown()?;
    task.await.context("Coordinator task failed")?;
    // The recorder stops once the last handle releases the state sender
    drop(handle);
    let transitions = recorder.await.context("Recorder task failed")?;

    Ok(ReplayReport {
        transitions,
        final_state,
        metrics,
    })
}
