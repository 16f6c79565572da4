//! Requests submitted to the coordinator

use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

/// Errors from constructing a malformed request
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RequestError {
    #[error("Idle request cannot carry meta: {meta:?}")]
    IdleWithMeta { meta: String },

    #[error("Idle request cannot carry a cancel delay ({timeout_ms}ms)")]
    IdleWithTimeout { timeout_ms: u64 },
}

/// A desired visibility state
///
/// Requests are immutable values. Two requests are duplicates when they are
/// structurally equal, including the cancel delay.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "RawRequest", into = "RawRequest")]
pub enum Request {
    /// Show the busy indicator, optionally describing the work
    Busy {
        meta: Option<String>,
        /// Overrides the default cancel-eligibility delay for the busy period
        /// this request opens
        timeout: Option<Duration>,
    },

    /// Hide the busy indicator
    Idle,
}

impl Request {
    /// Validating factory for the flat `{busy, meta, timeout-ms}` form
    pub fn new(busy: bool, meta: Option<String>, timeout_ms: Option<u64>) -> Result<Self, RequestError> {
        debug!(busy, ?meta, ?timeout_ms, "Request::new: called");
        if busy {
            return Ok(Self::Busy {
                meta,
                timeout: timeout_ms.map(Duration::from_millis),
            });
        }
        if let Some(meta) = meta {
            return Err(RequestError::IdleWithMeta { meta });
        }
        if let Some(timeout_ms) = timeout_ms {
            return Err(RequestError::IdleWithTimeout { timeout_ms });
        }
        Ok(Self::Idle)
    }

    /// Busy request with a human-readable description
    pub fn busy(meta: impl Into<String>) -> Self {
        Self::Busy {
            meta: Some(meta.into()),
            timeout: None,
        }
    }

    /// Busy request without a description
    pub fn busy_unlabeled() -> Self {
        Self::Busy {
            meta: None,
            timeout: None,
        }
    }

    pub fn idle() -> Self {
        Self::Idle
    }

    /// Override the cancel-eligibility delay
    ///
    /// Fails for idle requests, which have no busy period to time.
    pub fn with_cancel_delay(self, delay: Duration) -> Result<Self, RequestError> {
        match self {
            Self::Busy { meta, .. } => Ok(Self::Busy {
                meta,
                timeout: Some(delay),
            }),
            Self::Idle => Err(RequestError::IdleWithTimeout {
                timeout_ms: duration_ms(delay),
            }),
        }
    }

    pub fn is_busy(&self) -> bool {
        matches!(self, Self::Busy { .. })
    }

    pub fn meta(&self) -> Option<&str> {
        match self {
            Self::Busy { meta, .. } => meta.as_deref(),
            Self::Idle => None,
        }
    }

    pub fn timeout(&self) -> Option<Duration> {
        match self {
            Self::Busy { timeout, .. } => *timeout,
            Self::Idle => None,
        }
    }
}

/// Whole milliseconds in `duration`, saturating at `u64::MAX`
pub(crate) fn duration_ms(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

/// Flat request form used by scripts and serialization
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawRequest {
    pub busy: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub meta: Option<String>,

    #[serde(rename = "timeout-ms", default, skip_serializing_if = "Option::is_none")]
    pub timeout_ms: Option<u64>,
}

impl TryFrom<RawRequest> for Request {
    type Error = RequestError;

    fn try_from(raw: RawRequest) -> Result<Self, Self::Error> {
        Request::new(raw.busy, raw.meta, raw.timeout_ms)
    }
}

impl From<Request> for RawRequest {
    fn from(request: Request) -> Self {
        match request {
            Request::Busy { meta, timeout } => RawRequest {
                busy: true,
                meta,
                timeout_ms: timeout.map(duration_ms),
            },
            Request::Idle => RawRequest::default(),
        }
    }
}
