//! Visible state consumed by the UI

use std::fmt;

use serde::{Deserialize, Serialize};

/// The externally observable busy indicator state
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VisibleState {
    pub busy: bool,

    /// Cleared whenever `busy` becomes false
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub meta: Option<String>,

    /// Advisory: the UI may offer cancellation. Always false while idle.
    pub cancelable: bool,
}

impl VisibleState {
    pub fn idle() -> Self {
        Self::default()
    }

    pub fn is_idle(&self) -> bool {
        !self.busy
    }
}

impl fmt::Display for VisibleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if !self.busy {
            return write!(f, "idle");
        }
        write!(f, "busy")?;
        if let Some(meta) = &self.meta {
            write!(f, " [{}]", meta)?;
        }
        if self.cancelable {
            write!(f, " (cancelable)")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_initial_state_is_idle() {
        let state = VisibleState::default();
        assert!(state.is_idle());
        assert!(state.meta.is_none());
        assert!(!state.cancelable);
    }

    #[test]
    fn test_display() {
        assert_eq!(VisibleState::idle().to_string(), "idle");
        let state = VisibleState {
            busy: true,
            meta: Some("Loading A".to_string()),
            cancelable: true,
        };
        assert_eq!(state.to_string(), "busy [Loading A] (cancelable)");
    }
}
