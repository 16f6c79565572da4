//! Coordinator for the busy indicator
//!
//! The pending queue and the visible state live in one machine shared by every
//! [`CoordinatorHandle`]; the Coordinator task only fires its timers. Callers
//! use the handle to:
//! - **Submit:** enqueue a busy or idle request (never awaits; a quiet
//!   coordinator applies it before returning)
//! - **Subscribe:** watch the visible state
//! - **Reattach:** drop pending requests when the owning context changes

mod config;
mod core;
mod handle;
mod messages;
mod shared;

pub use config::CoordinatorConfig;
pub use core::Coordinator;
pub use handle::{BusyGuard, CoordinatorHandle};
pub use messages::{CoordRequest, CoordinatorError, CoordinatorMetrics};
