//! LoadGate - flicker-free busy indicator coordination
//!
//! Many independent operations (page loads, form submits, background refreshes)
//! want to show "something is in progress". LoadGate arbitrates those overlapping
//! signals into a single visible busy state that never flickers idle between two
//! busy periods and that becomes cancelable only after a bounded delay.
//!
//! # Architecture
//!
//! ```text
//!   caller ──submit(Request)──► CoordinatorHandle
//!                                      │ lock
//!                                      ▼
//!                    Machine::handle(Event)  ◄── Tick / CancelWindowElapsed ──┐
//!                    (PendingQueue +                                          │
//!                     VisibleState)  ──── TimerCommand ──► deadlines ──► Coordinator task
//!                                      │                                 (sleep_until)
//!                                      ▼
//!                    watch::Sender<VisibleState> ──► UI subscribers
//! ```
//!
//! The [`Machine`] is a pure state machine: every input, including timer
//! firings, enters through [`Machine::handle`], and timer side effects come back
//! out as [`TimerCommand`] values, so tests can drive it with a virtual clock.
//! Handles feed submissions into a shared machine directly, which lets a quiet
//! coordinator show a request before `submit` returns. The [`Coordinator`] task
//! turns the timer commands into `tokio::time` deadlines and fires them.
//!
//! # Example
//!
//! ```ignore
//! use loadgate::{Coordinator, CoordinatorConfig};
//!
//! let (handle, task) = Coordinator::spawn(CoordinatorConfig::default());
//! let guard = handle.begin("Loading accounts")?;
//! fetch_accounts().await;
//! drop(guard); // submits the matching idle request
//! ```
//!
//! # Modules
//!
//! - [`request`] - Request values and their validating factory
//! - [`queue`] - Deduplicating pending queue
//! - [`state`] - Visible state snapshot
//! - [`machine`] - Pure coordinator state machine
//! - [`coordinator`] - Timer task, handle and guard
//! - [`script`] - Timed request scripts and replay
//! - [`config`] - Configuration types and loading
//! - [`cli`] - Command-line interface

pub mod cli;
pub mod config;
pub mod coordinator;
pub mod machine;
pub mod queue;
pub mod request;
pub mod script;
pub mod state;

pub use config::Config;
pub use coordinator::{
    BusyGuard, CoordRequest, Coordinator, CoordinatorConfig, CoordinatorError, CoordinatorHandle, CoordinatorMetrics,
};
pub use machine::{Event, Machine, Outcome, TimerCommand, TransitionStats};
pub use queue::PendingQueue;
pub use request::{RawRequest, Request, RequestError};
pub use script::{ReplayReport, Script, ScriptStep, Transition, replay};
pub use state::VisibleState;

/// Default tick cadence, which is also the minimum visible duration (300ms)
pub const DEFAULT_MIN_DISPLAY_MS: u64 = 300;

/// Default delay before a busy period becomes cancelable (5s)
pub const DEFAULT_CANCEL_DELAY_MS: u64 = 5_000;
