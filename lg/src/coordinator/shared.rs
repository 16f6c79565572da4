//! Machine and timer deadlines shared by handles and the Coordinator task
//!
//! Handles feed submissions straight into the machine under the lock, so a
//! quiet coordinator shows the first request before `submit` returns. The
//! Coordinator task only waits for the next deadline and fires it.

use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::sync::{Notify, watch};
use tokio::time::Instant;
use tracing::debug;

use super::config::CoordinatorConfig;
use super::messages::CoordinatorMetrics;
use crate::machine::{Event, Machine, TimerCommand};
use crate::state::VisibleState;

/// Internal state protected by mutex
struct SharedInner {
    machine: Machine,

    tick_period: Duration,

    /// When the periodic tick fires next, if it is running
    next_tick: Option<Instant>,

    /// Busy period and deadline of the armed cancel-eligibility timer
    cancel_at: Option<(u64, Instant)>,
}

impl SharedInner {
    fn next_deadline(&self) -> Option<Instant> {
        let cancel = self.cancel_at.map(|(_, at)| at);
        match (self.next_tick, cancel) {
            (Some(tick), Some(cancel)) => Some(tick.min(cancel)),
            (tick, cancel) => tick.or(cancel),
        }
    }
}

pub(crate) struct Shared {
    inner: Mutex<SharedInner>,
    state_tx: watch::Sender<VisibleState>,
    /// Wakes the Coordinator task when a deadline moves
    notify: Notify,
}

impl Shared {
    pub fn new(config: &CoordinatorConfig) -> Self {
        debug!(?config, "Shared::new: called");
        let (state_tx, _) = watch::channel(VisibleState::idle());
        Self {
            inner: Mutex::new(SharedInner {
                machine: Machine::new(config.cancel_delay()),
                tick_period: config.min_display(),
                next_tick: None,
                cancel_at: None,
            }),
            state_tx,
            notify: Notify::new(),
        }
    }

    pub fn subscribe(&self) -> watch::Receiver<VisibleState> {
        self.state_tx.subscribe()
    }

    /// Feed a caller event into the machine and publish the result
    pub fn handle(&self, event: Event) {
        let mut inner = self.lock();
        if self.apply(&mut inner, event, Instant::now()) {
            self.notify.notify_one();
        }
    }

    /// Fire every timer due at `now`, in deadline order
    ///
    /// Returns the next deadline, or None when no timer is running.
    pub fn fire_due(&self, now: Instant) -> Option<Instant> {
        let mut inner = self.lock();
        loop {
            let tick_due = inner.next_tick.filter(|at| *at <= now);
            let cancel_due = inner.cancel_at.filter(|(_, at)| *at <= now);
            let event = match (tick_due, cancel_due) {
                (Some(tick), Some((period, at))) if at <= tick => {
                    inner.cancel_at = None;
                    Event::CancelWindowElapsed { period }
                }
                (Some(_), _) => {
                    inner.next_tick = Some(now + inner.tick_period);
                    Event::Tick
                }
                (None, Some((period, _))) => {
                    inner.cancel_at = None;
                    Event::CancelWindowElapsed { period }
                }
                (None, None) => break,
            };
            self.apply(&mut inner, event, now);
        }
        inner.next_deadline()
    }

    /// Wait until a handle moves a deadline
    pub async fn rearmed(&self) {
        self.notify.notified().await;
    }

    pub fn metrics(&self) -> CoordinatorMetrics {
        CoordinatorMetrics::from(&self.lock().machine)
    }

    /// Returns true if a timer deadline changed
    fn apply(&self, inner: &mut SharedInner, event: Event, now: Instant) -> bool {
        let outcome = inner.machine.handle(event);
        let rearmed = !outcome.commands.is_empty();
        for command in outcome.commands {
            match command {
                TimerCommand::StartTicker => inner.next_tick = Some(now + inner.tick_period),
                TimerCommand::StopTicker => inner.next_tick = None,
                TimerCommand::ArmCancelWindow { period, delay } => inner.cancel_at = Some((period, now + delay)),
                TimerCommand::DisarmCancelWindow => inner.cancel_at = None,
            }
        }
        if outcome.changed {
            self.state_tx.send_replace(inner.machine.state().clone());
        }
        rearmed
    }

    fn lock(&self) -> MutexGuard<'_, SharedInner> {
        // The machine never panics mid-update, so a poisoned lock still holds consistent state
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
