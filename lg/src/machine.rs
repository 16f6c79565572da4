//! Coordinator state machine
//!
//! The machine owns the pending queue and the visible state. It performs no I/O
//! and reads no clock: caller submissions and timer firings both arrive as
//! [`Event`]s through [`Machine::handle`], and timer side effects are returned
//! as [`TimerCommand`]s for the driver to execute.

use std::time::Duration;

use serde::Serialize;
use tracing::{debug, info};

use crate::queue::PendingQueue;
use crate::request::Request;
use crate::state::VisibleState;

/// Inputs to the machine
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    /// A caller submitted a request
    Submit(Request),

    /// The periodic tick timer fired
    Tick,

    /// The cancel-eligibility timer armed for `period` fired
    CancelWindowElapsed { period: u64 },

    /// The coordinator moved to a new owning context
    Reattach,
}

/// Timer side effects requested by the machine
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TimerCommand {
    /// Start the periodic tick; the first tick is due one period from now
    StartTicker,

    StopTicker,

    /// Start (or restart) the one-shot cancel-eligibility timer
    ArmCancelWindow { period: u64, delay: Duration },

    DisarmCancelWindow,
}

/// Result of handling one event
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Outcome {
    pub commands: Vec<TimerCommand>,

    /// True if the visible state changed
    pub changed: bool,
}

/// Counters kept by the machine
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct TransitionStats {
    pub submitted: u64,
    pub deduplicated: u64,
    pub ticks: u64,
    pub transitions: u64,
    /// Idle requests superseded by the skip-ahead rule
    pub elided: u64,
    pub cancel_promotions: u64,
    pub reattaches: u64,
}

/// Single authority over the visible state
#[derive(Debug)]
pub struct Machine {
    default_cancel_delay: Duration,
    queue: PendingQueue,
    state: VisibleState,
    ticking: bool,
    /// Sequence number of the current (or last) busy period
    period: u64,
    cancel_armed: bool,
    stats: TransitionStats,
}

impl Machine {
    pub fn new(default_cancel_delay: Duration) -> Self {
        debug!(?default_cancel_delay, "Machine::new: called");
        Self {
            default_cancel_delay,
            queue: PendingQueue::new(),
            state: VisibleState::idle(),
            ticking: false,
            period: 0,
            cancel_armed: false,
            stats: TransitionStats::default(),
        }
    }

    /// Feed one event into the machine
    pub fn handle(&mut self, event: Event) -> Outcome {
        debug!(?event, "Machine::handle: called");
        match event {
            Event::Submit(request) => self.submit(request),
            Event::Tick => self.tick(),
            Event::CancelWindowElapsed { period } => self.promote_cancelable(period),
            Event::Reattach => self.reattach(),
        }
    }

    pub fn state(&self) -> &VisibleState {
        &self.state
    }

    pub fn queue(&self) -> &PendingQueue {
        &self.queue
    }

    pub fn is_ticking(&self) -> bool {
        self.ticking
    }

    pub fn busy_period(&self) -> u64 {
        self.period
    }

    pub fn stats(&self) -> &TransitionStats {
        &self.stats
    }

    fn submit(&mut self, request: Request) -> Outcome {
        self.stats.submitted += 1;
        if !self.queue.push(request) {
            self.stats.deduplicated += 1;
            return Outcome::default();
        }
        if self.ticking {
            return Outcome::default();
        }

        // Quiet coordinator: apply right away instead of waiting a full tick
        debug!("Machine::submit: quiet, running immediate tick");
        let mut outcome = self.tick();
        if self.state.busy || !self.queue.is_empty() {
            self.ticking = true;
            outcome.commands.push(TimerCommand::StartTicker);
        }
        outcome
    }

    fn tick(&mut self) -> Outcome {
        self.stats.ticks += 1;
        let mut outcome = Outcome::default();

        let Some(head) = self.queue.pop() else {
            if self.ticking && !self.state.busy {
                debug!("Machine::tick: drained and idle, stopping ticker");
                self.ticking = false;
                outcome.commands.push(TimerCommand::StopTicker);
            }
            return outcome;
        };

        match head {
            Request::Busy { meta, timeout } => self.apply_busy(meta, timeout, &mut outcome),
            Request::Idle => match self.queue.skip_to_busy() {
                Some((Request::Busy { meta, timeout }, discarded)) => {
                    debug!(discarded, "Machine::tick: idle superseded by later busy request");
                    self.stats.elided += 1 + discarded as u64;
                    self.apply_busy(meta, timeout, &mut outcome);
                }
                _ => {
                    // Nothing busy behind it, so whatever remains is idle too
                    self.queue.reset();
                    self.apply_idle(&mut outcome);
                }
            },
        }
        outcome
    }

    fn apply_busy(&mut self, meta: Option<String>, timeout: Option<Duration>, outcome: &mut Outcome) {
        let edge = !self.state.busy;

        if edge {
            self.period += 1;
            self.cancel_armed = true;
            let delay = timeout.unwrap_or(self.default_cancel_delay);
            info!(period = self.period, ?meta, ?delay, "Busy period started");
            outcome.commands.push(TimerCommand::ArmCancelWindow {
                period: self.period,
                delay,
            });
        } else {
            debug!(period = self.period, ?meta, "Machine::apply_busy: meta update within busy period");
        }

        outcome.changed |= self.set_state(VisibleState {
            busy: true,
            meta: meta.clone(),
            cancelable: false,
        });
        self.stats.transitions += 1;
        self.queue.mark_applied(Request::Busy { meta, timeout });
    }

    fn apply_idle(&mut self, outcome: &mut Outcome) {
        if self.state.busy {
            info!(period = self.period, "Busy period ended");
        }
        outcome.changed |= self.set_state(VisibleState::idle());
        if self.cancel_armed {
            self.cancel_armed = false;
            outcome.commands.push(TimerCommand::DisarmCancelWindow);
        }
        if self.ticking {
            self.ticking = false;
            outcome.commands.push(TimerCommand::StopTicker);
        }
        self.stats.transitions += 1;
        self.queue.mark_applied(Request::Idle);
    }

    fn promote_cancelable(&mut self, period: u64) -> Outcome {
        let mut outcome = Outcome::default();
        if !self.cancel_armed || period != self.period || !self.state.busy {
            debug!(period, current = self.period, "Machine::promote_cancelable: stale timer, ignoring");
            return outcome;
        }
        self.cancel_armed = false;
        self.stats.cancel_promotions += 1;
        info!(period, "Busy period is now cancelable");
        outcome.changed |= self.set_state(VisibleState {
            cancelable: true,
            ..self.state.clone()
        });
        outcome
    }

    fn reattach(&mut self) -> Outcome {
        let dropped = self.queue.reset();
        self.stats.reattaches += 1;
        info!(dropped, "Coordinator reattached, pending queue reset");

        let mut outcome = Outcome::default();
        if self.ticking && !self.state.busy {
            self.ticking = false;
            outcome.commands.push(TimerCommand::StopTicker);
        }
        outcome
    }

    fn set_state(&mut self, next: VisibleState) -> bool {
        if self.state == next {
            return false;
        }
        debug!(from = %self.state, to = %next, "Machine::set_state: transition");
        self.state = next;
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    const TICK_MS: u64 = 300;
    const CANCEL_MS: u64 = 5_000;

    /// Drives a machine against a virtual millisecond clock
    struct VirtualClock {
        machine: Machine,
        now_ms: u64,
        next_tick_ms: Option<u64>,
        cancel_at: Option<(u64, u64)>,
        /// Every visible state the machine passed through
        history: Vec<VisibleState>,
    }

    impl VirtualClock {
        fn new() -> Self {
            Self {
                machine: Machine::new(Duration::from_millis(CANCEL_MS)),
                now_ms: 0,
                next_tick_ms: None,
                cancel_at: None,
                history: vec![VisibleState::idle()],
            }
        }

        fn feed(&mut self, event: Event) {
            let outcome = self.machine.handle(event);
            for command in outcome.commands {
                match command {
                    TimerCommand::StartTicker => self.next_tick_ms = Some(self.now_ms + TICK_MS),
                    TimerCommand::StopTicker => self.next_tick_ms = None,
                    TimerCommand::ArmCancelWindow { period, delay } => {
                        self.cancel_at = Some((period, self.now_ms + delay.as_millis() as u64))
                    }
                    TimerCommand::DisarmCancelWindow => self.cancel_at = None,
                }
            }
            if outcome.changed {
                self.history.push(self.machine.state().clone());
            }
        }

        fn submit(&mut self, request: Request) {
            self.feed(Event::Submit(request));
        }

        /// Advance the clock, firing due timers in deadline order
        fn advance(&mut self, ms: u64) {
            let target = self.now_ms + ms;
            loop {
                let tick = self.next_tick_ms.filter(|t| *t <= target);
                let cancel = self.cancel_at.filter(|(_, at)| *at <= target);
                match (tick, cancel) {
                    (Some(t), Some((period, at))) if at <= t => self.fire_cancel(period, at),
                    (Some(t), _) => {
                        self.now_ms = t;
                        self.next_tick_ms = Some(t + TICK_MS);
                        self.feed(Event::Tick);
                    }
                    (None, Some((period, at))) => self.fire_cancel(period, at),
                    (None, None) => break,
                }
            }
            self.now_ms = target;
        }

        fn fire_cancel(&mut self, period: u64, at: u64) {
            self.now_ms = at;
            self.cancel_at = None;
            self.feed(Event::CancelWindowElapsed { period });
        }

        fn state(&self) -> &VisibleState {
            self.machine.state()
        }
    }

    fn busy_state(meta: &str, cancelable: bool) -> VisibleState {
        VisibleState {
            busy: true,
            meta: Some(meta.to_string()),
            cancelable,
        }
    }

    #[test]
    fn test_first_busy_applies_immediately() {
        let mut clock = VirtualClock::new();
        clock.submit(Request::busy("Loading"));

        assert_eq!(clock.state(), &busy_state("Loading", false));
        assert!(clock.machine.is_ticking());
        assert_eq!(clock.next_tick_ms, Some(TICK_MS));
        assert_eq!(clock.cancel_at, Some((1, CANCEL_MS)));
    }

    #[test]
    fn test_duplicate_submit_is_one_transition() {
        let mut clock = VirtualClock::new();
        clock.submit(Request::busy("Loading"));
        clock.submit(Request::busy("Loading"));
        clock.advance(TICK_MS * 3);

        assert_eq!(clock.machine.stats().transitions, 1);
        assert_eq!(clock.machine.stats().deduplicated, 1);
        assert_eq!(clock.history.len(), 2);
    }

    #[test]
    fn test_duplicate_of_queue_tail_is_dropped() {
        let mut clock = VirtualClock::new();
        clock.submit(Request::busy("A"));
        clock.submit(Request::busy("B"));
        clock.submit(Request::busy("B"));
        assert_eq!(clock.machine.queue().len(), 1);
    }

    #[test]
    fn test_idle_between_busy_never_visible() {
        let mut clock = VirtualClock::new();
        clock.submit(Request::busy("Loading A"));
        clock.advance(10);
        clock.submit(Request::idle());
        clock.advance(10);
        clock.submit(Request::busy("Loading B"));
        clock.advance(TICK_MS);

        assert_eq!(clock.state(), &busy_state("Loading B", false));
        assert!(clock.history.iter().skip(1).all(|s| s.busy));
        assert_eq!(clock.machine.stats().elided, 1);
    }

    #[test]
    fn test_idle_applies_on_tick_boundary() {
        let mut clock = VirtualClock::new();
        clock.submit(Request::busy("Loading"));
        clock.advance(10);
        clock.submit(Request::idle());

        // Minimum visible duration: still busy until the tick
        clock.advance(TICK_MS - 20);
        assert!(clock.state().busy);

        clock.advance(10);
        assert_eq!(clock.state(), &VisibleState::idle());
        assert!(!clock.machine.is_ticking());
        assert_eq!(clock.next_tick_ms, None);
        assert_eq!(clock.cancel_at, None);
    }

    #[test]
    fn test_one_transition_per_tick() {
        let mut clock = VirtualClock::new();
        clock.submit(Request::busy("A"));
        clock.submit(Request::busy("B"));
        clock.submit(Request::busy("C"));

        assert_eq!(clock.state().meta.as_deref(), Some("A"));
        clock.advance(TICK_MS);
        assert_eq!(clock.state().meta.as_deref(), Some("B"));
        clock.advance(TICK_MS);
        assert_eq!(clock.state().meta.as_deref(), Some("C"));
    }

    #[test]
    fn test_cancel_window_uses_request_timeout() {
        let mut clock = VirtualClock::new();
        let request = Request::busy("x").with_cancel_delay(Duration::from_millis(500)).unwrap();
        clock.submit(request);

        clock.advance(499);
        assert!(!clock.state().cancelable);
        clock.advance(1);
        assert!(clock.state().cancelable);
        clock.advance(2_000);
        assert_eq!(clock.state(), &busy_state("x", true));
        assert_eq!(clock.machine.stats().cancel_promotions, 1);
    }

    #[test]
    fn test_cancel_window_default_delay() {
        let mut clock = VirtualClock::new();
        clock.submit(Request::busy_unlabeled());
        clock.advance(CANCEL_MS - 1);
        assert!(!clock.state().cancelable);
        clock.advance(1);
        assert!(clock.state().cancelable);
    }

    #[test]
    fn test_meta_update_does_not_restart_cancel_timer() {
        let mut clock = VirtualClock::new();
        let first = Request::busy("x").with_cancel_delay(Duration::from_millis(500)).unwrap();
        clock.submit(first);
        clock.advance(50);
        clock.submit(Request::busy("y"));
        clock.advance(TICK_MS);
        assert_eq!(clock.state().meta.as_deref(), Some("y"));
        assert_eq!(clock.cancel_at, Some((1, 500)));

        clock.advance(500 - 50 - TICK_MS);
        assert_eq!(clock.state(), &busy_state("y", true));
    }

    #[test]
    fn test_meta_update_resets_cancelable_without_rearming() {
        let mut machine = Machine::new(Duration::from_millis(100));
        machine.handle(Event::Submit(Request::busy("x")));
        machine.handle(Event::CancelWindowElapsed { period: 1 });
        assert!(machine.state().cancelable);

        machine.handle(Event::Submit(Request::busy("y")));
        let outcome = machine.handle(Event::Tick);
        assert_eq!(machine.state(), &busy_state("y", false));
        assert!(outcome.changed);
        assert!(outcome.commands.is_empty());

        // The window already opened once this period
        let outcome = machine.handle(Event::CancelWindowElapsed { period: 1 });
        assert!(!outcome.changed);
        assert_eq!(machine.busy_period(), 1);
    }

    #[test]
    fn test_new_busy_period_resets_cancelable() {
        let mut clock = VirtualClock::new();
        let first = Request::busy("x").with_cancel_delay(Duration::from_millis(100)).unwrap();
        clock.submit(first.clone());
        clock.advance(150);
        clock.submit(Request::idle());
        clock.advance(TICK_MS);
        assert!(clock.state().is_idle());

        clock.submit(first);
        assert_eq!(clock.state(), &busy_state("x", false));
        assert_eq!(clock.machine.busy_period(), 2);
        clock.advance(100);
        assert!(clock.state().cancelable);
    }

    #[test]
    fn test_stale_cancel_event_ignored() {
        let mut machine = Machine::new(Duration::from_millis(100));
        machine.handle(Event::Submit(Request::busy("a")));
        machine.handle(Event::Submit(Request::idle()));
        machine.handle(Event::Tick);
        machine.handle(Event::Submit(Request::busy("b")));
        assert_eq!(machine.busy_period(), 2);

        let outcome = machine.handle(Event::CancelWindowElapsed { period: 1 });
        assert!(!outcome.changed);
        assert!(!machine.state().cancelable);

        let outcome = machine.handle(Event::CancelWindowElapsed { period: 2 });
        assert!(outcome.changed);
        assert!(machine.state().cancelable);

        // At most once per busy period
        let outcome = machine.handle(Event::CancelWindowElapsed { period: 2 });
        assert!(!outcome.changed);
    }

    #[test]
    fn test_busy_without_idle_stays_busy() {
        let mut clock = VirtualClock::new();
        clock.submit(Request::busy("stuck"));
        clock.advance(60_000);
        assert!(clock.state().busy);
        assert!(clock.machine.is_ticking());
    }

    #[test]
    fn test_reattach_drops_pending_requests() {
        let mut clock = VirtualClock::new();
        clock.submit(Request::busy("A"));
        clock.submit(Request::idle());
        clock.submit(Request::busy("B"));
        assert_eq!(clock.machine.queue().len(), 2);

        clock.feed(Event::Reattach);
        assert!(clock.machine.queue().is_empty());
        clock.advance(TICK_MS * 2);
        assert_eq!(clock.state(), &busy_state("A", false));
        assert_eq!(clock.machine.stats().reattaches, 1);
    }

    #[test]
    fn test_reattach_while_idle_stops_ticker() {
        let mut machine = Machine::new(Duration::from_secs(5));
        machine.handle(Event::Submit(Request::busy("A")));
        machine.handle(Event::Submit(Request::idle()));
        machine.handle(Event::Tick);
        assert!(!machine.is_ticking());

        let outcome = machine.handle(Event::Reattach);
        assert!(outcome.commands.is_empty());
    }

    fn arb_request() -> impl Strategy<Value = Request> {
        prop_oneof![
            Just(Request::idle()),
            Just(Request::busy_unlabeled()),
            "[abc]".prop_map(|meta| Request::busy(meta)),
        ]
    }

    proptest! {
        #[test]
        fn prop_sequence_ending_idle_reaches_terminal_idle(
            steps in proptest::collection::vec((arb_request(), 0u64..400), 0..24)
        ) {
            let mut clock = VirtualClock::new();
            for (request, gap) in steps {
                clock.submit(request);
                clock.advance(gap);
            }
            clock.submit(Request::idle());
            clock.advance(TICK_MS * 32);

            prop_assert_eq!(clock.state(), &VisibleState::idle());
            prop_assert!(!clock.machine.is_ticking());
            prop_assert_eq!(clock.next_tick_ms, None);
            prop_assert_eq!(clock.cancel_at, None);
        }

        #[test]
        fn prop_idle_state_is_never_cancelable(
            steps in proptest::collection::vec((arb_request(), 0u64..2_000), 0..24)
        ) {
            let mut clock = VirtualClock::new();
            for (request, gap) in steps {
                clock.submit(request);
                clock.advance(gap);
            }
            for state in &clock.history {
                prop_assert!(state.busy || (!state.cancelable && state.meta.is_none()));
            }
        }
    }
}
