//! Deterministic timer service for tests and simulation

use std::time::Duration;

use parking_lot::Mutex;

use crate::event::{BundleEvent, EventQueue};
use crate::traits::{TimerHandle, TimerService};

struct ManualTimer {
    due: Duration,
    seq: u64,
    handle: TimerHandle,
    event: BundleEvent,
}

struct ManualState {
    now: Duration,
    next_seq: u64,
    timers: Vec<ManualTimer>,
}

/// Timer service driven by an explicit virtual clock
///
/// Nothing fires until [`advance`](Self::advance) moves the clock past a
/// timer's deadline; due events are then posted to the queue in deadline
/// order.
pub struct ManualTimers {
    events: EventQueue,
    state: Mutex<ManualState>,
}

impl ManualTimers {
    pub fn new(events: EventQueue) -> Self {
        Self {
            events,
            state: Mutex::new(ManualState {
                now: Duration::ZERO,
                next_seq: 0,
                timers: Vec::new(),
            }),
        }
    }

    /// Virtual time elapsed since creation
    pub fn now(&self) -> Duration {
        self.state.lock().now
    }

    /// Move the clock forward, posting every due event
    ///
    /// Returns the number of events posted.
    pub fn advance(&self, by: Duration) -> usize {
        let due = {
            let mut state = self.state.lock();
            state.now = state.now.saturating_add(by);
            let now = state.now;

            let (mut due, pending): (Vec<_>, Vec<_>) =
                state.timers.drain(..).partition(|t| t.due <= now);
            state.timers = pending;
            due.sort_by_key(|t| (t.due, t.seq));
            due
        };

        let mut fired = 0;
        for timer in due {
            if timer.handle.is_cancelled() {
                continue;
            }
            self.events.post(timer.event);
            fired += 1;
        }
        fired
    }

    /// Timers scheduled and not yet fired or cancelled
    pub fn pending_count(&self) -> usize {
        self.state
            .lock()
            .timers
            .iter()
            .filter(|t| !t.handle.is_cancelled())
            .count()
    }

    /// Names of pending events in deadline order
    pub fn pending_names(&self) -> Vec<&'static str> {
        let state = self.state.lock();
        let mut live: Vec<_> = state
            .timers
            .iter()
            .filter(|t| !t.handle.is_cancelled())
            .collect();
        live.sort_by_key(|t| (t.due, t.seq));
        live.into_iter().map(|t| t.event.name()).collect()
    }
}

impl TimerService for ManualTimers {
    fn schedule(&self, delay: Duration, event: BundleEvent) -> TimerHandle {
        let handle = TimerHandle::new();
        let mut state = self.state.lock();
        let timer = ManualTimer {
            due: state.now.saturating_add(delay),
            seq: state.next_seq,
            handle: handle.clone(),
            event,
        };
        state.next_seq += 1;
        state.timers.push(timer);
        handle
    }
}
