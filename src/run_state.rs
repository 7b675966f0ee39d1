//! Run state shared between the control surface and the worker thread.
//!
//! The worker is the only writer of the counters. The control surface only
//! moves `mode` through the transitions exposed here, and never blocks.
//! Every suspension (pause wait, inter-record delay, cooldown) happens on the
//! worker and wakes early when a stop is requested.

use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use tokio::sync::broadcast::Sender;

use crate::protocol::{PipelineEvent, RunMode, RunSnapshot};

#[derive(Debug, Default)]
struct RunState {
    mode: RunMode,
    processed: usize,
    fetched: usize,
    total: usize,
    external_calls: u64,
}

/// Shared run state plus the event bus it reports on.
pub struct RunSignals {
    state: Mutex<RunState>,
    changed: Condvar,
    events: Sender<PipelineEvent>,
}

impl RunSignals {
    pub fn new(events: Sender<PipelineEvent>) -> Self {
        Self {
            state: Mutex::new(RunState::default()),
            changed: Condvar::new(),
            events,
        }
    }

    fn lock(&self) -> MutexGuard<'_, RunState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn emit(&self, event: PipelineEvent) {
        let _ = self.events.send(event);
    }

    pub fn mode(&self) -> RunMode {
        self.lock().mode
    }

    pub fn snapshot(&self) -> RunSnapshot {
        let state = self.lock();
        RunSnapshot {
            mode: state.mode,
            processed: state.processed,
            fetched: state.fetched,
            total: state.total,
            external_calls: state.external_calls,
        }
    }

    /// Idle -> Running. Returns false when a run is already active.
    pub fn begin(&self, total: usize) -> bool {
        let mut state = self.lock();
        if state.mode != RunMode::Idle {
            return false;
        }
        *state = RunState {
            mode: RunMode::Running,
            total,
            ..RunState::default()
        };
        self.changed.notify_all();
        true
    }

    /// Running -> Paused.
    pub fn pause(&self) -> bool {
        self.transition(RunMode::Running, RunMode::Paused)
    }

    /// Paused -> Running.
    pub fn resume(&self) -> bool {
        self.transition(RunMode::Paused, RunMode::Running)
    }

    /// Running/Paused -> Stopping.
    pub fn request_stop(&self) -> bool {
        let mut state = self.lock();
        if !matches!(state.mode, RunMode::Running | RunMode::Paused) {
            return false;
        }
        state.mode = RunMode::Stopping;
        self.changed.notify_all();
        true
    }

    fn transition(&self, from: RunMode, to: RunMode) -> bool {
        let mut state = self.lock();
        if state.mode != from {
            return false;
        }
        state.mode = to;
        self.changed.notify_all();
        true
    }

    /// Resets all counters and returns to Idle. Called once by finalize.
    pub fn finish(&self) {
        let mut state = self.lock();
        *state = RunState::default();
        self.changed.notify_all();
    }

    pub fn is_stopping(&self) -> bool {
        self.lock().mode == RunMode::Stopping
    }

    /// Blocks while paused, re-checking every `poll`. Returns on resume or stop.
    pub fn wait_while_paused(&self, poll: Duration) {
        let mut state = self.lock();
        while state.mode == RunMode::Paused {
            state = match self.changed.wait_timeout(state, poll) {
                Ok((guard, _)) => guard,
                Err(poisoned) => poisoned.into_inner().0,
            };
        }
    }

    /// Sleeps for `duration` unless a stop arrives first. Returns true when the full
    /// duration elapsed. A duration past the clock's range sleeps until stopped.
    pub fn sleep_unless_stopped(&self, duration: Duration) -> bool {
        let deadline = Instant::now().checked_add(duration);
        let mut state = self.lock();
        loop {
            if state.mode == RunMode::Stopping {
                return false;
            }
            state = match deadline {
                Some(deadline) => {
                    let now = Instant::now();
                    if now >= deadline {
                        return true;
                    }
                    match self.changed.wait_timeout(state, deadline - now) {
                        Ok((guard, _)) => guard,
                        Err(poisoned) => poisoned.into_inner().0,
                    }
                }
                None => self
                    .changed
                    .wait(state)
                    .unwrap_or_else(PoisonError::into_inner),
            };
        }
    }

    /// Counts one finished record and returns `(processed, total)`.
    pub fn record_processed(&self, resolved_link: bool) -> (usize, usize) {
        let mut state = self.lock();
        state.processed += 1;
        if resolved_link {
            state.fetched += 1;
        }
        (state.processed, state.total)
    }

    pub fn fetched(&self) -> usize {
        self.lock().fetched
    }

    pub fn set_external_calls(&self, external_calls: u64) {
        self.lock().external_calls = external_calls;
    }
}
