//! Lamport logical clock state shared by the ticker, the inbound handler and the sender.

use std::sync::{Mutex, MutexGuard};

use crate::observe::Observer;
use crate::wire::MAX_CLOCK;

/// Which Lamport rule produced a clock update.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum ClockRule {
    /// Internal event: `value + 1`.
    Tick,
    /// Message receipt: `max(value, min(remote, MAX_CLOCK)) + 1`.
    Receive { remote: u64 },
}

/// A single transition of the clock, as seen inside the critical section.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct ClockUpdate {
    pub prior: u64,
    pub new: u64,
    pub rule: ClockRule,
}

/// A threadsafe Lamport clock owned by one process.
///
/// The value is only reachable through [`snapshot`](Self::snapshot),
/// [`apply_tick`](Self::apply_tick) and [`apply_receive`](Self::apply_receive);
/// each runs as one short critical section with no I/O inside it.
/// Every update is reported to the [`Observer`] after the lock is released.
#[derive(Debug)]
pub struct ClockState {
    value: Mutex<u64>,
    observer: Observer,
}

impl ClockState {
    /// Create a clock starting at 0.
    pub fn new(observer: Observer) -> Self {
        Self { value: Mutex::new(0), observer }
    }

    #[cfg(test)]
    pub(crate) fn with_value(value: u64, observer: Observer) -> Self {
        Self { value: Mutex::new(value), observer }
    }

    /// Read the current logical time.
    pub fn snapshot(&self) -> u64 {
        *self.lock()
    }

    /// Internal event: increment and return the new value.
    pub fn apply_tick(&self) -> u64 {
        self.update(ClockRule::Tick, None)
    }

    /// Receive rule: `max(local, incoming) + 1`, applied atomically.
    ///
    /// `incoming` is capped at [`MAX_CLOCK`] so the increment can never
    /// overflow. The wire decoder already rejects anything larger.
    pub fn apply_receive(&self, incoming: u64) -> u64 {
        self.apply_receive_from(incoming, None)
    }

    pub(crate) fn apply_receive_from(&self, incoming: u64, peer: Option<&str>) -> u64 {
        self.update(ClockRule::Receive { remote: incoming }, peer)
    }

    fn update(&self, rule: ClockRule, peer: Option<&str>) -> u64 {
        let update = {
            let mut value = self.lock();
            let prior = *value;
            *value = match rule {
                ClockRule::Tick => prior + 1,
                ClockRule::Receive { remote } => prior.max(remote.min(MAX_CLOCK)) + 1,
            };
            ClockUpdate { prior, new: *value, rule }
        };
        self.observer.clock_updated(&update, peer);
        update.new
    }

    fn lock(&self) -> MutexGuard<'_, u64> {
        // Critical sections are plain arithmetic. A poisoned lock means one of
        // them panicked, and the clock can no longer be trusted.
        self.value.lock().expect("lamport clock lock poisoned")
    }
}
