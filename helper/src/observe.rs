//! Observation channel for clock transitions and send attempts.
//!
//! Events are published on a broadcast channel and mirrored to `tracing`.
//! Nothing in the clock protocol reads them back: a process with no
//! subscribers behaves exactly like one with many.

use std::fmt;
use std::sync::Arc;

use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use crate::clock::{ClockRule, ClockUpdate};
use crate::util::now_unix_nanos;

/// Kind of an observed event.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum EventKind {
    Tick,
    Receive,
    SendSuccess,
    SendFailure,
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::Tick => "tick",
            EventKind::Receive => "receive",
            EventKind::SendSuccess => "send-success",
            EventKind::SendFailure => "send-failure",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One entry of a process's causal trace.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ClockEvent {
    /// Wall-clock Unix time in nanoseconds when the event was published.
    pub at_nanos: u64,
    /// Address of the process that produced the event.
    pub process: Arc<str>,
    pub kind: EventKind,
    /// Clock before the event. For sends, the value carried by the message.
    pub prior: Option<u64>,
    /// Clock after the event; `None` for sends, which never change it.
    pub new: Option<u64>,
    /// Clock embedded in a received message.
    pub remote_clock: Option<u64>,
    /// Peer that sent or was sent the message.
    pub peer: Option<String>,
    /// Why a send failed.
    pub reason: Option<String>,
}

/// Publishing half of the observation channel, cloned into every activity
/// of a process.
#[derive(Clone, Debug)]
pub struct Observer {
    process: Arc<str>,
    tx: broadcast::Sender<ClockEvent>,
}

impl Observer {
    /// `capacity` bounds how far a subscriber may lag before it starts
    /// missing events.
    pub fn new(process: impl Into<Arc<str>>, capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { process: process.into(), tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ClockEvent> {
        self.tx.subscribe()
    }

    pub(crate) fn clock_updated(&self, update: &ClockUpdate, peer: Option<&str>) {
        let (kind, remote_clock) = match update.rule {
            ClockRule::Tick => {
                debug!(process = %self.process, clock = update.new, "internal event");
                (EventKind::Tick, None)
            }
            ClockRule::Receive { remote } => {
                info!(
                    process = %self.process,
                    from = peer.unwrap_or("-"),
                    remote_clock = remote,
                    prior = update.prior,
                    clock = update.new,
                    "received message"
                );
                (EventKind::Receive, Some(remote))
            }
        };
        self.publish(ClockEvent {
            at_nanos: now_unix_nanos(),
            process: Arc::clone(&self.process),
            kind,
            prior: Some(update.prior),
            new: Some(update.new),
            remote_clock,
            peer: peer.map(str::to_owned),
            reason: None,
        });
    }

    pub(crate) fn send_succeeded(&self, peer: &str, clock: u64) {
        info!(process = %self.process, to = peer, clock, "sent message");
        self.publish(self.send_event(EventKind::SendSuccess, peer, clock, None));
    }

    pub(crate) fn send_failed(&self, peer: &str, clock: u64, reason: String) {
        warn!(process = %self.process, to = peer, clock, %reason, "send failed");
        self.publish(self.send_event(EventKind::SendFailure, peer, clock, Some(reason)));
    }

    fn send_event(&self, kind: EventKind, peer: &str, clock: u64, reason: Option<String>) -> ClockEvent {
        ClockEvent {
            at_nanos: now_unix_nanos(),
            process: Arc::clone(&self.process),
            kind,
            prior: Some(clock),
            new: None,
            remote_clock: None,
            peer: Some(peer.to_owned()),
            reason,
        }
    }

    fn publish(&self, event: ClockEvent) {
        // Err only means nobody is subscribed right now.
        let _ = self.tx.send(event);
    }
}
