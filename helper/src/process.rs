//! `LogicalClockProcess`: one participant with its clock, inbound handler,
//! ticker and outbound sender.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio_util::sync::{CancellationToken, DropGuard};
use tokio_util::task::TaskTracker;
use tracing::{error, info};

use crate::clock::ClockState;
use crate::config::ProcessConfig;
use crate::error::{ProcessError, ReceiveError, SendFailure};
use crate::inbound::{self, Ack, InboundLimits};
use crate::observe::{ClockEvent, Observer};
use crate::ticker::run_ticker;
use crate::transport::{self, SendResult};
use crate::wire::Message;

/// A running Lamport clock process.
///
/// Created by [`start`](Self::start), which binds the inbound handler and
/// launches the ticker; torn down by [`stop`](Self::stop). Dropping the
/// handle without stopping cancels both activities without waiting for them.
pub struct LogicalClockProcess {
    address: String,
    local_addr: SocketAddr,
    clock: Arc<ClockState>,
    observer: Observer,
    send_timeout: Duration,
    cancel: CancellationToken,
    tracker: TaskTracker,
    server: JoinHandle<()>,
    ticker: Option<JoinHandle<()>>,
    _cancel_on_drop: DropGuard,
}

impl LogicalClockProcess {
    /// Bind the listener, then start serving peers and ticking.
    pub async fn start(config: ProcessConfig) -> Result<Self, ProcessError> {
        config.validate()?;

        let listener = TcpListener::bind(config.listen_addr)
            .await
            .map_err(|source| ProcessError::Bind { addr: config.listen_addr, source })?;
        let local_addr = listener
            .local_addr()
            .map_err(|source| ProcessError::Bind { addr: config.listen_addr, source })?;
        let address = config.advertise_addr.clone().unwrap_or_else(|| local_addr.to_string());

        let observer = Observer::new(address.as_str(), config.event_capacity);
        let clock = Arc::new(ClockState::new(observer.clone()));
        let cancel = CancellationToken::new();
        let tracker = TaskTracker::new();

        let limits = InboundLimits { read_timeout: config.read_timeout, max_connections: config.max_connections };
        let server =
            tokio::spawn(inbound::serve(listener, Arc::clone(&clock), limits, cancel.clone(), tracker.clone()));
        let ticker = config
            .tick_interval
            .map(|period| tokio::spawn(run_ticker(Arc::clone(&clock), period, cancel.clone())));

        info!(%address, %local_addr, ticking = ticker.is_some(), "process started");

        Ok(Self {
            address,
            local_addr,
            clock,
            observer,
            send_timeout: config.send_timeout,
            _cancel_on_drop: cancel.clone().drop_guard(),
            cancel,
            tracker,
            server,
            ticker,
        })
    }

    /// Stop accepting peers and ticking, then wait for in-flight handlers.
    pub async fn stop(self) {
        let Self { address, clock, cancel, tracker, server, ticker, _cancel_on_drop, .. } = self;
        cancel.cancel();

        if let Err(err) = server.await {
            error!(error = %err, "inbound handler task failed");
        }
        if let Some(ticker) = ticker {
            if let Err(err) = ticker.await {
                error!(error = %err, "ticker task failed");
            }
        }
        tracker.close();
        tracker.wait().await;

        info!(%address, clock = clock.snapshot(), "process stopped");
    }

    /// Identity of this process: the address peers use to reach it.
    pub fn address(&self) -> &str {
        &self.address
    }

    /// Socket address the inbound handler is bound to.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Current clock value.
    pub fn clock(&self) -> u64 {
        self.clock.snapshot()
    }

    /// Subscribe to this process's observation channel.
    pub fn subscribe(&self) -> broadcast::Receiver<ClockEvent> {
        self.observer.subscribe()
    }

    /// Record an internal event now, in addition to the ticker's.
    pub fn tick(&self) -> u64 {
        self.clock.apply_tick()
    }

    /// Apply a message delivered in-process, bypassing the network.
    pub fn receive(&self, message: &Message) -> Ack {
        inbound::receive(&self.clock, message)
    }

    /// Apply an encoded request body, as the inbound handler does for peers.
    pub fn receive_frame(&self, body: &[u8]) -> Result<Ack, ReceiveError> {
        inbound::receive_frame(&self.clock, body)
    }

    /// Send the current clock to `target` (`host:port`).
    ///
    /// Sending does not advance the clock. The clock is read under the lock,
    /// the network call happens after the lock is released. Failures come
    /// back as [`SendResult::Failed`] and are never retried.
    pub async fn send(&self, target: &str) -> SendResult {
        let clock = self.clock.snapshot();
        let outcome = match Message::new(self.address.as_str(), clock) {
            Ok(message) => transport::call(target, &message, self.send_timeout).await,
            Err(err) => Err(SendFailure::Transport { reason: err.to_string() }),
        };

        match outcome {
            Ok(()) => {
                self.observer.send_succeeded(target, clock);
                SendResult::Delivered { clock }
            }
            Err(failure) => {
                self.observer.send_failed(target, clock, failure.to_string());
                SendResult::Failed(failure)
            }
        }
    }
}

impl std::fmt::Debug for LogicalClockProcess {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LogicalClockProcess")
            .field("address", &self.address)
            .field("clock", &self.clock.snapshot())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::observe::EventKind;

    fn quiet() -> ProcessConfig {
        ProcessConfig::default().without_ticker()
    }

    #[tokio::test]
    async fn starts_at_zero_on_a_free_port() {
        let p = LogicalClockProcess::start(quiet()).await.unwrap();
        assert_eq!(p.clock(), 0);
        assert_ne!(p.local_addr().port(), 0);
        assert_eq!(p.address(), p.local_addr().to_string());
        p.stop().await;
    }

    #[tokio::test]
    async fn advertised_address_is_the_identity() {
        let config = ProcessConfig { advertise_addr: Some("node-a:8001".into()), ..quiet() };
        let p = LogicalClockProcess::start(config).await.unwrap();
        assert_eq!(p.address(), "node-a:8001");
        p.stop().await;
    }

    #[tokio::test]
    async fn invalid_config_is_refused() {
        let config = ProcessConfig { max_connections: 0, ..quiet() };
        let err = LogicalClockProcess::start(config).await.unwrap_err();
        assert!(matches!(err, ProcessError::InvalidConfig { .. }));
    }

    #[tokio::test]
    async fn port_in_use_is_a_bind_error() {
        let first = LogicalClockProcess::start(quiet()).await.unwrap();
        let config = ProcessConfig { listen_addr: first.local_addr(), ..quiet() };
        let err = LogicalClockProcess::start(config).await.unwrap_err();
        assert!(matches!(err, ProcessError::Bind { .. }));
        first.stop().await;
    }

    #[tokio::test]
    async fn send_does_not_advance_the_clock() {
        let a = LogicalClockProcess::start(quiet()).await.unwrap();
        let b = LogicalClockProcess::start(quiet()).await.unwrap();
        a.tick();
        a.tick();

        let result = a.send(b.address()).await;
        assert_eq!(result, SendResult::Delivered { clock: 2 });
        assert_eq!(a.clock(), 2);
        assert_eq!(b.clock(), 3);

        a.stop().await;
        b.stop().await;
    }

    #[tokio::test]
    async fn in_process_receive_matches_rule() {
        let p = LogicalClockProcess::start(quiet()).await.unwrap();
        let mut events = p.subscribe();
        let msg = Message::new("127.0.0.1:9", 41).unwrap();
        assert_eq!(p.receive(&msg), Ack);
        assert_eq!(p.clock(), 42);

        let ev = events.recv().await.unwrap();
        assert_eq!(ev.kind, EventKind::Receive);
        assert_eq!(ev.peer.as_deref(), Some("127.0.0.1:9"));
        p.stop().await;
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_inbound_calls_are_not_lost() {
        let target = LogicalClockProcess::start(quiet()).await.unwrap();
        let addr = target.address().to_owned();

        let senders: Vec<_> = (0..16)
            .map(|i| {
                let addr = addr.clone();
                tokio::spawn(async move {
                    let msg = Message::new(format!("127.0.0.1:{}", 20_000 + i), 0).unwrap();
                    transport::call(&addr, &msg, Duration::from_secs(5)).await
                })
            })
            .collect();
        for s in senders {
            s.await.unwrap().unwrap();
        }

        // every message carried clock 0, so each receive adds exactly one
        assert_eq!(target.clock(), 16);
        target.stop().await;
    }
}
