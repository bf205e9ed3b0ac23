//! Inbound handler: applies the receive rule to messages delivered by peers.
//!
//! Each connection carries one request frame and one reply frame. Connections
//! are served concurrently, bounded by a semaphore, and tracked so shutdown
//! can wait for the ones already in flight.

use std::io;
use std::sync::Arc;
use std::time::Duration;

use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Semaphore;
use tokio::time;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, warn};

use crate::clock::ClockState;
use crate::error::ReceiveError;
use crate::transport::{read_frame, write_frame, FrameError};
use crate::util::now_unix_nanos;
use crate::wire::{Message, Reply};

/// Success acknowledgement for a delivered message. Carries no clock.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct Ack;

/// Apply the receive rule for a decoded message.
pub fn receive(clock: &ClockState, message: &Message) -> Ack {
    let now = now_unix_nanos();
    if message.sent_at_nanos() <= now {
        debug!(from = message.sender(), latency_ns = now - message.sent_at_nanos(), "one-way latency");
    }
    clock.apply_receive_from(message.clock(), Some(message.sender()));
    Ack
}

/// Decode a request body and apply it. Malformed payloads leave the clock untouched.
pub fn receive_frame(clock: &ClockState, body: &[u8]) -> Result<Ack, ReceiveError> {
    let message = Message::decode(body)?;
    Ok(receive(clock, &message))
}

#[derive(Copy, Clone, Debug)]
pub(crate) struct InboundLimits {
    pub read_timeout: Duration,
    pub max_connections: u32,
}

/// Accept loop. Returns once `cancel` fires; connections already accepted
/// keep running on `tracker`.
pub(crate) async fn serve(
    listener: TcpListener,
    clock: Arc<ClockState>,
    limits: InboundLimits,
    cancel: CancellationToken,
    tracker: TaskTracker,
) {
    let permits = Arc::new(Semaphore::new(limits.max_connections as usize));
    info!(
        addr = ?listener.local_addr().ok(),
        max_connections = limits.max_connections,
        "listening for peers"
    );

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                debug!("inbound handler shutting down");
                break;
            }
            accepted = listener.accept() => {
                let (stream, remote) = match accepted {
                    Ok(v) => v,
                    Err(err) => {
                        warn!(error = %err, "accept failed");
                        continue;
                    }
                };

                let permit = match Arc::clone(&permits).try_acquire_owned() {
                    Ok(permit) => permit,
                    Err(_) => {
                        warn!(
                            %remote,
                            max_connections = limits.max_connections,
                            "connection limit reached, dropping connection"
                        );
                        continue;
                    }
                };

                let clock = Arc::clone(&clock);
                let cancel = cancel.clone();
                tracker.spawn(async move {
                    let _permit = permit;
                    if let Err(err) = handle_connection(stream, &clock, limits.read_timeout, &cancel).await {
                        debug!(%remote, error = %err, "connection closed with error");
                    }
                });
            }
        }
    }
}

async fn handle_connection(
    mut stream: TcpStream,
    clock: &ClockState,
    read_timeout: Duration,
    cancel: &CancellationToken,
) -> io::Result<()> {
    let read = tokio::select! {
        _ = cancel.cancelled() => return Ok(()),
        read = time::timeout(read_timeout, read_frame(&mut stream)) => read,
    };

    let outcome = match read {
        Err(_) => return Err(io::Error::new(io::ErrorKind::TimedOut, "no request before read timeout")),
        Ok(Err(FrameError::Io(err))) => return Err(err),
        Ok(Err(FrameError::Wire(err))) => Err(ReceiveError::from(err)),
        Ok(Ok(body)) => receive_frame(clock, &body),
    };

    let reply = match outcome {
        Ok(Ack) => Reply::Ack,
        Err(err) => {
            warn!(remote = ?stream.peer_addr().ok(), error = %err, "rejecting message");
            Reply::reject(err.to_string())
        }
    };
    write_frame(&mut stream, &reply.encode()).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::observe::Observer;
    use crate::wire::WireError;

    fn clock() -> ClockState {
        ClockState::new(Observer::new("127.0.0.1:8002", 16))
    }

    #[test]
    fn receive_applies_rule_and_acks() {
        let c = clock();
        let msg = Message::new("127.0.0.1:8001", 3).unwrap();
        assert_eq!(receive(&c, &msg), Ack);
        assert_eq!(c.snapshot(), 4);
    }

    #[test]
    fn malformed_frame_leaves_clock_untouched() {
        let c = clock();
        c.apply_tick();
        let err = receive_frame(&c, b"\x1a\x4c\x01").unwrap_err();
        assert!(matches!(err, ReceiveError::InvalidMessage(WireError::Truncated { .. })));
        assert_eq!(c.snapshot(), 1);
    }

    #[test]
    fn frame_with_empty_sender_is_invalid() {
        let c = clock();
        let mut body = Message::new("x", 9).unwrap().encode();
        body.pop();
        body[20..22].copy_from_slice(&0u16.to_be_bytes());
        assert_eq!(receive_frame(&c, &body), Err(ReceiveError::InvalidMessage(WireError::EmptySender)));
        assert_eq!(c.snapshot(), 0);
    }

    #[tokio::test]
    async fn serves_until_cancelled() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let target = listener.local_addr().unwrap().to_string();
        let c = Arc::new(clock());
        let cancel = CancellationToken::new();
        let tracker = TaskTracker::new();
        let limits = InboundLimits { read_timeout: Duration::from_secs(1), max_connections: 4 };
        let server = tokio::spawn(serve(listener, Arc::clone(&c), limits, cancel.clone(), tracker.clone()));

        let msg = Message::new("127.0.0.1:8001", 10).unwrap();
        crate::transport::call(&target, &msg, Duration::from_secs(2)).await.unwrap();
        assert_eq!(c.snapshot(), 11);

        cancel.cancel();
        server.await.unwrap();
        tracker.close();
        tracker.wait().await;
    }
}
