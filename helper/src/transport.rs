//! TCP call/response transport: one connection per call, one frame each way.

use std::io;
use std::time::Duration;

use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::{lookup_host, TcpStream};
use tokio::time;
use tracing::trace;

use crate::error::SendFailure;
use crate::util::is_unreachable;
use crate::wire::{self, Message, Reply, WireError};

/// Outcome of an outbound send.
#[must_use]
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SendResult {
    /// The peer applied the message. `clock` is the value that was sent.
    Delivered { clock: u64 },
    /// The message was not delivered; the local clock is unchanged.
    Failed(SendFailure),
}

impl SendResult {
    pub fn delivered(&self) -> bool {
        matches!(self, SendResult::Delivered { .. })
    }

    /// Why the send failed, if it did.
    pub fn reason(&self) -> Option<String> {
        match self {
            SendResult::Delivered { .. } => None,
            SendResult::Failed(failure) => Some(failure.to_string()),
        }
    }
}

/// Failure to read one frame off a connection.
#[derive(Debug, Error)]
pub(crate) enum FrameError {
    #[error(transparent)]
    Io(#[from] io::Error),
    #[error(transparent)]
    Wire(#[from] WireError),
}

pub(crate) async fn read_frame<R: AsyncRead + Unpin>(reader: &mut R) -> Result<Vec<u8>, FrameError> {
    let mut prefix = [0u8; 4];
    reader.read_exact(&mut prefix).await?;
    let len = wire::frame_len(prefix)?;
    let mut body = vec![0u8; len];
    reader.read_exact(&mut body).await?;
    Ok(body)
}

pub(crate) async fn write_frame<W: AsyncWrite + Unpin>(writer: &mut W, body: &[u8]) -> io::Result<()> {
    writer.write_all(&wire::frame(body)).await?;
    writer.flush().await
}

/// Deliver `message` to the inbound handler at `target` and wait for its reply.
///
/// The whole exchange, name resolution and connect included, is bounded by
/// `limit`; running out of time is reported as [`SendFailure::PeerUnreachable`].
pub async fn call(target: &str, message: &Message, limit: Duration) -> Result<(), SendFailure> {
    match time::timeout(limit, exchange(target, message)).await {
        Ok(result) => result,
        Err(_) => Err(SendFailure::PeerUnreachable),
    }
}

async fn exchange(target: &str, message: &Message) -> Result<(), SendFailure> {
    let addrs: Vec<_> = match lookup_host(target).await {
        Ok(addrs) => addrs.collect(),
        Err(err) => {
            trace!(target, error = %err, "address resolution failed");
            return Err(SendFailure::PeerUnreachable);
        }
    };
    if addrs.is_empty() {
        return Err(SendFailure::PeerUnreachable);
    }

    let mut stream = TcpStream::connect(&addrs[..]).await.map_err(|err| {
        if is_unreachable(&err) {
            SendFailure::PeerUnreachable
        } else {
            transport_failure("connect", err)
        }
    })?;
    stream.set_nodelay(true).ok();

    write_frame(&mut stream, &message.encode())
        .await
        .map_err(|err| transport_failure("write", err))?;
    let body = read_frame(&mut stream).await.map_err(|err| transport_failure("read reply", err))?;

    match Reply::decode(&body).map_err(|err| transport_failure("decode reply", err))? {
        Reply::Ack => Ok(()),
        Reply::Reject(reason) => Err(SendFailure::Rejected { reason }),
    }
}

fn transport_failure(stage: &str, err: impl std::fmt::Display) -> SendFailure {
    SendFailure::Transport { reason: format!("{stage}: {err}") }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    async fn free_addr() -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        listener.local_addr().unwrap().to_string()
        // listener dropped here, nothing listens on the port any more
    }

    #[tokio::test]
    async fn refused_connection_is_unreachable() {
        let target = free_addr().await;
        let msg = Message::new("127.0.0.1:1", 3).unwrap();
        assert_eq!(call(&target, &msg, Duration::from_secs(2)).await, Err(SendFailure::PeerUnreachable));
    }

    #[tokio::test]
    async fn silent_peer_times_out_as_unreachable() {
        // Accepts the connection but never answers.
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let target = listener.local_addr().unwrap().to_string();
        let hold = tokio::spawn(async move {
            let (_stream, _) = listener.accept().await.unwrap();
            time::sleep(Duration::from_secs(30)).await;
        });

        let msg = Message::new("127.0.0.1:1", 3).unwrap();
        assert_eq!(call(&target, &msg, Duration::from_millis(200)).await, Err(SendFailure::PeerUnreachable));
        hold.abort();
    }

    #[tokio::test]
    async fn garbage_reply_is_transport_failure() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let target = listener.local_addr().unwrap().to_string();
        tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            let _ = read_frame(&mut stream).await;
            write_frame(&mut stream, b"not a reply").await.unwrap();
        });

        let msg = Message::new("127.0.0.1:1", 3).unwrap();
        let result = call(&target, &msg, Duration::from_secs(2)).await;
        assert!(matches!(result, Err(SendFailure::Transport { .. })), "{result:?}");
    }

    #[tokio::test]
    async fn oversized_frame_is_refused_before_reading_body() {
        let (mut a, mut b) = tokio::io::duplex(64);
        a.write_all(&(wire::MAX_FRAME_LEN as u32 + 1).to_be_bytes()).await.unwrap();
        assert!(matches!(read_frame(&mut b).await, Err(FrameError::Wire(WireError::FrameTooLarge(_)))));
    }

    #[test]
    fn send_result_reports_reason() {
        let ok = SendResult::Delivered { clock: 3 };
        assert!(ok.delivered());
        assert_eq!(ok.reason(), None);

        let failed = SendResult::Failed(SendFailure::PeerUnreachable);
        assert!(!failed.delivered());
        assert_eq!(failed.reason().as_deref(), Some("peer unreachable"));
    }
}
