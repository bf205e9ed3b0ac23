use std::io;
use std::net::SocketAddr;

use thiserror::Error;

use crate::wire::WireError;

/// Errors returned to a remote caller of the inbound handler.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ReceiveError {
    /// The payload could not be decoded into a [`Message`](crate::wire::Message).
    /// The receiver's clock is left untouched.
    #[error("invalid message: {0}")]
    InvalidMessage(#[from] WireError),
}

/// Why an outbound send did not deliver its message.
///
/// Returned as data inside [`SendResult`](crate::transport::SendResult), never
/// as an `Err`. The sender's clock is unchanged in every case.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SendFailure {
    /// Connection refused, timed out, or the address could not be resolved.
    #[error("peer unreachable")]
    PeerUnreachable,

    /// The peer answered but refused the message.
    #[error("rejected by peer: {reason}")]
    Rejected {
        /// Reason given by the peer.
        reason: String,
    },

    /// Any other transport-level fault.
    #[error("transport failure: {reason}")]
    Transport {
        /// Human-readable description of the fault.
        reason: String,
    },
}

/// Errors that prevent a process from starting.
#[derive(Debug, Error)]
pub enum ProcessError {
    #[error("invalid configuration: {reason}")]
    InvalidConfig { reason: String },

    #[error("failed to bind {addr}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: io::Error,
    },
}
