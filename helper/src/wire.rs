//! Wire format for clock messages and their replies (big-endian).
//!
//! Every frame on a connection is a `u32` length prefix followed by a body.
//! A request body is a `Deliver` header plus the sender address:
//!
//! ```text
//! magic u16 | version u8 | kind u8 | clock u64 | sent_at u64 | sender_len u16 | sender
//! ```
//!
//! A reply body is `magic u16 | version u8 | kind u8 | reason_len u16 | reason`,
//! with an empty reason for `Ack`.

use thiserror::Error;

use crate::util::now_unix_nanos;

/// Fixed magic value for all frames.
pub const MAGIC: u16 = 0x1A4C;
/// Protocol version.
pub const VERSION: u8 = 1;
/// Length of a `Deliver` header, up to and including `sender_len`.
pub const DELIVER_HEADER_LEN: usize = 2 + 1 + 1 + 8 + 8 + 2; // 22
/// Length of a reply header, up to and including `reason_len`.
pub const REPLY_HEADER_LEN: usize = 2 + 1 + 1 + 2; // 6
/// Largest frame body either side accepts.
pub const MAX_FRAME_LEN: usize = 4096;
/// Largest sender address, in bytes.
pub const MAX_SENDER_LEN: usize = 255;
/// Largest rejection reason, in bytes. Longer reasons are cut.
pub const MAX_REASON_LEN: usize = 512;
/// Largest clock value a message may carry, so `max(local, remote) + 1`
/// can never overflow.
pub const MAX_CLOCK: u64 = i64::MAX as u64;

/// Frame kind.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum Kind {
    Deliver = 0,
    Ack = 1,
    Reject = 2,
}

impl Kind {
    #[inline]
    pub fn from_u8(v: u8) -> Result<Self, WireError> {
        match v {
            0 => Ok(Kind::Deliver),
            1 => Ok(Kind::Ack),
            2 => Ok(Kind::Reject),
            _ => Err(WireError::UnknownKind(v)),
        }
    }
}

/// Errors that can occur while decoding or validating frames.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum WireError {
    #[error("truncated frame: expected at least {expected} bytes, got {got}")]
    Truncated { expected: usize, got: usize },
    #[error("invalid magic: 0x{0:04X}")]
    InvalidMagic(u16),
    #[error("unsupported version: {0}")]
    UnsupportedVersion(u8),
    #[error("unknown frame kind: {0}")]
    UnknownKind(u8),
    #[error("unexpected frame kind: expected {expected:?}, got {got:?}")]
    UnexpectedKind { expected: Kind, got: Kind },
    #[error("length mismatch: header declares {declared} trailing bytes, frame has {actual}")]
    LengthMismatch { declared: usize, actual: usize },
    #[error("missing sender address")]
    EmptySender,
    #[error("sender address is {0} bytes, limit is {max}", max = MAX_SENDER_LEN)]
    SenderTooLong(usize),
    #[error("sender address is not valid UTF-8")]
    InvalidSender,
    #[error("clock {0} exceeds {max}", max = MAX_CLOCK)]
    ClockOutOfRange(u64),
    #[error("frame of {0} bytes exceeds limit of {max}", max = MAX_FRAME_LEN)]
    FrameTooLarge(usize),
}

/// A clock value sent from one process to another.
///
/// Fields are validated on construction and on decode, so a `Message` in
/// hand always has a non-empty sender and a clock no larger than [`MAX_CLOCK`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Message {
    sender: String,
    clock: u64,
    sent_at_nanos: u64,
}

impl Message {
    /// Build a message stamped with the current wall-clock time.
    pub fn new(sender: impl Into<String>, clock: u64) -> Result<Self, WireError> {
        Self::with_timestamp(sender, clock, now_unix_nanos())
    }

    pub fn with_timestamp(sender: impl Into<String>, clock: u64, sent_at_nanos: u64) -> Result<Self, WireError> {
        let sender = sender.into();
        if sender.is_empty() {
            return Err(WireError::EmptySender);
        }
        if sender.len() > MAX_SENDER_LEN {
            return Err(WireError::SenderTooLong(sender.len()));
        }
        if clock > MAX_CLOCK {
            return Err(WireError::ClockOutOfRange(clock));
        }
        Ok(Self { sender, clock, sent_at_nanos })
    }

    /// Address of the process that sent the message.
    pub fn sender(&self) -> &str {
        &self.sender
    }

    /// Sender's clock at the time of sending.
    pub fn clock(&self) -> u64 {
        self.clock
    }

    /// Sender's wall-clock time at the time of sending, Unix nanos.
    pub fn sent_at_nanos(&self) -> u64 {
        self.sent_at_nanos
    }

    /// Encode to a frame body.
    pub fn encode(&self) -> Vec<u8> {
        let sender = self.sender.as_bytes();
        let mut out = Vec::with_capacity(DELIVER_HEADER_LEN + sender.len());
        out.extend_from_slice(&MAGIC.to_be_bytes());
        out.push(VERSION);
        out.push(Kind::Deliver as u8);
        out.extend_from_slice(&self.clock.to_be_bytes());
        out.extend_from_slice(&self.sent_at_nanos.to_be_bytes());
        // length is bounded by MAX_SENDER_LEN on construction
        out.extend_from_slice(&(sender.len() as u16).to_be_bytes());
        out.extend_from_slice(sender);
        out
    }

    /// Decode a frame body; validates magic, version, kind and every field.
    pub fn decode(data: &[u8]) -> Result<Self, WireError> {
        let kind = decode_preamble(data, DELIVER_HEADER_LEN)?;
        if kind != Kind::Deliver {
            return Err(WireError::UnexpectedKind { expected: Kind::Deliver, got: kind });
        }
        let mut i = 4usize;
        let clock = read_u64(data, i);
        i += 8;
        let sent_at_nanos = read_u64(data, i);
        i += 8;
        let sender_len = read_u16(data, i) as usize;
        i += 2;
        let rest = &data[i..];
        if rest.len() != sender_len {
            return Err(WireError::LengthMismatch { declared: sender_len, actual: rest.len() });
        }
        let sender = std::str::from_utf8(rest).map_err(|_| WireError::InvalidSender)?;
        Self::with_timestamp(sender, clock, sent_at_nanos)
    }
}

/// The receiver's answer to a `Deliver` frame.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Reply {
    /// The message was applied. Carries no clock: receivers never echo their own.
    Ack,
    /// The message was refused without touching the receiver's clock.
    Reject(String),
}

impl Reply {
    /// Build a rejection, cutting the reason to [`MAX_REASON_LEN`] bytes.
    pub fn reject(reason: impl Into<String>) -> Self {
        let mut reason = reason.into();
        if reason.len() > MAX_REASON_LEN {
            let mut cut = MAX_REASON_LEN;
            while !reason.is_char_boundary(cut) {
                cut -= 1;
            }
            reason.truncate(cut);
        }
        Reply::Reject(reason)
    }

    pub fn encode(&self) -> Vec<u8> {
        let (kind, reason) = match self {
            Reply::Ack => (Kind::Ack, "".as_bytes()),
            Reply::Reject(reason) => (Kind::Reject, reason.as_bytes()),
        };
        let reason = &reason[..reason.len().min(MAX_REASON_LEN)];
        let mut out = Vec::with_capacity(REPLY_HEADER_LEN + reason.len());
        out.extend_from_slice(&MAGIC.to_be_bytes());
        out.push(VERSION);
        out.push(kind as u8);
        out.extend_from_slice(&(reason.len() as u16).to_be_bytes());
        out.extend_from_slice(reason);
        out
    }

    pub fn decode(data: &[u8]) -> Result<Self, WireError> {
        let kind = decode_preamble(data, REPLY_HEADER_LEN)?;
        let reason_len = read_u16(data, 4) as usize;
        let rest = &data[REPLY_HEADER_LEN..];
        if rest.len() != reason_len {
            return Err(WireError::LengthMismatch { declared: reason_len, actual: rest.len() });
        }
        match kind {
            Kind::Ack => Ok(Reply::Ack),
            Kind::Reject => Ok(Reply::Reject(String::from_utf8_lossy(rest).into_owned())),
            Kind::Deliver => Err(WireError::UnexpectedKind { expected: Kind::Ack, got: kind }),
        }
    }
}

/// Prefix a body with its `u32` big-endian length.
pub fn frame(body: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(4 + body.len());
    out.extend_from_slice(&(body.len() as u32).to_be_bytes());
    out.extend_from_slice(body);
    out
}

/// Parse a length prefix, refusing bodies over [`MAX_FRAME_LEN`].
pub fn frame_len(prefix: [u8; 4]) -> Result<usize, WireError> {
    let len = u32::from_be_bytes(prefix) as usize;
    if len > MAX_FRAME_LEN {
        return Err(WireError::FrameTooLarge(len));
    }
    Ok(len)
}

/// Check length, magic and version, and return the frame kind.
fn decode_preamble(data: &[u8], header_len: usize) -> Result<Kind, WireError> {
    if data.len() < header_len {
        return Err(WireError::Truncated { expected: header_len, got: data.len() });
    }
    let magic = read_u16(data, 0);
    if magic != MAGIC {
        return Err(WireError::InvalidMagic(magic));
    }
    let version = data[2];
    if version != VERSION {
        return Err(WireError::UnsupportedVersion(version));
    }
    Kind::from_u8(data[3])
}

#[inline]
fn read_u16(data: &[u8], i: usize) -> u16 {
    u16::from_be_bytes([data[i], data[i + 1]])
}

#[inline]
fn read_u64(data: &[u8], i: usize) -> u64 {
    u64::from_be_bytes([
        data[i], data[i + 1], data[i + 2], data[i + 3], data[i + 4], data[i + 5], data[i + 6], data[i + 7],
    ])
}
