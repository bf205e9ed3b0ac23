//! Lamport logical clock process.
//! Provides:
//! - `ClockState`, the lock-guarded clock with the tick and receive rules
//! - `Message` and `Reply` with binary encoding/decoding (big-endian)
//! - `LogicalClockProcess`: inbound handler, ticker and outbound sender
//! - An observation channel reporting every clock update and send attempt

pub mod clock;
pub mod config;
pub mod error;
pub mod inbound;
pub mod observe;
pub mod process;
pub mod ticker;
pub mod transport;
pub mod util;
pub mod wire;

pub use clock::{ClockRule, ClockState, ClockUpdate};
pub use config::ProcessConfig;
pub use error::{ProcessError, ReceiveError, SendFailure};
pub use inbound::Ack;
pub use observe::{ClockEvent, EventKind, Observer};
pub use process::LogicalClockProcess;
pub use transport::SendResult;
pub use wire::{Message, Reply, WireError, MAX_CLOCK};
