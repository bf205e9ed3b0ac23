//! Utility helpers shared by the node and the one-shot client.

use core::time::Duration;
use std::io;

/// Unix time in nanoseconds since epoch as u64.
/// Only used for timestamping messages and trace events, never for ordering.
pub fn now_unix_nanos() -> u64 {
    use std::time::SystemTime;
    let now = SystemTime::now();
    let since = now.duration_since(SystemTime::UNIX_EPOCH).unwrap_or(Duration::from_secs(0));
    since.as_secs() * 1_000_000_000 + since.subsec_nanos() as u64
}

/// Whether a connect error means nobody is listening at the address.
pub fn is_unreachable(err: &io::Error) -> bool {
    matches!(
        err.kind(),
        io::ErrorKind::ConnectionRefused
            | io::ErrorKind::TimedOut
            | io::ErrorKind::NotFound
            | io::ErrorKind::AddrNotAvailable
            | io::ErrorKind::HostUnreachable
            | io::ErrorKind::NetworkUnreachable
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn refused_is_unreachable() {
        assert!(is_unreachable(&io::Error::from(io::ErrorKind::ConnectionRefused)));
        assert!(is_unreachable(&io::Error::from(io::ErrorKind::TimedOut)));
        assert!(!is_unreachable(&io::Error::from(io::ErrorKind::ConnectionReset)));
    }

    #[test]
    fn clock_is_after_epoch() {
        assert!(now_unix_nanos() > 1_600_000_000 * 1_000_000_000);
    }
}
