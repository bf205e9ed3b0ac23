//! Process configuration.

use std::net::{Ipv4Addr, SocketAddr};
use std::time::Duration;

use crate::error::ProcessError;

/// Default interval between internal events.
pub const DEFAULT_TICK_INTERVAL: Duration = Duration::from_secs(1);
/// Default bound on a whole outbound call, connect included.
pub const DEFAULT_SEND_TIMEOUT: Duration = Duration::from_secs(2);
/// Default time a peer has to send its request once connected.
pub const DEFAULT_READ_TIMEOUT: Duration = Duration::from_secs(5);
/// Default limit on concurrently served inbound connections.
pub const DEFAULT_MAX_CONNECTIONS: u32 = 64;
/// Default number of observation events a subscriber may lag behind.
pub const DEFAULT_EVENT_CAPACITY: usize = 1024;

/// Configuration for a [`LogicalClockProcess`](crate::process::LogicalClockProcess).
#[derive(Debug, Clone)]
pub struct ProcessConfig {
    /// Address the inbound handler listens on. Port 0 picks a free port.
    pub listen_addr: SocketAddr,
    /// Address peers should use to reach this process. Defaults to the bound
    /// listen address; it is also the process identity in messages and events.
    pub advertise_addr: Option<String>,
    /// Interval between internal events. `None` disables the ticker.
    pub tick_interval: Option<Duration>,
    /// Bound on one outbound call; expiry counts as "peer unreachable".
    pub send_timeout: Duration,
    /// Time an inbound connection has to deliver its request.
    pub read_timeout: Duration,
    pub max_connections: u32,
    pub event_capacity: usize,
}

impl Default for ProcessConfig {
    fn default() -> Self {
        Self {
            listen_addr: SocketAddr::from((Ipv4Addr::LOCALHOST, 0)),
            advertise_addr: None,
            tick_interval: Some(DEFAULT_TICK_INTERVAL),
            send_timeout: DEFAULT_SEND_TIMEOUT,
            read_timeout: DEFAULT_READ_TIMEOUT,
            max_connections: DEFAULT_MAX_CONNECTIONS,
            event_capacity: DEFAULT_EVENT_CAPACITY,
        }
    }
}

impl ProcessConfig {
    /// Same configuration with the ticker turned off, for callers that drive
    /// internal events themselves.
    pub fn without_ticker(mut self) -> Self {
        self.tick_interval = None;
        self
    }

    pub fn validate(&self) -> Result<(), ProcessError> {
        let invalid = |reason: &str| Err(ProcessError::InvalidConfig { reason: reason.to_owned() });
        if self.tick_interval.is_some_and(|d| d.is_zero()) {
            return invalid("tick interval must be non-zero");
        }
        if self.send_timeout.is_zero() {
            return invalid("send timeout must be non-zero");
        }
        if self.read_timeout.is_zero() {
            return invalid("read timeout must be non-zero");
        }
        if self.max_connections == 0 {
            return invalid("max connections must be at least 1");
        }
        if self.event_capacity == 0 {
            return invalid("event capacity must be at least 1");
        }
        if self.advertise_addr.as_deref().is_some_and(str::is_empty) {
            return invalid("advertised address must not be empty");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let config = ProcessConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.tick_interval, Some(Duration::from_secs(1)));
        assert_eq!(config.listen_addr.port(), 0);
    }

    #[test]
    fn zero_durations_are_rejected() {
        let config = ProcessConfig { tick_interval: Some(Duration::ZERO), ..Default::default() };
        assert!(matches!(config.validate(), Err(ProcessError::InvalidConfig { .. })));

        let config = ProcessConfig { send_timeout: Duration::ZERO, ..Default::default() };
        assert!(config.validate().is_err());
    }

    #[test]
    fn ticker_can_be_disabled() {
        let config = ProcessConfig::default().without_ticker();
        assert!(config.tick_interval.is_none());
        assert!(config.validate().is_ok());
    }
}
