//! Channel configuration.

use std::time::Duration;

/// Tunables for a [`MessageConnection`](crate::MessageConnection).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelConfig {
    /// How long `submit_with_ack` waits before failing with a timeout
    pub ack_timeout: Duration,

    /// Expected heartbeat cadence. Advisory: the channel does not enforce it,
    /// it is exposed for the drivers and their owners
    pub heartbeat_interval: Duration,

    /// Largest encoded frame accepted in either direction, in bytes
    pub max_frame_len: usize,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            ack_timeout: Duration::from_secs(30),
            heartbeat_interval: Duration::from_secs(30),
            max_frame_len: 16 * 1024 * 1024,
        }
    }
}

impl ChannelConfig {
    /// Override the acknowledgement timeout.
    #[must_use]
    pub fn with_ack_timeout(mut self, ack_timeout: Duration) -> Self {
        self.ack_timeout = ack_timeout;
        self
    }

    /// Override the advisory heartbeat interval.
    #[must_use]
    pub fn with_heartbeat_interval(mut self, heartbeat_interval: Duration) -> Self {
        self.heartbeat_interval = heartbeat_interval;
        self
    }
}
