//! Agent configuration.

use anyhow::{Context, Result};
use regsync_channel::ChannelConfig;
use regsync_core::{Origin, Source};
use std::time::Duration;
use uuid::Uuid;

/// Agent configuration.
#[derive(Debug, Clone)]
pub struct AgentConfig {
    /// Identifier of this registry node, carried in every [`Source`] it emits
    pub node_id: String,

    /// Channel tunables shared by every connection the agent opens
    pub channel: ChannelConfig,

    /// Discovery subscriber configuration
    pub discovery: DiscoveryConfig,
}

/// Discovery subscriber configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveryConfig {
    /// Reject updates that arrive outside a buffer bracket instead of
    /// applying them one by one
    pub buffered: bool,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self { buffered: true }
    }
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            node_id: Uuid::new_v4().to_string(),
            channel: ChannelConfig::default(),
            discovery: DiscoveryConfig::default(),
        }
    }
}

impl AgentConfig {
    /// Load configuration from environment variables.
    ///
    /// # Environment Variables
    ///
    /// - `REGSYNC_NODE_ID`: Node identifier (a random UUID if unset)
    /// - `REGSYNC_ACK_TIMEOUT_MS`: Acknowledgement timeout in milliseconds
    /// - `REGSYNC_HEARTBEAT_INTERVAL_MS`: Advisory heartbeat interval in milliseconds
    /// - `REGSYNC_MAX_FRAME_LEN`: Largest accepted frame in bytes
    /// - `REGSYNC_BUFFERED_DISCOVERY`: `true` or `false`
    ///
    /// # Errors
    ///
    /// Returns error if a variable is set to a malformed value.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration through an arbitrary variable lookup.
    ///
    /// # Errors
    ///
    /// Returns error if a variable is set to a malformed value.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(node_id) = lookup("REGSYNC_NODE_ID") {
            let node_id = node_id.trim();
            anyhow::ensure!(!node_id.is_empty(), "REGSYNC_NODE_ID must not be blank");
            config.node_id = node_id.to_string();
        }

        if let Some(ms) = lookup("REGSYNC_ACK_TIMEOUT_MS") {
            config.channel.ack_timeout =
                parse_millis(&ms).context("Invalid REGSYNC_ACK_TIMEOUT_MS")?;
        }

        if let Some(ms) = lookup("REGSYNC_HEARTBEAT_INTERVAL_MS") {
            config.channel.heartbeat_interval =
                parse_millis(&ms).context("Invalid REGSYNC_HEARTBEAT_INTERVAL_MS")?;
        }

        if let Some(len) = lookup("REGSYNC_MAX_FRAME_LEN") {
            config.channel.max_frame_len = len
                .trim()
                .parse()
                .context("Invalid REGSYNC_MAX_FRAME_LEN")?;
        }

        if let Some(buffered) = lookup("REGSYNC_BUFFERED_DISCOVERY") {
            config.discovery.buffered = buffered
                .trim()
                .parse()
                .context("Invalid REGSYNC_BUFFERED_DISCOVERY")?;
        }

        Ok(config)
    }

    /// Source tag for entries registered directly with this node.
    #[must_use]
    pub fn local_source(&self) -> Source {
        Source::new(Origin::Local, self.node_id.clone(), 0)
    }
}

fn parse_millis(value: &str) -> Result<Duration> {
    let millis: u64 = value.trim().parse()?;
    anyhow::ensure!(millis > 0, "duration must be positive");
    Ok(Duration::from_millis(millis))
}
