//! Channel errors.

use regsync_proto::MessageError;
use std::time::Duration;

/// Errors surfaced by a [`MessageConnection`](crate::MessageConnection).
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ChannelError {
    /// Transport failure, or the connection closed while the operation was
    /// outstanding. Reported to every pending acknowledgement and to the
    /// incoming reader; never retried by the channel
    #[error("connection error: {0}")]
    Connection(String),

    /// No acknowledgement arrived in time. Only the waiting caller sees
    /// this; the connection stays usable
    #[error("no acknowledgement within {0:?}")]
    AckTimeout(Duration),

    /// `acknowledge` called with no delivered message awaiting one
    #[error("no delivered message is waiting for acknowledgement")]
    NothingToAcknowledge,

    /// `incoming` was already taken by another reader
    #[error("incoming message stream already taken")]
    IncomingTaken,

    /// Encoded frame exceeds the configured limit
    #[error("frame of {len} bytes exceeds limit of {max} bytes")]
    FrameTooLarge {
        /// Encoded frame length
        len: usize,
        /// Configured maximum
        max: usize,
    },

    /// Message could not be encoded
    #[error("codec error: {0}")]
    Codec(String),
}

impl From<MessageError> for ChannelError {
    fn from(err: MessageError) -> Self {
        ChannelError::Codec(err.to_string())
    }
}
