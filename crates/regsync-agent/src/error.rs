//! Protocol driver errors.

use regsync_channel::ChannelError;
use regsync_core::{FieldMismatchError, MalformedInterestError};
use regsync_proto::{Direction, Protocol, StreamStateError};

/// Errors raised by the registration, replication and discovery drivers.
///
/// Sequencing violations by the peer close the connection before they are
/// returned; local misuse (calling an operation out of order) leaves it open.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProtocolError {
    /// The underlying channel failed
    #[error(transparent)]
    Channel(#[from] ChannelError),

    /// A message that the protocol does not allow at this point
    #[error("unexpected {kind} on {protocol:?} ({direction:?})")]
    UnexpectedMessage {
        /// Protocol the session speaks
        protocol: Protocol,
        /// Direction the message travelled
        direction: Direction,
        /// Message kind
        kind: &'static str,
    },

    /// Heartbeat or unregister before a successful register
    #[error("instance is not registered")]
    NotRegistered,

    /// Traffic after unregister
    #[error("registration lifecycle has ended")]
    LifecycleEnded,

    /// The replication handshake was refused
    #[error("replication handshake failed: {0}")]
    Handshake(String),

    /// Replication traffic before the handshake completed
    #[error("replication handshake not complete")]
    HandshakeNotComplete,

    /// Incremental replication traffic while the requested full sync is
    /// still outstanding
    #[error("full sync requested but not yet sent")]
    SnapshotPending,

    /// A full sync was offered that the peer did not request
    #[error("peer did not request a full sync")]
    SnapshotNotRequested,

    /// Discovery batch framing violated
    #[error(transparent)]
    StreamState(#[from] StreamStateError),

    /// A delta could not be applied to the subscriber's view
    #[error(transparent)]
    Delta(#[from] FieldMismatchError),

    /// An interest outside the canonical form
    #[error(transparent)]
    MalformedInterest(#[from] MalformedInterestError),

    /// The peer closed the connection while a reply was expected
    #[error("connection closed by peer")]
    ConnectionClosed,
}
