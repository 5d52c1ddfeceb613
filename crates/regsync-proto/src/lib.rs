//! # regsync Protocol
//!
//! Message vocabulary and stream-state framing for the regsync registry
//! protocols.
//!
//! ## Messages
//!
//! - Registration: `Register`, `Unregister`, `Heartbeat`
//! - Replication: `ReplicationHello`/`ReplicationHelloReply` handshake,
//!   then `AddInstance`/`DeleteInstance`
//! - Discovery: `InterestRegistration`/`UnregisterInterestSet` from the
//!   subscriber; `AddInstance`, `DeleteInstance`, `UpdateInstanceInfo` and
//!   `StreamStateUpdate` from the server
//!
//! ## Encoding
//!
//! Messages encode to CBOR. Polymorphic payloads use explicit variant tags.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod messages;
pub mod stream_state;

pub use messages::{
    Direction, Message, MessageError, Protocol, ReplicationHello, ReplicationHelloReply,
};
pub use stream_state::{frame_batch, Batch, StreamStateError, StreamStateTracker};
