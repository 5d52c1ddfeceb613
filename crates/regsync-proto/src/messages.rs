//! Protocol messages for registration, replication, and discovery.
//!
//! All three vocabularies share one closed [`Message`] union. Which variants
//! may travel in which direction of which protocol is answered by
//! [`Message::is_legal`]:
//!
//! | Protocol | Client -> server | Server -> client |
//! |----------|------------------|------------------|
//! | Registration | `Register`, `Unregister`, `Heartbeat` | - |
//! | Replication | `ReplicationHello`, `AddInstance`, `DeleteInstance`, `Heartbeat` | `ReplicationHelloReply` |
//! | Discovery | `InterestRegistration`, `UnregisterInterestSet`, `Heartbeat` | `AddInstance`, `DeleteInstance`, `UpdateInstanceInfo`, `StreamStateUpdate` |
//!
//! For replication the "client" is the node that opened the session and sent
//! the hello.

use regsync_core::{Delta, InstanceInfo, Interest, Source, StreamStateNotification};
use serde::{Deserialize, Serialize};

/// The three sub-protocols carried over an acknowledged channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Protocol {
    /// Client announcing its own instance to a registry node
    Registration,
    /// Registry node replicating its registry to a peer
    Replication,
    /// Discovery client subscribing to a filtered registry view
    Discovery,
}

/// Direction of travel relative to the party that opened the connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    /// From the connecting party to the accepting one
    ClientToServer,
    /// From the accepting party back to the connecting one
    ServerToClient,
}

/// Replication handshake opener.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplicationHello {
    /// Identity of the sending node
    pub source: Source,
    /// Current registry version of the sender, a hint for full-sync decisions
    pub registry_version: u64,
}

impl ReplicationHello {
    /// Create a hello message.
    #[must_use]
    pub fn new(source: Source, registry_version: u64) -> Self {
        Self {
            source,
            registry_version,
        }
    }
}

/// Replication handshake answer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplicationHelloReply {
    /// Identity of the replying node
    pub source: Source,
    /// Whether the hello sender must first dump its whole registry
    pub full_sync_requested: bool,
}

impl ReplicationHelloReply {
    /// Create a hello reply.
    #[must_use]
    pub fn new(source: Source, full_sync_requested: bool) -> Self {
        Self {
            source,
            full_sync_requested,
        }
    }
}

/// Every message of the registration, replication, and discovery protocols.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Message {
    /// Announce (or update) the connection's instance
    Register(InstanceInfo),
    /// Withdraw the connection's instance
    Unregister,
    /// Open a replication session
    ReplicationHello(ReplicationHello),
    /// Answer a replication hello
    ReplicationHelloReply(ReplicationHelloReply),
    /// Replace the subscriber's active interest
    InterestRegistration(Interest),
    /// Clear the subscriber's active interest
    UnregisterInterestSet,
    /// A full instance, added to the receiver's view
    AddInstance(InstanceInfo),
    /// An instance removed from the receiver's view
    DeleteInstance(String),
    /// A single-field change to an instance in the receiver's view
    UpdateInstanceInfo(Delta),
    /// Batch boundary marker
    StreamStateUpdate(StreamStateNotification),
    /// Liveness signal, never acknowledged
    Heartbeat,
}

impl Message {
    /// Variant name, for logs and errors.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Message::Register(_) => "Register",
            Message::Unregister => "Unregister",
            Message::ReplicationHello(_) => "ReplicationHello",
            Message::ReplicationHelloReply(_) => "ReplicationHelloReply",
            Message::InterestRegistration(_) => "InterestRegistration",
            Message::UnregisterInterestSet => "UnregisterInterestSet",
            Message::AddInstance(_) => "AddInstance",
            Message::DeleteInstance(_) => "DeleteInstance",
            Message::UpdateInstanceInfo(_) => "UpdateInstanceInfo",
            Message::StreamStateUpdate(_) => "StreamStateUpdate",
            Message::Heartbeat => "Heartbeat",
        }
    }

    /// Whether the protocol delivers this message with acknowledgement.
    #[must_use]
    pub fn requires_ack(&self) -> bool {
        !matches!(self, Message::Heartbeat)
    }

    /// Whether this message may travel in `direction` under `protocol`.
    #[must_use]
    pub fn is_legal(&self, protocol: Protocol, direction: Direction) -> bool {
        use Direction::{ClientToServer, ServerToClient};

        match (protocol, direction) {
            (Protocol::Registration, ClientToServer) => matches!(
                self,
                Message::Register(_) | Message::Unregister | Message::Heartbeat
            ),
            (Protocol::Registration, ServerToClient) => false,
            (Protocol::Replication, ClientToServer) => matches!(
                self,
                Message::ReplicationHello(_)
                    | Message::AddInstance(_)
                    | Message::DeleteInstance(_)
                    | Message::Heartbeat
            ),
            (Protocol::Replication, ServerToClient) => {
                matches!(self, Message::ReplicationHelloReply(_))
            }
            (Protocol::Discovery, ClientToServer) => matches!(
                self,
                Message::InterestRegistration(_)
                    | Message::UnregisterInterestSet
                    | Message::Heartbeat
            ),
            (Protocol::Discovery, ServerToClient) => matches!(
                self,
                Message::AddInstance(_)
                    | Message::DeleteInstance(_)
                    | Message::UpdateInstanceInfo(_)
                    | Message::StreamStateUpdate(_)
            ),
        }
    }

    /// Serialize to CBOR bytes.
    ///
    /// # Errors
    ///
    /// Returns error if serialization fails.
    pub fn to_cbor(&self) -> Result<Vec<u8>, MessageError> {
        let mut bytes = Vec::new();
        ciborium::into_writer(self, &mut bytes)
            .map_err(|e| MessageError::Serialize(e.to_string()))?;
        Ok(bytes)
    }

    /// Deserialize from CBOR bytes.
    ///
    /// # Errors
    ///
    /// Returns error if deserialization fails.
    pub fn from_cbor(bytes: &[u8]) -> Result<Self, MessageError> {
        ciborium::from_reader(bytes).map_err(|e| MessageError::Deserialize(e.to_string()))
    }
}

/// Errors for message serialization/deserialization.
#[derive(Debug, Clone, thiserror::Error)]
pub enum MessageError {
    /// Serialization failed
    #[error("serialization failed: {0}")]
    Serialize(String),
    /// Deserialization failed
    #[error("deserialization failed: {0}")]
    Deserialize(String),
}
