//! Replication: one registry node streaming its registry to a peer.
//!
//! The connecting node (the [`ReplicationSender`]) opens with
//! `ReplicationHello`; the accepting node (the [`ReplicationReceiver`])
//! answers with `ReplicationHelloReply`, saying whether it wants a full sync.
//! If it does, the sender dumps its whole registry as `AddInstance` messages
//! before any incremental traffic. After that, adds and deletes flow in the
//! order the sender applied them. Resolving conflicting versions is up to
//! the receiving registry.

use crate::endpoint::Endpoint;
use crate::error::ProtocolError;
use regsync_channel::{MessageConnection, PendingAck};
use regsync_core::{InstanceInfo, Source};
use regsync_proto::{Direction, Message, Protocol, ReplicationHello, ReplicationHelloReply};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SenderState {
    Idle,
    AwaitingSnapshot,
    Streaming,
}

/// The node that pushes its registry to a peer.
#[derive(Debug)]
pub struct ReplicationSender {
    endpoint: Endpoint,
    source: Source,
    state: SenderState,
    peer: Option<Source>,
}

impl ReplicationSender {
    /// Replicate over `connection`, identifying as `source`.
    ///
    /// # Errors
    ///
    /// Returns error if the connection's incoming stream was already taken.
    pub fn new(connection: MessageConnection, source: Source) -> Result<Self, ProtocolError> {
        Ok(Self {
            endpoint: Endpoint::new(connection, Protocol::Replication, Direction::ServerToClient)?,
            source,
            state: SenderState::Idle,
            peer: None,
        })
    }

    /// Run the handshake and return the peer's reply.
    ///
    /// `registry_version` is a hint about how current this node's registry
    /// is; the peer uses it to decide whether it needs a full sync.
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError::Handshake`] if the handshake was already done
    /// or the peer turns out to be this node, or the channel error if the
    /// exchange fails. Failed handshakes are not retried.
    pub async fn handshake(
        &mut self,
        registry_version: u64,
    ) -> Result<ReplicationHelloReply, ProtocolError> {
        if self.state != SenderState::Idle {
            return Err(ProtocolError::Handshake(
                "handshake already completed".to_string(),
            ));
        }

        self.endpoint
            .send_acked(Message::ReplicationHello(ReplicationHello::new(
                self.source.clone(),
                registry_version,
            )))
            .await?;

        let message = self.endpoint.receive_required().await?;
        let Message::ReplicationHelloReply(ref reply) = message else {
            return Err(self.endpoint.unexpected(&message));
        };
        if reply.source.node_id == self.source.node_id {
            return Err(self.endpoint.reject(ProtocolError::Handshake(format!(
                "peer {} is this node",
                reply.source
            ))));
        }
        self.endpoint.accept(&message)?;

        tracing::info!(
            peer = %reply.source,
            full_sync = reply.full_sync_requested,
            "Replication handshake completed"
        );
        self.state = if reply.full_sync_requested {
            SenderState::AwaitingSnapshot
        } else {
            SenderState::Streaming
        };
        self.peer = Some(reply.source.clone());
        Ok(reply.clone())
    }

    /// Send the full registry dump the peer asked for, waiting for every
    /// acknowledgement. Returns the number of instances sent.
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError::SnapshotNotRequested`] unless the handshake
    /// asked for a full sync that has not been sent yet, or the channel error
    /// if an acknowledgement fails.
    pub async fn send_snapshot<I>(&mut self, registry: I) -> Result<usize, ProtocolError>
    where
        I: IntoIterator<Item = InstanceInfo>,
    {
        match self.state {
            SenderState::Idle => return Err(ProtocolError::HandshakeNotComplete),
            SenderState::Streaming => return Err(ProtocolError::SnapshotNotRequested),
            SenderState::AwaitingSnapshot => {}
        }

        let sent = self
            .endpoint
            .send_all_acked(registry.into_iter().map(Message::AddInstance))
            .await?;

        tracing::info!(instances = sent, "Full sync sent");
        self.state = SenderState::Streaming;
        Ok(sent)
    }

    /// Replicate an added or changed instance.
    ///
    /// # Errors
    ///
    /// Returns error if the handshake or a requested full sync is still
    /// outstanding.
    pub fn add_instance(&self, instance: InstanceInfo) -> Result<PendingAck, ProtocolError> {
        self.require_streaming()?;
        Ok(self
            .endpoint
            .connection()
            .submit_with_ack(Message::AddInstance(instance)))
    }

    /// Replicate a removed instance.
    ///
    /// # Errors
    ///
    /// Returns error if the handshake or a requested full sync is still
    /// outstanding.
    pub fn delete_instance(&self, id: impl Into<String>) -> Result<PendingAck, ProtocolError> {
        self.require_streaming()?;
        Ok(self
            .endpoint
            .connection()
            .submit_with_ack(Message::DeleteInstance(id.into())))
    }

    /// Tell the peer this node is alive.
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError::HandshakeNotComplete`] before the handshake.
    pub fn heartbeat(&self) -> Result<(), ProtocolError> {
        if self.state == SenderState::Idle {
            return Err(ProtocolError::HandshakeNotComplete);
        }
        self.endpoint.heartbeat()
    }

    /// Source of the peer, once the handshake completed.
    #[must_use]
    pub fn peer(&self) -> Option<&Source> {
        self.peer.as_ref()
    }

    /// The underlying connection.
    #[must_use]
    pub fn connection(&self) -> &MessageConnection {
        self.endpoint.connection()
    }

    fn require_streaming(&self) -> Result<(), ProtocolError> {
        match self.state {
            SenderState::Idle => Err(ProtocolError::HandshakeNotComplete),
            SenderState::AwaitingSnapshot => Err(ProtocolError::SnapshotPending),
            SenderState::Streaming => Ok(()),
        }
    }
}

/// Registry change carried by replication.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReplicationUpdate {
    /// Add or replace an instance
    Add(InstanceInfo),
    /// Remove an instance
    Delete(String),
    /// The peer is alive
    Heartbeat,
}

/// A replicated update tagged with the peer it came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReplicationEvent {
    /// Source the peer announced in its hello
    pub source: Source,
    /// The update
    pub update: ReplicationUpdate,
}

/// The node that accepts a peer's registry.
#[derive(Debug)]
pub struct ReplicationReceiver {
    endpoint: Endpoint,
    source: Source,
    peer: Option<Source>,
}

impl ReplicationReceiver {
    /// Accept replication over `connection`, identifying as `source`.
    ///
    /// # Errors
    ///
    /// Returns error if the connection's incoming stream was already taken.
    pub fn new(connection: MessageConnection, source: Source) -> Result<Self, ProtocolError> {
        Ok(Self {
            endpoint: Endpoint::new(connection, Protocol::Replication, Direction::ClientToServer)?,
            source,
            peer: None,
        })
    }

    /// Wait for the peer's hello and answer it.
    ///
    /// `decide` sees the hello (including the peer's registry version hint)
    /// and returns whether to request a full sync, or a reason to refuse the
    /// peer. A refused hello is never acknowledged: the connection closes and
    /// the peer's handshake fails.
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError::Handshake`] if the hello comes from this
    /// node or `decide` refuses it, [`ProtocolError::UnexpectedMessage`] if
    /// the first message is not a hello, or the channel error if the
    /// exchange fails.
    pub async fn accept_handshake<F>(
        &mut self,
        decide: F,
    ) -> Result<ReplicationHello, ProtocolError>
    where
        F: FnOnce(&ReplicationHello) -> Result<bool, String>,
    {
        if self.peer.is_some() {
            return Err(ProtocolError::Handshake(
                "handshake already completed".to_string(),
            ));
        }

        let message = self.endpoint.receive_required().await?;
        let Message::ReplicationHello(ref hello) = message else {
            return Err(self.endpoint.unexpected(&message));
        };
        if hello.source.node_id == self.source.node_id {
            return Err(self.endpoint.reject(ProtocolError::Handshake(format!(
                "replication loop: hello from own node {}",
                hello.source
            ))));
        }
        let full_sync = match decide(hello) {
            Ok(full_sync) => full_sync,
            Err(reason) => return Err(self.endpoint.reject(ProtocolError::Handshake(reason))),
        };
        self.endpoint.accept(&message)?;

        self.endpoint
            .send_acked(Message::ReplicationHelloReply(ReplicationHelloReply::new(
                self.source.clone(),
                full_sync,
            )))
            .await?;

        tracing::info!(
            peer = %hello.source,
            registry_version = hello.registry_version,
            full_sync,
            "Replication handshake accepted"
        );
        self.peer = Some(hello.source.clone());
        Ok(hello.clone())
    }

    /// Next replicated update, or `None` once the peer closed the connection.
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError::HandshakeNotComplete`] before
    /// [`accept_handshake`](Self::accept_handshake), the sequencing error for
    /// a second hello (closing the connection), or the channel error.
    pub async fn next_event(&mut self) -> Result<Option<ReplicationEvent>, ProtocolError> {
        let Some(source) = self.peer.clone() else {
            return Err(ProtocolError::HandshakeNotComplete);
        };
        let Some(message) = self.endpoint.receive().await? else {
            return Ok(None);
        };

        let update = match message {
            Message::AddInstance(ref instance) => ReplicationUpdate::Add(instance.clone()),
            Message::DeleteInstance(ref id) => ReplicationUpdate::Delete(id.clone()),
            Message::Heartbeat => ReplicationUpdate::Heartbeat,
            other => return Err(self.endpoint.unexpected(&other)),
        };
        self.endpoint.accept(&message)?;

        tracing::debug!(peer = %source, kind = message.kind(), "Replicated update received");
        Ok(Some(ReplicationEvent { source, update }))
    }

    /// Source of the peer, once the handshake completed.
    #[must_use]
    pub fn peer(&self) -> Option<&Source> {
        self.peer.as_ref()
    }

    /// The underlying connection.
    #[must_use]
    pub fn connection(&self) -> &MessageConnection {
        self.endpoint.connection()
    }
}
