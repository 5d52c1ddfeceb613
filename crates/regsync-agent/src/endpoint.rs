//! One side of a protocol session over a [`MessageConnection`].

use crate::error::ProtocolError;
use regsync_channel::{Incoming, MessageConnection, PendingAck};
use regsync_proto::{Direction, Message, Protocol};

/// A connection bound to one protocol and one side of it.
#[derive(Debug)]
pub(crate) struct Endpoint {
    connection: MessageConnection,
    incoming: Incoming,
    protocol: Protocol,
    inbound: Direction,
}

impl Endpoint {
    /// Bind `connection`, taking its incoming stream.
    pub(crate) fn new(
        connection: MessageConnection,
        protocol: Protocol,
        inbound: Direction,
    ) -> Result<Self, ProtocolError> {
        let incoming = connection.incoming()?;
        Ok(Self {
            connection,
            incoming,
            protocol,
            inbound,
        })
    }

    pub(crate) fn connection(&self) -> &MessageConnection {
        &self.connection
    }

    /// Next inbound message that is legal in this protocol and direction.
    ///
    /// An illegal message closes the connection.
    pub(crate) async fn receive(&mut self) -> Result<Option<Message>, ProtocolError> {
        let Some(message) = self.incoming.next().await? else {
            return Ok(None);
        };

        if !message.is_legal(self.protocol, self.inbound) {
            return Err(self.unexpected(&message));
        }
        Ok(Some(message))
    }

    /// Like [`receive`](Self::receive), but a closed connection is an error.
    pub(crate) async fn receive_required(&mut self) -> Result<Message, ProtocolError> {
        self.receive().await?.ok_or(ProtocolError::ConnectionClosed)
    }

    /// Acknowledge `message` if the protocol delivers it with acknowledgement.
    pub(crate) fn accept(&self, message: &Message) -> Result<(), ProtocolError> {
        if message.requires_ack() {
            self.acknowledge()?;
        }
        Ok(())
    }

    /// Acknowledge the oldest unacknowledged inbound message.
    pub(crate) fn acknowledge(&self) -> Result<(), ProtocolError> {
        self.connection.acknowledge()?;
        Ok(())
    }

    /// Close the connection over a peer violation and hand the error back.
    pub(crate) fn reject(&self, error: ProtocolError) -> ProtocolError {
        tracing::warn!(protocol = ?self.protocol, %error, "Closing connection after protocol violation");
        self.connection.close();
        error
    }

    /// Reject `message` as out of sequence.
    pub(crate) fn unexpected(&self, message: &Message) -> ProtocolError {
        self.reject(ProtocolError::UnexpectedMessage {
            protocol: self.protocol,
            direction: self.inbound,
            kind: message.kind(),
        })
    }

    /// Send a heartbeat, which is never acknowledged.
    pub(crate) fn heartbeat(&self) -> Result<(), ProtocolError> {
        self.connection.submit(Message::Heartbeat)?;
        Ok(())
    }

    /// Queue an acknowledged message and wait for the acknowledgement.
    pub(crate) async fn send_acked(&self, message: Message) -> Result<(), ProtocolError> {
        self.connection.submit_with_ack(message).await?;
        Ok(())
    }

    /// Queue every message with acknowledgement, then wait for all of them.
    pub(crate) async fn send_all_acked<I>(&self, messages: I) -> Result<usize, ProtocolError>
    where
        I: IntoIterator<Item = Message>,
    {
        let pending: Vec<PendingAck> = messages
            .into_iter()
            .map(|message| self.connection.submit_with_ack(message))
            .collect();
        let count = pending.len();
        for ack in pending {
            ack.await?;
        }
        Ok(count)
    }
}
