//! Registration: a client announcing its own instance to a registry node.
//!
//! `Register` must come first; after it the client heartbeats and may
//! re-register an updated instance. `Unregister` ends the lifecycle for good,
//! even though the connection may stay open. Eviction of silent clients is
//! left to the registry.

use crate::endpoint::Endpoint;
use crate::error::ProtocolError;
use regsync_channel::MessageConnection;
use regsync_core::InstanceInfo;
use regsync_proto::{Direction, Message, Protocol};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Lifecycle {
    Unregistered,
    Registered,
    Ended,
}

impl Lifecycle {
    fn require_registered(self) -> Result<(), ProtocolError> {
        match self {
            Lifecycle::Unregistered => Err(ProtocolError::NotRegistered),
            Lifecycle::Registered => Ok(()),
            Lifecycle::Ended => Err(ProtocolError::LifecycleEnded),
        }
    }
}

/// Client side of the registration protocol.
#[derive(Debug)]
pub struct RegistrationClient {
    endpoint: Endpoint,
    lifecycle: Lifecycle,
    instance: Option<InstanceInfo>,
}

impl RegistrationClient {
    /// Speak registration over `connection`.
    ///
    /// # Errors
    ///
    /// Returns error if the connection's incoming stream was already taken.
    pub fn new(connection: MessageConnection) -> Result<Self, ProtocolError> {
        Ok(Self {
            endpoint: Endpoint::new(connection, Protocol::Registration, Direction::ServerToClient)?,
            lifecycle: Lifecycle::Unregistered,
            instance: None,
        })
    }

    /// Register `instance`, or replace the registered one, and wait for the
    /// registry to acknowledge it.
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError::LifecycleEnded`] after [`unregister`](Self::unregister),
    /// or the channel error if the acknowledgement fails.
    pub async fn register(&mut self, instance: InstanceInfo) -> Result<(), ProtocolError> {
        if self.lifecycle == Lifecycle::Ended {
            return Err(ProtocolError::LifecycleEnded);
        }

        self.endpoint
            .send_acked(Message::Register(instance.clone()))
            .await?;

        tracing::info!(id = instance.id(), status = %instance.status(), "Instance registered");
        self.lifecycle = Lifecycle::Registered;
        self.instance = Some(instance);
        Ok(())
    }

    /// Tell the registry the instance is alive.
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError::NotRegistered`] before a successful register,
    /// [`ProtocolError::LifecycleEnded`] after unregister.
    pub fn heartbeat(&self) -> Result<(), ProtocolError> {
        self.lifecycle.require_registered()?;
        self.endpoint.heartbeat()
    }

    /// Remove the instance from the registry and end the lifecycle.
    ///
    /// The lifecycle ends as soon as the message is queued, whether or not
    /// the acknowledgement arrives.
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError::NotRegistered`] before a successful register,
    /// [`ProtocolError::LifecycleEnded`] if already unregistered, or the
    /// channel error if the acknowledgement fails.
    pub async fn unregister(&mut self) -> Result<(), ProtocolError> {
        self.lifecycle.require_registered()?;
        self.lifecycle = Lifecycle::Ended;

        let result = self.endpoint.send_acked(Message::Unregister).await;
        if let Some(instance) = self.instance.take() {
            tracing::info!(id = instance.id(), "Instance unregistered");
        }
        result
    }

    /// The last instance the registry acknowledged, until unregister.
    #[must_use]
    pub fn instance(&self) -> Option<&InstanceInfo> {
        self.instance.as_ref()
    }

    /// Whether a register has been acknowledged and not yet withdrawn.
    #[must_use]
    pub fn is_registered(&self) -> bool {
        self.lifecycle == Lifecycle::Registered
    }

    /// The underlying connection.
    #[must_use]
    pub fn connection(&self) -> &MessageConnection {
        self.endpoint.connection()
    }
}

/// What a registering client did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RegistrationEvent {
    /// The client registered or replaced its instance
    Registered(InstanceInfo),
    /// The client is alive
    Heartbeat,
    /// The client withdrew its instance
    Unregistered,
}

/// Registry side of the registration protocol.
///
/// Each message is validated against the client's lifecycle before it is
/// acknowledged; a violation closes the connection.
#[derive(Debug)]
pub struct RegistrationHandler {
    endpoint: Endpoint,
    lifecycle: Lifecycle,
}

impl RegistrationHandler {
    /// Serve registration over `connection`.
    ///
    /// # Errors
    ///
    /// Returns error if the connection's incoming stream was already taken.
    pub fn new(connection: MessageConnection) -> Result<Self, ProtocolError> {
        Ok(Self {
            endpoint: Endpoint::new(connection, Protocol::Registration, Direction::ClientToServer)?,
            lifecycle: Lifecycle::Unregistered,
        })
    }

    /// Next client event, or `None` once the client closed the connection.
    ///
    /// # Errors
    ///
    /// Returns the sequencing error for a message out of order (and closes
    /// the connection), or the channel error on transport failure.
    pub async fn next_event(&mut self) -> Result<Option<RegistrationEvent>, ProtocolError> {
        let Some(message) = self.endpoint.receive().await? else {
            return Ok(None);
        };

        let event = match message {
            Message::Register(ref instance) => {
                if self.lifecycle == Lifecycle::Ended {
                    return Err(self.endpoint.reject(ProtocolError::LifecycleEnded));
                }
                self.lifecycle = Lifecycle::Registered;
                RegistrationEvent::Registered(instance.clone())
            }
            Message::Heartbeat => {
                if let Err(e) = self.lifecycle.require_registered() {
                    return Err(self.endpoint.reject(e));
                }
                RegistrationEvent::Heartbeat
            }
            Message::Unregister => {
                if let Err(e) = self.lifecycle.require_registered() {
                    return Err(self.endpoint.reject(e));
                }
                self.lifecycle = Lifecycle::Ended;
                RegistrationEvent::Unregistered
            }
            other => return Err(self.endpoint.unexpected(&other)),
        };

        self.endpoint.accept(&message)?;
        Ok(Some(event))
    }

    /// The underlying connection.
    #[must_use]
    pub fn connection(&self) -> &MessageConnection {
        self.endpoint.connection()
    }
}
