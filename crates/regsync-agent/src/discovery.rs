//! Discovery: a client subscribing to a filtered view of the registry.
//!
//! The client holds at most one interest. Registering a new one replaces
//! the old one, and the server answers with whatever adds, deletes and
//! updates bring the client's view in line with the new interest.
//! Unregistering clears the interest. Every batch the server flushes is
//! bracketed by `BufferStart`/`BufferEnd` for the active interest, and the
//! client applies a batch only once it is complete.

use crate::config::DiscoveryConfig;
use crate::endpoint::Endpoint;
use crate::error::ProtocolError;
use regsync_channel::MessageConnection;
use regsync_core::{ChangeNotification, InstanceInfo, Interest};
use regsync_proto::{frame_batch, Batch, Direction, Message, Protocol, StreamStateTracker};
use std::collections::{BTreeMap, VecDeque};
use std::future::IntoFuture;

/// The subscriber's materialized view of the registry.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClientView {
    instances: BTreeMap<String, InstanceInfo>,
    settled: bool,
}

impl ClientView {
    /// Instance with the given id.
    #[must_use]
    pub fn get(&self, id: &str) -> Option<&InstanceInfo> {
        self.instances.get(id)
    }

    /// Instances in id order.
    pub fn instances(&self) -> impl Iterator<Item = &InstanceInfo> {
        self.instances.values()
    }

    /// Number of instances in view.
    #[must_use]
    pub fn len(&self) -> usize {
        self.instances.len()
    }

    /// Whether the view holds no instances.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.instances.is_empty()
    }

    /// Whether the last batch for the current interest has been applied
    /// and no other batch is open.
    #[must_use]
    pub fn is_settled(&self) -> bool {
        self.settled
    }

    /// Apply a complete batch. Either every update applies or the view is
    /// left untouched.
    fn apply(&mut self, batch: &Batch) -> Result<(), ProtocolError> {
        let mut instances = self.instances.clone();
        for update in &batch.updates {
            match update {
                Message::AddInstance(instance) => {
                    instances.insert(instance.id().to_string(), instance.clone());
                }
                Message::DeleteInstance(id) => {
                    instances.remove(id);
                }
                Message::UpdateInstanceInfo(delta) => match instances.get(delta.id()) {
                    Some(current) => {
                        let updated = current.apply_delta(delta)?;
                        instances.insert(updated.id().to_string(), updated);
                    }
                    None => {
                        tracing::warn!(id = delta.id(), "Update for an instance not in view");
                    }
                },
                other => {
                    return Err(ProtocolError::UnexpectedMessage {
                        protocol: Protocol::Discovery,
                        direction: Direction::ServerToClient,
                        kind: other.kind(),
                    })
                }
            }
        }
        self.instances = instances;
        Ok(())
    }
}

/// Client side of the discovery protocol.
#[derive(Debug)]
pub struct DiscoveryClient {
    endpoint: Endpoint,
    tracker: StreamStateTracker,
    interest: Interest,
    view: ClientView,
    ready: VecDeque<Batch>,
}

impl DiscoveryClient {
    /// Subscribe over `connection`.
    ///
    /// # Errors
    ///
    /// Returns error if the connection's incoming stream was already taken.
    pub fn new(
        connection: MessageConnection,
        config: &DiscoveryConfig,
    ) -> Result<Self, ProtocolError> {
        Ok(Self {
            endpoint: Endpoint::new(connection, Protocol::Discovery, Direction::ServerToClient)?,
            tracker: StreamStateTracker::new(config.buffered),
            interest: Interest::None,
            view: ClientView::default(),
            ready: VecDeque::new(),
        })
    }

    /// Replace the active interest and wait for the server to accept it.
    ///
    /// Batches that arrive while the acknowledgement is outstanding are
    /// applied to the view and handed out first by
    /// [`next_batch`](Self::next_batch). The view stays unsettled until the
    /// batch answering this interest has been received.
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError::MalformedInterest`] for a non-canonical
    /// interest, or the channel error if the acknowledgement fails.
    pub async fn register_interest(&mut self, interest: Interest) -> Result<(), ProtocolError> {
        interest.validate()?;
        self.request(Message::InterestRegistration(interest.clone()))
            .await?;

        tracing::info!(%interest, "Interest registered");
        self.interest = interest;
        self.view.settled = false;
        Ok(())
    }

    /// Clear the active interest.
    ///
    /// # Errors
    ///
    /// Returns the channel error if the acknowledgement fails.
    pub async fn unregister_interest(&mut self) -> Result<(), ProtocolError> {
        self.request(Message::UnregisterInterestSet).await?;

        tracing::info!("Interest cleared");
        self.interest = Interest::None;
        self.view.settled = false;
        Ok(())
    }

    /// Tell the server this client is alive.
    ///
    /// # Errors
    ///
    /// Returns the channel error if the connection is closed.
    pub fn heartbeat(&self) -> Result<(), ProtocolError> {
        self.endpoint.heartbeat()
    }

    /// Wait for the next complete batch and apply it to the view.
    ///
    /// Returns `None` once the server closed the connection.
    ///
    /// # Errors
    ///
    /// Returns the framing or delta error for traffic that cannot be applied
    /// (closing the connection), or the channel error.
    pub async fn next_batch(&mut self) -> Result<Option<Batch>, ProtocolError> {
        if let Some(batch) = self.ready.pop_front() {
            return Ok(Some(batch));
        }
        self.receive_batch().await
    }

    /// Send an acknowledged request while still consuming server traffic.
    ///
    /// The server may be waiting on acknowledgements for a batch it flushed
    /// before reading this request, so inbound batches keep being received
    /// and queued until the acknowledgement arrives.
    async fn request(&mut self, message: Message) -> Result<(), ProtocolError> {
        let mut ack = self
            .endpoint
            .connection()
            .submit_with_ack(message)
            .into_future();
        loop {
            tokio::select! {
                // The acknowledgement precedes any batch answering this request.
                biased;
                acked = &mut ack => return Ok(acked?),
                received = self.receive_batch() => match received? {
                    Some(batch) => self.ready.push_back(batch),
                    None => return Err(ProtocolError::ConnectionClosed),
                },
            }
        }
    }

    /// Receive messages until a batch completes, then apply it.
    ///
    /// Messages are acknowledged only once they passed framing and, for the
    /// message completing a batch, once the batch applied. Cancel-safe: the
    /// only await point is the receive.
    async fn receive_batch(&mut self) -> Result<Option<Batch>, ProtocolError> {
        loop {
            let Some(message) = self.endpoint.receive().await? else {
                return Ok(None);
            };
            let requires_ack = message.requires_ack();

            let observed = match self.tracker.observe(message) {
                Ok(observed) => observed,
                Err(e) => return Err(self.endpoint.reject(e.into())),
            };
            if let Some(batch) = &observed {
                if let Err(e) = self.view.apply(batch) {
                    return Err(self.endpoint.reject(e));
                }
                // An unbracketed update leaves settledness as it was.
                if let Some(interest) = &batch.interest {
                    self.view.settled = self.tracker.is_settled() && *interest == self.interest;
                }
            }
            if requires_ack {
                self.endpoint.acknowledge()?;
            }

            if let Some(batch) = observed {
                tracing::debug!(
                    updates = batch.updates.len(),
                    settled = self.view.settled,
                    "Discovery batch applied"
                );
                return Ok(Some(batch));
            }
        }
    }

    /// The active interest.
    #[must_use]
    pub fn interest(&self) -> &Interest {
        &self.interest
    }

    /// The materialized view.
    #[must_use]
    pub fn view(&self) -> &ClientView {
        &self.view
    }

    /// The underlying connection.
    #[must_use]
    pub fn connection(&self) -> &MessageConnection {
        self.endpoint.connection()
    }
}

/// What a discovery client asked for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DiscoveryRequest {
    /// Replace the active interest
    Interest(Interest),
    /// Clear the active interest
    Unregister,
    /// The client is alive
    Heartbeat,
}

/// Server side of the discovery protocol.
///
/// The session remembers what the client has been sent, so that every batch
/// carries only the difference between that and the registry as seen
/// through the active interest.
#[derive(Debug)]
pub struct DiscoverySession {
    endpoint: Endpoint,
    interest: Interest,
    sent: BTreeMap<String, InstanceInfo>,
}

impl DiscoverySession {
    /// Serve discovery over `connection`.
    ///
    /// # Errors
    ///
    /// Returns error if the connection's incoming stream was already taken.
    pub fn new(connection: MessageConnection) -> Result<Self, ProtocolError> {
        Ok(Self {
            endpoint: Endpoint::new(connection, Protocol::Discovery, Direction::ClientToServer)?,
            interest: Interest::None,
            sent: BTreeMap::new(),
        })
    }

    /// Next client request, or `None` once the client closed the connection.
    ///
    /// The request is acknowledged once validated. The caller answers an
    /// interest change with [`switch_interest`](Self::switch_interest).
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError::MalformedInterest`] for a non-canonical
    /// interest (closing the connection), or the channel error.
    pub async fn next_request(&mut self) -> Result<Option<DiscoveryRequest>, ProtocolError> {
        let Some(message) = self.endpoint.receive().await? else {
            return Ok(None);
        };

        let request = match message {
            Message::InterestRegistration(ref interest) => {
                if let Err(e) = interest.validate() {
                    return Err(self.endpoint.reject(e.into()));
                }
                DiscoveryRequest::Interest(interest.clone())
            }
            Message::UnregisterInterestSet => DiscoveryRequest::Unregister,
            Message::Heartbeat => DiscoveryRequest::Heartbeat,
            other => return Err(self.endpoint.unexpected(&other)),
        };
        self.endpoint.accept(&message)?;
        Ok(Some(request))
    }

    /// Make `interest` active and send the batch that converges the
    /// client's view onto the matching part of `registry`.
    ///
    /// The batch is bracketed even when it is empty. Returns the number of
    /// updates sent.
    ///
    /// # Errors
    ///
    /// Returns the channel error if an acknowledgement fails.
    pub async fn switch_interest<'a, I>(
        &mut self,
        interest: Interest,
        registry: I,
    ) -> Result<usize, ProtocolError>
    where
        I: IntoIterator<Item = &'a InstanceInfo>,
    {
        let target: BTreeMap<String, InstanceInfo> = registry
            .into_iter()
            .filter(|instance| interest.matches(instance))
            .map(|instance| (instance.id().to_string(), instance.clone()))
            .collect();

        let mut updates: Vec<Message> = self
            .sent
            .keys()
            .filter(|id| !target.contains_key(*id))
            .map(|id| Message::DeleteInstance(id.clone()))
            .collect();
        for instance in target.values() {
            updates.extend(self.converge(instance)?);
        }

        tracing::info!(
            from = %self.interest,
            to = %interest,
            updates = updates.len(),
            "Switching interest"
        );
        self.interest = interest;
        self.sent = target;
        self.flush(updates).await
    }

    /// Forward registry changes that concern the active interest.
    ///
    /// An instance that stops matching is deleted from the client's view.
    /// Nothing is sent when no change concerns the client. Returns the
    /// number of updates sent.
    ///
    /// # Errors
    ///
    /// Returns the channel error if an acknowledgement fails.
    pub async fn apply_changes<I>(&mut self, changes: I) -> Result<usize, ProtocolError>
    where
        I: IntoIterator<Item = ChangeNotification>,
    {
        let mut updates = Vec::new();
        for change in changes {
            match change {
                ChangeNotification::Add(instance) | ChangeNotification::Modify(instance) => {
                    if self.interest.matches(&instance) {
                        updates.extend(self.converge(&instance)?);
                        self.sent.insert(instance.id().to_string(), instance);
                    } else if self.sent.remove(instance.id()).is_some() {
                        updates.push(Message::DeleteInstance(instance.id().to_string()));
                    }
                }
                ChangeNotification::Delete(id) => {
                    if self.sent.remove(&id).is_some() {
                        updates.push(Message::DeleteInstance(id));
                    }
                }
            }
        }

        if updates.is_empty() {
            return Ok(0);
        }
        self.flush(updates).await
    }

    /// The active interest.
    #[must_use]
    pub fn interest(&self) -> &Interest {
        &self.interest
    }

    /// The underlying connection.
    #[must_use]
    pub fn connection(&self) -> &MessageConnection {
        self.endpoint.connection()
    }

    /// Updates that bring the client's copy of `instance` up to date.
    fn converge(&self, instance: &InstanceInfo) -> Result<Vec<Message>, ProtocolError> {
        match self.sent.get(instance.id()) {
            None => Ok(vec![Message::AddInstance(instance.clone())]),
            Some(previous) => Ok(previous
                .diff(instance)?
                .into_iter()
                .map(Message::UpdateInstanceInfo)
                .collect()),
        }
    }

    async fn flush(&self, updates: Vec<Message>) -> Result<usize, ProtocolError> {
        let count = updates.len();
        self.endpoint
            .send_all_acked(frame_batch(&self.interest, updates))
            .await?;
        tracing::debug!(interest = %self.interest, updates = count, "Discovery batch flushed");
        Ok(count)
    }
}
