//! Buffer-start/buffer-end framing of discovery updates.
//!
//! The server wraps every batch it flushes to a subscriber in a
//! `BufferStart`/`BufferEnd` pair for the subscriber's interest
//! ([`frame_batch`]). The subscriber feeds everything it receives through a
//! [`StreamStateTracker`], which holds updates back until the closing marker
//! and then releases the batch as a whole.

use crate::messages::Message;
use regsync_core::{BufferState, Interest, StreamStateNotification};

/// Bracket `updates` with stream-state markers for `interest`.
///
/// An empty batch still produces the two markers, which is how a subscriber
/// learns that an initial view with no matching instances is complete.
#[must_use]
pub fn frame_batch<I>(interest: &Interest, updates: I) -> Vec<Message>
where
    I: IntoIterator<Item = Message>,
{
    let mut framed = vec![Message::StreamStateUpdate(
        StreamStateNotification::buffer_start(interest.clone()),
    )];
    framed.extend(updates);
    framed.push(Message::StreamStateUpdate(
        StreamStateNotification::buffer_end(interest.clone()),
    ));
    framed
}

/// A group of view updates to be applied together.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Batch {
    /// Interest the batch was bracketed for; `None` for an unbracketed update
    pub interest: Option<Interest>,
    /// `AddInstance`, `DeleteInstance` and `UpdateInstanceInfo` messages in
    /// arrival order
    pub updates: Vec<Message>,
}

/// Subscriber-side consumer of framed discovery traffic.
#[derive(Debug, Clone)]
pub struct StreamStateTracker {
    buffered: bool,
    open: Option<(Interest, Vec<Message>)>,
}

impl StreamStateTracker {
    /// Create a tracker.
    ///
    /// With `buffered` set, any update arriving outside a bracket is an error.
    /// Without it, such updates are released immediately as single-update
    /// batches.
    #[must_use]
    pub fn new(buffered: bool) -> Self {
        Self {
            buffered,
            open: None,
        }
    }

    /// Whether no batch is currently open.
    #[must_use]
    pub fn is_settled(&self) -> bool {
        self.open.is_none()
    }

    /// Interest of the open batch, if any.
    #[must_use]
    pub fn open_interest(&self) -> Option<&Interest> {
        self.open.as_ref().map(|(interest, _)| interest)
    }

    /// Feed one server-to-client message.
    ///
    /// Returns the completed batch when `message` closes one.
    ///
    /// # Errors
    ///
    /// Returns [`StreamStateError`] on a marker out of sequence, an update
    /// outside a bracket in buffered mode, or a message that is not a
    /// discovery update.
    pub fn observe(&mut self, message: Message) -> Result<Option<Batch>, StreamStateError> {
        match message {
            Message::StreamStateUpdate(notification) => self.observe_marker(notification),
            update @ (Message::AddInstance(_)
            | Message::DeleteInstance(_)
            | Message::UpdateInstanceInfo(_)) => {
                if let Some((_, updates)) = self.open.as_mut() {
                    updates.push(update);
                    return Ok(None);
                }
                if self.buffered {
                    return Err(StreamStateError::UnbracketedUpdate { kind: update.kind() });
                }
                Ok(Some(Batch {
                    interest: None,
                    updates: vec![update],
                }))
            }
            other => Err(StreamStateError::NotAnUpdate { kind: other.kind() }),
        }
    }

    fn observe_marker(
        &mut self,
        notification: StreamStateNotification,
    ) -> Result<Option<Batch>, StreamStateError> {
        match notification.state {
            BufferState::BufferStart => {
                if let Some((open, _)) = &self.open {
                    return Err(StreamStateError::NestedBufferStart {
                        open: open.clone(),
                        found: notification.interest,
                    });
                }
                self.open = Some((notification.interest, Vec::new()));
                Ok(None)
            }
            BufferState::BufferEnd => match self.open.take() {
                None => Err(StreamStateError::UnmatchedBufferEnd {
                    interest: notification.interest,
                }),
                Some((open, _)) if open != notification.interest => {
                    Err(StreamStateError::InterestMismatch {
                        open,
                        found: notification.interest,
                    })
                }
                Some((interest, updates)) => Ok(Some(Batch {
                    interest: Some(interest),
                    updates,
                })),
            },
        }
    }
}

/// Framing violations seen by a subscriber.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StreamStateError {
    /// `BufferEnd` without an open batch
    #[error("buffer end for {interest} without a matching buffer start")]
    UnmatchedBufferEnd {
        /// Interest named by the marker
        interest: Interest,
    },
    /// `BufferStart` while a batch is already open
    #[error("buffer start for {found} while batch for {open} is open")]
    NestedBufferStart {
        /// Interest of the open batch
        open: Interest,
        /// Interest named by the new marker
        found: Interest,
    },
    /// `BufferEnd` for a different interest than the open batch
    #[error("buffer end for {found} closes batch opened for {open}")]
    InterestMismatch {
        /// Interest of the open batch
        open: Interest,
        /// Interest named by the closing marker
        found: Interest,
    },
    /// Update outside any bracket while buffered delivery is on
    #[error("{kind} received outside a buffer bracket")]
    UnbracketedUpdate {
        /// Message kind
        kind: &'static str,
    },
    /// Message that does not belong to the discovery update stream
    #[error("{kind} is not a discovery update")]
    NotAnUpdate {
        /// Message kind
        kind: &'static str,
    },
}
