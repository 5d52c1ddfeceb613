//! Registry change feed and stream-state markers.

use crate::instance::InstanceInfo;
use crate::interest::Interest;
use serde::{Deserialize, Serialize};

/// A change observed in the registry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChangeNotification {
    /// A new instance was registered
    Add(InstanceInfo),
    /// An existing instance changed; carries the new value
    Modify(InstanceInfo),
    /// An instance was removed
    Delete(String),
}

impl ChangeNotification {
    /// Id of the affected instance.
    #[must_use]
    pub fn id(&self) -> &str {
        match self {
            ChangeNotification::Add(instance) | ChangeNotification::Modify(instance) => {
                instance.id()
            }
            ChangeNotification::Delete(id) => id,
        }
    }
}

/// Which side of a batch a stream-state marker sits on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BufferState {
    /// A batch of updates begins
    BufferStart,
    /// The batch is complete; the view may be considered settled
    BufferEnd,
}

/// Batch boundary marker for the updates delivered under one interest.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StreamStateNotification {
    /// Start or end of the batch
    pub state: BufferState,
    /// Interest the batch belongs to
    pub interest: Interest,
}

impl StreamStateNotification {
    /// Marker opening a batch.
    #[must_use]
    pub fn buffer_start(interest: Interest) -> Self {
        Self {
            state: BufferState::BufferStart,
            interest,
        }
    }

    /// Marker closing a batch.
    #[must_use]
    pub fn buffer_end(interest: Interest) -> Self {
        Self {
            state: BufferState::BufferEnd,
            interest,
        }
    }
}
