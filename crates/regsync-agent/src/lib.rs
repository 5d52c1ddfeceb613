//! # regsync Agent
//!
//! Protocol drivers for a regsync registry node and its clients, layered on
//! the acknowledged channel.
//!
//! ## Protocols
//!
//! 1. **Registration**: [`RegistrationClient`] announces one instance;
//!    [`RegistrationHandler`] validates the lifecycle on the registry side
//! 2. **Replication**: [`ReplicationSender`] handshakes, sends a full sync
//!    when asked, then streams adds and deletes; [`ReplicationReceiver`]
//!    answers the handshake and tags every update with the peer's source
//! 3. **Discovery**: [`DiscoveryClient`] keeps one interest and a
//!    [`ClientView`] updated batch by batch; [`DiscoverySession`] converges
//!    the client onto the registry as seen through that interest
//!
//! Drivers hold no registry of their own: the embedding node supplies
//! registry contents and decides what to do with the events they yield.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod config;
pub mod discovery;
mod endpoint;
pub mod error;
pub mod registration;
pub mod replication;

pub use config::{AgentConfig, DiscoveryConfig};
pub use discovery::{ClientView, DiscoveryClient, DiscoveryRequest, DiscoverySession};
pub use error::ProtocolError;
pub use registration::{RegistrationClient, RegistrationEvent, RegistrationHandler};
pub use replication::{ReplicationEvent, ReplicationReceiver, ReplicationSender, ReplicationUpdate};
