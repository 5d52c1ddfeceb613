//! # regsync Channel
//!
//! Ordered duplex message delivery with optional per-message
//! acknowledgement, over any `AsyncRead + AsyncWrite` byte stream.
//!
//! ## Contract
//!
//! - [`MessageConnection::submit`] queues a message without waiting.
//! - [`MessageConnection::submit_with_ack`] queues a message and returns a
//!   [`PendingAck`] that resolves once the peer acknowledges it, fails with
//!   [`ChannelError::AckTimeout`] after the configured window, or fails with
//!   [`ChannelError::Connection`] if the connection goes away first.
//! - [`MessageConnection::acknowledge`] answers the oldest delivered message
//!   that asked for an acknowledgement. Correlation is by order only.
//! - [`MessageConnection::incoming`] hands out the single ordered stream of
//!   inbound messages.
//!
//! ## Example
//!
//! ```no_run
//! use regsync_channel::{ChannelConfig, MessageConnection};
//! use regsync_proto::Message;
//!
//! # async fn example() -> Result<(), regsync_channel::ChannelError> {
//! let (client, server) = MessageConnection::pair(ChannelConfig::default());
//! let mut incoming = server.incoming()?;
//!
//! let ack = client.submit_with_ack(Message::Unregister);
//! if let Some(message) = incoming.next().await? {
//!     assert_eq!(message, Message::Unregister);
//!     server.acknowledge()?;
//! }
//! ack.await?;
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod config;
pub mod connection;
pub mod error;
mod frame;

pub use config::ChannelConfig;
pub use connection::{Incoming, MessageConnection, PendingAck};
pub use error::ChannelError;
