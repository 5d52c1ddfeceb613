//! Wire framing.
//!
//! Each frame is a 4-byte big-endian length followed by that many bytes of
//! CBOR. A frame carries either one message (with a flag telling the
//! receiver whether the sender waits for an acknowledgement) or one
//! acknowledgement. Acknowledgements carry no id: the n-th `Ack` answers the
//! n-th acknowledged message sent the other way.

use crate::error::ChannelError;
use regsync_proto::{Message, MessageError};
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// One unit on the wire.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub(crate) enum Frame {
    /// A protocol message
    Message {
        /// The message itself
        message: Message,
        /// Whether the sender awaits an acknowledgement
        ack: bool,
    },
    /// Acknowledgement of the oldest unacknowledged message
    Ack,
}

impl Frame {
    /// Serialize to CBOR bytes.
    pub(crate) fn encode(&self) -> Result<Vec<u8>, MessageError> {
        let mut bytes = Vec::new();
        ciborium::into_writer(self, &mut bytes)
            .map_err(|e| MessageError::Serialize(e.to_string()))?;
        Ok(bytes)
    }

    /// Deserialize from CBOR bytes.
    pub(crate) fn decode(bytes: &[u8]) -> Result<Self, MessageError> {
        ciborium::from_reader(bytes).map_err(|e| MessageError::Deserialize(e.to_string()))
    }
}

/// Write one length-prefixed frame and flush.
pub(crate) async fn write_frame<W>(writer: &mut W, bytes: &[u8]) -> std::io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    let len = u32::try_from(bytes.len()).map_err(|_| {
        std::io::Error::new(std::io::ErrorKind::InvalidInput, "frame length exceeds u32")
    })?;
    writer.write_u32(len).await?;
    writer.write_all(bytes).await?;
    writer.flush().await
}

/// Read one length-prefixed frame.
///
/// Returns `Ok(None)` when the peer closed cleanly on a frame boundary.
pub(crate) async fn read_frame<R>(
    reader: &mut R,
    max_frame_len: usize,
) -> Result<Option<Vec<u8>>, ChannelError>
where
    R: AsyncRead + Unpin,
{
    let len = match reader.read_u32().await {
        Ok(len) => len as usize,
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(ChannelError::Connection(e.to_string())),
    };

    if len > max_frame_len {
        return Err(ChannelError::FrameTooLarge {
            len,
            max: max_frame_len,
        });
    }

    let mut bytes = vec![0u8; len];
    reader
        .read_exact(&mut bytes)
        .await
        .map_err(|e| ChannelError::Connection(format!("truncated frame: {e}")))?;
    Ok(Some(bytes))
}
