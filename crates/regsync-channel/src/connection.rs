//! The acknowledged duplex connection.
//!
//! A [`MessageConnection`] owns two background tasks over a byte stream:
//! a writer draining an unbounded frame queue, and a reader decoding frames
//! and either handing messages to the single [`Incoming`] consumer or
//! resolving the oldest pending acknowledgement.
//!
//! Acknowledgements are correlated by order alone. Each
//! [`submit_with_ack`](MessageConnection::submit_with_ack) queues its waiter
//! and its frame under one lock, so the waiter queue always matches wire
//! order, and the peer acknowledges in the order it consumed the messages.
//! A waiter that timed out keeps its slot: the late acknowledgement still
//! consumes it, which keeps the following waiters aligned.

use crate::config::ChannelConfig;
use crate::error::ChannelError;
use crate::frame::{read_frame, write_frame, Frame};
use regsync_proto::Message;
use std::collections::VecDeque;
use std::future::{Future, IntoFuture};
use std::pin::Pin;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::Instant;

/// Buffer size of the in-memory pipe behind [`MessageConnection::pair`].
const PAIR_BUFFER_SIZE: usize = 64 * 1024;

type AckResult = Result<(), ChannelError>;

/// A decoded message together with its acknowledgement flag.
#[derive(Debug)]
struct Delivery {
    message: Message,
    ack: bool,
}

#[derive(Debug)]
struct State {
    outbound: Option<mpsc::UnboundedSender<Vec<u8>>>,
    pending: VecDeque<oneshot::Sender<AckResult>>,
    failure: Option<ChannelError>,
}

#[derive(Debug)]
struct Shared {
    config: ChannelConfig,
    state: Mutex<State>,
    /// Messages handed out by `Incoming` that still owe an acknowledgement.
    unacknowledged: AtomicUsize,
    incoming: Mutex<Option<mpsc::UnboundedReceiver<Result<Delivery, ChannelError>>>>,
    reader: Mutex<Option<JoinHandle<()>>>,
}

impl Shared {
    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Encode and queue a frame, optionally registering an ack waiter in the
    /// same critical section.
    fn enqueue(
        &self,
        frame: &Frame,
        waiter: Option<oneshot::Sender<AckResult>>,
    ) -> Result<(), ChannelError> {
        let bytes = frame.encode()?;
        if bytes.len() > self.config.max_frame_len {
            return Err(ChannelError::FrameTooLarge {
                len: bytes.len(),
                max: self.config.max_frame_len,
            });
        }

        let mut state = self.state();
        let Some(outbound) = state.outbound.as_ref() else {
            return Err(closed_error(&state));
        };
        if outbound.send(bytes).is_err() {
            return Err(closed_error(&state));
        }
        if let Some(waiter) = waiter {
            state.pending.push_back(waiter);
        }
        Ok(())
    }

    /// Resolve the oldest pending acknowledgement.
    fn resolve_ack(&self) {
        let waiter = self.state().pending.pop_front();
        match waiter {
            Some(waiter) => {
                if waiter.send(Ok(())).is_err() {
                    tracing::warn!("Acknowledgement arrived after its waiter gave up");
                }
            }
            None => tracing::warn!("Acknowledgement received with nothing pending"),
        }
    }

    /// Mark the connection failed: stop accepting frames, let the writer
    /// drain and shut down, and fail every pending acknowledgement.
    fn fail(&self, error: ChannelError) {
        let pending = {
            let mut state = self.state();
            if state.failure.is_some() {
                return;
            }
            state.failure = Some(error.clone());
            state.outbound = None;
            std::mem::take(&mut state.pending)
        };

        tracing::info!(%error, pending = pending.len(), "Connection closed");
        for waiter in pending {
            let _ = waiter.send(Err(error.clone()));
        }
    }
}

fn closed_error(state: &State) -> ChannelError {
    state
        .failure
        .clone()
        .unwrap_or_else(|| ChannelError::Connection("connection closed".to_string()))
}

/// An ordered, message-typed duplex connection with optional per-message
/// acknowledgement.
///
/// Dropping the connection closes it.
#[derive(Debug)]
pub struct MessageConnection {
    shared: Arc<Shared>,
}

impl MessageConnection {
    /// Run a connection over `io`.
    ///
    /// # Panics
    ///
    /// Panics if called outside a Tokio runtime.
    pub fn new<T>(io: T, config: ChannelConfig) -> Self
    where
        T: AsyncRead + AsyncWrite + Send + 'static,
    {
        let (read_half, write_half) = tokio::io::split(io);
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let (incoming_tx, incoming_rx) = mpsc::unbounded_channel();

        let shared = Arc::new(Shared {
            config,
            state: Mutex::new(State {
                outbound: Some(outbound_tx),
                pending: VecDeque::new(),
                failure: None,
            }),
            unacknowledged: AtomicUsize::new(0),
            incoming: Mutex::new(Some(incoming_rx)),
            reader: Mutex::new(None),
        });

        tokio::spawn(write_loop(write_half, outbound_rx, Arc::clone(&shared)));
        let reader = tokio::spawn(read_loop(read_half, incoming_tx, Arc::clone(&shared)));
        *shared
            .reader
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(reader);

        Self { shared }
    }

    /// Two connections wired to each other through an in-memory pipe.
    ///
    /// # Panics
    ///
    /// Panics if called outside a Tokio runtime.
    #[must_use]
    pub fn pair(config: ChannelConfig) -> (Self, Self) {
        let (a, b) = tokio::io::duplex(PAIR_BUFFER_SIZE);
        (Self::new(a, config.clone()), Self::new(b, config))
    }

    /// The configuration this connection runs with.
    #[must_use]
    pub fn config(&self) -> &ChannelConfig {
        &self.shared.config
    }

    /// Take the ordered stream of messages from the peer.
    ///
    /// # Errors
    ///
    /// Returns [`ChannelError::IncomingTaken`] on every call after the first.
    pub fn incoming(&self) -> Result<Incoming, ChannelError> {
        let receiver = self
            .shared
            .incoming
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
            .ok_or(ChannelError::IncomingTaken)?;

        Ok(Incoming {
            receiver,
            shared: Arc::clone(&self.shared),
        })
    }

    /// Queue a message without acknowledgement.
    ///
    /// # Errors
    ///
    /// Returns [`ChannelError::Connection`] if the connection is closed, or
    /// a codec/size error if the message cannot be framed.
    pub fn submit(&self, message: Message) -> Result<(), ChannelError> {
        tracing::debug!(kind = message.kind(), ack = false, "Submitting message");
        self.shared
            .enqueue(&Frame::Message { message, ack: false }, None)
    }

    /// Queue a message and return a signal that completes once the peer
    /// acknowledges it.
    ///
    /// The message is queued immediately; awaiting the returned
    /// [`PendingAck`] only waits for the acknowledgement.
    #[must_use = "the acknowledgement outcome is only observable by awaiting it"]
    pub fn submit_with_ack(&self, message: Message) -> PendingAck {
        tracing::debug!(kind = message.kind(), ack = true, "Submitting message");

        let timeout = self.shared.config.ack_timeout;
        let (tx, rx) = oneshot::channel();
        let state = match self
            .shared
            .enqueue(&Frame::Message { message, ack: true }, Some(tx))
        {
            Ok(()) => PendingState::Waiting {
                receiver: rx,
                deadline: Instant::now() + timeout,
                timeout,
            },
            Err(error) => PendingState::Failed(error),
        };
        PendingAck { state }
    }

    /// Acknowledge the oldest delivered message that asked for one.
    ///
    /// # Errors
    ///
    /// Returns [`ChannelError::NothingToAcknowledge`] if every delivered
    /// message has already been acknowledged (or never asked to be), and
    /// [`ChannelError::Connection`] if the connection is closed.
    pub fn acknowledge(&self) -> Result<(), ChannelError> {
        self.shared
            .unacknowledged
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_sub(1))
            .map_err(|_| ChannelError::NothingToAcknowledge)?;

        tracing::debug!("Sending acknowledgement");
        self.shared.enqueue(&Frame::Ack, None)
    }

    /// Number of acknowledged submissions still waiting for the peer.
    #[must_use]
    pub fn pending_acks(&self) -> usize {
        self.shared.state().pending.len()
    }

    /// Whether the connection still accepts messages.
    #[must_use]
    pub fn is_open(&self) -> bool {
        self.shared.state().failure.is_none()
    }

    /// Close the connection.
    ///
    /// Queued frames are still flushed before the write side shuts down.
    /// Every pending acknowledgement fails with [`ChannelError::Connection`]
    /// and the incoming stream ends.
    pub fn close(&self) {
        self.shared
            .fail(ChannelError::Connection("connection closed locally".to_string()));
        if let Some(reader) = self
            .shared
            .reader
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            reader.abort();
        }
    }
}

impl Drop for MessageConnection {
    fn drop(&mut self) {
        self.close();
    }
}

/// The single consumer side of a connection's inbound messages.
#[derive(Debug)]
pub struct Incoming {
    receiver: mpsc::UnboundedReceiver<Result<Delivery, ChannelError>>,
    shared: Arc<Shared>,
}

impl Incoming {
    /// Next message from the peer.
    ///
    /// Returns `Ok(None)` once the connection has closed in an orderly way.
    /// A message sent with acknowledgement must be answered with
    /// [`MessageConnection::acknowledge`] after it has been handled.
    ///
    /// # Errors
    ///
    /// Returns [`ChannelError::Connection`] if the transport failed.
    pub async fn next(&mut self) -> Result<Option<Message>, ChannelError> {
        match self.receiver.recv().await {
            None => Ok(None),
            Some(Err(error)) => Err(error),
            Some(Ok(Delivery { message, ack })) => {
                if ack {
                    self.shared.unacknowledged.fetch_add(1, Ordering::AcqRel);
                }
                Ok(Some(message))
            }
        }
    }
}

enum PendingState {
    Waiting {
        receiver: oneshot::Receiver<AckResult>,
        deadline: Instant,
        timeout: Duration,
    },
    Failed(ChannelError),
}

/// Single-shot completion of an acknowledged submission.
///
/// Resolves to `Ok(())` once acknowledged, [`ChannelError::AckTimeout`]
/// once the configured window elapsed (measured from submission), or
/// [`ChannelError::Connection`] if the connection went away first.
pub struct PendingAck {
    state: PendingState,
}

impl std::fmt::Debug for PendingAck {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let status = match &self.state {
            PendingState::Waiting { .. } => "waiting",
            PendingState::Failed(_) => "failed",
        };
        f.debug_struct("PendingAck").field("state", &status).finish()
    }
}

impl IntoFuture for PendingAck {
    type Output = AckResult;
    type IntoFuture = Pin<Box<dyn Future<Output = AckResult> + Send>>;

    fn into_future(self) -> Self::IntoFuture {
        Box::pin(async move {
            match self.state {
                PendingState::Failed(error) => Err(error),
                PendingState::Waiting {
                    receiver,
                    deadline,
                    timeout,
                } => match tokio::time::timeout_at(deadline, receiver).await {
                    Err(_) => Err(ChannelError::AckTimeout(timeout)),
                    Ok(Err(_)) => Err(ChannelError::Connection(
                        "connection dropped before acknowledgement".to_string(),
                    )),
                    Ok(Ok(result)) => result,
                },
            }
        })
    }
}

async fn write_loop<W>(
    mut writer: W,
    mut outbound: mpsc::UnboundedReceiver<Vec<u8>>,
    shared: Arc<Shared>,
) where
    W: AsyncWrite + Unpin,
{
    while let Some(bytes) = outbound.recv().await {
        if let Err(e) = write_frame(&mut writer, &bytes).await {
            shared.fail(ChannelError::Connection(e.to_string()));
            return;
        }
    }
    // Every sender is gone: the connection was closed.
    let _ = writer.shutdown().await;
}

async fn read_loop<R>(
    mut reader: R,
    incoming: mpsc::UnboundedSender<Result<Delivery, ChannelError>>,
    shared: Arc<Shared>,
) where
    R: AsyncRead + Unpin,
{
    loop {
        let bytes = match read_frame(&mut reader, shared.config.max_frame_len).await {
            Ok(Some(bytes)) => bytes,
            Ok(None) => {
                shared.fail(ChannelError::Connection(
                    "connection closed by peer".to_string(),
                ));
                return;
            }
            Err(error) => {
                let error = match error {
                    ChannelError::Connection(_) => error,
                    other => ChannelError::Connection(other.to_string()),
                };
                shared.fail(error.clone());
                let _ = incoming.send(Err(error));
                return;
            }
        };

        match Frame::decode(&bytes) {
            Ok(Frame::Message { message, ack }) => {
                tracing::debug!(kind = message.kind(), ack, "Received message");
                // A reader that has gone away does not stop ack processing.
                let _ = incoming.send(Ok(Delivery { message, ack }));
            }
            Ok(Frame::Ack) => shared.resolve_ack(),
            Err(e) => {
                let error = ChannelError::Connection(format!("undecodable frame: {e}"));
                shared.fail(error.clone());
                let _ = incoming.send(Err(error));
                return;
            }
        }
    }
}
