//! One socket connection, exposed as one data channel.
//!
//! Wire format, newline-delimited in both directions:
//!
//! ```text
//! client → daemon:  <label>\n  <message>\n  <message>\n ...
//! daemon → client:  <frame>\n ...
//! ```
//!
//! The first line names the channel. Once it arrives the channel is Open
//! and handed to the dispatcher; every later line is delivered to the
//! channel's observers as one message, without its terminator. EOF, a
//! framing error or daemon shutdown closes the channel.
//!
//! # Async Safety
//!
//! Managers may block inside their callbacks (the servo manager waits on
//! pigpiod), so dispatch, delivery and close all run via `spawn_blocking`.
//! The connection task awaits each one, which keeps messages in order
//! without holding up the runtime's workers.
//!
//! # Panic-Free Guarantees
//!
//! - No `.unwrap()`, `.expect()`, `panic!()`, `unreachable!()`, `todo!()`
//! - Observer callbacks run without any channel lock held
//! - Connection errors are logged and result in the channel closing

use std::fmt;
use std::io;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;

use futures::StreamExt;
use rdc_core::{
    ChannelHandle, ChannelObserver, ChannelState, Label, ObserverId, ObserverRegistry,
    SharedChannel,
};
use tokio::io::AsyncWriteExt;
use tokio::net::unix::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::UnixStream;
use tokio::sync::mpsc;
use tokio::time::timeout;
use tokio_util::codec::{AnyDelimiterCodec, AnyDelimiterCodecError, FramedRead};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};

use crate::Dispatcher;

/// Longest accepted line, label included (64 KiB)
pub const MAX_LINE_LENGTH: usize = 64 * 1024;

/// Time a client has to send its label line
const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);

/// Write timeout per outbound frame
const WRITE_TIMEOUT: Duration = Duration::from_secs(10);

/// Time allowed to flush queued frames after the channel closes
const WRITER_DRAIN_TIMEOUT: Duration = Duration::from_secs(1);

/// Errors that end a connection.
#[derive(Debug, thiserror::Error)]
pub enum ConnectionError {
    #[error("Connection closed before a label was sent")]
    Eof,

    #[error("No label received within {0:?}")]
    HandshakeTimeout(Duration),

    #[error("Invalid channel label: {0}")]
    InvalidLabel(String),

    #[error("Line exceeds {max} bytes")]
    LineTooLong { max: usize },

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

impl From<AnyDelimiterCodecError> for ConnectionError {
    fn from(err: AnyDelimiterCodecError) -> Self {
        match err {
            AnyDelimiterCodecError::MaxChunkLengthExceeded => Self::LineTooLong {
                max: MAX_LINE_LENGTH,
            },
            AnyDelimiterCodecError::Io(e) => Self::Io(e),
        }
    }
}

/// Channel backed by a socket connection.
///
/// Outbound frames are queued to the connection's writer task; the queue is
/// dropped when the channel closes, which ends the writer.
pub struct SocketChannel {
    label: Label,
    connection: u64,
    state: Mutex<ChannelState>,
    observers: ObserverRegistry,
    outbound: Mutex<Option<mpsc::UnboundedSender<Vec<u8>>>>,
}

impl SocketChannel {
    /// Creates an open channel whose frames go to `outbound`.
    pub fn new(label: Label, connection: u64, outbound: mpsc::UnboundedSender<Vec<u8>>) -> Arc<Self> {
        Arc::new(Self {
            label,
            connection,
            state: Mutex::new(ChannelState::Open),
            observers: ObserverRegistry::new(),
            outbound: Mutex::new(Some(outbound)),
        })
    }

    /// Delivers one inbound message to the observers. Ignored unless open.
    pub fn deliver(&self, data: &[u8]) {
        if !self.state().is_open() {
            return;
        }
        self.observers.notify_message(data);
    }

    /// Closes the channel and notifies observers. Idempotent.
    pub fn close(&self) {
        {
            let mut state = lock(&self.state);
            if state.is_closed() {
                return;
            }
            *state = ChannelState::Closed;
        }
        lock(&self.outbound).take();
        debug!(label = %self.label, connection = self.connection, "Socket channel closed");
        self.observers.notify_state_change();
    }

    pub fn observer_count(&self) -> usize {
        self.observers.len()
    }
}

impl ChannelHandle for SocketChannel {
    fn label(&self) -> Label {
        self.label.clone()
    }

    fn state(&self) -> ChannelState {
        *lock(&self.state)
    }

    fn send(&self, data: &[u8]) {
        if !self.state().is_open() {
            return;
        }
        let sent = lock(&self.outbound)
            .as_ref()
            .is_some_and(|tx| tx.send(data.to_vec()).is_ok());
        if !sent {
            trace!(label = %self.label, connection = self.connection, "Dropping frame, writer gone");
        }
    }

    fn register_observer(&self, observer: Weak<dyn ChannelObserver>) -> ObserverId {
        self.observers.register(observer)
    }

    fn unregister_observer(&self, id: ObserverId) {
        self.observers.unregister(id);
    }
}

impl fmt::Debug for SocketChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SocketChannel")
            .field("label", &self.label)
            .field("connection", &self.connection)
            .field("state", &self.state())
            .finish()
    }
}

/// Drives a single client connection.
pub struct ChannelConnection {
    reader: FramedRead<OwnedReadHalf, AnyDelimiterCodec>,
    writer: OwnedWriteHalf,
    dispatcher: Arc<Dispatcher>,
    cancel_token: CancellationToken,
    connection_number: u64,
}

impl ChannelConnection {
    pub fn new(
        stream: UnixStream,
        dispatcher: Arc<Dispatcher>,
        cancel_token: CancellationToken,
        connection_number: u64,
    ) -> Self {
        let (reader, writer) = stream.into_split();
        let codec = AnyDelimiterCodec::new_with_max_length(b"\n".to_vec(), b"\n".to_vec(), MAX_LINE_LENGTH);
        Self {
            reader: FramedRead::new(reader, codec),
            writer,
            dispatcher,
            cancel_token,
            connection_number,
        }
    }

    /// Runs the connection until EOF, error or shutdown.
    pub async fn run(mut self) -> Result<(), ConnectionError> {
        debug!(connection = self.connection_number, "New client connected");

        let cancel_token = self.cancel_token.clone();
        let label = tokio::select! {
            _ = cancel_token.cancelled() => return Ok(()),
            result = timeout(HANDSHAKE_TIMEOUT, self.read_label()) => {
                result.map_err(|_| ConnectionError::HandshakeTimeout(HANDSHAKE_TIMEOUT))??
            }
        };

        let (tx, rx) = mpsc::unbounded_channel();
        let channel = SocketChannel::new(label.clone(), self.connection_number, tx);
        let writer = tokio::spawn(write_frames(self.writer, rx, self.connection_number));

        info!(%label, connection = self.connection_number, "Channel opened");
        let shared: SharedChannel = channel.clone();
        let dispatcher = Arc::clone(&self.dispatcher);
        let notified = off_runtime(move || dispatcher.on_new_channel(shared))
            .await
            .unwrap_or(0);
        if notified == 0 {
            warn!(%label, connection = self.connection_number, "Channel has no manager");
        }

        let result = loop {
            tokio::select! {
                _ = cancel_token.cancelled() => {
                    debug!(%label, "Closing channel for shutdown");
                    break Ok(());
                }

                frame = self.reader.next() => match frame {
                    Some(Ok(line)) => {
                        let target = Arc::clone(&channel);
                        off_runtime(move || target.deliver(trim_line(&line))).await;
                    }
                    Some(Err(e)) => break Err(ConnectionError::from(e)),
                    None => break Ok(()),
                }
            }
        };

        let closing = Arc::clone(&channel);
        off_runtime(move || closing.close()).await;
        if timeout(WRITER_DRAIN_TIMEOUT, writer).await.is_err() {
            debug!(%label, "Writer did not drain in time");
        }
        info!(%label, connection = self.connection_number, "Channel disconnected");
        result
    }

    async fn read_label(&mut self) -> Result<Label, ConnectionError> {
        let line = self.reader.next().await.ok_or(ConnectionError::Eof)??;
        let text = std::str::from_utf8(trim_line(&line))
            .map_err(|_| ConnectionError::InvalidLabel(String::from_utf8_lossy(&line).into_owned()))?;
        Label::parse(text).map_err(|e| ConnectionError::InvalidLabel(e.to_string()))
    }
}

/// Runs a channel callback on the blocking pool.
///
/// Returns `None` if the callback panicked.
async fn off_runtime<T, F>(callback: F) -> Option<T>
where
    T: Send + 'static,
    F: FnOnce() -> T + Send + 'static,
{
    match tokio::task::spawn_blocking(callback).await {
        Ok(value) => Some(value),
        Err(e) => {
            error!(error = %e, "Channel callback panicked");
            None
        }
    }
}

/// Strips a trailing carriage return left by CRLF clients.
fn trim_line(line: &[u8]) -> &[u8] {
    line.strip_suffix(b"\r").unwrap_or(line)
}

async fn write_frames(
    mut writer: OwnedWriteHalf,
    mut frames: mpsc::UnboundedReceiver<Vec<u8>>,
    connection: u64,
) {
    while let Some(frame) = frames.recv().await {
        let write = async {
            writer.write_all(&frame).await?;
            writer.write_all(b"\n").await?;
            writer.flush().await
        };
        match timeout(WRITE_TIMEOUT, write).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                debug!(connection, error = %e, "Failed to write frame");
                return;
            }
            Err(_) => {
                warn!(connection, "Write timed out");
                return;
            }
        }
    }
    let _ = writer.shutdown().await;
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
