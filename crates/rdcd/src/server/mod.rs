//! Unix socket transport for the RDC daemon.
//!
//! The server:
//! - Listens on a Unix socket for client connections
//! - Turns each connection into one data channel (see [`connection`])
//! - Hands every new channel to the [`Dispatcher`]
//! - Supports graceful shutdown via CancellationToken
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────┐
//! │  ChannelServer  │
//! │                 │
//! │  UnixListener   │
//! └───────┬─────────┘
//!         │ accept()
//!         ▼
//! ┌──────────────────┐     ┌─────────────────┐
//! │ChannelConnection │────▶│   Dispatcher    │
//! │ (per client)     │     │                 │
//! └───────┬──────────┘     └────────┬────────┘
//!         │ lines                   │ on_new_channel
//!         ▼                         ▼
//! ┌─────────────────┐     ┌─────────────────┐
//! │  SocketChannel  │◀────│ ChannelManagers │
//! └─────────────────┘     └─────────────────┘
//! ```
//!
//! # Panic-Free Guarantees
//!
//! - No `.unwrap()`, `.expect()`, `panic!()`, `unreachable!()`, `todo!()`
//! - All fallible operations use `?`, pattern matching, or `unwrap_or`
//! - Connection errors are logged and allow continued operation

mod connection;

pub use connection::{ChannelConnection, ConnectionError, SocketChannel, MAX_LINE_LENGTH};

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::net::UnixListener;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::Dispatcher;

/// Default socket path
pub const DEFAULT_SOCKET_PATH: &str = "/tmp/rdc.sock";

/// Time connections get to close their channels on shutdown
const SHUTDOWN_GRACE: Duration = Duration::from_secs(2);

/// Unix socket server feeding new channels to a dispatcher.
pub struct ChannelServer {
    /// Path to the Unix socket
    socket_path: PathBuf,

    dispatcher: Arc<Dispatcher>,

    /// Cancellation token for graceful shutdown
    cancel_token: CancellationToken,

    /// Connection counter for logging
    connection_counter: AtomicU64,
}

impl ChannelServer {
    pub fn new(
        socket_path: impl Into<PathBuf>,
        dispatcher: Arc<Dispatcher>,
        cancel_token: CancellationToken,
    ) -> Self {
        Self {
            socket_path: socket_path.into(),
            dispatcher,
            cancel_token,
            connection_counter: AtomicU64::new(0),
        }
    }

    /// Creates a server with the default socket path.
    pub fn with_default_path(dispatcher: Arc<Dispatcher>, cancel_token: CancellationToken) -> Self {
        Self::new(DEFAULT_SOCKET_PATH, dispatcher, cancel_token)
    }

    pub fn socket_path(&self) -> &Path {
        &self.socket_path
    }

    /// Runs the server.
    ///
    /// Listens for connections until the cancellation token is triggered,
    /// then waits briefly for open channels to close.
    pub async fn run(&self) -> Result<(), ServerError> {
        let listener = self.bind()?;
        info!(socket = %self.socket_path.display(), "Channel server listening");

        let mut connections = JoinSet::new();

        loop {
            tokio::select! {
                _ = self.cancel_token.cancelled() => {
                    info!("Server shutdown requested");
                    break;
                }

                result = listener.accept() => {
                    match result {
                        Ok((stream, _addr)) => {
                            let number = self.connection_counter.fetch_add(1, Ordering::Relaxed);
                            let connection = ChannelConnection::new(
                                stream,
                                Arc::clone(&self.dispatcher),
                                self.cancel_token.clone(),
                                number,
                            );
                            connections.spawn(async move {
                                if let Err(e) = connection.run().await {
                                    warn!(connection = number, error = %e, "Connection ended with error");
                                }
                            });
                        }
                        Err(e) => {
                            error!(error = %e, "Failed to accept connection");
                        }
                    }
                }

                Some(joined) = connections.join_next(), if !connections.is_empty() => {
                    if let Err(e) = joined {
                        error!(error = %e, "Connection task failed");
                    }
                }
            }
        }

        self.cleanup(connections).await;
        Ok(())
    }

    /// Binds the listener, replacing a stale socket file.
    fn bind(&self) -> Result<UnixListener, ServerError> {
        let setup_error = |e: std::io::Error| ServerError::SocketSetup {
            path: self.socket_path.clone(),
            error: e.to_string(),
        };

        if self.socket_path.exists() {
            std::fs::remove_file(&self.socket_path).map_err(setup_error)?;
        }

        if let Some(parent) = self.socket_path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                std::fs::create_dir_all(parent).map_err(setup_error)?;
            }
        }

        UnixListener::bind(&self.socket_path).map_err(setup_error)
    }

    async fn cleanup(&self, mut connections: JoinSet<()>) {
        let open = connections.len();
        let drained = tokio::time::timeout(SHUTDOWN_GRACE, async {
            while connections.join_next().await.is_some() {}
        })
        .await;
        if drained.is_err() {
            warn!(open, "Aborting connections that did not close in time");
            connections.shutdown().await;
        } else {
            debug!(open, "All connections closed");
        }

        if self.socket_path.exists() {
            if let Err(e) = std::fs::remove_file(&self.socket_path) {
                warn!(
                    socket = %self.socket_path.display(),
                    error = %e,
                    "Failed to remove socket file"
                );
            }
        }

        info!("Server cleanup complete");
    }
}

/// Errors that can occur in server operations.
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error("Failed to setup socket at {path}: {error}")]
    SocketSetup { path: PathBuf, error: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_socket_path() {
        assert_eq!(DEFAULT_SOCKET_PATH, "/tmp/rdc.sock");
    }

    #[test]
    fn test_server_error_display() {
        let err = ServerError::SocketSetup {
            path: PathBuf::from("/tmp/test.sock"),
            error: "permission denied".to_string(),
        };
        assert!(err.to_string().contains("/tmp/test.sock"));
        assert!(err.to_string().contains("permission denied"));
    }

    #[tokio::test]
    async fn test_run_replaces_stale_socket_and_cleans_up() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("rdc.sock");
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, b"stale").unwrap();

        let cancel = CancellationToken::new();
        cancel.cancel();
        let server = ChannelServer::new(&path, Arc::new(Dispatcher::new()), cancel);

        server.run().await.unwrap();
        assert!(!path.exists());
    }
}
