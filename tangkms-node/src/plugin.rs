//! Owns the UNIX-domain socket listener and the `tonic` server bound to it.
//!
//! Grounded on `original_source/plugin/run.go`'s `PluginManager`/`Start`
//! shape: `start` returns immediately, handing back a one-shot receiver that
//! carries at most one terminal error. The returned shutdown sender lets the
//! supervisor trigger `tonic`'s graceful-shutdown drain (spec.md §4.7/§5)
//! instead of dropping the accept loop outright.

use std::path::{Path, PathBuf};

use tokio::net::UnixListener;
use tokio::sync::oneshot;
use tokio_stream::wrappers::UnixListenerStream;
use tonic::transport::Server;
use tonic::transport::server::Router;

use crate::error::{Error, Result};

/// Removes a stale socket file at `path`, ignoring "not present".
fn remove_stale_socket(path: &Path) -> Result<()> {
    match std::fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(Error::StaleSocket {
            path: path.display().to_string(),
            source: e,
        }),
    }
}

/// Serves a pre-assembled `tonic` router over a UNIX-domain socket.
///
/// Shared state (the `Exchange` or `Cryptor` backing the registered KMS
/// services) lives inside the router's services themselves; the manager only
/// owns the socket's lifecycle.
pub struct Plugin {
    socket_path: PathBuf,
}

impl Plugin {
    /// Builds a plugin manager for the socket at `socket_path`.
    pub fn new(socket_path: impl Into<PathBuf>) -> Self {
        Self {
            socket_path: socket_path.into(),
        }
    }

    /// Binds the socket (removing any stale file first) and serves `router`
    /// in a background task.
    ///
    /// Returns a shutdown sender that triggers `tonic`'s graceful shutdown
    /// (finishing in-flight calls before the accept loop exits) alongside a
    /// one-shot receiver that yields the server's terminal error, if any,
    /// once it stops serving.
    ///
    /// # Errors
    /// Returns [`Error::StaleSocket`] if the stale file cannot be removed, or
    /// [`Error::Transport`] if the socket cannot be bound.
    pub fn start(&self, router: Router) -> Result<(oneshot::Sender<()>, oneshot::Receiver<Error>)> {
        remove_stale_socket(&self.socket_path)?;

        let listener = UnixListener::bind(&self.socket_path)
            .map_err(|e| Error::Transport(format!("bind {}: {e}", self.socket_path.display())))?;
        let incoming = UnixListenerStream::new(listener);

        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        let (tx, rx) = oneshot::channel();
        let socket_path = self.socket_path.display().to_string();
        tokio::spawn(async move {
            let shutdown = async {
                let _ = shutdown_rx.await;
            };
            if let Err(e) = router
                .serve_with_incoming_shutdown(incoming, shutdown)
                .await
            {
                tracing::error!(socket = %socket_path, error = %e, "plugin server terminated");
                let _ = tx.send(Error::Transport(e.to_string()));
            }
        });

        Ok((shutdown_tx, rx))
    }
}

/// Builds a `tower::service_fn` UNIX connector for dialing a plugin socket
/// from a `tonic` client, used by the health manager (spec.md §4.8 step 1).
pub fn unix_connector(
    socket_path: PathBuf,
) -> impl tower::Service<
    http::Uri,
    Response = hyper_util::rt::TokioIo<tokio::net::UnixStream>,
    Error = std::io::Error,
    Future = std::pin::Pin<
        Box<
            dyn std::future::Future<
                    Output = std::io::Result<hyper_util::rt::TokioIo<tokio::net::UnixStream>>,
                > + Send,
        >,
    >,
> + Clone {
    tower::service_fn(move |_: http::Uri| {
        let socket_path = socket_path.clone();
        Box::pin(async move {
            tokio::net::UnixStream::connect(socket_path)
                .await
                .map(hyper_util::rt::TokioIo::new)
        })
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn remove_stale_socket_ignores_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("does-not-exist.sock");
        remove_stale_socket(&path).unwrap();
    }

    #[test]
    fn remove_stale_socket_removes_existing_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("stale.sock");
        std::fs::write(&path, b"").unwrap();
        remove_stale_socket(&path).unwrap();
        assert!(!path.exists());
    }
}
