//! Runs the plugin, health, and metrics managers together and waits for a
//! shutdown signal or a terminal error (spec.md §4.10).
//!
//! Grounded on `original_source/plugin/run.go`'s `Run()`: a shutdown signal
//! or a plugin error is terminal, while a health or metrics error is logged
//! and that channel is dropped so it never fires again. On a shutdown
//! signal, the plugin's gRPC server is stopped gracefully (spec.md §4.7,
//! §5) before `run` returns, mirroring `Run()`'s `defer gRPCSrv.GracefulStop()`.

use tokio::signal::unix::{signal, SignalKind};
use tokio::sync::oneshot;

use crate::error::{Error, Result};

/// Blocks until SIGINT/SIGTERM arrives or the plugin's gRPC server reports a
/// terminal error. Health and metrics errors are logged but don't stop the
/// process; a second error on either channel is impossible since the
/// receiver is dropped after its first fire.
///
/// On a shutdown signal, `plugin_shutdown` is fired so the plugin's server
/// drains in-flight calls and stops accepting new ones before `run` returns.
pub async fn run(
    plugin_shutdown: oneshot::Sender<()>,
    plugin_errors: oneshot::Receiver<Error>,
    mut health_errors: Option<oneshot::Receiver<Error>>,
    mut metrics_errors: Option<oneshot::Receiver<Error>>,
) -> Result<()> {
    let mut sigint = signal(SignalKind::interrupt()).map_err(|e| Error::Transport(e.to_string()))?;
    let mut sigterm = signal(SignalKind::terminate()).map_err(|e| Error::Transport(e.to_string()))?;
    tokio::pin!(plugin_errors);

    loop {
        tokio::select! {
            _ = sigint.recv() => {
                tracing::info!("captured SIGINT, shutting down");
                let _ = plugin_shutdown.send(());
                return Ok(());
            }
            _ = sigterm.recv() => {
                tracing::info!("captured SIGTERM, shutting down");
                let _ = plugin_shutdown.send(());
                return Ok(());
            }
            result = &mut plugin_errors => {
                return Err(result.unwrap_or(Error::Transport("plugin manager exited".into())));
            }
            result = async { health_errors.as_mut().unwrap().await }, if health_errors.is_some() => {
                if let Ok(e) = result {
                    tracing::warn!(error = %e, "health manager error");
                }
                health_errors = None;
            }
            result = async { metrics_errors.as_mut().unwrap().await }, if metrics_errors.is_some() => {
                if let Ok(e) = result {
                    tracing::warn!(error = %e, "metrics manager error");
                }
                metrics_errors = None;
            }
        }
    }
}
