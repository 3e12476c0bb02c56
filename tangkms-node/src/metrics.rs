//! Hosts a Prometheus exposition endpoint (spec.md §4.9).
//!
//! Grounded on `original_source/plugin/metrics.go`'s `Metrics` manager
//! (`promhttp.Handler()` served at a configured path); `prometheus` is this
//! ecosystem's `client_golang` analogue.

use std::sync::Arc;

use http_body_util::Full;
use hyper::body::Bytes;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use prometheus::{Encoder, IntCounter, Registry, TextEncoder};
use tokio::net::TcpListener;

use crate::error::{Error, Result};

/// Counters this system exposes (spec.md §4.9: "implementers SHOULD expose
/// counters for Encrypt/Decrypt calls and resolution failures").
pub struct Counters {
    /// Total successful `Encrypt` RPCs.
    pub encrypt_total: IntCounter,
    /// Total successful `Decrypt` RPCs.
    pub decrypt_total: IntCounter,
    /// Total `Exchange` resolution failures.
    pub resolve_failures_total: IntCounter,
}

impl Counters {
    fn register(registry: &Registry) -> Self {
        let encrypt_total =
            IntCounter::new("encrypt_total", "total successful Encrypt RPCs").unwrap();
        let decrypt_total =
            IntCounter::new("decrypt_total", "total successful Decrypt RPCs").unwrap();
        let resolve_failures_total = IntCounter::new(
            "resolve_failures_total",
            "total Exchange resolution failures",
        )
        .unwrap();

        registry.register(Box::new(encrypt_total.clone())).unwrap();
        registry.register(Box::new(decrypt_total.clone())).unwrap();
        registry
            .register(Box::new(resolve_failures_total.clone()))
            .unwrap();

        Self {
            encrypt_total,
            decrypt_total,
            resolve_failures_total,
        }
    }
}

/// Hosts the metrics HTTP server.
pub struct Metrics {
    registry: Registry,
    host: String,
    path: String,
}

impl Metrics {
    /// Builds a metrics manager with a fresh registry, listening on
    /// `host:port`, serving `path`. Returns the manager alongside the
    /// [`Counters`] handle to pass into the KMS services.
    pub fn new(port: u16, path: impl Into<String>) -> (Self, Counters) {
        let registry = Registry::new();
        let counters = Counters::register(&registry);
        (
            Self {
                registry,
                host: format!("127.0.0.1:{port}"),
                path: path.into(),
            },
            counters,
        )
    }

    /// Serves the metrics endpoint, returning a one-shot receiver for its
    /// terminal error.
    pub fn start(self) -> tokio::sync::oneshot::Receiver<Error> {
        let (tx, rx) = tokio::sync::oneshot::channel();
        let manager = Arc::new(self);
        tokio::spawn(async move {
            if let Err(e) = manager.serve().await {
                let _ = tx.send(e);
            }
        });
        rx
    }

    async fn serve(self: Arc<Self>) -> Result<()> {
        let listener = TcpListener::bind(&self.host)
            .await
            .map_err(|e| Error::Transport(format!("bind {}: {e}", self.host)))?;
        tracing::info!(host = %self.host, path = %self.path, "registering metrics listener");

        loop {
            let (stream, _) = listener
                .accept()
                .await
                .map_err(|e| Error::Transport(e.to_string()))?;
            let io = TokioIo::new(stream);
            let manager = self.clone();
            tokio::spawn(async move {
                let service = service_fn(move |req: Request<hyper::body::Incoming>| {
                    let manager = manager.clone();
                    async move { manager.handle(req) }
                });
                if let Err(e) = http1::Builder::new().serve_connection(io, service).await {
                    tracing::warn!(error = %e, "metrics connection error");
                }
            });
        }
    }

    fn handle(
        &self,
        req: Request<hyper::body::Incoming>,
    ) -> std::result::Result<Response<Full<Bytes>>, std::convert::Infallible> {
        if req.uri().path() != self.path {
            return Ok(Response::builder()
                .status(StatusCode::NOT_FOUND)
                .body(Full::new(Bytes::new()))
                .unwrap());
        }

        let metric_families = self.registry.gather();
        let encoder = TextEncoder::new();
        let mut buffer = Vec::new();
        encoder.encode(&metric_families, &mut buffer).unwrap();

        Ok(Response::new(Full::new(Bytes::from(buffer))))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_register_onto_a_fresh_registry() {
        let (metrics, counters) = Metrics::new(0, "/metrics");
        counters.encrypt_total.inc();
        let families = metrics.registry.gather();
        let names: Vec<_> = families.iter().map(|f| f.get_name()).collect();
        assert!(names.contains(&"encrypt_total"));
        assert!(names.contains(&"decrypt_total"));
        assert!(names.contains(&"resolve_failures_total"));
    }
}
