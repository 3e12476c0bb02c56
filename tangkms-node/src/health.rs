//! Hosts the `/healthz`-style HTTP endpoint described in spec.md §4.8: dial
//! the plugin's UNIX socket, call a version/status-style ping, and optionally
//! round-trip a `"secret"` plaintext through Encrypt/Decrypt.
//!
//! Grounded on `original_source/plugin/healthz.go`'s `HealthCheckerManager`
//! and the v1/v2 `HealthChecker` implementations (`plugin/v1/healthz.go`,
//! `plugin/v2/healthz.go`).

use std::convert::Infallible;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use http_body_util::Full;
use hyper::body::Bytes;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use tokio::net::TcpListener;
use tonic::transport::Endpoint;

use crate::error::{Error, Result};
use crate::kms::proto_v1::key_management_service_client::KeyManagementServiceClient as V1Client;
use crate::kms::proto_v1::VersionRequest;
use crate::kms::proto_v2::key_management_service_client::KeyManagementServiceClient as V2Client;
use crate::kms::proto_v2::StatusRequest;

/// Which plugin contract the health manager pings.
#[derive(Debug, Clone, Copy)]
pub enum PluginVersion {
    /// Ping via `Version`.
    V1,
    /// Ping via `Status`, asserting `healthz == "ok"`.
    V2,
}

/// Hosts the health HTTP server.
pub struct Health {
    socket_path: PathBuf,
    call_timeout: Duration,
    version: PluginVersion,
    host: String,
    path: String,
}

impl Health {
    /// Builds a health manager dialing `socket_path`, listening on
    /// `host:port`, serving `path`.
    pub fn new(
        socket_path: PathBuf,
        call_timeout: Duration,
        version: PluginVersion,
        port: u16,
        path: impl Into<String>,
    ) -> Self {
        Self {
            socket_path,
            call_timeout,
            version,
            host: format!("127.0.0.1:{port}"),
            path: path.into(),
        }
    }

    async fn dial(&self) -> Result<tonic::transport::Channel> {
        let socket_path = self.socket_path.clone();
        Endpoint::try_from("http://[::]:50051")
            .map_err(|e| Error::HealthCheck(e.to_string()))?
            .timeout(self.call_timeout)
            .connect_with_connector(crate::plugin::unix_connector(socket_path))
            .await
            .map_err(|e| Error::HealthCheck(format!("dial failed: {e}")))
    }

    async fn ping_rpc(&self, channel: tonic::transport::Channel) -> Result<()> {
        match self.version {
            PluginVersion::V1 => {
                let mut client = V1Client::new(channel);
                client
                    .version(VersionRequest {
                        version: "v1beta1".to_string(),
                    })
                    .await
                    .map_err(|e| Error::HealthCheck(e.to_string()))?;
            }
            PluginVersion::V2 => {
                let mut client = V2Client::new(channel);
                let response = client
                    .status(StatusRequest {})
                    .await
                    .map_err(|e| Error::HealthCheck(e.to_string()))?
                    .into_inner();
                if response.healthz != "ok" {
                    return Err(Error::HealthCheck(format!(
                        "status is not ok: {}",
                        response.healthz
                    )));
                }
            }
        }
        Ok(())
    }

    async fn ping_kms(&self, channel: tonic::transport::Channel) -> Result<()> {
        match self.version {
            PluginVersion::V1 => {
                let mut client = V1Client::new(channel);
                let cipher = client
                    .encrypt(crate::kms::proto_v1::EncryptRequest {
                        plain: b"secret".to_vec(),
                    })
                    .await
                    .map_err(|e| Error::HealthCheck(e.to_string()))?
                    .into_inner()
                    .cipher;
                client
                    .decrypt(crate::kms::proto_v1::DecryptRequest { cipher })
                    .await
                    .map_err(|e| Error::HealthCheck(e.to_string()))?;
            }
            PluginVersion::V2 => {
                let mut client = V2Client::new(channel);
                let encrypted = client
                    .encrypt(crate::kms::proto_v2::EncryptRequest {
                        uid: uuid_like(),
                        plaintext: b"secret".to_vec(),
                    })
                    .await
                    .map_err(|e| Error::HealthCheck(e.to_string()))?
                    .into_inner();
                let decrypted = client
                    .decrypt(crate::kms::proto_v2::DecryptRequest {
                        uid: uuid_like(),
                        ciphertext: encrypted.ciphertext,
                        key_id: encrypted.key_id,
                        annotations: encrypted.annotations,
                    })
                    .await
                    .map_err(|e| Error::HealthCheck(e.to_string()))?
                    .into_inner()
                    .plaintext;
                if decrypted != b"secret" {
                    return Err(Error::HealthCheck(
                        "round trip did not reproduce the probe plaintext".into(),
                    ));
                }
            }
        }
        Ok(())
    }

    async fn check(&self, ping_kms: bool) -> Result<()> {
        let channel = self.dial().await?;
        self.ping_rpc(channel.clone()).await?;
        if ping_kms {
            self.ping_kms(channel).await?;
        }
        Ok(())
    }

    /// Serves the health endpoint, returning a one-shot receiver for its
    /// terminal error.
    pub fn start(self) -> tokio::sync::oneshot::Receiver<Error> {
        let (tx, rx) = tokio::sync::oneshot::channel();
        let manager = Arc::new(self);
        tokio::spawn(async move {
            if let Err(e) = manager.clone().serve().await {
                let _ = tx.send(e);
            }
        });
        rx
    }

    async fn serve(self: Arc<Self>) -> Result<()> {
        let listener = TcpListener::bind(&self.host)
            .await
            .map_err(|e| Error::Transport(format!("bind {}: {e}", self.host)))?;
        tracing::info!(host = %self.host, path = %self.path, "registering health listener");

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
                    async move { manager.handle(req).await }
                });
                if let Err(e) = http1::Builder::new().serve_connection(io, service).await {
                    tracing::warn!(error = %e, "health connection error");
                }
            });
        }
    }

    async fn handle(
        &self,
        req: Request<hyper::body::Incoming>,
    ) -> std::result::Result<Response<Full<Bytes>>, Infallible> {
        if req.uri().path() != self.path {
            return Ok(Response::builder()
                .status(StatusCode::NOT_FOUND)
                .body(Full::new(Bytes::new()))
                .unwrap());
        }

        let ping_kms = req
            .uri()
            .query()
            .map(|q| q.contains("ping-kms=true"))
            .unwrap_or(false);

        match self.check(ping_kms).await {
            Ok(()) => Ok(Response::new(Full::new(Bytes::from_static(b"ok")))),
            Err(e) => Ok(Response::builder()
                .status(StatusCode::SERVICE_UNAVAILABLE)
                .body(Full::new(Bytes::from(e.to_string())))
                .unwrap()),
        }
    }
}

fn uuid_like() -> String {
    uuid::Uuid::new_v4().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ping_kms_query_parameter_is_detected() {
        let uri: http::Uri = "/healthz?ping-kms=true".parse().unwrap();
        assert!(uri
            .query()
            .map(|q| q.contains("ping-kms=true"))
            .unwrap_or(false));

        let uri: http::Uri = "/healthz".parse().unwrap();
        assert!(!uri
            .query()
            .map(|q| q.contains("ping-kms=true"))
            .unwrap_or(false));
    }
}
