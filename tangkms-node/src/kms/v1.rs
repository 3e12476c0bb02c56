//! The KMS v1beta1 service: a single `Exchange` resolved once at construction.

use std::sync::Arc;

use tangkms_core::{Cryptor, Exchange};
use tonic::{Request, Response, Status};

use super::proto_v1::key_management_service_server::KeyManagementService;
use super::proto_v1::{
    DecryptRequest, DecryptResponse, EncryptRequest, EncryptResponse, VersionRequest,
    VersionResponse,
};
use crate::error::Error;
use crate::metrics::Counters;

const PLUGIN_VERSION: &str = "v1beta1";
const PLUGIN_NAME: &str = "TangKMS";
const PLUGIN_RUN_ID: &str = "0.0.1";

fn core_status(e: tangkms_core::Error) -> Status {
    Status::from(Error::Core(e))
}

/// Serves the v1beta1 contract against an `Exchange` resolved once at
/// startup. Unlike [`super::v2::V2Service`], this service never refreshes its
/// `Exchange` per call (see `DESIGN.md`'s Open Question decision 3).
pub struct V1Service {
    exchange: Exchange,
    cryptor: Arc<Cryptor>,
    counters: Arc<Counters>,
}

impl V1Service {
    /// Builds a v1 service around a pre-resolved `Exchange`.
    pub fn new(exchange: Exchange, cryptor: Arc<Cryptor>, counters: Arc<Counters>) -> Self {
        Self {
            exchange,
            cryptor,
            counters,
        }
    }
}

#[tonic::async_trait]
impl KeyManagementService for V1Service {
    async fn version(
        &self,
        _request: Request<VersionRequest>,
    ) -> Result<Response<VersionResponse>, Status> {
        Ok(Response::new(VersionResponse {
            version: PLUGIN_VERSION.to_string(),
            runtime_name: PLUGIN_NAME.to_string(),
            runtime_version: PLUGIN_RUN_ID.to_string(),
        }))
    }

    async fn encrypt(
        &self,
        request: Request<EncryptRequest>,
    ) -> Result<Response<EncryptResponse>, Status> {
        let req = request.into_inner();
        let cipher = self
            .cryptor
            .encrypt(&self.exchange, &req.plain)
            .map_err(core_status)?;
        self.counters.encrypt_total.inc();
        Ok(Response::new(EncryptResponse { cipher }))
    }

    async fn decrypt(
        &self,
        request: Request<DecryptRequest>,
    ) -> Result<Response<DecryptResponse>, Status> {
        let req = request.into_inner();
        let plain = self.cryptor.decrypt(&req.cipher).await.map_err(core_status)?;
        self.counters.decrypt_total.inc();
        Ok(Response::new(DecryptResponse { plain }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use tangkms_core::ClevisDecryptor;

    struct EchoDecryptor;

    #[async_trait]
    impl ClevisDecryptor for EchoDecryptor {
        async fn decrypt(&self, ciphertext: &[u8]) -> tangkms_core::Result<Vec<u8>> {
            Ok(ciphertext.to_vec())
        }
    }

    fn test_exchange() -> Exchange {
        use base64::engine::general_purpose::URL_SAFE_NO_PAD;
        use base64::Engine;
        use std::collections::HashMap;
        use tangkms_core::Jwk;

        let (_priv, public) = tangkms_core::crypto::algorithms::generate_ephemeral_keypair();
        Exchange {
            key_id: "kid".to_string(),
            derivation_key: Jwk {
                kty: "EC".to_string(),
                crv: "P-521".to_string(),
                x: URL_SAFE_NO_PAD.encode(&public[1..67]),
                y: URL_SAFE_NO_PAD.encode(&public[67..133]),
                key_ops: None,
                alg: None,
                other: HashMap::new(),
            },
            protected_headers: tangkms_core::exchange::ProtectedHeaders {
                alg: "ECDH-ES".to_string(),
                enc: "A256GCM".to_string(),
                kid: "kid".to_string(),
                clevis: tangkms_core::exchange::ClevisHeader {
                    pin: "tang".to_string(),
                    tang: tangkms_core::exchange::ClevisTang {
                        url: "https://tang.example".to_string(),
                        adv: "adv".to_string(),
                    },
                },
            },
        }
    }

    #[tokio::test]
    async fn version_reports_fixed_plugin_identity() {
        let cryptor = Arc::new(Cryptor::with_decryptor(Box::new(EchoDecryptor)));
        let (_metrics, counters) = crate::metrics::Metrics::new(0, "/metrics");
        let service = V1Service::new(test_exchange(), cryptor, Arc::new(counters));
        let response = service.version(Request::new(VersionRequest::default())).await.unwrap();
        let inner = response.into_inner();
        assert_eq!(inner.version, "v1beta1");
        assert_eq!(inner.runtime_name, "TangKMS");
        assert_eq!(inner.runtime_version, "0.0.1");
    }

    #[tokio::test]
    async fn encrypt_returns_cipher_bytes_verbatim() {
        let cryptor = Arc::new(Cryptor::with_decryptor(Box::new(EchoDecryptor)));
        let (_metrics, counters) = crate::metrics::Metrics::new(0, "/metrics");
        let service = V1Service::new(test_exchange(), cryptor, Arc::new(counters));
        let request = Request::new(EncryptRequest {
            plain: b"hello".to_vec(),
        });
        let response = service.encrypt(request).await.unwrap();
        assert_eq!(
            String::from_utf8(response.into_inner().cipher)
                .unwrap()
                .split('.')
                .count(),
            5
        );
    }

    #[tokio::test]
    async fn decrypt_passes_cipher_straight_to_cryptor() {
        let cryptor = Arc::new(Cryptor::with_decryptor(Box::new(EchoDecryptor)));
        let (_metrics, counters) = crate::metrics::Metrics::new(0, "/metrics");
        let service = V1Service::new(test_exchange(), cryptor, Arc::new(counters));
        let request = Request::new(DecryptRequest {
            cipher: b"opaque-jwe".to_vec(),
        });
        let response = service.decrypt(request).await.unwrap();
        assert_eq!(response.into_inner().plain, b"opaque-jwe");
    }
}
