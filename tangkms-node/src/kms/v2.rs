//! The KMS v2 service: resolves a fresh `Exchange` on every call.

use std::collections::HashMap;
use std::sync::Arc;

use tangkms_core::{Advertiser, Cryptor, Thumbprinter};
use tonic::{Request, Response, Status};

use super::proto_v2::key_management_service_server::KeyManagementService;
use super::proto_v2::{
    DecryptRequest, DecryptResponse, EncryptRequest, EncryptResponse, StatusRequest,
    StatusResponse,
};
use crate::error::Error;
use crate::metrics::Counters;

/// Annotation key carrying the real JWE; `ciphertext` itself is always the
/// single placeholder byte (spec.md §4.6).
pub const ANNOTATION_KEY: &str = "flatheadmill.github.io";

const PLACEHOLDER_CIPHERTEXT: [u8; 1] = [0u8];

/// The conjunctive placeholder guard: both the length and the byte value
/// must match, never either alone.
fn is_placeholder(ciphertext: &[u8]) -> bool {
    ciphertext.len() == 1 && ciphertext[0] == 0
}

fn core_status(e: tangkms_core::Error) -> Status {
    Status::from(Error::Core(e))
}

/// Serves the v2 contract. Unlike [`super::v1::V1Service`], every RPC
/// resolves its own `Exchange` from scratch (see `DESIGN.md`'s Open Question
/// decision 3 for why the two services are intentionally asymmetric).
pub struct V2Service {
    advertiser: Arc<dyn Advertiser>,
    thumbprinter: Arc<dyn Thumbprinter>,
    cryptor: Arc<Cryptor>,
    counters: Arc<Counters>,
}

impl V2Service {
    /// Builds a v2 service around the resolver inputs and a shared cryptor.
    pub fn new(
        advertiser: Arc<dyn Advertiser>,
        thumbprinter: Arc<dyn Thumbprinter>,
        cryptor: Arc<Cryptor>,
        counters: Arc<Counters>,
    ) -> Self {
        Self {
            advertiser,
            thumbprinter,
            cryptor,
            counters,
        }
    }

    async fn resolve(&self) -> tangkms_core::Result<tangkms_core::Exchange> {
        tangkms_core::resolve_with_refresh(self.advertiser.as_ref(), self.thumbprinter.as_ref())
            .await
    }
}

#[tonic::async_trait]
impl KeyManagementService for V2Service {
    async fn status(
        &self,
        _request: Request<StatusRequest>,
    ) -> Result<Response<StatusResponse>, Status> {
        let response = match self.resolve().await {
            Ok(exchange) => StatusResponse {
                version: "v2beta1".to_string(),
                healthz: "ok".to_string(),
                key_id: exchange.key_id,
            },
            Err(e) => {
                tracing::warn!(error = %e, "v2 status resolution failed");
                self.counters.resolve_failures_total.inc();
                StatusResponse {
                    version: "v2beta1".to_string(),
                    healthz: e.to_string(),
                    key_id: String::new(),
                }
            }
        };
        Ok(Response::new(response))
    }

    async fn encrypt(
        &self,
        request: Request<EncryptRequest>,
    ) -> Result<Response<EncryptResponse>, Status> {
        let req = request.into_inner();
        let exchange = self.resolve().await.map_err(|e| {
            self.counters.resolve_failures_total.inc();
            core_status(e)
        })?;
        let jwe = self
            .cryptor
            .encrypt(&exchange, &req.plaintext)
            .map_err(core_status)?;

        let mut annotations = HashMap::new();
        annotations.insert(ANNOTATION_KEY.to_string(), jwe);

        self.counters.encrypt_total.inc();
        tracing::info!(uid = %req.uid, key_id = %exchange.key_id, "v2 encrypt");

        Ok(Response::new(EncryptResponse {
            key_id: exchange.key_id,
            ciphertext: PLACEHOLDER_CIPHERTEXT.to_vec(),
            annotations,
        }))
    }

    async fn decrypt(
        &self,
        request: Request<DecryptRequest>,
    ) -> Result<Response<DecryptResponse>, Status> {
        let req = request.into_inner();

        if !is_placeholder(&req.ciphertext) {
            return Err(Error::CiphertextPlaceholderInvalid.into());
        }

        let jwe = req
            .annotations
            .get(ANNOTATION_KEY)
            .ok_or(Error::CiphertextAnnotationMissing)?;

        tracing::info!(uid = %req.uid, key_id = %req.key_id, "v2 decrypt");

        let plaintext = self.cryptor.decrypt(jwe).await.map_err(core_status)?;
        Ok(Response::new(DecryptResponse { plaintext }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use base64::engine::general_purpose::URL_SAFE_NO_PAD;
    use base64::Engine;
    use p521::ecdsa::{Signature, SigningKey};
    use rand_core::OsRng;
    use signature::Signer;
    use std::collections::HashMap as StdHashMap;
    use tangkms_core::{ClevisDecryptor, StaticAdvertiser, StaticThumbprinter};

    struct RejectDecryptor;

    #[async_trait]
    impl ClevisDecryptor for RejectDecryptor {
        async fn decrypt(&self, _ciphertext: &[u8]) -> tangkms_core::Result<Vec<u8>> {
            Err(tangkms_core::Error::DecryptFailed("not reached".into()))
        }
    }

    fn jwk_from_point(point: &[u8], ops: &[&str]) -> tangkms_core::Jwk {
        tangkms_core::Jwk {
            kty: "EC".to_string(),
            crv: "P-521".to_string(),
            x: URL_SAFE_NO_PAD.encode(&point[1..67]),
            y: URL_SAFE_NO_PAD.encode(&point[67..133]),
            key_ops: Some(ops.iter().map(|s| s.to_string()).collect()),
            alg: None,
            other: StdHashMap::new(),
        }
    }

    fn signed_advertisement() -> (Vec<u8>, String, String) {
        let verify_key = SigningKey::random(&mut OsRng);
        let verify_point = verify_key.verifying_key().to_encoded_point(false).as_bytes().to_vec();
        let verify_jwk = jwk_from_point(&verify_point, &["verify"]);

        let derive_key = SigningKey::random(&mut OsRng);
        let derive_point = derive_key.verifying_key().to_encoded_point(false).as_bytes().to_vec();
        let derive_jwk = jwk_from_point(&derive_point, &["deriveKey"]);

        let payload = serde_json::json!({ "keys": [&verify_jwk, &derive_jwk] });
        let payload_bytes = serde_json::to_vec(&payload).unwrap();
        let header = URL_SAFE_NO_PAD.encode(br#"{"alg":"ES512"}"#);
        let payload_b64 = URL_SAFE_NO_PAD.encode(&payload_bytes);
        let signing_input = format!("{header}.{payload_b64}");
        let signature: Signature = verify_key.sign(signing_input.as_bytes());
        let adv = format!("{signing_input}.{}", URL_SAFE_NO_PAD.encode(signature.to_bytes())).into_bytes();

        (
            adv,
            verify_jwk.thumbprint().unwrap(),
            derive_jwk.thumbprint().unwrap(),
        )
    }

    #[tokio::test]
    async fn status_reports_ok_and_key_id_when_resolution_succeeds() {
        let (adv, verify_tp, derive_tp) = signed_advertisement();
        let advertiser = Arc::new(StaticAdvertiser::new("https://tang.example", adv));
        let thumbprinter =
            Arc::new(StaticThumbprinter::new(&format!("{verify_tp}/{derive_tp}")).unwrap());
        let cryptor = Arc::new(Cryptor::with_decryptor(Box::new(RejectDecryptor)));
        let (_metrics, counters) = crate::metrics::Metrics::new(0, "/metrics");
        let service = V2Service::new(advertiser, thumbprinter, cryptor, Arc::new(counters));

        let response = service.status(Request::new(StatusRequest {})).await.unwrap();
        let inner = response.into_inner();
        assert_eq!(inner.version, "v2beta1");
        assert_eq!(inner.healthz, "ok");
        assert_eq!(inner.key_id, derive_tp);
    }

    #[tokio::test]
    async fn status_reports_the_error_message_when_resolution_fails() {
        let advertiser = Arc::new(StaticAdvertiser::new("https://tang.example", b"garbage".to_vec()));
        let thumbprinter = Arc::new(StaticThumbprinter::new("a/b").unwrap());
        let cryptor = Arc::new(Cryptor::with_decryptor(Box::new(RejectDecryptor)));
        let (_metrics, counters) = crate::metrics::Metrics::new(0, "/metrics");
        let service = V2Service::new(advertiser, thumbprinter, cryptor, Arc::new(counters));

        let response = service.status(Request::new(StatusRequest {})).await.unwrap();
        let inner = response.into_inner();
        assert_eq!(
            inner.healthz,
            tangkms_core::Error::AdvertisementMalformed("truncated JWS".to_string()).to_string()
        );
        assert!(inner.key_id.is_empty());
    }

    #[tokio::test]
    async fn encrypt_returns_placeholder_ciphertext_with_jwe_in_annotation() {
        let (adv, verify_tp, derive_tp) = signed_advertisement();
        let advertiser = Arc::new(StaticAdvertiser::new("https://tang.example", adv));
        let thumbprinter =
            Arc::new(StaticThumbprinter::new(&format!("{verify_tp}/{derive_tp}")).unwrap());
        let cryptor = Arc::new(Cryptor::with_decryptor(Box::new(RejectDecryptor)));
        let (_metrics, counters) = crate::metrics::Metrics::new(0, "/metrics");
        let service = V2Service::new(advertiser, thumbprinter, cryptor, Arc::new(counters));

        let response = service
            .encrypt(Request::new(EncryptRequest {
                uid: "req-1".to_string(),
                plaintext: b"hello".to_vec(),
            }))
            .await
            .unwrap();
        let inner = response.into_inner();
        assert!(is_placeholder(&inner.ciphertext));
        assert!(inner.annotations.contains_key(ANNOTATION_KEY));
        assert_eq!(inner.key_id, derive_tp);
    }

    #[tokio::test]
    async fn decrypt_rejects_a_non_placeholder_ciphertext() {
        let advertiser = Arc::new(StaticAdvertiser::new("https://tang.example", vec![]));
        let thumbprinter = Arc::new(StaticThumbprinter::new("a/b").unwrap());
        let cryptor = Arc::new(Cryptor::with_decryptor(Box::new(RejectDecryptor)));
        let (_metrics, counters) = crate::metrics::Metrics::new(0, "/metrics");
        let service = V2Service::new(advertiser, thumbprinter, cryptor, Arc::new(counters));

        let err = service
            .decrypt(Request::new(DecryptRequest {
                uid: "req".to_string(),
                ciphertext: vec![0, 0],
                key_id: String::new(),
                annotations: HashMap::new(),
            }))
            .await
            .unwrap_err();
        assert_eq!(err.code(), tonic::Code::InvalidArgument);
    }

    #[tokio::test]
    async fn decrypt_rejects_a_missing_annotation() {
        let advertiser = Arc::new(StaticAdvertiser::new("https://tang.example", vec![]));
        let thumbprinter = Arc::new(StaticThumbprinter::new("a/b").unwrap());
        let cryptor = Arc::new(Cryptor::with_decryptor(Box::new(RejectDecryptor)));
        let (_metrics, counters) = crate::metrics::Metrics::new(0, "/metrics");
        let service = V2Service::new(advertiser, thumbprinter, cryptor, Arc::new(counters));

        let err = service
            .decrypt(Request::new(DecryptRequest {
                uid: "req".to_string(),
                ciphertext: PLACEHOLDER_CIPHERTEXT.to_vec(),
                key_id: String::new(),
                annotations: HashMap::new(),
            }))
            .await
            .unwrap_err();
        assert_eq!(err.code(), tonic::Code::InvalidArgument);
    }
}
