//! The cryptographic engine: wraps plaintext into a Clevis-format JWE and
//! unwraps a JWE back to plaintext.

pub mod algorithms;
pub mod jwe;
pub mod mr;

use rand_core::{OsRng, RngCore};

use crate::error::{Error, Result};
use crate::exchange::Exchange;
use mr::ClevisDecryptor;

/// Wraps plaintext into Clevis-format JWE; unwraps JWE to plaintext.
///
/// `Encrypt` is this crate's own responsibility (spec.md §1 bullet 2):
/// no real Rust crate performs a Clevis-compatible ECDH-ES+A256GCM wrap, so
/// [`jwe::encrypt`] builds it directly atop [`algorithms`]. `Decrypt`
/// dispatches to a [`ClevisDecryptor`], the one external black box this
/// system still names explicitly (spec.md §1): the production instance,
/// [`mr::TangClevisDecryptor`], is the only implementation provided, since
/// no independent Clevis crate exists in the ecosystem to delegate to.
pub struct Cryptor {
    decryptor: Box<dyn ClevisDecryptor>,
}

impl Default for Cryptor {
    fn default() -> Self {
        Self {
            decryptor: Box::new(mr::TangClevisDecryptor::new()),
        }
    }
}

impl Cryptor {
    /// Builds a Cryptor using the default, network-backed Clevis decryptor.
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a Cryptor against a caller-supplied decryptor, for tests.
    pub fn with_decryptor(decryptor: Box<dyn ClevisDecryptor>) -> Self {
        Self { decryptor }
    }

    /// Produces a compact Clevis-format JWE by ECDH-ES key agreement against
    /// `exchange.derivation_key`, content-encrypted with A256GCM.
    ///
    /// # Errors
    /// Returns [`Error::EncryptFailed`] on any underlying failure.
    pub fn encrypt(&self, exchange: &Exchange, plain: &[u8]) -> Result<Vec<u8>> {
        jwe::encrypt(exchange, plain)
    }

    /// Dispatches to the configured [`ClevisDecryptor`] to recover the
    /// plaintext from `cipher`.
    ///
    /// # Errors
    /// Returns [`Error::DecryptFailed`] on any underlying failure.
    pub async fn decrypt(&self, cipher: &[u8]) -> Result<Vec<u8>> {
        self.decryptor
            .decrypt(cipher)
            .await
            .map_err(|e| match e {
                Error::DecryptFailed(msg) => Error::DecryptFailed(msg),
                other => Error::DecryptFailed(other.to_string()),
            })
    }

    /// Self-check primitive used by v2 `Status` and the optional health
    /// ping: generate 8 random hex bytes, encrypt, decrypt, compare.
    ///
    /// # Errors
    /// Returns [`Error::EncryptFailed`]/[`Error::DecryptFailed`] if the
    /// round trip fails, or a generic encrypt/decrypt mismatch error.
    pub async fn self_check(&self, exchange: &Exchange) -> Result<()> {
        let mut raw = [0u8; 8];
        OsRng.fill_bytes(&mut raw);
        let plaintext = hex::encode(raw);

        let cipher = self.encrypt(exchange, plaintext.as_bytes())?;
        let recovered = self.decrypt(&cipher).await?;

        if recovered != plaintext.as_bytes() {
            return Err(Error::DecryptFailed(
                "self-check round trip did not reproduce the original plaintext".into(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exchange::{ClevisHeader, ClevisTang, Jwk, ProtectedHeaders};
    use async_trait::async_trait;
    use base64::engine::general_purpose::URL_SAFE_NO_PAD;
    use base64::Engine;
    use std::collections::HashMap;
    use std::sync::Mutex;

    fn test_exchange() -> Exchange {
        let (_, public) = algorithms::generate_ephemeral_keypair();
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
            protected_headers: ProtectedHeaders {
                alg: "ECDH-ES".to_string(),
                enc: "A256GCM".to_string(),
                kid: "kid".to_string(),
                clevis: ClevisHeader {
                    pin: "tang".to_string(),
                    tang: ClevisTang {
                        url: "https://tang.example".to_string(),
                        adv: "adv".to_string(),
                    },
                },
            },
        }
    }

    struct EchoDecryptor {
        last_seen: Mutex<Option<Vec<u8>>>,
        reply: Vec<u8>,
    }

    #[async_trait]
    impl ClevisDecryptor for EchoDecryptor {
        async fn decrypt(&self, ciphertext: &[u8]) -> Result<Vec<u8>> {
            *self.last_seen.lock().unwrap() = Some(ciphertext.to_vec());
            Ok(self.reply.clone())
        }
    }

    #[tokio::test]
    async fn encrypt_produces_a_parseable_compact_jwe() {
        let cryptor = Cryptor::new();
        let exchange = test_exchange();
        let cipher = cryptor.encrypt(&exchange, b"hello").unwrap();
        assert_eq!(String::from_utf8(cipher).unwrap().split('.').count(), 5);
    }

    #[tokio::test]
    async fn decrypt_delegates_to_the_configured_decryptor() {
        let cryptor = Cryptor::with_decryptor(Box::new(EchoDecryptor {
            last_seen: Mutex::new(None),
            reply: b"decrypted".to_vec(),
        }));
        let result = cryptor.decrypt(b"some-cipher").await.unwrap();
        assert_eq!(result, b"decrypted");
    }

    #[tokio::test]
    async fn self_check_fails_when_decryptor_disagrees_with_plaintext() {
        let cryptor = Cryptor::with_decryptor(Box::new(EchoDecryptor {
            last_seen: Mutex::new(None),
            reply: b"not-the-original".to_vec(),
        }));
        let exchange = test_exchange();
        let err = cryptor.self_check(&exchange).await.unwrap_err();
        assert!(matches!(err, Error::DecryptFailed(_)));
    }
}
