//! Builds and parses the compact-serialization, Clevis-shaped JWE this
//! system produces on `Encrypt` and consumes on `Decrypt`.
//!
//! Generalized from `tap-didcomm-core::jwe::header` (base64url JSON framing)
//! and `tap-didcomm-core::jwe::mod` (compact serialization shape), dropping
//! the AES key-wrap step the teacher's anoncrypt/authcrypt envelopes use:
//! `alg=ECDH-ES` agrees on the content-encryption key directly.

use aes_gcm::aead::Aead;
use aes_gcm::{Aes256Gcm, KeyInit, Nonce};
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use rand_core::{OsRng, RngCore};
use serde::{Deserialize, Serialize};

use super::algorithms::{concat_kdf, generate_ephemeral_keypair, key_agreement};
use crate::error::{Error, Result};
use crate::exchange::{ClevisHeader, Exchange, Jwk};

/// The ephemeral public key carried in the protected header for ECDH-ES.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EphemeralPublicKey {
    /// Always `"EC"`.
    pub kty: String,
    /// Always `"P-521"`.
    pub crv: String,
    /// Base64url-no-pad x-coordinate.
    pub x: String,
    /// Base64url-no-pad y-coordinate.
    pub y: String,
}

/// The full JWE protected header, as placed on the wire.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FullProtectedHeader {
    /// Always `"ECDH-ES"`.
    pub alg: String,
    /// Always `"A256GCM"`.
    pub enc: String,
    /// The selected derivation key's thumbprint.
    pub kid: String,
    /// The sender's ephemeral public key for this JWE.
    pub epk: EphemeralPublicKey,
    /// The Clevis pin descriptor.
    pub clevis: ClevisHeader,
}

/// A parsed compact JWE.
pub struct ParsedJwe {
    /// The decoded protected header.
    pub header: FullProtectedHeader,
    header_b64: String,
    iv: Vec<u8>,
    ciphertext: Vec<u8>,
    tag: Vec<u8>,
}

/// Encrypts `plaintext` into a compact Clevis-shaped JWE using `exchange`'s
/// derivation key and protected headers.
///
/// # Errors
/// Returns [`Error::EncryptFailed`] on any underlying cryptographic failure.
pub fn encrypt(exchange: &Exchange, plaintext: &[u8]) -> Result<Vec<u8>> {
    let recipient_point = exchange.derivation_key.raw_point()?;
    let (eph_private, eph_public) = generate_ephemeral_keypair();
    let shared_secret = key_agreement(&eph_private, &recipient_point)?;
    let cek = concat_kdf(&shared_secret, "A256GCM", 256);

    let eph_x = &eph_public[1..67];
    let eph_y = &eph_public[67..133];
    let header = FullProtectedHeader {
        alg: exchange.protected_headers.alg.clone(),
        enc: exchange.protected_headers.enc.clone(),
        kid: exchange.protected_headers.kid.clone(),
        epk: EphemeralPublicKey {
            kty: "EC".to_string(),
            crv: "P-521".to_string(),
            x: URL_SAFE_NO_PAD.encode(eph_x),
            y: URL_SAFE_NO_PAD.encode(eph_y),
        },
        clevis: exchange.protected_headers.clevis.clone(),
    };

    let header_json =
        serde_json::to_vec(&header).map_err(|e| Error::EncryptFailed(e.to_string()))?;
    let header_b64 = URL_SAFE_NO_PAD.encode(&header_json);

    let mut iv = [0u8; 12];
    OsRng.fill_bytes(&mut iv);

    let cipher = Aes256Gcm::new_from_slice(&cek)
        .map_err(|e| Error::EncryptFailed(format!("invalid content encryption key: {e}")))?;
    let nonce = Nonce::from_slice(&iv);
    let sealed = cipher
        .encrypt(
            nonce,
            aes_gcm::aead::Payload {
                msg: plaintext,
                aad: header_b64.as_bytes(),
            },
        )
        .map_err(|e| Error::EncryptFailed(format!("AES-GCM encryption failed: {e}")))?;

    let tag_offset = sealed.len() - 16;
    let (ciphertext, tag) = sealed.split_at(tag_offset);

    Ok(format!(
        "{header_b64}..{}.{}.{}",
        URL_SAFE_NO_PAD.encode(iv),
        URL_SAFE_NO_PAD.encode(ciphertext),
        URL_SAFE_NO_PAD.encode(tag),
    )
    .into_bytes())
}

/// Splits a compact JWE into its five segments without decrypting it.
///
/// # Errors
/// Returns [`Error::DecryptFailed`] if the input does not have exactly five
/// dot-separated segments or the header does not decode as JSON.
pub fn parse(jwe: &[u8]) -> Result<ParsedJwe> {
    let text = std::str::from_utf8(jwe)
        .map_err(|_| Error::DecryptFailed("ciphertext is not valid utf-8".into()))?;
    let segments: Vec<&str> = text.split('.').collect();
    if segments.len() != 5 {
        return Err(Error::DecryptFailed(
            "JWE must have five dot-separated segments".into(),
        ));
    }
    let [header_b64, _encrypted_key, iv_b64, ciphertext_b64, tag_b64] = segments[..] else {
        unreachable!("length checked above");
    };

    let header_bytes = URL_SAFE_NO_PAD
        .decode(header_b64)
        .map_err(|_| Error::DecryptFailed("invalid protected header encoding".into()))?;
    let header: FullProtectedHeader = serde_json::from_slice(&header_bytes)
        .map_err(|e| Error::DecryptFailed(format!("invalid protected header: {e}")))?;

    let iv = URL_SAFE_NO_PAD
        .decode(iv_b64)
        .map_err(|_| Error::DecryptFailed("invalid iv encoding".into()))?;
    let ciphertext = URL_SAFE_NO_PAD
        .decode(ciphertext_b64)
        .map_err(|_| Error::DecryptFailed("invalid ciphertext encoding".into()))?;
    let tag = URL_SAFE_NO_PAD
        .decode(tag_b64)
        .map_err(|_| Error::DecryptFailed("invalid tag encoding".into()))?;

    Ok(ParsedJwe {
        header,
        header_b64: header_b64.to_string(),
        iv,
        ciphertext,
        tag,
    })
}

impl ParsedJwe {
    /// Decrypts this JWE given the already-recovered content-encryption key.
    pub fn open(&self, cek: &[u8]) -> Result<Vec<u8>> {
        let cipher = Aes256Gcm::new_from_slice(cek)
            .map_err(|e| Error::DecryptFailed(format!("invalid content encryption key: {e}")))?;
        let nonce = Nonce::from_slice(&self.iv);
        let mut sealed = self.ciphertext.clone();
        sealed.extend_from_slice(&self.tag);
        cipher
            .decrypt(
                nonce,
                aes_gcm::aead::Payload {
                    msg: &sealed,
                    aad: self.header_b64.as_bytes(),
                },
            )
            .map_err(|_| Error::DecryptFailed("authentication failed".into()))
    }

    /// The ephemeral public key's raw SEC1 uncompressed point.
    pub fn ephemeral_point(&self) -> Result<Vec<u8>> {
        let x = URL_SAFE_NO_PAD
            .decode(&self.header.epk.x)
            .map_err(|_| Error::DecryptFailed("invalid epk x coordinate".into()))?;
        let y = URL_SAFE_NO_PAD
            .decode(&self.header.epk.y)
            .map_err(|_| Error::DecryptFailed("invalid epk y coordinate".into()))?;
        let mut point = Vec::with_capacity(1 + x.len() + y.len());
        point.push(0x04);
        point.extend_from_slice(&x);
        point.extend_from_slice(&y);
        Ok(point)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exchange::{ClevisTang, ProtectedHeaders};
    use crate::crypto::algorithms::generate_ephemeral_keypair as gen_kp;
    use std::collections::HashMap;

    fn test_exchange() -> (Exchange, Vec<u8>) {
        let (recipient_priv, recipient_pub) = gen_kp();
        let x = URL_SAFE_NO_PAD.encode(&recipient_pub[1..67]);
        let y = URL_SAFE_NO_PAD.encode(&recipient_pub[67..133]);
        let derivation_key = Jwk {
            kty: "EC".to_string(),
            crv: "P-521".to_string(),
            x,
            y,
            key_ops: None,
            alg: None,
            other: HashMap::new(),
        };
        let exchange = Exchange {
            key_id: "test-kid".to_string(),
            derivation_key,
            protected_headers: ProtectedHeaders {
                alg: "ECDH-ES".to_string(),
                enc: "A256GCM".to_string(),
                kid: "test-kid".to_string(),
                clevis: ClevisHeader {
                    pin: "tang".to_string(),
                    tang: ClevisTang {
                        url: "https://tang.example".to_string(),
                        adv: "adv-bytes".to_string(),
                    },
                },
            },
        };
        (exchange, recipient_priv)
    }

    #[test]
    fn encrypt_produces_five_segment_compact_jwe() {
        let (exchange, _) = test_exchange();
        let jwe = encrypt(&exchange, b"hello").unwrap();
        let text = String::from_utf8(jwe).unwrap();
        assert_eq!(text.split('.').count(), 5);
    }

    #[test]
    fn encrypt_then_manual_ecdh_recovers_plaintext() {
        let (exchange, recipient_priv) = test_exchange();
        let jwe = encrypt(&exchange, b"round trip me").unwrap();
        let parsed = parse(&jwe).unwrap();

        assert_eq!(parsed.header.clevis.tang.url, "https://tang.example");
        assert_eq!(parsed.header.kid, "test-kid");

        let eph_point = parsed.ephemeral_point().unwrap();
        let shared = key_agreement(&recipient_priv, &eph_point).unwrap();
        let cek = concat_kdf(&shared, "A256GCM", 256);

        let plaintext = parsed.open(&cek).unwrap();
        assert_eq!(plaintext, b"round trip me");
    }

    #[test]
    fn tampered_ciphertext_fails_authentication() {
        let (exchange, recipient_priv) = test_exchange();
        let mut jwe = encrypt(&exchange, b"hello").unwrap();
        *jwe.last_mut().unwrap() = if *jwe.last().unwrap() == b'A' { b'B' } else { b'A' };
        let parsed = parse(&jwe).unwrap();

        let eph_point = parsed.ephemeral_point().unwrap();
        let shared = key_agreement(&recipient_priv, &eph_point).unwrap();
        let cek = concat_kdf(&shared, "A256GCM", 256);

        assert!(parsed.open(&cek).is_err());
    }

    #[test]
    fn empty_plaintext_round_trips() {
        let (exchange, recipient_priv) = test_exchange();
        let jwe = encrypt(&exchange, b"").unwrap();
        let parsed = parse(&jwe).unwrap();
        let eph_point = parsed.ephemeral_point().unwrap();
        let shared = key_agreement(&recipient_priv, &eph_point).unwrap();
        let cek = concat_kdf(&shared, "A256GCM", 256);
        assert_eq!(parsed.open(&cek).unwrap(), b"");
    }
}
