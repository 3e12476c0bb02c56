//! P-521 ECDH primitives and the Concat KDF used to derive the A256GCM
//! content-encryption key from an ECDH-ES shared secret (RFC 7518 §4.6).
//!
//! Generalized from the teacher's multi-curve `jwe::algorithms` module: this
//! system only ever operates on P-521 (Tang's ECMR curve), and there is no
//! AES key-wrap step — the derived key bytes are the CEK directly.

use p521::ecdh::diffie_hellman;
use p521::elliptic_curve::sec1::ToEncodedPoint;
use p521::{NonZeroScalar, PublicKey, SecretKey};
use rand_core::OsRng;
use sha2::{Digest, Sha256};

use crate::error::{Error, Result};

/// An ephemeral P-521 key pair: `(private scalar bytes, uncompressed public point)`.
pub fn generate_ephemeral_keypair() -> (Vec<u8>, Vec<u8>) {
    let secret = SecretKey::random(&mut OsRng);
    let public = PublicKey::from_secret_scalar(&secret.to_nonzero_scalar());
    (
        secret.to_bytes().to_vec(),
        public.to_encoded_point(false).as_bytes().to_vec(),
    )
}

/// Performs P-521 ECDH, returning the raw shared secret (the affine
/// x-coordinate of the product point).
pub fn key_agreement(private_key: &[u8], public_key: &[u8]) -> Result<Vec<u8>> {
    let secret = SecretKey::from_slice(private_key)
        .map_err(|e| Error::EncryptFailed(format!("invalid P-521 private key: {e}")))?;
    let public = PublicKey::from_sec1_bytes(public_key)
        .map_err(|e| Error::EncryptFailed(format!("invalid P-521 public key: {e}")))?;

    let scalar: NonZeroScalar = secret.to_nonzero_scalar();
    let shared = diffie_hellman(&scalar, public.as_affine());
    Ok(shared.raw_secret_bytes().to_vec())
}

/// RFC 7518 §4.6 Concat KDF, single-round (okm fits in one SHA-256 block),
/// used to turn an ECDH-ES shared secret into a content-encryption key.
///
/// `alg` is the JWE `enc` algorithm identifier fed into the KDF `AlgorithmID`
/// field; there is no PartyUInfo/PartyVInfo for anonymous single-recipient
/// ECDH-ES, so both are empty per RFC 7518 §4.6.2.
pub fn concat_kdf(shared_secret: &[u8], alg: &str, key_data_len_bits: u32) -> Vec<u8> {
    let mut hasher = Sha256::new();
    hasher.update(1u32.to_be_bytes()); // round counter, round 1
    hasher.update(shared_secret);
    hasher.update((alg.len() as u32).to_be_bytes());
    hasher.update(alg.as_bytes());
    hasher.update(0u32.to_be_bytes()); // PartyUInfo length
    hasher.update(0u32.to_be_bytes()); // PartyVInfo length
    hasher.update(key_data_len_bits.to_be_bytes()); // SuppPubInfo: keydatalen
    let digest = hasher.finalize();
    digest[..(key_data_len_bits / 8) as usize].to_vec()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_agreement_is_symmetric() {
        let (priv_a, pub_a) = generate_ephemeral_keypair();
        let (priv_b, pub_b) = generate_ephemeral_keypair();

        let shared_a = key_agreement(&priv_a, &pub_b).unwrap();
        let shared_b = key_agreement(&priv_b, &pub_a).unwrap();
        assert_eq!(shared_a, shared_b);
    }

    #[test]
    fn key_agreement_rejects_invalid_material() {
        let err = key_agreement(&[0u8; 4], &[0u8; 4]).unwrap_err();
        assert!(matches!(err, Error::EncryptFailed(_)));
    }

    #[test]
    fn concat_kdf_is_deterministic_and_sized() {
        let secret = b"shared-secret-material";
        let a = concat_kdf(secret, "A256GCM", 256);
        let b = concat_kdf(secret, "A256GCM", 256);
        assert_eq!(a, b);
        assert_eq!(a.len(), 32);
    }

    #[test]
    fn concat_kdf_differs_by_algorithm_id() {
        let secret = b"shared-secret-material";
        let a = concat_kdf(secret, "A256GCM", 256);
        let b = concat_kdf(secret, "A128GCM", 256);
        assert_ne!(a, b);
    }
}
