//! The McCallum–Relyea (MR) recovery exchange: the "Clevis decryption
//! library" that spec.md §1 names as an external black box. No Rust crate
//! implements it, so this module performs the real blinded point arithmetic
//! against a Tang server's `/rec/{kid}` endpoint.
//!
//! Protocol, given the sender's ephemeral public point `X` (the JWE's `epk`)
//! and Tang's advertised derivation public point `D` for key id `kid`:
//! 1. Generate a random blinding scalar `r` and compute `R = r*G`.
//! 2. Send `Y = X + R` to `POST {url}/rec/{kid}`.
//! 3. Tang, holding the private scalar `d` with `D = d*G`, returns
//!    `Z = d*Y = d*X + r*D`.
//! 4. Recover the real ECDH shared point `d*X = Z - r*D`.
//!
//! Tang never sees `X`; the client never sees `d`.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use p521::elliptic_curve::sec1::{FromEncodedPoint, ToEncodedPoint};
use p521::elliptic_curve::Group;
use p521::{AffinePoint, EncodedPoint, NonZeroScalar, ProjectivePoint};
use rand_core::OsRng;
use serde_json::Value;

use crate::error::{Error, Result};
use crate::exchange::{Jwk, JwkSet};

/// Decrypts a Clevis-compatible JWE by performing the MR exchange against
/// the Tang server named in the JWE's own header.
#[async_trait::async_trait]
pub trait ClevisDecryptor: Send + Sync {
    /// Decrypts `ciphertext`, a compact Clevis-shaped JWE.
    ///
    /// # Errors
    /// Returns [`Error::DecryptFailed`] on any parse, network, or
    /// cryptographic failure.
    async fn decrypt(&self, ciphertext: &[u8]) -> Result<Vec<u8>>;
}

/// The production [`ClevisDecryptor`], talking to a real Tang server.
pub struct TangClevisDecryptor {
    client: reqwest::Client,
}

impl Default for TangClevisDecryptor {
    fn default() -> Self {
        Self {
            client: reqwest::Client::new(),
        }
    }
}

impl TangClevisDecryptor {
    /// Builds a new decryptor using a fresh HTTP client.
    pub fn new() -> Self {
        Self::default()
    }

    async fn recover_point(&self, url: &str, kid: &str, blinded: &Jwk) -> Result<Vec<u8>> {
        let endpoint = format!("{url}/rec/{kid}");
        let response = self
            .client
            .post(&endpoint)
            .json(blinded)
            .send()
            .await
            .map_err(|e| Error::DecryptFailed(format!("tang recovery request failed: {e}")))?;

        if !response.status().is_success() {
            return Err(Error::DecryptFailed(format!(
                "unexpected status {} from {endpoint}",
                response.status()
            )));
        }

        let body: Jwk = response
            .json()
            .await
            .map_err(|e| Error::DecryptFailed(format!("invalid recovery response: {e}")))?;
        body.raw_point()
    }
}

fn point_to_jwk(point: &ProjectivePoint) -> Result<Jwk> {
    let affine: AffinePoint = point.to_affine();
    let encoded = affine.to_encoded_point(false);
    let bytes = encoded.as_bytes();
    if bytes.len() != 133 {
        return Err(Error::DecryptFailed("unexpected P-521 point length".into()));
    }
    Ok(Jwk {
        kty: "EC".to_string(),
        crv: "P-521".to_string(),
        x: URL_SAFE_NO_PAD.encode(&bytes[1..67]),
        y: URL_SAFE_NO_PAD.encode(&bytes[67..133]),
        key_ops: None,
        alg: None,
        other: Default::default(),
    })
}

fn point_from_raw(raw: &[u8]) -> Result<ProjectivePoint> {
    let encoded = EncodedPoint::from_bytes(raw)
        .map_err(|_| Error::DecryptFailed("invalid curve point encoding".into()))?;
    let affine = AffinePoint::from_encoded_point(&encoded);
    if affine.is_none().into() {
        return Err(Error::DecryptFailed("point is not on the curve".into()));
    }
    Ok(ProjectivePoint::from(affine.unwrap()))
}

/// Finds the JWK in `adv_json` (a JWK Set) whose RFC 7638 thumbprint is
/// `kid`.
fn find_derivation_key(adv_json: &[u8], kid: &str) -> Result<Jwk> {
    let set: JwkSet = serde_json::from_slice(adv_json)
        .map_err(|e| Error::DecryptFailed(format!("invalid cached advertisement: {e}")))?;
    set.keys
        .into_iter()
        .find(|key| key.thumbprint().map(|tp| tp == kid).unwrap_or(false))
        .ok_or(Error::DerivationKeyMissing)
}

#[async_trait::async_trait]
impl ClevisDecryptor for TangClevisDecryptor {
    async fn decrypt(&self, ciphertext: &[u8]) -> Result<Vec<u8>> {
        let parsed = super::jwe::parse(ciphertext)?;
        let adv_json = URL_SAFE_NO_PAD
            .decode(&parsed.header.clevis.tang.adv)
            .map_err(|_| Error::DecryptFailed("invalid cached advertisement encoding".into()))?;
        let derivation_key = find_derivation_key(&adv_json, &parsed.header.kid)?;
        let d_pub = point_from_raw(&derivation_key.raw_point()?)?;

        let eph_point = point_from_raw(&parsed.ephemeral_point()?)?;

        let blinding_scalar = NonZeroScalar::random(&mut OsRng);
        let blinding_point = ProjectivePoint::generator() * blinding_scalar.as_ref();
        let blinded = eph_point + blinding_point;

        let blinded_jwk = point_to_jwk(&blinded)?;
        let tang_url = &parsed.header.clevis.tang.url;
        let recovered_bytes = self
            .recover_point(tang_url, &parsed.header.kid, &blinded_jwk)
            .await?;
        let recovered = point_from_raw(&recovered_bytes)?;

        let unblind = d_pub * blinding_scalar.as_ref();
        let shared_point = recovered - unblind;
        let shared_affine = shared_point.to_affine();
        let shared_encoded = shared_affine.to_encoded_point(false);
        let shared_x = &shared_encoded.as_bytes()[1..67];

        let cek = super::algorithms::concat_kdf(shared_x, "A256GCM", 256);
        parsed.open(&cek)
    }
}
