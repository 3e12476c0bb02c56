//! Parses a Tang advertisement, verifies its signature, selects the trust
//! pair to use, and builds the protected headers for a Clevis-shaped JWE.

use std::collections::HashMap;

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use p521::ecdsa::{Signature, VerifyingKey};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};
use signature::Verifier;

use crate::advertiser::Advertiser;
use crate::error::{Error, Result};
use crate::thumbprint::{Thumbprinter, TrustPair};

/// A JSON Web Key, restricted to the fields this system reads or writes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Jwk {
    /// Key type. Always `"EC"` for the keys Tang advertises.
    pub kty: String,
    /// Curve name, e.g. `"P-521"`.
    pub crv: String,
    /// Base64url-no-pad x-coordinate.
    pub x: String,
    /// Base64url-no-pad y-coordinate.
    pub y: String,
    /// Permitted key operations, e.g. `["verify"]` or `["deriveKey"]`.
    #[serde(rename = "key_ops", skip_serializing_if = "Option::is_none")]
    pub key_ops: Option<Vec<String>>,
    /// Algorithm hint; present on some advertised keys, irrelevant to MR.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub alg: Option<String>,
    /// Any other members present on the key, preserved verbatim.
    #[serde(flatten)]
    pub other: HashMap<String, Value>,
}

impl Jwk {
    fn has_op(&self, op: &str) -> bool {
        self.key_ops
            .as_ref()
            .is_some_and(|ops| ops.iter().any(|o| o == op))
    }

    /// RFC 7638 JSON Web Key thumbprint: SHA-256 over the canonical JSON
    /// form (only the required members, lexicographically sorted keys),
    /// base64url-no-pad encoded.
    pub fn thumbprint(&self) -> Result<String> {
        let mut canonical = Map::new();
        canonical.insert("crv".to_string(), Value::String(self.crv.clone()));
        canonical.insert("kty".to_string(), Value::String(self.kty.clone()));
        canonical.insert("x".to_string(), Value::String(self.x.clone()));
        canonical.insert("y".to_string(), Value::String(self.y.clone()));
        let json = serde_json::to_string(&Value::Object(canonical))?;
        let digest = Sha256::digest(json.as_bytes());
        Ok(URL_SAFE_NO_PAD.encode(digest))
    }

    /// Decodes the raw SEC1 uncompressed point `0x04 || x || y`.
    pub fn raw_point(&self) -> Result<Vec<u8>> {
        let x = URL_SAFE_NO_PAD
            .decode(&self.x)
            .map_err(|_| Error::AdvertisementMalformed("invalid x coordinate".into()))?;
        let y = URL_SAFE_NO_PAD
            .decode(&self.y)
            .map_err(|_| Error::AdvertisementMalformed("invalid y coordinate".into()))?;
        let mut point = Vec::with_capacity(1 + x.len() + y.len());
        point.push(0x04);
        point.extend_from_slice(&x);
        point.extend_from_slice(&y);
        Ok(point)
    }

    /// Clears `key_ops` and `alg`, matching spec.md §4.3 step 7 — the JWE
    /// library refuses to use a key still carrying an operation restriction
    /// on the recipient side.
    fn cleared_for_derivation(&self) -> Self {
        Self {
            kty: self.kty.clone(),
            crv: self.crv.clone(),
            x: self.x.clone(),
            y: self.y.clone(),
            key_ops: None,
            alg: None,
            other: self.other.clone(),
        }
    }
}

#[derive(Debug, Deserialize)]
pub(crate) struct JwkSet {
    pub(crate) keys: Vec<Jwk>,
}

/// The `clevis.tang` header member naming the Tang server and carrying the
/// raw advertisement JWS payload, byte-for-byte, for Clevis compatibility.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClevisTang {
    /// The canonical Tang base URL.
    pub url: String,
    /// The raw advertisement JWS payload bytes, base64url-no-pad encoded.
    pub adv: String,
}

/// The `clevis` protected-header member, naming the `tang` pin.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClevisHeader {
    /// Always `"tang"` for this system.
    pub pin: String,
    /// The Tang-specific parameters.
    pub tang: ClevisTang,
}

/// The protected header set carried on every JWE this system produces.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProtectedHeaders {
    /// Always `"ECDH-ES"`.
    pub alg: String,
    /// Always `"A256GCM"`.
    pub enc: String,
    /// The selected derivation key's thumbprint.
    pub kid: String,
    /// The Clevis pin descriptor.
    pub clevis: ClevisHeader,
}

/// An immutable record produced per advertisement acceptance.
#[derive(Debug, Clone)]
pub struct Exchange {
    /// Base64url thumbprint of the selected derivation key.
    pub key_id: String,
    /// The derivation key, with `key_ops`/`alg` cleared.
    pub derivation_key: Jwk,
    /// The JWE protected header set to use when encrypting against this
    /// exchange.
    pub protected_headers: ProtectedHeaders,
}

/// Parses `adv` as a JWS, verifies it against the first matching trust pair,
/// and builds an [`Exchange`] for the selected derivation key.
///
/// `url` is the canonical Advertiser URL and MUST be used verbatim on every
/// call path, including the post-refresh retry inside [`resolve_with_refresh`]
/// (spec.md §9: one source revision used an empty string on the retry path;
/// that bug is not reproduced here).
///
/// Documented choice (spec.md §8 Boundary behaviors, "implementer's choice;
/// MUST be documented"): an advertisement with zero keys is
/// [`Error::AdvertisementMalformed`] (the JWK set itself is empty, not just
/// short of a match), while an advertisement with keys but none matching a
/// configured trust pair's verify thumbprint is [`Error::NoValidationKeysFound`].
pub fn resolve(adv: &[u8], url: &str, pairs: &[TrustPair]) -> Result<Exchange> {
    let (payload, signing_input, signature_b64) = split_jws(adv)?;
    let jwk_set: JwkSet = serde_json::from_slice(&payload)
        .map_err(|e| Error::AdvertisementMalformed(e.to_string()))?;
    if jwk_set.keys.is_empty() {
        return Err(Error::AdvertisementMalformed(
            "advertisement contains no keys".into(),
        ));
    }

    let mut by_thumbprint: HashMap<String, &Jwk> = HashMap::new();
    for key in &jwk_set.keys {
        by_thumbprint.insert(key.thumbprint()?, key);
    }

    let selected = pairs.iter().find_map(|pair| {
        by_thumbprint
            .get(pair.verify.as_str())
            .filter(|k| k.has_op("verify"))
            .map(|verify_key| (pair, *verify_key))
    });

    let Some((pair, verify_key)) = selected else {
        return Err(Error::NoValidationKeysFound);
    };

    verify_es512(&signing_input, &signature_b64, verify_key)?;

    let derive_key = by_thumbprint
        .get(pair.derive.as_str())
        .filter(|k| k.has_op("deriveKey"))
        .ok_or(Error::DerivationKeyMissing)?;

    let derivation_key = derive_key.cleared_for_derivation();
    let protected_headers = ProtectedHeaders {
        alg: "ECDH-ES".to_string(),
        enc: "A256GCM".to_string(),
        kid: pair.derive.clone(),
        clevis: ClevisHeader {
            pin: "tang".to_string(),
            tang: ClevisTang {
                url: url.to_string(),
                adv: URL_SAFE_NO_PAD.encode(&payload),
            },
        },
    };

    Ok(Exchange {
        key_id: pair.derive.clone(),
        derivation_key,
        protected_headers,
    })
}

/// Fetches the advertisement, resolves an [`Exchange`], and on
/// `NoValidationKeysFound` refreshes the thumbprinter exactly once and
/// retries — spec.md §4.3 step 4.
pub async fn resolve_with_refresh(
    advertiser: &dyn Advertiser,
    thumbprinter: &dyn Thumbprinter,
) -> Result<Exchange> {
    let url = advertiser.url().to_string();
    let adv = advertiser.resolve().await?;
    let pairs = thumbprinter.thumbprints().await;

    match resolve(&adv, &url, &pairs) {
        Err(Error::NoValidationKeysFound) => {
            thumbprinter.refresh().await?;
            let pairs = thumbprinter.thumbprints().await;
            resolve(&adv, &url, &pairs)
        }
        other => other,
    }
}

/// Splits a compact JWS into `(payload, signing_input, signature)`, all
/// already base64url-decoded except `signing_input`, which is the raw
/// ASCII `header.payload` bytes the signature was computed over.
fn split_jws(jws: &[u8]) -> Result<(Vec<u8>, Vec<u8>, Vec<u8>)> {
    let text = std::str::from_utf8(jws)
        .map_err(|_| Error::AdvertisementMalformed("advertisement is not valid utf-8".into()))?;
    let mut parts = text.split('.');
    let header_b64 = parts
        .next()
        .filter(|s| !s.is_empty())
        .ok_or_else(|| Error::AdvertisementMalformed("truncated JWS".into()))?;
    let payload_b64 = parts
        .next()
        .filter(|s| !s.is_empty())
        .ok_or_else(|| Error::AdvertisementMalformed("truncated JWS".into()))?;
    let signature_b64 = parts
        .next()
        .filter(|s| !s.is_empty())
        .ok_or_else(|| Error::AdvertisementMalformed("truncated JWS".into()))?;
    if parts.next().is_some() {
        return Err(Error::AdvertisementMalformed(
            "JWS has more than three segments".into(),
        ));
    }

    let payload = URL_SAFE_NO_PAD
        .decode(payload_b64)
        .map_err(|_| Error::AdvertisementMalformed("invalid JWS payload encoding".into()))?;
    let signature = URL_SAFE_NO_PAD
        .decode(signature_b64)
        .map_err(|_| Error::AdvertisementMalformed("invalid JWS signature encoding".into()))?;
    let signing_input = format!("{header_b64}.{payload_b64}").into_bytes();

    Ok((payload, signing_input, signature))
}

/// Verifies an ES512 signature (P-521 ECDSA, JWS raw `R || S` encoding).
fn verify_es512(signing_input: &[u8], signature: &[u8], key: &Jwk) -> Result<()> {
    let point = key.raw_point()?;
    let verifying_key = VerifyingKey::from_sec1_bytes(&point)
        .map_err(|_| Error::AdvertisementMalformed("invalid P-521 verify key".into()))?;
    let sig = Signature::from_slice(signature)
        .map_err(|_| Error::AdvertisementSignatureInvalid)?;
    verifying_key
        .verify(signing_input, &sig)
        .map_err(|_| Error::AdvertisementSignatureInvalid)
}
