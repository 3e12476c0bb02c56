//! Error types for the tangkms core library.

use thiserror::Error;

/// Error type for the tangkms core library.
#[derive(Debug, Error)]
pub enum Error {
    /// Malformed thumbprints, unparseable URL, or a missing required setting.
    #[error("configuration error: {0}")]
    ConfigurationError(String),

    /// Transport or non-2xx HTTP status fetching an advertisement.
    #[error("advertisement fetch failed: {0}")]
    AdvertisementFetch(String),

    /// JWS/JWK parse failure, or an advertisement missing required keys.
    #[error("advertisement malformed: {0}")]
    AdvertisementMalformed(String),

    /// No trusted pair's verify thumbprint appears in the advertisement.
    #[error("no validation keys found for the configured trust pairs")]
    NoValidationKeysFound,

    /// A verify key was selected but the JWS signature did not check out.
    #[error("advertisement signature invalid")]
    AdvertisementSignatureInvalid,

    /// A verify key matched but its paired derive thumbprint is absent.
    #[error("derivation key missing for selected trust pair")]
    DerivationKeyMissing,

    /// Library-level wrap failure.
    #[error("encrypt failed: {0}")]
    EncryptFailed(String),

    /// Library-level unwrap failure.
    #[error("decrypt failed: {0}")]
    DecryptFailed(String),

    /// Base64 decode error.
    #[error("base64 decode error: {0}")]
    Base64(#[from] base64::DecodeError),

    /// IO error.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::AdvertisementMalformed(err.to_string())
    }
}

/// Result type for the tangkms core library.
pub type Result<T> = std::result::Result<T, Error>;
