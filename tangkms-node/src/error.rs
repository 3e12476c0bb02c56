//! Error types surfaced by the plugin, health, and metrics managers.

use thiserror::Error;

/// Errors raised while serving the KMS plugin surface.
#[derive(Debug, Error)]
pub enum Error {
    /// The resolver or cryptographic engine failed.
    #[error(transparent)]
    Core(#[from] tangkms_core::Error),

    /// Failed to bind or serve the UNIX-domain RPC socket.
    #[error("plugin transport error: {0}")]
    Transport(String),

    /// Failed to remove a stale socket file before binding.
    #[error("could not remove stale socket at {path}: {source}")]
    StaleSocket {
        /// The socket path that could not be cleared.
        path: String,
        /// Underlying I/O failure.
        #[source]
        source: std::io::Error,
    },

    /// The v2 ciphertext did not carry the expected single-byte placeholder.
    #[error("ciphertext is not the expected placeholder")]
    CiphertextPlaceholderInvalid,

    /// The v2 annotation carrying the real JWE was absent.
    #[error("required annotation missing from request")]
    CiphertextAnnotationMissing,

    /// The health handler's dial or RPC round trip failed.
    #[error("health check failed: {0}")]
    HealthCheck(String),
}

/// A specialized [`Result`](std::result::Result) for this crate's operations.
pub type Result<T> = std::result::Result<T, Error>;

impl From<Error> for tonic::Status {
    fn from(err: Error) -> Self {
        match err {
            Error::CiphertextPlaceholderInvalid | Error::CiphertextAnnotationMissing => {
                tonic::Status::invalid_argument(err.to_string())
            }
            other => tonic::Status::internal(other.to_string()),
        }
    }
}
