//! Process-wide configuration, assembled once at startup from the
//! environment (prefix `tang_kms_`). Immutable after construction.

use serde::Deserialize;

use crate::error::{Error, Result};

/// Which KMS protocol version the plugin serves.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum KmsVersion {
    /// `v1beta1`: a single cached `Exchange`, no per-call refresh.
    V1,
    /// `v2`: resolves a fresh `Exchange` on every call.
    V2,
}

fn default_unix_socket() -> String {
    "/var/run/kmsplugin/socket.sock".to_string()
}

fn default_metrics_port() -> u16 {
    8082
}

fn default_metrics_path() -> String {
    "/metrics".to_string()
}

fn default_healthz_port() -> u16 {
    8081
}

fn default_healthz_path() -> String {
    "/healthz".to_string()
}

fn default_healthz_timeout_ms() -> u64 {
    5000
}

fn default_version() -> KmsVersion {
    KmsVersion::V2
}

fn default_log_level() -> String {
    "info".to_string()
}

/// The full environment-derived configuration surface (spec.md §6).
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Base URL of the Tang server.
    pub tang_url: String,
    /// Comma-separated `verify/derive` trust pairs.
    pub thumbprints: String,
    /// Filesystem path for the plugin's UNIX-domain RPC socket.
    #[serde(default = "default_unix_socket")]
    pub unix_socket: String,
    /// Port the metrics HTTP server listens on.
    #[serde(default = "default_metrics_port")]
    pub metrics_port: u16,
    /// Path the metrics HTTP server serves.
    #[serde(default = "default_metrics_path")]
    pub metrics_path: String,
    /// Port the health HTTP server listens on.
    #[serde(default = "default_healthz_port")]
    pub healthz_port: u16,
    /// Path the health HTTP server serves.
    #[serde(default = "default_healthz_path")]
    pub healthz_path: String,
    /// Deadline, in milliseconds, for the health handler's RPC round trip.
    #[serde(default = "default_healthz_timeout_ms")]
    pub healthz_grpc_call_timeout: u64,
    /// Which KMS protocol version to serve.
    #[serde(default = "default_version")]
    pub version: KmsVersion,
    /// `tracing-subscriber` `EnvFilter` directive.
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

impl Config {
    /// Loads configuration from environment variables prefixed `tang_kms_`.
    ///
    /// # Errors
    /// Returns [`Error::ConfigurationError`] if a required variable is
    /// missing or a present variable fails to parse.
    pub fn from_env() -> Result<Self> {
        envy::prefixed("tang_kms_")
            .from_env::<Self>()
            .map_err(|e| Error::ConfigurationError(e.to_string()))
    }
}
