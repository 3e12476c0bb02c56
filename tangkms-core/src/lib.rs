//! The cryptographic engine and key-resolution logic behind an
//! envelope-encryption provider that delegates data-encryption-key wrapping
//! to a Tang server via the McCallum–Relyea exchange and JWE.
//!
//! This crate covers components 1 and 2 of the system: the
//! [`Advertiser`]/[`Thumbprinter`]/[`exchange`] resolver pipeline that turns
//! a signed Tang advertisement and a set of trusted thumbprints into an
//! [`Exchange`], and the [`crypto::Cryptor`] that wraps plaintext into a
//! Clevis-format JWE and unwraps it back.

#![deny(missing_docs)]
#![deny(unsafe_code)]
#![deny(clippy::all)]
#![allow(clippy::module_name_repetitions)]

pub mod advertiser;
pub mod config;
pub mod crypto;
pub mod error;
pub mod exchange;
pub mod thumbprint;

pub use advertiser::{Advertiser, NetworkAdvertiser, StaticAdvertiser};
pub use config::Config;
pub use crypto::mr::ClevisDecryptor;
pub use crypto::Cryptor;
pub use error::Error;
pub use exchange::{resolve, resolve_with_refresh, Exchange, Jwk};
pub use thumbprint::{StaticThumbprinter, Thumbprinter, TrustPair};
