//! gRPC plugin serving the Kubernetes KMS v1beta1 and v2 contracts over a
//! UNIX socket, backed by a Tang-derived [`tangkms_core::Cryptor`].

pub mod error;
pub mod health;
pub mod kms;
pub mod metrics;
pub mod plugin;
pub mod supervisor;

pub use error::{Error, Result};
pub use health::{Health, PluginVersion};
pub use kms::{V1Service, V2Service};
pub use metrics::{Counters, Metrics};
pub use plugin::Plugin;
