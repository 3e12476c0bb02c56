//! Generated gRPC service definitions and their implementations.

/// Generated v1beta1 protobuf types and the `KeyManagementService` server trait.
pub mod proto_v1 {
    tonic::include_proto!("v1beta1");
}

/// Generated v2 protobuf types and the `KeyManagementService` server trait.
pub mod proto_v2 {
    tonic::include_proto!("v2");
}

mod v1;
mod v2;

pub use v1::V1Service;
pub use v2::{V2Service, ANNOTATION_KEY};
