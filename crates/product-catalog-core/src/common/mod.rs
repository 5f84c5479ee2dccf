//! Shared definitions used by both the server and any Rust client.
//!
//! - [`proto`] - Generated Protobuf messages and gRPC service bindings.
//! - [`types`] - The [`Product`](types::Product) entity and its wire mapping.
//! - [`error`] - Central error type and its `tonic::Status` translation.

pub mod error;
pub mod types;

pub use error::{Error, Result};
pub use types::Product;

/// gRPC service and message definitions generated from `proto/product.proto`.
pub mod proto {
    tonic::include_proto!("product.v1");

    /// Encoded descriptor set for server reflection.
    pub const FILE_DESCRIPTOR_SET: &[u8] = tonic::include_file_descriptor_set!("product_descriptor");
}
