//! Error types for the product catalog service.
//!
//! [`Error`] captures every failure a store adapter or request handler can
//! report. It implements `From<Error>` for `tonic::Status` so handlers can
//! return it with `?` and clients see exactly one gRPC status per failure.
//!
//! ## Error Cases
//! - `NotFound`: a lookup by id matched no document.
//! - `StoreUnavailable`: the store could not be reached or the query could not
//!   start.
//! - `WriteRejected`: the store refused a write (e.g. duplicate key).
//! - `Decode`: a stored document could not be decoded into a product.
//! - `InvalidRequest`: a required request field was missing.
//! - `Timeout`: a store call did not finish within the configured deadline.

use core::time::Duration;
use tonic::Status;

pub type Result<T> = core::result::Result<T, Error>;

/// Unified error type for store and handler failures.
#[derive(Clone, thiserror::Error, Debug, PartialEq, Eq)]
pub enum Error {
    /// No document matches the requested id.
    #[error("Product not found: {id}")]
    NotFound { id: String },

    /// Connection, server selection or query start failure.
    #[error("Store unavailable: {context}")]
    StoreUnavailable { context: String },

    /// The store rejected the write.
    #[error("Write rejected: {context}")]
    WriteRejected { context: String },

    /// A stored document is malformed.
    #[error("Decode error: {context}")]
    Decode { context: String },

    /// The client request was missing a required field.
    #[error("Invalid request: {reason}")]
    InvalidRequest { reason: String },

    /// A store call exceeded its deadline.
    #[error("Store call `{operation}` timed out after {after:?}")]
    Timeout {
        operation: &'static str,
        after: Duration,
    },
}

impl From<Error> for Status {
    fn from(err: Error) -> Self {
        match err {
            Error::NotFound { .. } => Status::not_found(format!("Cannot find product: {err}")),
            Error::InvalidRequest { reason } => Status::invalid_argument(reason),
            Error::Timeout { .. } => Status::deadline_exceeded(err.to_string()),
            Error::StoreUnavailable { .. } | Error::WriteRejected { .. } | Error::Decode { .. } => {
                Status::internal(format!("Internal error: {err}"))
            }
        }
    }
}
