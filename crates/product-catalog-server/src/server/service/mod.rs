//! gRPC service layer.
//!
//! - [`handler`] - `ProductCatalog` implementation (`ProductService`).

pub mod handler;

pub use handler::ProductService;
