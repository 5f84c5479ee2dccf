//! Store adapter boundary.
//!
//! Request handlers only ever see a [`ProductStore`]. The production
//! implementation is [`mongo::MongoStore`]; tests swap in an in-memory double.
//!
//! The handle is created once at startup, shared behind an `Arc` while the
//! server runs, and handed back to the lifecycle by value for
//! [`ProductStore::disconnect`], so nothing can reach a closed connection.

pub mod mongo;

#[cfg(test)]
pub mod memory;

use futures::stream::BoxStream;
use product_catalog_core::{Product, Result};

/// Lazy, forward-only sequence of stored products. Each element may fail on
/// its own.
pub type ProductStream = BoxStream<'static, Result<Product>>;

#[tonic::async_trait]
pub trait ProductStore: Send + Sync + 'static {
    /// Writes one product and returns the id it is stored under.
    ///
    /// Products with an empty id are given a fresh one.
    async fn insert(&self, product: Product) -> Result<String>;

    /// Fetches the product stored under `id`.
    async fn find_by_id(&self, id: &str) -> Result<Product>;

    /// Starts an unfiltered read over the whole collection.
    async fn find_all(&self) -> Result<ProductStream>;

    /// Closes the connection. Consumes the store.
    async fn disconnect(self) -> Result<()>;
}
