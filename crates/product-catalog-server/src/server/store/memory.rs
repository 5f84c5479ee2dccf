//! In-memory [`ProductStore`] used by handler and lifecycle tests.

use super::{ProductStore, ProductStream};
use core::time::Duration;
use futures::StreamExt;
use parking_lot::RwLock;
use product_catalog_core::{Error, Product, Result};
use std::sync::{
    Arc,
    atomic::{AtomicBool, AtomicUsize, Ordering},
};

/// Observes a [`MemoryStore`] after it has been moved into the server.
#[derive(Clone, Default)]
pub struct Probe {
    disconnects: Arc<AtomicUsize>,
}

impl Probe {
    pub fn disconnects(&self) -> usize {
        self.disconnects.load(Ordering::SeqCst)
    }
}

#[derive(Default)]
pub struct MemoryStore {
    products: RwLock<Vec<Product>>,
    next_id: AtomicUsize,
    reject_writes: AtomicBool,
    corrupt_at: Option<usize>,
    latency: Option<Duration>,
    probe: Probe,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes the `index`-th element of every listing fail to decode.
    pub fn with_corrupt_document_at(mut self, index: usize) -> Self {
        self.corrupt_at = Some(index);
        self
    }

    /// Delays every call by `latency`.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    pub fn reject_writes(&self, reject: bool) {
        self.reject_writes.store(reject, Ordering::SeqCst);
    }

    pub fn probe(&self) -> Probe {
        self.probe.clone()
    }

    async fn stall(&self) {
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }
    }
}

#[tonic::async_trait]
impl ProductStore for MemoryStore {
    async fn insert(&self, mut product: Product) -> Result<String> {
        self.stall().await;
        if self.reject_writes.load(Ordering::SeqCst) {
            return Err(Error::StoreUnavailable {
                context: "connection refused".into(),
            });
        }
        if product.is_unassigned() {
            product.id = format!("mem-{:08}", self.next_id.fetch_add(1, Ordering::Relaxed));
        }

        let mut products = self.products.write();
        if products.iter().any(|stored| stored.id == product.id) {
            return Err(Error::WriteRejected {
                context: format!("duplicate key: {}", product.id),
            });
        }
        let id = product.id.clone();
        products.push(product);
        Ok(id)
    }

    async fn find_by_id(&self, id: &str) -> Result<Product> {
        self.stall().await;
        self.products
            .read()
            .iter()
            .find(|stored| stored.id == id)
            .cloned()
            .ok_or_else(|| Error::NotFound { id: id.to_string() })
    }

    async fn find_all(&self) -> Result<ProductStream> {
        self.stall().await;
        let corrupt_at = self.corrupt_at;
        let snapshot = self.products.read().clone();
        let items = snapshot
            .into_iter()
            .enumerate()
            .map(move |(index, product)| match corrupt_at {
                Some(bad) if bad == index => Err(Error::Decode {
                    context: format!("document {index}: invalid type for `price`"),
                }),
                _ => Ok(product),
            });
        Ok(futures::stream::iter(items).boxed())
    }

    async fn disconnect(self) -> Result<()> {
        self.probe.disconnects.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}
