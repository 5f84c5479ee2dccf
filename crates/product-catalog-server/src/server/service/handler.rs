//! gRPC service implementation for the product catalog.
//!
//! [`ProductService`] implements the generated [`ProductCatalog`] trait. Each
//! handler is a single pass: check the request, make one store call, map the
//! outcome to exactly one response or status. Nothing is retried and nothing
//! is cached; the only state is a shared handle to the store.

use crate::server::{
    store::ProductStore,
    telemetry::{
        increment_products_created, increment_request_errors, increment_requests,
        record_products_listed, record_request_duration,
    },
};
use core::time::Duration;
use futures::TryStreamExt;
use product_catalog_core::{
    Error, Product, Result,
    proto::{
        self, CreateProductRequest, CreateProductResponse, GetProductRequest,
        GetProductResponse, GetProductsRequest, GetProductsResponse,
        product_catalog_server::ProductCatalog,
    },
};
use std::{sync::Arc, time::Instant};
use tonic::{Code, Request, Response, Status};

/// Request handlers for `product.v1.ProductCatalog`.
///
/// Cloning is cheap and every clone talks to the same store. Handlers hold no
/// mutable state, so the transport may run any number of them concurrently.
pub struct ProductService<S> {
    store: Arc<S>,
    store_timeout: Option<Duration>,
}

impl<S> Clone for ProductService<S> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            store_timeout: self.store_timeout,
        }
    }
}

impl<S: ProductStore> ProductService<S> {
    /// Creates a service over `store`. When `store_timeout` is set, every
    /// store call made on behalf of a request must finish within it.
    pub fn new(store: Arc<S>, store_timeout: Option<Duration>) -> Self {
        Self {
            store,
            store_timeout,
        }
    }

    async fn create(&self, req: CreateProductRequest) -> Result<CreateProductResponse> {
        let mut product = req
            .values
            .map(Product::from)
            .ok_or_else(|| Error::InvalidRequest {
                reason: "`values` is required".to_string(),
            })?;

        product.id = self
            .bounded("insert", self.store.insert(product.clone()))
            .await?;
        increment_products_created();
        tracing::debug!(id = %product.id, "Product created");

        Ok(CreateProductResponse {
            values: Some(product.into()),
        })
    }

    async fn get(&self, req: GetProductRequest) -> Result<GetProductResponse> {
        let product = self
            .bounded("find_by_id", self.store.find_by_id(&req.id))
            .await?;

        Ok(GetProductResponse {
            values: Some(product.into()),
        })
    }

    async fn list(&self) -> Result<GetProductsResponse> {
        let values = self.bounded("find_all", self.collect_all()).await?;
        record_products_listed(values.len() as u64);

        Ok(GetProductsResponse { values })
    }

    /// Drains the store cursor. A bad document aborts the whole listing;
    /// partial results are never returned.
    async fn collect_all(&self) -> Result<Vec<proto::Product>> {
        self.store
            .find_all()
            .await?
            .map_ok(proto::Product::from)
            .try_collect()
            .await
    }

    async fn bounded<T>(
        &self,
        operation: &'static str,
        call: impl Future<Output = Result<T>>,
    ) -> Result<T> {
        match self.store_timeout {
            Some(after) => tokio::time::timeout(after, call)
                .await
                .map_err(|_| Error::Timeout { operation, after })?,
            None => call.await,
        }
    }
}

/// Records latency and error metrics for one call and converts its outcome
/// into a gRPC response.
fn respond<T>(
    method: &'static str,
    start: Instant,
    outcome: Result<T>,
) -> core::result::Result<Response<T>, Status> {
    record_request_duration(method, start.elapsed().as_secs_f64() * 1000.0);

    outcome.map(Response::new).map_err(|err| {
        let status = Status::from(err);
        increment_request_errors(method, status.code());
        match status.code() {
            Code::NotFound | Code::InvalidArgument => {
                tracing::debug!(method, code = ?status.code(), "{}", status.message());
            }
            _ => tracing::warn!(method, code = ?status.code(), "{}", status.message()),
        }
        status
    })
}

#[tonic::async_trait]
impl<S: ProductStore> ProductCatalog for ProductService<S> {
    #[tracing::instrument(skip_all, fields(name = req.get_ref().values.as_ref().map(|p| p.name.as_str())))]
    async fn create_product(
        &self,
        req: Request<CreateProductRequest>,
    ) -> core::result::Result<Response<CreateProductResponse>, Status> {
        const METHOD: &str = "CreateProduct";
        increment_requests(METHOD);
        let start = Instant::now();
        respond(METHOD, start, self.create(req.into_inner()).await)
    }

    #[tracing::instrument(skip_all, fields(id = %req.get_ref().id))]
    async fn get_product(
        &self,
        req: Request<GetProductRequest>,
    ) -> core::result::Result<Response<GetProductResponse>, Status> {
        const METHOD: &str = "GetProduct";
        increment_requests(METHOD);
        let start = Instant::now();
        respond(METHOD, start, self.get(req.into_inner()).await)
    }

    #[tracing::instrument(skip_all)]
    async fn get_products(
        &self,
        _req: Request<GetProductsRequest>,
    ) -> core::result::Result<Response<GetProductsResponse>, Status> {
        const METHOD: &str = "GetProducts";
        increment_requests(METHOD);
        let start = Instant::now();
        respond(METHOD, start, self.list().await)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::server::store::memory::MemoryStore;
    use std::collections::HashSet;

    fn service(store: MemoryStore) -> ProductService<MemoryStore> {
        ProductService::new(Arc::new(store), Some(Duration::from_secs(1)))
    }

    fn widget() -> proto::Product {
        proto::Product {
            id: String::new(),
            name: "Widget".into(),
            price: 9.99,
            tags: "tool".into(),
            barcode: "000111".into(),
        }
    }

    async fn create(
        service: &ProductService<MemoryStore>,
        values: proto::Product,
    ) -> core::result::Result<proto::Product, Status> {
        let resp = service
            .create_product(Request::new(CreateProductRequest {
                values: Some(values),
            }))
            .await?;
        Ok(resp.into_inner().values.unwrap())
    }

    async fn get(
        service: &ProductService<MemoryStore>,
        id: &str,
    ) -> core::result::Result<proto::Product, Status> {
        let resp = service
            .get_product(Request::new(GetProductRequest { id: id.into() }))
            .await?;
        Ok(resp.into_inner().values.unwrap())
    }

    async fn list(
        service: &ProductService<MemoryStore>,
    ) -> core::result::Result<Vec<proto::Product>, Status> {
        let resp = service
            .get_products(Request::new(GetProductsRequest {}))
            .await?;
        Ok(resp.into_inner().values)
    }

    #[tokio::test]
    async fn create_then_get_returns_same_record() {
        let service = service(MemoryStore::new());

        let created = create(&service, widget()).await.unwrap();
        assert!(!created.id.is_empty());
        assert_eq!(
            proto::Product {
                id: String::new(),
                ..created.clone()
            },
            widget()
        );

        let fetched = get(&service, &created.id).await.unwrap();
        assert_eq!(fetched, created);

        assert_eq!(list(&service).await.unwrap(), vec![created]);
    }

    #[tokio::test]
    async fn create_keeps_client_supplied_id() {
        let service = service(MemoryStore::new());
        let created = create(
            &service,
            proto::Product {
                id: "sku-42".into(),
                ..widget()
            },
        )
        .await
        .unwrap();
        assert_eq!(created.id, "sku-42");
        assert_eq!(get(&service, "sku-42").await.unwrap(), created);
    }

    #[tokio::test]
    async fn create_without_values_is_invalid_argument() {
        let service = service(MemoryStore::new());
        let status = service
            .create_product(Request::new(CreateProductRequest { values: None }))
            .await
            .unwrap_err();
        assert_eq!(status.code(), Code::InvalidArgument);
        assert!(list(&service).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn write_failure_is_internal_with_cause() {
        let store = MemoryStore::new();
        store.reject_writes(true);
        let service = service(store);

        let status = create(&service, widget()).await.unwrap_err();
        assert_eq!(status.code(), Code::Internal);
        assert!(status.message().contains("connection refused"));
    }

    #[tokio::test]
    async fn duplicate_id_is_internal() {
        let service = service(MemoryStore::new());
        let dup = proto::Product {
            id: "same".into(),
            ..widget()
        };
        create(&service, dup.clone()).await.unwrap();

        let status = create(&service, dup).await.unwrap_err();
        assert_eq!(status.code(), Code::Internal);
        assert!(status.message().contains("duplicate key"));
        assert_eq!(list(&service).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn missing_id_is_not_found() {
        let service = service(MemoryStore::new());
        create(&service, widget()).await.unwrap();

        for id in ["does-not-exist", ""] {
            let status = get(&service, id).await.unwrap_err();
            assert_eq!(status.code(), Code::NotFound, "id {id:?}");
        }
    }

    #[tokio::test]
    async fn empty_store_lists_nothing() {
        let service = service(MemoryStore::new());
        assert!(list(&service).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn lists_every_created_product() {
        let service = service(MemoryStore::new());
        let mut created = HashSet::new();
        for i in 0..10 {
            let product = create(
                &service,
                proto::Product {
                    name: format!("item-{i}"),
                    price: i as f32,
                    ..widget()
                },
            )
            .await
            .unwrap();
            created.insert(product.id);
        }

        let listed = list(&service).await.unwrap();
        assert_eq!(listed.len(), 10);
        let ids: HashSet<_> = listed.into_iter().map(|p| p.id).collect();
        assert_eq!(ids, created);
    }

    #[tokio::test]
    async fn corrupt_document_aborts_listing_only() {
        let service = service(MemoryStore::new().with_corrupt_document_at(1));
        for _ in 0..3 {
            create(&service, widget()).await.unwrap();
        }

        let status = list(&service).await.unwrap_err();
        assert_eq!(status.code(), Code::Internal);
        assert!(status.message().contains("document 1"));

        // The service is still usable after the failed listing.
        let created = create(&service, widget()).await.unwrap();
        assert_eq!(get(&service, &created.id).await.unwrap(), created);
    }

    #[tokio::test]
    async fn slow_store_hits_deadline() {
        let store = MemoryStore::new().with_latency(Duration::from_millis(200));
        let service = ProductService::new(Arc::new(store), Some(Duration::from_millis(20)));

        let status = get(&service, "anything").await.unwrap_err();
        assert_eq!(status.code(), Code::DeadlineExceeded);
        assert!(status.message().contains("find_by_id"));
    }

    #[tokio::test]
    async fn no_deadline_waits_for_store() {
        let store = MemoryStore::new().with_latency(Duration::from_millis(30));
        let service = ProductService::new(Arc::new(store), None);

        let created = create(&service, widget()).await.unwrap();
        assert_eq!(get(&service, &created.id).await.unwrap(), created);
    }
}
