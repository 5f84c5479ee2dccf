use super::{ProductStore, ProductStream};
use crate::server::config::StoreConfig;
use futures::{StreamExt, TryStreamExt};
use mongodb::{
    Client, Collection,
    bson::{Document, doc, oid::ObjectId},
    error::ErrorKind,
    options::ClientOptions,
};
use product_catalog_core::{Error, Product, Result};
use std::time::Duration;

const APP_NAME: &str = "product-catalog-server";

/// [`ProductStore`] backed by a MongoDB collection.
///
/// The driver pools connections internally and is safe to share across tasks,
/// so no extra synchronization is needed around it. Not `Clone`: the single
/// instance is what [`ProductStore::disconnect`] consumes.
pub struct MongoStore {
    client: Client,
    products: Collection<Product>,
}

impl MongoStore {
    /// Builds a client from `config` and pings the server so an unreachable
    /// store fails here instead of on the first request.
    ///
    /// `selection_timeout` bounds how long the driver looks for a usable
    /// server, both for the ping and for later calls.
    pub async fn connect(config: &StoreConfig, selection_timeout: Option<Duration>) -> Result<Self> {
        tracing::debug!(uri = %config.uri, "Parsing store connection string");
        let mut options = ClientOptions::parse(config.uri.expose())
            .await
            .map_err(classify)?;
        options.app_name = Some(APP_NAME.to_string());
        if selection_timeout.is_some() {
            options.server_selection_timeout = selection_timeout;
        }

        let client = Client::with_options(options).map_err(classify)?;
        let database = client.database(&config.database);
        database
            .run_command(doc! { "ping": 1 })
            .await
            .map_err(classify)?;

        tracing::info!(
            uri = %config.uri,
            database = %config.database,
            collection = %config.collection,
            "Connected to MongoDB"
        );

        Ok(Self {
            products: database.collection(&config.collection),
            client,
        })
    }
}

#[tonic::async_trait]
impl ProductStore for MongoStore {
    async fn insert(&self, product: Product) -> Result<String> {
        let product = with_assigned_id(product);
        self.products.insert_one(&product).await.map_err(classify)?;
        Ok(product.id)
    }

    async fn find_by_id(&self, id: &str) -> Result<Product> {
        self.products
            .find_one(by_id(id))
            .await
            .map_err(classify)?
            .ok_or_else(|| Error::NotFound { id: id.to_string() })
    }

    async fn find_all(&self) -> Result<ProductStream> {
        let cursor = self.products.find(doc! {}).await.map_err(classify)?;
        Ok(cursor.map_err(classify).boxed())
    }

    async fn disconnect(self) -> Result<()> {
        // Drop the collection first so the client is the last handle alive.
        let Self { client, products } = self;
        drop(products);
        client.shutdown().await;
        tracing::info!("MongoDB connection closed");
        Ok(())
    }
}

/// Gives an unassigned product a fresh `ObjectId`, stored as its hex string
/// so the `_id` stays a string like every client-supplied id.
fn with_assigned_id(mut product: Product) -> Product {
    if product.is_unassigned() {
        product.id = ObjectId::new().to_hex();
    }
    product
}

fn by_id(id: &str) -> Document {
    doc! { "_id": id }
}

/// Maps a driver error onto the catalog error taxonomy.
///
/// Write errors (duplicate `_id` is the common one) mean the server answered
/// and refused; everything that is not a write or decode problem is treated as
/// the store being unreachable.
fn classify(err: mongodb::error::Error) -> Error {
    let context = err.to_string();
    match err.kind.as_ref() {
        ErrorKind::Write(_) => Error::WriteRejected { context },
        ErrorKind::BsonDeserialization(_) => Error::Decode { context },
        _ => Error::StoreUnavailable { context },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::server::config::StoreUri;
    use mongodb::bson::{Bson, from_document, to_document};

    fn widget() -> Product {
        Product {
            id: "sku-1".into(),
            name: "Widget".into(),
            price: 9.99,
            tags: "tool".into(),
            barcode: "000111".into(),
        }
    }

    #[test]
    fn document_round_trip_keeps_every_field() {
        let document = to_document(&widget()).unwrap();
        assert_eq!(document.get_str("_id").unwrap(), "sku-1");
        assert!(!document.contains_key("id"));

        let decoded: Product = from_document(document).unwrap();
        assert_eq!(decoded, widget());
        assert_eq!(decoded.price, 9.99);
    }

    #[test]
    fn unassigned_product_gets_object_id_hex() {
        let product = with_assigned_id(Product {
            id: String::new(),
            ..widget()
        });
        assert_eq!(product.id.len(), 24);
        assert!(ObjectId::parse_str(&product.id).is_ok());
        assert_eq!(product.name, "Widget");

        let other = with_assigned_id(Product {
            id: String::new(),
            ..widget()
        });
        assert_ne!(product.id, other.id);
    }

    #[test]
    fn client_supplied_id_is_kept() {
        assert_eq!(with_assigned_id(widget()).id, "sku-1");
    }

    #[test]
    fn lookup_filter_matches_stored_id_shape() {
        let product = with_assigned_id(Product {
            id: String::new(),
            ..widget()
        });
        let stored = to_document(&product).unwrap();
        let filter = by_id(&product.id);
        assert_eq!(filter.get("_id"), stored.get("_id"));
        assert!(matches!(filter.get("_id"), Some(Bson::String(_))));
    }

    #[test]
    fn bad_document_is_decode_error() {
        let err = from_document::<Product>(doc! { "_id": ObjectId::new(), "price": "x" })
            .unwrap_err();
        assert!(matches!(classify(err.into()), Error::Decode { .. }));
    }

    #[tokio::test]
    async fn malformed_uri_is_store_unavailable() {
        let err = ClientOptions::parse("mongodb://db-0:notaport").await.unwrap_err();
        assert!(matches!(classify(err), Error::StoreUnavailable { .. }));
    }

    /// Runs against a live server: `STORE_URI=mongodb://localhost:27017 cargo test -- --ignored`.
    #[tokio::test]
    #[ignore = "needs a running MongoDB at STORE_URI"]
    async fn live_store_insert_find_and_list() {
        let Ok(raw) = std::env::var("STORE_URI") else {
            return;
        };
        let config = StoreConfig {
            uri: StoreUri::parse(raw).unwrap(),
            database: "catalog_test".into(),
            collection: format!("product_{}", ObjectId::new().to_hex()),
        };
        let store = MongoStore::connect(&config, Some(Duration::from_secs(5)))
            .await
            .unwrap();

        let id = store
            .insert(Product {
                id: String::new(),
                ..widget()
            })
            .await
            .unwrap();
        let found = store.find_by_id(&id).await.unwrap();
        assert_eq!(found, Product { id: id.clone(), ..widget() });

        let err = store.insert(found.clone()).await.unwrap_err();
        assert!(matches!(err, Error::WriteRejected { .. }));
        assert!(matches!(
            store.find_by_id("missing").await,
            Err(Error::NotFound { .. })
        ));

        let listed: Vec<Product> = store.find_all().await.unwrap().try_collect().await.unwrap();
        assert_eq!(listed, vec![found]);

        store.products.drop().await.unwrap();
        store.disconnect().await.unwrap();
    }
}
