//! Process lifecycle: `Init → Listening → Serving → Draining → Stopped`.
//!
//! The ordering is encoded in the types. [`Listening::bind`] is the only way
//! in, [`Listening::connect`] is the only way to obtain a [`Serving`], and
//! [`Serving::run`] consumes everything and tears it down in reverse:
//!
//! 1. wait for the shutdown future,
//! 2. mark the health service `NOT_SERVING` and stop accepting,
//! 3. wait for in-flight requests (optionally bounded),
//! 4. reclaim sole ownership of the store and disconnect it,
//! 5. close the listener.

use crate::server::{
    config::ServerConfig,
    service::ProductService,
    store::ProductStore,
};
use core::{fmt, time::Duration};
use product_catalog_core::proto::{
    FILE_DESCRIPTOR_SET, product_catalog_server::ProductCatalogServer,
};
use std::{io, net::SocketAddr, sync::Arc};
use tokio::{
    net::TcpListener,
    sync::oneshot,
    time::{Instant, sleep},
};
use tokio_stream::wrappers::TcpListenerStream;
use tonic::{codec::CompressionEncoding, transport::Server};
use tonic_web::GrpcWebLayer;
use tower::ServiceBuilder;
use tower_http::cors::{Any, CorsLayer};

/// How long to wait for request tasks to release the store after the server
/// has stopped.
const RECLAIM_GRACE: Duration = Duration::from_millis(500);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Init,
    Listening,
    Serving,
    Draining,
    Stopped,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Phase::Init => "init",
            Phase::Listening => "listening",
            Phase::Serving => "serving",
            Phase::Draining => "draining",
            Phase::Stopped => "stopped",
        })
    }
}

#[derive(Debug, thiserror::Error)]
pub enum LifecycleError {
    #[error("failed to bind {addr}: {source}")]
    Bind { addr: String, source: io::Error },

    #[error("failed to connect to store: {0}")]
    StoreConnect(#[source] product_catalog_core::Error),

    #[error("failed to build reflection service: {0}")]
    Reflection(#[from] tonic_reflection::server::Error),

    #[error("server failed: {0}")]
    Serve(#[from] tonic::transport::Error),

    #[error("store is still referenced by {holders} request task(s) after drain")]
    StoreStillShared { holders: usize },

    #[error("failed to disconnect store: {0}")]
    Disconnect(#[source] product_catalog_core::Error),
}

/// Per-run settings taken from [`ServerConfig`].
#[derive(Debug, Clone, Copy, Default)]
pub struct ServeOptions {
    pub store_timeout: Option<Duration>,
    pub shutdown_timeout: Option<Duration>,
}

impl From<&ServerConfig> for ServeOptions {
    fn from(config: &ServerConfig) -> Self {
        Self {
            store_timeout: config.store_timeout,
            shutdown_timeout: config.shutdown_timeout,
        }
    }
}

/// A bound listener with no store yet.
pub struct Listening {
    listener: TcpListener,
    local_addr: SocketAddr,
}

impl Listening {
    pub async fn bind(addr: &str) -> Result<Self, LifecycleError> {
        tracing::debug!(phase = %Phase::Init, addr, "Binding listener");
        let bind_err = |source| LifecycleError::Bind {
            addr: addr.to_string(),
            source,
        };
        let listener = TcpListener::bind(addr).await.map_err(bind_err)?;
        let local_addr = listener.local_addr().map_err(bind_err)?;
        tracing::info!(phase = %Phase::Listening, %local_addr, "Listener bound");

        Ok(Self {
            listener,
            local_addr,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Opens the store. On failure the listener is closed and the error is
    /// returned; the process has nothing useful to do without storage.
    pub async fn connect<S, F, Fut>(self, connect: F) -> Result<Serving<S>, LifecycleError>
    where
        S: ProductStore,
        F: FnOnce() -> Fut,
        Fut: Future<Output = product_catalog_core::Result<S>>,
    {
        let store = connect().await.map_err(LifecycleError::StoreConnect)?;

        Ok(Serving {
            listener: self.listener,
            local_addr: self.local_addr,
            store,
        })
    }
}

/// A bound listener with a connected store, ready to serve.
pub struct Serving<S> {
    listener: TcpListener,
    local_addr: SocketAddr,
    store: S,
}

impl<S: ProductStore> Serving<S> {
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Serves until `shutdown` resolves, then drains and tears down.
    ///
    /// Handlers are registered once and the accept loop is entered once.
    /// Returns `Ok(())` only if the store was disconnected cleanly.
    pub async fn run<F>(self, options: ServeOptions, shutdown: F) -> Result<(), LifecycleError>
    where
        F: Future<Output = ()>,
    {
        let Self {
            listener,
            local_addr,
            store,
        } = self;

        let store = Arc::new(store);
        let service = ProductService::new(Arc::clone(&store), options.store_timeout);

        let (health_reporter, health_service) = tonic_health::server::health_reporter();
        health_reporter
            .set_serving::<ProductCatalogServer<ProductService<S>>>()
            .await;

        let reflection = tonic_reflection::server::Builder::configure()
            .register_encoded_file_descriptor_set(FILE_DESCRIPTOR_SET)
            .build_v1()?;

        let (draining_tx, draining_rx) = oneshot::channel();
        let signal = async move {
            shutdown.await;
            tracing::info!(phase = %Phase::Draining, "Refusing new connections");
            health_reporter
                .set_not_serving::<ProductCatalogServer<ProductService<S>>>()
                .await;
            let _ = draining_tx.send(());
        };

        // The server only borrows the incoming stream, so the socket stays open
        // until the store is gone.
        let mut incoming = TcpListenerStream::new(listener);
        tracing::info!(phase = %Phase::Serving, %local_addr, "Accepting requests");
        let server = Server::builder()
            .accept_http1(true)
            .http2_adaptive_window(Some(true))
            .layer(
                ServiceBuilder::new()
                    .layer(
                        CorsLayer::new()
                            .allow_origin(Any)
                            .allow_methods(Any)
                            .allow_headers(Any),
                    )
                    .layer(GrpcWebLayer::new()),
            )
            .add_service(health_service)
            .add_service(reflection)
            .add_service(build_product_service(service))
            .serve_with_incoming_shutdown(&mut incoming, signal);
        drain(server, draining_rx, options.shutdown_timeout).await?;

        let store = reclaim(store, RECLAIM_GRACE).await?;
        store.disconnect().await.map_err(LifecycleError::Disconnect)?;

        drop(incoming);
        tracing::info!(phase = %Phase::Stopped, %local_addr, "Listener closed");
        Ok(())
    }
}

fn build_product_service<S: ProductStore>(
    service: ProductService<S>,
) -> ProductCatalogServer<ProductService<S>> {
    ProductCatalogServer::new(service)
        .send_compressed(CompressionEncoding::Zstd)
        .send_compressed(CompressionEncoding::Gzip)
        .send_compressed(CompressionEncoding::Deflate)
        .accept_compressed(CompressionEncoding::Zstd)
        .accept_compressed(CompressionEncoding::Gzip)
        .accept_compressed(CompressionEncoding::Deflate)
}

/// Drives the server to completion. Once `draining` fires, the remaining
/// in-flight work gets at most `patience` before it is abandoned.
async fn drain<F>(
    server: F,
    draining: oneshot::Receiver<()>,
    patience: Option<Duration>,
) -> Result<(), LifecycleError>
where
    F: Future<Output = Result<(), tonic::transport::Error>>,
{
    tokio::pin!(server);

    let deadline = async {
        if draining.await.is_err() {
            return std::future::pending().await;
        }
        match patience {
            Some(patience) => sleep(patience).await,
            None => std::future::pending().await,
        }
    };

    tokio::select! {
        served = &mut server => {
            served?;
            tracing::info!("In-flight requests drained");
        }
        () = deadline => {
            tracing::warn!(?patience, "Drain timed out, abandoning in-flight requests");
        }
    }

    Ok(())
}

/// Takes the store back from the shared handle. Request tasks may take a
/// moment to drop their clones after the server future resolves.
async fn reclaim<S>(mut store: Arc<S>, grace: Duration) -> Result<S, LifecycleError> {
    let deadline = Instant::now() + grace;
    loop {
        match Arc::try_unwrap(store) {
            Ok(store) => return Ok(store),
            Err(shared) if Instant::now() < deadline => {
                store = shared;
                sleep(Duration::from_millis(10)).await;
            }
            Err(shared) => {
                return Err(LifecycleError::StoreStillShared {
                    holders: Arc::strong_count(&shared) - 1,
                });
            }
        }
    }
}
