//! Server internals.
//!
//! - [`config`] - CLI/env configuration and validation.
//! - [`lifecycle`] - Startup ordering, serve loop and graceful teardown.
//! - [`service`] - `ProductCatalog` request handlers.
//! - [`store`] - Store adapter trait and the MongoDB implementation.
//! - [`telemetry`] - Logging, optional OpenTelemetry export and metrics.

pub mod config;
pub mod lifecycle;
pub mod service;
pub mod store;
pub mod telemetry;
