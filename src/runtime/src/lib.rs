//! A3S Catalog Runtime - catalog cache engine.
//!
//! Fetches declarative catalogs from OCI registries and web servers into a
//! content-addressed on-disk cache, and reconciles declared catalog records
//! against it.

#![allow(clippy::result_large_err)]

pub mod cache;
pub mod declcfg;
pub mod io;
pub mod oci;
pub mod source;
pub mod store;
pub mod sync;
pub mod web;

// Re-export common types
pub use cache::{ContentCache, ContentTree, FlatStore, Staging};
pub use oci::{ImageReference, OciFetcher, PolicyFile, RegistryAuth, StaticPolicy, TrustPolicy};
pub use source::{FetchOptions, FetchResult, Fetcher, SourceRouter, UnpackState};
pub use store::{GroupVersionKind, Record, RecordStore, Scheme};
pub use sync::{CatalogStore, CatalogSync, FetchReason, SyncDecision, SyncOutcome};
pub use web::WebFetcher;

/// A3S Catalog Runtime version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
