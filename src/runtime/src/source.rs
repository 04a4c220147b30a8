//! Fetch results and routing of catalog sources to their fetcher.
//!
//! Each [`SourceType`] has exactly one [`Fetcher`]. The router is a plain
//! lookup table built by the caller.

use std::collections::HashMap;
use std::sync::Arc;

use a3s_catalog_core::error::{CatalogError, Result};
use a3s_catalog_core::{
    Catalog, CatalogConfig, ProgressEmitter, ResolvedSource, SourceDescriptor, SourceType,
};
use chrono::{DateTime, Utc};
use tokio_util::sync::CancellationToken;

use crate::cache::{ContentCache, ContentTree};
use crate::io::run_blocking;
use crate::oci::{OciFetcher, PolicyFile};
use crate::web::WebFetcher;

/// Per-call knobs shared by every fetcher.
#[derive(Clone)]
pub struct FetchOptions {
    pub emitter: ProgressEmitter,
    pub cancel: CancellationToken,
}

impl FetchOptions {
    pub fn new(emitter: ProgressEmitter, cancel: CancellationToken) -> Self {
        Self { emitter, cancel }
    }
}

impl Default for FetchOptions {
    fn default() -> Self {
        Self::new(ProgressEmitter::disabled(), CancellationToken::new())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnpackState {
    /// Content is published in the cache.
    Unpacked,
}

/// Outcome of a successful fetch.
#[derive(Debug, Clone)]
pub struct FetchResult {
    pub content: ContentTree,
    pub resolved_source: ResolvedSource,
    /// When the content was unpacked, truncated to whole seconds.
    pub unpack_time: DateTime<Utc>,
    pub state: UnpackState,
    pub message: String,
}

impl FetchResult {
    pub(crate) fn unpacked(
        content: ContentTree,
        resolved_source: ResolvedSource,
        unpack_time: DateTime<Utc>,
    ) -> Result<Self> {
        let key = resolved_source.content_key()?;
        Ok(Self {
            content,
            resolved_source,
            unpack_time,
            state: UnpackState::Unpacked,
            message: format!("unpacked \"{}\" successfully", key),
        })
    }
}

/// The fetcher for one source type.
pub enum Fetcher {
    Image(OciFetcher),
    Web(WebFetcher),
}

impl Fetcher {
    pub fn source_type(&self) -> SourceType {
        match self {
            Fetcher::Image(_) => SourceType::Image,
            Fetcher::Web(_) => SourceType::Web,
        }
    }

    fn cache(&self) -> &ContentCache {
        match self {
            Fetcher::Image(fetcher) => fetcher.cache(),
            Fetcher::Web(fetcher) => fetcher.cache(),
        }
    }

    /// Fetch the declared source of `catalog` into the cache.
    pub async fn fetch(&self, catalog: &Catalog, options: &FetchOptions) -> Result<FetchResult> {
        match (self, &catalog.spec.source) {
            (Fetcher::Image(fetcher), SourceDescriptor::Image { reference, .. }) => {
                fetcher.fetch(&catalog.name, reference, options).await
            }
            (Fetcher::Web(fetcher), SourceDescriptor::Web { url, .. }) => {
                fetcher.fetch(&catalog.name, url, options).await
            }
            (fetcher, source) => Err(CatalogError::Invariant(format!(
                "{} fetcher cannot handle {} source of catalog {}",
                fetcher.source_type(),
                source.source_type(),
                catalog.name
            ))),
        }
    }

    /// Delete every cached entry for `name`.
    pub async fn cleanup(&self, name: &str) -> Result<()> {
        let cache = self.cache().clone();
        let name = name.to_string();
        run_blocking("cleanup", move || cache.remove(&name)).await
    }
}

/// Lookup table from source type to fetcher.
#[derive(Default)]
pub struct SourceRouter {
    fetchers: HashMap<SourceType, Fetcher>,
}

impl SourceRouter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `fetcher` for its source type, replacing any previous one.
    pub fn with(mut self, fetcher: Fetcher) -> Self {
        self.fetchers.insert(fetcher.source_type(), fetcher);
        self
    }

    /// Router with the image and web fetchers sharing one cache under
    /// the configured home.
    pub fn from_config(config: &CatalogConfig) -> Result<Self> {
        let cache = ContentCache::new(&config.unpack_dir())?;
        let policy = PolicyFile::new(&config.policy_path(), config.oci.insecure_registries.clone());
        let image = OciFetcher::new(cache.clone(), Arc::new(policy))
            .keep_history(config.oci.keep_history);
        let web = WebFetcher::new(cache, &config.http)?;
        Ok(Self::new().with(Fetcher::Image(image)).with(Fetcher::Web(web)))
    }

    pub fn get(&self, source_type: SourceType) -> Result<&Fetcher> {
        self.fetchers.get(&source_type).ok_or_else(|| {
            CatalogError::InvalidSource(format!("No fetcher registered for {} sources", source_type))
        })
    }

    pub async fn fetch(&self, catalog: &Catalog, options: &FetchOptions) -> Result<FetchResult> {
        self.get(catalog.spec.source.source_type())?
            .fetch(catalog, options)
            .await
    }

    pub async fn cleanup(&self, catalog: &Catalog) -> Result<()> {
        self.get(catalog.spec.source.source_type())?
            .cleanup(&catalog.name)
            .await
    }
}
