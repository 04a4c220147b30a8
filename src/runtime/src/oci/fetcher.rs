//! Image source fetcher.
//!
//! Resolves the declared reference to a digest, answers from the cache when
//! that digest is already unpacked, and otherwise pulls the image into a
//! temporary OCI layout and unpacks its layers into a new cache entry.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use a3s_catalog_core::error::{CatalogError, Result};
use a3s_catalog_core::progress::{tasks, UNKNOWN_SIZE};
use a3s_catalog_core::{ContentKey, ResolvedSource};
use tempfile::TempDir;

use super::layers::apply_layers;
use super::layout::ImageLayout;
use super::policy::{FetchContext, TrustPolicy};
use super::reference::ImageReference;
use super::registry::{subject_id, RegistryClient};
use crate::cache::{ContentCache, ContentTree};
use crate::io::{modified_time, now_seconds, run_blocking};
use crate::source::{FetchOptions, FetchResult};

/// Fetches catalogs shipped as OCI images.
pub struct OciFetcher {
    cache: ContentCache,
    policy: Arc<dyn TrustPolicy>,
    keep_history: bool,
    scratch_dir: Option<PathBuf>,
}

impl OciFetcher {
    /// Create a fetcher that keeps superseded entries.
    pub fn new(cache: ContentCache, policy: Arc<dyn TrustPolicy>) -> Self {
        Self {
            cache,
            policy,
            keep_history: true,
            scratch_dir: None,
        }
    }

    /// Whether superseded entries survive a successful fetch.
    pub fn keep_history(mut self, keep: bool) -> Self {
        self.keep_history = keep;
        self
    }

    /// Directory for temporary image layouts; the system temp dir otherwise.
    pub fn scratch_dir(mut self, dir: &Path) -> Self {
        self.scratch_dir = Some(dir.to_path_buf());
        self
    }

    pub fn cache(&self) -> &ContentCache {
        &self.cache
    }

    /// Fetch `reference` into the cache under `name`.
    pub async fn fetch(
        &self,
        name: &str,
        reference: &str,
        options: &FetchOptions,
    ) -> Result<FetchResult> {
        let reference = ImageReference::parse(reference)?;

        let mut resolve = options.emitter.clone();
        resolve
            .new_task(tasks::RESOLVE)
            .with_size(UNKNOWN_SIZE)
            .with_subject(reference.to_string())
            .emit();

        // Only a tag needs the registry; the context is loaded lazily so a
        // cached digest reference touches neither network nor policy file.
        let mut session: Option<(RegistryClient, FetchContext)> = None;
        let key = match &reference.digest {
            Some(digest) => digest.clone(),
            None => {
                let (client, context) = self.connect()?;
                let key = client.resolve_digest(&reference, &options.cancel).await?;
                session = Some((client, context));
                key
            }
        };
        resolve.done().emit();

        let canonical = reference.canonical(key.clone());
        let resolved_source = ResolvedSource::Image {
            reference: canonical.to_string(),
        };
        tracing::debug!(reference = %reference, canonical = %canonical, "Resolved image reference");

        if self.cache.exists(name, &key)? {
            let content = self.cache.open(name, &key)?;
            let size = i64::try_from(content.size()?).unwrap_or(i64::MAX);
            for task in [tasks::PULL, tasks::UNPACK] {
                options
                    .emitter
                    .clone()
                    .new_task(task)
                    .with_subject(subject_id(&key))
                    .with_size(size)
                    .with_progress(size, 0)
                    .skip()
                    .emit();
            }
            tracing::info!(name = %name, digest = %key, "Catalog image already unpacked");
            let unpack_time = modified_time(content.root())?;
            return FetchResult::unpacked(content, resolved_source, unpack_time);
        }

        let (client, context) = match session {
            Some(session) => session,
            None => self.connect()?,
        };
        context.policy.check(&reference)?;

        let layout_dir = self.scratch()?;
        let unpacked = match client
            .pull_layout(&canonical, layout_dir.path(), &options.emitter, &options.cancel)
            .await
        {
            Ok(manifest) if manifest != key => Err(CatalogError::RegistryError {
                registry: canonical.registry.clone(),
                message: format!("Pulled manifest {} but resolved {}", manifest, key),
            }),
            Ok(_) => self.unpack_layout(name, &key, layout_dir.path(), options).await,
            Err(e) => Err(e),
        };

        let layout_path = layout_dir.path().to_path_buf();
        if let Err(e) = layout_dir.close() {
            tracing::warn!(
                path = %layout_path.display(),
                error = %e,
                "Failed to remove temporary image layout"
            );
        }
        let content = unpacked?;

        if !self.keep_history {
            let cache = self.cache.clone();
            let gc_name = name.to_string();
            let keep = key.clone();
            match run_blocking("garbage collection", move || cache.garbage_collect(&gc_name, &keep))
                .await
            {
                Ok(removed) if !removed.is_empty() => {
                    tracing::info!(name = %name, removed = ?removed, "Removed superseded catalog content");
                }
                Ok(_) => {}
                Err(e) => {
                    tracing::warn!(name = %name, error = %e, "Failed to remove superseded catalog content");
                }
            }
        }

        tracing::info!(name = %name, reference = %canonical, "Unpacked catalog image");
        FetchResult::unpacked(content, resolved_source, now_seconds())
    }

    /// Unpack the image layout at `layout_dir` into a new entry for `key`.
    ///
    /// Layers are applied in manifest order onto a staging directory on the
    /// blocking pool. A failing layer removes the staging directory and
    /// leaves existing entries untouched.
    pub async fn unpack_layout(
        &self,
        name: &str,
        key: &ContentKey,
        layout_dir: &Path,
        options: &FetchOptions,
    ) -> Result<ContentTree> {
        let cache = self.cache.clone();
        let name = name.to_string();
        let key = key.clone();
        let layout_dir = layout_dir.to_path_buf();
        let emitter = options.emitter.clone();
        let cancel = options.cancel.clone();

        run_blocking("unpack", move || {
            let layout = ImageLayout::open(&layout_dir)?;
            let staging = cache.stage(&name)?;
            match apply_layers(layout.layers(), staging.path(), &emitter, &cancel) {
                Ok(()) => cache.publish(staging, &key),
                Err(e) => {
                    tracing::warn!(name = %name, digest = %key, error = %e, "Unpack failed");
                    Err(e.with_cleanup(cache.discard(staging)))
                }
            }
        })
        .await
    }

    fn connect(&self) -> Result<(RegistryClient, FetchContext)> {
        let context = self.policy.fetch_context()?;
        let client = RegistryClient::new(context.auth.clone(), context.insecure_registries.clone());
        Ok((client, context))
    }

    fn scratch(&self) -> Result<TempDir> {
        let mut builder = tempfile::Builder::new();
        builder.prefix("a3s-catalog-layout-");
        let dir = match &self.scratch_dir {
            Some(dir) => {
                std::fs::create_dir_all(dir)?;
                builder.tempdir_in(dir)?
            }
            None => builder.tempdir()?,
        };
        Ok(dir)
    }
}
