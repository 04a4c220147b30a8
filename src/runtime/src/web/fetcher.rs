//! Web source fetcher.
//!
//! Downloads `<url>/catalog.yaml`, decompresses it when the server sent it
//! gzip-encoded, validates the documents, and stores it in the cache keyed
//! by the sha256 of the decompressed bytes. Older entries for the same name
//! are removed once the new one is published.

use std::fs::File;
use std::path::{Path, PathBuf};
use std::time::Duration;

use a3s_catalog_core::error::{CatalogError, Result};
use a3s_catalog_core::progress::{tasks, ProgressEmitter, UNKNOWN_SIZE};
use a3s_catalog_core::{ContentKey, HttpConfig, ResolvedSource};
use flate2::read::GzDecoder;
use futures::StreamExt;
use reqwest::header::{ACCEPT_ENCODING, CONTENT_ENCODING};
use reqwest::{Client, Url};
use sha2::{Digest, Sha256};
use tempfile::TempDir;
use tokio::io::AsyncWriteExt;
use tokio_util::sync::CancellationToken;

use crate::cache::ContentCache;
use crate::declcfg::{self, CATALOG_FILE};
use crate::io::{modified_time, run_blocking, ProgressReader};
use crate::source::{FetchOptions, FetchResult};

/// Fetches catalogs served as a single file over HTTP(S).
pub struct WebFetcher {
    cache: ContentCache,
    client: Client,
    scratch_dir: Option<PathBuf>,
}

impl WebFetcher {
    pub fn new(cache: ContentCache, config: &HttpConfig) -> Result<Self> {
        let mut builder =
            Client::builder().connect_timeout(Duration::from_secs(config.connect_timeout_secs));
        if config.timeout_secs > 0 {
            builder = builder.timeout(Duration::from_secs(config.timeout_secs));
        }
        let client = builder.build().map_err(|e| {
            CatalogError::ConfigError(format!("Failed to build HTTP client: {}", e))
        })?;

        Ok(Self {
            cache,
            client,
            scratch_dir: None,
        })
    }

    /// Directory for downloads in flight; the system temp dir otherwise.
    pub fn scratch_dir(mut self, dir: &Path) -> Self {
        self.scratch_dir = Some(dir.to_path_buf());
        self
    }

    pub fn cache(&self) -> &ContentCache {
        &self.cache
    }

    /// Fetch the catalog served under `url` into the cache under `name`.
    pub async fn fetch(&self, name: &str, url: &str, options: &FetchOptions) -> Result<FetchResult> {
        let catalog_url = catalog_url(url)?;
        let scratch = self.scratch()?;

        tracing::info!(name = %name, url = %catalog_url, "Downloading catalog");
        let downloaded = scratch.path().join("download");
        let gzipped = self.download(&catalog_url, &downloaded, options).await?;

        let content_path = if gzipped {
            let decompressed = scratch.path().join(CATALOG_FILE);
            let (src, dest) = (downloaded.clone(), decompressed.clone());
            let emitter = options.emitter.clone();
            let cancel = options.cancel.clone();
            run_blocking("decompress", move || decompress(&src, &dest, emitter, &cancel)).await?;
            decompressed
        } else {
            downloaded
        };

        let path = content_path.clone();
        let (documents, key) = run_blocking("validate", move || {
            let data = std::fs::read(&path)?;
            let documents = declcfg::validate(&data)?;
            let key = ContentKey::sha256(&hex::encode(Sha256::digest(&data)));
            Ok((documents, key))
        })
        .await?;
        tracing::debug!(name = %name, digest = %key, documents, "Validated catalog content");

        let resolved_source = ResolvedSource::Web {
            url: catalog_url.to_string(),
            digest: key.clone(),
        };

        if self.cache.exists(name, &key)? {
            tracing::info!(name = %name, digest = %key, "No new updates to catalog");
            let content = self.cache.open(name, &key)?;
            let unpack_time = modified_time(&content.root().join(CATALOG_FILE))?;
            return FetchResult::unpacked(content, resolved_source, unpack_time);
        }

        let cache = self.cache.clone();
        let entry_name = name.to_string();
        let entry_key = key.clone();
        let content = run_blocking("publish", move || {
            let staging = cache.stage(&entry_name)?;
            if let Err(e) = std::fs::copy(&content_path, staging.path().join(CATALOG_FILE)) {
                return Err(CatalogError::from(e).with_cleanup(cache.discard(staging)));
            }
            cache.publish(staging, &entry_key)
        })
        .await?;

        // The new entry is durable; a failed cleanup only leaves old ones behind.
        let cache = self.cache.clone();
        let gc_name = name.to_string();
        match run_blocking("garbage collection", move || cache.garbage_collect(&gc_name, &key)).await {
            Ok(removed) if !removed.is_empty() => {
                tracing::info!(name = %name, removed = ?removed, "Removed superseded catalog content");
            }
            Ok(_) => {}
            Err(e) => {
                tracing::warn!(name = %name, error = %e, "Failed to remove superseded catalog content");
            }
        }

        let scratch_path = scratch.path().to_path_buf();
        if let Err(e) = scratch.close() {
            tracing::warn!(path = %scratch_path.display(), error = %e, "Failed to remove download directory");
        }

        let unpack_time = modified_time(&content.root().join(CATALOG_FILE))?;
        FetchResult::unpacked(content, resolved_source, unpack_time)
    }

    /// Stream the response body to `dest`; returns whether it is gzip-encoded.
    async fn download(&self, url: &Url, dest: &Path, options: &FetchOptions) -> Result<bool> {
        let cancel = &options.cancel;
        let request = self.client.get(url.clone()).header(ACCEPT_ENCODING, "gzip");
        let response = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                return Err(CatalogError::Cancelled(format!("downloading {}", url)))
            }
            response = request.send() => response,
        }
        .map_err(|e| CatalogError::DownloadError {
            url: url.to_string(),
            message: e.to_string(),
        })?;

        let status = response.status();
        if !status.is_success() {
            return Err(CatalogError::HttpStatus {
                url: url.to_string(),
                status_code: status.as_u16(),
            });
        }

        let gzipped = response
            .headers()
            .get(CONTENT_ENCODING)
            .and_then(|v| v.to_str().ok())
            .map(|v| v.trim().eq_ignore_ascii_case("gzip"))
            .unwrap_or(false);
        let size = response
            .content_length()
            .map(|len| len as i64)
            .unwrap_or(UNKNOWN_SIZE);

        let mut emitter = options.emitter.clone();
        emitter.new_task(tasks::DOWNLOAD).with_size(size).emit();

        let mut file = tokio::fs::File::create(dest).await?;
        let mut body = response.bytes_stream();
        let mut offset = 0i64;
        loop {
            let chunk = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    return Err(CatalogError::Cancelled(format!("downloading {}", url)))
                }
                chunk = body.next() => chunk,
            };
            let chunk = match chunk {
                Some(chunk) => chunk.map_err(|e| CatalogError::DownloadError {
                    url: url.to_string(),
                    message: e.to_string(),
                })?,
                None => break,
            };
            file.write_all(&chunk).await?;
            offset += chunk.len() as i64;
            emitter.report(offset, chunk.len() as i64);
        }
        file.flush().await?;
        emitter.done().emit();

        tracing::debug!(url = %url, bytes = offset, gzipped, "Download complete");
        Ok(gzipped)
    }

    fn scratch(&self) -> Result<TempDir> {
        let mut builder = tempfile::Builder::new();
        builder.prefix("a3s-catalog-download-");
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

/// Join the declared URL with the catalog file name.
///
/// Only absolute http and https URLs are accepted.
pub fn catalog_url(base: &str) -> Result<Url> {
    let invalid = |message: String| CatalogError::InvalidUrl {
        url: base.to_string(),
        message,
    };

    let mut url = Url::parse(base).map_err(|e| invalid(e.to_string()))?;
    if url.scheme() != "http" && url.scheme() != "https" {
        return Err(invalid(format!("unsupported scheme '{}'", url.scheme())));
    }
    url.path_segments_mut()
        .map_err(|_| invalid("URL cannot be a base".to_string()))?
        .pop_if_empty()
        .push(CATALOG_FILE);
    Ok(url)
}

/// Gunzip `src` into `dest`, reporting decompressed bytes.
fn decompress(
    src: &Path,
    dest: &Path,
    mut emitter: ProgressEmitter,
    cancel: &CancellationToken,
) -> Result<()> {
    emitter.new_task(tasks::DECOMPRESS).with_size(UNKNOWN_SIZE).emit();

    let input = File::open(src)?;
    let mut reader = ProgressReader::new(GzDecoder::new(input), emitter.clone(), cancel.clone());
    let mut output = File::create(dest)?;
    if let Err(e) = std::io::copy(&mut reader, &mut output) {
        if cancel.is_cancelled() {
            return Err(CatalogError::Cancelled(format!(
                "decompressing {}",
                src.display()
            )));
        }
        return Err(CatalogError::InvalidContent(format!(
            "Failed to decompress catalog: {}",
            e
        )));
    }

    emitter.done().emit();
    Ok(())
}
