//! OCI registry client for resolving and pulling catalog images.
//!
//! Uses the `oci-distribution` crate to talk to registries and writes pulled
//! images as an OCI image layout on disk.

use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::task::{Context, Poll};

use a3s_catalog_core::error::{CatalogError, Result};
use a3s_catalog_core::progress::{tasks, ProgressEmitter};
use a3s_catalog_core::ContentKey;
use oci_distribution::client::{ClientConfig, ClientProtocol};
use oci_distribution::manifest::{
    ImageIndexEntry, OciDescriptor, OciImageManifest, OciManifest, IMAGE_MANIFEST_LIST_MEDIA_TYPE,
    IMAGE_MANIFEST_MEDIA_TYPE, OCI_IMAGE_INDEX_MEDIA_TYPE, OCI_IMAGE_MEDIA_TYPE,
};
use oci_distribution::secrets::RegistryAuth as OciRegistryAuth;
use oci_distribution::{Client, Reference};
use sha2::{Digest, Sha256};
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio_util::sync::CancellationToken;

use super::reference::ImageReference;

/// Manifest media types accepted from registries.
const MANIFEST_MEDIA_TYPES: &[&str] = &[
    OCI_IMAGE_MEDIA_TYPE,
    OCI_IMAGE_INDEX_MEDIA_TYPE,
    IMAGE_MANIFEST_MEDIA_TYPE,
    IMAGE_MANIFEST_LIST_MEDIA_TYPE,
];

/// Authentication credentials for a container registry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegistryAuth {
    username: Option<String>,
    password: Option<String>,
}

impl RegistryAuth {
    /// Create anonymous authentication (no credentials).
    pub fn anonymous() -> Self {
        Self {
            username: None,
            password: None,
        }
    }

    /// Create basic authentication with username and password.
    pub fn basic(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: Some(username.into()),
            password: Some(password.into()),
        }
    }

    /// Read `REGISTRY_USERNAME` and `REGISTRY_PASSWORD`, else anonymous.
    pub fn from_env() -> Self {
        let username = std::env::var("REGISTRY_USERNAME").ok();
        let password = std::env::var("REGISTRY_PASSWORD").ok();

        if username.is_some() && password.is_some() {
            Self { username, password }
        } else {
            Self::anonymous()
        }
    }

    fn to_oci_auth(&self) -> OciRegistryAuth {
        match (&self.username, &self.password) {
            (Some(u), Some(p)) => OciRegistryAuth::Basic(u.clone(), p.clone()),
            _ => OciRegistryAuth::Anonymous,
        }
    }
}

/// Registry client bound to one set of credentials.
pub struct RegistryClient {
    client: Client,
    auth: RegistryAuth,
}

impl RegistryClient {
    /// Create a client; `insecure_registries` are contacted over HTTP.
    pub fn new(auth: RegistryAuth, insecure_registries: Vec<String>) -> Self {
        let protocol = if insecure_registries.is_empty() {
            ClientProtocol::Https
        } else {
            ClientProtocol::HttpsExcept(insecure_registries)
        };
        let config = ClientConfig {
            protocol,
            ..Default::default()
        };

        Self {
            client: Client::new(config),
            auth,
        }
    }

    /// Resolve a reference to the digest of the manifest it points at.
    ///
    /// For a multi-arch image this is the digest of the image index, which
    /// is also what [`pull_layout`](Self::pull_layout) reports. A reference
    /// that already carries a digest is returned without any network
    /// traffic.
    pub async fn resolve_digest(
        &self,
        reference: &ImageReference,
        cancel: &CancellationToken,
    ) -> Result<ContentKey> {
        if let Some(digest) = &reference.digest {
            return Ok(digest.clone());
        }

        let oci_ref = reference.to_oci_reference()?;
        let (_raw, digest) = self
            .fetch_manifest(&oci_ref, &reference.registry, cancel)
            .await?;
        Ok(digest)
    }

    /// Pull an image into an OCI image layout at `layout_dir`.
    ///
    /// An image index is narrowed to the linux manifest for the host CPU.
    /// The directory ends up with `oci-layout`, `index.json` and
    /// `blobs/<algorithm>/<hex>` for that manifest, its config and every
    /// layer. Returns the digest of the manifest the reference names, so an
    /// index yields the index digest.
    pub async fn pull_layout(
        &self,
        reference: &ImageReference,
        layout_dir: &Path,
        emitter: &ProgressEmitter,
        cancel: &CancellationToken,
    ) -> Result<ContentKey> {
        let oci_ref = reference.to_oci_reference()?;
        let registry = reference.registry.as_str();

        tracing::info!(
            reference = %reference,
            target = %layout_dir.display(),
            "Pulling image from registry"
        );

        let (raw, top_digest) = self.fetch_manifest(&oci_ref, registry, cancel).await?;
        let (manifest, manifest_json, manifest_key) = match parse_manifest(&raw, registry)? {
            OciManifest::Image(manifest) => (manifest, raw, top_digest.clone()),
            OciManifest::ImageIndex(index) => {
                let digest = linux_platform_resolver(&index.manifests).ok_or_else(|| {
                    CatalogError::RegistryError {
                        registry: registry.to_string(),
                        message: format!(
                            "No linux/{} image in index {}",
                            host_architecture(),
                            top_digest
                        ),
                    }
                })?;
                let platform_ref = Reference::with_digest(
                    oci_ref.registry().to_string(),
                    oci_ref.repository().to_string(),
                    digest.clone(),
                );
                let (raw, key) = self.fetch_manifest(&platform_ref, registry, cancel).await?;
                if key.as_str() != digest {
                    return Err(CatalogError::RegistryError {
                        registry: registry.to_string(),
                        message: format!("Requested manifest {} but received {}", digest, key),
                    });
                }
                match parse_manifest(&raw, registry)? {
                    OciManifest::Image(manifest) => {
                        tracing::debug!(index = %top_digest, manifest = %key, "Selected platform manifest");
                        (manifest, raw, key)
                    }
                    OciManifest::ImageIndex(_) => {
                        return Err(CatalogError::RegistryError {
                            registry: registry.to_string(),
                            message: format!("Nested image index {} is not supported", key),
                        })
                    }
                }
            }
        };

        write_blob_file(&blob_path(layout_dir, &manifest_key), &manifest_json).await?;

        self.pull_blobs(&oci_ref, &manifest, layout_dir, registry, emitter, cancel)
            .await?;

        write_blob_file(
            &layout_dir.join("oci-layout"),
            br#"{"imageLayoutVersion":"1.0.0"}"#,
        )
        .await?;
        let index = serde_json::json!({
            "schemaVersion": 2,
            "manifests": [{
                "mediaType": OCI_IMAGE_MEDIA_TYPE,
                "digest": manifest_key.as_str(),
                "size": manifest_json.len()
            }]
        });
        write_blob_file(
            &layout_dir.join("index.json"),
            &serde_json::to_vec_pretty(&index)?,
        )
        .await?;

        tracing::info!(
            reference = %reference,
            digest = %top_digest,
            "Image pulled"
        );
        Ok(top_digest)
    }

    /// Fetch a manifest's raw bytes and verify them against their digest.
    async fn fetch_manifest(
        &self,
        oci_ref: &Reference,
        registry: &str,
        cancel: &CancellationToken,
    ) -> Result<(Vec<u8>, ContentKey)> {
        let auth = self.auth.to_oci_auth();
        let pulled = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                return Err(CatalogError::Cancelled(format!("pulling manifest {}", oci_ref.whole())))
            }
            result = self.client.pull_manifest_raw(oci_ref, &auth, MANIFEST_MEDIA_TYPES) => result,
        };
        let (raw, digest) = pulled.map_err(|e| CatalogError::RegistryError {
            registry: registry.to_string(),
            message: format!("Failed to pull manifest: {}", e),
        })?;

        let key = ContentKey::parse(&digest).map_err(|_| CatalogError::RegistryError {
            registry: registry.to_string(),
            message: format!("Registry returned malformed digest '{}'", digest),
        })?;
        if key.algorithm() == "sha256" && hex::encode(Sha256::digest(&raw)) != key.hex() {
            return Err(CatalogError::RegistryError {
                registry: registry.to_string(),
                message: format!("Manifest content does not match digest {}", key),
            });
        }
        Ok((raw, key))
    }

    async fn pull_blobs(
        &self,
        oci_ref: &Reference,
        manifest: &OciImageManifest,
        layout_dir: &Path,
        registry: &str,
        emitter: &ProgressEmitter,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let descriptors = std::iter::once(&manifest.config).chain(manifest.layers.iter());
        for descriptor in descriptors {
            self.pull_blob(oci_ref, descriptor, layout_dir, registry, emitter.clone(), cancel)
                .await?;
        }
        Ok(())
    }

    async fn pull_blob(
        &self,
        oci_ref: &Reference,
        descriptor: &OciDescriptor,
        layout_dir: &Path,
        registry: &str,
        mut emitter: ProgressEmitter,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let key = ContentKey::parse(&descriptor.digest).map_err(|_| {
            CatalogError::RegistryError {
                registry: registry.to_string(),
                message: format!("Malformed blob digest '{}'", descriptor.digest),
            }
        })?;
        let path = blob_path(layout_dir, &key);
        let subject = subject_id(&key);

        let present = tokio::fs::metadata(&path)
            .await
            .map(|m| m.is_file() && m.len() as i64 == descriptor.size)
            .unwrap_or(false);
        if present {
            emitter
                .new_task(tasks::PULL)
                .with_subject(subject)
                .with_size(descriptor.size)
                .skip()
                .emit();
            return Ok(());
        }

        emitter
            .new_task(tasks::PULL)
            .with_subject(subject)
            .with_size(descriptor.size)
            .emit();

        tracing::debug!(
            digest = %descriptor.digest,
            size = descriptor.size,
            media_type = %descriptor.media_type,
            "Pulling blob"
        );

        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let partial = path.with_extension("partial");
        let file = tokio::fs::File::create(&partial).await?;
        let mut writer = ProgressWriter::new(file, emitter.clone());

        let pulled = tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(None),
            result = self.client.pull_blob(oci_ref, descriptor, &mut writer) => result.map_err(Some),
        };
        if let Err(cause) = pulled {
            let _ = tokio::fs::remove_file(&partial).await;
            return Err(match cause {
                None => CatalogError::Cancelled(format!("pulling blob {}", descriptor.digest)),
                Some(e) => CatalogError::RegistryError {
                    registry: registry.to_string(),
                    message: format!("Failed to pull blob {}: {}", descriptor.digest, e),
                },
            });
        }
        writer.flush().await?;
        let (written, sha256) = writer.finish();

        let size_ok = descriptor.size < 0 || written == descriptor.size;
        let digest_ok = key.algorithm() != "sha256" || sha256 == key.hex();
        if !size_ok || !digest_ok {
            let _ = tokio::fs::remove_file(&partial).await;
            return Err(CatalogError::RegistryError {
                registry: registry.to_string(),
                message: format!(
                    "Blob {} failed verification ({} bytes, sha256:{})",
                    descriptor.digest, written, sha256
                ),
            });
        }

        tokio::fs::rename(&partial, &path).await?;
        emitter.done().emit();
        Ok(())
    }
}

/// Location of a blob inside an OCI image layout.
pub fn blob_path(layout_dir: &Path, key: &ContentKey) -> PathBuf {
    layout_dir
        .join("blobs")
        .join(key.algorithm())
        .join(key.hex())
}

/// Short progress subject for a digest: the first 8 hex characters.
pub fn subject_id(key: &ContentKey) -> String {
    let hex = key.hex();
    hex[..hex.len().min(8)].to_string()
}

async fn write_blob_file(path: &Path, data: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await.map_err(|e| {
            CatalogError::OciImageError(format!(
                "Failed to create directory {}: {}",
                parent.display(),
                e
            ))
        })?;
    }
    tokio::fs::write(path, data).await.map_err(|e| {
        CatalogError::OciImageError(format!("Failed to write {}: {}", path.display(), e))
    })
}

/// Writer that hashes what passes through and reports progress.
struct ProgressWriter<W> {
    inner: W,
    emitter: ProgressEmitter,
    hasher: Sha256,
    written: i64,
}

impl<W> ProgressWriter<W> {
    fn new(inner: W, emitter: ProgressEmitter) -> Self {
        Self {
            inner,
            emitter,
            hasher: Sha256::new(),
            written: 0,
        }
    }

    /// Bytes written and their lowercase hex sha256.
    fn finish(self) -> (i64, String) {
        (self.written, hex::encode(self.hasher.finalize()))
    }
}

impl<W: AsyncWrite + Unpin> AsyncWrite for ProgressWriter<W> {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<std::io::Result<usize>> {
        let this = self.get_mut();
        match Pin::new(&mut this.inner).poll_write(cx, buf) {
            Poll::Ready(Ok(n)) => {
                this.hasher.update(&buf[..n]);
                this.written += n as i64;
                this.emitter.report(this.written, n as i64);
                Poll::Ready(Ok(n))
            }
            other => other,
        }
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        Pin::new(&mut self.get_mut().inner).poll_flush(cx)
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        Pin::new(&mut self.get_mut().inner).poll_shutdown(cx)
    }
}

fn parse_manifest(raw: &[u8], registry: &str) -> Result<OciManifest> {
    serde_json::from_slice(raw).map_err(|e| CatalogError::RegistryError {
        registry: registry.to_string(),
        message: format!("Malformed manifest: {}", e),
    })
}

/// Host CPU in OCI platform terms.
fn host_architecture() -> &'static str {
    match std::env::consts::ARCH {
        "x86_64" => "amd64",
        "aarch64" => "arm64",
        other => other,
    }
}

/// Select the linux image matching the host CPU from a multi-arch index.
fn linux_platform_resolver(manifests: &[ImageIndexEntry]) -> Option<String> {
    let arch = host_architecture();
    manifests
        .iter()
        .find(|entry| {
            entry
                .platform
                .as_ref()
                .map_or(false, |p| p.os == "linux" && p.architecture == arch)
        })
        .map(|entry| entry.digest.clone())
}
