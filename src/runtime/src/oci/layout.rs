//! Reading a pulled OCI image layout.

use std::path::{Path, PathBuf};

use a3s_catalog_core::error::{CatalogError, Result};
use a3s_catalog_core::ContentKey;
use oci_spec::image::{ImageIndex, ImageManifest};

use super::registry::blob_path;

/// One filesystem layer blob, in manifest order.
#[derive(Debug, Clone)]
pub struct LayerBlob {
    pub digest: ContentKey,
    pub size: i64,
    pub media_type: String,
    pub path: PathBuf,
}

/// An image layout on disk with its layers resolved to blob paths.
#[derive(Debug)]
pub struct ImageLayout {
    root: PathBuf,
    manifest_digest: ContentKey,
    layers: Vec<LayerBlob>,
}

impl ImageLayout {
    /// Load `index.json` and the first manifest it lists.
    pub fn open(root: &Path) -> Result<Self> {
        if !root.join("oci-layout").is_file() {
            return Err(CatalogError::OciImageError(format!(
                "Not an OCI image layout: {}",
                root.display()
            )));
        }

        let index = ImageIndex::from_file(root.join("index.json")).map_err(|e| {
            CatalogError::OciImageError(format!("Failed to read index.json: {}", e))
        })?;
        let manifest_digest = index
            .manifests()
            .first()
            .ok_or_else(|| {
                CatalogError::OciImageError("No manifests in index.json".to_string())
            })?
            .digest()
            .to_string();
        let manifest_digest = ContentKey::parse(&manifest_digest)
            .map_err(|e| CatalogError::OciImageError(e.to_string()))?;

        let manifest = ImageManifest::from_file(blob_path(root, &manifest_digest)).map_err(|e| {
            CatalogError::OciImageError(format!(
                "Failed to read manifest {}: {}",
                manifest_digest, e
            ))
        })?;

        let mut layers = Vec::with_capacity(manifest.layers().len());
        for descriptor in manifest.layers() {
            let digest = ContentKey::parse(descriptor.digest())
                .map_err(|e| CatalogError::OciImageError(e.to_string()))?;
            let path = blob_path(root, &digest);
            if !path.is_file() {
                return Err(CatalogError::OciImageError(format!(
                    "Layer blob {} missing from layout",
                    digest
                )));
            }
            layers.push(LayerBlob {
                size: descriptor.size(),
                media_type: descriptor.media_type().to_string(),
                path,
                digest,
            });
        }

        Ok(Self {
            root: root.to_path_buf(),
            manifest_digest,
            layers,
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn manifest_digest(&self) -> &ContentKey {
        &self.manifest_digest
    }

    pub fn layers(&self) -> &[LayerBlob] {
        &self.layers
    }
}


#[cfg(test)]
mod tests {
    use super::testing::write_layout;
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_open_lists_layers_in_manifest_order() {
        let tmp = TempDir::new().unwrap();
        let keys = write_layout(tmp.path(), &[b"first".to_vec(), b"second".to_vec()]);

        let layout = ImageLayout::open(tmp.path()).unwrap();
        let digests: Vec<&ContentKey> = layout.layers().iter().map(|l| &l.digest).collect();
        assert_eq!(digests, vec![&keys[0], &keys[1]]);
        assert_eq!(layout.layers()[0].size, 5);
        assert!(layout.layers()[1].path.is_file());
    }

    #[test]
    fn test_open_rejects_non_layout() {
        let tmp = TempDir::new().unwrap();
        assert!(ImageLayout::open(tmp.path()).is_err());
    }

    #[test]
    fn test_open_rejects_missing_layer_blob() {
        let tmp = TempDir::new().unwrap();
        let keys = write_layout(tmp.path(), &[b"layer".to_vec()]);
        std::fs::remove_file(blob_path(tmp.path(), &keys[0])).unwrap();
        assert!(ImageLayout::open(tmp.path()).is_err());
    }
}
