//! Single-file catalog store.
//!
//! Flattens an unpacked content tree into `root/<name>/catalog.json`, one
//! compact JSON document per line, for consumers that want a single file.

use std::io::Write;
use std::path::{Path, PathBuf};

use a3s_catalog_core::error::{CatalogError, Result};

use super::tree::ContentTree;
use crate::declcfg;

const FLAT_FILE: &str = "catalog.json";

#[derive(Debug, Clone)]
pub struct FlatStore {
    root: PathBuf,
}

impl FlatStore {
    pub fn new(root: &Path) -> Result<Self> {
        std::fs::create_dir_all(root).map_err(|e| {
            CatalogError::CacheError(format!(
                "Failed to create catalog directory {}: {}",
                root.display(),
                e
            ))
        })?;
        Ok(Self {
            root: root.to_path_buf(),
        })
    }

    /// Path of the flattened file for `name`.
    pub fn path(&self, name: &str) -> PathBuf {
        self.root.join(name).join(FLAT_FILE)
    }

    /// Flatten `tree` and replace the stored file atomically.
    ///
    /// Returns the number of documents written.
    pub fn store(&self, name: &str, tree: &ContentTree) -> Result<usize> {
        let mut tmp = tempfile::Builder::new()
            .prefix(".catalog-")
            .suffix(".json")
            .tempfile_in(&self.root)
            .map_err(|e| {
                CatalogError::CacheError(format!(
                    "Failed to create temporary file in {}: {}",
                    self.root.display(),
                    e
                ))
            })?;

        let mut count = 0;
        for relative in tree.files()? {
            if !declcfg::is_catalog_file(&relative) {
                continue;
            }
            let data = tree.read(&relative)?;
            let documents = declcfg::parse_documents(&data).map_err(|e| {
                CatalogError::InvalidContent(format!("{}: {}", relative.display(), e))
            })?;
            for document in documents {
                serde_json::to_writer(&mut tmp, &document)?;
                tmp.write_all(b"\n")?;
                count += 1;
            }
        }
        tmp.flush()?;

        let target_dir = self.root.join(name);
        std::fs::create_dir_all(&target_dir)?;
        let target = self.path(name);
        tmp.persist(&target).map_err(|e| {
            CatalogError::CacheError(format!(
                "Failed to store {}: {}",
                target.display(),
                e.error
            ))
        })?;

        tracing::debug!(name = %name, documents = count, path = %target.display(), "Stored flattened catalog");
        Ok(count)
    }

    /// Path to the stored file, if present.
    pub fn get(&self, name: &str) -> Option<PathBuf> {
        self.content_exists(name).then(|| self.path(name))
    }

    /// Whether a regular file is stored for `name`.
    pub fn content_exists(&self, name: &str) -> bool {
        std::fs::symlink_metadata(self.path(name))
            .map(|m| m.is_file())
            .unwrap_or(false)
    }

    pub fn delete(&self, name: &str) -> Result<()> {
        match std::fs::remove_dir_all(self.root.join(name)) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(CatalogError::CacheError(format!(
                "Failed to delete catalog {}: {}",
                name, e
            ))),
        }
    }

    /// Names with a stored file, sorted.
    pub fn list(&self) -> Result<Vec<String>> {
        let mut names = Vec::new();
        for entry in std::fs::read_dir(&self.root)? {
            let entry = entry?;
            let name = entry.file_name().to_string_lossy().to_string();
            if entry.file_type()?.is_dir() && self.content_exists(&name) {
                names.push(name);
            }
        }
        names.sort();
        Ok(names)
    }
}
