//! Content-addressed store for unpacked catalog content.
//!
//! Entries live at `root/<name>/<key>/` where `<key>` is the filesystem-safe
//! form of a [`ContentKey`]. Content is assembled in a staging directory
//! beside the entries and published with a single rename once it is complete
//! and sealed, so an entry that exists is always whole.

use std::path::{Path, PathBuf};

use a3s_catalog_core::error::{CatalogError, Result};
use a3s_catalog_core::ContentKey;
use tempfile::TempDir;

use super::seal::{remove_tree, seal};
use super::tree::ContentTree;

const STAGING_PREFIX: &str = ".staging-";

/// Private directory where a fetch assembles content before publishing.
pub struct Staging {
    dir: TempDir,
    name: String,
}

impl Staging {
    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

/// Content-addressed cache of unpacked catalogs.
#[derive(Debug, Clone)]
pub struct ContentCache {
    root: PathBuf,
}

impl ContentCache {
    /// Open a cache rooted at `root`, creating the directory if needed.
    pub fn new(root: &Path) -> Result<Self> {
        std::fs::create_dir_all(root).map_err(|e| {
            CatalogError::CacheError(format!(
                "Failed to create cache directory {}: {}",
                root.display(),
                e
            ))
        })?;
        Ok(Self {
            root: root.to_path_buf(),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Directory holding every entry for `name`.
    pub fn name_dir(&self, name: &str) -> PathBuf {
        self.root.join(name)
    }

    /// Deterministic location of the entry for `(name, key)`.
    pub fn entry_path(&self, name: &str, key: &ContentKey) -> PathBuf {
        self.name_dir(name).join(key.dir_name())
    }

    /// Whether a published entry exists. Stat only.
    ///
    /// Anything other than a directory at the entry path means the cache was
    /// tampered with and is reported as an invariant violation.
    pub fn exists(&self, name: &str, key: &ContentKey) -> Result<bool> {
        let path = self.entry_path(name, key);
        match std::fs::symlink_metadata(&path) {
            Ok(meta) if meta.is_dir() => Ok(true),
            Ok(_) => Err(CatalogError::Invariant(format!(
                "Expected a directory at cache entry {}",
                path.display()
            ))),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(CatalogError::CacheError(format!(
                "Failed to stat {}: {}",
                path.display(),
                e
            ))),
        }
    }

    /// Whether the entry exists and is non-empty.
    pub fn has_content(&self, name: &str, key: &ContentKey) -> Result<bool> {
        if !self.exists(name, key)? {
            return Ok(false);
        }
        let path = self.entry_path(name, key);
        let mut entries = std::fs::read_dir(&path).map_err(|e| {
            CatalogError::CacheError(format!("Failed to read {}: {}", path.display(), e))
        })?;
        Ok(entries.next().is_some())
    }

    /// Read-only handle to a published entry.
    pub fn open(&self, name: &str, key: &ContentKey) -> Result<ContentTree> {
        if !self.exists(name, key)? {
            return Err(CatalogError::CacheError(format!(
                "No cached content for {} at {}",
                name, key
            )));
        }
        Ok(ContentTree::new(self.entry_path(name, key)))
    }

    /// Create a staging directory for `name`.
    ///
    /// It sits beside the entries so publishing never crosses a filesystem
    /// or a parent directory.
    pub fn stage(&self, name: &str) -> Result<Staging> {
        let parent = self.name_dir(name);
        std::fs::create_dir_all(&parent).map_err(|e| {
            CatalogError::CacheError(format!(
                "Failed to create cache directory {}: {}",
                parent.display(),
                e
            ))
        })?;
        let dir = tempfile::Builder::new()
            .prefix(STAGING_PREFIX)
            .tempdir_in(&parent)
            .map_err(|e| {
                CatalogError::CacheError(format!(
                    "Failed to create staging directory in {}: {}",
                    parent.display(),
                    e
                ))
            })?;
        Ok(Staging {
            dir,
            name: name.to_string(),
        })
    }

    /// Seal the staged tree and publish it under `key`.
    ///
    /// If another fetch already published the same key, the staged copy is
    /// discarded and the existing entry is returned. On failure the staging
    /// directory is removed and any cleanup error is joined to the cause.
    pub fn publish(&self, staging: Staging, key: &ContentKey) -> Result<ContentTree> {
        let name = staging.name.clone();
        if self.exists(&name, key)? {
            self.discard(staging)?;
            return Ok(ContentTree::new(self.entry_path(&name, key)));
        }

        let target = self.entry_path(&name, key);
        if let Err(e) = seal(staging.path()) {
            let cleanup = self.discard(staging);
            return Err(e.with_cleanup(cleanup));
        }

        if let Err(e) = std::fs::rename(staging.path(), &target) {
            if target.is_dir() {
                // Lost a race with an identical publish.
                self.discard(staging)?;
                return Ok(ContentTree::new(target));
            }
            let error = CatalogError::CacheError(format!(
                "Failed to publish {} to {}: {}",
                staging.path().display(),
                target.display(),
                e
            ));
            let cleanup = self.discard(staging);
            return Err(error.with_cleanup(cleanup));
        }

        tracing::debug!(
            name = %name,
            key = %key,
            path = %target.display(),
            "Published cache entry"
        );
        Ok(ContentTree::new(target))
    }

    /// Remove a staging directory that will not be published.
    pub fn discard(&self, staging: Staging) -> Result<()> {
        let path = staging.path().to_path_buf();
        remove_tree(&path)?;
        // TempDir's own removal now finds nothing to do.
        drop(staging);
        Ok(())
    }

    /// Names of every published entry for `name`.
    pub fn entries(&self, name: &str) -> Result<Vec<String>> {
        let dir = self.name_dir(name);
        let read_dir = match std::fs::read_dir(&dir) {
            Ok(read_dir) => read_dir,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => {
                return Err(CatalogError::CacheError(format!(
                    "Failed to read cache directory {}: {}",
                    dir.display(),
                    e
                )))
            }
        };

        let mut entries = Vec::new();
        for entry in read_dir {
            let entry = entry.map_err(|e| {
                CatalogError::CacheError(format!("Failed to read directory entry: {}", e))
            })?;
            let file_name = entry.file_name().to_string_lossy().to_string();
            if !file_name.starts_with(STAGING_PREFIX) {
                entries.push(file_name);
            }
        }
        entries.sort();
        Ok(entries)
    }

    /// Delete everything under `name` except the entry for `keep`.
    ///
    /// Leftover staging directories from interrupted fetches go too.
    /// Returns the removed directory names.
    pub fn garbage_collect(&self, name: &str, keep: &ContentKey) -> Result<Vec<String>> {
        let dir = self.name_dir(name);
        let keep_name = keep.dir_name();
        let read_dir = match std::fs::read_dir(&dir) {
            Ok(read_dir) => read_dir,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => {
                return Err(CatalogError::CacheError(format!(
                    "Failed to read cache directory {}: {}",
                    dir.display(),
                    e
                )))
            }
        };

        let mut removed = Vec::new();
        for entry in read_dir {
            let entry = entry.map_err(|e| {
                CatalogError::CacheError(format!("Failed to read directory entry: {}", e))
            })?;
            let file_name = entry.file_name().to_string_lossy().to_string();
            if file_name == keep_name {
                continue;
            }
            remove_tree(&entry.path())?;
            tracing::debug!(name = %name, entry = %file_name, "Removed superseded cache entry");
            removed.push(file_name);
        }
        removed.sort();
        Ok(removed)
    }

    /// Delete every entry for `name`.
    pub fn remove(&self, name: &str) -> Result<()> {
        remove_tree(&self.name_dir(name))
    }
}
