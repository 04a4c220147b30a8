//! Read-only view over a sealed cache entry.

use std::path::{Component, Path, PathBuf};

use a3s_catalog_core::error::{CatalogError, Result};

/// Handle to a complete, sealed content tree.
///
/// Consumers read through this handle; they never get a writable path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContentTree {
    root: PathBuf,
}

impl ContentTree {
    pub(crate) fn new(root: PathBuf) -> Self {
        Self { root }
    }

    /// Root directory of the tree.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Relative paths of every regular file, sorted.
    pub fn files(&self) -> Result<Vec<PathBuf>> {
        let mut files = Vec::new();
        collect_files(&self.root, Path::new(""), &mut files)?;
        files.sort();
        Ok(files)
    }

    /// Total bytes of every regular file.
    pub fn size(&self) -> Result<u64> {
        let mut total = 0;
        for relative in self.files()? {
            total += std::fs::symlink_metadata(self.root.join(relative))?.len();
        }
        Ok(total)
    }

    /// Read a file by its path relative to the root.
    pub fn read(&self, relative: impl AsRef<Path>) -> Result<Vec<u8>> {
        let path = self.resolve(relative.as_ref())?;
        std::fs::read(&path).map_err(|e| {
            CatalogError::CacheError(format!("Failed to read {}: {}", path.display(), e))
        })
    }

    /// Open a file by its path relative to the root.
    pub fn open(&self, relative: impl AsRef<Path>) -> Result<std::fs::File> {
        let path = self.resolve(relative.as_ref())?;
        std::fs::File::open(&path).map_err(|e| {
            CatalogError::CacheError(format!("Failed to open {}: {}", path.display(), e))
        })
    }

    fn resolve(&self, relative: &Path) -> Result<PathBuf> {
        let escapes = relative
            .components()
            .any(|c| !matches!(c, Component::Normal(_) | Component::CurDir));
        if escapes {
            return Err(CatalogError::CacheError(format!(
                "Path {} is outside the content tree",
                relative.display()
            )));
        }
        Ok(self.root.join(relative))
    }
}

fn collect_files(dir: &Path, prefix: &Path, out: &mut Vec<PathBuf>) -> Result<()> {
    let entries = std::fs::read_dir(dir).map_err(|e| {
        CatalogError::CacheError(format!("Failed to read directory {}: {}", dir.display(), e))
    })?;
    for entry in entries {
        let entry = entry.map_err(|e| {
            CatalogError::CacheError(format!("Failed to read directory entry: {}", e))
        })?;
        let file_type = entry.file_type()?;
        let relative = prefix.join(entry.file_name());
        if file_type.is_dir() {
            collect_files(&entry.path(), &relative, out)?;
        } else if file_type.is_file() {
            out.push(relative);
        }
    }
    Ok(())
}
