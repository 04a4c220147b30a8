//! Permission handling for sealed cache trees.
//!
//! A sealed tree has directories at `0500` and regular files at `0400`.
//! Symlinks are left alone; any other file type is refused.

use std::path::Path;

use a3s_catalog_core::error::{CatalogError, Result};

#[cfg(unix)]
const SEALED_DIR_MODE: u32 = 0o500;
#[cfg(unix)]
const SEALED_FILE_MODE: u32 = 0o400;
#[cfg(unix)]
const WRITABLE_DIR_MODE: u32 = 0o700;

/// Make every directory and file under `root` (inclusive) read-only.
pub fn seal(root: &Path) -> Result<()> {
    let meta = std::fs::symlink_metadata(root).map_err(|e| {
        CatalogError::CacheError(format!("Failed to stat {}: {}", root.display(), e))
    })?;
    let file_type = meta.file_type();

    if file_type.is_symlink() {
        return Ok(());
    }

    if file_type.is_dir() {
        for entry in read_dir(root)? {
            seal(&entry)?;
        }
        return set_mode(root, true);
    }

    if file_type.is_file() {
        return set_mode(root, false);
    }

    Err(CatalogError::CacheError(format!(
        "Refusing to seal unsupported file type at {}",
        root.display()
    )))
}

/// Restore owner write permission on every directory under `root`.
///
/// Directories are opened before their children are visited, so a fully
/// sealed tree can be walked and then deleted.
pub fn make_writable(root: &Path) -> Result<()> {
    let meta = match std::fs::symlink_metadata(root) {
        Ok(meta) => meta,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
        Err(e) => {
            return Err(CatalogError::CacheError(format!(
                "Failed to stat {}: {}",
                root.display(),
                e
            )))
        }
    };
    if !meta.file_type().is_dir() {
        return Ok(());
    }

    set_writable_dir(root)?;
    for entry in read_dir(root)? {
        make_writable(&entry)?;
    }
    Ok(())
}

/// Delete a possibly sealed tree. A missing path is not an error.
pub fn remove_tree(path: &Path) -> Result<()> {
    if std::fs::symlink_metadata(path).is_err() {
        return Ok(());
    }
    make_writable(path)?;
    std::fs::remove_dir_all(path).map_err(|e| {
        CatalogError::CacheError(format!("Failed to remove {}: {}", path.display(), e))
    })
}

fn read_dir(dir: &Path) -> Result<Vec<std::path::PathBuf>> {
    let entries = std::fs::read_dir(dir).map_err(|e| {
        CatalogError::CacheError(format!("Failed to read directory {}: {}", dir.display(), e))
    })?;
    let mut paths = Vec::new();
    for entry in entries {
        let entry = entry.map_err(|e| {
            CatalogError::CacheError(format!("Failed to read directory entry: {}", e))
        })?;
        paths.push(entry.path());
    }
    Ok(paths)
}

#[cfg(unix)]
fn set_mode(path: &Path, is_dir: bool) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;

    let mode = if is_dir {
        SEALED_DIR_MODE
    } else {
        SEALED_FILE_MODE
    };
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(mode)).map_err(|e| {
        CatalogError::CacheError(format!("Failed to seal {}: {}", path.display(), e))
    })
}

#[cfg(not(unix))]
fn set_mode(path: &Path, _is_dir: bool) -> Result<()> {
    let mut perms = std::fs::metadata(path)?.permissions();
    perms.set_readonly(true);
    std::fs::set_permissions(path, perms).map_err(|e| {
        CatalogError::CacheError(format!("Failed to seal {}: {}", path.display(), e))
    })
}

#[cfg(unix)]
fn set_writable_dir(path: &Path) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;

    std::fs::set_permissions(path, std::fs::Permissions::from_mode(WRITABLE_DIR_MODE)).map_err(
        |e| CatalogError::CacheError(format!("Failed to unseal {}: {}", path.display(), e)),
    )
}

#[cfg(not(unix))]
fn set_writable_dir(path: &Path) -> Result<()> {
    let mut perms = std::fs::metadata(path)?.permissions();
    #[allow(clippy::permissions_set_readonly_false)]
    perms.set_readonly(false);
    std::fs::set_permissions(path, perms).map_err(|e| {
        CatalogError::CacheError(format!("Failed to unseal {}: {}", path.display(), e))
    })
}
