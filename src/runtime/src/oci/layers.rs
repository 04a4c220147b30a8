//! OCI layer application.
//!
//! Applies layer tarballs onto a directory as filesystem diffs, in manifest
//! order. Compression is detected from the blob's magic bytes. Whiteout
//! entries delete what lower layers created:
//!
//! - `.wh.<name>` removes `<name>` from the same directory
//! - `.wh..wh..opq` empties the directory of lower-layer content

use std::collections::HashSet;
use std::fs::File;
use std::io::{BufRead, BufReader, Read};
use std::path::{Component, Path, PathBuf};

use a3s_catalog_core::error::{CatalogError, Result};
use a3s_catalog_core::progress::{tasks, ProgressEmitter};
use bzip2::read::BzDecoder;
use flate2::read::GzDecoder;
use tar::{Archive, EntryType};
use tokio_util::sync::CancellationToken;
use xz2::read::XzDecoder;

use super::layout::LayerBlob;
use super::registry::subject_id;
use crate::io::ProgressReader;

const WHITEOUT_PREFIX: &str = ".wh.";
const OPAQUE_WHITEOUT: &str = ".wh..wh..opq";

/// Layer compression, detected from magic bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Compression {
    None,
    Gzip,
    Bzip2,
    Xz,
    Zstd,
}

/// Detect compression from the first bytes of a blob.
pub fn detect_compression(header: &[u8]) -> Compression {
    if header.starts_with(&[0x1f, 0x8b]) {
        Compression::Gzip
    } else if header.starts_with(b"BZh") {
        Compression::Bzip2
    } else if header.starts_with(&[0xfd, b'7', b'z', b'X', b'Z', 0x00]) {
        Compression::Xz
    } else if header.starts_with(&[0x28, 0xb5, 0x2f, 0xfd]) {
        Compression::Zstd
    } else {
        Compression::None
    }
}

fn decompress<'a, R: BufRead + 'a>(reader: R, compression: Compression) -> Result<Box<dyn Read + 'a>> {
    Ok(match compression {
        Compression::None => Box::new(reader),
        Compression::Gzip => Box::new(GzDecoder::new(reader)),
        Compression::Bzip2 => Box::new(BzDecoder::new(reader)),
        Compression::Xz => Box::new(XzDecoder::new(reader)),
        Compression::Zstd => Box::new(zstd::stream::read::Decoder::with_buffer(reader).map_err(
            |e| CatalogError::OciImageError(format!("Failed to start zstd decoder: {}", e)),
        )?),
    })
}

/// Apply one layer stream onto `dest`.
///
/// Returns the number of tar entries processed.
pub fn apply_layer<R: Read>(reader: R, dest: &Path) -> Result<usize> {
    let mut reader = BufReader::new(reader);
    let header = reader.fill_buf()?;
    let compression = detect_compression(header);

    let mut archive = Archive::new(decompress(reader, compression)?);
    let root = dest.canonicalize()?;
    let mut unpacked: HashSet<PathBuf> = HashSet::new();
    let mut count = 0;

    for entry in archive.entries().map_err(layer_error)? {
        let mut entry = entry.map_err(layer_error)?;
        let path = normalize(&entry.path().map_err(layer_error)?)?;
        count += 1;

        let file_name = match path.file_name().and_then(|n| n.to_str()) {
            Some(name) => name.to_string(),
            None => continue,
        };
        let parent = path.parent().map(Path::to_path_buf).unwrap_or_default();

        if file_name == OPAQUE_WHITEOUT {
            if let Some(dir) = contained_dir(&root, &parent)? {
                clear_lower_content(&dir, &parent, &unpacked)?;
            }
            continue;
        }
        if let Some(target) = file_name.strip_prefix(WHITEOUT_PREFIX) {
            if target.is_empty() || target == "." || target == ".." {
                return Err(CatalogError::OciImageError(format!(
                    "Invalid whiteout in layer: {}",
                    path.display()
                )));
            }
            if let Some(dir) = contained_dir(&root, &parent)? {
                remove_path(&dir.join(target))?;
            }
            continue;
        }

        let is_dir = entry.header().entry_type() == EntryType::Directory;
        if let Some(dir) = contained_dir(&root, &parent)? {
            let existing = dir.join(&file_name);
            if let Ok(meta) = std::fs::symlink_metadata(&existing) {
                if !(is_dir && meta.is_dir()) {
                    remove_path(&existing)?;
                }
            }
        }

        entry.set_preserve_permissions(true);
        entry.set_preserve_mtime(true);
        entry.set_unpack_xattrs(false);
        entry.unpack_in(dest).map_err(|e| {
            CatalogError::OciImageError(format!("Failed to extract {}: {}", path.display(), e))
        })?;

        if is_dir {
            keep_owner_writable(&dest.join(&path))?;
        }
        unpacked.insert(path);
    }

    Ok(count)
}

/// Apply `layers` onto `dest`, strictly in order.
///
/// Blocking; run it on a blocking thread. Stops at the first failure and
/// leaves cleanup of `dest` to the caller.
pub fn apply_layers(
    layers: &[LayerBlob],
    dest: &Path,
    emitter: &ProgressEmitter,
    cancel: &CancellationToken,
) -> Result<()> {
    for layer in layers {
        let file = File::open(&layer.path).map_err(|e| {
            CatalogError::OciImageError(format!(
                "Failed to open layer {}: {}",
                layer.path.display(),
                e
            ))
        })?;

        let mut layer_emitter = emitter.clone();
        layer_emitter
            .new_task(tasks::UNPACK)
            .with_subject(subject_id(&layer.digest))
            .with_size(layer.size)
            .emit();
        let reader = ProgressReader::new(file, layer_emitter.clone(), cancel.clone());

        match apply_layer(reader, dest) {
            Ok(entries) => {
                tracing::debug!(digest = %layer.digest, entries, "Applied layer");
                layer_emitter.done().emit();
            }
            Err(_) if cancel.is_cancelled() => {
                return Err(CatalogError::Cancelled(format!(
                    "unpacking layer {}",
                    layer.digest
                )))
            }
            Err(e) => {
                return Err(CatalogError::OciImageError(format!(
                    "Layer {}: {}",
                    layer.digest, e
                )))
            }
        }
    }
    Ok(())
}

fn layer_error(e: std::io::Error) -> CatalogError {
    CatalogError::OciImageError(format!("Failed to read layer: {}", e))
}

/// Strip `./` and reject paths that would leave the destination.
fn normalize(path: &Path) -> Result<PathBuf> {
    let mut normalized = PathBuf::new();
    for component in path.components() {
        match component {
            Component::Normal(part) => normalized.push(part),
            Component::CurDir => {}
            _ => {
                return Err(CatalogError::OciImageError(format!(
                    "Unsafe path in layer: {}",
                    path.display()
                )))
            }
        }
    }
    Ok(normalized)
}

fn remove_path(path: &Path) -> Result<()> {
    let meta = match std::fs::symlink_metadata(path) {
        Ok(meta) => meta,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
        Err(e) => return Err(e.into()),
    };
    let result = if meta.is_dir() {
        std::fs::remove_dir_all(path)
    } else {
        std::fs::remove_file(path)
    };
    result.map_err(|e| {
        CatalogError::OciImageError(format!("Failed to remove {}: {}", path.display(), e))
    })
}

/// Resolve the directory `relative` under `root`, following symlinks.
///
/// Returns `None` when no such directory exists yet. A directory that
/// resolves outside `root` is an error, so removals never reach past it.
fn contained_dir(root: &Path, relative: &Path) -> Result<Option<PathBuf>> {
    let resolved = match root.join(relative).canonicalize() {
        Ok(resolved) => resolved,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e.into()),
    };
    if !resolved.starts_with(root) {
        return Err(CatalogError::OciImageError(format!(
            "Layer path {} resolves outside the image root",
            relative.display()
        )));
    }
    Ok(resolved.is_dir().then_some(resolved))
}

/// Empty `dir` of everything not created by the layer being applied.
///
/// `dir` is the resolved location of `relative`.
fn clear_lower_content(dir: &Path, relative: &Path, unpacked: &HashSet<PathBuf>) -> Result<()> {
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        if !unpacked.contains(&relative.join(entry.file_name())) {
            remove_path(&entry.path())?;
        }
    }
    Ok(())
}

#[cfg(unix)]
fn keep_owner_writable(dir: &Path) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;

    let mode = std::fs::metadata(dir)?.permissions().mode();
    if mode & 0o700 != 0o700 {
        std::fs::set_permissions(dir, std::fs::Permissions::from_mode(mode | 0o700))?;
    }
    Ok(())
}

#[cfg(not(unix))]
fn keep_owner_writable(_dir: &Path) -> Result<()> {
    Ok(())
}


#[cfg(test)]
mod tests {
    use super::testing::{gzip, layer, tar_bytes, Item};
    use super::*;
    use a3s_catalog_core::progress::{ProgressBus, ProgressKind};
    use a3s_catalog_core::ContentKey;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_detect_compression() {
        assert_eq!(detect_compression(&[0x1f, 0x8b, 0x08]), Compression::Gzip);
        assert_eq!(detect_compression(b"BZh91AY"), Compression::Bzip2);
        assert_eq!(
            detect_compression(&[0xfd, b'7', b'z', b'X', b'Z', 0x00, 0x00]),
            Compression::Xz
        );
        assert_eq!(detect_compression(&[0x28, 0xb5, 0x2f, 0xfd]), Compression::Zstd);
        assert_eq!(detect_compression(b"configs/"), Compression::None);
    }

    #[test]
    fn test_apply_gzip_layer() {
        let tmp = TempDir::new().unwrap();
        let data = layer(&[
            Item::Dir("configs"),
            Item::File("configs/catalog.yaml", b"schema: olm.package\n"),
        ]);

        let count = apply_layer(&data[..], tmp.path()).unwrap();
        assert_eq!(count, 2);
        assert_eq!(
            fs::read_to_string(tmp.path().join("configs/catalog.yaml")).unwrap(),
            "schema: olm.package\n"
        );
    }

    #[test]
    fn test_apply_uncompressed_layer() {
        let tmp = TempDir::new().unwrap();
        let data = tar_bytes(&[Item::File("./index.json", b"{}")]);
        apply_layer(&data[..], tmp.path()).unwrap();
        assert!(tmp.path().join("index.json").is_file());
    }

    #[test]
    fn test_apply_zstd_layer() {
        let tmp = TempDir::new().unwrap();
        let tar = tar_bytes(&[Item::File("a.yaml", b"schema: x\n")]);
        let data = zstd::stream::encode_all(&tar[..], 3).unwrap();
        apply_layer(&data[..], tmp.path()).unwrap();
        assert!(tmp.path().join("a.yaml").is_file());
    }

    #[test]
    fn test_whiteout_removes_lower_file() {
        let tmp = TempDir::new().unwrap();
        let lower = layer(&[Item::File("configs/old.yaml", b"old"), Item::File("configs/keep.yaml", b"keep")]);
        let upper = layer(&[Item::Whiteout("configs/.wh.old.yaml")]);

        apply_layer(&lower[..], tmp.path()).unwrap();
        apply_layer(&upper[..], tmp.path()).unwrap();

        assert!(!tmp.path().join("configs/old.yaml").exists());
        assert!(!tmp.path().join("configs/.wh.old.yaml").exists());
        assert!(tmp.path().join("configs/keep.yaml").exists());
    }

    #[test]
    fn test_opaque_whiteout_keeps_same_layer_entries() {
        let tmp = TempDir::new().unwrap();
        let lower = layer(&[Item::File("configs/a.yaml", b"a"), Item::File("configs/b.yaml", b"b")]);
        let upper = layer(&[
            Item::File("configs/c.yaml", b"c"),
            Item::Whiteout("configs/.wh..wh..opq"),
        ]);

        apply_layer(&lower[..], tmp.path()).unwrap();
        apply_layer(&upper[..], tmp.path()).unwrap();

        assert!(!tmp.path().join("configs/a.yaml").exists());
        assert!(!tmp.path().join("configs/b.yaml").exists());
        assert!(tmp.path().join("configs/c.yaml").exists());
    }

    #[test]
    fn test_file_replaces_directory() {
        let tmp = TempDir::new().unwrap();
        let lower = layer(&[Item::File("configs/x/inner.yaml", b"x")]);
        let upper = layer(&[Item::File("configs/x", b"now a file")]);

        apply_layer(&lower[..], tmp.path()).unwrap();
        apply_layer(&upper[..], tmp.path()).unwrap();

        assert_eq!(fs::read(tmp.path().join("configs/x")).unwrap(), b"now a file");
    }

    #[cfg(unix)]
    #[test]
    fn test_read_only_directory_stays_writable_for_later_layers() {
        let tmp = TempDir::new().unwrap();
        let lower = layer(&[Item::Dir("configs")]);
        let upper = layer(&[Item::File("configs/late.yaml", b"late")]);

        apply_layer(&lower[..], tmp.path()).unwrap();
        apply_layer(&upper[..], tmp.path()).unwrap();
        assert!(tmp.path().join("configs/late.yaml").exists());
    }

    /// Lay down `configs -> <tmp>/outside` with a victim file behind it.
    #[cfg(unix)]
    fn escape_link(tmp: &TempDir) -> (PathBuf, PathBuf) {
        let outside = tmp.path().join("outside");
        let dest = tmp.path().join("dest");
        fs::create_dir_all(&outside).unwrap();
        fs::create_dir_all(&dest).unwrap();
        fs::write(outside.join("victim"), "keep me").unwrap();

        let target = outside.to_str().unwrap();
        apply_layer(&layer(&[Item::Symlink("configs", target)])[..], &dest).unwrap();
        (dest, outside)
    }

    #[cfg(unix)]
    #[test]
    fn test_whiteout_through_symlink_is_refused() {
        let tmp = TempDir::new().unwrap();
        let (dest, outside) = escape_link(&tmp);

        let upper = layer(&[Item::Whiteout("configs/.wh.victim")]);
        let err = apply_layer(&upper[..], &dest).unwrap_err();
        assert!(matches!(err, CatalogError::OciImageError(_)));
        assert_eq!(fs::read_to_string(outside.join("victim")).unwrap(), "keep me");
    }

    #[cfg(unix)]
    #[test]
    fn test_opaque_whiteout_through_symlink_is_refused() {
        let tmp = TempDir::new().unwrap();
        let (dest, outside) = escape_link(&tmp);

        let upper = layer(&[Item::Whiteout("configs/.wh..wh..opq")]);
        assert!(apply_layer(&upper[..], &dest).is_err());
        assert!(outside.join("victim").is_file());
    }

    #[cfg(unix)]
    #[test]
    fn test_file_through_symlink_does_not_replace_outside_file() {
        let tmp = TempDir::new().unwrap();
        let (dest, outside) = escape_link(&tmp);

        let upper = layer(&[Item::File("configs/victim", b"overwritten")]);
        assert!(apply_layer(&upper[..], &dest).is_err());
        assert_eq!(fs::read_to_string(outside.join("victim")).unwrap(), "keep me");
    }

    #[cfg(unix)]
    #[test]
    fn test_whiteout_through_symlink_inside_root() {
        let tmp = TempDir::new().unwrap();
        let lower = layer(&[
            Item::File("configs/old.yaml", b"old"),
            Item::Symlink("current", "configs"),
        ]);
        let upper = layer(&[Item::Whiteout("current/.wh.old.yaml")]);

        apply_layer(&lower[..], tmp.path()).unwrap();
        apply_layer(&upper[..], tmp.path()).unwrap();
        assert!(!tmp.path().join("configs/old.yaml").exists());
        assert!(tmp.path().join("configs").is_dir());
    }

    #[test]
    fn test_whiteout_without_name_is_refused() {
        let tmp = TempDir::new().unwrap();
        fs::create_dir_all(tmp.path().join("configs")).unwrap();

        let upper = layer(&[Item::Whiteout("configs/.wh.")]);
        assert!(apply_layer(&upper[..], tmp.path()).is_err());
        assert!(tmp.path().join("configs").is_dir());
    }

    #[test]
    fn test_corrupt_layer_fails() {
        let tmp = TempDir::new().unwrap();
        let mut data = gzip(b"this is not a tar archive at all, just some bytes");
        data.truncate(data.len() / 2);
        assert!(apply_layer(&data[..], tmp.path()).is_err());
    }

    fn blob(dir: &Path, name: &str, data: &[u8]) -> LayerBlob {
        let path = dir.join(name);
        fs::write(&path, data).unwrap();
        LayerBlob {
            digest: ContentKey::sha256(&format!("{:0>64}", name)),
            size: data.len() as i64,
            media_type: "application/vnd.oci.image.layer.v1.tar+gzip".to_string(),
            path,
        }
    }

    #[test]
    fn test_apply_layers_in_manifest_order() {
        let tmp = TempDir::new().unwrap();
        let blobs = tmp.path().join("blobs");
        let dest = tmp.path().join("dest");
        fs::create_dir_all(&blobs).unwrap();
        fs::create_dir_all(&dest).unwrap();

        let a = blob(&blobs, "a", &layer(&[Item::File("configs/x.yaml", b"x")]));
        let b = blob(&blobs, "b", &layer(&[Item::Whiteout("configs/.wh.x.yaml")]));

        apply_layers(&[a, b], &dest, &ProgressEmitter::disabled(), &CancellationToken::new()).unwrap();
        assert!(!dest.join("configs/x.yaml").exists());
    }

    #[tokio::test]
    async fn test_apply_layers_announces_each_layer() {
        let tmp = TempDir::new().unwrap();
        let dest = tmp.path().join("dest");
        fs::create_dir_all(&dest).unwrap();
        let a = blob(tmp.path(), "a", &layer(&[Item::File("configs/x.yaml", b"x")]));
        let subject = subject_id(&a.digest);

        let bus = ProgressBus::new(256);
        let mut events = bus.subscribe();
        apply_layers(&[a], &dest, &bus.emitter(), &CancellationToken::new()).unwrap();
        bus.close();

        let mut kinds = Vec::new();
        while let Some(event) = events.recv().await {
            if event.kind == ProgressKind::Exit {
                break;
            }
            assert_eq!(event.task_id, tasks::UNPACK);
            assert_eq!(event.subject_id, subject);
            kinds.push(event.kind);
        }

        assert_eq!(kinds.first(), Some(&ProgressKind::NewTask));
        assert_eq!(kinds.last(), Some(&ProgressKind::Done));
        assert!(kinds[1..kinds.len() - 1]
            .iter()
            .all(|kind| *kind == ProgressKind::Progress));
        assert!(kinds.len() > 2);
    }

    #[test]
    fn test_apply_layers_cancelled() {
        let tmp = TempDir::new().unwrap();
        let a = blob(tmp.path(), "a", &layer(&[Item::File("x.yaml", b"x")]));
        let cancel = CancellationToken::new();
        cancel.cancel();

        let err = apply_layers(&[a], &tmp.path().join("dest"), &ProgressEmitter::disabled(), &cancel)
            .unwrap_err();
        assert!(matches!(err, CatalogError::Cancelled(_)));
    }
}
