//! File-backed store for declarative records.
//!
//! Each record is one YAML file at
//! `base/cluster/<group>/<version>/<kind>/<name>.yaml`. Writes go to a
//! temporary file first and are renamed into place, so readers never see a
//! half-written record. The kind of a record type comes from an explicit
//! [`Scheme`] passed in by the caller.

use std::any::{type_name, TypeId};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

use a3s_catalog_core::error::{CatalogError, Result};
use a3s_catalog_core::Catalog;
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::sync::CatalogStore;

/// Scope directory for records without a namespace.
const CLUSTER_SCOPE: &str = "cluster";

/// Identity of a record type on disk.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct GroupVersionKind {
    pub group: String,
    pub version: String,
    pub kind: String,
}

impl GroupVersionKind {
    pub fn new(group: &str, version: &str, kind: &str) -> Self {
        Self {
            group: group.to_string(),
            version: version.to_string(),
            kind: kind.to_string(),
        }
    }

    /// Kind under which [`Catalog`] records are stored.
    pub fn catalog() -> Self {
        Self::new("catalog.a3s.dev", "v1", "Catalog")
    }
}

impl std::fmt::Display for GroupVersionKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}, Kind={}", self.group, self.version, self.kind)
    }
}

/// A type that can be stored as a record.
pub trait Record: Serialize + DeserializeOwned + 'static {
    fn record_name(&self) -> &str;
}

impl Record for Catalog {
    fn record_name(&self) -> &str {
        &self.name
    }
}

/// Registry of record types and their kinds.
#[derive(Debug, Clone, Default)]
pub struct Scheme {
    kinds: HashMap<TypeId, GroupVersionKind>,
}

impl Scheme {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `T` under `gvk`, replacing any earlier registration.
    pub fn register<T: Record>(mut self, gvk: GroupVersionKind) -> Self {
        self.kinds.insert(TypeId::of::<T>(), gvk);
        self
    }

    /// Look up the kind registered for `T`.
    pub fn kind_of<T: Record>(&self) -> Result<&GroupVersionKind> {
        self.kinds.get(&TypeId::of::<T>()).ok_or_else(|| {
            CatalogError::ConfigError(format!(
                "Type {} is not registered in the scheme",
                type_name::<T>()
            ))
        })
    }
}

/// Directory of YAML records.
#[derive(Debug, Clone)]
pub struct RecordStore {
    base: PathBuf,
    scheme: Scheme,
}

impl RecordStore {
    pub fn new(base: &Path, scheme: Scheme) -> Self {
        Self {
            base: base.to_path_buf(),
            scheme,
        }
    }

    pub fn base(&self) -> &Path {
        &self.base
    }

    fn kind_dir<T: Record>(&self) -> Result<PathBuf> {
        let gvk = self.scheme.kind_of::<T>()?;
        Ok(self
            .base
            .join(CLUSTER_SCOPE)
            .join(&gvk.group)
            .join(&gvk.version)
            .join(&gvk.kind))
    }

    fn record_path<T: Record>(&self, name: &str) -> Result<PathBuf> {
        if name.is_empty() || name.starts_with('.') || name.contains(['/', '\\']) {
            return Err(CatalogError::StoreError(format!(
                "Invalid record name '{}'",
                name
            )));
        }
        Ok(self.kind_dir::<T>()?.join(format!("{}.yaml", name)))
    }

    /// Read the record called `name`, if any.
    pub fn get<T: Record>(&self, name: &str) -> Result<Option<T>> {
        let path = self.record_path::<T>(name)?;
        match std::fs::read_to_string(&path) {
            Ok(data) => Ok(Some(decode(&path, &data)?)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(CatalogError::StoreError(format!(
                "Failed to read {}: {}",
                path.display(),
                e
            ))),
        }
    }

    /// Every record of type `T`, ordered by name.
    pub fn list<T: Record>(&self) -> Result<Vec<T>> {
        let dir = self.kind_dir::<T>()?;
        let read_dir = match std::fs::read_dir(&dir) {
            Ok(read_dir) => read_dir,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => {
                return Err(CatalogError::StoreError(format!(
                    "Failed to read {}: {}",
                    dir.display(),
                    e
                )))
            }
        };

        let mut paths = Vec::new();
        for entry in read_dir {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) == Some("yaml") && path.is_file() {
                paths.push(path);
            }
        }
        paths.sort();

        let mut records = Vec::with_capacity(paths.len());
        for path in paths {
            let data = std::fs::read_to_string(&path)?;
            records.push(decode(&path, &data)?);
        }
        Ok(records)
    }

    /// Store a new record; fails if one with the same name exists.
    pub fn create<T: Record>(&self, record: &T) -> Result<()> {
        let path = self.record_path::<T>(record.record_name())?;
        if path.exists() {
            return Err(CatalogError::StoreError(format!(
                "Record already exists: {}",
                path.display()
            )));
        }
        write_atomic(&path, &serde_yaml::to_string(record)?)
    }

    /// Store a record, replacing any existing one.
    pub fn update<T: Record>(&self, record: &T) -> Result<()> {
        let path = self.record_path::<T>(record.record_name())?;
        write_atomic(&path, &serde_yaml::to_string(record)?)
    }

    /// Remove the record called `name`; a missing record is not an error.
    pub fn delete<T: Record>(&self, name: &str) -> Result<()> {
        let path = self.record_path::<T>(name)?;
        match std::fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(CatalogError::StoreError(format!(
                "Failed to remove {}: {}",
                path.display(),
                e
            ))),
        }
    }
}

impl CatalogStore for RecordStore {
    fn get(&self, name: &str) -> Result<Option<Catalog>> {
        RecordStore::get(self, name)
    }

    fn put(&self, catalog: &Catalog) -> Result<()> {
        self.update(catalog)
    }

    fn delete(&self, name: &str) -> Result<()> {
        RecordStore::delete::<Catalog>(self, name)
    }

    fn list(&self) -> Result<Vec<Catalog>> {
        RecordStore::list(self)
    }
}

fn decode<T: Record>(path: &Path, data: &str) -> Result<T> {
    serde_yaml::from_str(data).map_err(|e| {
        CatalogError::StoreError(format!("Failed to parse {}: {}", path.display(), e))
    })
}

fn write_atomic(path: &Path, data: &str) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(|e| {
            CatalogError::StoreError(format!(
                "Failed to create directory {}: {}",
                parent.display(),
                e
            ))
        })?;
    }

    let tmp_path = path.with_extension("yaml.tmp");
    std::fs::write(&tmp_path, data).map_err(|e| {
        CatalogError::StoreError(format!(
            "Failed to write tmp file {}: {}",
            tmp_path.display(),
            e
        ))
    })?;
    std::fs::rename(&tmp_path, path).map_err(|e| {
        let _ = std::fs::remove_file(&tmp_path);
        CatalogError::StoreError(format!(
            "Failed to rename {} → {}: {}",
            tmp_path.display(),
            path.display(),
            e
        ))
    })
}
