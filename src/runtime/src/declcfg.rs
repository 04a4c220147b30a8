//! Minimal reader for file-based catalog documents.
//!
//! A catalog file is either a YAML multi-document stream or a stream of
//! concatenated JSON objects. Every document must be an object carrying a
//! non-empty string `schema`. Walking packages, channels and bundles is left
//! to consumers; this module only checks shape and splits documents.

use std::path::Path;

use a3s_catalog_core::error::{CatalogError, Result};
use serde::Deserialize;
use serde_json::Value;

/// Name of the catalog file served by web sources.
pub const CATALOG_FILE: &str = "catalog.yaml";

/// Whether a path looks like a declarative catalog file.
pub fn is_catalog_file(path: &Path) -> bool {
    matches!(
        path.extension().and_then(|e| e.to_str()),
        Some("yaml") | Some("yml") | Some("json")
    )
}

/// Parse every document in `data`, checking each has a `schema`.
pub fn parse_documents(data: &[u8]) -> Result<Vec<Value>> {
    let first = data.iter().find(|b| !b.is_ascii_whitespace());
    let documents = match first {
        None => Vec::new(),
        Some(b'{') => parse_json_stream(data)?,
        Some(_) => parse_yaml_stream(data)?,
    };

    for (index, document) in documents.iter().enumerate() {
        check_schema(index, document)?;
    }
    Ok(documents)
}

/// Check `data` is a non-empty, well-formed catalog.
pub fn validate(data: &[u8]) -> Result<usize> {
    let documents = parse_documents(data)?;
    if documents.is_empty() {
        return Err(CatalogError::InvalidContent(
            "Catalog contains no documents".to_string(),
        ));
    }
    Ok(documents.len())
}

fn parse_json_stream(data: &[u8]) -> Result<Vec<Value>> {
    let mut documents = Vec::new();
    for document in serde_json::Deserializer::from_slice(data).into_iter::<Value>() {
        let document =
            document.map_err(|e| CatalogError::InvalidContent(format!("Invalid JSON: {}", e)))?;
        documents.push(document);
    }
    Ok(documents)
}

fn parse_yaml_stream(data: &[u8]) -> Result<Vec<Value>> {
    let mut documents = Vec::new();
    for document in serde_yaml::Deserializer::from_slice(data) {
        let value = Value::deserialize(document)
            .map_err(|e| CatalogError::InvalidContent(format!("Invalid YAML: {}", e)))?;
        if value.is_null() {
            // Empty document between separators.
            continue;
        }
        documents.push(value);
    }
    Ok(documents)
}

fn check_schema(index: usize, document: &Value) -> Result<()> {
    let object = document.as_object().ok_or_else(|| {
        CatalogError::InvalidContent(format!("Document {} is not an object", index))
    })?;
    match object.get("schema").and_then(Value::as_str) {
        Some(schema) if !schema.is_empty() => Ok(()),
        _ => Err(CatalogError::InvalidContent(format!(
            "Document {} has no schema",
            index
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const YAML_CATALOG: &str = r#"---
schema: olm.package
name: etcd
defaultChannel: stable
---
schema: olm.channel
package: etcd
name: stable
entries:
  - name: etcd.v0.9.4
"#;

    #[test]
    fn test_parse_yaml_stream() {
        let documents = parse_documents(YAML_CATALOG.as_bytes()).unwrap();
        assert_eq!(documents.len(), 2);
        assert_eq!(documents[0]["schema"], "olm.package");
        assert_eq!(documents[1]["name"], "stable");
    }

    #[test]
    fn test_parse_json_stream() {
        let data = br#"{"schema":"olm.package","name":"etcd"}
{"schema":"olm.bundle","name":"etcd.v0.9.4","package":"etcd"}"#;
        let documents = parse_documents(data).unwrap();
        assert_eq!(documents.len(), 2);
        assert_eq!(documents[1]["package"], "etcd");
    }

    #[test]
    fn test_missing_schema_is_invalid() {
        let err = parse_documents(b"name: etcd\n").unwrap_err();
        assert!(matches!(err, CatalogError::InvalidContent(_)));
        assert!(err.is_retryable());
    }

    #[test]
    fn test_non_object_document_is_invalid() {
        assert!(parse_documents(b"- a\n- b\n").is_err());
    }

    #[test]
    fn test_malformed_yaml_is_invalid() {
        assert!(parse_documents(b"schema: [unterminated\n").is_err());
    }

    #[test]
    fn test_validate_rejects_empty() {
        assert!(validate(b"  \n").is_err());
        assert_eq!(validate(YAML_CATALOG.as_bytes()).unwrap(), 2);
    }

    #[test]
    fn test_is_catalog_file() {
        assert!(is_catalog_file(Path::new("configs/etcd/catalog.yaml")));
        assert!(is_catalog_file(Path::new("index.json")));
        assert!(!is_catalog_file(Path::new("README.md")));
    }
}
