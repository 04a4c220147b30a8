//! Image reference parsing and canonicalization.
//!
//! Parses references like `quay.io/operatorhubio/catalog:latest` and pins
//! them to a digest (`quay.io/operatorhubio/catalog@sha256:...`).

use a3s_catalog_core::error::{CatalogError, Result};
use a3s_catalog_core::ContentKey;

const DEFAULT_REGISTRY: &str = "docker.io";
const DEFAULT_TAG: &str = "latest";

/// Parsed image reference.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageReference {
    /// Registry hostname, with port if any
    pub registry: String,
    /// Repository path (e.g., "library/busybox", "operatorhubio/catalog")
    pub repository: String,
    pub tag: Option<String>,
    pub digest: Option<ContentKey>,
}

impl ImageReference {
    /// Parse a reference string.
    ///
    /// - `catalog` → docker.io/library/catalog:latest
    /// - `org/catalog:v4.15` → docker.io/org/catalog:v4.15
    /// - `localhost:5000/catalog` → localhost:5000/catalog:latest
    /// - `quay.io/org/catalog@sha256:…` → pinned, no tag
    pub fn parse(reference: &str) -> Result<Self> {
        let reference = reference.trim();
        if reference.is_empty() {
            return Err(CatalogError::InvalidReference(
                "Empty image reference".to_string(),
            ));
        }
        if reference.chars().any(char::is_whitespace) {
            return Err(CatalogError::InvalidReference(format!(
                "Whitespace in image reference '{}'",
                reference
            )));
        }

        let (name_tag, digest) = match reference.rsplit_once('@') {
            Some((name_tag, digest)) => (name_tag, Some(ContentKey::parse(digest)?)),
            None => (reference, None),
        };

        let (name, tag) = split_tag(name_tag);
        if let Some(tag) = &tag {
            if tag.is_empty() {
                return Err(CatalogError::InvalidReference(format!(
                    "Empty tag in reference '{}'",
                    reference
                )));
            }
        }

        let (registry, repository) = split_registry_repository(name)?;
        let tag = match (&tag, &digest) {
            (None, None) => Some(DEFAULT_TAG.to_string()),
            _ => tag,
        };

        Ok(Self {
            registry,
            repository,
            tag,
            digest,
        })
    }

    /// Whether this reference already names immutable content.
    pub fn is_canonical(&self) -> bool {
        self.digest.is_some()
    }

    /// `registry/repository` without tag or digest.
    pub fn name(&self) -> String {
        format!("{}/{}", self.registry, self.repository)
    }

    /// The same repository pinned to `digest`, tag dropped.
    pub fn canonical(&self, digest: ContentKey) -> Self {
        Self {
            registry: self.registry.clone(),
            repository: self.repository.clone(),
            tag: None,
            digest: Some(digest),
        }
    }

    pub fn full_reference(&self) -> String {
        let mut s = self.name();
        if let Some(tag) = &self.tag {
            s.push(':');
            s.push_str(tag);
        }
        if let Some(digest) = &self.digest {
            s.push('@');
            s.push_str(digest.as_str());
        }
        s
    }

    /// Convert to the registry client's reference type.
    ///
    /// A digest, when present, takes precedence over the tag.
    pub fn to_oci_reference(&self) -> Result<oci_distribution::Reference> {
        let ref_str = match &self.digest {
            Some(digest) => format!("{}@{}", self.name(), digest),
            None => self.full_reference(),
        };
        ref_str
            .parse()
            .map_err(|e| CatalogError::InvalidReference(format!("'{}': {}", ref_str, e)))
    }
}

impl std::fmt::Display for ImageReference {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.full_reference())
    }
}

/// Split `name[:tag]`, where a colon only starts a tag after the last slash.
/// `host:5000` with no slash is a registry port, not a tag.
fn split_tag(name_tag: &str) -> (&str, Option<String>) {
    let last_segment_start = name_tag.rfind('/').map(|p| p + 1).unwrap_or(0);
    let last_segment = &name_tag[last_segment_start..];
    match last_segment.rfind(':') {
        Some(colon) => {
            let tag = &last_segment[colon + 1..];
            if last_segment_start == 0 && !tag.is_empty() && tag.chars().all(|c| c.is_ascii_digit()) {
                return (name_tag, None);
            }
            (
                &name_tag[..last_segment_start + colon],
                Some(tag.to_string()),
            )
        }
        None => (name_tag, None),
    }
}

/// Detect a registry host in the first path segment.
fn split_registry_repository(name: &str) -> Result<(String, String)> {
    if let Some((first, rest)) = name.split_once('/') {
        if first.contains('.') || first.contains(':') || first == "localhost" {
            if rest.is_empty() {
                return Err(CatalogError::InvalidReference(format!(
                    "Empty repository in reference '{}'",
                    name
                )));
            }
            return Ok((first.to_string(), rest.to_string()));
        }
    }

    if name.is_empty() || name.starts_with('/') || name.ends_with('/') || name.contains("//") {
        return Err(CatalogError::InvalidReference(format!(
            "Invalid repository '{}'",
            name
        )));
    }

    let repository = if name.contains('/') {
        name.to_string()
    } else {
        format!("library/{}", name)
    };
    Ok((DEFAULT_REGISTRY.to_string(), repository))
}

#[cfg(test)]
mod tests {
    use super::*;

    const DIGEST: &str = "sha256:0123456789abcdef0123456789abcdef0123456789abcdef0123456789abcdef";

    #[test]
    fn test_parse_simple_name() {
        let r = ImageReference::parse("catalog").unwrap();
        assert_eq!(r.registry, "docker.io");
        assert_eq!(r.repository, "library/catalog");
        assert_eq!(r.tag.as_deref(), Some("latest"));
        assert!(!r.is_canonical());
    }

    #[test]
    fn test_parse_registry_with_tag() {
        let r = ImageReference::parse("quay.io/operatorhubio/catalog:v4.15").unwrap();
        assert_eq!(r.registry, "quay.io");
        assert_eq!(r.repository, "operatorhubio/catalog");
        assert_eq!(r.tag.as_deref(), Some("v4.15"));
    }

    #[test]
    fn test_parse_registry_port() {
        let r = ImageReference::parse("localhost:5000/catalog").unwrap();
        assert_eq!(r.registry, "localhost:5000");
        assert_eq!(r.repository, "catalog");
        assert_eq!(r.tag.as_deref(), Some("latest"));

        let r = ImageReference::parse("registry.local:5000/team/catalog:dev").unwrap();
        assert_eq!(r.registry, "registry.local:5000");
        assert_eq!(r.tag.as_deref(), Some("dev"));
    }

    #[test]
    fn test_parse_digest() {
        let r = ImageReference::parse(&format!("quay.io/org/catalog@{}", DIGEST)).unwrap();
        assert!(r.is_canonical());
        assert_eq!(r.tag, None);
        assert_eq!(r.digest.as_ref().unwrap().as_str(), DIGEST);
    }

    #[test]
    fn test_parse_tag_and_digest() {
        let r = ImageReference::parse(&format!("quay.io/org/catalog:v1@{}", DIGEST)).unwrap();
        assert_eq!(r.tag.as_deref(), Some("v1"));
        assert!(r.is_canonical());
    }

    #[test]
    fn test_parse_invalid() {
        assert!(ImageReference::parse("").is_err());
        assert!(ImageReference::parse("quay.io/").is_err());
        assert!(ImageReference::parse("catalog@nodigest").is_err());
        assert!(ImageReference::parse("catalog:").is_err());
        assert!(ImageReference::parse("a b").is_err());
        assert!(ImageReference::parse("").unwrap_err().is_terminal());
    }

    #[test]
    fn test_canonical_drops_tag() {
        let r = ImageReference::parse("quay.io/org/catalog:latest").unwrap();
        let pinned = r.canonical(ContentKey::parse(DIGEST).unwrap());
        assert_eq!(pinned.full_reference(), format!("quay.io/org/catalog@{}", DIGEST));
    }

    #[test]
    fn test_to_oci_reference() {
        let r = ImageReference::parse("quay.io/org/catalog:v1").unwrap();
        let oci = r.to_oci_reference().unwrap();
        assert_eq!(oci.registry(), "quay.io");
        assert_eq!(oci.repository(), "org/catalog");
        assert_eq!(oci.tag(), Some("v1"));
    }

    #[test]
    fn test_display() {
        let r = ImageReference::parse("busybox").unwrap();
        assert_eq!(r.to_string(), "docker.io/library/busybox:latest");
    }
}
