//! Image trust policy.
//!
//! The policy decides which images may be pulled and with which registry
//! settings. When no policy file exists the permissive accept-anything
//! policy applies. That keeps a fresh install usable; production setups
//! should ship a policy file.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use a3s_catalog_core::error::{CatalogError, Result};
use serde::{Deserialize, Serialize};

use super::reference::ImageReference;
use super::registry::RegistryAuth;

/// One requirement an image must satisfy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Requirement {
    #[serde(rename = "insecureAcceptAnything")]
    InsecureAcceptAnything,
    #[serde(rename = "reject")]
    Reject,
    /// Signature requirement; recognized but not verifiable here.
    #[serde(rename = "signedBy")]
    SignedBy {
        #[serde(default, rename = "keyPath")]
        key_path: Option<String>,
    },
}

/// Policy document: a default plus per-scope overrides.
///
/// A scope is a registry host, a `registry/repository` prefix, or a full
/// repository name; the longest matching scope wins.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PolicyDocument {
    pub default: Vec<Requirement>,
    #[serde(default)]
    pub scopes: HashMap<String, Vec<Requirement>>,
}

impl PolicyDocument {
    /// Accept every image.
    pub fn accept_anything() -> Self {
        Self {
            default: vec![Requirement::InsecureAcceptAnything],
            scopes: HashMap::new(),
        }
    }

    /// Requirements that apply to `reference`.
    pub fn requirements_for(&self, reference: &ImageReference) -> &[Requirement] {
        let name = reference.name();
        self.scopes
            .iter()
            .filter(|(scope, _)| {
                name == **scope
                    || name
                        .strip_prefix(scope.as_str())
                        .map(|rest| rest.starts_with('/'))
                        .unwrap_or(false)
            })
            .max_by_key(|(scope, _)| scope.len())
            .map(|(_, requirements)| requirements.as_slice())
            .unwrap_or(&self.default)
    }

    /// Check that `reference` may be pulled.
    ///
    /// All requirements must hold; an empty list rejects.
    pub fn check(&self, reference: &ImageReference) -> Result<()> {
        let requirements = self.requirements_for(reference);
        if requirements.is_empty() {
            return Err(CatalogError::PolicyRejected {
                reference: reference.to_string(),
                message: "no requirements configured".to_string(),
            });
        }
        for requirement in requirements {
            match requirement {
                Requirement::InsecureAcceptAnything => {}
                Requirement::Reject => {
                    return Err(CatalogError::PolicyRejected {
                        reference: reference.to_string(),
                        message: "rejected by policy".to_string(),
                    })
                }
                Requirement::SignedBy { .. } => {
                    return Err(CatalogError::PolicyRejected {
                        reference: reference.to_string(),
                        message: "signature verification is not supported".to_string(),
                    })
                }
            }
        }
        Ok(())
    }
}

/// Everything a pull needs besides the reference.
#[derive(Debug, Clone)]
pub struct FetchContext {
    pub policy: PolicyDocument,
    pub auth: RegistryAuth,
    /// Registries reached over plain HTTP
    pub insecure_registries: Vec<String>,
}

impl FetchContext {
    pub fn permissive() -> Self {
        Self {
            policy: PolicyDocument::accept_anything(),
            auth: RegistryAuth::anonymous(),
            insecure_registries: Vec::new(),
        }
    }
}

/// Pluggable provider of the system fetch context.
pub trait TrustPolicy: Send + Sync {
    fn fetch_context(&self) -> Result<FetchContext>;
}

/// Policy loaded from a JSON file on each pull.
#[derive(Debug, Clone)]
pub struct PolicyFile {
    path: PathBuf,
    insecure_registries: Vec<String>,
}

impl PolicyFile {
    pub fn new(path: &Path, insecure_registries: Vec<String>) -> Self {
        Self {
            path: path.to_path_buf(),
            insecure_registries,
        }
    }

    fn load(&self) -> Result<PolicyDocument> {
        match std::fs::read_to_string(&self.path) {
            Ok(data) => serde_json::from_str(&data).map_err(|e| {
                CatalogError::ConfigError(format!(
                    "Invalid policy file {}: {}",
                    self.path.display(),
                    e
                ))
            }),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::warn!(
                    path = %self.path.display(),
                    "No trust policy file, accepting any image"
                );
                Ok(PolicyDocument::accept_anything())
            }
            Err(e) => Err(CatalogError::ConfigError(format!(
                "Failed to read policy file {}: {}",
                self.path.display(),
                e
            ))),
        }
    }
}

impl TrustPolicy for PolicyFile {
    fn fetch_context(&self) -> Result<FetchContext> {
        Ok(FetchContext {
            policy: self.load()?,
            auth: RegistryAuth::from_env(),
            insecure_registries: self.insecure_registries.clone(),
        })
    }
}

/// Fixed context, for embedding and tests.
#[derive(Debug, Clone)]
pub struct StaticPolicy(pub FetchContext);

impl TrustPolicy for StaticPolicy {
    fn fetch_context(&self) -> Result<FetchContext> {
        Ok(self.0.clone())
    }
}
