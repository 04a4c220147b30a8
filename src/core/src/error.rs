use thiserror::Error;

/// How the sync loop must react to a failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// The declared input is wrong; retrying without a change cannot succeed.
    Terminal,
    /// Transient condition; a later attempt may succeed.
    Retryable,
    /// Internal consistency violation; the caller must abort.
    Invariant,
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ErrorKind::Terminal => write!(f, "terminal"),
            ErrorKind::Retryable => write!(f, "retryable"),
            ErrorKind::Invariant => write!(f, "invariant"),
        }
    }
}

/// A3S Catalog error types
#[derive(Error, Debug)]
pub enum CatalogError {
    /// Image reference could not be parsed
    #[error("Invalid image reference: {0}")]
    InvalidReference(String),

    /// Catalog URL could not be parsed or joined
    #[error("Invalid URL {url}: {message}")]
    InvalidUrl { url: String, message: String },

    /// Declared source is malformed
    #[error("Invalid source: {0}")]
    InvalidSource(String),

    /// Trust policy refused the image
    #[error("Policy rejected {reference}: {message}")]
    PolicyRejected { reference: String, message: String },

    /// Container registry error
    #[error("Registry error: {registry} - {message}")]
    RegistryError { registry: String, message: String },

    /// Web server answered with a non-success status
    #[error("Download failed: {url} -> {status_code}")]
    HttpStatus { url: String, status_code: u16 },

    /// Transport failure while downloading
    #[error("Download error: {url} - {message}")]
    DownloadError { url: String, message: String },

    /// Downloaded content is not a valid declarative catalog
    #[error("Invalid catalog content: {0}")]
    InvalidContent(String),

    /// OCI image layout or layer error
    #[error("OCI image error: {0}")]
    OciImageError(String),

    /// Content cache error
    #[error("Cache error: {0}")]
    CacheError(String),

    /// Record store error
    #[error("Store error: {0}")]
    StoreError(String),

    /// Operation was cancelled by the caller
    #[error("Cancelled: {0}")]
    Cancelled(String),

    /// I/O error
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),

    /// Serialization error
    #[error("Serialization error: {0}")]
    SerializationError(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// Internal consistency violation
    #[error("Invariant violated: {0}")]
    Invariant(String),

    /// A failure whose cleanup also failed
    #[error("{error} (cleanup failed: {cleanup})")]
    WithCleanup {
        error: Box<CatalogError>,
        cleanup: Box<CatalogError>,
    },

    /// Generic error
    #[error("{0}")]
    Other(String),
}

impl CatalogError {
    /// Classify the error for the reconciler.
    pub fn kind(&self) -> ErrorKind {
        match self {
            CatalogError::InvalidReference(_)
            | CatalogError::InvalidUrl { .. }
            | CatalogError::InvalidSource(_)
            | CatalogError::PolicyRejected { .. }
            | CatalogError::ConfigError(_) => ErrorKind::Terminal,
            CatalogError::Invariant(_) => ErrorKind::Invariant,
            CatalogError::WithCleanup { error, .. } => error.kind(),
            _ => ErrorKind::Retryable,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.kind() == ErrorKind::Terminal
    }

    pub fn is_retryable(&self) -> bool {
        self.kind() == ErrorKind::Retryable
    }

    pub fn is_invariant(&self) -> bool {
        self.kind() == ErrorKind::Invariant
    }

    /// Attach the outcome of a cleanup step to this error.
    ///
    /// A successful cleanup leaves the error untouched; a failed one is
    /// joined so neither cause is lost.
    pub fn with_cleanup(self, cleanup: Result<()>) -> Self {
        match cleanup {
            Ok(()) => self,
            Err(cleanup) => CatalogError::WithCleanup {
                error: Box::new(self),
                cleanup: Box::new(cleanup),
            },
        }
    }
}

impl From<serde_json::Error> for CatalogError {
    fn from(err: serde_json::Error) -> Self {
        CatalogError::SerializationError(err.to_string())
    }
}

impl From<serde_yaml::Error> for CatalogError {
    fn from(err: serde_yaml::Error) -> Self {
        CatalogError::SerializationError(err.to_string())
    }
}

/// Result type alias for A3S Catalog operations
pub type Result<T> = std::result::Result<T, CatalogError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_reference_display() {
        let error = CatalogError::InvalidReference("Empty image reference".to_string());
        assert_eq!(
            error.to_string(),
            "Invalid image reference: Empty image reference"
        );
    }

    #[test]
    fn test_registry_error_display() {
        let error = CatalogError::RegistryError {
            registry: "quay.io".to_string(),
            message: "manifest unknown".to_string(),
        };
        assert_eq!(error.to_string(), "Registry error: quay.io - manifest unknown");
    }

    #[test]
    fn test_http_status_display() {
        let error = CatalogError::HttpStatus {
            url: "https://example.com/catalog.yaml".to_string(),
            status_code: 503,
        };
        assert_eq!(
            error.to_string(),
            "Download failed: https://example.com/catalog.yaml -> 503"
        );
    }

    #[test]
    fn test_terminal_classification() {
        assert!(CatalogError::InvalidReference("x".into()).is_terminal());
        assert!(CatalogError::InvalidSource("x".into()).is_terminal());
        assert!(CatalogError::InvalidUrl {
            url: "::".into(),
            message: "bad".into()
        }
        .is_terminal());
        assert!(CatalogError::PolicyRejected {
            reference: "r".into(),
            message: "rejected".into()
        }
        .is_terminal());
    }

    #[test]
    fn test_retryable_classification() {
        assert!(CatalogError::HttpStatus {
            url: "u".into(),
            status_code: 500
        }
        .is_retryable());
        assert!(CatalogError::InvalidContent("bad yaml".into()).is_retryable());
        assert!(CatalogError::Cancelled("fetch".into()).is_retryable());
        let io = std::io::Error::new(std::io::ErrorKind::Other, "disk");
        assert!(CatalogError::from(io).is_retryable());
    }

    #[test]
    fn test_invariant_classification() {
        let error = CatalogError::Invariant("file at entry path".into());
        assert!(error.is_invariant());
        assert_eq!(error.kind().to_string(), "invariant");
    }

    #[test]
    fn test_with_cleanup_ok_keeps_error() {
        let error = CatalogError::OciImageError("layer 2 corrupt".into()).with_cleanup(Ok(()));
        assert!(matches!(error, CatalogError::OciImageError(_)));
    }

    #[test]
    fn test_with_cleanup_joins_both_causes() {
        let error = CatalogError::InvalidReference("bad".into())
            .with_cleanup(Err(CatalogError::CacheError("busy".into())));
        let text = error.to_string();
        assert!(text.contains("Invalid image reference: bad"));
        assert!(text.contains("cleanup failed: Cache error: busy"));
        // Kind follows the original failure, not the cleanup.
        assert!(error.is_terminal());
    }

    #[test]
    fn test_from_serde_json_error() {
        let err: CatalogError = serde_json::from_str::<serde_json::Value>("{")
            .unwrap_err()
            .into();
        assert!(matches!(err, CatalogError::SerializationError(_)));
    }

    #[test]
    fn test_from_serde_yaml_error() {
        let err: CatalogError = serde_yaml::from_str::<serde_yaml::Value>("a: [")
            .unwrap_err()
            .into();
        assert!(matches!(err, CatalogError::SerializationError(_)));
    }
}
