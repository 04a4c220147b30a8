//! A3S Catalog Core - Foundational Types
//!
//! Records, conditions, errors, configuration and the progress bus shared by
//! the catalog runtime and CLI.

pub mod catalog;
pub mod config;
pub mod error;
pub mod progress;

// Re-export commonly used types
pub use catalog::{
    Availability, Catalog, CatalogSpec, CatalogStatus, Condition, ConditionStatus, ContentKey,
    ResolvedSource, SourceDescriptor, SourceType,
};
pub use config::{CatalogConfig, HttpConfig, LogLevel, OciConfig};
pub use error::{CatalogError, ErrorKind, Result};
pub use progress::{ProgressBus, ProgressEmitter, ProgressEvent, ProgressKind, ProgressSubscription};

/// A3S Catalog version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
