//! On-disk catalog storage.
//!
//! - `ContentCache`: content-addressed, sealed, atomically published trees
//! - `FlatStore`: one flattened `catalog.json` per catalog
//! - `ContentTree`: read-only handle handed to consumers

pub mod content_cache;
pub mod flat_store;
pub mod seal;
pub mod tree;

pub use content_cache::{ContentCache, Staging};
pub use flat_store::FlatStore;
pub use tree::ContentTree;
