//! OCI image sources.
//!
//! Catalog images are pulled into a temporary OCI image layout, then their
//! layers are applied in order onto a staging directory of the content
//! cache.
//!
//! ```text
//! layout/
//! ├── oci-layout           (OCI layout marker)
//! ├── index.json           (Image index)
//! └── blobs/
//!     └── sha256/
//!         ├── <manifest>   (Image manifest)
//!         ├── <config>     (Image configuration)
//!         └── <layers>     (Filesystem layers)
//! ```

mod fetcher;
pub mod layers;
pub mod layout;
pub mod policy;
pub mod reference;
pub mod registry;

pub use fetcher::OciFetcher;
pub use layers::{apply_layer, apply_layers, detect_compression, Compression};
pub use layout::{ImageLayout, LayerBlob};
pub use policy::{FetchContext, PolicyDocument, PolicyFile, Requirement, StaticPolicy, TrustPolicy};
pub use reference::ImageReference;
pub use registry::{RegistryAuth, RegistryClient};
