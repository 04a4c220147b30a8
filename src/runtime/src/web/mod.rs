//! Web sources: a single declarative catalog file served over HTTP(S).

mod fetcher;

pub use fetcher::{catalog_url, WebFetcher};
