//! CLI command definitions and dispatch.

mod add;
mod get;
mod list;
mod remove;
mod update;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use a3s_catalog_core::{Catalog, CatalogConfig, CatalogError, ProgressBus, SourceDescriptor};
use a3s_catalog_runtime::{
    CatalogSync, ContentCache, FetchOptions, FlatStore, GroupVersionKind, RecordStore, Scheme,
    SourceRouter, SyncOutcome,
};
use clap::{Parser, Subcommand};
use sha2::{Digest, Sha256};
use tokio_util::sync::CancellationToken;

use crate::progress::ProgressRenderer;

/// Prefix selecting an image source on the command line.
const IMAGE_PREFIX: &str = "oci://";

/// A3S Catalog - fetch and cache operator catalogs from registries and web servers.
#[derive(Parser)]
#[command(name = "a3s-catalog", version, about)]
pub struct Cli {
    /// State directory (default: $A3S_CATALOG_HOME or ~/.a3s/catalog)
    #[arg(long, global = true)]
    pub home: Option<PathBuf>,

    /// Log progress details to stderr
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Command,
}

impl Cli {
    /// Default log directive when `RUST_LOG` is unset.
    pub fn log_filter(&self) -> String {
        if self.verbose {
            return "info".to_string();
        }
        load_config(self.home.as_deref())
            .map(|config| config.log_level.as_filter().to_string())
            .unwrap_or_else(|_| "warn".to_string())
    }
}

/// Available commands.
#[derive(Subcommand)]
pub enum Command {
    /// Add a catalog source and fetch it
    Add(add::AddArgs),
    /// Re-fetch one or more catalogs
    Update(update::UpdateArgs),
    /// List catalogs
    List(list::ListArgs),
    /// Print a cached catalog
    Get(get::GetArgs),
    /// Remove catalogs and their cached content
    Remove(remove::RemoveArgs),
}

/// Dispatch a parsed CLI to the appropriate command handler.
pub async fn dispatch(cli: Cli) -> Result<(), Box<dyn std::error::Error>> {
    let ctx = Context::open(cli.home.as_deref())?;
    match cli.command {
        Command::Add(args) => add::execute(&ctx, args).await,
        Command::Update(args) => update::execute(&ctx, args).await,
        Command::List(args) => list::execute(&ctx, args).await,
        Command::Get(args) => get::execute(&ctx, args).await,
        Command::Remove(args) => remove::execute(&ctx, args).await,
    }
}

fn load_config(home: Option<&Path>) -> a3s_catalog_core::Result<CatalogConfig> {
    match home {
        Some(home) => CatalogConfig::load(home),
        None => CatalogConfig::load_default(),
    }
}

/// Stores shared by every command.
pub struct Context {
    pub config: CatalogConfig,
    pub records: Arc<RecordStore>,
    pub flat: FlatStore,
    sync: CatalogSync,
}

impl Context {
    pub fn open(home: Option<&Path>) -> a3s_catalog_core::Result<Self> {
        let config = load_config(home)?;
        let cache = ContentCache::new(&config.unpack_dir())?;
        let records = Arc::new(RecordStore::new(
            &config.records_dir(),
            Scheme::new().register::<Catalog>(GroupVersionKind::catalog()),
        ));
        let flat = FlatStore::new(&config.flat_dir())?;
        let router = SourceRouter::from_config(&config)?;
        let sync = CatalogSync::new(records.clone(), router, cache);

        Ok(Self {
            config,
            records,
            flat,
            sync,
        })
    }

    /// Load a catalog record by id.
    pub fn catalog(&self, id: &str) -> a3s_catalog_core::Result<Catalog> {
        self.records
            .get::<Catalog>(id)?
            .ok_or_else(|| CatalogError::ConfigError(format!("No such catalog: {}", id)))
    }

    /// Sync one catalog and persist its record.
    ///
    /// The record is written even when the sync fails so the failure shows up
    /// in its conditions. Freshly fetched content is flattened into
    /// `catalog.json`.
    pub async fn sync(&self, catalog: &mut Catalog, quiet: bool) -> a3s_catalog_core::Result<SyncOutcome> {
        let bus = ProgressBus::new(self.config.progress_capacity);
        let renderer = (!quiet).then(|| ProgressRenderer::new().spawn(bus.subscribe()));

        let cancel = CancellationToken::new();
        let interrupt = {
            let cancel = cancel.clone();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    cancel.cancel();
                }
            })
        };

        let options = FetchOptions::new(bus.emitter(), cancel);
        let result = self.sync.sync(catalog, &options).await;

        interrupt.abort();
        bus.close();
        if let Some(renderer) = renderer {
            let _ = renderer.await;
        }

        let persisted = self.records.update(catalog);
        let outcome = result?;
        persisted?;

        match &outcome {
            SyncOutcome::Fetched { result, .. } => {
                let documents = self.flat.store(&catalog.name, &result.content)?;
                tracing::info!(name = %catalog.name, documents, "Flattened catalog");
            }
            SyncOutcome::Unavailable => self.flat.delete(&catalog.name)?,
            SyncOutcome::Blocked | SyncOutcome::UpToDate => {}
        }
        Ok(outcome)
    }

    /// Remove cached content, the flattened file and the record.
    pub async fn remove(&self, catalog: &Catalog) -> a3s_catalog_core::Result<()> {
        self.sync.delete(catalog).await?;
        self.flat.delete(&catalog.name)
    }
}

/// Stable short id for a source location.
pub fn catalog_id(location: &str) -> String {
    let digest = hex::encode(Sha256::digest(location.as_bytes()));
    digest[..8].to_string()
}

/// Parse a command-line source.
///
/// `oci://<reference>` selects an image source; `http://` and `https://`
/// URLs select a web source.
pub fn parse_source(
    source: &str,
    poll_interval_minutes: Option<u32>,
) -> a3s_catalog_core::Result<SourceDescriptor> {
    if let Some(reference) = source.strip_prefix(IMAGE_PREFIX) {
        if reference.is_empty() {
            return Err(CatalogError::InvalidSource(format!(
                "Missing image reference in '{}'",
                source
            )));
        }
        return Ok(SourceDescriptor::Image {
            reference: reference.to_string(),
            poll_interval_minutes,
        });
    }
    if source.starts_with("http://") || source.starts_with("https://") {
        return Ok(SourceDescriptor::Web {
            url: source.to_string(),
            poll_interval_minutes,
        });
    }
    Err(CatalogError::InvalidSource(format!(
        "Unsupported source '{}': expected {}<image> or an http(s) URL",
        source, IMAGE_PREFIX
    )))
}
