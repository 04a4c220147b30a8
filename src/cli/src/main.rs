//! A3S Catalog CLI entry point.

use clap::Parser;
use tracing_subscriber::EnvFilter;

use a3s_catalog_cli::commands::{dispatch, Cli};
use a3s_catalog_core::{CatalogError, ErrorKind};

/// Exit status for internal invariant violations (EX_SOFTWARE).
const EXIT_INVARIANT: i32 = 70;

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(cli.log_filter())),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    if let Err(e) = dispatch(cli).await {
        eprintln!("Error: {e}");
        let invariant = e
            .downcast_ref::<CatalogError>()
            .is_some_and(|e| e.kind() == ErrorKind::Invariant);
        std::process::exit(if invariant { EXIT_INVARIANT } else { 1 });
    }
}
