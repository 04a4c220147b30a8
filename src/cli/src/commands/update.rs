//! `a3s-catalog update` command.
//!
//! Bumps each catalog's generation so it is fetched again, regardless of its
//! poll interval. With `--due`, only catalogs whose poll interval elapsed are
//! fetched.

use a3s_catalog_core::Catalog;
use a3s_catalog_runtime::SyncOutcome;
use clap::Args;

use super::Context;

#[derive(Args)]
pub struct UpdateArgs {
    /// Catalog ids (default: all)
    pub ids: Vec<String>,

    /// Only fetch catalogs whose poll interval has elapsed
    #[arg(long)]
    pub due: bool,

    /// Suppress progress output
    #[arg(short, long)]
    pub quiet: bool,
}

pub async fn execute(ctx: &Context, args: UpdateArgs) -> Result<(), Box<dyn std::error::Error>> {
    let catalogs: Vec<Catalog> = if args.ids.is_empty() {
        ctx.records.list::<Catalog>()?
    } else {
        args.ids
            .iter()
            .map(|id| ctx.catalog(id))
            .collect::<Result<_, _>>()?
    };

    let mut errors: Vec<String> = Vec::new();

    for mut catalog in catalogs {
        if !args.due {
            catalog.generation += 1;
        }
        match ctx.sync(&mut catalog, args.quiet).await {
            Ok(SyncOutcome::Fetched { result, .. }) => {
                println!("Updated: {} ({})", catalog.name, result.message);
            }
            Ok(SyncOutcome::UpToDate) => {
                if !args.quiet {
                    println!("Up to date: {}", catalog.name);
                }
            }
            Ok(SyncOutcome::Blocked) => {
                println!("Blocked: {} (change the source to retry)", catalog.name);
            }
            Ok(SyncOutcome::Unavailable) => {
                if !args.quiet {
                    println!("Unavailable: {}", catalog.name);
                }
            }
            Err(e) => {
                tracing::warn!(name = %catalog.name, error = %e, "Catalog update failed");
                errors.push(format!("{}: {e}", catalog.name));
            }
        }
    }

    if errors.is_empty() {
        Ok(())
    } else {
        let msg = errors.join("\n");
        Err(format!("Failed to update catalog(s):\n{msg}").into())
    }
}
