//! `a3s-catalog add` command.

use a3s_catalog_core::Catalog;
use a3s_catalog_runtime::SyncOutcome;
use clap::Args;

use super::{catalog_id, parse_source, Context};

#[derive(Args)]
pub struct AddArgs {
    /// Catalog source: "oci://<image reference>" or an http(s) URL
    pub source: String,

    /// Re-fetch when older than this many minutes on `update`
    #[arg(long, value_name = "MINUTES")]
    pub poll_interval: Option<u32>,

    /// Only print the catalog id
    #[arg(short, long)]
    pub quiet: bool,
}

pub async fn execute(ctx: &Context, args: AddArgs) -> Result<(), Box<dyn std::error::Error>> {
    let source = parse_source(&args.source, args.poll_interval)?;
    let id = catalog_id(&args.source);

    let mut catalog = Catalog::new(&id, source);
    ctx.records.create(&catalog)?;

    if !args.quiet {
        println!("Adding {} as {}...", args.source, id);
    }
    let outcome = ctx.sync(&mut catalog, args.quiet).await?;

    if args.quiet {
        println!("{id}");
        return Ok(());
    }
    match outcome {
        SyncOutcome::Fetched { result, .. } => {
            println!("Added: {} ({})", id, result.message);
            if let Some(path) = ctx.flat.get(&id) {
                println!("Catalog: {}", path.display());
            }
        }
        other => println!("Added: {} ({:?})", id, other),
    }
    Ok(())
}
