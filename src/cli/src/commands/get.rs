//! `a3s-catalog get` command.

use std::io::Write;

use a3s_catalog_core::CatalogError;
use clap::{Args, ValueEnum};

use super::Context;

#[derive(Clone, Copy, ValueEnum)]
pub enum GetOutput {
    /// Flattened catalog documents, one JSON object per line
    Content,
    /// Path of the flattened catalog file
    Path,
    /// The catalog record with its status, as YAML
    Record,
}

#[derive(Args)]
pub struct GetArgs {
    /// Catalog id
    pub id: String,

    /// What to print
    #[arg(short, long, value_enum, default_value = "content")]
    pub output: GetOutput,
}

pub async fn execute(ctx: &Context, args: GetArgs) -> Result<(), Box<dyn std::error::Error>> {
    let catalog = ctx.catalog(&args.id)?;

    if let GetOutput::Record = args.output {
        print!("{}", serde_yaml::to_string(&catalog)?);
        return Ok(());
    }

    let path = ctx.flat.get(&catalog.name).ok_or_else(|| {
        CatalogError::CacheError(format!(
            "Catalog {} has no content; run `a3s-catalog update {}`",
            catalog.name, catalog.name
        ))
    })?;

    match args.output {
        GetOutput::Path => println!("{}", path.display()),
        _ => {
            let data = std::fs::read(&path)?;
            std::io::stdout().write_all(&data)?;
        }
    }
    Ok(())
}
