//! `a3s-catalog list` command.

use a3s_catalog_core::Catalog;
use clap::Args;

use crate::output;

use super::Context;

#[derive(Args)]
pub struct ListArgs {
    /// Only show catalog ids (one per line)
    #[arg(short, long)]
    pub quiet: bool,
}

pub async fn execute(ctx: &Context, args: ListArgs) -> Result<(), Box<dyn std::error::Error>> {
    let catalogs = ctx.records.list::<Catalog>()?;

    if args.quiet {
        for catalog in &catalogs {
            println!("{}", catalog.name);
        }
        return Ok(());
    }

    let mut table = output::new_table(&["ID", "TYPE", "SOURCE", "DIGEST", "STATE", "POLL", "UPDATED"]);
    for catalog in &catalogs {
        let source = &catalog.spec.source;
        let poll = source
            .poll_interval()
            .map(|d| format!("{}m", d.num_minutes()))
            .unwrap_or_else(|| "-".to_string());
        let digest = catalog
            .status
            .resolved_source
            .as_ref()
            .and_then(|resolved| resolved.content_key().ok())
            .map(|key| key.short().to_string())
            .unwrap_or_else(|| "-".to_string());
        let updated = catalog
            .status
            .last_unpacked
            .as_ref()
            .map(output::format_ago)
            .unwrap_or_else(|| "never".to_string());
        table.add_row(vec![
            catalog.name.clone(),
            source.source_type().to_string(),
            source.location().to_string(),
            digest,
            output::catalog_state(catalog),
            poll,
            updated,
        ]);
    }

    println!("{table}");
    Ok(())
}
