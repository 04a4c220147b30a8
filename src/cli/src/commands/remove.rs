//! `a3s-catalog remove` command.

use clap::Args;

use super::Context;

#[derive(Args)]
pub struct RemoveArgs {
    /// Catalog ids to remove
    #[arg(required = true)]
    pub ids: Vec<String>,

    /// Ignore catalogs that do not exist
    #[arg(short, long)]
    pub force: bool,
}

pub async fn execute(ctx: &Context, args: RemoveArgs) -> Result<(), Box<dyn std::error::Error>> {
    let mut errors: Vec<String> = Vec::new();

    for id in &args.ids {
        let catalog = match ctx.catalog(id) {
            Ok(catalog) => catalog,
            Err(_) if args.force => continue,
            Err(e) => {
                errors.push(format!("{id}: {e}"));
                continue;
            }
        };
        match ctx.remove(&catalog).await {
            Ok(()) => println!("Removed: {id}"),
            Err(e) => errors.push(format!("{id}: {e}")),
        }
    }

    if errors.is_empty() {
        Ok(())
    } else {
        let msg = errors.join("\n");
        Err(format!("Failed to remove catalog(s):\n{msg}").into())
    }
}
