use std::sync::Arc;

use anyhow::Context as _;

use crate::catalog::{CatalogEntry, CatalogStore, LocalFsCatalog};
use crate::cli::{DeleteArgs, FindArgs, LibraryCommand};
use crate::config::Config;

pub async fn run(config: Arc<Config>, command: LibraryCommand) -> anyhow::Result<()> {
    let catalog = LocalFsCatalog::new(&config.output_root);
    match command {
        LibraryCommand::List => {
            let entries = catalog.list_all().await.context("list catalog")?;
            if entries.is_empty() {
                println!("library is empty");
            }
            print_entries(&entries);
        }
        LibraryCommand::Find(args) => find(&catalog, args).await?,
        LibraryCommand::Delete(args) => delete(&catalog, args).await?,
    }
    Ok(())
}

async fn find(catalog: &dyn CatalogStore, args: FindArgs) -> anyhow::Result<()> {
    let entries = catalog
        .find_by_name(&args.query, !args.exact)
        .await
        .context("search catalog")?;
    if entries.is_empty() {
        println!("no titles match {:?}", args.query);
    }
    print_entries(&entries);
    Ok(())
}

/// Forgets `title` and, unless asked to keep it, removes its artifact. A
/// missing artifact file is not an error.
pub async fn delete(catalog: &dyn CatalogStore, args: DeleteArgs) -> anyhow::Result<()> {
    let Some(entry) = catalog.delete(&args.title).await.context("update catalog")? else {
        anyhow::bail!("not in library: {}", args.title);
    };

    if !args.keep_file {
        match tokio::fs::remove_file(&entry.path).await {
            Ok(()) => {}
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                tracing::warn!(path = %entry.path.display(), "artifact already gone");
            }
            Err(err) => {
                return Err(err)
                    .with_context(|| format!("remove artifact: {}", entry.path.display()));
            }
        }
    }
    println!("deleted {}", entry.title);
    Ok(())
}

fn print_entries(entries: &[CatalogEntry]) {
    for (index, entry) in entries.iter().enumerate() {
        println!(
            "{}. {}  {}  ({})",
            index + 1,
            entry.title,
            entry.path.display(),
            entry.created_at.format("%Y-%m-%d %H:%M")
        );
    }
}
