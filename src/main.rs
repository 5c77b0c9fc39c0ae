use std::process::ExitCode;
use std::sync::Arc;

use anyhow::Context as _;
use clap::Parser as _;
use manga_library::cli::{Cli, Command};

#[tokio::main]
async fn main() -> ExitCode {
    if let Err(err) = try_main().await {
        eprintln!("{err:#}");
        return ExitCode::FAILURE;
    }

    ExitCode::SUCCESS
}

async fn try_main() -> anyhow::Result<()> {
    manga_library::logging::init().context("init logging")?;

    let cli = Cli::parse();
    tracing::debug!(?cli, "parsed cli");

    let mut config = manga_library::config::Config::from_env().context("load config")?;
    cli.overrides.apply(&mut config);
    let config = Arc::new(config);

    match cli.command {
        Command::Search(args) => {
            manga_library::search::run(config, args)
                .await
                .context("search")?;
        }
        Command::Download(args) => {
            manga_library::build::download(config, args)
                .await
                .context("download")?;
        }
        Command::Assemble(args) => {
            manga_library::build::assemble(config, args)
                .await
                .context("assemble")?;
        }
        Command::Library { command } => {
            manga_library::library::run(config, command)
                .await
                .context("library")?;
        }
    }

    Ok(())
}
