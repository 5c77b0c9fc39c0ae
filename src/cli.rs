use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

use crate::config::Config;

#[derive(Debug, Parser)]
#[command(author, version, about)]
pub struct Cli {
    #[command(flatten)]
    pub overrides: ConfigOverrides,

    #[command(subcommand)]
    pub command: Command,
}

/// Flags that take precedence over `MANGA_LIBRARY_*` environment variables.
#[derive(Debug, Default, Args)]
pub struct ConfigOverrides {
    /// Origin to search and download from.
    #[arg(long, global = true)]
    pub base_url: Option<String>,

    /// Directory that receives downloaded page images.
    #[arg(long, global = true)]
    pub storage: Option<PathBuf>,

    /// Directory that receives assembled PDFs and the catalog.
    #[arg(long, global = true)]
    pub output: Option<PathBuf>,

    /// Chapters (and pages per chapter) processed concurrently.
    #[arg(long, global = true, value_parser = clap::value_parser!(u64).range(1..))]
    pub max_threads: Option<u64>,

    /// Attempts per page image before giving up.
    #[arg(long, global = true, value_parser = clap::value_parser!(u32).range(1..))]
    pub max_retries: Option<u32>,
}

impl ConfigOverrides {
    pub fn apply(&self, config: &mut Config) {
        if let Some(base_url) = &self.base_url {
            config.base_url = base_url.trim_end_matches('/').to_string();
        }
        if let Some(storage) = &self.storage {
            config.storage_root = storage.clone();
        }
        if let Some(output) = &self.output {
            config.output_root = output.clone();
        }
        if let Some(max_threads) = self.max_threads {
            let max_threads = usize::try_from(max_threads).unwrap_or(usize::MAX);
            // The limiter follows the pool width unless set on its own.
            if config.max_in_flight == config.max_threads {
                config.max_in_flight = max_threads;
            }
            config.max_threads = max_threads;
        }
        if let Some(max_retries) = self.max_retries {
            config.max_retries = max_retries;
        }
    }
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Search the origin for titles.
    Search(SearchArgs),
    /// Download a title, then assemble it and record it in the catalog.
    Download(DownloadArgs),
    /// Assemble an already-downloaded title.
    Assemble(AssembleArgs),
    /// Inspect or edit the catalog of assembled titles.
    Library {
        #[command(subcommand)]
        command: LibraryCommand,
    },
}

#[derive(Debug, Args)]
pub struct SearchArgs {
    /// Title to search for.
    pub query: String,
}

#[derive(Debug, Args)]
pub struct DownloadArgs {
    /// Title name; becomes the directory and artifact name.
    #[arg(long)]
    pub title: String,

    /// Title page URL (absolute, or relative to the base URL).
    #[arg(long)]
    pub url: String,

    /// Stop after downloading; do not build the PDF.
    #[arg(long, default_value_t = false)]
    pub no_assemble: bool,
}

#[derive(Debug, Args)]
pub struct AssembleArgs {
    /// Title directory name under the storage root.
    #[arg(long)]
    pub title: String,
}

#[derive(Debug, Subcommand)]
pub enum LibraryCommand {
    /// List every recorded title.
    List,
    /// Find recorded titles by name.
    Find(FindArgs),
    /// Remove a title from the catalog and delete its PDF.
    Delete(DeleteArgs),
}

#[derive(Debug, Args)]
pub struct FindArgs {
    pub query: String,

    /// Require an exact title match instead of a case-insensitive substring.
    #[arg(long, default_value_t = false)]
    pub exact: bool,
}

#[derive(Debug, Args)]
pub struct DeleteArgs {
    pub title: String,

    /// Keep the PDF on disk; only forget it in the catalog.
    #[arg(long, default_value_t = false)]
    pub keep_file: bool,
}
