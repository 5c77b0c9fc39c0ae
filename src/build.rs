use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context as _;

use crate::assemble::Assembler;
use crate::catalog::{CatalogStore, LocalFsCatalog, SaveOutcome};
use crate::cli::{AssembleArgs, DownloadArgs};
use crate::config::Config;
use crate::discovery::{Discovery, HtmlDiscovery};
use crate::layout;
use crate::pdf::PdfEncoder;
use crate::progress::{ChapterBar, ProgressSink};
use crate::title::{TitleJob, TitleOrchestrator, TitleOutcome};
use crate::transport::Transport;

/// Everything one download-assemble-record run needs, wired from a single
/// [`Config`].
pub struct Pipeline {
    config: Arc<Config>,
    orchestrator: TitleOrchestrator,
    assembler: Assembler,
    catalog: Arc<dyn CatalogStore>,
}

#[derive(Debug)]
pub struct DownloadReport {
    pub outcome: TitleOutcome,
    /// Set once the artifact was written and recorded.
    pub artifact: Option<PathBuf>,
}

impl Pipeline {
    pub fn new(config: Arc<Config>) -> anyhow::Result<Self> {
        let transport = Transport::new(&config).context("build transport")?;
        let discovery: Arc<dyn Discovery> =
            Arc::new(HtmlDiscovery::new().context("build discovery")?);
        let catalog: Arc<dyn CatalogStore> = Arc::new(LocalFsCatalog::new(&config.output_root));
        Ok(Self::with_parts(config, transport, discovery, catalog))
    }

    pub fn with_parts(
        config: Arc<Config>,
        transport: Transport,
        discovery: Arc<dyn Discovery>,
        catalog: Arc<dyn CatalogStore>,
    ) -> Self {
        let orchestrator = TitleOrchestrator::new(transport, discovery, &config);
        let assembler = Assembler::new(Arc::clone(&config), Arc::new(PdfEncoder::default()));
        Self {
            config,
            orchestrator,
            assembler,
            catalog,
        }
    }

    /// Downloads `title` from `url`, then (unless `assemble` is false)
    /// assembles whatever reached the disk and records the artifact. Failed
    /// chapters do not block assembly; their pages are simply absent.
    pub async fn download(
        &self,
        title: &str,
        url: &str,
        assemble: bool,
        progress: &dyn ProgressSink,
    ) -> anyhow::Result<DownloadReport> {
        let job = TitleJob {
            title: title.to_string(),
            source_url: absolute_url(&self.config.base_url, url)?,
            base_directory: self.config.storage_root.clone(),
        };
        tracing::info!(title, url = %job.source_url, "download: chapters");
        let outcome = self
            .orchestrator
            .run(&job, progress)
            .await
            .context("download title")?;

        if !assemble {
            return Ok(DownloadReport {
                outcome,
                artifact: None,
            });
        }
        if outcome.completed() == 0 {
            tracing::warn!(title, "no chapter completed; assembling what is on disk");
        }

        tracing::info!(title, "download: assemble");
        let artifact = self.assemble(title).await?;
        Ok(DownloadReport {
            outcome,
            artifact: Some(artifact),
        })
    }

    /// Assembles an already-downloaded title and records it in the catalog.
    pub async fn assemble(&self, title: &str) -> anyhow::Result<PathBuf> {
        let title_dir = layout::title_dir(&self.config.storage_root, title)?;
        let artifact = self
            .assembler
            .build_artifact(&title_dir)
            .await
            .with_context(|| format!("assemble {title}"))?;

        match self
            .catalog
            .save(title, &artifact)
            .await
            .context("record in catalog")?
        {
            SaveOutcome::Inserted => {}
            SaveOutcome::AlreadyExists => {
                tracing::info!(title, "catalog already lists this title; entry kept");
            }
        }
        Ok(artifact)
    }
}

pub async fn download(config: Arc<Config>, args: DownloadArgs) -> anyhow::Result<()> {
    let pipeline = Pipeline::new(config)?;
    let progress = ChapterBar::new();
    let report = pipeline
        .download(&args.title, &args.url, !args.no_assemble, &progress)
        .await?;

    let outcome = &report.outcome;
    println!(
        "{}: {}/{} chapters complete",
        args.title,
        outcome.completed(),
        outcome.chapter_outcomes.len()
    );
    for (chapter, chapter_outcome) in outcome.in_natural_order() {
        if !chapter_outcome.is_success() {
            println!("  {chapter}: {chapter_outcome:?}");
        }
    }
    if let Some(artifact) = &report.artifact {
        println!("saved {}", artifact.display());
    }
    Ok(())
}

pub async fn assemble(config: Arc<Config>, args: AssembleArgs) -> anyhow::Result<()> {
    let pipeline = Pipeline::new(config)?;
    let artifact = pipeline.assemble(&args.title).await?;
    println!("saved {}", artifact.display());
    Ok(())
}

/// Title URLs may be given relative to the configured origin.
fn absolute_url(base_url: &str, url: &str) -> anyhow::Result<String> {
    if let Ok(parsed) = url::Url::parse(url) {
        return Ok(parsed.to_string());
    }
    let base = url::Url::parse(&format!("{}/", base_url.trim_end_matches('/')))
        .with_context(|| format!("invalid base url: {base_url}"))?;
    let joined = base
        .join(url)
        .with_context(|| format!("invalid title url: {url}"))?;
    Ok(joined.to_string())
}
