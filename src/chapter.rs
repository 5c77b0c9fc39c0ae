use std::path::PathBuf;
use std::sync::Arc;

use crate::config::Config;
use crate::discovery::{self, Discovery};
use crate::error::FetchError;
use crate::pool::BoundedPool;
use crate::retry::RetryPolicy;
use crate::transport::Transport;
use crate::unit::{self, FetchTarget, UnitOutcome};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChapterTask {
    pub title: String,
    pub source_url: String,
    pub local_directory: PathBuf,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChapterOutcome {
    /// Every page is on disk; `skipped` of them were already there.
    Completed { pages: usize, skipped: usize },
    /// The chapter document listed no pages.
    NoPagesFound,
    PartialFailure { failed: usize, total: usize },
    /// The chapter could not be processed at all.
    Fatal { cause: String },
}

impl ChapterOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Completed { .. })
    }
}

/// Downloads one chapter: document, page discovery, then a bounded pool of
/// page fetches. Page failures are counted, never propagated to siblings.
pub struct ChapterWorker {
    transport: Transport,
    discovery: Arc<dyn Discovery>,
    document_policy: RetryPolicy,
    config: Config,
}

impl ChapterWorker {
    pub fn new(transport: Transport, discovery: Arc<dyn Discovery>, config: &Config) -> Self {
        Self {
            transport,
            discovery,
            document_policy: config.chapter_retry_policy(),
            config: config.clone(),
        }
    }

    pub async fn run(&self, task: &ChapterTask) -> ChapterOutcome {
        let pages = match self.discover_pages(task).await {
            Ok(pages) => pages,
            Err(err) => {
                return ChapterOutcome::Fatal {
                    cause: format!("{:#}", anyhow::Error::new(err)),
                };
            }
        };
        if pages.is_empty() {
            tracing::warn!(chapter = %task.title, url = %task.source_url, "no pages found");
            return ChapterOutcome::NoPagesFound;
        }

        if let Err(err) = tokio::fs::create_dir_all(&task.local_directory).await {
            return ChapterOutcome::Fatal {
                cause: format!(
                    "create chapter dir {}: {err}",
                    task.local_directory.display()
                ),
            };
        }

        let total = pages.len();
        let mut failed = 0_usize;
        let mut skipped = 0_usize;
        let mut pool = BoundedPool::new(self.config.max_threads.max(1).min(total));

        for (page_title, page_url) in pages {
            let target = match FetchTarget::for_page(
                &self.config,
                &task.local_directory,
                &page_title,
                &page_url,
                &task.source_url,
            ) {
                Ok(target) => target,
                Err(err) => {
                    tracing::warn!(chapter = %task.title, page = %page_title, ?err, "unusable page");
                    failed += 1;
                    continue;
                }
            };
            let transport = self.transport.clone();
            pool.spawn(async move {
                let result = unit::fetch_unit(&transport, &target).await;
                (target, result)
            });
        }

        while let Some(joined) = pool.join_next().await {
            match joined {
                Ok((_, Ok(UnitOutcome::Skipped(_)))) => skipped += 1,
                Ok((_, Ok(UnitOutcome::Written { .. }))) => {}
                Ok((target, Err(err))) => {
                    failed += 1;
                    tracing::warn!(
                        chapter = %task.title,
                        url = %target.url,
                        error = %format!("{:#}", anyhow::Error::new(err)),
                        "page failed"
                    );
                }
                Err(err) => {
                    failed += 1;
                    tracing::error!(chapter = %task.title, ?err, "page task panicked");
                }
            }
        }

        if failed > 0 {
            ChapterOutcome::PartialFailure { failed, total }
        } else {
            ChapterOutcome::Completed {
                pages: total,
                skipped,
            }
        }
    }

    async fn discover_pages(&self, task: &ChapterTask) -> Result<discovery::LinkMap, FetchError> {
        let body = self
            .transport
            .fetch_document_with(&self.document_policy, &task.source_url)
            .await?;
        let pages = self.discovery.discover_pages(&body);
        Ok(discovery::resolve_links(&task.source_url, pages))
    }
}
