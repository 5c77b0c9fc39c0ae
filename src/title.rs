use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;
use std::sync::Arc;

use thiserror::Error;
use tokio::task;

use crate::chapter::{ChapterOutcome, ChapterTask, ChapterWorker};
use crate::config::Config;
use crate::discovery::{self, Discovery};
use crate::error::FetchError;
use crate::layout;
use crate::natural;
use crate::pool::BoundedPool;
use crate::progress::ProgressSink;
use crate::transport::Transport;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TitleJob {
    pub title: String,
    pub source_url: String,
    pub base_directory: PathBuf,
}

impl TitleJob {
    pub fn title_directory(&self) -> anyhow::Result<PathBuf> {
        layout::title_dir(&self.base_directory, &self.title)
    }
}

#[derive(Debug, Error)]
pub enum TitleError {
    #[error("no chapters found for {title}")]
    NoChaptersFound { title: String },

    #[error("fetch title page for {title}")]
    Fetch {
        title: String,
        #[source]
        source: FetchError,
    },

    #[error("unusable title {title:?}")]
    Layout {
        title: String,
        #[source]
        source: anyhow::Error,
    },
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TitleOutcome {
    pub chapter_outcomes: BTreeMap<String, ChapterOutcome>,
}

impl TitleOutcome {
    pub fn completed(&self) -> usize {
        self.chapter_outcomes
            .values()
            .filter(|outcome| outcome.is_success())
            .count()
    }

    pub fn failed(&self) -> usize {
        self.chapter_outcomes.len() - self.completed()
    }

    fn record(
        &mut self,
        progress: &dyn ProgressSink,
        completed: usize,
        total: usize,
        chapter: String,
        chapter_outcome: ChapterOutcome,
    ) {
        progress.chapter_finished(completed, total, &chapter, &chapter_outcome);
        self.chapter_outcomes.insert(chapter, chapter_outcome);
    }

    pub fn in_natural_order(&self) -> Vec<(&str, &ChapterOutcome)> {
        let mut entries = self
            .chapter_outcomes
            .iter()
            .map(|(title, outcome)| (title.as_str(), outcome))
            .collect::<Vec<_>>();
        entries.sort_by(|a, b| natural::natural_cmp(a.0, b.0));
        entries
    }
}

/// Downloads every chapter of a title through a bounded pool. Completion is
/// best effort: a failed chapter is reported and its siblings carry on.
pub struct TitleOrchestrator {
    transport: Transport,
    discovery: Arc<dyn Discovery>,
    worker: Arc<ChapterWorker>,
    max_threads: usize,
}

impl TitleOrchestrator {
    pub fn new(transport: Transport, discovery: Arc<dyn Discovery>, config: &Config) -> Self {
        let worker = ChapterWorker::new(transport.clone(), Arc::clone(&discovery), config);
        Self {
            transport,
            discovery,
            worker: Arc::new(worker),
            max_threads: config.max_threads.max(1),
        }
    }

    pub async fn run(
        &self,
        job: &TitleJob,
        progress: &dyn ProgressSink,
    ) -> Result<TitleOutcome, TitleError> {
        let title_dir = job.title_directory().map_err(|source| TitleError::Layout {
            title: job.title.clone(),
            source,
        })?;

        let body = self
            .transport
            .fetch_document(&job.source_url)
            .await
            .map_err(|source| TitleError::Fetch {
                title: job.title.clone(),
                source,
            })?;
        let chapters = discovery::resolve_links(
            &job.source_url,
            self.discovery.discover_chapters(&body),
        );
        if chapters.is_empty() {
            return Err(TitleError::NoChaptersFound {
                title: job.title.clone(),
            });
        }

        let mut chapters = chapters.into_iter().collect::<Vec<_>>();
        chapters.sort_by(|a, b| natural::natural_cmp(&a.0, &b.0));
        let total = chapters.len();

        tracing::info!(title = %job.title, chapters = total, "downloading title");
        progress.started(&job.title, total);

        let mut outcome = TitleOutcome::default();
        let mut completed = 0_usize;
        let mut pool = BoundedPool::new(self.max_threads);
        let mut in_flight: HashMap<task::Id, String> = HashMap::new();
        let mut claimed: HashMap<PathBuf, String> = HashMap::new();

        for (chapter_title, chapter_url) in chapters {
            let local_directory = match layout::chapter_dir(&title_dir, &chapter_title) {
                Ok(dir) => dir,
                Err(err) => {
                    completed += 1;
                    outcome.record(
                        progress,
                        completed,
                        total,
                        chapter_title,
                        ChapterOutcome::Fatal {
                            cause: format!("{err:#}"),
                        },
                    );
                    continue;
                }
            };
            // Sanitizing can fold two names onto one directory; the pages of
            // both would then race for the same files.
            if let Some(owner) = claimed.get(&local_directory) {
                completed += 1;
                let cause = format!(
                    "directory {} already belongs to chapter {owner:?}",
                    local_directory.display()
                );
                outcome.record(
                    progress,
                    completed,
                    total,
                    chapter_title,
                    ChapterOutcome::Fatal { cause },
                );
                continue;
            }
            claimed.insert(local_directory.clone(), chapter_title.clone());

            let task = ChapterTask {
                title: chapter_title,
                source_url: chapter_url,
                local_directory,
            };
            let chapter_title = task.title.clone();
            let worker = Arc::clone(&self.worker);
            let id = pool.spawn(async move {
                let chapter_outcome = worker.run(&task).await;
                (task.title, chapter_outcome)
            });
            in_flight.insert(id, chapter_title);
        }

        while let Some(joined) = pool.join_next().await {
            let (chapter_title, chapter_outcome) = match joined {
                Ok(finished) => finished,
                Err(err) => {
                    let chapter_title = in_flight.remove(&err.id()).unwrap_or_default();
                    tracing::error!(title = %job.title, chapter = %chapter_title, ?err, "chapter task panicked");
                    let chapter_outcome = ChapterOutcome::Fatal {
                        cause: format!("chapter task failed: {err}"),
                    };
                    (chapter_title, chapter_outcome)
                }
            };
            completed += 1;
            match &chapter_outcome {
                ChapterOutcome::Completed { pages, skipped } => {
                    tracing::info!(chapter = %chapter_title, pages, skipped, "chapter complete");
                }
                other => {
                    tracing::warn!(chapter = %chapter_title, outcome = ?other, "chapter incomplete");
                }
            }
            outcome.record(progress, completed, total, chapter_title, chapter_outcome);
        }

        progress.finished();
        tracing::info!(
            title = %job.title,
            completed = outcome.completed(),
            failed = outcome.failed(),
            "title finished"
        );
        Ok(outcome)
    }
}
