use std::path::{Path, PathBuf};
use std::sync::Arc;

use thiserror::Error;

use crate::config::Config;
use crate::layout;
use crate::natural;
use crate::pdf::{self, ArtifactEncoder};

#[derive(Debug, Error)]
pub enum AssembleError {
    #[error("title directory not found: {}", path.display())]
    TitleNotFound { path: PathBuf },

    #[error("no valid images under {}", path.display())]
    NoValidImages { path: PathBuf },

    #[error("encode artifact {}", path.display())]
    Encode {
        path: PathBuf,
        #[source]
        source: anyhow::Error,
    },

    #[error("{action} {}", path.display())]
    Io {
        action: &'static str,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("assembly task failed")]
    Join(#[from] tokio::task::JoinError),
}

/// Turns a downloaded title tree into one artifact. Ordering comes from the
/// chapter directory and page file names alone.
#[derive(Clone)]
pub struct Assembler {
    config: Arc<Config>,
    encoder: Arc<dyn ArtifactEncoder>,
}

impl Assembler {
    pub fn new(config: Arc<Config>, encoder: Arc<dyn ArtifactEncoder>) -> Self {
        Self { config, encoder }
    }

    /// Valid page images of a title, chapter by chapter in natural order.
    pub fn collect_pages(&self, title_dir: &Path) -> Result<Vec<PathBuf>, AssembleError> {
        if !title_dir.is_dir() {
            return Err(AssembleError::TitleNotFound {
                path: title_dir.to_path_buf(),
            });
        }

        let mut pages = Vec::new();
        for chapter_dir in sorted_entries(title_dir, |path| path.is_dir())? {
            let candidates = sorted_entries(&chapter_dir, |path| {
                path.is_file() && self.has_image_extension(path)
            })?;
            for page in candidates {
                if pdf::decodes_as_image(&page) {
                    pages.push(page);
                } else {
                    tracing::debug!(path = %page.display(), "skipping undecodable page");
                }
            }
        }
        Ok(pages)
    }

    /// Encodes the title found at `title_dir` into
    /// `<output_root>/<title><ext>`. The artifact appears under its final
    /// name only once fully written.
    pub fn build_artifact_blocking(&self, title_dir: &Path) -> Result<PathBuf, AssembleError> {
        let pages = self.collect_pages(title_dir)?;
        if pages.is_empty() {
            return Err(AssembleError::NoValidImages {
                path: title_dir.to_path_buf(),
            });
        }

        let title = title_dir
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default();
        let output_root = &self.config.output_root;
        let out_path = output_root.join(format!("{title}{}", self.encoder.extension()));
        std::fs::create_dir_all(output_root).map_err(|source| AssembleError::Io {
            action: "create output dir",
            path: output_root.clone(),
            source,
        })?;

        let temp_path = layout::temp_path(&out_path);
        tracing::info!(
            title = %title,
            pages = pages.len(),
            out = %out_path.display(),
            "assembling"
        );
        if let Err(source) = self.encoder.encode(&pages, &temp_path) {
            let _ = std::fs::remove_file(&temp_path);
            return Err(AssembleError::Encode {
                path: out_path,
                source,
            });
        }
        std::fs::rename(&temp_path, &out_path).map_err(|source| AssembleError::Io {
            action: "commit artifact",
            path: out_path.clone(),
            source,
        })?;

        Ok(out_path)
    }

    /// [`Self::build_artifact_blocking`] on the blocking thread pool.
    pub async fn build_artifact(&self, title_dir: &Path) -> Result<PathBuf, AssembleError> {
        let assembler = self.clone();
        let title_dir = title_dir.to_path_buf();
        tokio::task::spawn_blocking(move || assembler.build_artifact_blocking(&title_dir)).await?
    }

    fn has_image_extension(&self, path: &Path) -> bool {
        path.extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| self.config.is_image_extension(ext))
    }
}

fn sorted_entries(dir: &Path, keep: impl Fn(&Path) -> bool) -> Result<Vec<PathBuf>, AssembleError> {
    let read_dir = std::fs::read_dir(dir).map_err(|source| AssembleError::Io {
        action: "read dir",
        path: dir.to_path_buf(),
        source,
    })?;

    let mut entries = Vec::new();
    for entry in read_dir {
        let entry = entry.map_err(|source| AssembleError::Io {
            action: "read dir entry",
            path: dir.to_path_buf(),
            source,
        })?;
        let path = entry.path();
        if keep(&path) {
            entries.push(path);
        }
    }
    entries.sort_by(|a, b| {
        let a = a.file_name().map(|n| n.to_string_lossy()).unwrap_or_default();
        let b = b.file_name().map(|n| n.to_string_lossy()).unwrap_or_default();
        natural::natural_cmp(&a, &b)
    });
    Ok(entries)
}
