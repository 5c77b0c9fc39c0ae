//! Fetching a single page image to disk.
//!
//! A page file that exists with a non-zero size is complete; that is the
//! only resume record. Bytes are staged in `<destination>.tmp` and renamed
//! into place once the whole body is on disk, so the final name never holds
//! a partial file.

use std::ffi::OsString;
use std::path::{Path, PathBuf};

use tokio::io::AsyncWriteExt as _;

use crate::config::Config;
use crate::error::FetchError;
use crate::layout;
use crate::transport::{ImageResponse, Transport};

/// Extensions tried when a page's extension is only known after download.
const INFERABLE_EXTENSIONS: &[&str] = &[".jpg", ".jpeg", ".png", ".webp", ".gif", ".bmp", ".tiff"];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchTarget {
    pub url: String,
    pub referer_url: String,
    pub destination_path: PathBuf,
    /// Set when the URL carries no extension: the response MIME type picks
    /// one, falling back to `destination_path`.
    inferred_stem: Option<PathBuf>,
}

impl FetchTarget {
    pub fn new(url: &str, referer_url: &str, destination_path: impl Into<PathBuf>) -> Self {
        Self {
            url: url.to_string(),
            referer_url: referer_url.to_string(),
            destination_path: destination_path.into(),
            inferred_stem: None,
        }
    }

    /// Target for page `page_title` of a chapter, named `<page_title><ext>`.
    /// A URL suffix that is not a known image extension (`view.php`) counts
    /// as no extension at all.
    pub fn for_page(
        config: &Config,
        chapter_dir: &Path,
        page_title: &str,
        url: &str,
        referer_url: &str,
    ) -> anyhow::Result<Self> {
        let url_ext = layout::extension_from_url(url).filter(|ext| config.is_image_extension(ext));
        match url_ext {
            Some(ext) => Ok(Self::new(
                url,
                referer_url,
                layout::page_path(chapter_dir, page_title, &ext)?,
            )),
            None => {
                let stem = layout::page_path(chapter_dir, page_title, "")?;
                Ok(Self {
                    destination_path: with_extension(&stem, layout::DEFAULT_PAGE_EXTENSION),
                    inferred_stem: Some(stem),
                    ..Self::new(url, referer_url, PathBuf::new())
                })
            }
        }
    }

    fn final_path(&self, response: &ImageResponse) -> PathBuf {
        let Some(stem) = &self.inferred_stem else {
            return self.destination_path.clone();
        };
        match response.content_type().and_then(layout::extension_from_mime) {
            Some(ext) => with_extension(stem, ext),
            None => self.destination_path.clone(),
        }
    }

    async fn existing_file(&self) -> Option<PathBuf> {
        match &self.inferred_stem {
            None => is_complete(&self.destination_path)
                .await
                .then(|| self.destination_path.clone()),
            Some(stem) => {
                for ext in INFERABLE_EXTENSIONS {
                    let candidate = with_extension(stem, ext);
                    if is_complete(&candidate).await {
                        return Some(candidate);
                    }
                }
                None
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UnitOutcome {
    /// A complete file was already present; no request was made.
    Skipped(PathBuf),
    Written { path: PathBuf, bytes: u64 },
}

/// Downloads `target` unless it is already complete. Request, body transfer
/// and the empty-body check share one attempt budget.
pub async fn fetch_unit(
    transport: &Transport,
    target: &FetchTarget,
) -> Result<UnitOutcome, FetchError> {
    if let Some(path) = target.existing_file().await {
        tracing::debug!(path = %path.display(), "page already present");
        return Ok(UnitOutcome::Skipped(path));
    }

    transport
        .policy()
        .run(&target.url, |_| attempt(transport, target))
        .await
}

async fn attempt(transport: &Transport, target: &FetchTarget) -> Result<UnitOutcome, FetchError> {
    let mut response = transport
        .send_image(&target.url, &target.referer_url)
        .await?;
    let final_path = target.final_path(&response);
    let temp_path = layout::temp_path(&final_path);

    let written = match write_body(&mut response, &temp_path).await {
        Ok(written) => written,
        Err(err) => {
            discard(&temp_path).await;
            return Err(err);
        }
    };
    drop(response);

    if written == 0 {
        discard(&temp_path).await;
        return Err(FetchError::EmptyPayload {
            url: target.url.clone(),
        });
    }

    tokio::fs::rename(&temp_path, &final_path)
        .await
        .map_err(|err| FetchError::io("commit page", &final_path, err))?;

    tracing::debug!(path = %final_path.display(), bytes = written, "page written");
    Ok(UnitOutcome::Written {
        path: final_path,
        bytes: written,
    })
}

/// Streams the body into `temp_path`, truncating any stale partial file.
async fn write_body(response: &mut ImageResponse, temp_path: &Path) -> Result<u64, FetchError> {
    let mut file = tokio::fs::File::create(temp_path)
        .await
        .map_err(|err| FetchError::io("create temp file", temp_path, err))?;

    while let Some(chunk) = response.chunk().await? {
        file.write_all(&chunk)
            .await
            .map_err(|err| FetchError::io("write temp file", temp_path, err))?;
    }
    file.flush()
        .await
        .map_err(|err| FetchError::io("flush temp file", temp_path, err))?;
    file.sync_all()
        .await
        .map_err(|err| FetchError::io("sync temp file", temp_path, err))?;
    drop(file);

    let metadata = tokio::fs::metadata(temp_path)
        .await
        .map_err(|err| FetchError::io("stat temp file", temp_path, err))?;
    Ok(metadata.len())
}

async fn discard(temp_path: &Path) {
    if let Err(err) = tokio::fs::remove_file(temp_path).await
        && err.kind() != std::io::ErrorKind::NotFound
    {
        tracing::debug!(path = %temp_path.display(), ?err, "remove temp file failed");
    }
}

async fn is_complete(path: &Path) -> bool {
    match tokio::fs::metadata(path).await {
        Ok(metadata) => metadata.is_file() && metadata.len() > 0,
        Err(_) => false,
    }
}

fn with_extension(stem: &Path, ext: &str) -> PathBuf {
    let mut raw: OsString = stem.as_os_str().to_owned();
    raw.push(ext);
    PathBuf::from(raw)
}
