use std::path::{Path, PathBuf};

use anyhow::Context as _;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::fs;
use tokio::sync::Mutex;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CatalogEntry {
    pub title: String,
    pub path: PathBuf,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SaveOutcome {
    Inserted,
    AlreadyExists,
}

#[async_trait]
pub trait CatalogStore: Send + Sync {
    async fn save(&self, title: &str, path: &Path) -> anyhow::Result<SaveOutcome>;
    async fn list_all(&self) -> anyhow::Result<Vec<CatalogEntry>>;
    /// Exact title match, or case-insensitive substring match when `fuzzy`.
    async fn find_by_name(&self, query: &str, fuzzy: bool) -> anyhow::Result<Vec<CatalogEntry>>;
    async fn delete(&self, title: &str) -> anyhow::Result<Option<CatalogEntry>>;
}

#[derive(Debug, Serialize, Deserialize, Default)]
struct CatalogFile {
    entries: Vec<CatalogEntry>,
}

/// Catalog kept as one JSON document, replaced atomically on every change.
#[derive(Debug)]
pub struct LocalFsCatalog {
    path: PathBuf,
    lock: Mutex<()>,
}

impl LocalFsCatalog {
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            path: base_dir.into().join("catalog.json"),
            lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn load(&self) -> anyhow::Result<CatalogFile> {
        let catalog = read_json(&self.path)
            .await
            .with_context(|| format!("read: {}", self.path.display()))?;
        Ok(catalog.unwrap_or_default())
    }
}

#[async_trait]
impl CatalogStore for LocalFsCatalog {
    async fn save(&self, title: &str, path: &Path) -> anyhow::Result<SaveOutcome> {
        let _guard = self.lock.lock().await;
        let mut catalog = self.load().await?;
        if catalog.entries.iter().any(|entry| entry.title == title) {
            tracing::info!(title, "already in catalog");
            return Ok(SaveOutcome::AlreadyExists);
        }

        catalog.entries.push(CatalogEntry {
            title: title.to_string(),
            path: path.to_path_buf(),
            created_at: Utc::now(),
        });
        write_json_atomic(&self.path, &catalog)
            .await
            .context("write catalog.json")?;
        tracing::info!(title, path = %path.display(), "recorded in catalog");
        Ok(SaveOutcome::Inserted)
    }

    async fn list_all(&self) -> anyhow::Result<Vec<CatalogEntry>> {
        let _guard = self.lock.lock().await;
        Ok(self.load().await?.entries)
    }

    async fn find_by_name(&self, query: &str, fuzzy: bool) -> anyhow::Result<Vec<CatalogEntry>> {
        let _guard = self.lock.lock().await;
        let needle = query.trim().to_lowercase();
        let entries = self
            .load()
            .await?
            .entries
            .into_iter()
            .filter(|entry| {
                if fuzzy {
                    entry.title.to_lowercase().contains(&needle)
                } else {
                    entry.title == query.trim()
                }
            })
            .collect();
        Ok(entries)
    }

    async fn delete(&self, title: &str) -> anyhow::Result<Option<CatalogEntry>> {
        let _guard = self.lock.lock().await;
        let mut catalog = self.load().await?;
        let Some(index) = catalog.entries.iter().position(|entry| entry.title == title) else {
            return Ok(None);
        };
        let removed = catalog.entries.remove(index);
        write_json_atomic(&self.path, &catalog)
            .await
            .context("write catalog.json")?;
        Ok(Some(removed))
    }
}

async fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> anyhow::Result<Option<T>> {
    let bytes = match fs::read(path).await {
        Ok(bytes) => bytes,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(err) => return Err(err.into()),
    };
    let value = serde_json::from_slice(&bytes).context("parse json")?;
    Ok(Some(value))
}

async fn write_json_atomic<T: serde::Serialize>(path: &Path, value: &T) -> anyhow::Result<()> {
    let parent = path
        .parent()
        .ok_or_else(|| anyhow::anyhow!("path has no parent: {}", path.display()))?;
    fs::create_dir_all(parent)
        .await
        .with_context(|| format!("create parent dir: {}", parent.display()))?;

    let tmp_path = path.with_extension(format!("tmp.{}", uuid::Uuid::new_v4().simple()));
    let data = serde_json::to_vec_pretty(value).context("serialize json")?;
    fs::write(&tmp_path, &data)
        .await
        .with_context(|| format!("write tmp: {}", tmp_path.display()))?;
    fs::rename(&tmp_path, path)
        .await
        .with_context(|| format!("rename tmp to final: {}", path.display()))?;
    Ok(())
}
