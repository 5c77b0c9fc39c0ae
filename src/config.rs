use std::ops::RangeInclusive;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::Context as _;

use crate::retry::RetryPolicy;

pub const DEFAULT_BASE_URL: &str = "https://dogemanga.com";
pub const DEFAULT_MAX_RETRIES: u32 = 3;
pub const DEFAULT_MAX_THREADS: usize = 5;

pub const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/131.0.0.0 Safari/537.36";
pub const DEFAULT_ACCEPT: &str =
    "text/html,application/xhtml+xml,application/xml;q=0.9,image/webp,*/*;q=0.8";
pub const DEFAULT_ACCEPT_LANGUAGE: &str = "zh-CN,zh;q=0.9,en;q=0.8";

pub const DEFAULT_IMAGE_EXTENSIONS: &[&str] =
    &[".jpg", ".jpeg", ".png", ".bmp", ".tiff", ".webp", ".gif"];

/// Process-wide settings. Built once at startup and shared read-only.
#[derive(Debug, Clone)]
pub struct Config {
    pub base_url: String,
    pub storage_root: PathBuf,
    pub output_root: PathBuf,
    pub max_retries: u32,
    pub max_threads: usize,
    /// Upper bound on concurrent HTTP requests across every pool level.
    pub max_in_flight: usize,
    pub request_timeout: Duration,
    pub unit_backoff: RangeInclusive<Duration>,
    pub chapter_backoff: RangeInclusive<Duration>,
    pub chapter_attempts: u32,
    pub user_agent: String,
    pub accept: String,
    pub accept_language: String,
    pub image_extensions: Vec<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            storage_root: PathBuf::from("storage"),
            output_root: PathBuf::from("manga_library"),
            max_retries: DEFAULT_MAX_RETRIES,
            max_threads: DEFAULT_MAX_THREADS,
            max_in_flight: DEFAULT_MAX_THREADS,
            request_timeout: Duration::from_secs(30),
            unit_backoff: Duration::from_secs(2)..=Duration::from_secs(5),
            chapter_backoff: Duration::from_secs(5)..=Duration::from_secs(10),
            chapter_attempts: 3,
            user_agent: DEFAULT_USER_AGENT.to_string(),
            accept: DEFAULT_ACCEPT.to_string(),
            accept_language: DEFAULT_ACCEPT_LANGUAGE.to_string(),
            image_extensions: DEFAULT_IMAGE_EXTENSIONS
                .iter()
                .map(|ext| ext.to_string())
                .collect(),
        }
    }
}

impl Config {
    /// Defaults overlaid with `MANGA_LIBRARY_*` environment variables.
    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> anyhow::Result<Self> {
        let mut config = Self::default();

        if let Some(raw) = lookup("MANGA_LIBRARY_BASE_URL") {
            config.base_url = raw.trim().trim_end_matches('/').to_string();
        }
        if let Some(raw) = lookup("MANGA_LIBRARY_STORAGE") {
            config.storage_root = PathBuf::from(raw);
        }
        if let Some(raw) = lookup("MANGA_LIBRARY_OUTPUT") {
            config.output_root = PathBuf::from(raw);
        }
        if let Some(raw) = lookup("MANGA_LIBRARY_MAX_RETRIES") {
            config.max_retries = parse_positive(&raw)
                .with_context(|| format!("invalid MANGA_LIBRARY_MAX_RETRIES={raw:?}"))?;
        }
        let mut in_flight_overridden = false;
        if let Some(raw) = lookup("MANGA_LIBRARY_MAX_THREADS") {
            config.max_threads = parse_positive(&raw)
                .with_context(|| format!("invalid MANGA_LIBRARY_MAX_THREADS={raw:?}"))?;
        }
        if let Some(raw) = lookup("MANGA_LIBRARY_MAX_IN_FLIGHT") {
            config.max_in_flight = parse_positive(&raw)
                .with_context(|| format!("invalid MANGA_LIBRARY_MAX_IN_FLIGHT={raw:?}"))?;
            in_flight_overridden = true;
        }
        if !in_flight_overridden {
            config.max_in_flight = config.max_threads;
        }
        if let Some(raw) = lookup("MANGA_LIBRARY_TIMEOUT_SECS") {
            let secs: u64 = parse_positive(&raw)
                .with_context(|| format!("invalid MANGA_LIBRARY_TIMEOUT_SECS={raw:?}"))?;
            config.request_timeout = Duration::from_secs(secs);
        }

        Ok(config)
    }

    /// Policy for page images and plain document fetches.
    pub fn unit_retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(self.max_retries, self.unit_backoff.clone())
    }

    /// Policy for chapter documents, which are costlier to lose than one image.
    pub fn chapter_retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(self.chapter_attempts, self.chapter_backoff.clone())
    }

    pub fn is_image_extension(&self, ext: &str) -> bool {
        let ext = ext.to_ascii_lowercase();
        let ext = if ext.starts_with('.') {
            ext
        } else {
            format!(".{ext}")
        };
        self.image_extensions.iter().any(|known| *known == ext)
    }
}

fn parse_positive<T>(raw: &str) -> anyhow::Result<T>
where
    T: std::str::FromStr + PartialOrd + Default,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    let value: T = raw.trim().parse().context("parse number")?;
    if value <= T::default() {
        anyhow::bail!("value must be greater than zero");
    }
    Ok(value)
}
