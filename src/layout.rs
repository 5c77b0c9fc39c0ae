use std::path::{Path, PathBuf};

use url::Url;

pub const DEFAULT_PAGE_EXTENSION: &str = ".jpg";
pub const TEMP_SUFFIX: &str = ".tmp";

/// Turns an origin-provided name into a single path segment. Separators are
/// replaced so a title can never escape its parent directory.
pub fn path_segment(name: &str) -> anyhow::Result<String> {
    let segment = name.trim().replace(['/', '\\'], "_");
    if segment.is_empty() || segment == "." || segment == ".." {
        anyhow::bail!("name is not usable as a path segment: {name:?}");
    }
    Ok(segment)
}

pub fn title_dir(storage_root: &Path, title: &str) -> anyhow::Result<PathBuf> {
    Ok(storage_root.join(path_segment(title)?))
}

pub fn chapter_dir(title_dir: &Path, chapter: &str) -> anyhow::Result<PathBuf> {
    Ok(title_dir.join(path_segment(chapter)?))
}

pub fn page_path(chapter_dir: &Path, page: &str, ext: &str) -> anyhow::Result<PathBuf> {
    Ok(chapter_dir.join(format!("{}{ext}", path_segment(page)?)))
}

/// `<path>.tmp`, the staging name used before an atomic rename.
pub fn temp_path(path: &Path) -> PathBuf {
    let mut raw = path.as_os_str().to_owned();
    raw.push(TEMP_SUFFIX);
    PathBuf::from(raw)
}

/// Extension (with leading dot) of the last URL path segment, if any.
pub fn extension_from_url(url: &str) -> Option<String> {
    let path = match Url::parse(url) {
        Ok(parsed) => parsed.path().to_owned(),
        Err(_) => url.split(['?', '#']).next().unwrap_or_default().to_owned(),
    };
    let file_name = path.rsplit('/').next()?;
    let (stem, ext) = file_name.rsplit_once('.')?;
    if stem.is_empty() || ext.is_empty() || !ext.chars().all(|c| c.is_ascii_alphanumeric()) {
        return None;
    }
    Some(format!(".{}", ext.to_ascii_lowercase()))
}

pub fn extension_from_mime(content_type: &str) -> Option<&'static str> {
    let mime = content_type
        .split(';')
        .next()
        .unwrap_or_default()
        .trim()
        .to_ascii_lowercase();
    match mime.as_str() {
        "image/jpeg" | "image/jpg" | "image/pjpeg" => Some(".jpg"),
        "image/png" => Some(".png"),
        "image/webp" => Some(".webp"),
        "image/gif" => Some(".gif"),
        "image/bmp" | "image/x-ms-bmp" => Some(".bmp"),
        "image/tiff" => Some(".tiff"),
        _ => None,
    }
}
