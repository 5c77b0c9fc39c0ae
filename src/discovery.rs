use std::collections::BTreeMap;

use scraper::{ElementRef, Html, Selector};
use url::Url;

/// `name -> follow URL` pairs found in one document. Iteration order carries
/// no meaning; callers sort.
pub type LinkMap = BTreeMap<String, String>;

/// Extracts named links from a fetched document body. Implementations are
/// pure; an empty map means nothing was found.
pub trait Discovery: Send + Sync {
    fn discover_titles(&self, body: &str) -> LinkMap;
    fn discover_chapters(&self, body: &str) -> LinkMap;
    fn discover_pages(&self, body: &str) -> LinkMap;
}

/// Selectors for the default origin's markup.
#[derive(Debug, Clone)]
pub struct HtmlDiscovery {
    title_links: Selector,
    chapter_links: Selector,
    page_images: Selector,
    img: Selector,
}

impl HtmlDiscovery {
    pub fn new() -> anyhow::Result<Self> {
        Ok(Self {
            title_links: selector("a.site-card__link")?,
            chapter_links: selector("a.site-manga-thumbnail__link")?,
            page_images: selector("img.site-reader__image")?,
            img: selector("img")?,
        })
    }

    /// Anchors labelled by the `alt` of their first image.
    fn anchors_by_image_alt(&self, body: &str, anchors: &Selector) -> LinkMap {
        let document = Html::parse_document(body);
        document
            .select(anchors)
            .filter_map(|anchor| {
                let href = non_empty_attr(anchor, "href")?;
                let alt = anchor
                    .select(&self.img)
                    .next()
                    .and_then(|img| non_empty_attr(img, "alt"))?;
                Some((alt, href))
            })
            .collect()
    }
}

impl Discovery for HtmlDiscovery {
    fn discover_titles(&self, body: &str) -> LinkMap {
        self.anchors_by_image_alt(body, &self.title_links)
    }

    fn discover_chapters(&self, body: &str) -> LinkMap {
        self.anchors_by_image_alt(body, &self.chapter_links)
    }

    fn discover_pages(&self, body: &str) -> LinkMap {
        let document = Html::parse_document(body);
        document
            .select(&self.page_images)
            .filter_map(|img| {
                let alt = non_empty_attr(img, "alt")?;
                let src = non_empty_attr(img, "data-page-image-url")?;
                Some((alt, src))
            })
            .collect()
    }
}

fn selector(css: &str) -> anyhow::Result<Selector> {
    Selector::parse(css).map_err(|err| anyhow::anyhow!("parse selector {css:?}: {err:?}"))
}

fn non_empty_attr(element: ElementRef<'_>, name: &str) -> Option<String> {
    let value = element.value().attr(name)?.trim();
    if value.is_empty() {
        return None;
    }
    Some(value.to_owned())
}

/// Resolves relative links against the document they were found in. Links
/// that cannot be resolved are kept verbatim.
pub fn resolve_links(base_url: &str, links: LinkMap) -> LinkMap {
    let Ok(base) = Url::parse(base_url) else {
        return links;
    };
    links
        .into_iter()
        .map(|(name, href)| {
            let resolved = base
                .join(&href)
                .map(|url| url.to_string())
                .unwrap_or(href);
            (name, resolved)
        })
        .collect()
}
