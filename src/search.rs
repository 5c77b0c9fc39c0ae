use std::sync::Arc;

use anyhow::Context as _;
use url::Url;

use crate::cli::SearchArgs;
use crate::config::Config;
use crate::discovery::{self, Discovery, HtmlDiscovery};
use crate::natural;
use crate::transport::Transport;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchHit {
    pub title: String,
    pub url: String,
}

/// `<base_url>/?q=<query>`.
pub fn search_url(base_url: &str, query: &str) -> anyhow::Result<Url> {
    let mut url =
        Url::parse(base_url).with_context(|| format!("invalid base url: {base_url}"))?;
    url.set_path("/");
    url.query_pairs_mut().clear().append_pair("q", query.trim());
    Ok(url)
}

/// Titles matching `query`, in natural order, with absolute URLs.
pub async fn search_titles(
    transport: &Transport,
    discovery: &dyn Discovery,
    base_url: &str,
    query: &str,
) -> anyhow::Result<Vec<SearchHit>> {
    let url = search_url(base_url, query)?;
    let body = transport
        .fetch_document(url.as_str())
        .await
        .context("fetch search results")?;
    let links = discovery::resolve_links(url.as_str(), discovery.discover_titles(&body));

    let mut hits = links
        .into_iter()
        .map(|(title, url)| SearchHit { title, url })
        .collect::<Vec<_>>();
    hits.sort_by(|a, b| natural::natural_cmp(&a.title, &b.title));
    tracing::debug!(query, hits = hits.len(), "search finished");
    Ok(hits)
}

pub async fn run(config: Arc<Config>, args: SearchArgs) -> anyhow::Result<()> {
    let transport = Transport::new(&config).context("build transport")?;
    let discovery = HtmlDiscovery::new().context("build discovery")?;
    let hits = search_titles(&transport, &discovery, &config.base_url, &args.query).await?;

    if hits.is_empty() {
        println!("no titles found for {:?}", args.query);
        return Ok(());
    }
    for (index, hit) in hits.iter().enumerate() {
        println!("{}. {}: {}", index + 1, hit.title, hit.url);
    }
    Ok(())
}
