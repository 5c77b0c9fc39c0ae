use std::fs;
use std::sync::Arc;

use manga_library::assemble::Assembler;
use manga_library::build::Pipeline;
use manga_library::catalog::{CatalogStore, LocalFsCatalog};
use manga_library::chapter::{ChapterOutcome, ChapterTask, ChapterWorker};
use manga_library::config::Config;
use manga_library::discovery::{Discovery, HtmlDiscovery, LinkMap};
use manga_library::pdf::{self, PdfEncoder};
use manga_library::progress::{NoProgress, ProgressSink};
use manga_library::title::{TitleError, TitleJob, TitleOrchestrator};
use manga_library::transport::Transport;

mod origin_stub;

use origin_stub::{OriginStub, Reply};

fn discovery() -> Arc<dyn Discovery> {
    Arc::new(HtmlDiscovery::new().expect("selectors parse"))
}

/// Serves chapter `n` with `pages` PNG pages under `/img/<n>/`.
fn serve_chapter(origin: &OriginStub, n: u32, pages: u32) {
    let page_links = (1..=pages)
        .map(|p| (format!("{p:02}"), origin.url(&format!("/img/{n}/{p}.png"))))
        .collect::<Vec<_>>();
    let refs = page_links
        .iter()
        .map(|(alt, src)| (alt.as_str(), src.as_str()))
        .collect::<Vec<_>>();
    origin.route(
        &format!("/c/{n}"),
        Reply::Html(origin_stub::chapter_page(&refs)),
    );
    for p in 1..=pages {
        origin.route(
            &format!("/img/{n}/{p}.png"),
            Reply::png(origin_stub::png_bytes(n * 10 + p, 4)),
        );
    }
}

/// Markup discovery that blows up on any chapter page mentioning `marker`.
struct PanicsOn {
    inner: HtmlDiscovery,
    marker: &'static str,
}

impl Discovery for PanicsOn {
    fn discover_titles(&self, body: &str) -> LinkMap {
        self.inner.discover_titles(body)
    }

    fn discover_chapters(&self, body: &str) -> LinkMap {
        self.inner.discover_chapters(body)
    }

    fn discover_pages(&self, body: &str) -> LinkMap {
        assert!(!body.contains(self.marker), "unparseable chapter markup");
        self.inner.discover_pages(body)
    }
}

#[derive(Default)]
struct RecordingProgress {
    seen: std::sync::Mutex<Vec<(usize, usize)>>,
}

impl ProgressSink for RecordingProgress {
    fn chapter_finished(&self, completed: usize, total: usize, _: &str, _: &ChapterOutcome) {
        self.seen.lock().unwrap().push((completed, total));
    }
}

#[tokio::test]
async fn one_failed_page_makes_a_partial_chapter() -> anyhow::Result<()> {
    let origin = OriginStub::spawn();
    serve_chapter(&origin, 1, 5);
    origin.route("/img/1/3.png", Reply::Status(404));
    let temp = tempfile::TempDir::new()?;
    let config = origin_stub::test_config(temp.path(), &origin.base_url);
    let worker = ChapterWorker::new(Transport::new(&config)?, discovery(), &config);

    let chapter_dir = temp.path().join("storage/T/Chapter 1");
    let outcome = worker
        .run(&ChapterTask {
            title: "Chapter 1".to_string(),
            source_url: origin.url("/c/1"),
            local_directory: chapter_dir.clone(),
        })
        .await;

    assert_eq!(outcome, ChapterOutcome::PartialFailure { failed: 1, total: 5 });
    assert_eq!(fs::read_dir(&chapter_dir)?.count(), 4);
    assert!(!chapter_dir.join("03.png").exists());
    Ok(())
}

#[tokio::test]
async fn chapter_without_pages_reports_no_pages() -> anyhow::Result<()> {
    let origin = OriginStub::spawn();
    origin.route("/c/9", Reply::Html(origin_stub::chapter_page(&[])));
    let temp = tempfile::TempDir::new()?;
    let config = origin_stub::test_config(temp.path(), &origin.base_url);
    let worker = ChapterWorker::new(Transport::new(&config)?, discovery(), &config);

    let outcome = worker
        .run(&ChapterTask {
            title: "Chapter 9".to_string(),
            source_url: origin.url("/c/9"),
            local_directory: temp.path().join("storage/T/Chapter 9"),
        })
        .await;

    assert_eq!(outcome, ChapterOutcome::NoPagesFound);
    Ok(())
}

#[tokio::test]
async fn title_without_chapters_creates_nothing() -> anyhow::Result<()> {
    let origin = OriginStub::spawn();
    origin.route("/m/empty", Reply::Html(origin_stub::title_page(&[])));
    let temp = tempfile::TempDir::new()?;
    let config = origin_stub::test_config(temp.path(), &origin.base_url);
    let orchestrator = TitleOrchestrator::new(Transport::new(&config)?, discovery(), &config);

    let job = TitleJob {
        title: "Empty".to_string(),
        source_url: origin.url("/m/empty"),
        base_directory: config.storage_root.clone(),
    };
    let err = orchestrator.run(&job, &NoProgress).await.unwrap_err();

    assert!(matches!(err, TitleError::NoChaptersFound { .. }));
    assert!(!config.storage_root.join("Empty").exists());
    Ok(())
}

#[tokio::test]
async fn unreachable_chapter_is_fatal_while_siblings_finish() -> anyhow::Result<()> {
    let origin = OriginStub::spawn();
    origin.route(
        "/m/t",
        Reply::Html(origin_stub::title_page(&[
            ("Chapter 1", "/c/1"),
            ("Chapter 2", "/c/2"),
        ])),
    );
    serve_chapter(&origin, 1, 2);
    origin.route("/c/2", Reply::Status(503));
    let temp = tempfile::TempDir::new()?;
    let config = origin_stub::test_config(temp.path(), &origin.base_url);
    let orchestrator = TitleOrchestrator::new(Transport::new(&config)?, discovery(), &config);

    let progress = RecordingProgress::default();
    let job = TitleJob {
        title: "T".to_string(),
        source_url: origin.url("/m/t"),
        base_directory: config.storage_root.clone(),
    };
    let outcome = orchestrator.run(&job, &progress).await?;

    assert_eq!(outcome.completed(), 1);
    assert!(matches!(
        &outcome.chapter_outcomes["Chapter 2"],
        ChapterOutcome::Fatal { cause } if cause.contains("503")
    ));
    assert_eq!(origin.hits("/c/2"), config.chapter_attempts as usize);
    assert_eq!(*progress.seen.lock().unwrap(), vec![(1, 2), (2, 2)]);
    Ok(())
}

#[tokio::test]
async fn download_assembles_in_reading_order_and_resumes_for_free() -> anyhow::Result<()> {
    let origin = OriginStub::spawn();
    origin.route(
        "/m/saga",
        Reply::Html(origin_stub::title_page(&[
            ("Chapter 10", "/c/10"),
            ("Chapter 2", "/c/2"),
            ("Chapter 1", "/c/1"),
        ])),
    );
    serve_chapter(&origin, 1, 2);
    serve_chapter(&origin, 2, 3);
    serve_chapter(&origin, 10, 1);
    let temp = tempfile::TempDir::new()?;
    let config = Arc::new(Config {
        max_threads: 2,
        max_in_flight: 2,
        ..origin_stub::test_config(temp.path(), &origin.base_url)
    });

    let pipeline = Pipeline::new(Arc::clone(&config))?;
    let report = pipeline
        .download("Saga", "/m/saga", true, &NoProgress)
        .await?;

    assert_eq!(report.outcome.completed(), 3);
    let artifact = report.artifact.expect("artifact written");
    assert_eq!(artifact, config.output_root.join("Saga.pdf"));

    let doc = lopdf::Document::load(&artifact)?;
    let widths = doc
        .get_pages()
        .values()
        .map(|page_id| -> anyhow::Result<i64> {
            let media_box = doc.get_dictionary(*page_id)?.get(b"MediaBox")?.as_array()?;
            Ok((media_box[2].as_float()? / 0.75).round() as i64)
        })
        .collect::<anyhow::Result<Vec<_>>>()?;
    assert_eq!(widths, [11, 12, 21, 22, 23, 101]);

    let catalog = LocalFsCatalog::new(&config.output_root);
    let entries = catalog.find_by_name("Saga", false).await?;
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].path, artifact);

    let image_hits = origin.hits_under("/img/");
    assert_eq!(image_hits, 6);
    let again = pipeline
        .download("Saga", "/m/saga", false, &NoProgress)
        .await?;
    assert_eq!(again.outcome.completed(), 3);
    assert_eq!(origin.hits_under("/img/"), image_hits);
    assert_eq!(
        pdf::page_count(&fs::read(&artifact)?)?,
        6,
        "artifact untouched when assembly is skipped"
    );
    Ok(())
}

#[tokio::test]
async fn page_behind_a_script_url_is_assembled() -> anyhow::Result<()> {
    let origin = OriginStub::spawn();
    let script_src = origin.url("/img/view.php?page=1");
    let plain_src = origin.url("/img/2.png");
    origin.route(
        "/c/1",
        Reply::Html(origin_stub::chapter_page(&[
            ("01", script_src.as_str()),
            ("02", plain_src.as_str()),
        ])),
    );
    origin.route("/img/view.php", Reply::png(origin_stub::png_bytes(5, 4)));
    origin.route("/img/2.png", Reply::png(origin_stub::png_bytes(6, 4)));
    let temp = tempfile::TempDir::new()?;
    let config = Arc::new(origin_stub::test_config(temp.path(), &origin.base_url));
    let worker = ChapterWorker::new(Transport::new(&config)?, discovery(), &config);

    let title_dir = config.storage_root.join("T");
    let chapter_dir = title_dir.join("Chapter 1");
    let outcome = worker
        .run(&ChapterTask {
            title: "Chapter 1".to_string(),
            source_url: origin.url("/c/1"),
            local_directory: chapter_dir.clone(),
        })
        .await;

    assert_eq!(outcome, ChapterOutcome::Completed { pages: 2, skipped: 0 });
    assert!(chapter_dir.join("01.png").exists());
    assert!(chapter_dir.join("02.png").exists());
    assert!(!chapter_dir.join("01.php").exists());

    let assembler = Assembler::new(Arc::clone(&config), Arc::new(PdfEncoder::default()));
    assert_eq!(assembler.collect_pages(&title_dir)?.len(), 2);
    Ok(())
}

#[tokio::test]
async fn page_requests_carry_chapter_referer_and_browser_headers() -> anyhow::Result<()> {
    let origin = OriginStub::spawn();
    origin.route(
        "/m/t",
        Reply::Html(origin_stub::title_page(&[
            ("Chapter 1", "/c/1"),
            ("Chapter 2", "/c/2"),
        ])),
    );
    serve_chapter(&origin, 1, 2);
    serve_chapter(&origin, 2, 2);
    let temp = tempfile::TempDir::new()?;
    let config = origin_stub::test_config(temp.path(), &origin.base_url);
    let orchestrator = TitleOrchestrator::new(Transport::new(&config)?, discovery(), &config);

    let job = TitleJob {
        title: "T".to_string(),
        source_url: origin.url("/m/t"),
        base_directory: config.storage_root.clone(),
    };
    orchestrator.run(&job, &NoProgress).await?;

    let page_requests = origin.requests_under("/img/");
    assert_eq!(page_requests.len(), 4);
    for request in &page_requests {
        let chapter = request
            .path
            .trim_start_matches("/img/")
            .split('/')
            .next()
            .unwrap_or_default();
        let chapter_url = origin.url(&format!("/c/{chapter}"));
        assert_eq!(request.header("referer"), Some(chapter_url.as_str()), "{}", request.path);
        assert_eq!(request.header("user-agent"), Some(config.user_agent.as_str()));
        assert_eq!(request.header("sec-fetch-dest"), Some("image"));
        assert_eq!(request.header("sec-fetch-mode"), Some("no-cors"));
    }

    for request in origin.requests_under("/c/") {
        assert_eq!(request.header("user-agent"), Some(config.user_agent.as_str()));
        assert_eq!(request.header("referer"), None);
    }
    Ok(())
}

#[tokio::test]
async fn panicking_chapter_is_reported_as_fatal() -> anyhow::Result<()> {
    let origin = OriginStub::spawn();
    origin.route(
        "/m/t",
        Reply::Html(origin_stub::title_page(&[
            ("Chapter 1", "/c/1"),
            ("Chapter 2", "/c/2"),
        ])),
    );
    serve_chapter(&origin, 1, 2);
    origin.route(
        "/c/2",
        Reply::Html("<html><body>BROKEN MARKUP</body></html>".to_string()),
    );
    let temp = tempfile::TempDir::new()?;
    let config = origin_stub::test_config(temp.path(), &origin.base_url);
    let discovery: Arc<dyn Discovery> = Arc::new(PanicsOn {
        inner: HtmlDiscovery::new()?,
        marker: "BROKEN MARKUP",
    });
    let orchestrator = TitleOrchestrator::new(Transport::new(&config)?, discovery, &config);

    let progress = RecordingProgress::default();
    let job = TitleJob {
        title: "T".to_string(),
        source_url: origin.url("/m/t"),
        base_directory: config.storage_root.clone(),
    };
    let outcome = orchestrator.run(&job, &progress).await?;

    assert_eq!(outcome.chapter_outcomes.len(), 2);
    assert_eq!(
        outcome.chapter_outcomes["Chapter 1"],
        ChapterOutcome::Completed { pages: 2, skipped: 0 }
    );
    assert!(matches!(
        &outcome.chapter_outcomes["Chapter 2"],
        ChapterOutcome::Fatal { cause } if cause.contains("panicked")
    ));
    assert_eq!(progress.seen.lock().unwrap().last(), Some(&(2, 2)));
    Ok(())
}

#[tokio::test]
async fn chapters_folding_onto_one_directory_keep_the_first() -> anyhow::Result<()> {
    let origin = OriginStub::spawn();
    origin.route(
        "/m/t",
        Reply::Html(origin_stub::title_page(&[
            ("Vol 1/2", "/c/1"),
            ("Vol 1_2", "/c/2"),
        ])),
    );
    serve_chapter(&origin, 1, 1);
    serve_chapter(&origin, 2, 1);
    let temp = tempfile::TempDir::new()?;
    let config = origin_stub::test_config(temp.path(), &origin.base_url);
    let orchestrator = TitleOrchestrator::new(Transport::new(&config)?, discovery(), &config);

    let progress = RecordingProgress::default();
    let job = TitleJob {
        title: "T".to_string(),
        source_url: origin.url("/m/t"),
        base_directory: config.storage_root.clone(),
    };
    let outcome = orchestrator.run(&job, &progress).await?;

    assert_eq!(
        outcome.chapter_outcomes["Vol 1/2"],
        ChapterOutcome::Completed { pages: 1, skipped: 0 }
    );
    assert!(matches!(
        &outcome.chapter_outcomes["Vol 1_2"],
        ChapterOutcome::Fatal { cause } if cause.contains("Vol 1/2")
    ));
    assert_eq!(origin.hits("/c/2"), 0);
    assert_eq!(progress.seen.lock().unwrap().len(), 2);
    Ok(())
}
