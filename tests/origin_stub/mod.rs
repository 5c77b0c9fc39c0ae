#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::io::{Cursor, Read as _, Write as _};
use std::net::TcpListener;
use std::path::Path;
use std::sync::{Arc, Mutex, mpsc};
use std::thread;
use std::time::Duration;

use manga_library::config::Config;

#[derive(Debug, Clone)]
pub enum Reply {
    Html(String),
    Bytes {
        content_type: &'static str,
        body: Vec<u8>,
    },
    Status(u16),
}

impl Reply {
    pub fn png(body: Vec<u8>) -> Self {
        Self::Bytes {
            content_type: "image/png",
            body,
        }
    }
}

#[derive(Debug)]
struct Route {
    queued: VecDeque<Reply>,
    fallback: Reply,
}

/// One request as the stub saw it; header names are lowercased.
#[derive(Debug, Clone)]
pub struct Recorded {
    pub path: String,
    pub headers: HashMap<String, String>,
}

impl Recorded {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).map(String::as_str)
    }
}

type Routes = Arc<Mutex<HashMap<String, Route>>>;
type Hits = Arc<Mutex<HashMap<String, usize>>>;
type Requests = Arc<Mutex<Vec<Recorded>>>;

/// In-process HTTP origin with scripted replies and per-path hit counts.
/// Queries are ignored when matching paths.
pub struct OriginStub {
    pub base_url: String,
    routes: Routes,
    hits: Hits,
    requests: Requests,
    shutdown_tx: Option<mpsc::Sender<()>>,
    handle: Option<thread::JoinHandle<()>>,
}

impl OriginStub {
    pub fn spawn() -> Self {
        let server = tiny_http::Server::http("127.0.0.1:0").expect("start origin stub server");
        let addr = server.server_addr();
        let base_url = format!("http://{addr}");

        let routes: Routes = Arc::default();
        let hits: Hits = Arc::default();
        let requests: Requests = Arc::default();
        let (shutdown_tx, shutdown_rx) = mpsc::channel::<()>();

        let handle = {
            let routes = Arc::clone(&routes);
            let hits = Arc::clone(&hits);
            let requests = Arc::clone(&requests);
            thread::spawn(move || {
                loop {
                    if shutdown_rx.try_recv().is_ok() {
                        break;
                    }

                    let request = match server.recv_timeout(Duration::from_millis(50)) {
                        Ok(Some(req)) => req,
                        Ok(None) => continue,
                        Err(_) => break,
                    };

                    let url = request.url().to_string();
                    let path = url.split('?').next().unwrap_or(&url).to_string();
                    *hits.lock().unwrap().entry(path.clone()).or_default() += 1;
                    let headers = request
                        .headers()
                        .iter()
                        .map(|header| {
                            (
                                header.field.to_string().to_ascii_lowercase(),
                                header.value.as_str().to_string(),
                            )
                        })
                        .collect();
                    requests.lock().unwrap().push(Recorded {
                        path: path.clone(),
                        headers,
                    });

                    let reply = {
                        let mut routes = routes.lock().unwrap();
                        match routes.get_mut(&path) {
                            Some(route) => route
                                .queued
                                .pop_front()
                                .unwrap_or_else(|| route.fallback.clone()),
                            None => Reply::Status(404),
                        }
                    };

                    let _ = match reply {
                        Reply::Html(body) => request.respond(
                            tiny_http::Response::from_string(body).with_header(content_type(
                                "text/html; charset=utf-8",
                            )),
                        ),
                        Reply::Bytes { content_type: ct, body } => request.respond(
                            tiny_http::Response::from_data(body).with_header(content_type(ct)),
                        ),
                        Reply::Status(status) => request.respond(
                            tiny_http::Response::from_string(format!("status {status}"))
                                .with_status_code(status),
                        ),
                    };
                }
            })
        };

        Self {
            base_url,
            routes,
            hits,
            requests,
            shutdown_tx: Some(shutdown_tx),
            handle: Some(handle),
        }
    }

    pub fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base_url)
    }

    pub fn route(&self, path: &str, reply: Reply) {
        self.route_sequence(path, Vec::new(), reply);
    }

    /// Serves `first` in order, then `then` for every later request.
    pub fn route_sequence(&self, path: &str, first: Vec<Reply>, then: Reply) {
        self.routes.lock().unwrap().insert(
            path.to_string(),
            Route {
                queued: first.into(),
                fallback: then,
            },
        );
    }

    pub fn hits(&self, path: &str) -> usize {
        self.hits.lock().unwrap().get(path).copied().unwrap_or(0)
    }

    /// Every recorded request whose path starts with `prefix`, in arrival
    /// order.
    pub fn requests_under(&self, prefix: &str) -> Vec<Recorded> {
        self.requests
            .lock()
            .unwrap()
            .iter()
            .filter(|request| request.path.starts_with(prefix))
            .cloned()
            .collect()
    }

    /// Hits across every path starting with `prefix`.
    pub fn hits_under(&self, prefix: &str) -> usize {
        self.hits
            .lock()
            .unwrap()
            .iter()
            .filter(|(path, _)| path.starts_with(prefix))
            .map(|(_, count)| count)
            .sum()
    }
}

impl Drop for OriginStub {
    fn drop(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

fn content_type(value: &str) -> tiny_http::Header {
    tiny_http::Header::from_bytes(&b"Content-Type"[..], value.as_bytes()).expect("build header")
}

/// Accepts `connections` requests, each answered with a `Content-Length` far
/// larger than the bytes actually sent before the socket closes.
pub fn spawn_truncating_server(connections: usize) -> (String, thread::JoinHandle<()>) {
    let listener = TcpListener::bind("127.0.0.1:0").expect("bind truncating server");
    let base_url = format!("http://{}", listener.local_addr().expect("local addr"));

    let handle = thread::spawn(move || {
        for stream in listener.incoming().take(connections) {
            let Ok(mut stream) = stream else { continue };
            let mut request = Vec::new();
            let mut buf = [0_u8; 1024];
            while !request.windows(4).any(|w| w == b"\r\n\r\n") {
                match stream.read(&mut buf) {
                    Ok(0) | Err(_) => break,
                    Ok(n) => request.extend_from_slice(&buf[..n]),
                }
            }
            let _ = stream.write_all(
                b"HTTP/1.1 200 OK\r\nContent-Type: image/jpeg\r\nContent-Length: 1000\r\nConnection: close\r\n\r\n0123456789",
            );
            let _ = stream.flush();
        }
    });

    (base_url, handle)
}

/// Solid-colour PNG; the width doubles as an ordering marker in PDFs.
pub fn png_bytes(width: u32, height: u32) -> Vec<u8> {
    let image = image::RgbImage::from_pixel(width, height, image::Rgb([30, 60, 90]));
    let mut out = Cursor::new(Vec::new());
    image
        .write_to(&mut out, image::ImageFormat::Png)
        .expect("encode png");
    out.into_inner()
}

/// Config rooted in `dir`, pointed at `base_url`, with no backoff delays.
pub fn test_config(dir: &Path, base_url: &str) -> Config {
    Config {
        base_url: base_url.to_string(),
        storage_root: dir.join("storage"),
        output_root: dir.join("library"),
        request_timeout: Duration::from_secs(10),
        unit_backoff: Duration::ZERO..=Duration::ZERO,
        chapter_backoff: Duration::ZERO..=Duration::ZERO,
        ..Config::default()
    }
}

pub fn title_page(chapters: &[(&str, &str)]) -> String {
    let links = chapters
        .iter()
        .map(|(name, href)| {
            format!(
                r#"<a class="vstack gap-1 site-manga-thumbnail__link" href="{href}"><img alt="{name}"></a>"#
            )
        })
        .collect::<Vec<_>>()
        .join("\n");
    format!("<!doctype html><html><body>{links}</body></html>")
}

pub fn chapter_page(pages: &[(&str, &str)]) -> String {
    let images = pages
        .iter()
        .map(|(alt, src)| {
            format!(r#"<img class="site-reader__image" alt="{alt}" data-page-image-url="{src}">"#)
        })
        .collect::<Vec<_>>()
        .join("\n");
    format!("<!doctype html><html><body>{images}</body></html>")
}

pub fn search_page(titles: &[(&str, &str)]) -> String {
    let cards = titles
        .iter()
        .map(|(name, href)| {
            format!(r#"<a class="site-card__link" href="{href}"><img alt="{name}"></a>"#)
        })
        .collect::<Vec<_>>()
        .join("\n");
    format!("<!doctype html><html><body>{cards}</body></html>")
}
