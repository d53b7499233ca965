//! Integration tests for the HTTP front end, served over a real socket

use base64::Engine as Base64Engine;
use pageshot::scripted::{OpenOutcome, ScriptedPageSource};
use pageshot::server::HttpServer;
use pageshot::{BodyEncoding, QueueConfig, RenderQueue, ServerConfig, Viewport};
use std::net::SocketAddr;

struct Service {
    runtime: tokio::runtime::Runtime,
    queue: RenderQueue<ScriptedPageSource>,
    server: HttpServer,
    source: ScriptedPageSource,
}

impl Service {
    fn start(body_encoding: BodyEncoding) -> Self {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(2)
            .enable_all()
            .build()
            .unwrap();
        let source = ScriptedPageSource::new();
        let queue = runtime
            .block_on(async { RenderQueue::start(source.clone(), QueueConfig::default()) })
            .unwrap();
        let config = ServerConfig {
            addr: SocketAddr::from(([127, 0, 0, 1], 0)),
            body_encoding,
        };
        let server = HttpServer::start(config, queue.clone(), runtime.handle().clone()).unwrap();
        Self {
            runtime,
            queue,
            server,
            source,
        }
    }

    fn url(&self, path_and_query: &str) -> String {
        format!("http://{}{}", self.server.addr(), path_and_query)
    }

    fn stop(self) {
        self.server.shutdown();
        self.runtime.block_on(self.queue.shutdown());
    }
}

#[test]
fn renders_png_as_base64_by_default() {
    let service = Service::start(BodyEncoding::Base64);

    let resp = reqwest::blocking::get(service.url("/?url=https%3A%2F%2Fexample.com&width=640&height=480")).unwrap();
    assert_eq!(resp.status().as_u16(), 200);
    assert_eq!(resp.headers()["content-type"], "image/png");
    assert_eq!(resp.headers()["content-transfer-encoding"], "Base64");

    let body = resp.text().unwrap();
    let png = base64::engine::general_purpose::STANDARD.decode(body.trim()).unwrap();
    let expected = ScriptedPageSource::expected_png("https://example.com", Viewport { width: 640, height: 480 });
    assert_eq!(png, expected);

    service.stop();
}

#[test]
fn renders_raw_png_when_configured() {
    let service = Service::start(BodyEncoding::Binary);

    let resp = reqwest::blocking::get(service.url("/?url=https://example.com")).unwrap();
    assert_eq!(resp.status().as_u16(), 200);
    assert_eq!(resp.headers()["content-type"], "image/png");
    assert!(resp.headers().get("content-transfer-encoding").is_none());
    let body = resp.bytes().unwrap();
    assert_eq!(&body[0..8], b"\x89PNG\r\n\x1a\n");

    service.stop();
}

#[test]
fn invalid_requests_get_400_with_json_error() {
    let service = Service::start(BodyEncoding::Base64);

    for query in ["/", "/?url=https://example.com&width=10", "/?url=nope", "/?url=https://example.com&x=1"] {
        let resp = reqwest::blocking::get(service.url(query)).unwrap();
        assert_eq!(resp.status().as_u16(), 400, "query {}", query);
        let body: serde_json::Value = resp.json().unwrap();
        assert_eq!(body["kind"], "validation_error");
    }
    assert!(service.source.opens().is_empty());

    service.stop();
}

#[test]
fn unknown_paths_are_not_found() {
    let service = Service::start(BodyEncoding::Base64);

    let resp = reqwest::blocking::get(service.url("/render?url=https://example.com")).unwrap();
    assert_eq!(resp.status().as_u16(), 404);
    assert_eq!(resp.text().unwrap(), "Not Found");

    service.stop();
}

#[test]
fn failed_loads_are_reported_as_open_failed() {
    let service = Service::start(BodyEncoding::Base64);
    service
        .source
        .script_opens("https://bad.example", (0..5).map(|_| OpenOutcome::Failure("fail".into())));

    let resp = reqwest::blocking::get(service.url("/?url=https://bad.example")).unwrap();
    assert_eq!(resp.status().as_u16(), 400);
    let body: serde_json::Value = resp.json().unwrap();
    assert_eq!(body["kind"], "open_failed");
    assert!(body["message"].as_str().unwrap().contains("https://bad.example"));
    assert_eq!(service.source.open_count("https://bad.example"), 5);

    service.stop();
}

#[test]
fn health_reports_queue_stats() {
    let service = Service::start(BodyEncoding::Base64);

    let resp = reqwest::blocking::get(service.url("/?url=https://example.com")).unwrap();
    assert_eq!(resp.status().as_u16(), 200);

    let resp = reqwest::blocking::get(service.url("/health")).unwrap();
    assert_eq!(resp.status().as_u16(), 200);
    let stats: serde_json::Value = resp.json().unwrap();
    assert_eq!(stats["max_workers"], 10);
    assert_eq!(stats["pending_urls"], 0);
    assert_eq!(stats["completed_cycles"], 1);
    assert_eq!(stats["images_rendered"], 1);

    service.stop();
}

#[test]
fn concurrent_http_requests_share_one_page_load() {
    let service = Service::start(BodyEncoding::Base64);
    service.source.hold_opens();

    let url = service.url("/?url=https://example.com");
    let handles: Vec<_> = (0..4)
        .map(|_| {
            let url = url.clone();
            std::thread::spawn(move || reqwest::blocking::get(url).unwrap().text().unwrap())
        })
        .collect();

    // Let every request reach the queue before the page finishes loading
    let deadline = std::time::Instant::now() + std::time::Duration::from_secs(5);
    while service.queue.stats().waiting_requests < 4 {
        assert!(std::time::Instant::now() < deadline, "requests never reached the queue");
        std::thread::sleep(std::time::Duration::from_millis(5));
    }
    service.source.release_opens();

    let bodies: Vec<String> = handles.into_iter().map(|h| h.join().unwrap()).collect();
    assert!(bodies.windows(2).all(|w| w[0] == w[1]));
    assert_eq!(service.source.open_count("https://example.com"), 1);

    service.stop();
}
