//! End-to-end rendering through headless Chrome
#![cfg(feature = "cdp")]

use pageshot::cdp::CdpPageSource;
use pageshot::{EngineConfig, Error, QueueConfig, RenderOptions, RenderQueue};
use std::sync::Once;
use tiny_http::{Response, Server};

static INIT: Once = Once::new();

/// Start a simple test HTTP server
fn start_test_server() -> String {
    INIT.call_once(|| {
        std::thread::spawn(|| {
            let server = Server::http("127.0.0.1:18090").unwrap();
            for request in server.incoming_requests() {
                let response = match request.url() {
                    "/" => Response::from_string(
                        r#"<!DOCTYPE html>
<html>
<head><title>Test Page</title></head>
<body style="background: #3366cc">
<h1>Hello from Test Server</h1>
</body>
</html>"#,
                    )
                    .with_header(
                        "Content-Type: text/html; charset=utf-8"
                            .parse::<tiny_http::Header>()
                            .unwrap(),
                    ),
                    _ => Response::from_string("Not Found").with_status_code(404),
                };
                let _ = request.respond(response);
            }
        });
        // Give the server time to start
        std::thread::sleep(std::time::Duration::from_millis(100));
    });

    "http://127.0.0.1:18090/".to_string()
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
#[ignore] // Requires Chrome to be installed
async fn test_coalesced_screenshots() {
    let url = start_test_server();
    let source = CdpPageSource::launch(EngineConfig::default()).expect("Failed to launch Chrome");
    let queue = RenderQueue::start(source, QueueConfig::default()).expect("Failed to start queue");

    let small = queue.submit(url.as_str(), RenderOptions::sized(320, 240));
    let default = queue.submit(url.as_str(), RenderOptions::default());

    for image in [small.await, default.await] {
        let image = image.expect("Failed to render");
        assert!(image.data.len() > 100, "PNG data seems too small");
        assert_eq!(&image.data[0..8], b"\x89PNG\r\n\x1a\n");
    }

    queue.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
#[ignore] // Requires Chrome to be installed
async fn test_unreachable_url_fails_after_retries() {
    let source = CdpPageSource::launch(EngineConfig {
        timeout_ms: 2000,
        ..Default::default()
    })
    .expect("Failed to launch Chrome");
    let queue = RenderQueue::start(source, QueueConfig::default()).expect("Failed to start queue");

    let result = queue
        .submit("http://127.0.0.1:1/", RenderOptions::default())
        .await;
    assert!(matches!(result, Err(Error::OpenFailed { attempts: 5, .. })));

    queue.shutdown().await;
}
