//! HTTP front end
//!
//! `GET /?url=<uri>[&width=<n>&height=<n>]` renders a page, `GET /health`
//! reports queue statistics. The listener runs on its own thread (tiny_http is
//! blocking); render results are awaited on the tokio runtime and written
//! back from its blocking pool.

use crate::{BodyEncoding, Error, PageSource, RenderOptions, RenderQueue, RenderedImage, Result, ServerConfig};
use base64::Engine as Base64Engine;
use log::{debug, info, warn};
use serde::Serialize;
use std::io::Cursor;
use std::net::SocketAddr;
use std::sync::Arc;
use std::thread::JoinHandle;
use tiny_http::{Header, Method, Request, Response, Server};

type HttpResponse = Response<Cursor<Vec<u8>>>;

/// A parsed and validated render request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderQuery {
    pub url: String,
    pub options: RenderOptions,
}

/// Parse the query string of a render request.
///
/// `url` is required and must be an absolute http(s) URL; `width` and
/// `height` are non-negative integers that come as a pair. Anything else is a
/// [`Error::ValidationError`].
pub fn parse_query(query: &str) -> Result<RenderQuery> {
    let mut url = None;
    let mut width = None;
    let mut height = None;

    for (key, value) in url::form_urlencoded::parse(query.as_bytes()) {
        let slot = match key.as_ref() {
            "url" => &mut url,
            "width" => &mut width,
            "height" => &mut height,
            other => {
                return Err(Error::ValidationError(format!("unknown parameter `{}`", other)));
            }
        };
        if slot.is_some() {
            return Err(Error::ValidationError(format!("parameter `{}` given more than once", key)));
        }
        *slot = Some(value.into_owned());
    }

    let url = url.ok_or_else(|| Error::ValidationError("missing required parameter `url`".into()))?;
    match url::Url::parse(&url) {
        Ok(parsed) if matches!(parsed.scheme(), "http" | "https") => {}
        Ok(parsed) => {
            return Err(Error::ValidationError(format!(
                "`url` must use http or https, got `{}`",
                parsed.scheme()
            )));
        }
        Err(e) => return Err(Error::ValidationError(format!("`url` is not a valid URI: {}", e))),
    }

    let width = width.map(|w| parse_dimension("width", &w)).transpose()?;
    let height = height.map(|h| parse_dimension("height", &h)).transpose()?;
    if width.is_some() != height.is_some() {
        return Err(Error::ValidationError("`width` and `height` must be given together".into()));
    }

    Ok(RenderQuery {
        url,
        options: RenderOptions { width, height },
    })
}

fn parse_dimension(name: &str, raw: &str) -> Result<u32> {
    raw.parse::<u32>()
        .map_err(|_| Error::ValidationError(format!("`{}` must be a non-negative integer, got `{}`", name, raw)))
}

/// HTTP status for a failed render
pub fn status_for(err: &Error) -> u16 {
    match err {
        Error::ValidationError(_) | Error::OpenFailed { .. } => 400,
        Error::Shutdown => 503,
        _ => 500,
    }
}

#[derive(Serialize)]
struct ErrorBody<'a> {
    kind: &'a str,
    message: String,
}

/// What to do with one incoming request
enum Route {
    Render(RenderQuery),
    Health,
    Reply(HttpResponse),
}

fn route(method: &Method, raw_url: &str) -> Route {
    let (path, query) = raw_url.split_once('?').unwrap_or((raw_url, ""));
    match path {
        "/" | "/health" if *method != Method::Get => text_response(405, "Method Not Allowed").into(),
        "/" => match parse_query(query) {
            Ok(query) => Route::Render(query),
            Err(err) => {
                debug!("Rejected request {}: {}", raw_url, err);
                error_response(&err).into()
            }
        },
        "/health" => Route::Health,
        _ => text_response(404, "Not Found").into(),
    }
}

impl From<HttpResponse> for Route {
    fn from(response: HttpResponse) -> Self {
        Route::Reply(response)
    }
}

fn with_header(response: HttpResponse, name: &str, value: &str) -> HttpResponse {
    match Header::from_bytes(name.as_bytes(), value.as_bytes()) {
        Ok(header) => response.with_header(header),
        Err(()) => {
            warn!("Dropping malformed header {}: {}", name, value);
            response
        }
    }
}

fn text_response(status: u16, body: &str) -> HttpResponse {
    Response::from_string(body).with_status_code(status)
}

fn json_response<T: Serialize>(status: u16, value: &T) -> HttpResponse {
    match serde_json::to_vec(value) {
        Ok(body) => with_header(
            Response::from_data(body).with_status_code(status),
            "Content-Type",
            "application/json",
        ),
        Err(e) => text_response(500, &format!("Failed to serialize response: {}", e)),
    }
}

fn error_response(err: &Error) -> HttpResponse {
    json_response(
        status_for(err),
        &ErrorBody {
            kind: err.kind(),
            message: err.to_string(),
        },
    )
}

fn image_response(image: &RenderedImage, encoding: BodyEncoding) -> HttpResponse {
    match encoding {
        BodyEncoding::Base64 => {
            let body = Base64Engine::encode(&base64::engine::general_purpose::STANDARD, &image.data);
            let response = Response::from_data(body.into_bytes()).with_status_code(200);
            let response = with_header(response, "Content-Type", image.mime);
            with_header(response, "Content-Transfer-Encoding", "Base64")
        }
        BodyEncoding::Binary => {
            let response = Response::from_data(image.data.clone()).with_status_code(200);
            with_header(response, "Content-Type", image.mime)
        }
    }
}

fn respond(request: Request, response: HttpResponse) {
    if let Err(e) = request.respond(response) {
        warn!("Failed to write response: {}", e);
    }
}

/// A running HTTP front end bound to one render queue
pub struct HttpServer {
    server: Arc<Server>,
    addr: SocketAddr,
    thread: Option<JoinHandle<()>>,
}

impl HttpServer {
    /// Bind `config.addr` and start serving on a dedicated thread.
    ///
    /// Render requests are awaited on `runtime`, which must outlive the
    /// server.
    pub fn start<S: PageSource>(
        config: ServerConfig,
        queue: RenderQueue<S>,
        runtime: tokio::runtime::Handle,
    ) -> Result<Self> {
        let server = Server::http(config.addr)
            .map_err(|e| Error::InitializationError(format!("Failed to bind {}: {}", config.addr, e)))?;
        let addr = server
            .server_addr()
            .to_ip()
            .ok_or_else(|| Error::InitializationError("Server is not listening on an IP address".into()))?;

        let server = Arc::new(server);
        let listener = server.clone();
        let encoding = config.body_encoding;
        let thread = std::thread::Builder::new()
            .name("pageshot-http".into())
            .spawn(move || serve(&listener, &queue, &runtime, encoding))
            .map_err(|e| Error::InitializationError(format!("Failed to spawn server thread: {}", e)))?;

        info!("Listening on http://{}/", addr);
        Ok(Self {
            server,
            addr,
            thread: Some(thread),
        })
    }

    /// The bound address (useful when the configured port was 0)
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Stop accepting connections and wait for the listener thread.
    ///
    /// Renders already submitted still complete on the runtime.
    pub fn shutdown(mut self) {
        self.server.unblock();
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                warn!("HTTP listener thread panicked");
            }
        }
        debug!("HTTP server on {} stopped", self.addr);
    }
}

fn serve<S: PageSource>(
    server: &Server,
    queue: &RenderQueue<S>,
    runtime: &tokio::runtime::Handle,
    encoding: BodyEncoding,
) {
    for request in server.incoming_requests() {
        debug!("{} {}", request.method(), request.url());

        match route(request.method(), request.url()) {
            Route::Render(query) => {
                info!("Render request for {} {:?}", query.url, query.options);
                let ticket = queue.submit(query.url, query.options);
                runtime.spawn(async move {
                    let response = match ticket.await {
                        Ok(image) => image_response(&image, encoding),
                        Err(err) => {
                            warn!("Render failed: {}", err);
                            error_response(&err)
                        }
                    };
                    if let Err(e) = tokio::task::spawn_blocking(move || respond(request, response)).await {
                        warn!("Response writer failed: {}", e);
                    }
                });
            }
            Route::Health => respond(request, json_response(200, &queue.stats())),
            Route::Reply(response) => respond(request, response),
        }
    }
}
