//! Pageshot
//!
//! A web page to PNG rendering service. Clients submit a URL plus optional
//! target dimensions; pages are loaded in an external headless engine and the
//! resulting image bytes are handed back to every caller that asked for them.
//!
//! # Features
//!
//! - **Request coalescing**: concurrent requests for the same URL share a
//!   single page load, each still getting its own render pass
//! - **Bounded concurrency**: at most `max_workers` page loads run at once,
//!   served first-come-first-served
//! - **Retries**: transient load failures are retried before every waiting
//!   caller is told about the failure
//! - **CDP Backend** (default): pages are loaded in headless Chrome
//!
//! # Example
//!
//! ```no_run
//! # #[cfg(feature = "cdp")]
//! # async fn run() -> pageshot::Result<()> {
//! use pageshot::{QueueConfig, RenderOptions, RenderQueue};
//! use pageshot::cdp::CdpPageSource;
//!
//! let source = CdpPageSource::launch(pageshot::EngineConfig::default())?;
//! let queue = RenderQueue::start(source, QueueConfig::default())?;
//!
//! let image = queue
//!     .submit("https://example.com", RenderOptions::sized(1024, 768))
//!     .await?;
//! assert_eq!(image.mime, "image/png");
//!
//! queue.shutdown().await;
//! # Ok(())
//! # }
//! ```

use std::collections::HashMap;
use std::future::Future;

pub mod config;
pub mod error;
pub use config::{BodyEncoding, QueueConfig, ServerConfig};
pub use error::{Error, Result};

#[cfg(feature = "cdp")]
pub mod cdp;

// Scripted in-process page source for tests and benches
pub mod scripted;

pub mod queue;
pub use queue::{QueueStats, RenderQueue, RenderTicket, OPEN_ATTEMPTS};

pub mod server;

/// MIME type of every image produced by the service
pub const PNG_MIME: &str = "image/png";

/// Configuration for the headless engine backend
///
/// The defaults mirror what the service has always shipped with: scripts are
/// disabled and pages get 30 seconds to finish loading.
///
/// # Examples
///
/// ```
/// let cfg = pageshot::EngineConfig::default();
/// assert!(!cfg.enable_javascript);
/// assert_eq!(cfg.viewport.width, 1280);
/// ```
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// User agent string to send with requests
    pub user_agent: String,
    /// Initial viewport of every page before any request resizes it
    pub viewport: Viewport,
    /// Timeout for page loads in milliseconds
    pub timeout_ms: u64,
    /// Custom HTTP headers
    pub headers: HashMap<String, String>,
    /// Whether pages may execute JavaScript
    pub enable_javascript: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            user_agent: "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) HeadlessChrome Pageshot/0.1".to_string(),
            viewport: Viewport::default(),
            timeout_ms: 30000,
            headers: HashMap::new(),
            enable_javascript: false,
        }
    }
}

/// Viewport dimensions
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Viewport {
    pub width: u32,
    pub height: u32,
}

impl Default for Viewport {
    fn default() -> Self {
        Self {
            width: 1280,
            height: 720,
        }
    }
}

/// Per-request render options
///
/// The viewport is only changed when both dimensions are present and
/// non-zero; any other request renders whatever viewport the page currently
/// has.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RenderOptions {
    pub width: Option<u32>,
    pub height: Option<u32>,
}

impl RenderOptions {
    /// Options that resize the viewport before rendering
    pub fn sized(width: u32, height: u32) -> Self {
        Self {
            width: Some(width),
            height: Some(height),
        }
    }

    /// The viewport to apply, if both dimensions were given and non-zero
    pub fn viewport(&self) -> Option<Viewport> {
        match (self.width, self.height) {
            (Some(width), Some(height)) if width > 0 && height > 0 => Some(Viewport { width, height }),
            _ => None,
        }
    }
}

/// A rendered page
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderedImage {
    /// Encoded image bytes
    pub data: Vec<u8>,
    /// MIME type of `data`
    pub mime: &'static str,
}

impl RenderedImage {
    pub fn png(data: Vec<u8>) -> Self {
        Self {
            data,
            mime: PNG_MIME,
        }
    }
}

/// Source of loaded pages, implemented by engine backends
///
/// `open` must only succeed once the engine reports a successful load. An
/// attempt that fails has to release whatever it acquired before returning
/// the error; callers never see a partially-opened page.
pub trait PageSource: Send + Sync + 'static {
    type Page: Page;

    /// Open `url` in a fresh page and wait for it to finish loading
    fn open(&self, url: &str) -> impl Future<Output = Result<Self::Page>> + Send;
}

/// A loaded page owned by exactly one worker for one render cycle
pub trait Page: Send + 'static {
    /// Resize the page's viewport; the new size sticks for later renders
    fn set_viewport(&mut self, viewport: Viewport) -> impl Future<Output = Result<()>> + Send;

    /// Rasterize the page's current state to PNG bytes
    fn render_png(&mut self) -> impl Future<Output = Result<Vec<u8>>> + Send;

    /// Release every resource held by the page
    fn close(self) -> impl Future<Output = Result<()>> + Send;
}
