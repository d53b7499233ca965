//! Error types for the render service

use thiserror::Error;

/// Result type alias for render operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while queueing, loading or rendering pages
///
/// `Error` is `Clone` because a single terminal failure is delivered to every
/// caller that was coalesced onto the same page load.
#[derive(Error, Debug, Clone)]
pub enum Error {
    /// Failed to initialize the engine or the server
    #[error("Engine initialization failed: {0}")]
    InitializationError(String),

    /// A single page load attempt failed
    #[error("Failed to load URL: {0}")]
    LoadError(String),

    /// Every load attempt for a URL failed; no further retries happen
    #[error("Loading of {url} failed after {attempts} attempts: {last_error}")]
    OpenFailed {
        url: String,
        attempts: u32,
        last_error: Box<Error>,
    },

    /// Rendering a single request failed on an otherwise usable page
    #[error("Rendering failed: {0}")]
    RenderError(String),

    /// The page handle became unusable; every remaining request on it fails
    #[error("Page is no longer usable: {0}")]
    PageClosed(String),

    /// Operation timed out
    #[error("Operation timed out after {0}ms")]
    Timeout(u64),

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    ConfigError(String),

    /// Malformed render request
    #[error("Invalid request: {0}")]
    ValidationError(String),

    /// The render queue no longer accepts work
    #[error("Render queue is shut down")]
    Shutdown,

    /// Generic error
    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Stable machine-readable name of the error variant
    pub fn kind(&self) -> &'static str {
        match self {
            Error::InitializationError(_) => "initialization_error",
            Error::LoadError(_) => "load_error",
            Error::OpenFailed { .. } => "open_failed",
            Error::RenderError(_) => "render_error",
            Error::PageClosed(_) => "page_closed",
            Error::Timeout(_) => "timeout",
            Error::ConfigError(_) => "config_error",
            Error::ValidationError(_) => "validation_error",
            Error::Shutdown => "shutdown",
            Error::Other(_) => "other",
        }
    }

    /// Whether the error invalidates the page it was raised on, rather than
    /// just the request being rendered.
    pub fn is_page_fatal(&self) -> bool {
        matches!(self, Error::PageClosed(_))
    }
}
