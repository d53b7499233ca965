//! Chrome DevTools Protocol page backend

use crate::{EngineConfig, Error, Page, PageSource, Result, Viewport};
use headless_chrome::protocol::cdp::Emulation;
use headless_chrome::protocol::cdp::Page as CdpPageDomain;
use headless_chrome::types::Bounds;
use headless_chrome::{Browser, LaunchOptions, Tab};
use log::{debug, warn};
use std::sync::Arc;
use std::time::Duration;

/// CDP-based page source (uses the `headless_chrome` crate)
///
/// Launches one headless Chrome process; every `open` gets its own tab, so
/// concurrent cycles never share page state. All protocol calls block, so
/// they run on tokio's blocking pool.
pub struct CdpPageSource {
    browser: Browser,
    config: Arc<EngineConfig>,
}

impl CdpPageSource {
    pub fn launch(config: EngineConfig) -> Result<Self> {
        let launch_options = LaunchOptions::default_builder()
            .headless(true)
            .window_size(Some((config.viewport.width, config.viewport.height)))
            .idle_browser_timeout(Duration::from_secs(u64::from(u32::MAX)))
            .build()
            .map_err(|e| Error::InitializationError(format!("Failed to build launch options: {}", e)))?;

        let browser = Browser::new(launch_options)
            .map_err(|e| Error::InitializationError(format!("Failed to launch browser: {}", e)))?;

        debug!("Launched headless Chrome");
        Ok(Self {
            browser,
            config: Arc::new(config),
        })
    }
}

impl PageSource for CdpPageSource {
    type Page = CdpPage;

    async fn open(&self, url: &str) -> Result<CdpPage> {
        let browser = self.browser.clone();
        let config = self.config.clone();
        let url = url.to_string();

        tokio::task::spawn_blocking(move || open_tab(&browser, &config, url))
            .await
            .map_err(|e| Error::Other(format!("Open task failed: {}", e)))?
    }
}

fn open_tab(browser: &Browser, config: &EngineConfig, url: String) -> Result<CdpPage> {
    let tab = browser
        .new_tab()
        .map_err(|e| Error::LoadError(format!("Failed to create tab: {}", e)))?;

    if let Err(err) = load(&tab, config, &url) {
        // A failed attempt must not leave its tab behind
        if let Err(close_err) = tab.close(false) {
            warn!("Failed to close tab after failed load of {}: {}", url, close_err);
        }
        return Err(err);
    }

    Ok(CdpPage { tab, url })
}

fn load(tab: &Tab, config: &EngineConfig, url: &str) -> Result<()> {
    tab.set_default_timeout(Duration::from_millis(config.timeout_ms));

    tab.set_user_agent(&config.user_agent, None, None)
        .map_err(|e| Error::LoadError(format!("Failed to set user agent: {}", e)))?;

    if !config.headers.is_empty() {
        // headless_chrome expects a HashMap<&str, &str>
        let headers: std::collections::HashMap<&str, &str> = config
            .headers
            .iter()
            .map(|(k, v)| (k.as_str(), v.as_str()))
            .collect();

        tab.set_extra_http_headers(headers)
            .map_err(|e| Error::LoadError(format!("Failed to set headers: {}", e)))?;
    }

    if !config.enable_javascript {
        tab.call_method(Emulation::SetScriptExecutionDisabled { value: true })
            .map_err(|e| Error::LoadError(format!("Failed to disable scripts: {}", e)))?;
    }

    tab.navigate_to(url)
        .map_err(|e| Error::LoadError(format!("Navigation to {} failed: {}", url, e)))?;

    tab.wait_until_navigated().map_err(|e| match e.to_string() {
        msg if msg.contains("timed out") || msg.contains("Timeout") => Error::Timeout(config.timeout_ms),
        msg => Error::LoadError(format!("Loading of {} failed: {}", url, msg)),
    })?;

    debug!("Loaded {}", url);
    Ok(())
}

/// A loaded Chrome tab
pub struct CdpPage {
    tab: Arc<Tab>,
    url: String,
}

impl CdpPage {
    /// Run a blocking protocol call against this tab on the blocking pool.
    async fn with_tab<T, F>(&self, call: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&Tab) -> Result<T> + Send + 'static,
    {
        let tab = self.tab.clone();
        tokio::task::spawn_blocking(move || call(&tab))
            .await
            .map_err(|e| Error::PageClosed(format!("Tab task failed: {}", e)))?
    }
}

impl Page for CdpPage {
    async fn set_viewport(&mut self, viewport: Viewport) -> Result<()> {
        self.with_tab(move |tab| {
            tab.set_bounds(Bounds::Normal {
                left: None,
                top: None,
                width: Some(f64::from(viewport.width)),
                height: Some(f64::from(viewport.height)),
            })
            .map(|_| ())
            .map_err(|e| Error::RenderError(format!("Failed to resize viewport: {}", e)))
        })
        .await
    }

    async fn render_png(&mut self) -> Result<Vec<u8>> {
        self.with_tab(|tab| {
            tab.capture_screenshot(CdpPageDomain::CaptureScreenshotFormatOption::Png, None, None, true)
                .map_err(|e| Error::RenderError(format!("Screenshot failed: {}", e)))
        })
        .await
    }

    async fn close(self) -> Result<()> {
        let url = self.url.clone();
        self.with_tab(move |tab| {
            tab.close(false)
                .map(|_| ())
                .map_err(|e| Error::Other(format!("Failed to close tab for {}: {}", url, e)))
        })
        .await
    }
}
