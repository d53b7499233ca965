//! Scripted in-process page source.
//!
//! `ScriptedPageSource` stands in for a real engine in tests, benchmarks and
//! dry runs. Open outcomes and render failures can be scripted per URL, opens
//! and closes can be held pending until released, and every open, render and close is
//! recorded for later inspection.

use crate::{Error, Page, PageSource, Result, Viewport};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::watch;

const PNG_SIGNATURE: &[u8] = b"\x89PNG\r\n\x1a\n";

/// Outcome of one scripted open attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OpenOutcome {
    Success,
    /// The engine reports a non-success load status with this message
    Failure(String),
}

/// A page source whose behaviour is scripted per URL
///
/// URLs without a script open successfully. Clones share the same script and
/// recordings.
#[derive(Clone)]
pub struct ScriptedPageSource {
    state: Arc<ScriptState>,
}

struct ScriptState {
    initial_viewport: Viewport,
    open_delay: Mutex<Duration>,
    open_scripts: Mutex<HashMap<String, VecDeque<OpenOutcome>>>,
    render_failures: Mutex<HashMap<String, VecDeque<Error>>>,
    opens: Mutex<Vec<String>>,
    renders: Mutex<Vec<(String, Viewport)>>,
    closes: Mutex<Vec<String>>,
    outstanding: AtomicUsize,
    peak_outstanding: AtomicUsize,
    /// `true` while opens are allowed to complete
    gate: watch::Sender<bool>,
    /// `true` while closes are allowed to complete
    close_gate: watch::Sender<bool>,
    closing: AtomicUsize,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl ScriptedPageSource {
    pub fn new() -> Self {
        Self::with_viewport(Viewport::default())
    }

    /// A source whose pages start out with `viewport`
    pub fn with_viewport(viewport: Viewport) -> Self {
        let (gate, _) = watch::channel(true);
        let (close_gate, _) = watch::channel(true);
        Self {
            state: Arc::new(ScriptState {
                initial_viewport: viewport,
                open_delay: Mutex::new(Duration::ZERO),
                open_scripts: Mutex::new(HashMap::new()),
                render_failures: Mutex::new(HashMap::new()),
                opens: Mutex::new(Vec::new()),
                renders: Mutex::new(Vec::new()),
                closes: Mutex::new(Vec::new()),
                outstanding: AtomicUsize::new(0),
                peak_outstanding: AtomicUsize::new(0),
                gate,
                close_gate,
                closing: AtomicUsize::new(0),
            }),
        }
    }

    /// Queue up outcomes for the next open attempts of `url`
    pub fn script_opens(&self, url: &str, outcomes: impl IntoIterator<Item = OpenOutcome>) {
        lock(&self.state.open_scripts)
            .entry(url.to_string())
            .or_default()
            .extend(outcomes);
    }

    /// Make the next render of `url` fail with `err`
    pub fn fail_next_render(&self, url: &str, err: Error) {
        lock(&self.state.render_failures)
            .entry(url.to_string())
            .or_default()
            .push_back(err);
    }

    /// Simulated load time of every open
    pub fn set_open_delay(&self, delay: Duration) {
        *lock(&self.state.open_delay) = delay;
    }

    /// Keep every open pending until [`release_opens`](Self::release_opens)
    pub fn hold_opens(&self) {
        self.state.gate.send_replace(false);
    }

    pub fn release_opens(&self) {
        self.state.gate.send_replace(true);
    }

    /// Keep every close pending until [`release_closes`](Self::release_closes)
    pub fn hold_closes(&self) {
        self.state.close_gate.send_replace(false);
    }

    pub fn release_closes(&self) {
        self.state.close_gate.send_replace(true);
    }

    /// Pages whose close has started but not finished
    pub fn closing_pages(&self) -> usize {
        self.state.closing.load(Ordering::SeqCst)
    }

    /// Every URL passed to `open`, in call order
    pub fn opens(&self) -> Vec<String> {
        lock(&self.state.opens).clone()
    }

    pub fn open_count(&self, url: &str) -> usize {
        lock(&self.state.opens).iter().filter(|u| *u == url).count()
    }

    /// Successful renders as `(url, viewport at render time)`
    pub fn renders(&self) -> Vec<(String, Viewport)> {
        lock(&self.state.renders).clone()
    }

    /// URLs of closed pages, in close order
    pub fn closes(&self) -> Vec<String> {
        lock(&self.state.closes).clone()
    }

    /// Opens started but not yet finished
    pub fn outstanding_opens(&self) -> usize {
        self.state.outstanding.load(Ordering::SeqCst)
    }

    /// Highest number of simultaneously outstanding opens seen so far
    pub fn peak_outstanding_opens(&self) -> usize {
        self.state.peak_outstanding.load(Ordering::SeqCst)
    }

    /// The bytes a page of `url` renders at `viewport`
    pub fn expected_png(url: &str, viewport: Viewport) -> Vec<u8> {
        let mut data = PNG_SIGNATURE.to_vec();
        data.extend_from_slice(format!("{} {}x{}", url, viewport.width, viewport.height).as_bytes());
        data
    }
}

impl Default for ScriptedPageSource {
    fn default() -> Self {
        Self::new()
    }
}

impl ScriptState {
    fn next_open_outcome(&self, url: &str) -> OpenOutcome {
        lock(&self.open_scripts)
            .get_mut(url)
            .and_then(VecDeque::pop_front)
            .unwrap_or(OpenOutcome::Success)
    }

    fn next_render_failure(&self, url: &str) -> Option<Error> {
        lock(&self.render_failures).get_mut(url).and_then(VecDeque::pop_front)
    }
}

impl PageSource for ScriptedPageSource {
    type Page = ScriptedPage;

    async fn open(&self, url: &str) -> Result<ScriptedPage> {
        let state = self.state.clone();
        lock(&state.opens).push(url.to_string());
        let now = state.outstanding.fetch_add(1, Ordering::SeqCst) + 1;
        state.peak_outstanding.fetch_max(now, Ordering::SeqCst);

        let mut gate = state.gate.subscribe();
        let released = gate.wait_for(|open| *open).await.is_ok();

        let delay = *lock(&state.open_delay);
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        let outcome = if released {
            state.next_open_outcome(url)
        } else {
            OpenOutcome::Failure("page source dropped".into())
        };
        state.outstanding.fetch_sub(1, Ordering::SeqCst);

        match outcome {
            OpenOutcome::Success => Ok(ScriptedPage {
                url: url.to_string(),
                viewport: state.initial_viewport,
                state,
            }),
            OpenOutcome::Failure(status) => Err(Error::LoadError(format!("{}: {}", url, status))),
        }
    }
}

/// A page opened by [`ScriptedPageSource`]
pub struct ScriptedPage {
    url: String,
    viewport: Viewport,
    state: Arc<ScriptState>,
}

impl ScriptedPage {
    pub fn viewport(&self) -> Viewport {
        self.viewport
    }
}

impl Page for ScriptedPage {
    async fn set_viewport(&mut self, viewport: Viewport) -> Result<()> {
        self.viewport = viewport;
        Ok(())
    }

    async fn render_png(&mut self) -> Result<Vec<u8>> {
        if let Some(err) = self.state.next_render_failure(&self.url) {
            return Err(err);
        }
        lock(&self.state.renders).push((self.url.clone(), self.viewport));
        Ok(ScriptedPageSource::expected_png(&self.url, self.viewport))
    }

    async fn close(self) -> Result<()> {
        self.state.closing.fetch_add(1, Ordering::SeqCst);
        let mut gate = self.state.close_gate.subscribe();
        let _ = gate.wait_for(|open| *open).await;
        self.state.closing.fetch_sub(1, Ordering::SeqCst);
        lock(&self.state.closes).push(self.url);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn unscripted_urls_open_and_render() {
        let source = ScriptedPageSource::new();
        let mut page = source.open("https://example.com").await.unwrap();
        let png = page.render_png().await.unwrap();
        assert!(png.starts_with(PNG_SIGNATURE));
        assert_eq!(png, ScriptedPageSource::expected_png("https://example.com", Viewport::default()));
        page.close().await.unwrap();
        assert_eq!(source.closes(), vec!["https://example.com".to_string()]);
    }

    #[tokio::test]
    async fn scripted_outcomes_are_consumed_in_order() {
        let source = ScriptedPageSource::new();
        source.script_opens(
            "https://flaky.example",
            [OpenOutcome::Failure("fail".into()), OpenOutcome::Success],
        );
        assert!(source.open("https://flaky.example").await.is_err());
        assert!(source.open("https://flaky.example").await.is_ok());
        assert_eq!(source.open_count("https://flaky.example"), 2);
        assert_eq!(source.outstanding_opens(), 0);
        assert_eq!(source.peak_outstanding_opens(), 1);
    }

    #[tokio::test]
    async fn held_opens_wait_for_release() {
        let source = ScriptedPageSource::new();
        source.hold_opens();
        let pending = tokio::spawn({
            let source = source.clone();
            async move { source.open("https://example.com").await.map(|p| p.viewport()) }
        });
        tokio::task::yield_now().await;
        assert_eq!(source.outstanding_opens(), 1);
        source.release_opens();
        assert_eq!(pending.await.unwrap().unwrap(), Viewport::default());
        assert_eq!(source.outstanding_opens(), 0);
    }

    #[tokio::test]
    async fn held_closes_wait_for_release() {
        let source = ScriptedPageSource::new();
        source.hold_closes();
        let page = source.open("https://example.com").await.unwrap();
        let closing = tokio::spawn(page.close());
        tokio::task::yield_now().await;
        assert_eq!(source.closing_pages(), 1);
        assert!(source.closes().is_empty());

        source.release_closes();
        closing.await.unwrap().unwrap();
        assert_eq!(source.closing_pages(), 0);
        assert_eq!(source.closes(), vec!["https://example.com".to_string()]);
    }
}
