//! Request-coalescing render queue
//!
//! Callers submit a URL and get a [`RenderTicket`] back right away. Requests
//! for a URL that is already waiting for a worker join that URL's group
//! instead of causing another page load; once the page is open every member
//! of the group gets its own render pass, in the order the requests arrived.
//!
//! Group map and work queue sit behind one mutex that is never held across an
//! `.await`, so every dispatcher and worker step is atomic with respect to the
//! others.

mod group;
mod pool;
mod retry;

pub use retry::OPEN_ATTEMPTS;

use crate::{Error, PageSource, QueueConfig, RenderOptions, RenderedImage, Result};
use group::{fail_all, RenderGroups, RenderRequest};
use log::{debug, warn};
use serde::Serialize;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::task::{Context, Poll};
use tokio::sync::{mpsc, oneshot, Semaphore};
use tokio::task::JoinHandle;

/// Handle to a running render queue. Cheap to clone; all clones share state.
pub struct RenderQueue<S: PageSource> {
    shared: Arc<Shared<S>>,
}

impl<S: PageSource> Clone for RenderQueue<S> {
    fn clone(&self) -> Self {
        Self {
            shared: self.shared.clone(),
        }
    }
}

pub(crate) struct Shared<S: PageSource> {
    source: S,
    config: QueueConfig,
    state: Mutex<State>,
    slots: Arc<Semaphore>,
    counters: Counters,
    driver: Mutex<Option<JoinHandle<()>>>,
}

struct State {
    groups: RenderGroups,
    /// `None` once the queue has been shut down
    work_tx: Option<mpsc::UnboundedSender<String>>,
}

#[derive(Default)]
struct Counters {
    completed_cycles: AtomicU64,
    failed_cycles: AtomicU64,
    images_rendered: AtomicU64,
}

/// Point-in-time view of the queue
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct QueueStats {
    /// URLs with at least one request waiting for a worker or an open
    pub pending_urls: usize,
    /// Requests not yet handed to a render pass
    pub waiting_requests: usize,
    /// Worker slots currently running a cycle
    pub busy_workers: usize,
    pub max_workers: usize,
    /// Cycles that opened a page and rendered their group
    pub completed_cycles: u64,
    /// Cycles that gave up after exhausting their open attempts
    pub failed_cycles: u64,
    pub images_rendered: u64,
}

impl<S: PageSource> Shared<S> {
    fn lock_state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl<S: PageSource> RenderQueue<S> {
    /// Start a queue on the current tokio runtime.
    pub fn start(source: S, config: QueueConfig) -> Result<Self> {
        config.validate()?;
        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|e| Error::InitializationError(format!("No tokio runtime available: {}", e)))?;

        let (work_tx, work_rx) = mpsc::unbounded_channel();
        let shared = Arc::new(Shared {
            source,
            slots: Arc::new(Semaphore::new(config.max_workers)),
            config,
            state: Mutex::new(State {
                groups: RenderGroups::default(),
                work_tx: Some(work_tx),
            }),
            counters: Counters::default(),
            driver: Mutex::new(None),
        });

        let driver = runtime.spawn(pool::drive(Arc::downgrade(&shared), work_rx));
        *shared.driver.lock().unwrap_or_else(PoisonError::into_inner) = Some(driver);

        debug!("Render queue started with {} worker(s)", shared.config.max_workers);
        Ok(Self { shared })
    }

    /// Ask for `url` to be rendered with `options`.
    ///
    /// Returns immediately. The ticket resolves exactly once, with the image
    /// or with the error that ended this URL's cycle.
    pub fn submit(&self, url: impl Into<String>, options: RenderOptions) -> RenderTicket {
        let url = url.into();
        let (tx, rx) = oneshot::channel();
        let request = RenderRequest::new(options, tx);

        let mut guard = self.shared.lock_state();
        let state = &mut *guard;

        let Some(work_tx) = &state.work_tx else {
            drop(guard);
            request.resolve(Err(Error::Shutdown));
            return RenderTicket { rx };
        };

        if !state.groups.attach(&url, request) {
            debug!("Joined pending render of {}", url);
            return RenderTicket { rx };
        }

        debug!("Queued {}", url);
        if let Err(mpsc::error::SendError(url)) = work_tx.send(url) {
            // The driver is gone; nobody would ever pick this group up.
            warn!("Render queue driver has stopped, rejecting {}", url);
            let requests = state.groups.take(&url);
            drop(guard);
            fail_all(requests, &Error::Shutdown);
        }
        RenderTicket { rx }
    }

    pub fn stats(&self) -> QueueStats {
        let (pending_urls, waiting_requests) = {
            let state = self.shared.lock_state();
            (state.groups.len(), state.groups.waiting())
        };
        let max_workers = self.shared.config.max_workers;
        let counters = &self.shared.counters;
        QueueStats {
            pending_urls,
            waiting_requests,
            busy_workers: max_workers.saturating_sub(self.shared.slots.available_permits()),
            max_workers,
            completed_cycles: counters.completed_cycles.load(Ordering::Relaxed),
            failed_cycles: counters.failed_cycles.load(Ordering::Relaxed),
            images_rendered: counters.images_rendered.load(Ordering::Relaxed),
        }
    }

    /// Stop accepting work, then wait until everything already accepted has
    /// been rendered or failed and every page has been released.
    pub async fn shutdown(&self) {
        let work_tx = self.shared.lock_state().work_tx.take();
        if work_tx.is_none() {
            debug!("Render queue already shut down");
        }
        drop(work_tx);

        let driver = self
            .shared
            .driver
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(driver) = driver {
            if let Err(err) = driver.await {
                warn!("Render queue driver ended abnormally: {}", err);
            }
        }

        // Every in-flight cycle holds a slot until its page is closed
        let all_slots = u32::try_from(self.shared.config.max_workers).unwrap_or(u32::MAX);
        if let Ok(permits) = self.shared.slots.acquire_many(all_slots).await {
            drop(permits);
        }
        debug!("Render queue drained");
    }
}

/// Pending result of one submitted request
///
/// Awaiting the ticket yields the rendered image or the error shared by every
/// request coalesced onto the same page load. Dropping it does not cancel the
/// render.
#[derive(Debug)]
pub struct RenderTicket {
    rx: oneshot::Receiver<Result<RenderedImage>>,
}

impl Future for RenderTicket {
    type Output = Result<RenderedImage>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.rx).poll(cx).map(|received| {
            received.unwrap_or_else(|_| Err(Error::Other("Render request was dropped without a result".into())))
        })
    }
}
