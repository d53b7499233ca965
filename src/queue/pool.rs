//! Bounded worker pool: one driver task hands queued URLs to at most
//! `max_workers` concurrent page-load cycles, in the order they were queued.
//!
//! Dispatch order is the order in which worker slots are granted and cycles
//! spawned. With several free slots on a multi-thread runtime, cycles spawned
//! back to back may reach the engine's `open` in either order.

use super::group::{fail_all, fan_out};
use super::retry::open_with_retry;
use super::Shared;
use crate::{Page, PageSource};
use log::{debug, info, warn};
use std::sync::atomic::Ordering;
use std::sync::Weak;
use tokio::sync::mpsc::UnboundedReceiver;

/// Pull URLs off the work queue and dispatch each once a worker slot is free.
///
/// The driver only holds a weak reference so that dropping every
/// `RenderQueue` handle also closes the work queue and stops this task.
pub(crate) async fn drive<S: PageSource>(shared: Weak<Shared<S>>, mut work_rx: UnboundedReceiver<String>) {
    while let Some(url) = work_rx.recv().await {
        let Some(shared) = shared.upgrade() else {
            break;
        };

        let permit = match shared.slots.clone().acquire_owned().await {
            Ok(permit) => permit,
            Err(_) => break,
        };
        debug!(
            "Dispatching {} ({} worker slot(s) free)",
            url,
            shared.slots.available_permits()
        );

        tokio::spawn(async move {
            shared.run_cycle(&url).await;
            // The slot frees up only after the page has been released
            drop(permit);
        });
    }
    debug!("Render queue driver stopped");
}

impl<S: PageSource> Shared<S> {
    /// One full open -> render -> close cycle for `url`
    pub(crate) async fn run_cycle(&self, url: &str) {
        let has_requests = self.lock_state().groups.contains(url);
        if !has_requests {
            debug!("No requests left for {}, skipping", url);
            return;
        }

        match open_with_retry(&self.source, url, self.config.retry_delay).await {
            Ok(mut page) => {
                // Remove the group before the page goes away: requests arriving
                // from here on start a new cycle instead of joining this one.
                let requests = self.lock_state().groups.take(url);
                let rendered = fan_out(&mut page, url, requests).await;
                self.counters.images_rendered.fetch_add(rendered, Ordering::Relaxed);

                if let Err(err) = page.close().await {
                    warn!("Closing page for {} failed: {}", url, err);
                }
                self.counters.completed_cycles.fetch_add(1, Ordering::Relaxed);
            }
            Err(err) => {
                let requests = self.lock_state().groups.take(url);
                info!("Giving up on {} ({} waiting request(s)): {}", url, requests.len(), err);
                fail_all(requests, &err);
                self.counters.failed_cycles.fetch_add(1, Ordering::Relaxed);
            }
        }
    }
}
