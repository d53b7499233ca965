//! Render groups: callers waiting on the same URL, and fan-out of one page
//! load to all of them.

use crate::{Error, Page, RenderOptions, RenderedImage, Result};
use log::{debug, warn};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use tokio::sync::oneshot;

pub(crate) type ResultSink = oneshot::Sender<Result<RenderedImage>>;

/// One caller's request, waiting in a group
pub(crate) struct RenderRequest {
    pub(crate) options: RenderOptions,
    sink: ResultSink,
}

impl RenderRequest {
    pub(crate) fn new(options: RenderOptions, sink: ResultSink) -> Self {
        Self { options, sink }
    }

    /// Deliver the result. Consumes the request, so it can happen only once.
    pub(crate) fn resolve(self, result: Result<RenderedImage>) {
        // The caller may have dropped its ticket; nothing left to notify then.
        let _ = self.sink.send(result);
    }
}

/// Live groups keyed by the exact URL string
#[derive(Default)]
pub(crate) struct RenderGroups {
    groups: HashMap<String, Vec<RenderRequest>>,
}

impl RenderGroups {
    /// Add a request to the group for `url`. Returns `true` when this created
    /// the group, i.e. the URL needs to be queued for a worker.
    pub(crate) fn attach(&mut self, url: &str, request: RenderRequest) -> bool {
        match self.groups.get_mut(url) {
            Some(waiting) => {
                waiting.push(request);
                false
            }
            None => {
                self.groups.insert(url.to_string(), vec![request]);
                true
            }
        }
    }

    pub(crate) fn contains(&self, url: &str) -> bool {
        self.groups.contains_key(url)
    }

    /// Remove the group for `url`, handing back its requests in arrival order.
    pub(crate) fn take(&mut self, url: &str) -> Vec<RenderRequest> {
        self.groups.remove(url).unwrap_or_default()
    }

    pub(crate) fn len(&self) -> usize {
        self.groups.len()
    }

    pub(crate) fn waiting(&self) -> usize {
        self.groups.values().map(Vec::len).sum()
    }
}

/// Render every captured request on the shared page, in arrival order.
///
/// Renders are sequential: a viewport set by one request stays in effect for
/// the following requests until another one sets its own. Returns the number
/// of images delivered.
pub(crate) async fn fan_out<P: Page>(page: &mut P, url: &str, requests: Vec<RenderRequest>) -> u64 {
    debug!("Rendering {} image(s) of {}", requests.len(), url);

    let mut rendered = 0;
    let mut page_error: Option<Error> = None;

    for request in requests {
        if let Some(err) = &page_error {
            request.resolve(Err(err.clone()));
            continue;
        }

        match render_one(page, request.options).await {
            Ok(image) => {
                debug!("Rendered {} ({} bytes, sha256 {})", url, image.data.len(), digest(&image.data));
                rendered += 1;
                request.resolve(Ok(image));
            }
            Err(err) => {
                warn!("Render of {} failed: {}", url, err);
                if err.is_page_fatal() {
                    page_error = Some(err.clone());
                }
                request.resolve(Err(err));
            }
        }
    }

    rendered
}

async fn render_one<P: Page>(page: &mut P, options: RenderOptions) -> Result<RenderedImage> {
    if let Some(viewport) = options.viewport() {
        page.set_viewport(viewport).await?;
    }
    let data = page.render_png().await?;
    Ok(RenderedImage::png(data))
}

/// Deliver one terminal failure to every request of a group
pub(crate) fn fail_all(requests: Vec<RenderRequest>, err: &Error) {
    for request in requests {
        request.resolve(Err(err.clone()));
    }
}

/// Short content digest for log lines
fn digest(data: &[u8]) -> String {
    let hash = Sha256::digest(data);
    hex::encode(&hash[..6])
}
