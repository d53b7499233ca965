use crate::{Error, PageSource, Result};
use log::{debug, info, warn};
use std::time::Duration;

/// Total number of open attempts per URL cycle (first try plus 4 retries)
pub const OPEN_ATTEMPTS: u32 = 5;

/// Open `url`, retrying failed loads up to [`OPEN_ATTEMPTS`] times in total.
///
/// Each failed attempt has already released its page by the time `open`
/// returns, so nothing leaks between attempts. Once the budget is spent the
/// last error is wrapped into a terminal [`Error::OpenFailed`].
pub(crate) async fn open_with_retry<S: PageSource>(
    source: &S,
    url: &str,
    retry_delay: Duration,
) -> Result<S::Page> {
    let mut attempt = 0;
    loop {
        attempt += 1;
        debug!("Opening {} (attempt {}/{})", url, attempt, OPEN_ATTEMPTS);

        let err = match source.open(url).await {
            Ok(page) => {
                if attempt > 1 {
                    info!("Opened {} after {} attempts", url, attempt);
                }
                return Ok(page);
            }
            Err(err) => err,
        };

        warn!("Open attempt {}/{} for {} failed: {}", attempt, OPEN_ATTEMPTS, url, err);
        if attempt >= OPEN_ATTEMPTS {
            return Err(Error::OpenFailed {
                url: url.to_string(),
                attempts: attempt,
                last_error: Box::new(err),
            });
        }

        if !retry_delay.is_zero() {
            tokio::time::sleep(retry_delay).await;
        }
    }
}
