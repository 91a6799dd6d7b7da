//! Post-action page capture. Never fails the turn: every problem degrades
//! to "no image".

use crate::agent::browser::BrowserDriver;
use base64::Engine;
use std::time::Duration;

/// Capture the current viewport as base64, or `None` if the page is gone,
/// the capture errors or times out, or the payload is not valid base64.
pub async fn capture(driver: &dyn BrowserDriver, timeout: Duration) -> Option<String> {
    if !driver.is_open() {
        tracing::debug!("Skipping capture: page closed");
        return None;
    }

    let data = match tokio::time::timeout(timeout, driver.screenshot()).await {
        Ok(Ok(data)) => data,
        Ok(Err(e)) => {
            tracing::warn!("Screenshot failed: {}", e);
            return None;
        }
        Err(_) => {
            tracing::warn!("Screenshot timed out after {} ms", timeout.as_millis());
            return None;
        }
    };

    if is_valid_image(&data) {
        Some(data)
    } else {
        tracing::warn!("Discarding undecodable screenshot payload");
        None
    }
}

fn is_valid_image(data: &str) -> bool {
    !data.is_empty()
        && base64::engine::general_purpose::STANDARD
            .decode(data)
            .map(|bytes| !bytes.is_empty())
            .unwrap_or(false)
}
