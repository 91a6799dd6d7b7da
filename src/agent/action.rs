use crate::agent::browser::BrowserDriver;
use crate::agent::types::BrowserAction;
use crate::error::{ChatpilotError, Result};
use std::time::Duration;

/// Slack past the operation timeout so driver-level errors win the race
const TIMEOUT_GRACE: Duration = Duration::from_millis(500);

/// Action result
#[derive(Debug, Clone, PartialEq)]
pub struct ActionResult {
    pub success: bool,
    pub message: String,
    pub error: Option<String>,
    /// Base64 image captured after the action
    pub image: Option<String>,
}

impl ActionResult {
    pub fn success(message: impl Into<String>) -> Self {
        Self {
            success: true,
            message: message.into(),
            error: None,
            image: None,
        }
    }

    pub fn failure(message: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            success: false,
            message: message.into(),
            error: Some(error.into()),
            image: None,
        }
    }
}

/// Prefix bare hosts with https://
pub fn normalize_url(url: &str) -> String {
    let url = url.trim();
    if url.contains("://") || url.starts_with("about:") || url.starts_with("data:") {
        url.to_string()
    } else {
        format!("https://{}", url)
    }
}

/// Execute one browser action, bounded by `timeout`
pub async fn execute_action(
    driver: &dyn BrowserDriver,
    action: &BrowserAction,
    timeout: Duration,
) -> ActionResult {
    if let Err(e) = action.validate() {
        return ActionResult::failure(format!("Invalid {} action", action.kind()), e.to_string());
    }

    let limit = operation_limit(action, timeout);
    let bounded = tokio::time::timeout(limit + TIMEOUT_GRACE, dispatch(driver, action, limit));
    let outcome = match bounded.await {
        Ok(result) => result,
        Err(_) => Err(ChatpilotError::Timeout(format!(
            "{} did not finish within {} ms",
            action.kind(),
            limit.as_millis()
        ))),
    };

    let mut result = match outcome {
        Ok(image) => ActionResult {
            image,
            ..ActionResult::success(action.describe())
        },
        Err(e) => {
            tracing::warn!("Action {} failed: {}", action.kind(), e);
            return ActionResult::failure(format!("{} failed", action.kind()), e.to_string());
        }
    };

    match tokio::time::timeout(timeout, driver.open_tab_count())
        .await
        .unwrap_or_else(|_| Err(ChatpilotError::Timeout("listing tabs".to_string())))
    {
        Ok(count) if count > 1 => {
            tracing::warn!("Action {} opened {} tabs", action.kind(), count);
            result = ActionResult {
                image: result.image,
                ..ActionResult::failure(
                    format!("{} opened a new tab", action.kind()),
                    "multi-tab tasks are not supported",
                )
            };
        }
        Ok(_) => {}
        Err(e) => tracing::debug!("Tab count unavailable: {}", e),
    }

    tracing::info!("Action result: {}", result.message);
    result
}

/// Time allowed for one action; a model-chosen `wait_for` timeout may shorten it, never extend it
fn operation_limit(action: &BrowserAction, timeout: Duration) -> Duration {
    match action {
        BrowserAction::WaitFor {
            timeout_ms: Some(ms),
            ..
        } => Duration::from_millis(*ms).min(timeout),
        _ => timeout,
    }
}

/// Run the driver call; returns an image only for screenshot actions
async fn dispatch(
    driver: &dyn BrowserDriver,
    action: &BrowserAction,
    timeout: Duration,
) -> Result<Option<String>> {
    match action {
        BrowserAction::Navigate { url } => {
            driver.navigate(&normalize_url(url), timeout).await?;
        }
        BrowserAction::Click { selector } => driver.click(selector, timeout).await?,
        BrowserAction::Fill { selector, value } => driver.fill(selector, value, timeout).await?,
        BrowserAction::PressKey { key } => driver.press_key(key).await?,
        BrowserAction::WaitFor { selector, .. } => driver.wait_for(selector, timeout).await?,
        BrowserAction::Wait { duration_ms } => {
            tokio::time::sleep(Duration::from_millis(*duration_ms).min(timeout)).await;
        }
        BrowserAction::Screenshot => return Ok(Some(driver.screenshot().await?)),
    }
    Ok(None)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_url() {
        assert_eq!(normalize_url("google.com"), "https://google.com");
        assert_eq!(normalize_url(" https://a.b/c "), "https://a.b/c");
        assert_eq!(normalize_url("http://localhost:3000"), "http://localhost:3000");
        assert_eq!(normalize_url("about:blank"), "about:blank");
    }

    #[test]
    fn test_wait_for_timeout_is_capped() {
        let timeout = Duration::from_secs(1);
        let long = BrowserAction::WaitFor {
            selector: "#results".to_string(),
            timeout_ms: Some(86_400_000),
        };
        assert_eq!(operation_limit(&long, timeout), timeout);

        let short = BrowserAction::WaitFor {
            selector: "#results".to_string(),
            timeout_ms: Some(200),
        };
        assert_eq!(operation_limit(&short, timeout), Duration::from_millis(200));

        let click = BrowserAction::Click {
            selector: "#go".to_string(),
        };
        assert_eq!(operation_limit(&click, timeout), timeout);
    }

    #[test]
    fn test_failure_carries_error() {
        let result = ActionResult::failure("click failed", "Element not found: #go");
        assert!(!result.success);
        assert_eq!(result.error.as_deref(), Some("Element not found: #go"));
        assert!(result.image.is_none());
    }
}
