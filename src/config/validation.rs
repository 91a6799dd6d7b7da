use crate::config::schema::{AppConfig, BrowserConfig, AIConfig, ScreenshotFormat};
use crate::error::{ChatpilotError, Result};
use std::path::Path;

/// Validate Chrome executable path
pub fn validate_chrome_path(path: &Path) -> Result<()> {
    if !path.exists() {
        return Err(ChatpilotError::Validation(format!(
            "Chrome executable not found at {:?}",
            path
        )));
    }

    if !path.is_file() {
        return Err(ChatpilotError::Validation(format!(
            "Chrome path {:?} is not a file",
            path
        )));
    }

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let metadata = path.metadata().map_err(|e| {
            ChatpilotError::Validation(format!("Cannot read Chrome file metadata: {}", e))
        })?;
        if metadata.permissions().mode() & 0o111 == 0 {
            return Err(ChatpilotError::Validation(format!(
                "Chrome executable {:?} is not executable",
                path
            )));
        }
    }

    Ok(())
}

/// Validate browser settings (the executable itself is checked at launch)
pub fn validate_browser(browser: &BrowserConfig) -> Result<()> {
    if browser.viewport_width == 0 || browser.viewport_height == 0 {
        return Err(ChatpilotError::Validation(
            "Viewport dimensions must be non-zero".to_string(),
        ));
    }

    if browser.screenshot_format == ScreenshotFormat::Jpeg
        && !(1..=100).contains(&browser.screenshot_quality)
    {
        return Err(ChatpilotError::Validation(format!(
            "Invalid screenshot quality: {}. Must be between 1 and 100",
            browser.screenshot_quality
        )));
    }

    if browser.default_timeout_ms == 0 {
        return Err(ChatpilotError::Validation(
            "default_timeout_ms must be greater than zero".to_string(),
        ));
    }

    if browser.launch_timeout_secs == 0 {
        return Err(ChatpilotError::Validation(
            "launch_timeout_secs must be greater than zero".to_string(),
        ));
    }

    Ok(())
}

/// Validate reasoning service settings
pub fn validate_ai(ai: &AIConfig) -> Result<()> {
    if ai.model.trim().is_empty() {
        return Err(ChatpilotError::Validation(
            "Model name cannot be empty".to_string(),
        ));
    }

    if ai.provider.requires_api_key() && ai.api_key.as_deref().map_or(true, |k| k.trim().is_empty())
    {
        return Err(ChatpilotError::Validation(format!(
            "Provider '{}' requires an API key. Set ai.api_key or CHATPILOT_API_KEY",
            ai.provider.as_str()
        )));
    }

    if let Some(url) = &ai.base_url {
        if !url.starts_with("http://") && !url.starts_with("https://") {
            return Err(ChatpilotError::Validation(format!(
                "Invalid base URL: {}. Must start with http:// or https://",
                url
            )));
        }
    }

    if ai.max_steps == 0 {
        return Err(ChatpilotError::Validation(
            "max_steps must be at least 1".to_string(),
        ));
    }

    if ai.history_messages == 0 {
        return Err(ChatpilotError::Validation(
            "history_messages must be at least 1".to_string(),
        ));
    }

    Ok(())
}

/// Validate the whole configuration before the server starts
pub fn validate_config(config: &AppConfig) -> Result<()> {
    if config.server.host.trim().is_empty() {
        return Err(ChatpilotError::Validation(
            "Server host cannot be empty".to_string(),
        ));
    }
    if config.server.max_connections == 0 {
        return Err(ChatpilotError::Validation(
            "max_connections must be at least 1".to_string(),
        ));
    }
    validate_browser(&config.browser)?;
    validate_ai(&config.ai)?;
    Ok(())
}
