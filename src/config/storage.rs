use crate::config::schema::AppConfig;
use crate::error::{ChatpilotError, Result};
use std::fs;
use std::path::{Path, PathBuf};

/// Get the configuration file path based on platform
pub fn get_config_path() -> PathBuf {
    let config_dir = if cfg!(target_os = "macos") {
        dirs::data_dir()
            .map(|p| p.join("com.chatpilot.app"))
            .unwrap_or_else(|| PathBuf::from("."))
    } else {
        dirs::config_dir()
            .map(|p| p.join("chatpilot"))
            .unwrap_or_else(|| PathBuf::from("."))
    };

    config_dir.join("config.toml")
}

/// Load configuration from `path` (or the platform default).
/// A missing file yields in-memory defaults; nothing is written.
pub fn load_config(path: Option<&Path>) -> Result<AppConfig> {
    let config_path = path.map(Path::to_path_buf).unwrap_or_else(get_config_path);

    if !config_path.exists() {
        tracing::info!(
            "Config file not found at {:?}, using defaults",
            config_path
        );
        return Ok(AppConfig::default());
    }

    let content = fs::read_to_string(&config_path).map_err(|e| {
        ChatpilotError::Config(format!(
            "Failed to read config from {:?}: {}",
            config_path, e
        ))
    })?;

    let config: AppConfig = toml::from_str(&content)?;

    tracing::info!("Loaded config from {:?}", config_path);
    Ok(config)
}

/// Save configuration to file
pub fn save_config(config: &AppConfig, path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|e| {
            ChatpilotError::Config(format!(
                "Failed to create config directory {:?}: {}",
                parent, e
            ))
        })?;
    }

    let content = toml::to_string_pretty(config)?;

    fs::write(path, content).map_err(|e| {
        ChatpilotError::Config(format!("Failed to write config to {:?}: {}", path, e))
    })?;

    tracing::info!("Saved config to {:?}", path);
    Ok(())
}

/// Write a default configuration file, refusing to overwrite an existing one
pub fn init_config(path: &Path) -> Result<AppConfig> {
    if path.exists() {
        return Err(ChatpilotError::Config(format!(
            "Config file {:?} already exists",
            path
        )));
    }
    let config = AppConfig::default();
    save_config(&config, path)?;
    Ok(config)
}

/// Apply environment overrides on top of the file configuration.
/// `lookup` is `std::env::var(..).ok()` in production.
pub fn apply_env_overrides<F>(config: &mut AppConfig, lookup: F) -> Result<()>
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(key) = lookup("CHATPILOT_API_KEY").or_else(|| lookup("GEMINI_API_KEY")) {
        if !key.trim().is_empty() {
            config.ai.api_key = Some(key);
        }
    }

    if let Some(value) = lookup("CHATPILOT_HEADLESS") {
        config.browser.headless = parse_bool(&value).ok_or_else(|| {
            ChatpilotError::Config(format!("CHATPILOT_HEADLESS: invalid boolean '{}'", value))
        })?;
    }

    if let Some(value) = lookup("CHATPILOT_PORT") {
        config.server.port = value.parse().map_err(|_| {
            ChatpilotError::Config(format!("CHATPILOT_PORT: invalid port '{}'", value))
        })?;
    }

    Ok(())
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}
