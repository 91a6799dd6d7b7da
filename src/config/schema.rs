use serde::{Deserialize, Serialize};
use std::path::PathBuf;

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct AppConfig {
    /// Web server settings
    #[serde(default)]
    pub server: ServerConfig,

    /// Browser launch and operation settings
    #[serde(default)]
    pub browser: BrowserConfig,

    /// Reasoning service settings
    #[serde(default)]
    pub ai: AIConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Bind address
    #[serde(default = "default_host")]
    pub host: String,

    /// Bind port
    #[serde(default = "default_port")]
    pub port: u16,

    /// Send a progress frame after every intermediate action
    #[serde(default = "default_true")]
    pub stream_progress: bool,

    /// Maximum concurrent chat sessions; each one owns a Chrome process
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            stream_progress: true,
            max_connections: default_max_connections(),
        }
    }
}

impl ServerConfig {
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ScreenshotFormat {
    #[default]
    Png,
    Jpeg,
}

impl ScreenshotFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Png => "png",
            Self::Jpeg => "jpeg",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BrowserConfig {
    /// Chrome executable path
    #[serde(default = "default_chrome_path")]
    pub chrome_path: PathBuf,

    /// Run Chrome without a visible window
    #[serde(default = "default_true")]
    pub headless: bool,

    #[serde(default = "default_viewport_width")]
    pub viewport_width: u32,

    #[serde(default = "default_viewport_height")]
    pub viewport_height: u32,

    #[serde(default)]
    pub screenshot_format: ScreenshotFormat,

    /// JPEG quality (1-100); ignored for PNG
    #[serde(default = "default_screenshot_quality")]
    pub screenshot_quality: u8,

    /// Per-operation timeout in milliseconds
    #[serde(default = "default_operation_timeout")]
    pub default_timeout_ms: u64,

    /// How long to wait for Chrome's debugging endpoint after spawn
    #[serde(default = "default_launch_timeout")]
    pub launch_timeout_secs: u64,

    /// Extra Chrome command-line arguments
    #[serde(default)]
    pub extra_args: Vec<String>,

    /// When set, each session's cookies are written here as JSON on disconnect
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cookie_export_dir: Option<PathBuf>,
}

impl Default for BrowserConfig {
    fn default() -> Self {
        Self {
            chrome_path: default_chrome_path(),
            headless: true,
            viewport_width: default_viewport_width(),
            viewport_height: default_viewport_height(),
            screenshot_format: ScreenshotFormat::default(),
            screenshot_quality: default_screenshot_quality(),
            default_timeout_ms: default_operation_timeout(),
            launch_timeout_secs: default_launch_timeout(),
            extra_args: Vec::new(),
            cookie_export_dir: None,
        }
    }
}

impl BrowserConfig {
    pub fn operation_timeout(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.default_timeout_ms)
    }
}

// ==================== AI Configuration ====================

/// API type for the reasoning provider
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ApiType {
    #[default]
    Gemini,
    Openai,
    Anthropic,
    Ollama,
}

impl ApiType {
    pub fn default_base_url(&self) -> &'static str {
        match self {
            Self::Gemini => "https://generativelanguage.googleapis.com/v1beta",
            Self::Openai => "https://api.openai.com/v1",
            Self::Anthropic => "https://api.anthropic.com",
            Self::Ollama => "http://localhost:11434",
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Gemini => "gemini",
            Self::Openai => "openai",
            Self::Anthropic => "anthropic",
            Self::Ollama => "ollama",
        }
    }

    /// Whether the provider refuses requests without a key
    pub fn requires_api_key(&self) -> bool {
        !matches!(self, Self::Ollama)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AIConfig {
    #[serde(default)]
    pub provider: ApiType,

    /// Base URL override (defaults per provider)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,

    /// Credential for the reasoning service
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    #[serde(default = "default_model")]
    pub model: String,

    /// Most recent history messages sent with each request
    #[serde(default = "default_history_messages")]
    pub history_messages: usize,

    /// Character budget for the history block
    #[serde(default = "default_history_chars")]
    pub history_chars: usize,

    /// Upper bound on actions executed for one user message
    #[serde(default = "default_max_steps")]
    pub max_steps: u32,

    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,

    /// Attach the latest screenshot to next-step requests; turn off for text-only models
    #[serde(default = "default_true")]
    pub attach_screenshots: bool,
}

impl Default for AIConfig {
    fn default() -> Self {
        Self {
            provider: ApiType::default(),
            base_url: None,
            api_key: None,
            model: default_model(),
            history_messages: default_history_messages(),
            history_chars: default_history_chars(),
            max_steps: default_max_steps(),
            request_timeout_secs: default_request_timeout(),
            attach_screenshots: true,
        }
    }
}

impl AIConfig {
    pub fn effective_base_url(&self) -> String {
        self.base_url
            .clone()
            .unwrap_or_else(|| self.provider.default_base_url().to_string())
            .trim_end_matches('/')
            .to_string()
    }
}

fn default_chrome_path() -> PathBuf {
    #[cfg(target_os = "windows")]
    {
        PathBuf::from("C:\\Program Files\\Google\\Chrome\\Application\\chrome.exe")
    }
    #[cfg(target_os = "macos")]
    {
        PathBuf::from("/Applications/Google Chrome.app/Contents/MacOS/Google Chrome")
    }
    #[cfg(not(any(target_os = "windows", target_os = "macos")))]
    {
        PathBuf::from("/usr/bin/google-chrome")
    }
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    8000
}

fn default_max_connections() -> usize {
    32
}

fn default_true() -> bool {
    true
}

fn default_viewport_width() -> u32 {
    1280
}

fn default_viewport_height() -> u32 {
    720
}

fn default_screenshot_quality() -> u8 {
    80
}

fn default_operation_timeout() -> u64 {
    10_000
}

fn default_launch_timeout() -> u64 {
    15
}

fn default_model() -> String {
    "gemini-2.0-flash".to_string()
}

fn default_history_messages() -> usize {
    10
}

fn default_history_chars() -> usize {
    8000
}

fn default_max_steps() -> u32 {
    15
}

fn default_request_timeout() -> u64 {
    60
}
