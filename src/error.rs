use thiserror::Error;

#[derive(Error, Debug)]
pub enum ChatpilotError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("TOML serialization error: {0}")]
    TomlSerialize(#[from] toml::ser::Error),

    #[error("TOML deserialization error: {0}")]
    TomlDeserialize(#[from] toml::de::Error),

    #[error("Validation error: {0}")]
    Validation(String),

    /// Network, auth or non-2xx failure talking to the reasoning service.
    #[error("Reasoning service error: {0}")]
    Reasoning(String),

    /// The reasoning service answered, but not with a usable decision.
    #[error("Unparseable decision: {0}")]
    Parse(String),

    #[error("Unsupported action: {0}")]
    UnsupportedAction(String),

    #[error("Browser error: {0}")]
    Browser(String),

    #[error("Element not found: {0}")]
    ElementNotFound(String),

    #[error("Timed out: {0}")]
    Timeout(String),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Server error: {0}")]
    Server(String),
}

impl ChatpilotError {
    /// Errors that mean the reasoning service gave us nothing to act on.
    pub fn is_reasoning_failure(&self) -> bool {
        matches!(self, Self::Reasoning(_) | Self::Parse(_))
    }
}

pub type Result<T> = std::result::Result<T, ChatpilotError>;
