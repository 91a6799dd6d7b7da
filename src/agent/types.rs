use crate::error::{ChatpilotError, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Task category the interpreter assigned to a request
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum Intent {
    Search,
    Navigate,
    Email,
    Form,
    #[default]
    #[serde(other)]
    Other,
}

impl Intent {
    /// Page opened when the model wants to start but names no first action
    pub fn default_start_url(&self) -> &'static str {
        match self {
            Intent::Email => "https://mail.google.com",
            _ => "https://www.google.com",
        }
    }

    pub fn completion_message(&self) -> &'static str {
        match self {
            Intent::Search => "Search completed successfully!",
            Intent::Navigate => "Navigation completed successfully!",
            Intent::Email => "Email task completed successfully!",
            Intent::Form => "Form completed successfully!",
            Intent::Other => "Task completed successfully!",
        }
    }
}

/// What the interpreter wants to happen after this decision
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum DecisionStatus {
    #[default]
    Continue,
    Complete,
    NeedsInfo,
}

/// The closed set of browser operations the agent may perform
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum BrowserAction {
    /// Navigate to a URL
    Navigate { url: String },
    /// Click an element (CSS selector, or exact visible text)
    Click { selector: String },
    /// Replace an input's value
    #[serde(alias = "type")]
    Fill {
        selector: String,
        #[serde(alias = "text")]
        value: String,
    },
    /// Press a key on the focused element
    PressKey { key: String },
    /// Wait until an element exists
    WaitFor {
        selector: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        timeout_ms: Option<u64>,
    },
    /// Sleep for a fixed duration
    Wait {
        #[serde(default = "default_wait_ms")]
        duration_ms: u64,
    },
    /// Capture the page
    Screenshot,
}

fn default_wait_ms() -> u64 {
    2000
}

impl BrowserAction {
    /// Every `kind` tag the parser accepts
    pub const KINDS: &'static [&'static str] = &[
        "navigate",
        "click",
        "fill",
        "type",
        "press_key",
        "wait_for",
        "wait",
        "screenshot",
    ];

    pub fn kind(&self) -> &'static str {
        match self {
            BrowserAction::Navigate { .. } => "navigate",
            BrowserAction::Click { .. } => "click",
            BrowserAction::Fill { .. } => "fill",
            BrowserAction::PressKey { .. } => "press_key",
            BrowserAction::WaitFor { .. } => "wait_for",
            BrowserAction::Wait { .. } => "wait",
            BrowserAction::Screenshot => "screenshot",
        }
    }

    /// Reject actions whose required fields are blank
    pub fn validate(&self) -> Result<()> {
        let blank = |field: &str, value: &str| {
            if value.trim().is_empty() {
                Err(ChatpilotError::Parse(format!(
                    "{} action requires a non-empty '{}'",
                    self.kind(),
                    field
                )))
            } else {
                Ok(())
            }
        };
        match self {
            BrowserAction::Navigate { url } => blank("url", url),
            BrowserAction::Click { selector } | BrowserAction::WaitFor { selector, .. } => {
                blank("selector", selector)
            }
            BrowserAction::Fill { selector, .. } => blank("selector", selector),
            BrowserAction::PressKey { key } => blank("key", key),
            BrowserAction::Wait { .. } | BrowserAction::Screenshot => Ok(()),
        }
    }

    /// Short human-readable description used in progress frames and logs
    pub fn describe(&self) -> String {
        match self {
            BrowserAction::Navigate { url } => format!("Navigated to {}", url),
            BrowserAction::Click { selector } => format!("Clicked {}", selector),
            BrowserAction::Fill { selector, value } => {
                format!("Typed '{}' into {}", value, selector)
            }
            BrowserAction::PressKey { key } => format!("Pressed key: {}", key),
            BrowserAction::WaitFor { selector, .. } => format!("Element found: {}", selector),
            BrowserAction::Wait { duration_ms } => format!("Waited {} ms", duration_ms),
            BrowserAction::Screenshot => "Screenshot taken".to_string(),
        }
    }
}

/// Structured interpretation of one reasoning-service answer
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Decision {
    pub intent: Intent,
    /// One-line description of the whole task
    pub task: Option<String>,
    /// Parameters extracted from the conversation so far
    pub parameters: HashMap<String, String>,
    /// Parameters still needed before the task can proceed
    pub missing: Vec<String>,
    pub status: DecisionStatus,
    /// What to say to the user
    pub reply: Option<String>,
    /// At most one next action
    pub action: Option<BrowserAction>,
}

impl Decision {
    pub fn needs_info(&self) -> bool {
        self.status == DecisionStatus::NeedsInfo || !self.missing.is_empty()
    }
}

/// Interactive element summary for grounding next-step prompts
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct DOMElement {
    pub tag: String,
    pub selector: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub placeholder: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub aria_label: Option<String>,
}

/// Snapshot of the page the next step is decided against
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct PageState {
    pub url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default)]
    pub elements: Vec<DOMElement>,
}

/// Where the session is within a task
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum TaskStage {
    #[default]
    Idle,
    AwaitingParameters,
    Executing,
}

/// LLM message
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LLMMessage {
    pub role: String,
    pub content: String,
    /// Base64 images attached to this message
    #[serde(skip_serializing_if = "Option::is_none")]
    pub images: Option<Vec<String>>,
}

impl LLMMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: "system".to_string(),
            content: content.into(),
            images: None,
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".to_string(),
            content: content.into(),
            images: None,
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: "assistant".to_string(),
            content: content.into(),
            images: None,
        }
    }
}

/// LLM response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LLMResponse {
    pub content: String,
    pub model: String,
    pub usage: TokenUsage,
}

/// Token usage statistics
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct TokenUsage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
}

/// Inbound client frame
#[derive(Debug, Clone, Deserialize)]
pub struct InboundMessage {
    #[serde(alias = "message")]
    pub text: String,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum MessageKind {
    /// The single answer to an inbound message
    Reply,
    /// Intermediate step feedback within a turn
    Progress,
}

/// How the turn ended (or, for progress frames, that it is still running)
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TurnStatus {
    InProgress,
    Completed,
    AwaitingInfo,
    Clarify,
    Failed,
    Error,
}

/// Outbound client frame
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct OutboundMessage {
    #[serde(rename = "type")]
    pub kind: MessageKind,
    pub text: String,
    /// Base64-encoded screenshot
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
    pub status: TurnStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
}

impl OutboundMessage {
    pub fn reply(status: TurnStatus, text: impl Into<String>) -> Self {
        Self {
            kind: MessageKind::Reply,
            text: text.into(),
            image: None,
            status,
            url: None,
            title: None,
        }
    }

    pub fn progress(text: impl Into<String>) -> Self {
        Self {
            kind: MessageKind::Progress,
            text: text.into(),
            image: None,
            status: TurnStatus::InProgress,
            url: None,
            title: None,
        }
    }

    pub fn with_image(mut self, image: Option<String>) -> Self {
        self.image = image;
        self
    }

    pub fn with_page(mut self, page: Option<&PageState>) -> Self {
        if let Some(page) = page {
            self.url = Some(page.url.clone()).filter(|u| !u.is_empty());
            self.title = page.title.clone();
        }
        self
    }
}
