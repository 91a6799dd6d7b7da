//! Conversation-driven browser automation: interpretation, execution and
//! the per-session turn pipeline.

pub mod action;
pub mod browser;
pub mod cdp;
pub mod engine;
pub mod feedback;
pub mod interpreter;
pub mod llm;
pub mod session;
pub mod types;

pub use action::{execute_action, ActionResult};
pub use browser::{BrowserDriver, BrowserLauncher, ChromeLauncher};
pub use cdp::CDPClient;
pub use engine::AgentEngine;
pub use interpreter::Interpreter;
pub use llm::LLMProvider;
pub use session::{Session, SessionManager};
pub use types::*;
