use crate::agent::browser::{BrowserLauncher, ChromeLauncher};
use crate::agent::engine::AgentEngine;
use crate::agent::interpreter::Interpreter;
use crate::agent::llm::{create_provider, LLMProvider};
use crate::agent::session::SessionManager;
use crate::config::AppConfig;
use crate::error::Result;
use std::sync::Arc;
use tokio::sync::Semaphore;

/// Application global state, shared by every connection
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub engine: Arc<AgentEngine>,
    pub launcher: Arc<dyn BrowserLauncher>,
    pub sessions: Arc<SessionManager>,
    /// One permit per concurrent chat session (and its browser)
    pub session_slots: Arc<Semaphore>,
}

impl AppState {
    /// Real provider and Chrome launcher from config
    pub fn new(config: AppConfig) -> Result<Self> {
        let provider = create_provider(&config.ai)?;
        let launcher = Arc::new(ChromeLauncher::new(config.browser.clone()));
        Ok(Self::with_parts(config, provider, launcher))
    }

    /// Assemble state from explicit collaborators
    pub fn with_parts(
        config: AppConfig,
        provider: Arc<dyn LLMProvider>,
        launcher: Arc<dyn BrowserLauncher>,
    ) -> Self {
        let interpreter = Interpreter::new(
            provider,
            config.ai.history_messages,
            config.ai.history_chars,
            config.ai.attach_screenshots,
        );
        let engine = AgentEngine::new(
            interpreter,
            config.ai.max_steps,
            config.browser.operation_timeout(),
            config.server.stream_progress,
        );
        let session_slots = Arc::new(Semaphore::new(config.server.max_connections.max(1)));
        Self {
            session_slots,
            config: Arc::new(config),
            engine: Arc::new(engine),
            launcher,
            sessions: Arc::new(SessionManager::new()),
        }
    }
}
