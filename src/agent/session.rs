//! Per-connection conversation state, and the registry of live sessions.

use crate::agent::browser::BrowserDriver;
use crate::agent::types::{Intent, LLMMessage, TaskStage};
use crate::error::{ChatpilotError, Result};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

/// One connected client: its conversation and its browser
pub struct Session {
    pub id: String,
    /// Ordered user/assistant messages
    pub history: Vec<LLMMessage>,
    /// Details collected so far; entries are added or overwritten, never removed
    pub parameters: HashMap<String, String>,
    pub stage: TaskStage,
    pub task: Option<String>,
    pub intent: Option<Intent>,
    browser: Box<dyn BrowserDriver>,
    /// Cleared when the client goes away; running tasks stop at the next step
    connected: Arc<AtomicBool>,
}

impl Session {
    pub fn new(id: String, browser: Box<dyn BrowserDriver>) -> Self {
        Self {
            id,
            history: Vec::new(),
            parameters: HashMap::new(),
            stage: TaskStage::Idle,
            task: None,
            intent: None,
            browser,
            connected: Arc::new(AtomicBool::new(true)),
        }
    }

    /// Shared handle to the connection flag, for the socket reader
    pub fn connection(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.connected)
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    pub fn record_user(&mut self, text: &str) {
        self.history.push(LLMMessage::user(text));
    }

    pub fn record_assistant(&mut self, text: &str) {
        self.history.push(LLMMessage::assistant(text));
    }

    pub fn merge_parameters(&mut self, parameters: &HashMap<String, String>) {
        for (key, value) in parameters {
            self.parameters.insert(key.clone(), value.clone());
        }
    }

    pub fn browser(&self) -> &dyn BrowserDriver {
        self.browser.as_ref()
    }

    /// Release the browser. Consumes the session so this runs once.
    pub async fn close(mut self, cookie_dir: Option<&Path>) -> Result<()> {
        if let Some(dir) = cookie_dir {
            if let Err(e) = self.export_cookies(dir).await {
                tracing::warn!("Cookie export failed for session {}: {}", self.id, e);
            }
        }
        self.browser.close().await
    }

    async fn export_cookies(&self, dir: &Path) -> Result<()> {
        if !self.browser.is_open() {
            return Ok(());
        }
        let cookies = self.browser.export_cookies().await?;
        tokio::fs::create_dir_all(dir).await?;
        let path = dir.join(format!("{}.json", self.id));
        let body = serde_json::to_vec_pretty(&cookies)
            .map_err(|e| ChatpilotError::Browser(e.to_string()))?;
        tokio::fs::write(&path, body).await?;
        tracing::info!("Exported cookies to {:?}", path);
        Ok(())
    }
}

/// Registry of connected session ids
#[derive(Default)]
pub struct SessionManager {
    sessions: Mutex<HashMap<String, Instant>>,
}

impl SessionManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, id: &str) {
        self.sessions.lock().insert(id.to_string(), Instant::now());
        tracing::info!("Session {} connected", id);
    }

    pub fn unregister(&self, id: &str) {
        if let Some(started) = self.sessions.lock().remove(id) {
            tracing::info!(
                "Session {} disconnected after {}s",
                id,
                started.elapsed().as_secs()
            );
        }
    }

    pub fn active_count(&self) -> usize {
        self.sessions.lock().len()
    }

    pub fn is_active(&self, id: &str) -> bool {
        self.sessions.lock().contains_key(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_register_and_unregister() {
        let manager = SessionManager::new();
        manager.register("a");
        manager.register("b");
        assert_eq!(manager.active_count(), 2);
        assert!(manager.is_active("a"));

        manager.unregister("a");
        manager.unregister("a");
        assert_eq!(manager.active_count(), 1);
        assert!(!manager.is_active("a"));
    }
}
