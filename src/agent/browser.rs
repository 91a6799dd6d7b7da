//! Browser seam: the operations a session needs from its browser, and the
//! factory that opens one browser per session.

use crate::agent::cdp::CDPClient;
use crate::agent::types::PageState;
use crate::config::schema::BrowserConfig;
use crate::config::validation::validate_chrome_path;
use crate::error::Result;
use async_trait::async_trait;
use std::time::Duration;

/// One automated page owned by one session.
///
/// Every operation that waits on the page takes an explicit timeout; the
/// executor additionally bounds the whole call.
#[async_trait]
pub trait BrowserDriver: Send + Sync {
    async fn navigate(&self, url: &str, timeout: Duration) -> Result<()>;

    async fn click(&self, selector: &str, timeout: Duration) -> Result<()>;

    async fn fill(&self, selector: &str, value: &str, timeout: Duration) -> Result<()>;

    async fn press_key(&self, key: &str) -> Result<()>;

    async fn wait_for(&self, selector: &str, timeout: Duration) -> Result<()>;

    /// Base64-encoded image of the viewport
    async fn screenshot(&self) -> Result<String>;

    async fn page_state(&self) -> Result<PageState>;

    /// Number of page targets in this browser
    async fn open_tab_count(&self) -> Result<usize> {
        Ok(1)
    }

    async fn export_cookies(&self) -> Result<serde_json::Value>;

    /// False once the page or its connection has gone away
    fn is_open(&self) -> bool;

    async fn close(&mut self) -> Result<()>;
}

/// Opens a fresh browser for a new session
#[async_trait]
pub trait BrowserLauncher: Send + Sync {
    async fn launch(&self, session_id: &str) -> Result<Box<dyn BrowserDriver>>;
}

/// Launches a local Chrome per session and drives it over CDP
pub struct ChromeLauncher {
    config: BrowserConfig,
}

impl ChromeLauncher {
    pub fn new(config: BrowserConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl BrowserLauncher for ChromeLauncher {
    async fn launch(&self, session_id: &str) -> Result<Box<dyn BrowserDriver>> {
        validate_chrome_path(&self.config.chrome_path)?;
        let mut client = CDPClient::new(session_id.to_string(), self.config.clone());
        client.launch().await?;
        Ok(Box::new(client))
    }
}
