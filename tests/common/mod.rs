//! Scripted collaborators shared by the integration tests.
#![allow(dead_code)]

use async_trait::async_trait;
use chatpilot_lib::agent::browser::{BrowserDriver, BrowserLauncher};
use chatpilot_lib::agent::llm::LLMProvider;
use chatpilot_lib::agent::types::{LLMMessage, LLMResponse, PageState, TokenUsage};
use chatpilot_lib::config::AppConfig;
use chatpilot_lib::error::{ChatpilotError, Result};
use chatpilot_lib::state::AppState;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// 1x1 PNG
pub const PIXEL_PNG: &str =
    "iVBORw0KGgoAAAANSUhEUgAAAAEAAAABCAYAAAAfFcSJAAAADUlEQVR42mNkYPhfDwAChwGA60e6kgAAAABJRU5ErkJggg==";

// ---------------------------------------------------------------------------
// Reasoning service
// ---------------------------------------------------------------------------

/// Answers with pre-scripted responses, in order
pub struct MockProvider {
    script: Mutex<VecDeque<Result<String>>>,
    pub requests: Mutex<Vec<Vec<LLMMessage>>>,
}

impl MockProvider {
    pub fn new(responses: Vec<&str>) -> Arc<Self> {
        Arc::new(Self {
            script: Mutex::new(responses.into_iter().map(|r| Ok(r.to_string())).collect()),
            requests: Mutex::new(Vec::new()),
        })
    }

    pub fn failing() -> Arc<Self> {
        Arc::new(Self {
            script: Mutex::new(VecDeque::from(vec![Err(ChatpilotError::Reasoning(
                "connection refused".to_string(),
            ))])),
            requests: Mutex::new(Vec::new()),
        })
    }

    pub fn request_count(&self) -> usize {
        self.requests.lock().len()
    }
}

#[async_trait]
impl LLMProvider for MockProvider {
    async fn complete(&self, messages: &[LLMMessage]) -> Result<LLMResponse> {
        self.requests.lock().push(messages.to_vec());
        let next = self.script.lock().pop_front().unwrap_or_else(|| {
            Err(ChatpilotError::Reasoning("script exhausted".to_string()))
        })?;
        Ok(LLMResponse {
            content: next,
            model: "mock-model".to_string(),
            usage: TokenUsage::default(),
        })
    }

    fn name(&self) -> &str {
        "mock"
    }

    fn model(&self) -> &str {
        "mock-model"
    }
}

// ---------------------------------------------------------------------------
// Browser
// ---------------------------------------------------------------------------

/// Observable state shared by every browser a `MockLauncher` hands out
#[derive(Default)]
pub struct BrowserLog {
    pub actions: Mutex<Vec<String>>,
    pub screenshots: AtomicUsize,
    pub launches: AtomicUsize,
    pub closes: AtomicUsize,
    pub tab_count: AtomicUsize,
    /// Applied to navigate and click
    pub delay: Mutex<Duration>,
    /// Selectors that do not exist on the page
    pub missing_selectors: Mutex<Vec<String>>,
    /// Clicking this selector kills the page
    pub crash_selector: Mutex<Option<String>>,
    pub fail_launch: AtomicBool,
    /// Limit handed to each wait_for call
    pub wait_limits: Mutex<Vec<Duration>>,
    /// Applied to open_tab_count
    pub tab_count_delay: Mutex<Duration>,
}

impl BrowserLog {
    pub fn new() -> Arc<Self> {
        let log = Self::default();
        log.tab_count.store(1, Ordering::SeqCst);
        Arc::new(log)
    }

    pub fn actions(&self) -> Vec<String> {
        self.actions.lock().clone()
    }

    pub fn closes(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }
}

pub struct MockBrowser {
    log: Arc<BrowserLog>,
    open: AtomicBool,
    url: Mutex<String>,
}

impl MockBrowser {
    pub fn new(log: Arc<BrowserLog>) -> Self {
        Self {
            log,
            open: AtomicBool::new(true),
            url: Mutex::new("about:blank".to_string()),
        }
    }

    async fn delay(&self) {
        let delay = *self.log.delay.lock();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
    }

    fn record(&self, entry: String) {
        self.log.actions.lock().push(entry);
    }

    fn check_selector(&self, selector: &str) -> Result<()> {
        if self.log.missing_selectors.lock().iter().any(|s| s == selector) {
            return Err(ChatpilotError::ElementNotFound(selector.to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl BrowserDriver for MockBrowser {
    async fn navigate(&self, url: &str, _timeout: Duration) -> Result<()> {
        self.delay().await;
        self.record(format!("navigate:{}", url));
        *self.url.lock() = url.to_string();
        Ok(())
    }

    async fn click(&self, selector: &str, _timeout: Duration) -> Result<()> {
        self.delay().await;
        if self.log.crash_selector.lock().as_deref() == Some(selector) {
            self.open.store(false, Ordering::SeqCst);
            return Err(ChatpilotError::Browser("Target closed".to_string()));
        }
        self.check_selector(selector)?;
        self.record(format!("click:{}", selector));
        Ok(())
    }

    async fn fill(&self, selector: &str, value: &str, _timeout: Duration) -> Result<()> {
        self.check_selector(selector)?;
        self.record(format!("fill:{}={}", selector, value));
        Ok(())
    }

    async fn press_key(&self, key: &str) -> Result<()> {
        self.record(format!("press_key:{}", key));
        Ok(())
    }

    async fn wait_for(&self, selector: &str, timeout: Duration) -> Result<()> {
        self.log.wait_limits.lock().push(timeout);
        self.check_selector(selector)?;
        self.record(format!("wait_for:{}", selector));
        Ok(())
    }

    async fn screenshot(&self) -> Result<String> {
        if !self.open.load(Ordering::SeqCst) {
            return Err(ChatpilotError::Browser("page closed".to_string()));
        }
        self.log.screenshots.fetch_add(1, Ordering::SeqCst);
        Ok(PIXEL_PNG.to_string())
    }

    async fn page_state(&self) -> Result<PageState> {
        Ok(PageState {
            url: self.url.lock().clone(),
            title: Some("Mock page".to_string()),
            elements: Vec::new(),
        })
    }

    async fn open_tab_count(&self) -> Result<usize> {
        let delay = *self.log.tab_count_delay.lock();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        Ok(self.log.tab_count.load(Ordering::SeqCst))
    }

    async fn export_cookies(&self) -> Result<serde_json::Value> {
        Ok(serde_json::json!([{ "name": "sid", "value": "abc", "domain": "example.com" }]))
    }

    fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }

    async fn close(&mut self) -> Result<()> {
        self.open.store(false, Ordering::SeqCst);
        self.log.closes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

pub struct MockLauncher {
    pub log: Arc<BrowserLog>,
}

impl MockLauncher {
    pub fn new(log: Arc<BrowserLog>) -> Arc<Self> {
        Arc::new(Self { log })
    }
}

#[async_trait]
impl BrowserLauncher for MockLauncher {
    async fn launch(&self, _session_id: &str) -> Result<Box<dyn BrowserDriver>> {
        if self.log.fail_launch.load(Ordering::SeqCst) {
            return Err(ChatpilotError::Browser("Chrome not found".to_string()));
        }
        self.log.launches.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(MockBrowser::new(Arc::clone(&self.log))))
    }
}

// ---------------------------------------------------------------------------
// Wiring
// ---------------------------------------------------------------------------

pub fn make_state(
    config: AppConfig,
    provider: Arc<MockProvider>,
    log: Arc<BrowserLog>,
) -> Arc<AppState> {
    Arc::new(AppState::with_parts(config, provider, MockLauncher::new(log)))
}

/// Poll `cond` for up to two seconds
pub async fn eventually(cond: impl Fn() -> bool) -> bool {
    for _ in 0..100 {
        if cond() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    cond()
}
