use crate::agent::browser::BrowserDriver;
use crate::agent::types::{DOMElement, PageState};
use crate::config::schema::{BrowserConfig, ScreenshotFormat};
use crate::error::{ChatpilotError, Result};
use crate::process::{allocate_cdp_port, build_command};
use async_trait::async_trait;
use futures::stream::SplitSink;
use futures::{SinkExt, StreamExt};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::net::TcpStream;
use tokio::process::Child;
use tokio::sync::{oneshot, Mutex};
use tokio::task::JoinHandle;
use tokio_tungstenite::{
    connect_async, tungstenite::Message as WsMessage, MaybeTlsStream, WebSocketStream,
};

/// Upper bound for a single CDP round trip
const COMMAND_TIMEOUT: Duration = Duration::from_secs(30);

/// Interval between DOM polls while waiting for an element or page load
const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Elements reported to the interpreter per page
const MAX_ELEMENTS: usize = 50;

type WsSink = SplitSink<WebSocketStream<MaybeTlsStream<TcpStream>>, WsMessage>;
type PendingMap = Arc<Mutex<HashMap<u32, oneshot::Sender<Value>>>>;

/// CDP client over a raw WebSocket to one page target of a Chrome it launched
pub struct CDPClient {
    ws_tx: Option<Arc<Mutex<WsSink>>>,
    /// In-flight commands waiting for their response
    responses: PendingMap,
    reader: Option<JoinHandle<()>>,
    child: Option<Child>,
    session_id: String,
    config: BrowserConfig,
    cdp_port: u16,
    user_data_dir: PathBuf,
    msg_id: AtomicU32,
    connected: Arc<AtomicBool>,
}

impl CDPClient {
    pub fn new(session_id: String, config: BrowserConfig) -> Self {
        let user_data_dir = std::env::temp_dir().join(format!("chatpilot-{}", session_id));
        Self {
            ws_tx: None,
            responses: Arc::new(Mutex::new(HashMap::new())),
            reader: None,
            child: None,
            session_id,
            config,
            cdp_port: 0,
            user_data_dir,
            msg_id: AtomicU32::new(1),
            connected: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Send a CDP command and wait for its `result` object
    async fn send_command(&self, method: &str, params: Value) -> Result<Value> {
        let tx = self
            .ws_tx
            .as_ref()
            .ok_or_else(|| ChatpilotError::Browser("WebSocket not connected".to_string()))?;

        let id = self.msg_id.fetch_add(1, Ordering::SeqCst);
        let (resp_tx, resp_rx) = oneshot::channel();
        self.responses.lock().await.insert(id, resp_tx);

        let command = json!({
            "id": id,
            "method": method,
            "params": params
        });

        {
            let mut tx_guard = tx.lock().await;
            if let Err(e) = tx_guard.send(WsMessage::Text(command.to_string())).await {
                self.responses.lock().await.remove(&id);
                return Err(ChatpilotError::Browser(format!(
                    "Failed to send {}: {}",
                    method, e
                )));
            }
        }

        let response = match tokio::time::timeout(COMMAND_TIMEOUT, resp_rx).await {
            Ok(Ok(response)) => response,
            Ok(Err(_)) => {
                return Err(ChatpilotError::Browser(
                    "Response channel closed".to_string(),
                ))
            }
            Err(_) => {
                self.responses.lock().await.remove(&id);
                return Err(ChatpilotError::Timeout(format!("CDP command {}", method)));
            }
        };

        if let Some(err) = response.get("error") {
            let message = err
                .get("message")
                .and_then(|m| m.as_str())
                .unwrap_or("unknown CDP error");
            return Err(ChatpilotError::Browser(format!("{}: {}", method, message)));
        }

        Ok(response.get("result").cloned().unwrap_or(Value::Null))
    }

    /// Evaluate an expression in the page and return its JSON value
    async fn evaluate(&self, expression: &str) -> Result<Value> {
        let result = self
            .send_command(
                "Runtime.evaluate",
                json!({
                    "expression": expression,
                    "returnByValue": true
                }),
            )
            .await?;

        if let Some(details) = result.get("exceptionDetails") {
            let text = details
                .get("exception")
                .and_then(|e| e.get("description"))
                .or_else(|| details.get("text"))
                .and_then(|t| t.as_str())
                .unwrap_or("script exception");
            return Err(ChatpilotError::Browser(text.to_string()));
        }

        Ok(result
            .get("result")
            .and_then(|r| r.get("value"))
            .cloned()
            .unwrap_or(Value::Null))
    }

    /// Re-run a boolean page script until it returns true or `timeout` passes
    async fn poll_until(&self, expression: &str, timeout: Duration) -> Result<bool> {
        let start = Instant::now();
        loop {
            match self.evaluate(expression).await {
                Ok(value) if value.as_bool().unwrap_or(false) => return Ok(true),
                Ok(_) => {}
                // Context destroyed mid-navigation; retry on the new document
                Err(e) if self.is_open() => tracing::trace!("Poll failed: {}", e),
                Err(e) => return Err(e),
            }
            if start.elapsed() >= timeout {
                return Ok(false);
            }
            tokio::time::sleep(POLL_INTERVAL).await;
        }
    }

    /// Launch Chrome with CDP enabled and attach to its first page
    pub async fn launch(&mut self) -> Result<()> {
        self.cdp_port = allocate_cdp_port()?;
        tokio::fs::create_dir_all(&self.user_data_dir).await?;

        let child = build_command(&self.config, &self.user_data_dir, self.cdp_port)
            .spawn()
            .map_err(|e| ChatpilotError::Browser(format!("Failed to launch Chrome: {}", e)))?;
        tracing::info!(
            "Launched Chrome pid={:?} port={} for session {}",
            child.id(),
            self.cdp_port,
            self.session_id
        );
        self.child = Some(child);

        let deadline = Instant::now() + Duration::from_secs(self.config.launch_timeout_secs);
        let mut last_error = String::new();

        while Instant::now() < deadline {
            tokio::time::sleep(Duration::from_millis(250)).await;

            match self.find_page_ws_url().await {
                Ok(ws_url) => match connect_async(ws_url.as_str()).await {
                    Ok((ws_stream, _)) => {
                        self.attach(ws_stream);
                        self.send_command("Page.enable", json!({})).await?;
                        self.send_command("Runtime.enable", json!({})).await?;
                        self.send_command(
                            "Emulation.setDeviceMetricsOverride",
                            json!({
                                "width": self.config.viewport_width,
                                "height": self.config.viewport_height,
                                "deviceScaleFactor": 1,
                                "mobile": false
                            }),
                        )
                        .await?;
                        tracing::info!("CDP client connected for session {}", self.session_id);
                        return Ok(());
                    }
                    Err(e) => last_error = format!("Failed to connect WebSocket: {}", e),
                },
                Err(e) => last_error = e.to_string(),
            }
            tracing::debug!("Waiting for Chrome debugger: {}", last_error);
        }

        let _ = self.close().await;
        Err(ChatpilotError::Browser(format!(
            "Chrome did not expose a page target within {}s: {}",
            self.config.launch_timeout_secs, last_error
        )))
    }

    async fn list_page_targets(&self) -> Result<Vec<Value>> {
        let list_url = format!("http://127.0.0.1:{}/json/list", self.cdp_port);
        let response = reqwest::get(&list_url)
            .await
            .map_err(|e| ChatpilotError::Browser(format!("Connection error: {}", e)))?;
        if !response.status().is_success() {
            return Err(ChatpilotError::Browser(format!(
                "HTTP error: {}",
                response.status()
            )));
        }
        let targets: Value = response.json().await.map_err(|e| {
            ChatpilotError::Browser(format!("Failed to parse targets response: {}", e))
        })?;
        Ok(targets
            .as_array()
            .map(|arr| {
                arr.iter()
                    .filter(|t| t.get("type").and_then(|v| v.as_str()) == Some("page"))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn find_page_ws_url(&self) -> Result<String> {
        let targets = self.list_page_targets().await?;
        let target = targets
            .first()
            .ok_or_else(|| ChatpilotError::Browser("No page target found".to_string()))?;
        target
            .get("webSocketDebuggerUrl")
            .and_then(|v| v.as_str())
            .map(|s| s.to_string())
            .ok_or_else(|| {
                ChatpilotError::Browser("No webSocketDebuggerUrl in page target".to_string())
            })
    }

    /// Split the socket and spawn the task routing responses to waiters
    fn attach(&mut self, ws_stream: WebSocketStream<MaybeTlsStream<TcpStream>>) {
        let (tx, mut rx) = ws_stream.split();
        self.ws_tx = Some(Arc::new(Mutex::new(tx)));
        self.connected.store(true, Ordering::SeqCst);

        let responses = Arc::clone(&self.responses);
        let connected = Arc::clone(&self.connected);
        let session_id = self.session_id.clone();

        self.reader = Some(tokio::spawn(async move {
            while let Some(msg) = rx.next().await {
                match msg {
                    Ok(WsMessage::Text(text)) => {
                        let Ok(json) = serde_json::from_str::<Value>(&text) else {
                            continue;
                        };
                        if let Some(id) = json.get("id").and_then(|i| i.as_u64()) {
                            if let Some(sender) = responses.lock().await.remove(&(id as u32)) {
                                let _ = sender.send(json);
                            }
                        } else if json.get("method").and_then(|m| m.as_str())
                            == Some("Inspector.detached")
                        {
                            tracing::info!("Page detached for session {}", session_id);
                            break;
                        }
                        tracing::trace!("CDP received: {}", text.chars().take(100).collect::<String>());
                    }
                    Ok(WsMessage::Close(_)) => {
                        tracing::debug!("CDP WebSocket closed");
                        break;
                    }
                    Err(e) => {
                        tracing::debug!("CDP WebSocket error: {:?}", e);
                        break;
                    }
                    _ => {}
                }
            }
            connected.store(false, Ordering::SeqCst);
            // Wake every waiter; their senders drop here
            responses.lock().await.clear();
        }));
    }

    async fn wait_for_load(&self, timeout: Duration) -> Result<()> {
        if self
            .poll_until("document.readyState === 'complete'", timeout)
            .await?
        {
            Ok(())
        } else {
            Err(ChatpilotError::Timeout(format!(
                "page did not finish loading within {} ms",
                timeout.as_millis()
            )))
        }
    }
}

/// JS string literal for embedding user-provided text in page scripts
fn js_string(value: &str) -> String {
    serde_json::to_string(value).unwrap_or_else(|_| "\"\"".to_string())
}

/// Finds an element by CSS selector, falling back to exact visible text
fn find_element_js(selector: &str) -> String {
    format!(
        r#"(function(sel) {{
            let el = null;
            try {{ el = document.querySelector(sel); }} catch (e) {{}}
            if (!el) {{
                const want = sel.trim();
                const candidates = document.querySelectorAll(
                    "a, button, input[type=submit], input[type=button], [role=button], label, span, div"
                );
                for (const c of candidates) {{
                    if ((c.innerText || c.value || "").trim() === want) {{ el = c; break; }}
                }}
            }}
            return el;
        }})({})"#,
        js_string(selector)
    )
}

/// Chrome's replies when a navigation replaced the document mid-evaluate
fn is_context_loss(error: &ChatpilotError) -> bool {
    let message = error.to_string();
    message.contains("context was destroyed") || message.contains("Cannot find context")
}

/// Interpret the single click evaluation. A click that navigates can tear
/// down the context before the reply arrives; the click still happened.
fn click_outcome(selector: &str, outcome: Result<Value>, page_open: bool) -> Result<()> {
    match outcome {
        Ok(Value::Bool(true)) => Ok(()),
        Ok(_) => Err(ChatpilotError::ElementNotFound(selector.to_string())),
        Err(e) if page_open && is_context_loss(&e) => {
            tracing::debug!("Click on {} navigated away: {}", selector, e);
            Ok(())
        }
        Err(e) => Err(e),
    }
}

#[async_trait]
impl BrowserDriver for CDPClient {
    async fn navigate(&self, url: &str, timeout: Duration) -> Result<()> {
        let result = self
            .send_command("Page.navigate", json!({ "url": url }))
            .await?;
        if let Some(error_text) = result
            .get("errorText")
            .and_then(|e| e.as_str())
            .filter(|e| !e.is_empty())
        {
            return Err(ChatpilotError::Browser(format!(
                "Navigation to {} failed: {}",
                url, error_text
            )));
        }
        self.wait_for_load(timeout).await?;
        tracing::info!("Navigated to: {}", url);
        Ok(())
    }

    async fn click(&self, selector: &str, timeout: Duration) -> Result<()> {
        // Wait for the element, then click exactly once
        let present = format!("!!({})", find_element_js(selector));
        if !self.poll_until(&present, timeout).await? {
            return Err(ChatpilotError::ElementNotFound(selector.to_string()));
        }
        let script = format!(
            "(function() {{ const el = {}; if (!el) return false; el.scrollIntoView({{block: 'center'}}); el.click(); return true; }})()",
            find_element_js(selector)
        );
        let outcome = self.evaluate(&script).await;
        click_outcome(selector, outcome, self.is_open())?;
        tracing::debug!("Clicked element: {}", selector);
        Ok(())
    }

    async fn fill(&self, selector: &str, value: &str, timeout: Duration) -> Result<()> {
        let script = format!(
            r#"(function(val) {{
                const el = {};
                if (!el) return false;
                el.focus();
                if (el.isContentEditable) {{
                    el.textContent = val;
                }} else {{
                    const proto = Object.getPrototypeOf(el);
                    const desc = Object.getOwnPropertyDescriptor(proto, "value");
                    if (desc && desc.set) {{ desc.set.call(el, val); }} else {{ el.value = val; }}
                }}
                el.dispatchEvent(new Event("input", {{bubbles: true}}));
                el.dispatchEvent(new Event("change", {{bubbles: true}}));
                return true;
            }})({})"#,
            find_element_js(selector),
            js_string(value)
        );
        if self.poll_until(&script, timeout).await? {
            tracing::debug!("Typed into element: {}", selector);
            Ok(())
        } else {
            Err(ChatpilotError::ElementNotFound(selector.to_string()))
        }
    }

    async fn press_key(&self, key: &str) -> Result<()> {
        let (key_code, text) = match key {
            "Enter" => (13, Some("\r".to_string())),
            "Tab" => (9, None),
            "Escape" => (27, None),
            "Backspace" => (8, None),
            "ArrowUp" => (38, None),
            "ArrowDown" => (40, None),
            "ArrowLeft" => (37, None),
            "ArrowRight" => (39, None),
            _ => {
                let c = key.chars().next().unwrap_or('\0');
                (c.to_ascii_uppercase() as i32, Some(key.to_string()))
            }
        };

        let mut down = json!({
            "type": "keyDown",
            "key": key,
            "code": key,
            "windowsVirtualKeyCode": key_code
        });
        if let Some(text) = text {
            down["text"] = Value::String(text);
        }
        self.send_command("Input.dispatchKeyEvent", down).await?;

        self.send_command(
            "Input.dispatchKeyEvent",
            json!({
                "type": "keyUp",
                "key": key,
                "code": key,
                "windowsVirtualKeyCode": key_code
            }),
        )
        .await?;

        tracing::debug!("Pressed key: {}", key);
        Ok(())
    }

    async fn wait_for(&self, selector: &str, timeout: Duration) -> Result<()> {
        let script = format!("!!({})", find_element_js(selector));
        if self.poll_until(&script, timeout).await? {
            Ok(())
        } else {
            Err(ChatpilotError::Timeout(format!(
                "waiting for element: {}",
                selector
            )))
        }
    }

    async fn screenshot(&self) -> Result<String> {
        let mut params = json!({ "format": self.config.screenshot_format.as_str() });
        if self.config.screenshot_format == ScreenshotFormat::Jpeg {
            params["quality"] = json!(self.config.screenshot_quality);
        }
        let result = self.send_command("Page.captureScreenshot", params).await?;

        result
            .get("data")
            .and_then(|d| d.as_str())
            .map(|s| s.to_string())
            .ok_or_else(|| ChatpilotError::Browser("Failed to capture screenshot".to_string()))
    }

    async fn page_state(&self) -> Result<PageState> {
        let js = format!(
            r##"(function() {{
                function getSelector(el) {{
                    if (el.id) return "#" + CSS.escape(el.id);
                    if (el.name) return el.tagName.toLowerCase() + "[name=\"" + el.name + "\"]";
                    if (el.className && typeof el.className === "string") {{
                        const classes = el.className.trim().split(/\s+/).filter(c => c);
                        if (classes.length > 0) {{
                            return el.tagName.toLowerCase() + "." + classes.slice(0, 2).map(c => CSS.escape(c)).join(".");
                        }}
                    }}
                    return el.tagName.toLowerCase();
                }}
                const elements = [];
                const nodes = document.querySelectorAll(
                    "a, button, input, select, textarea, [onclick], [role=\"button\"], [contenteditable=\"true\"]"
                );
                for (const el of nodes) {{
                    const rect = el.getBoundingClientRect();
                    if (rect.width === 0 || rect.height === 0 || el.disabled) continue;
                    elements.push({{
                        tag: el.tagName.toLowerCase(),
                        selector: getSelector(el),
                        text: (el.innerText || el.value || "").trim().substring(0, 80) || null,
                        placeholder: el.placeholder || null,
                        aria_label: el.getAttribute("aria-label") || null
                    }});
                    if (elements.length >= {}) break;
                }}
                return {{ url: window.location.href, title: document.title || null, elements }};
            }})()"##,
            MAX_ELEMENTS
        );

        let value = self.evaluate(&js).await?;
        let url = value
            .get("url")
            .and_then(|u| u.as_str())
            .unwrap_or_default()
            .to_string();
        let title = value
            .get("title")
            .and_then(|t| t.as_str())
            .map(|s| s.to_string());
        let elements: Vec<DOMElement> =
            serde_json::from_value(value.get("elements").cloned().unwrap_or_default())
                .unwrap_or_default();

        Ok(PageState {
            url,
            title,
            elements,
        })
    }

    async fn open_tab_count(&self) -> Result<usize> {
        Ok(self.list_page_targets().await?.len())
    }

    async fn export_cookies(&self) -> Result<Value> {
        let result = self.send_command("Network.getAllCookies", json!({})).await?;
        Ok(result.get("cookies").cloned().unwrap_or_else(|| json!([])))
    }

    fn is_open(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    async fn close(&mut self) -> Result<()> {
        if let Some(tx) = self.ws_tx.take() {
            let mut tx_guard = tx.lock().await;
            let _ = tx_guard.close().await;
        }
        if let Some(reader) = self.reader.take() {
            reader.abort();
        }
        self.connected.store(false, Ordering::SeqCst);

        if let Some(mut child) = self.child.take() {
            if let Err(e) = child.kill().await {
                tracing::warn!("Failed to kill Chrome for session {}: {}", self.session_id, e);
            }
        }

        if self.user_data_dir.exists() {
            if let Err(e) = tokio::fs::remove_dir_all(&self.user_data_dir).await {
                tracing::debug!("Failed to remove {:?}: {}", self.user_data_dir, e);
            }
        }

        tracing::info!("CDP client closed for session {}", self.session_id);
        Ok(())
    }
}

impl Drop for CDPClient {
    fn drop(&mut self) {
        if let Some(reader) = self.reader.take() {
            reader.abort();
        }
        // kill_on_drop handles the process; the profile directory is ours to remove
        if self.child.take().is_some() {
            let _ = std::fs::remove_dir_all(&self.user_data_dir);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_js_string_escapes_quotes() {
        assert_eq!(js_string(r#"a"b'c"#), r#""a\"b'c""#);
        assert_eq!(js_string("line\nbreak"), r#""line\nbreak""#);
    }

    #[test]
    fn test_find_element_js_embeds_selector_literal() {
        let js = find_element_js("button[name='go']");
        assert!(js.contains(r#"("button[name='go']")"#));
    }

    #[test]
    fn test_click_outcome() {
        assert!(click_outcome("#go", Ok(json!(true)), true).is_ok());
        assert!(matches!(
            click_outcome("#go", Ok(json!(false)), true),
            Err(ChatpilotError::ElementNotFound(_))
        ));

        let destroyed = || -> Result<Value> {
            Err(ChatpilotError::Browser(
                "Runtime.evaluate: Execution context was destroyed.".to_string(),
            ))
        };
        assert!(click_outcome("#go", destroyed(), true).is_ok());
        // Page gone entirely: report it
        assert!(click_outcome("#go", destroyed(), false).is_err());

        let thrown: Result<Value> =
            Err(ChatpilotError::Browser("TypeError: el.click is not a function".to_string()));
        assert!(click_outcome("#go", thrown, true).is_err());
    }

    #[test]
    fn test_new_client_is_closed() {
        let client = CDPClient::new("s1".to_string(), BrowserConfig::default());
        assert!(!client.is_open());
        assert!(client.user_data_dir.ends_with("chatpilot-s1"));
    }

    #[tokio::test]
    async fn test_command_without_connection_fails() {
        let client = CDPClient::new("s2".to_string(), BrowserConfig::default());
        let err = client.screenshot().await.unwrap_err();
        assert!(matches!(err, ChatpilotError::Browser(_)));
    }

    #[tokio::test]
    async fn test_close_is_idempotent_without_launch() {
        let mut client = CDPClient::new("s3".to_string(), BrowserConfig::default());
        assert!(client.close().await.is_ok());
        assert!(client.close().await.is_ok());
    }
}
