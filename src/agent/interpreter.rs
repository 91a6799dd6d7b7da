//! Turns conversation and page state into a validated `Decision`.

use crate::agent::action::ActionResult;
use crate::agent::llm::LLMProvider;
use crate::agent::session::Session;
use crate::agent::types::{BrowserAction, Decision, DecisionStatus, Intent, LLMMessage, PageState};
use crate::error::{ChatpilotError, Result};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;

/// Elements listed in a next-step prompt
const MAX_PROMPT_ELEMENTS: usize = 40;

/// Build system prompt for the agent
pub fn build_system_prompt() -> String {
    r##"You are a browser automation assistant talking to a user in a chat. You decide what the browser should do next, one action at a time.

Always respond with a single JSON object and nothing else:
{
  "intent": "search|navigate|email|form|other",
  "task": "one-line description of the whole task",
  "parameters": {"name": "value", ...},
  "missing": ["details you still need from the user"],
  "status": "continue|complete|needs_info",
  "reply": "what to tell the user",
  "action": null or one action object
}

Available actions (exactly one per response, or null):
1. Navigate to URL: {"kind": "navigate", "url": "https://example.com"}
2. Click element: {"kind": "click", "selector": "#button-id"}   (CSS selector, or the element's exact visible text)
3. Fill input: {"kind": "fill", "selector": "input[name=q]", "value": "hello"}
4. Press key: {"kind": "press_key", "key": "Enter"}
5. Wait for element: {"kind": "wait_for", "selector": "#results"}
6. Wait: {"kind": "wait", "duration_ms": 2000}
7. Screenshot: {"kind": "screenshot"}

Rules:
- If required details are missing (e.g. recipient, search query), set status to "needs_info", list them in "missing", ask for them in "reply" and set action to null.
- When the task is done, set status to "complete" and action to null.
- Otherwise set status to "continue" and give the next action.
- Put every detail you learned from the user into "parameters"."##
        .to_string()
}

/// Keep the newest messages within both budgets, in chronological order.
/// The newest message is always kept.
pub fn truncate_history(
    messages: &[LLMMessage],
    max_messages: usize,
    max_chars: usize,
) -> Vec<LLMMessage> {
    let mut kept = Vec::new();
    let mut chars = 0;

    for msg in messages.iter().rev() {
        let len = msg.content.chars().count();
        if !kept.is_empty() && (kept.len() >= max_messages || chars + len > max_chars) {
            break;
        }
        chars += len;
        kept.push(msg.clone());
    }

    kept.reverse();
    kept
}

fn format_parameters(parameters: &HashMap<String, String>) -> String {
    if parameters.is_empty() {
        return "(none)".to_string();
    }
    let mut entries: Vec<_> = parameters.iter().collect();
    entries.sort();
    entries
        .into_iter()
        .map(|(k, v)| format!("- {}: {}", k, v))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Context prepended to the user's latest message when interpreting intent
pub fn build_intent_prompt(session: &Session) -> String {
    format!(
        r#"Interpret the user's latest message and decide how to proceed.

Current task: {}
Collected parameters:
{}

Common tasks: send email, search web, navigate to website, fill forms."#,
        session.task.as_deref().unwrap_or("(none)"),
        format_parameters(&session.parameters)
    )
}

/// Context for choosing the action after `last`
pub fn build_step_prompt(session: &Session, page: &PageState, last: &ActionResult) -> String {
    let elements_str = page
        .elements
        .iter()
        .take(MAX_PROMPT_ELEMENTS)
        .map(|el| {
            let mut line = format!("- <{}> {}", el.tag, el.selector);
            if let Some(text) = el.text.as_deref().filter(|t| !t.is_empty()) {
                line.push_str(&format!(" text=\"{}\"", text));
            }
            if let Some(placeholder) = &el.placeholder {
                line.push_str(&format!(" placeholder=\"{}\"", placeholder));
            }
            if let Some(aria_label) = &el.aria_label {
                line.push_str(&format!(" aria-label=\"{}\"", aria_label));
            }
            line
        })
        .collect::<Vec<_>>()
        .join("\n");

    let outcome = match &last.error {
        Some(error) => format!("{} ({})", last.message, error),
        None => last.message.clone(),
    };

    format!(
        r#"Task: {}
Collected parameters:
{}

Last action: {}

Current page:
- URL: {}
- Title: {}

Interactive elements:
{}

What is the next action? If the task is finished, set status to "complete"."#,
        session.task.as_deref().unwrap_or("(unknown)"),
        format_parameters(&session.parameters),
        outcome,
        page.url,
        page.title.as_deref().unwrap_or("N/A"),
        if elements_str.is_empty() {
            "(none)".to_string()
        } else {
            elements_str
        }
    )
}

/// Pull the JSON object out of a model answer
fn extract_json(content: &str) -> Option<&str> {
    if let Some(fence) = content.find("```json") {
        let body = &content[fence + "```json".len()..];
        if let Some(end) = body.find("```") {
            return Some(body[..end].trim());
        }
    }
    let start = content.find('{')?;
    let end = content.rfind('}')?;
    (start < end).then(|| &content[start..=end])
}

fn string_field<'a>(obj: &'a Value, keys: &[&str]) -> Option<&'a str> {
    keys.iter()
        .find_map(|k| obj.get(*k).and_then(|v| v.as_str()))
        .map(str::trim)
        .filter(|s| !s.is_empty())
}

fn parse_action(value: &Value) -> Result<Option<BrowserAction>> {
    match value {
        Value::Null => Ok(None),
        Value::Array(_) => Err(ChatpilotError::Parse(
            "a decision may name at most one action".to_string(),
        )),
        Value::Object(obj) => {
            let kind = obj
                .get("kind")
                .and_then(|k| k.as_str())
                .ok_or_else(|| ChatpilotError::Parse("action has no 'kind'".to_string()))?;
            if !BrowserAction::KINDS.contains(&kind) {
                return Err(ChatpilotError::UnsupportedAction(kind.to_string()));
            }
            let action: BrowserAction = serde_json::from_value(value.clone())
                .map_err(|e| ChatpilotError::Parse(format!("invalid {} action: {}", kind, e)))?;
            action.validate()?;
            Ok(Some(action))
        }
        other => Err(ChatpilotError::Parse(format!(
            "action must be an object, got {}",
            other
        ))),
    }
}

/// Parse and validate a model answer
pub fn parse_decision(content: &str) -> Result<Decision> {
    let json_str = extract_json(content)
        .ok_or_else(|| ChatpilotError::Parse("no JSON object in response".to_string()))?;
    let value: Value = serde_json::from_str(json_str)
        .map_err(|e| ChatpilotError::Parse(format!("invalid JSON: {}", e)))?;
    if !value.is_object() {
        return Err(ChatpilotError::Parse("response is not a JSON object".to_string()));
    }

    let intent: Intent = value
        .get("intent")
        .and_then(|v| serde_json::from_value(v.clone()).ok())
        .unwrap_or_default();

    let status = match value.get("status") {
        None | Some(Value::Null) => DecisionStatus::Continue,
        Some(v) => serde_json::from_value(v.clone())
            .map_err(|_| ChatpilotError::Parse(format!("unknown status {}", v)))?,
    };

    let parameters = value
        .get("parameters")
        .and_then(|p| p.as_object())
        .map(|obj| {
            obj.iter()
                .filter_map(|(k, v)| {
                    let v = match v {
                        Value::Null => return None,
                        Value::String(s) => s.clone(),
                        other => other.to_string(),
                    };
                    Some((k.clone(), v))
                })
                .collect()
        })
        .unwrap_or_default();

    let missing = ["missing", "missing_info"]
        .iter()
        .find_map(|k| value.get(*k).and_then(|m| m.as_array()))
        .map(|arr| {
            arr.iter()
                .filter_map(|m| m.as_str())
                .map(|s| s.to_string())
                .collect()
        })
        .unwrap_or_default();

    let action = parse_action(value.get("action").unwrap_or(&Value::Null))?;

    if status == DecisionStatus::Complete && action.is_some() {
        return Err(ChatpilotError::Parse(
            "a complete decision cannot carry an action".to_string(),
        ));
    }

    Ok(Decision {
        intent,
        task: string_field(&value, &["task", "task_description"]).map(|s| s.to_string()),
        parameters,
        missing,
        status,
        reply: string_field(&value, &["reply", "suggested_response"]).map(|s| s.to_string()),
        action,
    })
}

/// Prefix the turn's context onto the newest user message
fn with_context(mut history: Vec<LLMMessage>, context: String) -> Vec<LLMMessage> {
    match history.last_mut() {
        Some(last) if last.role == "user" => {
            last.content = format!("{}\n\nUser message: {}", context, last.content);
        }
        _ => history.push(LLMMessage::user(context)),
    }
    history
}

/// Asks the reasoning service what to do
pub struct Interpreter {
    provider: Arc<dyn LLMProvider>,
    history_messages: usize,
    history_chars: usize,
    attach_screenshots: bool,
}

impl Interpreter {
    pub fn new(
        provider: Arc<dyn LLMProvider>,
        history_messages: usize,
        history_chars: usize,
        attach_screenshots: bool,
    ) -> Self {
        Self {
            provider,
            history_messages,
            history_chars,
            attach_screenshots,
        }
    }

    pub fn provider(&self) -> &dyn LLMProvider {
        self.provider.as_ref()
    }

    fn history(&self, session: &Session) -> Vec<LLMMessage> {
        truncate_history(&session.history, self.history_messages, self.history_chars)
    }

    async fn ask(&self, mut messages: Vec<LLMMessage>) -> Result<Decision> {
        messages.insert(0, LLMMessage::system(build_system_prompt()));
        let response = self.provider.complete(&messages).await?;
        tracing::debug!(
            "Reasoning response ({} tokens): {}",
            response.usage.total_tokens,
            response.content
        );
        let decision = parse_decision(&response.content)?;
        tracing::info!(
            "Decision: intent={:?} status={:?} action={}",
            decision.intent,
            decision.status,
            decision.action.as_ref().map(|a| a.kind()).unwrap_or("none")
        );
        Ok(decision)
    }

    /// Interpret the newest user message (already recorded in the session)
    pub async fn interpret(&self, session: &Session) -> Result<Decision> {
        let messages = with_context(self.history(session), build_intent_prompt(session));
        self.ask(messages).await
    }

    /// Choose the action that follows `last`
    pub async fn next_step(
        &self,
        session: &Session,
        page: &PageState,
        last: &ActionResult,
        image: Option<&str>,
    ) -> Result<Decision> {
        let mut messages =
            with_context(self.history(session), build_step_prompt(session, page, last));
        if self.attach_screenshots {
            if let (Some(image), Some(msg)) = (image, messages.last_mut()) {
                msg.images = Some(vec![image.to_string()]);
            }
        }
        self.ask(messages).await
    }
}
