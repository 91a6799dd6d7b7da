use crate::agent::action::{execute_action, ActionResult};
use crate::agent::feedback::capture;
use crate::agent::interpreter::Interpreter;
use crate::agent::session::Session;
use crate::agent::types::{
    BrowserAction, Decision, DecisionStatus, OutboundMessage, PageState, TaskStage, TurnStatus,
};
use crate::error::ChatpilotError;
use std::time::Duration;
use tokio::sync::mpsc;

/// Reply used whenever the reasoning service gives us nothing usable
pub const FALLBACK_REPLY: &str =
    "I'm not sure how to help with that yet. Could you rephrase it or add a few more details?";

pub type ProgressSender = mpsc::UnboundedSender<OutboundMessage>;

/// Runs one user message through interpret, execute, capture and respond
pub struct AgentEngine {
    interpreter: Interpreter,
    max_steps: u32,
    operation_timeout: Duration,
    stream_progress: bool,
}

impl AgentEngine {
    pub fn new(
        interpreter: Interpreter,
        max_steps: u32,
        operation_timeout: Duration,
        stream_progress: bool,
    ) -> Self {
        Self {
            interpreter,
            max_steps: max_steps.max(1),
            operation_timeout,
            stream_progress,
        }
    }

    pub fn interpreter(&self) -> &Interpreter {
        &self.interpreter
    }

    /// Handle one inbound message. Returns the turn's single reply; progress
    /// frames for intermediate steps go to `progress`.
    pub async fn run_turn(
        &self,
        session: &mut Session,
        text: &str,
        progress: &ProgressSender,
    ) -> OutboundMessage {
        session.record_user(text);
        session.stage = TaskStage::Idle;

        let reply = self.turn(session, progress).await;

        if session.stage != TaskStage::AwaitingParameters {
            session.stage = TaskStage::Idle;
        }
        session.record_assistant(&reply.text);
        tracing::info!(
            "Session {} turn finished: {:?}",
            session.id,
            reply.status
        );
        reply
    }

    async fn turn(&self, session: &mut Session, progress: &ProgressSender) -> OutboundMessage {
        let decision = match self.interpreter.interpret(session).await {
            Ok(decision) => decision,
            Err(e) => return reasoning_failure(e),
        };

        session.merge_parameters(&decision.parameters);
        if let Some(task) = &decision.task {
            session.task = Some(task.clone());
        }
        session.intent = Some(decision.intent);

        if decision.needs_info() {
            session.stage = TaskStage::AwaitingParameters;
            return OutboundMessage::reply(TurnStatus::AwaitingInfo, question(&decision));
        }

        if decision.status == DecisionStatus::Complete {
            let text = decision
                .reply
                .unwrap_or_else(|| decision.intent.completion_message().to_string());
            return OutboundMessage::reply(TurnStatus::Completed, text);
        }

        session.stage = TaskStage::Executing;
        let first = decision.action.unwrap_or_else(|| BrowserAction::Navigate {
            url: decision.intent.default_start_url().to_string(),
        });

        if self.stream_progress {
            let task = session.task.as_deref().unwrap_or("your request");
            let _ = progress.send(OutboundMessage::progress(format!("Starting task: {}", task)));
        }

        self.execute_loop(session, first, progress).await
    }

    async fn execute_loop(
        &self,
        session: &mut Session,
        first: BrowserAction,
        progress: &ProgressSender,
    ) -> OutboundMessage {
        let mut action = first;
        let mut step = 0;

        loop {
            if !session.is_connected() {
                return cancelled(session);
            }
            step += 1;
            tracing::info!("Session {} step {}: {:?}", session.id, step, action);

            let mut result =
                execute_action(session.browser(), &action, self.operation_timeout).await;
            if result.image.is_none() {
                result.image = capture(session.browser(), self.operation_timeout).await;
            }

            if !result.success {
                let error = result.error.as_deref().unwrap_or(&result.message);
                return OutboundMessage::reply(
                    TurnStatus::Failed,
                    format!("Action failed: {}", error),
                )
                .with_image(result.image);
            }

            let page = self.page_state(session).await;

            if step >= self.max_steps {
                return OutboundMessage::reply(
                    TurnStatus::Failed,
                    format!(
                        "I stopped after {} steps without finishing the task. {}",
                        self.max_steps, result.message
                    ),
                )
                .with_image(result.image)
                .with_page(page.as_ref());
            }

            if self.stream_progress {
                let _ = progress.send(
                    OutboundMessage::progress(result.message.clone())
                        .with_image(result.image.clone())
                        .with_page(page.as_ref()),
                );
            }

            if !session.is_connected() {
                return cancelled(session);
            }

            let page_for_prompt = page.clone().unwrap_or_default();
            let decision = match self
                .interpreter
                .next_step(session, &page_for_prompt, &result, result.image.as_deref())
                .await
            {
                Ok(decision) => decision,
                Err(e) => return reasoning_failure(e).with_image(result.image),
            };
            session.merge_parameters(&decision.parameters);

            match self.follow_up(session, decision, &result, page.as_ref()) {
                Ok(next) => action = next,
                Err(reply) => return reply,
            }
        }
    }

    /// Either the next action to run, or the reply that ends the turn
    fn follow_up(
        &self,
        session: &mut Session,
        decision: Decision,
        last: &ActionResult,
        page: Option<&PageState>,
    ) -> Result<BrowserAction, OutboundMessage> {
        if decision.needs_info() {
            session.stage = TaskStage::AwaitingParameters;
            return Err(
                OutboundMessage::reply(TurnStatus::AwaitingInfo, question(&decision))
                    .with_image(last.image.clone())
                    .with_page(page),
            );
        }

        match (decision.status, decision.action) {
            (DecisionStatus::Complete, _) => {
                let intent = session.intent.unwrap_or_default();
                Err(
                    OutboundMessage::reply(TurnStatus::Completed, intent.completion_message())
                        .with_image(last.image.clone())
                        .with_page(page),
                )
            }
            (_, Some(action)) => Ok(action),
            (_, None) => {
                tracing::warn!("Next step decision named no action");
                Err(OutboundMessage::reply(TurnStatus::Clarify, FALLBACK_REPLY)
                    .with_image(last.image.clone()))
            }
        }
    }

    async fn page_state(&self, session: &Session) -> Option<PageState> {
        if !session.browser().is_open() {
            return None;
        }
        match tokio::time::timeout(self.operation_timeout, session.browser().page_state()).await {
            Ok(Ok(page)) => Some(page),
            Ok(Err(e)) => {
                tracing::warn!("Failed to read page state: {}", e);
                None
            }
            Err(_) => {
                tracing::warn!("Reading page state timed out");
                None
            }
        }
    }
}

/// Reply for a task abandoned because the client left; never delivered
fn cancelled(session: &Session) -> OutboundMessage {
    tracing::info!("Session {} disconnected; stopping task", session.id);
    OutboundMessage::reply(TurnStatus::Failed, "Task stopped: the client disconnected.")
}

fn reasoning_failure(e: ChatpilotError) -> OutboundMessage {
    match e {
        ChatpilotError::UnsupportedAction(kind) => {
            tracing::warn!("Model asked for unsupported action: {}", kind);
            OutboundMessage::reply(
                TurnStatus::Failed,
                format!("I can't perform the '{}' action. No browser action was taken.", kind),
            )
        }
        e => {
            tracing::warn!("Reasoning failed: {}", e);
            OutboundMessage::reply(TurnStatus::Clarify, FALLBACK_REPLY)
        }
    }
}

/// The question put to the user when details are missing
fn question(decision: &Decision) -> String {
    if let Some(reply) = &decision.reply {
        return reply.clone();
    }
    if decision.missing.is_empty() {
        "Could you give me a few more details?".to_string()
    } else {
        format!(
            "I need a few more details: {}.",
            decision.missing.join(", ")
        )
    }
}
