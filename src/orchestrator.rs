//! The conversation orchestrator.
//!
//! [`ChatOrchestrator`] owns the model provider, tools, hooks and stores, and
//! exposes every boundary operation of a conversation: submitting user
//! messages, posting operator replies, handing off to a human, resolving
//! pending tool calls and continuing a turn.
//!
//! # Turn pipeline
//!
//! A turn runs in a spawned task and streams [`ChatEvent`](crate::ChatEvent)s
//! through a [`ChatStream`]:
//!
//! 1. If the conversation is waiting for a human, emit the placeholder and stop
//! 2. Resolve automatic tool calls left pending by an interrupted turn
//! 3. If confirmation-required calls are pending, emit approval requests and stop
//! 4. Stream model steps, executing automatic tools between steps, up to
//!    `max_steps`
//!
//! # Example
//!
//! ```ignore
//! let chat = agent_handoff::builder(())
//!     .provider(my_provider)
//!     .tools(tools)
//!     .build();
//!
//! let conversation = ConversationId::from_name("support-42");
//! let (_message_id, mut stream) = chat.submit_user_message(&conversation, "Hi").await?;
//! while let Some(envelope) = stream.recv().await {
//!     println!("{:?}", envelope.event);
//! }
//! ```

mod builder;
mod cleanup;
mod helpers;
mod idempotency;
mod llm;
mod tool_execution;
mod turn;
mod types;

#[cfg(test)]
pub(crate) mod test_utils;

pub use builder::ChatOrchestratorBuilder;
pub use types::{DECLINED_OUTPUT, INTERRUPTED_OUTPUT, ResolveOutcome, ToolResolution};

use crate::composer::ChatStream;
use crate::error::ChatError;
use crate::gate::ToolCallGate;
use crate::handoff::{self, HandoffState, PendingMessage};
use crate::hooks::ChatHooks;
use crate::llm::LlmProvider;
use crate::message::{Role, UiMessage};
use crate::registry::ConversationRegistry;
use crate::stores::{MessageStore, ToolExecutionStore};
use crate::tools::ToolRegistry;
use crate::types::{ChatConfig, ConversationId};
use log::info;
use serde_json::Value;
use std::sync::Arc;

/// Create a new builder. `app` is passed to every tool execution.
#[must_use]
pub fn builder<Ctx>(app: Ctx) -> ChatOrchestratorBuilder<Ctx, (), (), ()> {
    ChatOrchestratorBuilder::new(app)
}

/// Routes conversations between the model, tools and human operators.
///
/// Cloning is cheap; clones share stores, tools and per-conversation locks.
pub struct ChatOrchestrator<Ctx, P, H, M> {
    provider: Arc<P>,
    tools: Arc<ToolRegistry<Ctx>>,
    hooks: Arc<H>,
    message_store: Arc<M>,
    execution_store: Option<Arc<dyn ToolExecutionStore>>,
    config: Arc<ChatConfig>,
    gate: Arc<ToolCallGate>,
    conversations: Arc<ConversationRegistry>,
    app: Ctx,
}

impl<Ctx: Clone, P, H, M> Clone for ChatOrchestrator<Ctx, P, H, M> {
    fn clone(&self) -> Self {
        Self {
            provider: Arc::clone(&self.provider),
            tools: Arc::clone(&self.tools),
            hooks: Arc::clone(&self.hooks),
            message_store: Arc::clone(&self.message_store),
            execution_store: self.execution_store.clone(),
            config: Arc::clone(&self.config),
            gate: Arc::clone(&self.gate),
            conversations: Arc::clone(&self.conversations),
            app: self.app.clone(),
        }
    }
}

impl<Ctx, P, H, M> ChatOrchestrator<Ctx, P, H, M>
where
    Ctx: Clone + Send + Sync + 'static,
    P: LlmProvider + 'static,
    H: ChatHooks + 'static,
    M: MessageStore + 'static,
{
    #[must_use]
    pub fn config(&self) -> &ChatConfig {
        &self.config
    }

    #[must_use]
    pub fn gate(&self) -> &ToolCallGate {
        &self.gate
    }

    /// Append a user message and start a turn for it.
    ///
    /// Waits for any in-flight turn of the same conversation to finish
    /// first, so the message lands after that turn's output.
    ///
    /// # Errors
    /// `Validation` for blank text, `Storage` if the append fails.
    pub async fn submit_user_message(
        &self,
        conversation_id: &ConversationId,
        text: impl Into<String>,
    ) -> Result<(String, ChatStream), ChatError> {
        let text = text.into();
        if text.trim().is_empty() {
            return Err(ChatError::Validation("message text is required".into()));
        }
        self.append_and_run(conversation_id, UiMessage::user(text), false)
            .await
    }

    /// Append the synthetic user message for a fired scheduled task and run
    /// the normal turn pipeline for it.
    ///
    /// A conversation that is waiting for a human stays handed off: the task
    /// message is stored already flagged and the turn only emits the
    /// placeholder, without calling the model.
    ///
    /// # Errors
    /// `Validation` for a blank description, `Storage` if the append fails.
    pub async fn on_scheduled_task_fired(
        &self,
        conversation_id: &ConversationId,
        description: &str,
    ) -> Result<(String, ChatStream), ChatError> {
        if description.trim().is_empty() {
            return Err(ChatError::Validation(
                "scheduled task description is required".into(),
            ));
        }
        info!("Scheduled task fired (conversation_id={conversation_id}, description={description})");
        self.append_and_run(conversation_id, UiMessage::scheduled_task(description), true)
            .await
    }

    /// Run a turn without appending a message, e.g. after resolving a tool
    /// call.
    ///
    /// # Errors
    /// `NotFound` if the conversation has no messages.
    pub async fn continue_conversation(
        &self,
        conversation_id: &ConversationId,
    ) -> Result<ChatStream, ChatError> {
        let handle = self.conversations.handle(conversation_id).await;
        let turn_guard = handle.lock_turn_owned().await;

        if self.message_store.count(conversation_id).await? == 0 {
            return Err(ChatError::conversation_not_found(conversation_id.as_str()));
        }

        Ok(self.spawn_turn(handle, turn_guard))
    }

    /// With `inherit_handoff`, a message appended to a conversation that is
    /// waiting for a human is flagged too, so the conversation stays handed
    /// off.
    async fn append_and_run(
        &self,
        conversation_id: &ConversationId,
        mut message: UiMessage,
        inherit_handoff: bool,
    ) -> Result<(String, ChatStream), ChatError> {
        let handle = self.conversations.handle(conversation_id).await;
        let turn_guard = handle.lock_turn_owned().await;

        let message_id = message.id.clone();
        {
            let _writes = handle.lock_writes().await;
            if inherit_handoff {
                let messages = self.message_store.list(conversation_id).await?;
                if HandoffState::of(&messages).is_waiting() {
                    info!("Conversation waiting for a human, queueing message for the operator (conversation_id={conversation_id}, message_id={message_id})");
                    message.metadata.waiting_for_human = Some(true);
                }
            }
            self.message_store.append(conversation_id, message).await?;
        }

        Ok((message_id, self.spawn_turn(handle, turn_guard)))
    }

    /// Post an operator-authored assistant message. Does not call the model.
    ///
    /// If `responding_to` names a user message, its waiting flag is cleared
    /// in the same write. Waits for an in-flight turn to finish, so the reply
    /// always follows that turn's assistant message.
    ///
    /// # Errors
    /// `Validation` for blank text; `NotFound` for an empty conversation or
    /// an unknown `responding_to`, in which case nothing is written.
    pub async fn submit_manual_assistant_message(
        &self,
        conversation_id: &ConversationId,
        text: impl Into<String>,
        responding_to: Option<&str>,
    ) -> Result<String, ChatError> {
        let text = text.into();
        if text.trim().is_empty() {
            return Err(ChatError::Validation("message text is required".into()));
        }

        let handle = self.conversations.handle(conversation_id).await;
        let _turn = handle.lock_turn().await;
        let _writes = handle.lock_writes().await;

        let mut messages = self.existing_messages(conversation_id).await?;
        let reply = UiMessage::assistant(text);
        let reply_id = reply.id.clone();
        handoff::apply_manual_reply(&mut messages, reply, responding_to)?;
        self.message_store
            .replace_all(conversation_id, messages)
            .await?;

        info!("Manual reply posted (conversation_id={conversation_id}, message_id={reply_id})");
        Ok(reply_id)
    }

    /// Flag a user message as waiting for a human.
    ///
    /// # Errors
    /// `NotFound` for an unknown conversation or message, `Validation` for an
    /// assistant message.
    pub async fn mark_waiting_for_human(
        &self,
        conversation_id: &ConversationId,
        message_id: &str,
    ) -> Result<(), ChatError> {
        let handle = self.conversations.handle(conversation_id).await;
        let _writes = handle.lock_writes().await;

        let mut messages = self.existing_messages(conversation_id).await?;
        handoff::mark_waiting(&mut messages, message_id)?;
        self.message_store
            .replace_all(conversation_id, messages)
            .await?;

        info!("Message marked as waiting for a human (conversation_id={conversation_id}, message_id={message_id})");
        Ok(())
    }

    /// # Errors
    /// `NotFound` if the conversation has no messages.
    pub async fn list_messages(
        &self,
        conversation_id: &ConversationId,
    ) -> Result<Vec<UiMessage>, ChatError> {
        self.existing_messages(conversation_id).await
    }

    /// User messages an operator may need to answer.
    ///
    /// # Errors
    /// `NotFound` if the conversation has no messages.
    pub async fn list_pending_messages(
        &self,
        conversation_id: &ConversationId,
    ) -> Result<Vec<PendingMessage>, ChatError> {
        let messages = self.existing_messages(conversation_id).await?;
        Ok(handoff::pending_messages(&messages))
    }

    /// # Errors
    /// `NotFound` if the conversation has no messages.
    pub async fn handoff_state(
        &self,
        conversation_id: &ConversationId,
    ) -> Result<HandoffState, ChatError> {
        let messages = self.existing_messages(conversation_id).await?;
        Ok(HandoffState::of(&messages))
    }

    /// Attach an external answer to a pending tool call.
    ///
    /// Only the `(message_id, tool_call_id)` invocation changes. Repeating a
    /// resolution that produced the same output is a no-op. Approval runs the
    /// registered tool while the conversation's writes are held, so an
    /// approval can never execute twice.
    ///
    /// The turn is not resumed; call [`Self::continue_conversation`] once
    /// every pending call is answered.
    ///
    /// # Errors
    /// `NotFound` for an unknown conversation or message; `StaleToolCall` for
    /// an unknown call id, a call to an automatic tool, or a call that
    /// already carries a different result.
    pub async fn resolve_tool_call(
        &self,
        conversation_id: &ConversationId,
        message_id: &str,
        tool_call_id: &str,
        resolution: ToolResolution,
    ) -> Result<ResolveOutcome, ChatError> {
        let handle = self.conversations.handle(conversation_id).await;
        let _writes = handle.lock_writes().await;

        let mut messages = self.existing_messages(conversation_id).await?;
        let message = messages
            .iter_mut()
            .find(|message| message.id == message_id)
            .ok_or_else(|| ChatError::message_not_found(message_id))?;
        let stale = |reason: &str| ChatError::StaleToolCall {
            message_id: message_id.to_string(),
            tool_call_id: tool_call_id.to_string(),
            reason: reason.to_string(),
        };
        if message.role != Role::Assistant {
            return Err(stale("message is not an assistant message"));
        }
        let invocation = message
            .tool_invocation_mut(tool_call_id)
            .ok_or_else(|| stale("no such tool call in message"))?;
        if !self.gate.needs_confirmation(&invocation.tool_name) {
            return Err(stale("tool call does not require confirmation"));
        }

        let (output, is_error) = match resolution {
            ToolResolution::Approve if invocation.is_resolved() => {
                return Ok(ResolveOutcome::AlreadyResolved);
            }
            ToolResolution::Approve => {
                let result = self
                    .execute_approved_call(conversation_id, invocation)
                    .await;
                (result.to_output(), !result.success)
            }
            ToolResolution::Output(output) => (output, false),
            ToolResolution::Decline { reason } => {
                if let Some(reason) = reason {
                    info!("Tool call declined (tool_call_id={tool_call_id}, reason={reason})");
                }
                (Value::String(DECLINED_OUTPUT.to_string()), true)
            }
        };

        if invocation.is_resolved() {
            return if invocation.output.as_ref() == Some(&output) && invocation.is_error == is_error
            {
                Ok(ResolveOutcome::AlreadyResolved)
            } else {
                Err(stale("already resolved with a different result"))
            };
        }

        invocation.resolve(output, is_error);
        self.message_store
            .replace_all(conversation_id, messages)
            .await?;

        info!("Tool call resolved (conversation_id={conversation_id}, message_id={message_id}, tool_call_id={tool_call_id})");
        Ok(ResolveOutcome::Applied)
    }

    async fn existing_messages(
        &self,
        conversation_id: &ConversationId,
    ) -> Result<Vec<UiMessage>, ChatError> {
        let messages = self.message_store.list(conversation_id).await?;
        if messages.is_empty() {
            return Err(ChatError::conversation_not_found(conversation_id.as_str()));
        }
        Ok(messages)
    }
}
