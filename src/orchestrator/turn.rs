use super::ChatOrchestrator;
use super::helpers::{blocks_to_parts, build_model_history, system_prompt_at};
use super::types::{StepOutcome, TurnState};
use crate::composer::{ChatStream, StreamComposer};
use crate::error::ChatError;
use crate::events::{ChatEvent, FinishReason};
use crate::handoff::HandoffState;
use crate::hooks::ChatHooks;
use crate::llm::{ChatRequest, LlmProvider};
use crate::message::{MessagePart, Role, ToolInvocation, UiMessage};
use crate::registry::ConversationHandle;
use crate::stores::MessageStore;
use crate::types::TokenUsage;
use log::{debug, error, info, warn};
use std::sync::Arc;
use time::OffsetDateTime;
use tokio::sync::OwnedMutexGuard;

impl<Ctx, P, H, M> ChatOrchestrator<Ctx, P, H, M>
where
    Ctx: Clone + Send + Sync + 'static,
    P: LlmProvider + 'static,
    H: ChatHooks + 'static,
    M: MessageStore + 'static,
{
    /// Run a turn in the background. `turn_guard` is held until it ends.
    pub(super) fn spawn_turn(
        &self,
        handle: Arc<ConversationHandle>,
        turn_guard: OwnedMutexGuard<()>,
    ) -> ChatStream {
        let (composer, stream) =
            StreamComposer::channel(self.config.event_buffer, Arc::clone(&self.hooks));
        let this = self.clone();

        tokio::spawn(async move {
            this.run_turn(&handle, &composer).await;
            drop(turn_guard);
            this.conversations.release(handle).await;
        });

        stream
    }

    async fn run_turn(&self, handle: &ConversationHandle, composer: &StreamComposer<H>) {
        let conversation_id = handle.id();

        match self.prepare_turn(handle, composer).await {
            Ok(true) => {}
            Ok(false) => return,
            Err(e) => {
                error!("Failed to prepare turn (conversation_id={conversation_id}, error={e})");
                composer.emit(ChatEvent::error(e.to_string(), e.is_retryable())).await;
                composer
                    .finish(FinishReason::Error, TokenUsage::default())
                    .await;
                return;
            }
        }

        let mut turn = TurnState::new();
        let reason = match self.run_steps(handle, composer, &mut turn).await {
            Ok(reason) => reason,
            Err(e) => {
                error!("Turn failed (conversation_id={conversation_id}, error={e})");
                composer.emit(ChatEvent::error(e.to_string(), e.is_retryable())).await;
                FinishReason::Error
            }
        };

        info!(
            "Turn finished (conversation_id={conversation_id}, reason={reason:?}, input_tokens={}, output_tokens={})",
            turn.usage.input_tokens, turn.usage.output_tokens
        );
        composer.finish(reason, turn.usage).await;
    }

    /// Checks that run before any model call. Returns `false` when the turn
    /// already finished: the conversation is handed off, or confirmation
    /// calls are still pending.
    async fn prepare_turn(
        &self,
        handle: &ConversationHandle,
        composer: &StreamComposer<H>,
    ) -> Result<bool, ChatError> {
        let conversation_id = handle.id();
        let _writes = handle.lock_writes().await;
        let mut messages = self.message_store.list(conversation_id).await?;

        if HandoffState::of(&messages).is_waiting() {
            info!("Conversation waiting for a human, suppressing turn (conversation_id={conversation_id})");
            composer.placeholder().await;
            return Ok(false);
        }

        if self.resolve_dangling_calls(&mut messages).await > 0 {
            self.message_store
                .replace_all(conversation_id, messages.clone())
                .await?;
        }

        let blocking = self.gate.blocking_calls(&messages);
        if blocking.is_empty() {
            return Ok(true);
        }

        info!(
            "Turn blocked on {} pending confirmation(s) (conversation_id={conversation_id})",
            blocking.len()
        );
        for call in blocking {
            composer
                .emit(ChatEvent::tool_approval_required(
                    call.message_id,
                    call.tool_call_id,
                    call.tool_name,
                    call.input,
                ))
                .await;
        }
        composer
            .finish(FinishReason::AwaitingConfirmation, TokenUsage::default())
            .await;
        Ok(false)
    }

    async fn run_steps(
        &self,
        handle: &ConversationHandle,
        composer: &StreamComposer<H>,
        turn: &mut TurnState,
    ) -> Result<FinishReason, ChatError> {
        let conversation_id = handle.id();
        let tools = self.tools.to_llm_tools();
        let tools = (!tools.is_empty()).then_some(tools);

        composer.emit(ChatEvent::start(&turn.message_id)).await;

        for step in 0..self.config.max_steps {
            if composer.is_cancelled() {
                return Ok(FinishReason::Aborted);
            }

            let messages = self.message_store.list(conversation_id).await?;
            let request = ChatRequest {
                system: system_prompt_at(&self.config.system_prompt, OffsetDateTime::now_utc()),
                messages: build_model_history(&messages),
                tools: tools.clone(),
                max_tokens: self.config.max_tokens,
            };
            debug!(
                "Starting step {step} (conversation_id={conversation_id}, history_len={})",
                request.messages.len()
            );

            let (mut accumulator, early_finish) =
                match self.stream_step(&request, composer, &turn.message_id).await {
                    StepOutcome::Completed(accumulator) => (accumulator, None),
                    StepOutcome::Aborted(accumulator) => (accumulator, Some(FinishReason::Aborted)),
                    StepOutcome::Failed {
                        partial,
                        message,
                        recoverable,
                    } => {
                        composer.emit(ChatEvent::error(message, recoverable)).await;
                        (partial, Some(FinishReason::Error))
                    }
                };

            let step_usage = accumulator
                .usage()
                .map(|usage| TokenUsage {
                    input_tokens: usage.input_tokens,
                    output_tokens: usage.output_tokens,
                })
                .unwrap_or_default();
            turn.usage.add(&step_usage);

            // An interrupted step keeps the text the client saw and drops
            // tool calls whose input may be incomplete.
            if early_finish.is_some() {
                accumulator.discard_tool_uses();
            }

            let parts = blocks_to_parts(accumulator.into_content_blocks());
            let calls: Vec<ToolInvocation> = parts
                .iter()
                .filter_map(|part| match part {
                    MessagePart::ToolInvocation(invocation) => Some(invocation.clone()),
                    MessagePart::Text { .. } => None,
                })
                .collect();
            self.persist_step(handle, turn, parts).await?;

            if let Some(reason) = early_finish {
                return Ok(reason);
            }

            for call in &calls {
                composer
                    .emit(ChatEvent::tool_input_available(
                        &call.tool_call_id,
                        &call.tool_name,
                        call.input.clone(),
                    ))
                    .await;
            }

            let mut awaiting_confirmation = false;
            for call in &calls {
                if self.gate.needs_confirmation(&call.tool_name) {
                    composer
                        .emit(ChatEvent::tool_approval_required(
                            &turn.message_id,
                            &call.tool_call_id,
                            &call.tool_name,
                            call.input.clone(),
                        ))
                        .await;
                    awaiting_confirmation = true;
                    continue;
                }

                let Some(result) = self
                    .execute_auto_call(conversation_id, call, composer.cancel_token())
                    .await
                else {
                    return Ok(FinishReason::Aborted);
                };

                let (output, is_error) = self
                    .patch_step_invocation(
                        handle,
                        turn,
                        &call.tool_call_id,
                        result.to_output(),
                        !result.success,
                    )
                    .await?;
                composer
                    .emit(ChatEvent::tool_output_available(
                        &call.tool_call_id,
                        &call.tool_name,
                        output,
                        is_error,
                    ))
                    .await;
            }

            composer.emit(ChatEvent::step_finish(step, step_usage)).await;

            if awaiting_confirmation {
                return Ok(FinishReason::AwaitingConfirmation);
            }
            if calls.is_empty() {
                return Ok(FinishReason::Stop);
            }
        }

        info!(
            "Reached max steps ({}) (conversation_id={conversation_id})",
            self.config.max_steps
        );
        Ok(FinishReason::MaxSteps)
    }

    /// Write a step's parts: the first step appends the turn's assistant
    /// message, later steps extend it.
    async fn persist_step(
        &self,
        handle: &ConversationHandle,
        turn: &mut TurnState,
        parts: Vec<MessagePart>,
    ) -> Result<(), ChatError> {
        if parts.is_empty() {
            return Ok(());
        }

        let conversation_id = handle.id();
        let _writes = handle.lock_writes().await;

        if turn.appended {
            let mut messages = self.message_store.list(conversation_id).await?;
            let message = messages
                .iter_mut()
                .find(|message| message.id == turn.message_id)
                .ok_or_else(|| ChatError::message_not_found(&turn.message_id))?;
            message.parts.extend(parts);
            self.message_store
                .replace_all(conversation_id, messages)
                .await?;
        } else {
            let mut message = UiMessage::with_parts(Role::Assistant, parts);
            message.id.clone_from(&turn.message_id);
            self.message_store.append(conversation_id, message).await?;
            turn.appended = true;
        }
        Ok(())
    }

    /// Store an automatic call's result on the turn's message. A result
    /// already present wins; the stored `(output, is_error)` is returned.
    pub(super) async fn patch_step_invocation(
        &self,
        handle: &ConversationHandle,
        turn: &TurnState,
        tool_call_id: &str,
        output: serde_json::Value,
        is_error: bool,
    ) -> Result<(serde_json::Value, bool), ChatError> {
        let conversation_id = handle.id();
        let _writes = handle.lock_writes().await;

        let mut messages = self.message_store.list(conversation_id).await?;
        let invocation = messages
            .iter_mut()
            .find(|message| message.id == turn.message_id)
            .and_then(|message| message.tool_invocation_mut(tool_call_id))
            .ok_or_else(|| ChatError::StaleToolCall {
                message_id: turn.message_id.clone(),
                tool_call_id: tool_call_id.to_string(),
                reason: "invocation missing from the turn's message".to_string(),
            })?;

        if invocation.is_resolved() {
            warn!(
                "Tool call already resolved, keeping stored result (conversation_id={conversation_id}, tool_call_id={tool_call_id})"
            );
            let stored = invocation.output.clone().unwrap_or(serde_json::Value::Null);
            return Ok((stored, invocation.is_error));
        }

        invocation.resolve(output.clone(), is_error);
        self.message_store
            .replace_all(conversation_id, messages)
            .await?;
        Ok((output, is_error))
    }
}
