use super::ChatOrchestrator;
use super::helpers::millis_to_u64;
use super::idempotency::{execute_with_idempotency, try_get_cached_result};
use crate::hooks::{ChatHooks, ToolDecision};
use crate::llm::LlmProvider;
use crate::message::ToolInvocation;
use crate::stores::MessageStore;
use crate::tools::{ErasedTool, ToolContext};
use crate::types::{ConversationId, ToolResult};
use log::{info, warn};
use std::sync::Arc;
use std::time::Instant;
use tokio_util::sync::CancellationToken;

impl<Ctx, P, H, M> ChatOrchestrator<Ctx, P, H, M>
where
    Ctx: Clone + Send + Sync + 'static,
    P: LlmProvider + 'static,
    H: ChatHooks + 'static,
    M: MessageStore + 'static,
{
    /// Run an automatic tool call inside a turn.
    ///
    /// Returns `None` if the turn was aborted before the tool returned; the
    /// invocation then stays pending until the next turn's cleanup.
    pub(super) async fn execute_auto_call(
        &self,
        conversation_id: &ConversationId,
        call: &ToolInvocation,
        cancel: &CancellationToken,
    ) -> Option<ToolResult> {
        if let Some(cached) =
            try_get_cached_result(self.execution_store.as_ref(), &call.tool_call_id).await
        {
            info!(
                "Using cached result from previous execution (tool_call_id={}, tool_name={})",
                call.tool_call_id, call.tool_name
            );
            return Some(cached);
        }

        let Some(tool) = self.tools.get(&call.tool_name) else {
            warn!("Model requested unknown tool: {}", call.tool_name);
            return Some(ToolResult::error(format!("Unknown tool: {}", call.tool_name)));
        };

        if let ToolDecision::Block(reason) =
            self.hooks.pre_tool_use(&call.tool_name, &call.input).await
        {
            info!("Tool call blocked by hook (tool_name={}, reason={reason})", call.tool_name);
            return Some(ToolResult::error(reason));
        }

        let tool_context = self.tool_context(conversation_id);
        let execution = execute_with_idempotency(
            self.execution_store.as_ref(),
            call,
            conversation_id,
            run_tool(tool, &tool_context, call),
        );

        let result = tokio::select! {
            () = cancel.cancelled() => {
                info!(
                    "Turn aborted during tool execution (tool_call_id={}, tool_name={})",
                    call.tool_call_id, call.tool_name
                );
                return None;
            }
            result = execution => result,
        };

        self.hooks.post_tool_use(&call.tool_name, &result).await;
        Some(result)
    }

    /// Run a confirmation-required call after it was approved.
    pub(super) async fn execute_approved_call(
        &self,
        conversation_id: &ConversationId,
        call: &ToolInvocation,
    ) -> ToolResult {
        if let Some(cached) =
            try_get_cached_result(self.execution_store.as_ref(), &call.tool_call_id).await
        {
            return cached;
        }

        let Some(tool) = self.tools.get(&call.tool_name) else {
            warn!("Approved call names an unregistered tool: {}", call.tool_name);
            return ToolResult::error(format!("Unknown tool: {}", call.tool_name));
        };

        let tool_context = self.tool_context(conversation_id);
        let result = execute_with_idempotency(
            self.execution_store.as_ref(),
            call,
            conversation_id,
            run_tool(tool, &tool_context, call),
        )
        .await;

        self.hooks.post_tool_use(&call.tool_name, &result).await;
        result
    }

    fn tool_context(&self, conversation_id: &ConversationId) -> ToolContext<Ctx> {
        ToolContext::new(self.app.clone(), conversation_id.clone())
    }
}

async fn run_tool<Ctx>(
    tool: &Arc<dyn ErasedTool<Ctx>>,
    tool_context: &ToolContext<Ctx>,
    call: &ToolInvocation,
) -> ToolResult {
    let start = Instant::now();
    let result = match tool.execute(tool_context, call.input.clone()).await {
        Ok(result) => result,
        Err(e) => ToolResult::error(format!("Tool error: {e}")),
    };
    result.with_duration(millis_to_u64(start.elapsed().as_millis()))
}
