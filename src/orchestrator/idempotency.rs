use crate::message::ToolInvocation;
use crate::stores::ToolExecutionStore;
use crate::types::{ConversationId, ExecutionStatus, ToolExecution, ToolResult};
use log::warn;
use std::sync::Arc;
use time::OffsetDateTime;

/// Execute a tool with idempotency tracking via the execution store.
///
/// Records execution start before running the tool and completion after,
/// enabling crash recovery and deduplication.
pub(super) async fn execute_with_idempotency<Fut>(
    execution_store: Option<&Arc<dyn ToolExecutionStore>>,
    call: &ToolInvocation,
    conversation_id: &ConversationId,
    execute: Fut,
) -> ToolResult
where
    Fut: std::future::Future<Output = ToolResult>,
{
    let started_at = OffsetDateTime::now_utc();
    record_execution_start(execution_store, call, conversation_id, started_at).await;
    let result = execute.await;
    record_execution_complete(execution_store, call, conversation_id, &result, started_at).await;
    result
}

/// Check for an existing completed execution and return cached result.
///
/// Returns `Some(result)` if the execution was completed, `None` if not found
/// or still in-flight.
pub(super) async fn try_get_cached_result(
    execution_store: Option<&Arc<dyn ToolExecutionStore>>,
    tool_call_id: &str,
) -> Option<ToolResult> {
    let store = execution_store?;
    let execution = match store.get_execution(tool_call_id).await {
        Ok(execution) => execution?,
        Err(e) => {
            warn!("Failed to read execution record (tool_call_id={tool_call_id}, error={e})");
            return None;
        }
    };

    match execution.status {
        ExecutionStatus::Completed => execution.result,
        ExecutionStatus::InFlight => {
            // A previous attempt stopped mid-execution
            warn!(
                "Found in-flight execution from previous attempt (tool_call_id={}, tool_name={})",
                tool_call_id, execution.tool_name
            );
            None
        }
    }
}

/// Record that we're about to start executing a tool (write-ahead).
async fn record_execution_start(
    execution_store: Option<&Arc<dyn ToolExecutionStore>>,
    call: &ToolInvocation,
    conversation_id: &ConversationId,
    started_at: OffsetDateTime,
) {
    if let Some(store) = execution_store {
        let execution = ToolExecution::new_in_flight(
            &call.tool_call_id,
            conversation_id.clone(),
            &call.tool_name,
            call.input.clone(),
            started_at,
        );
        if let Err(e) = store.record_execution(execution).await {
            warn!(
                "Failed to record execution start (tool_call_id={}, error={})",
                call.tool_call_id, e
            );
        }
    }
}

async fn record_execution_complete(
    execution_store: Option<&Arc<dyn ToolExecutionStore>>,
    call: &ToolInvocation,
    conversation_id: &ConversationId,
    result: &ToolResult,
    started_at: OffsetDateTime,
) {
    if let Some(store) = execution_store {
        let mut execution = ToolExecution::new_in_flight(
            &call.tool_call_id,
            conversation_id.clone(),
            &call.tool_name,
            call.input.clone(),
            started_at,
        );
        execution.complete(result.clone());
        if let Err(e) = store.update_execution(execution).await {
            warn!(
                "Failed to record execution completion (tool_call_id={}, error={})",
                call.tool_call_id, e
            );
        }
    }
}
