use super::ChatOrchestrator;
use super::idempotency::try_get_cached_result;
use super::types::INTERRUPTED_OUTPUT;
use crate::hooks::ChatHooks;
use crate::llm::LlmProvider;
use crate::message::{MessagePart, Role, UiMessage};
use crate::stores::MessageStore;
use serde_json::Value;

impl<Ctx, P, H, M> ChatOrchestrator<Ctx, P, H, M>
where
    Ctx: Clone + Send + Sync + 'static,
    P: LlmProvider + 'static,
    H: ChatHooks + 'static,
    M: MessageStore + 'static,
{
    /// Resolve automatic calls left pending by an interrupted turn.
    ///
    /// A completed result from the execution store wins; otherwise the call
    /// gets a synthesized error output. Confirmation-required calls are left
    /// alone. Returns the number of invocations patched.
    pub(super) async fn resolve_dangling_calls(&self, messages: &mut [UiMessage]) -> usize {
        let mut patched = 0;

        for message in messages
            .iter_mut()
            .filter(|message| message.role == Role::Assistant)
        {
            for part in &mut message.parts {
                let MessagePart::ToolInvocation(invocation) = part else {
                    continue;
                };
                if invocation.is_resolved() || self.gate.needs_confirmation(&invocation.tool_name)
                {
                    continue;
                }

                match try_get_cached_result(self.execution_store.as_ref(), &invocation.tool_call_id)
                    .await
                {
                    Some(result) => invocation.resolve(result.to_output(), !result.success),
                    None => {
                        invocation.resolve(Value::String(INTERRUPTED_OUTPUT.to_string()), true);
                    }
                }
                log::info!(
                    "Resolved dangling tool call (tool_call_id={}, tool_name={})",
                    invocation.tool_call_id,
                    invocation.tool_name
                );
                patched += 1;
            }
        }

        patched
    }
}
