use crate::llm::{ContentBlock, Message, Role};
use crate::message::{MessagePart, ToolInvocation, UiMessage};
use crate::types::RetryConfig;
use serde_json::Value;
use std::time::Duration;
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;

/// Convert u128 milliseconds to u64, capping at `u64::MAX`
#[allow(clippy::cast_possible_truncation)]
pub(super) const fn millis_to_u64(millis: u128) -> u64 {
    if millis > u64::MAX as u128 {
        u64::MAX
    } else {
        millis as u64
    }
}

/// Calculate exponential backoff delay with jitter.
///
/// Uses exponential backoff with the formula: `base * 2^(attempt-1) + jitter`,
/// capped at the maximum delay.
pub(super) fn calculate_backoff_delay(attempt: u32, config: &RetryConfig) -> Duration {
    let base_delay = config
        .base_delay_ms
        .saturating_mul(1u64 << attempt.saturating_sub(1).min(63));

    // Jitter is at most 1000ms or the base delay, whichever is smaller
    let max_jitter = config.base_delay_ms.min(1000);
    let jitter = if max_jitter > 0 {
        u64::from(
            std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .unwrap_or_default()
                .subsec_nanos(),
        ) % max_jitter
    } else {
        0
    };

    let delay_ms = base_delay.saturating_add(jitter).min(config.max_delay_ms);
    Duration::from_millis(delay_ms)
}

/// The configured prompt followed by the current time, so the model can
/// turn relative times into absolute ones.
pub(super) fn system_prompt_at(prompt: &str, now: OffsetDateTime) -> String {
    match now.format(&Rfc3339) {
        Ok(now) => format!("{prompt}\n\nCurrent date and time (UTC): {now}"),
        Err(_) => prompt.to_string(),
    }
}

/// Text form of a tool output as fed back to the model.
pub(super) fn output_to_string(output: &Value) -> String {
    match output {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Convert the finished blocks of a model step into message parts.
pub(super) fn blocks_to_parts(blocks: Vec<ContentBlock>) -> Vec<MessagePart> {
    blocks
        .into_iter()
        .filter_map(|block| match block {
            ContentBlock::Text { text } => Some(MessagePart::Text { text }),
            ContentBlock::ToolUse { id, name, input } => {
                let input = if input.is_null() {
                    serde_json::json!({})
                } else {
                    input
                };
                Some(MessagePart::ToolInvocation(ToolInvocation::pending(
                    id, name, input,
                )))
            }
            ContentBlock::ToolResult { .. } => None,
        })
        .collect()
}

/// Build the history sent to the model from the message log.
///
/// Invocations without a result are left out. An assistant message that
/// spans several steps is split at every point where text follows a tool
/// call, so each step's tool uses are answered before the next step's text.
pub(super) fn build_model_history(messages: &[UiMessage]) -> Vec<Message> {
    let mut history = Vec::new();

    for message in messages {
        match message.role {
            Role::User => {
                let text = message.text();
                if !text.is_empty() {
                    history.push(Message::user(text));
                }
            }
            Role::Assistant => push_assistant_steps(&mut history, message),
        }
    }

    history
}

fn push_assistant_steps(history: &mut Vec<Message>, message: &UiMessage) {
    let mut blocks = Vec::new();
    let mut results = Vec::new();

    for part in &message.parts {
        match part {
            MessagePart::Text { text } => {
                if !results.is_empty() {
                    flush_step(history, &mut blocks, &mut results);
                }
                if !text.is_empty() {
                    blocks.push(ContentBlock::Text { text: text.clone() });
                }
            }
            MessagePart::ToolInvocation(invocation) => {
                let Some(output) = invocation.output.as_ref().filter(|_| invocation.is_resolved())
                else {
                    continue;
                };
                blocks.push(ContentBlock::ToolUse {
                    id: invocation.tool_call_id.clone(),
                    name: invocation.tool_name.clone(),
                    input: invocation.input.clone(),
                });
                results.push(ContentBlock::tool_result(
                    &invocation.tool_call_id,
                    output_to_string(output),
                    invocation.is_error,
                ));
            }
        }
    }

    flush_step(history, &mut blocks, &mut results);
}

fn flush_step(
    history: &mut Vec<Message>,
    blocks: &mut Vec<ContentBlock>,
    results: &mut Vec<ContentBlock>,
) {
    if !blocks.is_empty() {
        history.push(Message::assistant_step(std::mem::take(blocks)));
    }
    if !results.is_empty() {
        history.push(Message::tool_results(std::mem::take(results)));
    }
}
