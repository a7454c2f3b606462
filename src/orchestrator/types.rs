use crate::llm::StreamAccumulator;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Output recorded when a confirmation-required call is declined.
pub const DECLINED_OUTPUT: &str = "Error: User denied access to tool execution";

/// Output synthesized for an automatic call whose turn ended before it
/// produced a result.
pub const INTERRUPTED_OUTPUT: &str =
    "Error: Tool execution was interrupted before it returned a result";

/// An external answer to a pending tool call.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum ToolResolution {
    /// Run the registered tool with the recorded input and attach its result.
    Approve,
    /// Attach this payload as the call's output.
    Output(Value),
    /// Refuse the call; the output records the refusal as an error.
    Decline { reason: Option<String> },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResolveOutcome {
    /// The output was attached.
    Applied,
    /// The call already carried this result; nothing changed.
    AlreadyResolved,
}

/// Error type for stream processing.
pub(super) enum StreamError {
    Recoverable(String),
    Fatal(String),
}

/// Result of one attempt at streaming a model step.
pub(super) enum StreamAttempt {
    Completed(StreamAccumulator),
    Aborted(StreamAccumulator),
    Failed {
        partial: StreamAccumulator,
        error: StreamError,
        /// Whether any delta of this attempt already reached the client.
        delivered: bool,
    },
}

/// Result of a model step after retries.
pub(super) enum StepOutcome {
    Completed(StreamAccumulator),
    Aborted(StreamAccumulator),
    Failed {
        partial: StreamAccumulator,
        message: String,
        recoverable: bool,
    },
}

/// Mutable state of one turn.
pub(super) struct TurnState {
    /// Id of the single assistant message this turn writes.
    pub(super) message_id: String,
    /// Whether that message is already in the log.
    pub(super) appended: bool,
    pub(super) usage: crate::types::TokenUsage,
}

impl TurnState {
    pub(super) fn new() -> Self {
        Self {
            message_id: crate::message::new_message_id(),
            appended: false,
            usage: crate::types::TokenUsage::default(),
        }
    }
}
