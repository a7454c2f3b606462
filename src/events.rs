//! Chat events for real-time streaming.
//!
//! The [`ChatEvent`] enum represents everything a client can observe during a
//! turn. Events are streamed via an async channel, each wrapped in a
//! [`ChatEventEnvelope`] carrying a per-turn sequence number.
//!
//! # Event Flow
//!
//! A typical event sequence looks like:
//! 1. `Start` - The assistant message for this turn has an id
//! 2. `TextDelta` / `ToolInputAvailable` / `ToolOutputAvailable` - Model output merged with tool results
//! 3. `StepFinish` - One model round-trip finished
//! 4. `Finish` - The turn ended; `reason` says why
//!
//! A turn that never calls the model (waiting for a human, or blocked on a
//! confirmation) emits only `ToolApprovalRequired` events and `Finish`.

use crate::types::TokenUsage;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use time::OffsetDateTime;

/// Events emitted by a turn.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ChatEvent {
    /// The turn produced its first step; `message_id` names the assistant
    /// message that collects its parts.
    Start { message_id: String },

    /// A text delta for streaming responses
    TextDelta { message_id: String, delta: String },

    /// The model requested a tool call
    ToolInputAvailable {
        tool_call_id: String,
        tool_name: String,
        input: serde_json::Value,
    },

    /// A tool call was resolved inside the turn
    ToolOutputAvailable {
        tool_call_id: String,
        tool_name: String,
        output: serde_json::Value,
        is_error: bool,
    },

    /// A tool call is waiting for an explicit approval or decline
    ToolApprovalRequired {
        message_id: String,
        tool_call_id: String,
        tool_name: String,
        input: serde_json::Value,
    },

    /// One model round-trip finished
    StepFinish { step: usize, usage: TokenUsage },

    /// The turn ended
    Finish {
        reason: FinishReason,
        usage: TokenUsage,
    },

    /// An error occurred during the turn
    Error { message: String, recoverable: bool },
}

impl ChatEvent {
    #[must_use]
    pub fn start(message_id: impl Into<String>) -> Self {
        Self::Start {
            message_id: message_id.into(),
        }
    }

    #[must_use]
    pub fn text_delta(message_id: impl Into<String>, delta: impl Into<String>) -> Self {
        Self::TextDelta {
            message_id: message_id.into(),
            delta: delta.into(),
        }
    }

    #[must_use]
    pub fn tool_input_available(
        tool_call_id: impl Into<String>,
        tool_name: impl Into<String>,
        input: serde_json::Value,
    ) -> Self {
        Self::ToolInputAvailable {
            tool_call_id: tool_call_id.into(),
            tool_name: tool_name.into(),
            input,
        }
    }

    #[must_use]
    pub fn tool_output_available(
        tool_call_id: impl Into<String>,
        tool_name: impl Into<String>,
        output: serde_json::Value,
        is_error: bool,
    ) -> Self {
        Self::ToolOutputAvailable {
            tool_call_id: tool_call_id.into(),
            tool_name: tool_name.into(),
            output,
            is_error,
        }
    }

    #[must_use]
    pub fn tool_approval_required(
        message_id: impl Into<String>,
        tool_call_id: impl Into<String>,
        tool_name: impl Into<String>,
        input: serde_json::Value,
    ) -> Self {
        Self::ToolApprovalRequired {
            message_id: message_id.into(),
            tool_call_id: tool_call_id.into(),
            tool_name: tool_name.into(),
            input,
        }
    }

    #[must_use]
    pub const fn step_finish(step: usize, usage: TokenUsage) -> Self {
        Self::StepFinish { step, usage }
    }

    #[must_use]
    pub const fn finish(reason: FinishReason, usage: TokenUsage) -> Self {
        Self::Finish { reason, usage }
    }

    #[must_use]
    pub fn error(message: impl Into<String>, recoverable: bool) -> Self {
        Self::Error {
            message: message.into(),
            recoverable,
        }
    }

    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        matches!(self, Self::Finish { .. })
    }
}

/// Why a turn ended.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FinishReason {
    /// The model finished without requesting more tools
    Stop,
    /// A confirmation-required tool call is pending
    AwaitingConfirmation,
    /// The conversation is handed off; no model call was made
    WaitingForHuman,
    /// The step bound was reached
    MaxSteps,
    /// The client aborted the stream
    Aborted,
    /// The model provider failed
    Error,
}

/// Monotonically increasing per-turn counter for event ordering.
///
/// Each turn creates a fresh counter starting at 0. `Ordering::Relaxed` is
/// sufficient because the mpsc channel provides the happens-before ordering
/// guarantee between sender and receiver.
#[derive(Clone, Debug)]
pub struct SequenceCounter(Arc<AtomicU64>);

impl SequenceCounter {
    /// Create a new counter starting at 0.
    #[must_use]
    pub fn new() -> Self {
        Self(Arc::new(AtomicU64::new(0)))
    }

    /// Get the next sequence number, incrementing the counter.
    #[must_use]
    pub fn next(&self) -> u64 {
        self.0.fetch_add(1, Ordering::Relaxed)
    }
}

impl Default for SequenceCounter {
    fn default() -> Self {
        Self::new()
    }
}

/// Envelope wrapping every [`ChatEvent`] with delivery metadata.
///
/// Clients use `event_id` for deduplication on reconnect and `sequence` for
/// ordering. The `event` field is flattened in JSON so the envelope fields
/// and the event's `type` discriminant appear at the same level.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ChatEventEnvelope {
    /// Unique identifier (UUID v4) for this event emission.
    pub event_id: uuid::Uuid,
    /// Monotonically increasing sequence number within a single turn.
    pub sequence: u64,
    #[serde(with = "time::serde::rfc3339")]
    pub timestamp: OffsetDateTime,
    #[serde(flatten)]
    pub event: ChatEvent,
}

impl ChatEventEnvelope {
    /// Wrap a [`ChatEvent`], assigning it a unique ID, the next sequence
    /// number, and the current UTC timestamp.
    #[must_use]
    pub fn wrap(event: ChatEvent, seq: &SequenceCounter) -> Self {
        Self {
            event_id: uuid::Uuid::new_v4(),
            sequence: seq.next(),
            timestamp: OffsetDateTime::now_utc(),
            event,
        }
    }
}
