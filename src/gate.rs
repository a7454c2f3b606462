//! Confirmation gate for tool calls.
//!
//! The gate holds the static set of tool names that must never run without an
//! explicit external decision. It is built once per orchestrator and only
//! read afterwards.

use crate::message::{Role, ToolInvocation, UiMessage};
use std::collections::HashSet;

/// Per-invocation gate verdict.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CallStatus {
    pub needs_confirmation: bool,
    pub is_resolved: bool,
}

impl CallStatus {
    #[must_use]
    pub const fn is_blocking(self) -> bool {
        self.needs_confirmation && !self.is_resolved
    }
}

/// A confirmation-required invocation that has no result yet.
#[derive(Clone, Debug, PartialEq)]
pub struct BlockingCall {
    pub message_id: String,
    pub tool_call_id: String,
    pub tool_name: String,
    pub input: serde_json::Value,
}

#[derive(Clone, Debug, Default)]
pub struct ToolCallGate {
    confirmation_tools: HashSet<String>,
}

impl ToolCallGate {
    #[must_use]
    pub fn new<I, S>(confirmation_tools: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            confirmation_tools: confirmation_tools.into_iter().map(Into::into).collect(),
        }
    }

    #[must_use]
    pub fn needs_confirmation(&self, tool_name: &str) -> bool {
        self.confirmation_tools.contains(tool_name)
    }

    #[must_use]
    pub fn status(&self, invocation: &ToolInvocation) -> CallStatus {
        CallStatus {
            needs_confirmation: self.needs_confirmation(&invocation.tool_name),
            is_resolved: invocation.is_resolved(),
        }
    }

    /// Gate verdict for every tool invocation of `message`, in part order.
    #[must_use]
    pub fn classify<'a>(&self, message: &'a UiMessage) -> Vec<(&'a ToolInvocation, CallStatus)> {
        message
            .tool_invocations()
            .map(|invocation| (invocation, self.status(invocation)))
            .collect()
    }

    /// Every confirmation-required call without a result, in log order.
    #[must_use]
    pub fn blocking_calls(&self, messages: &[UiMessage]) -> Vec<BlockingCall> {
        messages
            .iter()
            .filter(|message| message.role == Role::Assistant)
            .flat_map(|message| {
                self.classify(message)
                    .into_iter()
                    .filter(|(_, status)| status.is_blocking())
                    .map(|(invocation, _)| BlockingCall {
                        message_id: message.id.clone(),
                        tool_call_id: invocation.tool_call_id.clone(),
                        tool_name: invocation.tool_name.clone(),
                        input: invocation.input.clone(),
                    })
            })
            .collect()
    }
}
