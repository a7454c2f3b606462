//! Turn lifecycle hooks for customization.
//!
//! - [`ChatHooks::pre_tool_use`] - Veto an automatic tool execution
//! - [`ChatHooks::post_tool_use`] - React to tool completion
//! - [`ChatHooks::on_event`] - Observe every streamed event
//!
//! Confirmation is not a hook decision: tools in the confirmation set never
//! reach `pre_tool_use` inside a turn.
//!
//! # Built-in Implementations
//!
//! - [`DefaultHooks`] - Allow everything, no side effects
//! - [`LoggingHooks`] - Debug logging via `tracing`

use crate::events::ChatEvent;
use crate::types::ToolResult;
use async_trait::async_trait;
use serde_json::Value;

/// Decision returned by pre-tool hooks
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ToolDecision {
    /// Allow the tool to execute
    Allow,
    /// Block the tool execution; the message becomes the call's error output
    Block(String),
}

/// Lifecycle hooks for the turn pipeline.
#[async_trait]
pub trait ChatHooks: Send + Sync {
    /// Called before an automatic tool is executed.
    async fn pre_tool_use(&self, _tool_name: &str, _input: &Value) -> ToolDecision {
        ToolDecision::Allow
    }

    /// Called after a tool completes execution, inside a turn or on approval.
    async fn post_tool_use(&self, _tool_name: &str, _result: &ToolResult) {}

    /// Called for every event before it is sent to the client.
    async fn on_event(&self, _event: &ChatEvent) {}
}

/// Default hooks: allow all automatic tools.
pub struct DefaultHooks;

#[async_trait]
impl ChatHooks for DefaultHooks {}

/// Hooks that log all events (useful for debugging)
pub struct LoggingHooks;

#[async_trait]
impl ChatHooks for LoggingHooks {
    async fn pre_tool_use(&self, tool_name: &str, input: &Value) -> ToolDecision {
        tracing::debug!(tool = tool_name, ?input, "Pre-tool use");
        ToolDecision::Allow
    }

    async fn post_tool_use(&self, tool_name: &str, result: &ToolResult) {
        tracing::debug!(
            tool = tool_name,
            success = result.success,
            duration_ms = result.duration_ms,
            "Post-tool use"
        );
    }

    async fn on_event(&self, event: &ChatEvent) {
        tracing::debug!(?event, "Chat event");
    }
}
