//! Core types shared across the orchestrator.
//!
//! - [`ConversationId`]: Stable identifier for a conversation
//! - [`ChatConfig`]: Configuration for the turn pipeline
//! - [`RetryConfig`]: Backoff settings for transient model errors
//! - [`TokenUsage`]: Token consumption statistics
//! - [`ToolResult`]: Result returned from tool execution
//! - [`ToolTier`]: Permission tiers for tools
//! - [`ToolExecution`]: Write-ahead record used for tool idempotency

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use uuid::Uuid;

/// Namespace for name-derived conversation ids.
const CONVERSATION_NAMESPACE: Uuid = Uuid::from_u128(0x6f1c_8a4e_2b7d_4c1a_9e35_d0a4_7b2f_51c3);

/// Unique identifier for a conversation.
///
/// Ids derived with [`ConversationId::from_name`] are content-addressed: the
/// same name always yields the same id, which the registry maps to exactly
/// one conversation handle.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ConversationId(pub String);

impl ConversationId {
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// Derive the id for a caller-supplied conversation name.
    #[must_use]
    pub fn from_name(name: &str) -> Self {
        Self(Uuid::new_v5(&CONVERSATION_NAMESPACE, name.as_bytes()).to_string())
    }

    #[must_use]
    pub fn from_string(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for ConversationId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for ConversationId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

pub(crate) const DEFAULT_SYSTEM_PROMPT: &str = "You are a helpful AI assistant with access to various tools.

Guidelines:
- Be helpful, accurate, and concise
- Some tools need the user's confirmation before they run; explain what you are about to do
- When the user asks to schedule a task, use scheduleTask with either delayInSeconds or an RFC 3339 date; list tasks with getScheduledTasks and cancel them with cancelScheduledTask
- Provide clear explanations of what you're doing";

/// Configuration for the turn pipeline.
///
/// Deserializable with per-field defaults, so a partial JSON/TOML document
/// only needs to name the fields it overrides.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct ChatConfig {
    /// Maximum chained model steps (LLM round-trips) per turn
    pub max_steps: usize,
    /// Maximum tokens per model response
    pub max_tokens: u32,
    /// System prompt sent with every model request
    pub system_prompt: String,
    /// Retry configuration for transient model errors
    pub retry: RetryConfig,
    /// Tool names that require confirmation in addition to tools registered
    /// with [`ToolTier::Confirm`]
    pub confirmation_tools: Vec<String>,
    /// Capacity of the per-turn event channel
    pub event_buffer: usize,
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            max_steps: 10,
            max_tokens: 4096,
            system_prompt: DEFAULT_SYSTEM_PROMPT.to_string(),
            retry: RetryConfig::default(),
            confirmation_tools: Vec::new(),
            event_buffer: 100,
        }
    }
}

impl ChatConfig {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub const fn with_max_steps(mut self, max_steps: usize) -> Self {
        self.max_steps = max_steps;
        self
    }

    #[must_use]
    pub fn with_system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt = prompt.into();
        self
    }

    #[must_use]
    pub const fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    #[must_use]
    pub fn with_confirmation_tool(mut self, name: impl Into<String>) -> Self {
        self.confirmation_tools.push(name.into());
        self
    }
}

/// Configuration for retry behavior on transient errors.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Maximum number of retry attempts
    pub max_retries: u32,
    /// Base delay in milliseconds for exponential backoff
    pub base_delay_ms: u64,
    /// Maximum delay cap in milliseconds
    pub max_delay_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay_ms: 1000,
            max_delay_ms: 30_000,
        }
    }
}

impl RetryConfig {
    /// Create a retry config with no retries (for testing)
    #[must_use]
    pub const fn no_retry() -> Self {
        Self {
            max_retries: 0,
            base_delay_ms: 0,
            max_delay_ms: 0,
        }
    }

    /// Create a retry config with fast retries (for testing)
    #[must_use]
    pub const fn fast() -> Self {
        Self {
            max_retries: 3,
            base_delay_ms: 10,
            max_delay_ms: 100,
        }
    }
}

/// Token usage statistics
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    pub input_tokens: u32,
    pub output_tokens: u32,
}

impl TokenUsage {
    pub const fn add(&mut self, other: &Self) {
        self.input_tokens += other.input_tokens;
        self.output_tokens += other.output_tokens;
    }
}

/// Result of a tool execution
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ToolResult {
    /// Whether the tool execution succeeded
    pub success: bool,
    /// Output content (fed back to the model)
    pub output: String,
    /// Optional structured data; takes precedence over `output` when stored
    pub data: Option<serde_json::Value>,
    /// Duration of the tool execution in milliseconds
    pub duration_ms: Option<u64>,
}

impl ToolResult {
    #[must_use]
    pub fn success(output: impl Into<String>) -> Self {
        Self {
            success: true,
            output: output.into(),
            data: None,
            duration_ms: None,
        }
    }

    #[must_use]
    pub fn success_with_data(output: impl Into<String>, data: serde_json::Value) -> Self {
        Self {
            success: true,
            output: output.into(),
            data: Some(data),
            duration_ms: None,
        }
    }

    #[must_use]
    pub fn error(message: impl Into<String>) -> Self {
        Self {
            success: false,
            output: message.into(),
            data: None,
            duration_ms: None,
        }
    }

    #[must_use]
    pub const fn with_duration(mut self, duration_ms: u64) -> Self {
        self.duration_ms = Some(duration_ms);
        self
    }

    /// The payload attached to a tool invocation fragment.
    #[must_use]
    pub fn to_output(&self) -> serde_json::Value {
        self.data
            .clone()
            .unwrap_or_else(|| serde_json::Value::String(self.output.clone()))
    }
}

/// Permission tier for tools
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ToolTier {
    /// Runs automatically inside the turn
    Observe,
    /// Requires an explicit external decision before a result exists
    Confirm,
}

/// Status of a tool execution for idempotency tracking.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExecutionStatus {
    /// Execution started but not yet completed
    InFlight,
    /// Execution completed (success or failure)
    Completed,
}

/// Record of a tool execution for idempotency.
///
/// Intent is recorded before the tool runs and updated with the result after
/// completion, so a retried turn or a repeated approval reuses the stored
/// result instead of running the tool again.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ToolExecution {
    /// The tool call ID from the model (unique per invocation)
    pub tool_call_id: String,
    /// Conversation this execution belongs to
    pub conversation_id: ConversationId,
    pub tool_name: String,
    /// Input parameters (for verification)
    pub input: serde_json::Value,
    pub status: ExecutionStatus,
    /// Result if completed
    pub result: Option<ToolResult>,
    #[serde(with = "time::serde::rfc3339")]
    pub started_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339::option")]
    pub completed_at: Option<OffsetDateTime>,
}

impl ToolExecution {
    /// Create a new in-flight execution record.
    #[must_use]
    pub fn new_in_flight(
        tool_call_id: impl Into<String>,
        conversation_id: ConversationId,
        tool_name: impl Into<String>,
        input: serde_json::Value,
        started_at: OffsetDateTime,
    ) -> Self {
        Self {
            tool_call_id: tool_call_id.into(),
            conversation_id,
            tool_name: tool_name.into(),
            input,
            status: ExecutionStatus::InFlight,
            result: None,
            started_at,
            completed_at: None,
        }
    }

    /// Mark this execution as completed with a result.
    pub fn complete(&mut self, result: ToolResult) {
        self.status = ExecutionStatus::Completed;
        self.result = Some(result);
        self.completed_at = Some(OffsetDateTime::now_utc());
    }

    #[must_use]
    pub fn is_in_flight(&self) -> bool {
        self.status == ExecutionStatus::InFlight
    }

    #[must_use]
    pub fn is_completed(&self) -> bool {
        self.status == ExecutionStatus::Completed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn conversation_id_from_name_is_stable() {
        let a = ConversationId::from_name("support-42");
        let b = ConversationId::from_name("support-42");
        let c = ConversationId::from_name("support-43");

        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn chat_config_defaults() {
        let config = ChatConfig::default();
        assert_eq!(config.max_steps, 10);
        assert_eq!(config.event_buffer, 100);
        assert!(config.confirmation_tools.is_empty());
    }

    #[test]
    fn chat_config_partial_json_keeps_defaults() -> anyhow::Result<()> {
        let config: ChatConfig = serde_json::from_str(
            r#"{"max_steps": 3, "confirmation_tools": ["getWeatherInformation"]}"#,
        )?;

        assert_eq!(config.max_steps, 3);
        assert_eq!(config.max_tokens, 4096);
        assert_eq!(config.confirmation_tools, vec!["getWeatherInformation"]);
        assert_eq!(config.retry.max_retries, 3);
        Ok(())
    }

    #[test]
    fn tool_result_output_prefers_structured_data() {
        let plain = ToolResult::success("sunny");
        assert_eq!(plain.to_output(), serde_json::json!("sunny"));

        let structured = ToolResult::success_with_data("sunny", serde_json::json!({"temp": 21}));
        assert_eq!(structured.to_output(), serde_json::json!({"temp": 21}));
    }
}
