//! Conversation messages as stored in the log and shown to clients.
//!
//! A [`UiMessage`] is immutable once appended except for two patches: the
//! `waiting_for_human` flag in its metadata, and attaching an output to one
//! of its [`ToolInvocation`] parts.

pub use crate::llm::Role;
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

/// Prefix of the synthetic user message injected when a scheduled task fires.
pub const SCHEDULED_TASK_PREFIX: &str = "Running scheduled task: ";

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UiMessage {
    pub id: String,
    pub role: Role,
    pub parts: Vec<MessagePart>,
    #[serde(default)]
    pub metadata: MessageMetadata,
}

impl UiMessage {
    #[must_use]
    pub fn user(text: impl Into<String>) -> Self {
        Self::with_parts(Role::User, vec![MessagePart::text(text)])
    }

    #[must_use]
    pub fn assistant(text: impl Into<String>) -> Self {
        Self::with_parts(Role::Assistant, vec![MessagePart::text(text)])
    }

    /// The synthetic user message for a fired scheduled task.
    #[must_use]
    pub fn scheduled_task(description: &str) -> Self {
        Self::user(format!("{SCHEDULED_TASK_PREFIX}{description}"))
    }

    #[must_use]
    pub fn with_parts(role: Role, parts: Vec<MessagePart>) -> Self {
        Self {
            id: new_message_id(),
            role,
            parts,
            metadata: MessageMetadata::default(),
        }
    }

    /// Concatenation of all text parts.
    #[must_use]
    pub fn text(&self) -> String {
        self.parts
            .iter()
            .filter_map(|part| match part {
                MessagePart::Text { text } => Some(text.as_str()),
                MessagePart::ToolInvocation(_) => None,
            })
            .collect()
    }

    pub fn tool_invocations(&self) -> impl Iterator<Item = &ToolInvocation> {
        self.parts.iter().filter_map(|part| match part {
            MessagePart::ToolInvocation(invocation) => Some(invocation),
            MessagePart::Text { .. } => None,
        })
    }

    #[must_use]
    pub fn tool_invocation(&self, tool_call_id: &str) -> Option<&ToolInvocation> {
        self.tool_invocations()
            .find(|invocation| invocation.tool_call_id == tool_call_id)
    }

    pub fn tool_invocation_mut(&mut self, tool_call_id: &str) -> Option<&mut ToolInvocation> {
        self.parts.iter_mut().find_map(|part| match part {
            MessagePart::ToolInvocation(invocation) if invocation.tool_call_id == tool_call_id => {
                Some(invocation)
            }
            _ => None,
        })
    }

    #[must_use]
    pub fn is_waiting_for_human(&self) -> bool {
        self.metadata.waiting_for_human == Some(true)
    }
}

/// Generate a fresh message id.
#[must_use]
pub fn new_message_id() -> String {
    uuid::Uuid::new_v4().simple().to_string()
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum MessagePart {
    Text { text: String },
    ToolInvocation(ToolInvocation),
}

impl MessagePart {
    #[must_use]
    pub fn text(text: impl Into<String>) -> Self {
        Self::Text { text: text.into() }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ToolInvocationState {
    InputAvailable,
    OutputAvailable,
}

/// A model-requested tool call and, once resolved, its output.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolInvocation {
    pub tool_call_id: String,
    pub tool_name: String,
    pub input: serde_json::Value,
    pub state: ToolInvocationState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub is_error: bool,
}

impl ToolInvocation {
    #[must_use]
    pub fn pending(
        tool_call_id: impl Into<String>,
        tool_name: impl Into<String>,
        input: serde_json::Value,
    ) -> Self {
        Self {
            tool_call_id: tool_call_id.into(),
            tool_name: tool_name.into(),
            input,
            state: ToolInvocationState::InputAvailable,
            output: None,
            is_error: false,
        }
    }

    #[must_use]
    pub fn is_resolved(&self) -> bool {
        self.state == ToolInvocationState::OutputAvailable
    }

    /// Attach an output, moving the call to `output-available`.
    pub fn resolve(&mut self, output: serde_json::Value, is_error: bool) {
        self.state = ToolInvocationState::OutputAvailable;
        self.output = Some(output);
        self.is_error = is_error;
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageMetadata {
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    /// Only ever set on user messages.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub waiting_for_human: Option<bool>,
}

impl Default for MessageMetadata {
    fn default() -> Self {
        Self {
            created_at: OffsetDateTime::now_utc(),
            waiting_for_human: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn scheduled_task_message_text() {
        let message = UiMessage::scheduled_task("send reminder");
        assert_eq!(message.role, Role::User);
        assert_eq!(message.text(), "Running scheduled task: send reminder");
    }

    #[test]
    fn text_joins_text_parts_only() {
        let message = UiMessage::with_parts(
            Role::Assistant,
            vec![
                MessagePart::text("Checking "),
                MessagePart::ToolInvocation(ToolInvocation::pending("c1", "getLocalTime", json!({}))),
                MessagePart::text("now."),
            ],
        );
        assert_eq!(message.text(), "Checking now.");
    }

    #[test]
    fn serializes_in_ui_shape() -> anyhow::Result<()> {
        let mut invocation = ToolInvocation::pending(
            "call_1",
            "getWeatherInformation",
            json!({"city": "Lima"}),
        );
        let message = UiMessage::with_parts(
            Role::Assistant,
            vec![MessagePart::ToolInvocation(invocation.clone())],
        );
        let value = serde_json::to_value(&message)?;
        let part = &value["parts"][0];
        assert_eq!(part["type"], "tool-invocation");
        assert_eq!(part["toolCallId"], "call_1");
        assert_eq!(part["state"], "input-available");
        assert!(part.get("output").is_none());
        assert!(value["metadata"].get("waitingForHuman").is_none());

        invocation.resolve(json!("sunny"), false);
        let part = serde_json::to_value(MessagePart::ToolInvocation(invocation))?;
        assert_eq!(part["state"], "output-available");
        assert_eq!(part["output"], "sunny");
        Ok(())
    }

    #[test]
    fn round_trips_through_json() -> anyhow::Result<()> {
        let mut message = UiMessage::user("hello");
        message.metadata.waiting_for_human = Some(true);
        let decoded: UiMessage = serde_json::from_str(&serde_json::to_string(&message)?)?;
        assert_eq!(decoded, message);
        assert!(decoded.is_waiting_for_human());
        Ok(())
    }
}
