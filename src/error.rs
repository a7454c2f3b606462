use thiserror::Error;

/// Errors surfaced by the conversation boundary operations.
///
/// Every variant is scoped to one conversation; none of them leave the
/// message log partially written.
#[derive(Error, Debug)]
pub enum ChatError {
    /// Input rejected before any store mutation.
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("{kind} not found: {id}")]
    NotFound { kind: &'static str, id: String },

    /// Persistence failure. The operation must be treated as not applied;
    /// appends and patches are safe to retry.
    #[error("Storage error: {0}")]
    Storage(#[from] anyhow::Error),

    /// A tool call cannot be resolved because it no longer exists or already
    /// carries a different result.
    #[error("Stale tool call {tool_call_id} in message {message_id}: {reason}")]
    StaleToolCall {
        message_id: String,
        tool_call_id: String,
        reason: String,
    },
}

impl ChatError {
    pub(crate) fn conversation_not_found(id: impl Into<String>) -> Self {
        Self::NotFound {
            kind: "Conversation",
            id: id.into(),
        }
    }

    pub(crate) fn message_not_found(id: impl Into<String>) -> Self {
        Self::NotFound {
            kind: "Message",
            id: id.into(),
        }
    }

    /// Whether retrying the same call may succeed.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::Storage(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display_messages() {
        let err = ChatError::Validation("message is required".into());
        assert_eq!(err.to_string(), "Validation error: message is required");

        let err = ChatError::message_not_found("msg_1");
        assert_eq!(err.to_string(), "Message not found: msg_1");

        let err = ChatError::StaleToolCall {
            message_id: "msg_1".into(),
            tool_call_id: "call_1".into(),
            reason: "already resolved with a different result".into(),
        };
        assert_eq!(
            err.to_string(),
            "Stale tool call call_1 in message msg_1: already resolved with a different result"
        );
    }

    #[test]
    fn only_storage_errors_are_retryable() {
        assert!(ChatError::Storage(anyhow::anyhow!("disk full")).is_retryable());
        assert!(!ChatError::conversation_not_found("c1").is_retryable());
    }
}
