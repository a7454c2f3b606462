//! Human handoff state, derived from the message log.
//!
//! There is no stored state machine: a conversation is waiting for a human
//! exactly when its latest message is a user message flagged
//! `waiting_for_human`. Marking sets the flag; a manual assistant reply moves
//! the tail back to an assistant message and clears the flag it answers.

use crate::error::ChatError;
use crate::message::{Role, UiMessage};
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HandoffState {
    Normal,
    WaitingForHuman,
}

impl HandoffState {
    #[must_use]
    pub fn of(messages: &[UiMessage]) -> Self {
        match messages.last() {
            Some(last) if last.role == Role::User && last.is_waiting_for_human() => {
                Self::WaitingForHuman
            }
            _ => Self::Normal,
        }
    }

    #[must_use]
    pub const fn is_waiting(self) -> bool {
        matches!(self, Self::WaitingForHuman)
    }
}

/// A user message an operator may need to answer.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PendingMessage {
    pub id: String,
    pub text: String,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    pub waiting_for_human: bool,
}

/// User messages not immediately followed by an assistant message, plus any
/// user message still flagged as waiting, in log order.
#[must_use]
pub fn pending_messages(messages: &[UiMessage]) -> Vec<PendingMessage> {
    messages
        .iter()
        .enumerate()
        .filter(|(_, message)| message.role == Role::User)
        .filter(|(index, message)| {
            let answered = messages
                .get(index + 1)
                .is_some_and(|next| next.role == Role::Assistant);
            !answered || message.is_waiting_for_human()
        })
        .map(|(_, message)| PendingMessage {
            id: message.id.clone(),
            text: message.text(),
            created_at: message.metadata.created_at,
            waiting_for_human: message.is_waiting_for_human(),
        })
        .collect()
}

/// Flag `message_id` as waiting for a human. Re-marking is a no-op.
///
/// # Errors
/// `NotFound` if the message is absent, `Validation` if it is not a user
/// message.
pub fn mark_waiting(messages: &mut [UiMessage], message_id: &str) -> Result<(), ChatError> {
    let message = messages
        .iter_mut()
        .find(|message| message.id == message_id)
        .ok_or_else(|| ChatError::message_not_found(message_id))?;

    if message.role != Role::User {
        return Err(ChatError::Validation(format!(
            "only user messages can wait for a human; {message_id} is an assistant message"
        )));
    }

    message.metadata.waiting_for_human = Some(true);
    Ok(())
}

/// Append an operator-authored assistant reply, clearing the waiting flag on
/// the message it answers.
///
/// Validation happens before `messages` is touched, so an error leaves it
/// unchanged.
///
/// # Errors
/// `NotFound` if `responding_to` names a message that does not exist.
pub fn apply_manual_reply(
    messages: &mut Vec<UiMessage>,
    reply: UiMessage,
    responding_to: Option<&str>,
) -> Result<(), ChatError> {
    if let Some(target_id) = responding_to {
        let target = messages
            .iter_mut()
            .find(|message| message.id == target_id)
            .ok_or_else(|| ChatError::message_not_found(target_id))?;
        if target.role == Role::User {
            target.metadata.waiting_for_human = Some(false);
        }
    }
    messages.push(reply);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn flagged(text: &str) -> UiMessage {
        let mut message = UiMessage::user(text);
        message.metadata.waiting_for_human = Some(true);
        message
    }

    #[test]
    fn empty_log_is_normal() {
        assert_eq!(HandoffState::of(&[]), HandoffState::Normal);
    }

    #[test]
    fn flagged_tail_is_waiting() {
        let messages = vec![UiMessage::user("hi"), UiMessage::assistant("hello"), flagged("agent please")];
        assert_eq!(HandoffState::of(&messages), HandoffState::WaitingForHuman);
        assert!(HandoffState::of(&messages).is_waiting());
    }

    #[test]
    fn flag_on_older_message_does_not_wait() {
        let messages = vec![flagged("old"), UiMessage::assistant("reply"), UiMessage::user("new")];
        assert_eq!(HandoffState::of(&messages), HandoffState::Normal);
    }

    #[test]
    fn mark_waiting_rejects_assistant_messages() {
        let mut messages = vec![UiMessage::user("hi"), UiMessage::assistant("hello")];
        let assistant_id = messages[1].id.clone();

        let err = mark_waiting(&mut messages, &assistant_id).unwrap_err();
        assert!(matches!(err, ChatError::Validation(_)));
        assert_eq!(messages[1].metadata.waiting_for_human, None);

        let err = mark_waiting(&mut messages, "missing").unwrap_err();
        assert!(matches!(err, ChatError::NotFound { .. }));
    }

    #[test]
    fn mark_then_manual_reply_round_trip() -> anyhow::Result<()> {
        let mut messages = vec![UiMessage::user("I need a person")];
        let user_id = messages[0].id.clone();

        mark_waiting(&mut messages, &user_id)?;
        mark_waiting(&mut messages, &user_id)?;
        assert_eq!(HandoffState::of(&messages), HandoffState::WaitingForHuman);

        apply_manual_reply(
            &mut messages,
            UiMessage::assistant("Hi, this is Ana from support."),
            Some(&user_id),
        )?;
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].metadata.waiting_for_human, Some(false));
        assert_eq!(HandoffState::of(&messages), HandoffState::Normal);
        Ok(())
    }

    #[test]
    fn manual_reply_to_unknown_message_leaves_log_unchanged() {
        let mut messages = vec![flagged("help")];
        let before = messages.clone();

        let err = apply_manual_reply(&mut messages, UiMessage::assistant("hi"), Some("nope"))
            .unwrap_err();
        assert!(matches!(err, ChatError::NotFound { kind: "Message", .. }));
        assert_eq!(messages, before);
    }

    #[test]
    fn pending_messages_lists_unanswered_and_flagged() {
        let mut answered_but_flagged = UiMessage::user("second");
        answered_but_flagged.metadata.waiting_for_human = Some(true);
        let messages = vec![
            UiMessage::user("first"),
            UiMessage::assistant("reply"),
            answered_but_flagged,
            UiMessage::assistant("auto reply"),
            UiMessage::user("third"),
            UiMessage::user("fourth"),
        ];

        let pending = pending_messages(&messages);
        let texts: Vec<_> = pending.iter().map(|p| p.text.as_str()).collect();
        assert_eq!(texts, vec!["second", "third", "fourth"]);
        assert!(pending[0].waiting_for_human);
        assert!(!pending[1].waiting_for_human);
    }
}
