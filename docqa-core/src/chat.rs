//! Chat transcript with a single in-flight assistant reply.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::text::{detect_page_mention, normalize};

/// Content shown in the assistant slot until the first delta arrives.
pub const PLACEHOLDER: &str = "...";
/// End-of-reply marker some relays send as a standalone chunk.
pub const DONE_MARKER: &str = "[DONE]";
pub const GENERIC_FAILURE: &str = "Sorry, something went wrong while getting a reply.";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
}

impl Message {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum TurnError {
    #[error("message is empty")]
    EmptyInput,
    #[error("conversation thread is not initialized yet")]
    NoThread,
    #[error("a reply is still streaming")]
    ReplyInFlight,
}

#[derive(Debug)]
struct PendingReply {
    index: usize,
    raw: String,
    last_page: Option<usize>,
}

#[derive(Debug, Default)]
pub struct Conversation {
    thread_id: Option<String>,
    messages: Vec<Message>,
    pending: Option<PendingReply>,
}

impl Conversation {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn thread_id(&self) -> Option<&str> {
        self.thread_id.as_deref()
    }

    pub fn set_thread_id(&mut self, thread_id: impl Into<String>) {
        self.thread_id = Some(thread_id.into());
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn is_streaming(&self) -> bool {
        self.pending.is_some()
    }

    /// Appends the user turn and the assistant placeholder. Returns the messages to
    /// send to the relay, which end with the new user message.
    pub fn begin_turn(&mut self, input: &str) -> Result<Vec<Message>, TurnError> {
        if input.trim().is_empty() {
            return Err(TurnError::EmptyInput);
        }
        if self.thread_id.is_none() {
            return Err(TurnError::NoThread);
        }
        if self.pending.is_some() {
            return Err(TurnError::ReplyInFlight);
        }

        self.messages.push(Message::user(input));
        let outgoing = self.messages.clone();

        self.messages.push(Message::assistant(PLACEHOLDER));
        self.pending = Some(PendingReply {
            index: self.messages.len() - 1,
            raw: String::new(),
            last_page: None,
        });
        Ok(outgoing)
    }

    /// Adds a streamed chunk to the in-flight reply. Returns a page number when the
    /// first page mention of the reply so far differs from the last one reported.
    pub fn apply_delta(&mut self, delta: &str) -> Option<usize> {
        if delta == DONE_MARKER {
            self.finish();
            return None;
        }
        let pending = self.pending.as_mut()?;
        pending.raw.push_str(delta);

        if let Some(slot) = self.messages.get_mut(pending.index) {
            slot.content = normalize(&pending.raw);
        }

        let detected = detect_page_mention(&pending.raw);
        if detected.is_some() && detected != pending.last_page {
            pending.last_page = detected;
            return detected;
        }
        None
    }

    /// Closes the in-flight reply. A reply that never received text is dropped.
    pub fn finish(&mut self) {
        if let Some(pending) = self.pending.take() {
            if pending.raw.is_empty() && pending.index < self.messages.len() {
                self.messages.remove(pending.index);
            }
        }
    }

    /// Closes the in-flight reply after a transport failure. Partial text is kept.
    pub fn fail(&mut self, reason: &str) {
        if let Some(pending) = self.pending.take() {
            tracing::warn!(error = reason, "assistant reply failed");
            if pending.raw.is_empty() {
                if let Some(slot) = self.messages.get_mut(pending.index) {
                    slot.content = GENERIC_FAILURE.to_string();
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ready() -> Conversation {
        let mut conversation = Conversation::new();
        conversation.set_thread_id("thread_abc");
        conversation
    }

    #[test]
    fn begin_turn_rejects_blank_input_and_missing_thread() {
        let mut conversation = Conversation::new();
        assert_eq!(conversation.begin_turn("hello"), Err(TurnError::NoThread));

        let mut conversation = ready();
        assert_eq!(conversation.begin_turn("   "), Err(TurnError::EmptyInput));
        assert!(conversation.messages().is_empty());
    }

    #[test]
    fn begin_turn_adds_user_message_and_placeholder() {
        let mut conversation = ready();
        let outgoing = conversation.begin_turn("What is on page 3?").unwrap();

        assert_eq!(outgoing, vec![Message::user("What is on page 3?")]);
        assert_eq!(conversation.messages().len(), 2);
        assert_eq!(conversation.messages()[1], Message::assistant(PLACEHOLDER));
        assert!(conversation.is_streaming());
        assert_eq!(
            conversation.begin_turn("again"),
            Err(TurnError::ReplyInFlight)
        );
    }

    #[test]
    fn deltas_overwrite_placeholder_with_normalized_text() {
        let mut conversation = ready();
        conversation.begin_turn("Summarize").unwrap();

        assert_eq!(conversation.apply_delta("Hi"), None);
        assert_eq!(conversation.apply_delta(" there"), None);
        assert_eq!(conversation.messages()[1].content, "Hi there");

        conversation.apply_delta(":\n- one【1:0†source】");
        assert_eq!(conversation.messages()[1].content, "Hi there:\n\n- one");
    }

    #[test]
    fn page_mention_reported_only_when_it_changes() {
        let mut conversation = ready();
        conversation.begin_turn("Where is the budget?").unwrap();

        assert_eq!(conversation.apply_delta("See page 1"), Some(1));
        assert_eq!(conversation.apply_delta("2"), Some(12));
        assert_eq!(conversation.apply_delta(" and page 20."), None);
        assert_eq!(
            conversation.messages()[1].content,
            "See ==page 12== and ==page 20==."
        );
    }

    #[test]
    fn done_marker_closes_reply() {
        let mut conversation = ready();
        conversation.begin_turn("Hello").unwrap();
        conversation.apply_delta("Hi");
        assert_eq!(conversation.apply_delta(DONE_MARKER), None);
        assert!(!conversation.is_streaming());
        assert_eq!(conversation.messages()[1].content, "Hi");

        conversation.apply_delta("ignored");
        assert_eq!(conversation.messages()[1].content, "Hi");
    }

    #[test]
    fn empty_reply_is_dropped_on_finish() {
        let mut conversation = ready();
        conversation.begin_turn("Hello").unwrap();
        conversation.finish();
        assert_eq!(conversation.messages(), &[Message::user("Hello")]);
    }

    #[test]
    fn failure_shows_generic_error_only_without_text() {
        let mut conversation = ready();
        conversation.begin_turn("Hello").unwrap();
        conversation.fail("connection reset");
        assert_eq!(conversation.messages()[1].content, GENERIC_FAILURE);

        conversation.begin_turn("Again").unwrap();
        conversation.apply_delta("Partial");
        conversation.fail("connection reset");
        assert_eq!(conversation.messages()[3].content, "Partial");
    }

    #[test]
    fn roles_serialize_lowercase() {
        let json = serde_json::to_string(&Message::user("hi")).unwrap();
        assert_eq!(json, r#"{"role":"user","content":"hi"}"#);
    }
}
