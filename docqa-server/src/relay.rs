//! Request validation and reply streaming for `POST /chat`.

use std::convert::Infallible;

use anyhow::Result;
use bytes::Bytes;
use futures::stream::BoxStream;
use futures::{Stream, StreamExt};
use serde::Deserialize;
use serde_json::Value;
use tracing::{error, info, warn};

use crate::assistant::{RunEvent, ThreadId};
use crate::error::RelayError;

pub const MISSING_FIELDS: &str = "threadId and a non-empty messages array are required";
pub const BAD_LAST_MESSAGE: &str = "Last message must be from user with string content.";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidChat {
    pub thread: ThreadId,
    pub assistant_id: String,
    pub content: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ChatBody {
    #[serde(default)]
    thread_id: Option<Value>,
    #[serde(default)]
    messages: Option<Value>,
}

/// Validates a raw chat body. Checks run in a fixed order and none of them touch
/// the remote service.
pub fn validate(body: &[u8], assistant_id: Option<&str>) -> Result<ValidChat, RelayError> {
    let parsed: Option<ChatBody> = serde_json::from_slice(body).ok();
    let (thread, messages) = match parsed {
        Some(ChatBody {
            thread_id: Some(Value::String(thread)),
            messages: Some(Value::Array(messages)),
        }) if !thread.is_empty() && !messages.is_empty() => (thread, messages),
        _ => return Err(RelayError::BadRequest(MISSING_FIELDS)),
    };

    let assistant_id = match assistant_id {
        Some(id) if !id.is_empty() => id.to_string(),
        _ => return Err(RelayError::NotConfigured),
    };

    let last = messages.last().and_then(Value::as_object);
    let content = match last {
        Some(message)
            if message.get("role").and_then(Value::as_str) == Some("user") =>
        {
            match message.get("content") {
                Some(Value::String(content)) => content.clone(),
                _ => return Err(RelayError::BadRequest(BAD_LAST_MESSAGE)),
            }
        }
        _ => return Err(RelayError::BadRequest(BAD_LAST_MESSAGE)),
    };

    Ok(ValidChat {
        thread: ThreadId(thread),
        assistant_id,
        content,
    })
}

/// Turns run events into response body chunks. Text deltas pass through as they
/// arrive; a failed run or a broken stream ends the body with an `[ERROR]` line.
pub fn relay_stream(
    thread: ThreadId,
    mut events: BoxStream<'static, Result<RunEvent>>,
) -> impl Stream<Item = Result<Bytes, Infallible>> + Send + 'static {
    async_stream::stream! {
        let mut forwarded = 0usize;
        while let Some(event) = events.next().await {
            match event {
                Ok(RunEvent::MessageDelta(text)) => {
                    forwarded += text.len();
                    yield Ok(Bytes::from(text));
                }
                Ok(RunEvent::RequiresAction(details)) => {
                    warn!(%thread, ?details, "run requires action, nothing to forward");
                }
                Ok(RunEvent::Failed { message }) => {
                    let message = message.unwrap_or_else(|| "Unknown error".to_string());
                    error!(%thread, %message, "assistant run failed");
                    yield Ok(Bytes::from(format!("[ERROR] Run failed: {message}")));
                    break;
                }
                Ok(RunEvent::Completed) | Ok(RunEvent::Done) => break,
                Err(err) => {
                    error!(%thread, error = ?err, "assistant stream broke");
                    yield Ok(Bytes::from(format!("[ERROR] Server error occurred: {err:#}")));
                    break;
                }
            }
        }
        info!(%thread, bytes = forwarded, "reply relayed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::anyhow;
    use futures::stream;

    fn bad_request(err: RelayError) -> &'static str {
        match err {
            RelayError::BadRequest(message) => message,
            other => panic!("expected bad request, got {other:?}"),
        }
    }

    #[test]
    fn missing_thread_or_messages_is_rejected_first() {
        for body in [
            &b"not json"[..],
            br#"{"messages":[{"role":"user","content":"hi"}]}"#,
            br#"{"threadId":"","messages":[{"role":"user","content":"hi"}]}"#,
            br#"{"threadId":42,"messages":[{"role":"user","content":"hi"}]}"#,
            br#"{"threadId":"t","messages":[]}"#,
            br#"{"threadId":"t","messages":"hi"}"#,
        ] {
            assert_eq!(bad_request(validate(body, None).unwrap_err()), MISSING_FIELDS);
        }
    }

    #[test]
    fn missing_assistant_is_checked_before_message_shape() {
        let body = br#"{"threadId":"t","messages":[{"role":"assistant","content":"x"}]}"#;
        assert!(matches!(validate(body, None), Err(RelayError::NotConfigured)));
        assert!(matches!(validate(body, Some("")), Err(RelayError::NotConfigured)));
        assert_eq!(
            bad_request(validate(body, Some("asst_1")).unwrap_err()),
            BAD_LAST_MESSAGE
        );
    }

    #[test]
    fn last_message_needs_string_content() {
        let body = br#"{"threadId":"t","messages":[{"role":"user","content":["x"]}]}"#;
        assert_eq!(
            bad_request(validate(body, Some("asst_1")).unwrap_err()),
            BAD_LAST_MESSAGE
        );
    }

    #[test]
    fn valid_body_yields_last_user_text() {
        let body = br#"{"threadId":"thread_9","messages":[
            {"role":"user","content":"first"},
            {"role":"assistant","content":"reply"},
            {"role":"user","content":"what is on page 3?"}]}"#;
        let chat = validate(body, Some("asst_1")).unwrap();
        assert_eq!(chat.thread, ThreadId("thread_9".into()));
        assert_eq!(chat.assistant_id, "asst_1");
        assert_eq!(chat.content, "what is on page 3?");
    }

    async fn collect(events: Vec<Result<RunEvent>>) -> String {
        let chunks: Vec<_> = relay_stream(ThreadId("t".into()), stream::iter(events).boxed())
            .collect()
            .await;
        chunks
            .into_iter()
            .map(|chunk| String::from_utf8(chunk.unwrap().to_vec()).unwrap())
            .collect()
    }

    #[tokio::test]
    async fn deltas_are_forwarded_until_completion() {
        let body = collect(vec![
            Ok(RunEvent::MessageDelta("Hi".into())),
            Ok(RunEvent::RequiresAction(Value::Null)),
            Ok(RunEvent::MessageDelta(" there".into())),
            Ok(RunEvent::Completed),
            Ok(RunEvent::MessageDelta("ignored".into())),
        ])
        .await;
        assert_eq!(body, "Hi there");
    }

    #[tokio::test]
    async fn failed_run_ends_with_error_line() {
        let body = collect(vec![
            Ok(RunEvent::MessageDelta("Partial".into())),
            Ok(RunEvent::Failed { message: None }),
            Ok(RunEvent::MessageDelta("late".into())),
        ])
        .await;
        assert_eq!(body, "Partial[ERROR] Run failed: Unknown error");
    }

    #[tokio::test]
    async fn stream_error_is_reported_inline() {
        let body = collect(vec![
            Ok(RunEvent::MessageDelta("A".into())),
            Err(anyhow!("connection reset")),
        ])
        .await;
        assert_eq!(body, "A[ERROR] Server error occurred: connection reset");
    }
}
