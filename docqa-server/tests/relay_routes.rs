use std::sync::{Arc, Mutex};

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use axum::body::{to_bytes, Body};
use axum::http::{header, Request, StatusCode};
use docqa_server::{router, AppState, AssistantApi, RunEvent, ThreadId};
use futures::stream::{self, BoxStream, StreamExt};
use serde_json::{json, Value};
use tower::ServiceExt;

#[derive(Default)]
struct StubAssistant {
    calls: Mutex<Vec<String>>,
    fail_thread: bool,
    fail_run: bool,
    events: Vec<Result<RunEvent, String>>,
}

impl StubAssistant {
    fn with_events(events: Vec<Result<RunEvent, String>>) -> Self {
        Self {
            events,
            ..Self::default()
        }
    }

    fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl AssistantApi for StubAssistant {
    async fn create_thread(&self) -> Result<ThreadId> {
        self.calls.lock().unwrap().push("create_thread".into());
        if self.fail_thread {
            return Err(anyhow!("upstream unavailable"));
        }
        Ok(ThreadId("thread_abc".into()))
    }

    async fn add_user_message(&self, thread: &ThreadId, content: &str) -> Result<()> {
        self.calls
            .lock()
            .unwrap()
            .push(format!("add_user_message {thread} {content}"));
        Ok(())
    }

    async fn stream_run(
        &self,
        thread: &ThreadId,
        assistant_id: &str,
    ) -> Result<BoxStream<'static, Result<RunEvent>>> {
        self.calls
            .lock()
            .unwrap()
            .push(format!("stream_run {thread} {assistant_id}"));
        if self.fail_run {
            return Err(anyhow!("run rejected"));
        }
        let events: Vec<Result<RunEvent>> = self
            .events
            .iter()
            .cloned()
            .map(|event| event.map_err(|message| anyhow!(message)))
            .collect();
        Ok(stream::iter(events).boxed())
    }
}

fn app(stub: Arc<StubAssistant>, assistant_id: Option<&str>) -> axum::Router {
    router(AppState::new(stub, assistant_id.map(str::to_string)))
}

fn chat_request(body: Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri("/chat")
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

fn user_turn(content: &str) -> Value {
    json!({
        "threadId": "thread_abc",
        "messages": [{ "role": "user", "content": content }]
    })
}

async fn body_text(response: axum::response::Response) -> String {
    let bytes = to_bytes(response.into_body(), 16 * 1024 * 1024).await.unwrap();
    String::from_utf8(bytes.to_vec()).unwrap()
}

#[tokio::test]
async fn healthz_is_ok() {
    let response = app(Arc::new(StubAssistant::default()), None)
        .oneshot(Request::builder().uri("/healthz").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn init_returns_new_thread_id() {
    let stub = Arc::new(StubAssistant::default());
    let response = app(stub.clone(), Some("asst_1"))
        .oneshot(Request::builder().method("POST").uri("/init").body(Body::empty()).unwrap())
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body: Value = serde_json::from_str(&body_text(response).await).unwrap();
    assert_eq!(body, json!({ "threadId": "thread_abc" }));
    assert_eq!(stub.calls(), vec!["create_thread"]);
}

#[tokio::test]
async fn init_failure_is_a_json_500() {
    let stub = Arc::new(StubAssistant {
        fail_thread: true,
        ..StubAssistant::default()
    });
    let response = app(stub, Some("asst_1"))
        .oneshot(Request::builder().method("POST").uri("/init").body(Body::empty()).unwrap())
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    let body: Value = serde_json::from_str(&body_text(response).await).unwrap();
    assert_eq!(body["error"], "upstream unavailable");
}

#[tokio::test]
async fn malformed_bodies_are_rejected_without_remote_calls() {
    let stub = Arc::new(StubAssistant::default());
    for body in [
        json!({ "messages": [{ "role": "user", "content": "hi" }] }),
        json!({ "threadId": "thread_abc", "messages": [] }),
        json!({ "threadId": "thread_abc" }),
    ] {
        let response = app(stub.clone(), Some("asst_1"))
            .oneshot(chat_request(body))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let body: Value = serde_json::from_str(&body_text(response).await).unwrap();
        assert_eq!(
            body["error"],
            "threadId and a non-empty messages array are required"
        );
    }

    let response = app(stub.clone(), Some("asst_1"))
        .oneshot(chat_request(json!({
            "threadId": "thread_abc",
            "messages": [{ "role": "assistant", "content": "hello" }]
        })))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body: Value = serde_json::from_str(&body_text(response).await).unwrap();
    assert_eq!(
        body["error"],
        "Last message must be from user with string content."
    );

    assert!(stub.calls().is_empty());
}

#[tokio::test]
async fn missing_assistant_id_is_a_500() {
    let stub = Arc::new(StubAssistant::default());
    let response = app(stub.clone(), None)
        .oneshot(chat_request(user_turn("hi")))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    let body: Value = serde_json::from_str(&body_text(response).await).unwrap();
    assert_eq!(body["error"], "Assistant ID not configured on server.");
    assert!(stub.calls().is_empty());
}

#[tokio::test]
async fn deltas_are_streamed_as_plain_text() {
    let stub = Arc::new(StubAssistant::with_events(vec![
        Ok(RunEvent::MessageDelta("Hi".into())),
        Ok(RunEvent::MessageDelta(" there".into())),
        Ok(RunEvent::Completed),
    ]));
    let response = app(stub.clone(), Some("asst_1"))
        .oneshot(chat_request(user_turn("hello")))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.headers()[header::CONTENT_TYPE],
        "text/plain; charset=utf-8"
    );
    assert_eq!(response.headers()[header::CACHE_CONTROL], "no-cache");
    assert_eq!(body_text(response).await, "Hi there");
    assert_eq!(
        stub.calls(),
        vec![
            "add_user_message thread_abc hello",
            "stream_run thread_abc asst_1"
        ]
    );
}

#[tokio::test]
async fn failed_run_appends_error_line() {
    let stub = Arc::new(StubAssistant::with_events(vec![
        Ok(RunEvent::MessageDelta("See page".into())),
        Ok(RunEvent::Failed {
            message: Some("rate limited".into()),
        }),
    ]));
    let response = app(stub, Some("asst_1"))
        .oneshot(chat_request(user_turn("hello")))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        body_text(response).await,
        "See page[ERROR] Run failed: rate limited"
    );
}

#[tokio::test]
async fn failed_run_without_reason_says_unknown() {
    let stub = Arc::new(StubAssistant::with_events(vec![Ok(RunEvent::Failed {
        message: None,
    })]));
    let response = app(stub, Some("asst_1"))
        .oneshot(chat_request(user_turn("hello")))
        .await
        .unwrap();
    assert_eq!(body_text(response).await, "[ERROR] Run failed: Unknown error");
}

#[tokio::test]
async fn broken_stream_is_reported_inline() {
    let stub = Arc::new(StubAssistant::with_events(vec![
        Ok(RunEvent::MessageDelta("Partial".into())),
        Err("socket closed".into()),
        Ok(RunEvent::MessageDelta("never sent".into())),
    ]));
    let response = app(stub, Some("asst_1"))
        .oneshot(chat_request(user_turn("hello")))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        body_text(response).await,
        "Partial[ERROR] Server error occurred: socket closed"
    );
}

#[tokio::test]
async fn setup_failure_is_a_plain_500() {
    let stub = Arc::new(StubAssistant {
        fail_run: true,
        ..StubAssistant::default()
    });
    let response = app(stub, Some("asst_1"))
        .oneshot(chat_request(user_turn("hello")))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body_text(response).await, "Server error during streaming setup");
}
