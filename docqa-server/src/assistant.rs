//! Client for the hosted assistants API (threads, messages, streamed runs).

use std::fmt;
use std::time::Duration;

use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use eventsource_stream::{Event, Eventsource};
use futures::stream::BoxStream;
use futures::StreamExt;
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, AUTHORIZATION};
use reqwest::{Client, RequestBuilder, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{debug, trace, warn};

const BETA_HEADER: &str = "OpenAI-Beta";
const BETA_VALUE: &str = "assistants=v2";

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ThreadId(pub String);

impl fmt::Display for ThreadId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Streamed run events the relay cares about.
#[derive(Debug, Clone, PartialEq)]
pub enum RunEvent {
    MessageDelta(String),
    RequiresAction(Value),
    Failed { message: Option<String> },
    Completed,
    Done,
}

#[async_trait]
pub trait AssistantApi: Send + Sync {
    async fn create_thread(&self) -> Result<ThreadId>;

    async fn add_user_message(&self, thread: &ThreadId, content: &str) -> Result<()>;

    /// Starts a run of `assistant_id` on the thread. The request is sent before this
    /// returns, so connection and status errors surface here rather than in the stream.
    async fn stream_run(
        &self,
        thread: &ThreadId,
        assistant_id: &str,
    ) -> Result<BoxStream<'static, Result<RunEvent>>>;
}

#[derive(Debug, Clone)]
pub struct OpenAiConfig {
    pub api_key: String,
    pub base_url: String,
    pub timeout: Duration,
    pub max_retries: usize,
    pub retry_base: Duration,
}

/// Assistants API client over an OpenAI-compatible base URL.
#[derive(Clone)]
pub struct OpenAiAssistants {
    client: Client,
    base_url: String,
    timeout: Duration,
    max_retries: usize,
    retry_base: Duration,
}

impl OpenAiAssistants {
    pub fn new(config: OpenAiConfig) -> Result<Self> {
        anyhow::ensure!(!config.api_key.trim().is_empty(), "missing OpenAI API key");
        let mut headers = HeaderMap::new();
        let auth = format!("Bearer {}", config.api_key.trim());
        headers.insert(
            AUTHORIZATION,
            HeaderValue::from_str(&auth).context("invalid OpenAI API key")?,
        );
        headers.insert(BETA_HEADER, HeaderValue::from_static(BETA_VALUE));
        // No client-wide timeout: a streamed run stays open for as long as it produces text.
        let client = Client::builder()
            .connect_timeout(config.timeout)
            .default_headers(headers)
            .build()
            .context("failed to build OpenAI HTTP client")?;
        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            timeout: config.timeout,
            max_retries: config.max_retries.max(1),
            retry_base: config.retry_base,
        })
    }

    pub(crate) fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }

    pub(crate) fn client(&self) -> &Client {
        &self.client
    }

    /// Sends a request built by `build`, retrying rate limits, server errors and
    /// transport failures, and decodes the JSON response.
    pub(crate) async fn send_json<T, F>(&self, what: &str, build: F) -> Result<T>
    where
        T: DeserializeOwned,
        F: Fn() -> Result<RequestBuilder>,
    {
        let mut attempt = 0usize;
        loop {
            let response = build()?.timeout(self.timeout).send().await;
            match response {
                Ok(resp) => {
                    let status = resp.status();
                    if status.is_success() {
                        return resp
                            .json::<T>()
                            .await
                            .with_context(|| format!("failed to parse {what} response"));
                    }
                    let body = resp
                        .text()
                        .await
                        .unwrap_or_else(|_| "<body unavailable>".to_string());
                    if should_retry(status) && attempt + 1 < self.max_retries {
                        attempt += 1;
                        warn!(%status, attempt, "{what} failed, retrying");
                        tokio::time::sleep(self.retry_backoff(attempt)).await;
                        continue;
                    }
                    bail!("{what} failed ({status}): {body}");
                }
                Err(err) => {
                    if is_retryable_error(&err) && attempt + 1 < self.max_retries {
                        attempt += 1;
                        warn!(error = %err, attempt, "{what} failed, retrying");
                        tokio::time::sleep(self.retry_backoff(attempt)).await;
                        continue;
                    }
                    return Err(anyhow!(err).context(format!("{what} failed")));
                }
            }
        }
    }

    fn retry_backoff(&self, attempt: usize) -> Duration {
        let capped = attempt.min(5) as u32;
        self.retry_base * (1 << capped)
    }
}

#[derive(Deserialize)]
struct Created {
    id: String,
}

#[async_trait]
impl AssistantApi for OpenAiAssistants {
    async fn create_thread(&self) -> Result<ThreadId> {
        let url = self.url("threads");
        let created: Created = self
            .send_json("thread creation", || Ok(self.client.post(&url).json(&json!({}))))
            .await?;
        debug!(thread = %created.id, "thread created");
        Ok(ThreadId(created.id))
    }

    async fn add_user_message(&self, thread: &ThreadId, content: &str) -> Result<()> {
        let url = self.url(&format!("threads/{thread}/messages"));
        let body = json!({ "role": "user", "content": content });
        let _: Value = self
            .send_json("message append", || Ok(self.client.post(&url).json(&body)))
            .await?;
        Ok(())
    }

    async fn stream_run(
        &self,
        thread: &ThreadId,
        assistant_id: &str,
    ) -> Result<BoxStream<'static, Result<RunEvent>>> {
        let url = self.url(&format!("threads/{thread}/runs"));
        let response = self
            .client
            .post(&url)
            .header(ACCEPT, "text/event-stream")
            .json(&json!({ "assistant_id": assistant_id, "stream": true }))
            .send()
            .await
            .context("failed to start run")?;

        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "<body unavailable>".to_string());
            bail!("run creation failed ({status}): {body}");
        }

        let mut sse = Box::pin(response.bytes_stream().eventsource());
        let events = async_stream::try_stream! {
            while let Some(event) = sse.next().await {
                let event = event.context("run stream interrupted")?;
                if let Some(run_event) = parse_run_event(&event)? {
                    yield run_event;
                }
            }
        };
        Ok(events.boxed())
    }
}

#[derive(Deserialize)]
struct MessageDelta {
    delta: DeltaBody,
}

#[derive(Deserialize)]
struct DeltaBody {
    #[serde(default)]
    content: Vec<DeltaContent>,
}

#[derive(Deserialize)]
struct DeltaContent {
    #[serde(default)]
    text: Option<DeltaText>,
}

#[derive(Deserialize)]
struct DeltaText {
    #[serde(default)]
    value: Option<String>,
}

#[derive(Deserialize)]
struct FailedRun {
    #[serde(default)]
    last_error: Option<RunError>,
}

#[derive(Deserialize)]
struct RunError {
    #[serde(default)]
    message: Option<String>,
}

/// Maps one SSE event to a run event. Events the relay ignores yield `None`.
pub fn parse_run_event(event: &Event) -> Result<Option<RunEvent>> {
    if event.data.trim() == "[DONE]" {
        return Ok(Some(RunEvent::Done));
    }
    let parsed = match event.event.as_str() {
        "thread.message.delta" => {
            let delta: MessageDelta = serde_json::from_str(&event.data)
                .context("malformed thread.message.delta event")?;
            let text: String = delta
                .delta
                .content
                .into_iter()
                .filter_map(|part| part.text.and_then(|text| text.value))
                .collect();
            (!text.is_empty()).then_some(RunEvent::MessageDelta(text))
        }
        "thread.run.requires_action" => {
            let data = serde_json::from_str(&event.data).unwrap_or(Value::Null);
            Some(RunEvent::RequiresAction(data))
        }
        "thread.run.failed" => {
            let failed: FailedRun = serde_json::from_str(&event.data).unwrap_or(FailedRun {
                last_error: None,
            });
            let message = failed
                .last_error
                .and_then(|err| err.message)
                .filter(|message| !message.is_empty());
            Some(RunEvent::Failed { message })
        }
        "thread.run.completed" => Some(RunEvent::Completed),
        "done" => Some(RunEvent::Done),
        "error" => bail!("assistant stream error: {}", event.data),
        other => {
            trace!(event = other, "ignoring run event");
            None
        }
    };
    Ok(parsed)
}

fn should_retry(status: StatusCode) -> bool {
    status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error()
}

fn is_retryable_error(err: &reqwest::Error) -> bool {
    err.is_timeout() || err.is_connect() || err.is_request()
}
