//! HTTP client for the chat relay.

use std::time::Duration;

use anyhow::{anyhow, bail, Context, Result};
use docqa_core::Message;
use futures::StreamExt;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::debug;
use url::Url;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
const INIT_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Clone)]
pub struct RelayClient {
    http: Client,
    base: Url,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ChatRequest<'a> {
    thread_id: &'a str,
    messages: &'a [Message],
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct InitResponse {
    thread_id: String,
}

#[derive(Deserialize)]
struct ErrorBody {
    error: String,
}

impl RelayClient {
    pub fn new(base: Url) -> Result<Self> {
        let http = Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .build()
            .context("failed to build relay HTTP client")?;
        Ok(Self { http, base })
    }

    fn endpoint(&self, path: &str) -> Result<Url> {
        self.base
            .join(path)
            .with_context(|| format!("invalid relay endpoint {path}"))
    }

    /// Creates a fresh conversation thread on the relay.
    pub async fn init_thread(&self) -> Result<String> {
        let response = self
            .http
            .post(self.endpoint("init")?)
            .timeout(INIT_TIMEOUT)
            .send()
            .await
            .context("failed to reach the chat relay")?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            bail!("thread init failed ({status}): {}", error_message(&body));
        }
        let body: InitResponse = response
            .json()
            .await
            .context("malformed thread init response")?;
        debug!(thread = %body.thread_id, "thread ready");
        Ok(body.thread_id)
    }

    /// Posts the conversation and hands every decoded text chunk to `on_text` as it
    /// arrives. Stops early when `on_text` returns false.
    pub async fn stream_chat<F>(&self, thread_id: &str, messages: &[Message], mut on_text: F) -> Result<()>
    where
        F: FnMut(String) -> bool,
    {
        let response = self
            .http
            .post(self.endpoint("chat")?)
            .json(&ChatRequest {
                thread_id,
                messages,
            })
            .send()
            .await
            .context("failed to reach the chat relay")?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(anyhow!("chat relay answered {status}: {}", error_message(&body)));
        }

        let mut decoder = Utf8Chunks::default();
        let mut body = response.bytes_stream();
        while let Some(chunk) = body.next().await {
            let chunk = chunk.context("chat stream interrupted")?;
            let text = decoder.push(&chunk);
            if !text.is_empty() && !on_text(text) {
                return Ok(());
            }
        }
        let rest = decoder.finish();
        if !rest.is_empty() {
            on_text(rest);
        }
        Ok(())
    }
}

fn error_message(body: &str) -> String {
    match serde_json::from_str::<ErrorBody>(body) {
        Ok(parsed) => parsed.error,
        Err(_) => body.trim().to_string(),
    }
}

/// Decodes UTF-8 across chunk boundaries, holding back an incomplete trailing sequence.
#[derive(Debug, Default)]
pub struct Utf8Chunks {
    tail: Vec<u8>,
}

impl Utf8Chunks {
    pub fn push(&mut self, chunk: &[u8]) -> String {
        self.tail.extend_from_slice(chunk);
        let mut out = String::new();
        loop {
            match std::str::from_utf8(&self.tail) {
                Ok(text) => {
                    out.push_str(text);
                    self.tail.clear();
                    return out;
                }
                Err(err) => {
                    let valid = err.valid_up_to();
                    out.push_str(&String::from_utf8_lossy(&self.tail[..valid]));
                    match err.error_len() {
                        // Incomplete sequence at the end: wait for more bytes.
                        None => {
                            self.tail.drain(..valid);
                            return out;
                        }
                        Some(len) => {
                            out.push(char::REPLACEMENT_CHARACTER);
                            self.tail.drain(..valid + len);
                        }
                    }
                }
            }
        }
    }

    pub fn finish(&mut self) -> String {
        let rest = String::from_utf8_lossy(&self.tail).into_owned();
        self.tail.clear();
        rest
    }
}
