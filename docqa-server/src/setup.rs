//! One-off provisioning of the hosted assistant and a check of an existing one.

use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use anyhow::{bail, Context, Result};
use reqwest::multipart::{Form, Part};
use serde::Deserialize;
use serde_json::json;
use tracing::{debug, info};

use crate::assistant::OpenAiAssistants;

#[derive(Debug, Clone)]
pub struct SetupOptions {
    pub file: PathBuf,
    pub name: String,
    pub store_name: String,
    pub model: String,
    pub instructions: String,
    pub poll_interval: Duration,
    pub poll_timeout: Duration,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SetupReport {
    pub file_id: String,
    pub vector_store_id: String,
    pub file_status: String,
    pub assistant_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerifyReport {
    pub assistant_id: String,
    pub name: Option<String>,
    pub file_search_enabled: bool,
    pub vector_store_ids: Vec<String>,
}

impl VerifyReport {
    pub fn warnings(&self) -> Vec<&'static str> {
        let mut warnings = Vec::new();
        if !self.file_search_enabled {
            warnings.push("file search is not enabled on this assistant");
        }
        if self.vector_store_ids.is_empty() {
            warnings.push("no vector store is linked to this assistant");
        }
        warnings
    }
}

#[derive(Deserialize)]
struct Object {
    id: String,
}

#[derive(Deserialize)]
struct VectorStoreFile {
    id: String,
    status: String,
    #[serde(default)]
    last_error: Option<ObjectError>,
}

#[derive(Deserialize)]
struct ObjectError {
    #[serde(default)]
    message: Option<String>,
}

#[derive(Deserialize)]
struct Assistant {
    id: String,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    tools: Vec<Tool>,
    #[serde(default)]
    tool_resources: Option<ToolResources>,
}

#[derive(Deserialize)]
struct Tool {
    #[serde(rename = "type")]
    kind: String,
}

#[derive(Deserialize)]
struct ToolResources {
    #[serde(default)]
    file_search: Option<FileSearchResources>,
}

#[derive(Deserialize)]
struct FileSearchResources {
    #[serde(default)]
    vector_store_ids: Vec<String>,
}

/// Uploads the document, indexes it in a fresh vector store and creates an
/// assistant searching that store. Every run creates new remote objects.
pub async fn run_setup(api: &OpenAiAssistants, options: &SetupOptions) -> Result<SetupReport> {
    let file_id = upload_file(api, &options.file).await?;
    info!(%file_id, "document uploaded");

    let store: Object = api
        .send_json("vector store creation", || {
            Ok(api
                .client()
                .post(api.url("vector_stores"))
                .json(&json!({ "name": options.store_name })))
        })
        .await?;
    info!(vector_store = %store.id, "vector store created");

    let file_status = attach_and_poll(api, &store.id, &file_id, options).await?;
    info!(status = %file_status, "document indexed");

    let assistant: Object = api
        .send_json("assistant creation", || {
            Ok(api.client().post(api.url("assistants")).json(&json!({
                "name": options.name,
                "instructions": options.instructions,
                "model": options.model,
                "tools": [{ "type": "file_search" }],
                "tool_resources": {
                    "file_search": { "vector_store_ids": [store.id] }
                }
            })))
        })
        .await?;
    info!(assistant = %assistant.id, "assistant created");

    Ok(SetupReport {
        file_id,
        vector_store_id: store.id,
        file_status,
        assistant_id: assistant.id,
    })
}

pub async fn verify(api: &OpenAiAssistants, assistant_id: &str) -> Result<VerifyReport> {
    let assistant: Assistant = api
        .send_json("assistant lookup", || {
            Ok(api
                .client()
                .get(api.url(&format!("assistants/{assistant_id}"))))
        })
        .await?;

    let file_search_enabled = assistant.tools.iter().any(|tool| tool.kind == "file_search");
    let vector_store_ids = assistant
        .tool_resources
        .and_then(|resources| resources.file_search)
        .map(|search| search.vector_store_ids)
        .unwrap_or_default();

    Ok(VerifyReport {
        assistant_id: assistant.id,
        name: assistant.name,
        file_search_enabled,
        vector_store_ids,
    })
}

async fn upload_file(api: &OpenAiAssistants, path: &Path) -> Result<String> {
    let bytes = tokio::fs::read(path)
        .await
        .with_context(|| format!("failed to read {}", path.display()))?;
    let file_name = path
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| "document.pdf".to_string());
    debug!(file = %file_name, size = bytes.len(), "uploading document");

    let uploaded: Object = api
        .send_json("file upload", || {
            let part = Part::bytes(bytes.clone())
                .file_name(file_name.clone())
                .mime_str("application/pdf")
                .context("invalid upload mime type")?;
            let form = Form::new().text("purpose", "assistants").part("file", part);
            Ok(api.client().post(api.url("files")).multipart(form))
        })
        .await?;
    Ok(uploaded.id)
}

async fn attach_and_poll(
    api: &OpenAiAssistants,
    store_id: &str,
    file_id: &str,
    options: &SetupOptions,
) -> Result<String> {
    let mut file: VectorStoreFile = api
        .send_json("vector store file attach", || {
            Ok(api
                .client()
                .post(api.url(&format!("vector_stores/{store_id}/files")))
                .json(&json!({ "file_id": file_id })))
        })
        .await?;

    let started = Instant::now();
    while file.status == "in_progress" {
        if started.elapsed() > options.poll_timeout {
            bail!(
                "vector store file {} still processing after {:?}",
                file.id,
                options.poll_timeout
            );
        }
        tokio::time::sleep(options.poll_interval).await;
        file = api
            .send_json("vector store file status", || {
                Ok(api
                    .client()
                    .get(api.url(&format!("vector_stores/{store_id}/files/{file_id}"))))
            })
            .await?;
        debug!(status = %file.status, "vector store file polled");
    }

    if file.status == "completed" {
        return Ok(file.status);
    }
    let reason = file
        .last_error
        .and_then(|err| err.message)
        .unwrap_or_else(|| "no reason given".to_string());
    bail!("indexing of file {file_id} ended as {}: {reason}", file.status)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn warnings_name_missing_pieces() {
        let mut report = VerifyReport {
            assistant_id: "asst_1".into(),
            name: None,
            file_search_enabled: true,
            vector_store_ids: vec!["vs_1".into()],
        };
        assert!(report.warnings().is_empty());

        report.file_search_enabled = false;
        report.vector_store_ids.clear();
        assert_eq!(report.warnings().len(), 2);
    }
}
