use std::sync::Arc;

use axum::body::{Body, Bytes};
use axum::extract::State;
use axum::http::header::{CACHE_CONTROL, CONTENT_TYPE};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Serialize;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{debug, info};

use crate::assistant::AssistantApi;
use crate::error::RelayError;
use crate::relay::{relay_stream, validate};

#[derive(Clone)]
pub struct AppState {
    pub api: Arc<dyn AssistantApi>,
    pub assistant_id: Option<Arc<str>>,
}

impl AppState {
    pub fn new(api: Arc<dyn AssistantApi>, assistant_id: Option<String>) -> Self {
        Self {
            api,
            assistant_id: assistant_id
                .filter(|id| !id.trim().is_empty())
                .map(|id| Arc::from(id.trim())),
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InitResponse {
    pub thread_id: String,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/init", post(init_thread))
        .route("/chat", post(chat))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

async fn healthz() -> StatusCode {
    StatusCode::OK
}

async fn init_thread(State(state): State<AppState>) -> Result<Json<InitResponse>, RelayError> {
    let thread = state
        .api
        .create_thread()
        .await
        .map_err(RelayError::ThreadInit)?;
    info!(%thread, "thread initialised");
    Ok(Json(InitResponse { thread_id: thread.0 }))
}

async fn chat(State(state): State<AppState>, body: Bytes) -> Result<Response, RelayError> {
    let chat = validate(&body, state.assistant_id.as_deref())?;
    debug!(thread = %chat.thread, chars = chat.content.chars().count(), "relaying chat turn");

    state
        .api
        .add_user_message(&chat.thread, &chat.content)
        .await
        .map_err(RelayError::StreamSetup)?;
    let events = state
        .api
        .stream_run(&chat.thread, &chat.assistant_id)
        .await
        .map_err(RelayError::StreamSetup)?;

    let body = Body::from_stream(relay_stream(chat.thread, events));
    Ok((
        [
            (CONTENT_TYPE, "text/plain; charset=utf-8"),
            (CACHE_CONTROL, "no-cache"),
        ],
        body,
    )
        .into_response())
}
