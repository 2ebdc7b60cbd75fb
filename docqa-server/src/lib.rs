//! HTTP relay between the document viewer and a hosted assistant.

pub mod assistant;
pub mod config;
pub mod error;
pub mod logging;
pub mod relay;
pub mod routes;
pub mod setup;

pub use assistant::{AssistantApi, OpenAiAssistants, OpenAiConfig, RunEvent, ThreadId};
pub use error::RelayError;
pub use routes::{router, AppState};
