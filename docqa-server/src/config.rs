use std::path::PathBuf;
use std::time::Duration;

use clap::{Args, Parser, Subcommand};

use crate::assistant::OpenAiConfig;
use crate::setup::SetupOptions;

#[derive(Debug, Parser)]
#[command(name = "docqa-server", about = "Chat relay for the document assistant")]
pub struct Cli {
    #[command(flatten)]
    pub api: ApiArgs,

    /// Directory for the log file (defaults to the platform data directory)
    #[arg(long, env = "DOCQA_LOG_DIR", global = true)]
    pub log_dir: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Serve `/init`, `/chat` and `/healthz` (the default)
    Serve(ServeArgs),
    /// Upload a document and create an assistant that searches it
    Setup(SetupArgs),
    /// Check an existing assistant's retrieval configuration
    Verify(VerifyArgs),
}

#[derive(Debug, Clone, Args)]
pub struct ApiArgs {
    /// API key for the hosted assistant service
    #[arg(long, env = "OPENAI_API_KEY", hide_env_values = true, global = true)]
    pub openai_api_key: Option<String>,

    /// Base URL of the OpenAI-compatible API
    #[arg(
        long,
        env = "OPENAI_BASE_URL",
        default_value = "https://api.openai.com/v1",
        global = true
    )]
    pub openai_base_url: String,

    /// Timeout (seconds) for connecting and for non-streaming requests
    #[arg(long, env = "DOCQA_OPENAI_TIMEOUT_SECS", default_value_t = 30, global = true)]
    pub openai_timeout_secs: u64,

    /// Attempts per non-streaming request before giving up
    #[arg(long, env = "DOCQA_OPENAI_MAX_RETRIES", default_value_t = 3, global = true)]
    pub openai_max_retries: usize,

    /// Base delay (milliseconds) of the exponential retry backoff
    #[arg(long, env = "DOCQA_OPENAI_RETRY_BASE_MS", default_value_t = 500, global = true)]
    pub openai_retry_base_ms: u64,
}

impl ApiArgs {
    pub fn openai_config(&self) -> anyhow::Result<OpenAiConfig> {
        let api_key = self
            .openai_api_key
            .clone()
            .filter(|key| !key.trim().is_empty())
            .ok_or_else(|| anyhow::anyhow!("OPENAI_API_KEY is not set"))?;
        Ok(OpenAiConfig {
            api_key,
            base_url: self.openai_base_url.clone(),
            timeout: Duration::from_secs(self.openai_timeout_secs.max(1)),
            max_retries: self.openai_max_retries,
            retry_base: Duration::from_millis(self.openai_retry_base_ms),
        })
    }
}

#[derive(Debug, Clone, Args)]
pub struct ServeArgs {
    /// Address to bind the HTTP server to
    #[arg(long, env = "DOCQA_BIND", default_value = "127.0.0.1:5000")]
    pub bind: String,

    /// Assistant the relay runs; `/chat` answers 500 without it
    #[arg(long, env = "DOCQA_ASSISTANT_ID")]
    pub assistant_id: Option<String>,
}

impl Default for ServeArgs {
    fn default() -> Self {
        Self {
            bind: std::env::var("DOCQA_BIND").unwrap_or_else(|_| "127.0.0.1:5000".to_string()),
            assistant_id: std::env::var("DOCQA_ASSISTANT_ID").ok(),
        }
    }
}

#[derive(Debug, Clone, Args)]
pub struct SetupArgs {
    /// PDF to upload and index
    #[arg(long)]
    pub file: PathBuf,

    #[arg(long, default_value = "Document Assistant")]
    pub name: String,

    /// Name of the vector store holding the document
    #[arg(long, default_value = "Document Vector Store")]
    pub store_name: String,

    #[arg(long, default_value = "gpt-4")]
    pub model: String,

    #[arg(
        long,
        default_value = "Answer questions based on the uploaded document. Mention page numbers when you refer to specific content."
    )]
    pub instructions: String,

    /// Seconds between indexing status checks
    #[arg(long, default_value_t = 2)]
    pub poll_interval_secs: u64,

    /// Give up if indexing takes longer than this many seconds
    #[arg(long, default_value_t = 600)]
    pub poll_timeout_secs: u64,
}

impl SetupArgs {
    pub fn options(&self) -> SetupOptions {
        SetupOptions {
            file: self.file.clone(),
            name: self.name.clone(),
            store_name: self.store_name.clone(),
            model: self.model.clone(),
            instructions: self.instructions.clone(),
            poll_interval: Duration::from_secs(self.poll_interval_secs),
            poll_timeout: Duration::from_secs(self.poll_timeout_secs),
        }
    }
}

#[derive(Debug, Clone, Args)]
pub struct VerifyArgs {
    #[arg(long, env = "DOCQA_ASSISTANT_ID")]
    pub assistant_id: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn serve_flags_are_parsed() {
        let cli = Cli::parse_from([
            "docqa-server",
            "--openai-api-key",
            "sk-test",
            "serve",
            "--bind",
            "0.0.0.0:8080",
            "--assistant-id",
            "asst_1",
        ]);
        let Some(Command::Serve(serve)) = cli.command else {
            panic!("expected serve command");
        };
        assert_eq!(serve.bind, "0.0.0.0:8080");
        assert_eq!(serve.assistant_id.as_deref(), Some("asst_1"));

        let config = cli.api.openai_config().unwrap();
        assert_eq!(config.api_key, "sk-test");
        assert_eq!(config.max_retries, 3);
        assert_eq!(config.retry_base, Duration::from_millis(500));
    }

    #[test]
    fn blank_api_key_is_rejected() {
        let cli = Cli::parse_from(["docqa-server", "--openai-api-key", " ", "verify", "--assistant-id", "a"]);
        assert!(cli.api.openai_config().is_err());
    }

    #[test]
    fn setup_defaults_are_filled_in() {
        let cli = Cli::parse_from(["docqa-server", "setup", "--file", "doc.pdf"]);
        let Some(Command::Setup(setup)) = cli.command else {
            panic!("expected setup command");
        };
        let options = setup.options();
        assert_eq!(options.model, "gpt-4");
        assert_eq!(options.poll_interval, Duration::from_secs(2));
    }
}
