use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use docqa_server::config::{ApiArgs, Cli, Command, ServeArgs, SetupArgs, VerifyArgs};
use docqa_server::logging::{default_log_dir, init_tracing};
use docqa_server::setup::{run_setup, verify};
use docqa_server::{router, AppState, OpenAiAssistants};
use tracing::{info, warn};

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    let log_dir = match cli.log_dir.clone() {
        Some(dir) => dir,
        None => default_log_dir()?,
    };
    let _log_guard = init_tracing(&log_dir)?;

    match cli.command.unwrap_or_else(|| Command::Serve(ServeArgs::default())) {
        Command::Serve(args) => serve(&cli.api, args).await,
        Command::Setup(args) => setup(&cli.api, args).await,
        Command::Verify(args) => verify_assistant(&cli.api, args).await,
    }
}

async fn serve(api: &ApiArgs, args: ServeArgs) -> Result<()> {
    let client = OpenAiAssistants::new(api.openai_config()?)?;
    let state = AppState::new(Arc::new(client), args.assistant_id);
    if state.assistant_id.is_none() {
        warn!("DOCQA_ASSISTANT_ID is not set; /chat will answer 500 until it is");
    }

    let addr: SocketAddr = args
        .bind
        .parse()
        .with_context(|| format!("invalid bind address {}", args.bind))?;
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    info!(%addr, "chat relay listening");

    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server shutdown")?;
    info!("chat relay stopped");
    Ok(())
}

async fn setup(api: &ApiArgs, args: SetupArgs) -> Result<()> {
    let client = OpenAiAssistants::new(api.openai_config()?)?;
    let report = run_setup(&client, &args.options()).await?;
    println!("file id:         {}", report.file_id);
    println!("vector store id: {}", report.vector_store_id);
    println!("indexing status: {}", report.file_status);
    println!("assistant id:    {}", report.assistant_id);
    println!();
    println!("Set DOCQA_ASSISTANT_ID={} for the relay.", report.assistant_id);
    println!("Running setup again creates a new file, store and assistant.");
    Ok(())
}

async fn verify_assistant(api: &ApiArgs, args: VerifyArgs) -> Result<()> {
    let client = OpenAiAssistants::new(api.openai_config()?)?;
    let report = verify(&client, &args.assistant_id)
        .await
        .with_context(|| format!("failed to verify assistant {}", args.assistant_id))?;

    println!(
        "assistant {} ({})",
        report.assistant_id,
        report.name.as_deref().unwrap_or("unnamed")
    );
    println!(
        "file search: {}",
        if report.file_search_enabled { "enabled" } else { "disabled" }
    );
    for id in &report.vector_store_ids {
        println!("vector store: {id}");
    }
    for warning in report.warnings() {
        warn!(assistant = %report.assistant_id, "{warning}");
    }
    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        warn!(?err, "failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
}
