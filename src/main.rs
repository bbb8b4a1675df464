use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use axum::Router;
use clap::{Parser, Subcommand};
use tokio::net::TcpListener;

use kbchat_backend::core::config::{AppConfig, AppPaths, ConfigService};
use kbchat_backend::core::logging;
use kbchat_backend::rag::Ingestor;
use kbchat_backend::server;
use kbchat_backend::state::{self, AppState, InitializationError};

#[derive(Parser)]
#[command(
    name = "kbchat-backend",
    version,
    about = "Answers questions from a local knowledge base with a hosted LLM"
)]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Run the HTTP server (default)
    Serve,
    /// Split, embed and store documents in the vector index
    Ingest {
        /// Files or directories to index
        #[arg(required = true)]
        paths: Vec<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let paths = Arc::new(AppPaths::new());
    logging::init(&paths);

    let config_service = ConfigService::new(paths.clone());
    let config = config_service
        .resolve()
        .map_err(InitializationError::Config)?;
    tracing::debug!("Effective config: {}", config_service.redacted(&config));

    match cli.command.unwrap_or(Command::Serve) {
        Command::Serve => serve(paths, config).await,
        Command::Ingest { paths: inputs } => ingest(&paths, &config, &inputs).await,
    }
}

async fn serve(paths: Arc<AppPaths>, config: AppConfig) -> anyhow::Result<()> {
    let bind_addr = format!("{}:{}", config.server.host, config.server.port);
    let state = AppState::initialize(&paths, config).await?;

    let listener = TcpListener::bind(&bind_addr)
        .await
        .with_context(|| format!("Failed to bind to {}", bind_addr))?;
    let addr = listener.local_addr()?;
    tracing::info!("Listening on http://{}", addr);

    let app: Router = server::router::router(state);
    axum::serve(listener, app).await.context("Server error")?;

    Ok(())
}

async fn ingest(paths: &AppPaths, config: &AppConfig, inputs: &[PathBuf]) -> anyhow::Result<()> {
    let (llm, store) = state::build_backends(paths, config).await?;
    let ingestor = Ingestor::new(llm, store, &config.ingest);

    let report = ingestor
        .ingest_paths(inputs)
        .await
        .context("Ingestion failed")?;
    println!("{}", serde_json::to_string_pretty(&report)?);

    Ok(())
}
