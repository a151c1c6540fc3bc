//! Opscribe application binary - composition root.
//!
//! 1. Parse CLI arguments and read the TOML configuration file
//! 2. Initialize tracing, then report how the configuration was resolved;
//!    a config file that exists but does not validate is fatal
//! 3. Build the embedding provider and open the SQLite database
//! 4. Run the selected command: the REST API server, a one-off ingestion,
//!    or a one-off retrieval

mod cli;

use std::sync::Arc;

use clap::Parser;
use serde_json::json;

use opscribe_api::routes;
use opscribe_api::state::AppState;
use opscribe_core::config::OpscribeConfig;
use opscribe_core::error::OpscribeError;
use opscribe_rag::{DynEmbeddingService, MockEmbedding, OpenAiEmbeddingService};
use opscribe_storage::Database;

use cli::{CliArgs, Command};

/// Pick the embedding backend named in config.
fn build_embedder(config: &OpscribeConfig) -> Result<Arc<dyn DynEmbeddingService>, OpscribeError> {
    match config.embedding.provider.as_str() {
        "mock" => Ok(Arc::new(MockEmbedding::new(config.embedding.dimensions))),
        "openai" => Ok(Arc::new(OpenAiEmbeddingService::from_config(
            &config.embedding,
        )?)),
        other => Err(OpscribeError::Config(format!(
            "Unknown embedding provider '{}'. Must be one of: openai, mock",
            other
        ))),
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = CliArgs::parse();

    // Config file. Nothing is logged until tracing is up.
    let config_file = args.resolve_config_path();
    let loaded = OpscribeConfig::load_if_present(&config_file);

    // Tracing. RUST_LOG wins, then --log-level, then the file's level.
    let log_level = args.resolve_log_level(loaded.as_ref().ok().and_then(Option::as_ref));
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&log_level)),
        )
        .init();

    tracing::info!("Starting Opscribe v{}", env!("CARGO_PKG_VERSION"));

    let mut config = match loaded {
        Ok(Some(config)) => {
            tracing::info!(path = %config_file.display(), "Configuration loaded");
            config
        }
        Ok(None) => {
            tracing::warn!(
                path = %config_file.display(),
                "No configuration file found, using defaults"
            );
            OpscribeConfig::default()
        }
        Err(e) => {
            tracing::error!(path = %config_file.display(), error = %e, "Invalid configuration file");
            return Err(e.into());
        }
    };
    config.general.port = args.resolve_port(config.general.port);
    if let Some(dir) = args.resolve_data_dir() {
        config.general.data_dir = dir;
    }
    config.general.log_level = log_level;

    // Embedding provider.
    let embedder = build_embedder(&config)?;
    tracing::info!(
        provider = %config.embedding.provider,
        dimensions = embedder.dimensions(),
        "Embedding provider ready"
    );

    // Storage.
    let db_path = config.database_path();
    let database = Arc::new(Database::new(&db_path)?);
    tracing::info!(path = %db_path.display(), "SQLite database opened");

    let state = AppState::new(config.clone(), database, embedder)?;

    match args.command() {
        Command::Serve => {
            routes::start_server(&config, state).await?;
        }
        Command::Ingest { graph_id } => {
            let report = state.ingestor.ingest_graph(graph_id).await?;
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
        Command::Retrieve {
            tenant,
            limit,
            query,
        } => {
            let limit = limit.unwrap_or(config.retrieval.default_limit);
            let results = state
                .retriever
                .retrieve_scored(&query, tenant, limit)
                .await?;
            let rows: Vec<_> = results
                .iter()
                .map(|r| {
                    json!({
                        "id": r.item.id,
                        "graph_id": r.item.graph_id,
                        "entity_id": r.item.entity_id,
                        "distance": r.distance,
                        "content": r.item.content,
                        "tags": r.item.tags,
                    })
                })
                .collect();
            println!("{}", serde_json::to_string_pretty(&rows)?);
        }
    }

    Ok(())
}
