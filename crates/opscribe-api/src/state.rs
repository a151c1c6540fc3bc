//! Application state shared across all route handlers.
//!
//! AppState holds references to all services and shared resources.
//! It is passed to handlers via axum's State extractor.

use std::sync::Arc;
use std::time::Instant;

use opscribe_core::config::OpscribeConfig;
use opscribe_core::error::OpscribeError;
use opscribe_rag::{DynEmbeddingService, GraphIngestor, GraphRetriever, IngestOptions};
use opscribe_storage::{Database, GraphRepository, KnowledgeBaseStore};

/// Shared application state.
///
/// All fields use `Arc` for cheap cloning across handler tasks.
#[derive(Clone)]
pub struct AppState {
    /// Application configuration.
    pub config: Arc<OpscribeConfig>,
    /// Graph-of-record repository.
    pub graphs: Arc<GraphRepository>,
    /// Knowledge base store.
    pub store: Arc<KnowledgeBaseStore>,
    /// Graph ingestion pipeline.
    pub ingestor: Arc<GraphIngestor>,
    /// Tenant-scoped retriever.
    pub retriever: Arc<GraphRetriever>,
    /// Server start time for uptime calculation.
    pub start_time: Instant,
}

impl AppState {
    /// Wire the services together over one database and embedding provider.
    ///
    /// Fails with `DimensionMismatch` if the database was created for a
    /// different embedding dimension than `embedder` produces.
    pub fn new(
        config: OpscribeConfig,
        database: Arc<Database>,
        embedder: Arc<dyn DynEmbeddingService>,
    ) -> Result<Self, OpscribeError> {
        let graphs = Arc::new(GraphRepository::new(database.clone()));
        let store = Arc::new(KnowledgeBaseStore::open(
            database,
            embedder.dimensions(),
        )?);

        let ingestor = Arc::new(GraphIngestor::new(
            graphs.clone(),
            store.clone(),
            embedder.clone(),
            IngestOptions::from_config(&config.embedding),
        ));
        let retriever = Arc::new(
            GraphRetriever::new(store.clone(), embedder, config.retrieval.max_limit)
                .with_timeout(config.embedding.call_timeout()),
        );

        Ok(Self {
            config: Arc::new(config),
            graphs,
            store,
            ingestor,
            retriever,
            start_time: Instant::now(),
        })
    }
}
