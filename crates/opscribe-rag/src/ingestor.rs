//! Graph ingestion pipeline.
//!
//! Loads a graph snapshot, renders every node and then every edge into a
//! passage, embeds the passages in batches, and replaces the graph's item
//! set in the knowledge base with a single transaction. Nothing is written
//! until every embedding has been obtained, so a failure at any point leaves
//! the previously committed items untouched.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use uuid::Uuid;

use opscribe_core::config::EmbeddingConfig;
use opscribe_core::error::{OpscribeError, ProviderError, ProviderErrorKind};
use opscribe_core::types::{EntityKind, GraphSnapshot, KnowledgeBaseItem, Node};
use opscribe_storage::{is_finite_vector, KnowledgeBaseStore};

use crate::embedding::DynEmbeddingService;
use crate::passage::{format_edge, format_node, Passage};
use crate::source::GraphSource;

/// Tunables for [`GraphIngestor`].
#[derive(Debug, Clone)]
pub struct IngestOptions {
    /// Maximum passages per embedding request.
    pub batch_size: usize,
    /// Upper bound on each embedding call, retries included.
    pub timeout: Duration,
}

impl Default for IngestOptions {
    fn default() -> Self {
        Self {
            batch_size: 64,
            timeout: Duration::from_secs(30),
        }
    }
}

impl IngestOptions {
    pub fn from_config(config: &EmbeddingConfig) -> Self {
        Self {
            batch_size: config.batch_size.max(1),
            timeout: config.call_timeout(),
        }
    }
}

/// Summary of one committed ingestion.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IngestReport {
    pub graph_id: Uuid,
    pub tenant_id: Uuid,
    pub nodes_indexed: usize,
    pub edges_indexed: usize,
    /// Edges dropped because an endpoint is not among the graph's nodes.
    pub edges_skipped: usize,
    /// Previously indexed items whose entity no longer exists.
    pub items_removed: usize,
}

/// Converts graphs into knowledge base items.
///
/// Ingestion of the same graph is serialized: a second call waits until the
/// first has committed or failed. Different graphs proceed independently.
pub struct GraphIngestor {
    source: Arc<dyn GraphSource>,
    store: Arc<KnowledgeBaseStore>,
    embedder: Arc<dyn DynEmbeddingService>,
    options: IngestOptions,
    graph_locks: Mutex<HashMap<Uuid, Arc<tokio::sync::Mutex<()>>>>,
}

impl GraphIngestor {
    pub fn new(
        source: Arc<dyn GraphSource>,
        store: Arc<KnowledgeBaseStore>,
        embedder: Arc<dyn DynEmbeddingService>,
        options: IngestOptions,
    ) -> Self {
        Self {
            source,
            store,
            embedder,
            options,
            graph_locks: Mutex::new(HashMap::new()),
        }
    }

    /// Re-index a graph.
    ///
    /// Fails with `NotFound` if the graph does not exist and propagates
    /// provider and storage errors unchanged. On success the graph's items
    /// in the store are exactly the passages of this snapshot.
    pub async fn ingest_graph(&self, graph_id: Uuid) -> Result<IngestReport, OpscribeError> {
        let lock = self.graph_lock(graph_id)?;
        let _guard = lock.lock().await;

        let snapshot = self.source.load_snapshot(graph_id)?;
        let tenant_id = snapshot.graph.tenant_id();

        info!(
            graph_id = %graph_id,
            tenant_id = %tenant_id,
            nodes = snapshot.nodes.len(),
            edges = snapshot.edges.len(),
            "Starting graph ingestion"
        );

        let (passages, edges_skipped) = build_passages(&snapshot);
        let embeddings = self.embed_passages(&passages).await?;

        let now = Utc::now();
        let mut nodes_indexed = 0;
        let mut edges_indexed = 0;
        let items: Vec<KnowledgeBaseItem> = passages
            .into_iter()
            .zip(embeddings)
            .map(|(passage, embedding)| {
                match passage.kind {
                    EntityKind::Node => nodes_indexed += 1,
                    EntityKind::Edge => edges_indexed += 1,
                }
                KnowledgeBaseItem {
                    id: Uuid::new_v4(),
                    tenant_id,
                    graph_id,
                    entity_id: passage.entity_id,
                    content: passage.content,
                    embedding,
                    tags: passage.tags,
                    created_at: now,
                    updated_at: now,
                }
            })
            .collect();

        let outcome = self.store.replace_graph(graph_id, &items)?;

        let report = IngestReport {
            graph_id,
            tenant_id,
            nodes_indexed,
            edges_indexed,
            edges_skipped,
            items_removed: outcome.removed,
        };
        info!(
            graph_id = %graph_id,
            nodes_indexed,
            edges_indexed,
            edges_skipped,
            items_removed = outcome.removed,
            "Graph ingestion committed"
        );
        Ok(report)
    }

    /// Embed passages in request-sized batches, checking every response.
    async fn embed_passages(&self, passages: &[Passage]) -> Result<Vec<Vec<f32>>, OpscribeError> {
        let expected_dims = self.store.dimensions();
        let batch_size = self.options.batch_size.max(1);
        let mut embeddings = Vec::with_capacity(passages.len());

        for (batch_no, batch) in passages.chunks(batch_size).enumerate() {
            let texts: Vec<String> = batch.iter().map(|p| p.content.clone()).collect();

            let vectors = tokio::time::timeout(
                self.options.timeout,
                self.embedder.embed_many_boxed(&texts),
            )
            .await
            .map_err(|_| {
                ProviderError::new(
                    ProviderErrorKind::Timeout,
                    format!(
                        "embedding batch {} timed out after {:?}",
                        batch_no, self.options.timeout
                    ),
                )
            })??;

            if vectors.len() != texts.len() {
                return Err(ProviderError::new(
                    ProviderErrorKind::BadResponse,
                    format!(
                        "requested {} embeddings, received {}",
                        texts.len(),
                        vectors.len()
                    ),
                )
                .into());
            }
            if let Some(bad) = vectors.iter().find(|v| v.len() != expected_dims) {
                return Err(OpscribeError::DimensionMismatch {
                    expected: expected_dims,
                    actual: bad.len(),
                });
            }
            if vectors.iter().any(|v| !is_finite_vector(v)) {
                return Err(ProviderError::new(
                    ProviderErrorKind::BadResponse,
                    format!("embedding batch {} contains non-finite values", batch_no),
                )
                .into());
            }

            debug!(batch = batch_no, size = vectors.len(), "Embedded passage batch");
            embeddings.extend(vectors);
        }

        Ok(embeddings)
    }

    /// Run `f` while no ingestion of `graph_id` is in flight.
    ///
    /// Used for graph deletion, so a running ingestion cannot commit items
    /// for a graph that no longer exists.
    pub async fn with_graph_locked<T>(
        &self,
        graph_id: Uuid,
        f: impl FnOnce() -> Result<T, OpscribeError>,
    ) -> Result<T, OpscribeError> {
        let lock = self.graph_lock(graph_id)?;
        let _guard = lock.lock().await;
        f()
    }

    /// The async lock for `graph_id`, dropping idle locks of other graphs.
    fn graph_lock(&self, graph_id: Uuid) -> Result<Arc<tokio::sync::Mutex<()>>, OpscribeError> {
        let mut locks = self
            .graph_locks
            .lock()
            .map_err(|e| OpscribeError::Storage(format!("Graph lock map poisoned: {}", e)))?;
        locks.retain(|id, lock| *id == graph_id || Arc::strong_count(lock) > 1);
        Ok(locks.entry(graph_id).or_default().clone())
    }
}

/// Nodes first, then edges. Edges with an unresolved endpoint are skipped
/// and counted.
fn build_passages(snapshot: &GraphSnapshot) -> (Vec<Passage>, usize) {
    let nodes: HashMap<Uuid, &Node> = snapshot.nodes.iter().map(|n| (n.id, n)).collect();

    let mut passages: Vec<Passage> = snapshot.nodes.iter().map(format_node).collect();
    let mut skipped = 0;

    for edge in &snapshot.edges {
        match format_edge(edge, &nodes) {
            Ok(passage) => passages.push(passage),
            Err(unresolved) => {
                warn!(
                    graph_id = %snapshot.graph.id,
                    edge_id = %unresolved.edge_id,
                    node_id = %unresolved.node_id,
                    "Skipping edge with unresolved endpoint"
                );
                skipped += 1;
            }
        }
    }

    (passages, skipped)
}
