//! Read access to the graph of record.

use uuid::Uuid;

use opscribe_core::error::OpscribeError;
use opscribe_core::types::GraphSnapshot;
use opscribe_storage::GraphRepository;

/// Source of graph snapshots for ingestion.
pub trait GraphSource: Send + Sync {
    /// Load a graph with all of its nodes and edges.
    ///
    /// Fails with [`OpscribeError::NotFound`] if the graph does not exist.
    fn load_snapshot(&self, graph_id: Uuid) -> Result<GraphSnapshot, OpscribeError>;
}

impl GraphSource for GraphRepository {
    fn load_snapshot(&self, graph_id: Uuid) -> Result<GraphSnapshot, OpscribeError> {
        GraphRepository::load_snapshot(self, graph_id)
    }
}
