//! Tenant-scoped semantic retrieval.

use std::sync::Arc;
use std::time::Duration;

use tracing::debug;
use uuid::Uuid;

use opscribe_core::error::{OpscribeError, ProviderError, ProviderErrorKind};
use opscribe_core::types::{KnowledgeBaseItem, ScoredItem};
use opscribe_storage::{is_finite_vector, KnowledgeBaseStore};

use crate::embedding::DynEmbeddingService;

/// Embeds a query once and ranks one tenant's items by cosine distance.
pub struct GraphRetriever {
    store: Arc<KnowledgeBaseStore>,
    embedder: Arc<dyn DynEmbeddingService>,
    max_limit: usize,
    timeout: Duration,
}

impl GraphRetriever {
    pub fn new(
        store: Arc<KnowledgeBaseStore>,
        embedder: Arc<dyn DynEmbeddingService>,
        max_limit: usize,
    ) -> Self {
        Self {
            store,
            embedder,
            max_limit: max_limit.max(1),
            timeout: Duration::from_secs(30),
        }
    }

    /// Bound the query embedding call, the provider's own retries included.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// The closest items of `tenant_id`, nearest first.
    ///
    /// Returns at most `limit` items; an empty result is not an error.
    pub async fn retrieve(
        &self,
        query: &str,
        tenant_id: Uuid,
        limit: usize,
    ) -> Result<Vec<KnowledgeBaseItem>, OpscribeError> {
        let scored = self.retrieve_scored(query, tenant_id, limit).await?;
        Ok(scored.into_iter().map(|s| s.item).collect())
    }

    /// Like [`GraphRetriever::retrieve`], keeping each item's distance.
    ///
    /// `limit` must be positive; values above the configured maximum are
    /// clamped to it.
    pub async fn retrieve_scored(
        &self,
        query: &str,
        tenant_id: Uuid,
        limit: usize,
    ) -> Result<Vec<ScoredItem>, OpscribeError> {
        if query.trim().is_empty() {
            return Err(OpscribeError::InvalidArgument(
                "query must not be empty".to_string(),
            ));
        }
        if limit == 0 {
            return Err(OpscribeError::InvalidArgument(
                "limit must be a positive integer".to_string(),
            ));
        }
        let limit = limit.min(self.max_limit);

        let query_vector = tokio::time::timeout(self.timeout, self.embedder.embed_boxed(query))
            .await
            .map_err(|_| {
                ProviderError::new(
                    ProviderErrorKind::Timeout,
                    format!("query embedding timed out after {:?}", self.timeout),
                )
            })??;

        if query_vector.len() != self.store.dimensions() {
            return Err(OpscribeError::DimensionMismatch {
                expected: self.store.dimensions(),
                actual: query_vector.len(),
            });
        }
        if !is_finite_vector(&query_vector) {
            return Err(ProviderError::new(
                ProviderErrorKind::BadResponse,
                "query embedding contains non-finite values",
            )
            .into());
        }

        let results = self.store.query_nearest(tenant_id, &query_vector, limit)?;
        debug!(
            tenant_id = %tenant_id,
            limit,
            returned = results.len(),
            "Retrieved knowledge base items"
        );
        Ok(results)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedding::{EmbeddingService, MockEmbedding};
    use chrono::Utc;
    use opscribe_core::types::Properties;
    use opscribe_storage::Database;
    use serde_json::Value;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Maps every text to the same axis and counts calls.
    struct CountingEmbedding {
        calls: AtomicUsize,
    }

    impl EmbeddingService for CountingEmbedding {
        async fn embed(&self, _text: &str) -> Result<Vec<f32>, OpscribeError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(vec![1.0, 0.0, 0.0])
        }

        fn dimensions(&self) -> usize {
            3
        }
    }

    fn item(tenant_id: Uuid, embedding: Vec<f32>) -> KnowledgeBaseItem {
        let mut tags = Properties::new();
        tags.insert("kind".to_string(), Value::from("node"));
        KnowledgeBaseItem {
            id: Uuid::new_v4(),
            tenant_id,
            graph_id: Uuid::new_v4(),
            entity_id: Uuid::new_v4(),
            content: "Component: x (service).".to_string(),
            embedding,
            tags,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    fn store_with(items: &[KnowledgeBaseItem]) -> Arc<KnowledgeBaseStore> {
        let db = Arc::new(Database::in_memory().unwrap());
        let store = KnowledgeBaseStore::open(db, 3).unwrap();
        store.upsert_batch(items).unwrap();
        Arc::new(store)
    }

    #[tokio::test]
    async fn test_limit_zero_is_invalid() {
        let embedder = Arc::new(CountingEmbedding {
            calls: AtomicUsize::new(0),
        });
        let retriever = GraphRetriever::new(store_with(&[]), embedder.clone(), 50);

        let err = retriever
            .retrieve("anything", Uuid::new_v4(), 0)
            .await
            .unwrap_err();
        assert!(matches!(err, OpscribeError::InvalidArgument(_)));
        assert_eq!(embedder.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_blank_query_is_invalid() {
        let retriever = GraphRetriever::new(store_with(&[]), Arc::new(MockEmbedding::new(3)), 50);
        let err = retriever.retrieve("  ", Uuid::new_v4(), 5).await.unwrap_err();
        assert!(matches!(err, OpscribeError::InvalidArgument(_)));
    }

    #[tokio::test]
    async fn test_empty_tenant_returns_empty() {
        let retriever = GraphRetriever::new(store_with(&[]), Arc::new(MockEmbedding::new(3)), 50);
        let results = retriever.retrieve("anything", Uuid::new_v4(), 5).await.unwrap();
        assert!(results.is_empty());
    }

    #[tokio::test]
    async fn test_limit_is_clamped_to_max() {
        let tenant = Uuid::new_v4();
        let items: Vec<KnowledgeBaseItem> = (0..6)
            .map(|i| item(tenant, vec![1.0, i as f32, 0.0]))
            .collect();
        let embedder = Arc::new(CountingEmbedding {
            calls: AtomicUsize::new(0),
        });
        let retriever = GraphRetriever::new(store_with(&items), embedder.clone(), 4);

        let results = retriever.retrieve_scored("q", tenant, 100).await.unwrap();
        assert_eq!(results.len(), 4);
        assert_eq!(results[0].item.id, items[0].id);
        assert!(results.windows(2).all(|w| w[0].distance <= w[1].distance));
        assert_eq!(embedder.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_results_never_cross_tenants() {
        let mine = Uuid::new_v4();
        let theirs = Uuid::new_v4();
        let items = vec![
            item(theirs, vec![1.0, 0.0, 0.0]),
            item(mine, vec![0.0, 1.0, 0.0]),
            item(theirs, vec![0.9, 0.1, 0.0]),
        ];
        let retriever = GraphRetriever::new(
            store_with(&items),
            Arc::new(CountingEmbedding {
                calls: AtomicUsize::new(0),
            }),
            50,
        );

        let results = retriever.retrieve("q", mine, 10).await.unwrap();
        assert_eq!(results.len(), 1);
        assert!(results.iter().all(|i| i.tenant_id == mine));
    }

    #[tokio::test]
    async fn test_query_dimension_mismatch() {
        let retriever = GraphRetriever::new(store_with(&[]), Arc::new(MockEmbedding::new(5)), 50);
        let err = retriever.retrieve("q", Uuid::new_v4(), 1).await.unwrap_err();
        assert!(matches!(
            err,
            OpscribeError::DimensionMismatch {
                expected: 3,
                actual: 5
            }
        ));
    }
}
