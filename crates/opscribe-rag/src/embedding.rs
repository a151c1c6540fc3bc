//! Embedding service trait and the deterministic mock implementation.
//!
//! - [`crate::openai::OpenAiEmbeddingService`] talks to an OpenAI-compatible
//!   embeddings endpoint. This is the production backend.
//! - [`MockEmbedding`] provides deterministic hash-based vectors for tests
//!   and offline runs.

use std::collections::hash_map::DefaultHasher;
use std::future::Future;
use std::hash::{Hash, Hasher};
use std::pin::Pin;

use opscribe_core::error::OpscribeError;

/// Boxed future returned by [`DynEmbeddingService`].
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Service for generating text embeddings.
///
/// Every vector returned has exactly [`EmbeddingService::dimensions`]
/// components. Used for both ingestion (passages) and retrieval (queries).
pub trait EmbeddingService: Send + Sync {
    /// Generate an embedding vector for the given text.
    fn embed(&self, text: &str) -> impl Future<Output = Result<Vec<f32>, OpscribeError>> + Send;

    /// Generate one embedding per input text, in input order.
    ///
    /// The default implementation calls [`EmbeddingService::embed`] once per
    /// text; backends with a batch endpoint override it.
    fn embed_many(
        &self,
        texts: &[String],
    ) -> impl Future<Output = Result<Vec<Vec<f32>>, OpscribeError>> + Send {
        async move {
            let mut vectors = Vec::with_capacity(texts.len());
            for text in texts {
                vectors.push(self.embed(text).await?);
            }
            Ok(vectors)
        }
    }

    /// Return the dimensionality of vectors produced by this service.
    fn dimensions(&self) -> usize;
}

/// Object-safe version of [`EmbeddingService`] for dynamic dispatch.
///
/// `EmbeddingService` returns `impl Future` and so cannot be made into a
/// trait object. This mirror trait boxes the futures, allowing the provider
/// to be chosen at runtime and stored as `Arc<dyn DynEmbeddingService>`.
/// Every `EmbeddingService` implements it through the blanket impl below.
pub trait DynEmbeddingService: Send + Sync {
    fn embed_boxed<'a>(&'a self, text: &'a str) -> BoxFuture<'a, Result<Vec<f32>, OpscribeError>>;

    fn embed_many_boxed<'a>(
        &'a self,
        texts: &'a [String],
    ) -> BoxFuture<'a, Result<Vec<Vec<f32>>, OpscribeError>>;

    fn dimensions(&self) -> usize;
}

impl<T: EmbeddingService> DynEmbeddingService for T {
    fn embed_boxed<'a>(&'a self, text: &'a str) -> BoxFuture<'a, Result<Vec<f32>, OpscribeError>> {
        Box::pin(self.embed(text))
    }

    fn embed_many_boxed<'a>(
        &'a self,
        texts: &'a [String],
    ) -> BoxFuture<'a, Result<Vec<Vec<f32>>, OpscribeError>> {
        Box::pin(self.embed_many(texts))
    }

    fn dimensions(&self) -> usize {
        EmbeddingService::dimensions(self)
    }
}

/// Reject empty or whitespace-only input before it reaches a provider.
pub(crate) fn ensure_not_blank(text: &str) -> Result<(), OpscribeError> {
    if text.trim().is_empty() {
        return Err(OpscribeError::InvalidArgument(
            "cannot embed empty text".to_string(),
        ));
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// MockEmbedding - deterministic hash-based vectors
// ---------------------------------------------------------------------------

/// Mock embedding service that returns deterministic unit vectors.
///
/// The output is derived from a hash of the input text, so identical inputs
/// always produce identical outputs. Similarity between different texts is
/// meaningless.
#[derive(Debug, Clone)]
pub struct MockEmbedding {
    dimensions: usize,
}

impl MockEmbedding {
    pub fn new(dimensions: usize) -> Self {
        Self { dimensions }
    }

    fn hash_to_vector(&self, text: &str) -> Vec<f32> {
        let mut result = Vec::with_capacity(self.dimensions);
        for i in 0..self.dimensions {
            let mut hasher = DefaultHasher::new();
            text.hash(&mut hasher);
            i.hash(&mut hasher);
            let h = hasher.finish();
            let val = ((h as f64) / (u64::MAX as f64)) * 2.0 - 1.0;
            result.push(val as f32);
        }

        let norm: f32 = result.iter().map(|v| v * v).sum::<f32>().sqrt();
        if norm > 0.0 {
            for val in &mut result {
                *val /= norm;
            }
        }

        result
    }
}

impl Default for MockEmbedding {
    fn default() -> Self {
        Self::new(1536)
    }
}

impl EmbeddingService for MockEmbedding {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, OpscribeError> {
        ensure_not_blank(text)?;
        Ok(self.hash_to_vector(text))
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_mock_embedding_dimension() {
        let service = MockEmbedding::new(64);
        let vec = service.embed("hello world").await.unwrap();
        assert_eq!(vec.len(), 64);
        assert_eq!(EmbeddingService::dimensions(&service), 64);
    }

    #[tokio::test]
    async fn test_mock_embedding_deterministic() {
        let service = MockEmbedding::new(32);
        let v1 = service.embed("same text").await.unwrap();
        let v2 = service.embed("same text").await.unwrap();
        assert_eq!(v1, v2);
    }

    #[tokio::test]
    async fn test_mock_embedding_different_inputs() {
        let service = MockEmbedding::new(32);
        let v1 = service.embed("text one").await.unwrap();
        let v2 = service.embed("text two").await.unwrap();
        assert_ne!(v1, v2);
    }

    #[tokio::test]
    async fn test_mock_embedding_is_unit_length() {
        let service = MockEmbedding::default();
        let vec = service.embed("unit").await.unwrap();
        let norm: f32 = vec.iter().map(|v| v * v).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-4);
    }

    #[tokio::test]
    async fn test_blank_text_rejected() {
        let service = MockEmbedding::new(8);
        for text in ["", "   ", "\n"] {
            let err = service.embed(text).await.unwrap_err();
            assert!(matches!(err, OpscribeError::InvalidArgument(_)));
        }
    }

    #[tokio::test]
    async fn test_default_embed_many_preserves_order() {
        let service = MockEmbedding::new(16);
        let texts = vec!["a".to_string(), "b".to_string(), "c".to_string()];
        let batch = service.embed_many(&texts).await.unwrap();
        assert_eq!(batch.len(), 3);
        for (text, vector) in texts.iter().zip(&batch) {
            assert_eq!(&service.embed(text).await.unwrap(), vector);
        }
    }

    #[tokio::test]
    async fn test_dyn_service_dispatch() {
        let service: Arc<dyn DynEmbeddingService> = Arc::new(MockEmbedding::new(12));
        assert_eq!(service.dimensions(), 12);
        let one = service.embed_boxed("node").await.unwrap();
        let many = service
            .embed_many_boxed(&["node".to_string()])
            .await
            .unwrap();
        assert_eq!(many, vec![one]);
    }
}
