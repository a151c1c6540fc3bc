//! Opscribe RAG crate - turns graph entities into embedded passages and
//! answers tenant-scoped similarity queries over them.
//!
//! Components, leaves first:
//! - [`passage`] renders nodes and edges into deterministic text and tags.
//! - [`embedding`] defines the embedding capability; [`openai`] implements
//!   it over an OpenAI-compatible HTTP API.
//! - [`ingestor`] loads a graph, embeds its passages and replaces the graph's
//!   knowledge base items in one transaction.
//! - [`retriever`] embeds a query and ranks one tenant's items by distance.

pub mod embedding;
pub mod ingestor;
pub mod openai;
pub mod passage;
pub mod retriever;
pub mod source;

pub use embedding::{DynEmbeddingService, EmbeddingService, MockEmbedding};
pub use ingestor::{GraphIngestor, IngestOptions, IngestReport};
pub use openai::{OpenAiEmbeddingBuilder, OpenAiEmbeddingService};
pub use passage::{format_edge, format_node, Passage, UnresolvedEndpoint};
pub use retriever::GraphRetriever;
pub use source::GraphSource;
