//! Opscribe storage crate - SQLite persistence for the graph of record and
//! the knowledge base.
//!
//! Provides a WAL-mode SQLite database with versioned migrations, a
//! repository for clients/graphs/nodes/edges, and the tenant-partitioned
//! knowledge base store with cosine-distance ranking.

pub mod db;
pub mod graph;
pub mod knowledge;
pub mod migrations;
pub mod vector;

pub use db::Database;
pub use graph::{GraphRepository, NewEdge, NewNode};
pub use knowledge::{KnowledgeBaseStore, ReplaceOutcome};
pub use vector::{cosine_distance, is_finite_vector};
