//! Knowledge base store.
//!
//! Tenant-partitioned collection of embedded passages. Every write is a
//! single transaction, so readers observe a batch either entirely or not at
//! all. Items are keyed by `(graph_id, entity_id)`: writing an item for an
//! entity that already has one replaces its content in place.

use std::collections::HashSet;
use std::sync::Arc;

use rusqlite::{Connection, OptionalExtension, Transaction};
use tracing::{debug, info};
use uuid::Uuid;

use opscribe_core::error::OpscribeError;
use opscribe_core::types::{KnowledgeBaseItem, ScoredItem};

use crate::db::{from_millis, parse_uuid, storage_err, Database};
use crate::vector::{cosine_distance, decode_embedding, encode_embedding, is_finite_vector};

const DIMENSIONS_KEY: &str = "embedding_dimensions";

const ITEM_COLUMNS: &str =
    "id, tenant_id, graph_id, entity_id, content, embedding, tags, created_at, updated_at";

/// Result of [`KnowledgeBaseStore::replace_graph`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReplaceOutcome {
    /// Items inserted or updated.
    pub upserted: usize,
    /// Items deleted because their entity is no longer in the graph.
    pub removed: usize,
}

/// SQLite-backed knowledge base with cosine-distance ranking.
pub struct KnowledgeBaseStore {
    db: Arc<Database>,
    dimensions: usize,
}

impl KnowledgeBaseStore {
    /// Open the store for embeddings of the given dimension.
    ///
    /// The first open records the dimension. Later opens with a different
    /// value fail with [`OpscribeError::DimensionMismatch`].
    pub fn open(db: Arc<Database>, dimensions: usize) -> Result<Self, OpscribeError> {
        if dimensions == 0 {
            return Err(OpscribeError::Config(
                "embedding dimension must be greater than 0".to_string(),
            ));
        }

        db.with_conn(|conn| {
            let recorded: Option<String> = conn
                .query_row(
                    "SELECT value FROM store_meta WHERE key = ?1",
                    rusqlite::params![DIMENSIONS_KEY],
                    |row| row.get(0),
                )
                .optional()
                .map_err(storage_err)?;

            match recorded {
                Some(value) => {
                    let expected: usize = value.parse().map_err(|_| {
                        OpscribeError::Storage(format!(
                            "Invalid recorded embedding dimension: {}",
                            value
                        ))
                    })?;
                    if expected != dimensions {
                        return Err(OpscribeError::DimensionMismatch {
                            expected,
                            actual: dimensions,
                        });
                    }
                }
                None => {
                    conn.execute(
                        "INSERT INTO store_meta (key, value) VALUES (?1, ?2)",
                        rusqlite::params![DIMENSIONS_KEY, dimensions.to_string()],
                    )
                    .map_err(storage_err)?;
                    info!(dimensions, "Initialized knowledge base store");
                }
            }
            Ok(())
        })?;

        Ok(Self { db, dimensions })
    }

    /// Embedding dimension every stored vector has.
    pub fn dimensions(&self) -> usize {
        self.dimensions
    }

    /// Persist a set of items in one transaction.
    ///
    /// An item whose `(graph_id, entity_id)` already exists replaces the
    /// stored content, embedding, tags and `updated_at`; the stored `id`,
    /// `created_at` and ranking position are kept.
    pub fn upsert_batch(&self, items: &[KnowledgeBaseItem]) -> Result<usize, OpscribeError> {
        self.validate(items)?;
        if items.is_empty() {
            return Ok(0);
        }

        self.db.with_conn_mut(|conn| {
            let tx = conn.transaction().map_err(storage_err)?;
            write_items(&tx, items)?;
            tx.commit()
                .map_err(|e| OpscribeError::Storage(format!("Failed to commit batch: {}", e)))?;
            Ok(())
        })?;

        debug!(count = items.len(), "Upserted knowledge base items");
        Ok(items.len())
    }

    /// Make `items` the complete item set of a graph, atomically.
    ///
    /// Upserts every item, then deletes the graph's items whose entity is
    /// not among them. Every item must belong to `graph_id`.
    pub fn replace_graph(
        &self,
        graph_id: Uuid,
        items: &[KnowledgeBaseItem],
    ) -> Result<ReplaceOutcome, OpscribeError> {
        if let Some(stray) = items.iter().find(|item| item.graph_id != graph_id) {
            return Err(OpscribeError::InvalidArgument(format!(
                "item for entity {} belongs to graph {}, not {}",
                stray.entity_id, stray.graph_id, graph_id
            )));
        }
        self.validate(items)?;

        let keep: HashSet<String> = items.iter().map(|i| i.entity_id.to_string()).collect();

        let removed = self.db.with_conn_mut(|conn| {
            let tx = conn.transaction().map_err(storage_err)?;
            write_items(&tx, items)?;

            let stale = {
                let mut stmt = tx
                    .prepare("SELECT entity_id FROM knowledge_base_items WHERE graph_id = ?1")
                    .map_err(storage_err)?;
                let rows = stmt
                    .query_map(rusqlite::params![graph_id.to_string()], |row| {
                        row.get::<_, String>(0)
                    })
                    .map_err(storage_err)?;
                let mut stale = Vec::new();
                for row in rows {
                    let entity_id = row.map_err(storage_err)?;
                    if !keep.contains(&entity_id) {
                        stale.push(entity_id);
                    }
                }
                stale
            };

            for entity_id in &stale {
                tx.execute(
                    "DELETE FROM knowledge_base_items WHERE graph_id = ?1 AND entity_id = ?2",
                    rusqlite::params![graph_id.to_string(), entity_id],
                )
                .map_err(storage_err)?;
            }

            tx.commit()
                .map_err(|e| OpscribeError::Storage(format!("Failed to commit batch: {}", e)))?;
            Ok(stale.len())
        })?;

        debug!(
            graph_id = %graph_id,
            upserted = items.len(),
            removed,
            "Replaced graph items"
        );
        Ok(ReplaceOutcome {
            upserted: items.len(),
            removed,
        })
    }

    /// The `limit` items of `tenant_id` closest to `query` by cosine distance.
    ///
    /// Only the tenant's rows are read, so other tenants' items can never be
    /// ranked, however close they are. Equal distances keep insertion order.
    pub fn query_nearest(
        &self,
        tenant_id: Uuid,
        query: &[f32],
        limit: usize,
    ) -> Result<Vec<ScoredItem>, OpscribeError> {
        if limit == 0 {
            return Err(OpscribeError::InvalidArgument(
                "limit must be greater than 0".to_string(),
            ));
        }
        if query.len() != self.dimensions {
            return Err(OpscribeError::DimensionMismatch {
                expected: self.dimensions,
                actual: query.len(),
            });
        }
        if !is_finite_vector(query) {
            return Err(OpscribeError::InvalidArgument(
                "query vector contains non-finite values".to_string(),
            ));
        }

        let items = self.db.with_conn(|conn| {
            select_items(
                conn,
                "WHERE tenant_id = ?1 ORDER BY seq",
                &tenant_id.to_string(),
            )
        })?;

        let mut scored: Vec<ScoredItem> = items
            .into_iter()
            .map(|item| {
                let distance = cosine_distance(query, &item.embedding);
                ScoredItem { item, distance }
            })
            .collect();

        // sort_by is stable: rows arrive in seq order, so ties keep it.
        scored.sort_by(|a, b| a.distance.total_cmp(&b.distance));
        scored.truncate(limit);

        Ok(scored)
    }

    /// Number of stored items, for one tenant or overall.
    pub fn count(&self, tenant_id: Option<Uuid>) -> Result<usize, OpscribeError> {
        self.db.with_conn(|conn| {
            let count: i64 = match tenant_id {
                Some(tenant_id) => conn.query_row(
                    "SELECT COUNT(*) FROM knowledge_base_items WHERE tenant_id = ?1",
                    rusqlite::params![tenant_id.to_string()],
                    |row| row.get(0),
                ),
                None => conn.query_row("SELECT COUNT(*) FROM knowledge_base_items", [], |row| {
                    row.get(0)
                }),
            }
            .map_err(storage_err)?;
            Ok(count as usize)
        })
    }

    /// All items derived from a graph, in insertion order.
    pub fn items_for_graph(&self, graph_id: Uuid) -> Result<Vec<KnowledgeBaseItem>, OpscribeError> {
        self.db.with_conn(|conn| {
            select_items(
                conn,
                "WHERE graph_id = ?1 ORDER BY seq",
                &graph_id.to_string(),
            )
        })
    }

    fn validate(&self, items: &[KnowledgeBaseItem]) -> Result<(), OpscribeError> {
        for item in items {
            if item.embedding.len() != self.dimensions {
                return Err(OpscribeError::DimensionMismatch {
                    expected: self.dimensions,
                    actual: item.embedding.len(),
                });
            }
            if !is_finite_vector(&item.embedding) {
                return Err(OpscribeError::InvalidArgument(format!(
                    "embedding for entity {} contains non-finite values",
                    item.entity_id
                )));
            }
            if item.kind().is_none() {
                return Err(OpscribeError::InvalidArgument(format!(
                    "item for entity {} has no valid kind tag",
                    item.entity_id
                )));
            }
        }
        Ok(())
    }
}

impl std::fmt::Debug for KnowledgeBaseStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KnowledgeBaseStore")
            .field("dimensions", &self.dimensions)
            .finish()
    }
}

fn write_items(tx: &Transaction<'_>, items: &[KnowledgeBaseItem]) -> Result<(), OpscribeError> {
    let mut stmt = tx
        .prepare(
            "INSERT INTO knowledge_base_items
                (id, tenant_id, graph_id, entity_id, kind, content, embedding, tags, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
             ON CONFLICT (graph_id, entity_id) DO UPDATE SET
                kind = excluded.kind,
                content = excluded.content,
                embedding = excluded.embedding,
                tags = excluded.tags,
                updated_at = excluded.updated_at",
        )
        .map_err(storage_err)?;

    for item in items {
        let kind = item.kind().map(|k| k.as_str()).unwrap_or_default();
        stmt.execute(rusqlite::params![
            item.id.to_string(),
            item.tenant_id.to_string(),
            item.graph_id.to_string(),
            item.entity_id.to_string(),
            kind,
            item.content,
            encode_embedding(&item.embedding),
            serde_json::to_string(&item.tags)?,
            item.created_at.timestamp_millis(),
            item.updated_at.timestamp_millis(),
        ])
        .map_err(|e| OpscribeError::Storage(format!("Failed to save item: {}", e)))?;
    }
    Ok(())
}

fn select_items(
    conn: &Connection,
    filter: &str,
    param: &str,
) -> Result<Vec<KnowledgeBaseItem>, OpscribeError> {
    let sql = format!(
        "SELECT {} FROM knowledge_base_items {}",
        ITEM_COLUMNS, filter
    );
    let mut stmt = conn.prepare(&sql).map_err(storage_err)?;
    let rows = stmt
        .query_map(rusqlite::params![param], |row| Ok(row_to_item(row)))
        .map_err(storage_err)?;

    let mut items = Vec::new();
    for row in rows {
        items.push(row.map_err(storage_err)??);
    }
    Ok(items)
}

fn row_to_item(row: &rusqlite::Row<'_>) -> Result<KnowledgeBaseItem, OpscribeError> {
    let id: String = row.get(0).map_err(storage_err)?;
    let tenant_id: String = row.get(1).map_err(storage_err)?;
    let graph_id: String = row.get(2).map_err(storage_err)?;
    let entity_id: String = row.get(3).map_err(storage_err)?;
    let embedding: Vec<u8> = row.get(5).map_err(storage_err)?;
    let tags: String = row.get(6).map_err(storage_err)?;
    let created_at: i64 = row.get(7).map_err(storage_err)?;
    let updated_at: i64 = row.get(8).map_err(storage_err)?;

    Ok(KnowledgeBaseItem {
        id: parse_uuid(&id)?,
        tenant_id: parse_uuid(&tenant_id)?,
        graph_id: parse_uuid(&graph_id)?,
        entity_id: parse_uuid(&entity_id)?,
        content: row.get(4).map_err(storage_err)?,
        embedding: decode_embedding(&embedding)?,
        tags: serde_json::from_str(&tags)?,
        created_at: from_millis(created_at),
        updated_at: from_millis(updated_at),
    })
}
