//! Graph-of-record repository.
//!
//! Create/read/delete access to clients, graphs, nodes and edges. The
//! ingestion pipeline only needs [`GraphRepository::load_snapshot`]; the
//! rest backs the graph-of-record endpoints of the API.

use std::sync::Arc;

use rusqlite::{Connection, OptionalExtension};
use tracing::debug;
use uuid::Uuid;

use opscribe_core::error::OpscribeError;
use opscribe_core::types::{Client, Edge, Graph, GraphSnapshot, Node, Properties};

use crate::db::{from_millis, now_millis, parse_uuid, storage_err, Database};

/// Fields supplied when creating a node.
#[derive(Debug, Clone, Default)]
pub struct NewNode {
    pub key: String,
    pub node_type: String,
    pub display_name: Option<String>,
    pub properties: Properties,
}

/// Fields supplied when creating an edge.
#[derive(Debug, Clone)]
pub struct NewEdge {
    pub source_id: Uuid,
    pub target_id: Uuid,
    pub edge_type: String,
    pub properties: Properties,
}

/// Repository for the graph of record.
pub struct GraphRepository {
    db: Arc<Database>,
}

impl GraphRepository {
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    /// Create a client (tenant).
    pub fn create_client(&self, name: &str) -> Result<Client, OpscribeError> {
        let name = name.trim();
        if name.is_empty() {
            return Err(OpscribeError::InvalidArgument(
                "client name must not be empty".to_string(),
            ));
        }

        let client = Client {
            id: Uuid::new_v4(),
            name: name.to_string(),
            created_at: now_millis(),
        };

        self.db.with_conn(|conn| {
            conn.execute(
                "INSERT INTO clients (id, name, created_at) VALUES (?1, ?2, ?3)",
                rusqlite::params![
                    client.id.to_string(),
                    client.name,
                    client.created_at.timestamp_millis(),
                ],
            )
            .map_err(|e| OpscribeError::Storage(format!("Failed to save client: {}", e)))?;
            Ok(())
        })?;

        debug!(client_id = %client.id, "Created client");
        Ok(client)
    }

    pub fn get_client(&self, id: Uuid) -> Result<Option<Client>, OpscribeError> {
        self.db.with_conn(|conn| query_client(conn, id))
    }

    /// Create a graph owned by an existing client.
    pub fn create_graph(
        &self,
        client_id: Uuid,
        name: &str,
        description: Option<&str>,
    ) -> Result<Graph, OpscribeError> {
        let name = name.trim();
        if name.is_empty() {
            return Err(OpscribeError::InvalidArgument(
                "graph name must not be empty".to_string(),
            ));
        }

        let graph = Graph {
            id: Uuid::new_v4(),
            client_id,
            name: name.to_string(),
            description: description.map(String::from),
            created_at: now_millis(),
        };

        self.db.with_conn(|conn| {
            if query_client(conn, client_id)?.is_none() {
                return Err(OpscribeError::NotFound(format!("client {}", client_id)));
            }
            conn.execute(
                "INSERT INTO graphs (id, client_id, name, description, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                rusqlite::params![
                    graph.id.to_string(),
                    graph.client_id.to_string(),
                    graph.name,
                    graph.description,
                    graph.created_at.timestamp_millis(),
                ],
            )
            .map_err(|e| OpscribeError::Storage(format!("Failed to save graph: {}", e)))?;
            Ok(())
        })?;

        debug!(graph_id = %graph.id, client_id = %client_id, "Created graph");
        Ok(graph)
    }

    pub fn get_graph(&self, id: Uuid) -> Result<Option<Graph>, OpscribeError> {
        self.db.with_conn(|conn| query_graph(conn, id))
    }

    /// Add a node to a graph. Keys are unique within the graph.
    pub fn create_node(&self, graph_id: Uuid, new: NewNode) -> Result<Node, OpscribeError> {
        if new.key.trim().is_empty() {
            return Err(OpscribeError::InvalidArgument(
                "node key must not be empty".to_string(),
            ));
        }
        if new.node_type.trim().is_empty() {
            return Err(OpscribeError::InvalidArgument(
                "node type must not be empty".to_string(),
            ));
        }

        self.db.with_conn(|conn| {
            let graph = query_graph(conn, graph_id)?
                .ok_or_else(|| OpscribeError::NotFound(format!("graph {}", graph_id)))?;

            let taken: bool = conn
                .query_row(
                    "SELECT EXISTS(SELECT 1 FROM nodes WHERE graph_id = ?1 AND key = ?2)",
                    rusqlite::params![graph_id.to_string(), new.key],
                    |row| row.get(0),
                )
                .map_err(storage_err)?;
            if taken {
                return Err(OpscribeError::Conflict(format!(
                    "node key '{}' already exists in graph {}",
                    new.key, graph_id
                )));
            }

            let node = Node {
                id: Uuid::new_v4(),
                client_id: graph.client_id,
                graph_id,
                key: new.key,
                node_type: new.node_type,
                display_name: new.display_name,
                properties: new.properties,
                created_at: now_millis(),
            };

            conn.execute(
                "INSERT INTO nodes (id, client_id, graph_id, key, node_type, display_name, properties, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                rusqlite::params![
                    node.id.to_string(),
                    node.client_id.to_string(),
                    node.graph_id.to_string(),
                    node.key,
                    node.node_type,
                    node.display_name,
                    serde_json::to_string(&node.properties)?,
                    node.created_at.timestamp_millis(),
                ],
            )
            .map_err(|e| OpscribeError::Storage(format!("Failed to save node: {}", e)))?;
            Ok(node)
        })
    }

    /// Add an edge between two nodes of the same graph.
    pub fn create_edge(&self, graph_id: Uuid, new: NewEdge) -> Result<Edge, OpscribeError> {
        if new.edge_type.trim().is_empty() {
            return Err(OpscribeError::InvalidArgument(
                "edge type must not be empty".to_string(),
            ));
        }

        self.db.with_conn(|conn| {
            let graph = query_graph(conn, graph_id)?
                .ok_or_else(|| OpscribeError::NotFound(format!("graph {}", graph_id)))?;

            for endpoint in [new.source_id, new.target_id] {
                match query_node(conn, endpoint)? {
                    Some(node) if node.graph_id == graph_id => {}
                    _ => {
                        return Err(OpscribeError::InvalidArgument(format!(
                            "node {} does not belong to graph {}",
                            endpoint, graph_id
                        )))
                    }
                }
            }

            let edge = Edge {
                id: Uuid::new_v4(),
                client_id: graph.client_id,
                graph_id,
                source_id: new.source_id,
                target_id: new.target_id,
                edge_type: new.edge_type,
                properties: new.properties,
                created_at: now_millis(),
            };

            conn.execute(
                "INSERT INTO edges (id, client_id, graph_id, source_id, target_id, edge_type, properties, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                rusqlite::params![
                    edge.id.to_string(),
                    edge.client_id.to_string(),
                    edge.graph_id.to_string(),
                    edge.source_id.to_string(),
                    edge.target_id.to_string(),
                    edge.edge_type,
                    serde_json::to_string(&edge.properties)?,
                    edge.created_at.timestamp_millis(),
                ],
            )
            .map_err(|e| OpscribeError::Storage(format!("Failed to save edge: {}", e)))?;
            Ok(edge)
        })
    }

    pub fn get_node(&self, id: Uuid) -> Result<Option<Node>, OpscribeError> {
        self.db.with_conn(|conn| query_node(conn, id))
    }

    /// Delete a node. Edges that reference it are left in place and become
    /// dangling; ingestion skips them.
    pub fn delete_node(&self, id: Uuid) -> Result<bool, OpscribeError> {
        self.db.with_conn(|conn| {
            let deleted = conn
                .execute(
                    "DELETE FROM nodes WHERE id = ?1",
                    rusqlite::params![id.to_string()],
                )
                .map_err(|e| OpscribeError::Storage(format!("Failed to delete node: {}", e)))?;
            Ok(deleted > 0)
        })
    }

    pub fn get_edge(&self, id: Uuid) -> Result<Option<Edge>, OpscribeError> {
        self.db.with_conn(|conn| query_edge(conn, id))
    }

    pub fn delete_edge(&self, id: Uuid) -> Result<bool, OpscribeError> {
        self.db.with_conn(|conn| {
            let deleted = conn
                .execute(
                    "DELETE FROM edges WHERE id = ?1",
                    rusqlite::params![id.to_string()],
                )
                .map_err(|e| OpscribeError::Storage(format!("Failed to delete edge: {}", e)))?;
            Ok(deleted > 0)
        })
    }

    /// Delete a graph together with its nodes, edges and knowledge base
    /// items in one transaction.
    pub fn delete_graph(&self, id: Uuid) -> Result<bool, OpscribeError> {
        let (deleted, items_removed) = self.db.with_conn_mut(|conn| {
            let tx = conn.transaction().map_err(storage_err)?;
            let items_removed = tx
                .execute(
                    "DELETE FROM knowledge_base_items WHERE graph_id = ?1",
                    rusqlite::params![id.to_string()],
                )
                .map_err(storage_err)?;
            let deleted = tx
                .execute(
                    "DELETE FROM graphs WHERE id = ?1",
                    rusqlite::params![id.to_string()],
                )
                .map_err(|e| OpscribeError::Storage(format!("Failed to delete graph: {}", e)))?;
            tx.commit().map_err(storage_err)?;
            Ok((deleted > 0, items_removed))
        })?;

        if deleted {
            debug!(graph_id = %id, items_removed, "Deleted graph");
        }
        Ok(deleted)
    }

    /// Read a graph with its full node and edge sets under one lock, so the
    /// three reads observe the same state.
    pub fn load_snapshot(&self, graph_id: Uuid) -> Result<GraphSnapshot, OpscribeError> {
        self.db.with_conn(|conn| {
            let graph = query_graph(conn, graph_id)?
                .ok_or_else(|| OpscribeError::NotFound(format!("graph {}", graph_id)))?;
            let nodes = query_nodes(conn, graph_id)?;
            let edges = query_edges(conn, graph_id)?;
            Ok(GraphSnapshot {
                graph,
                nodes,
                edges,
            })
        })
    }
}

fn query_client(conn: &Connection, id: Uuid) -> Result<Option<Client>, OpscribeError> {
    let row = conn
        .query_row(
            "SELECT id, name, created_at FROM clients WHERE id = ?1",
            rusqlite::params![id.to_string()],
            |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, i64>(2)?,
                ))
            },
        )
        .optional()
        .map_err(storage_err)?;

    match row {
        Some((id, name, created_at)) => Ok(Some(Client {
            id: parse_uuid(&id)?,
            name,
            created_at: from_millis(created_at),
        })),
        None => Ok(None),
    }
}

fn query_graph(conn: &Connection, id: Uuid) -> Result<Option<Graph>, OpscribeError> {
    let result = conn
        .query_row(
            "SELECT id, client_id, name, description, created_at FROM graphs WHERE id = ?1",
            rusqlite::params![id.to_string()],
            |row| Ok(row_to_graph(row)),
        )
        .optional()
        .map_err(storage_err)?;

    match result {
        Some(graph) => Ok(Some(graph?)),
        None => Ok(None),
    }
}

const NODE_COLUMNS: &str =
    "id, client_id, graph_id, key, node_type, display_name, properties, created_at";

const EDGE_COLUMNS: &str =
    "id, client_id, graph_id, source_id, target_id, edge_type, properties, created_at";

fn query_node(conn: &Connection, id: Uuid) -> Result<Option<Node>, OpscribeError> {
    let sql = format!("SELECT {} FROM nodes WHERE id = ?1", NODE_COLUMNS);
    let result = conn
        .query_row(&sql, rusqlite::params![id.to_string()], |row| {
            Ok(row_to_node(row))
        })
        .optional()
        .map_err(storage_err)?;

    match result {
        Some(node) => Ok(Some(node?)),
        None => Ok(None),
    }
}

fn query_edge(conn: &Connection, id: Uuid) -> Result<Option<Edge>, OpscribeError> {
    let sql = format!("SELECT {} FROM edges WHERE id = ?1", EDGE_COLUMNS);
    let result = conn
        .query_row(&sql, rusqlite::params![id.to_string()], |row| {
            Ok(row_to_edge(row))
        })
        .optional()
        .map_err(storage_err)?;

    match result {
        Some(edge) => Ok(Some(edge?)),
        None => Ok(None),
    }
}

fn query_nodes(conn: &Connection, graph_id: Uuid) -> Result<Vec<Node>, OpscribeError> {
    let sql = format!(
        "SELECT {} FROM nodes WHERE graph_id = ?1 ORDER BY seq",
        NODE_COLUMNS
    );
    let mut stmt = conn.prepare(&sql).map_err(storage_err)?;
    let rows = stmt
        .query_map(rusqlite::params![graph_id.to_string()], |row| {
            Ok(row_to_node(row))
        })
        .map_err(storage_err)?;

    let mut nodes = Vec::new();
    for row in rows {
        nodes.push(row.map_err(storage_err)??);
    }
    Ok(nodes)
}

fn query_edges(conn: &Connection, graph_id: Uuid) -> Result<Vec<Edge>, OpscribeError> {
    let sql = format!(
        "SELECT {} FROM edges WHERE graph_id = ?1 ORDER BY seq",
        EDGE_COLUMNS
    );
    let mut stmt = conn.prepare(&sql).map_err(storage_err)?;
    let rows = stmt
        .query_map(rusqlite::params![graph_id.to_string()], |row| {
            Ok(row_to_edge(row))
        })
        .map_err(storage_err)?;

    let mut edges = Vec::new();
    for row in rows {
        edges.push(row.map_err(storage_err)??);
    }
    Ok(edges)
}

fn row_to_graph(row: &rusqlite::Row<'_>) -> Result<Graph, OpscribeError> {
    let id: String = row.get(0).map_err(storage_err)?;
    let client_id: String = row.get(1).map_err(storage_err)?;
    let created_at: i64 = row.get(4).map_err(storage_err)?;

    Ok(Graph {
        id: parse_uuid(&id)?,
        client_id: parse_uuid(&client_id)?,
        name: row.get(2).map_err(storage_err)?,
        description: row.get(3).map_err(storage_err)?,
        created_at: from_millis(created_at),
    })
}

fn row_to_node(row: &rusqlite::Row<'_>) -> Result<Node, OpscribeError> {
    let id: String = row.get(0).map_err(storage_err)?;
    let client_id: String = row.get(1).map_err(storage_err)?;
    let graph_id: String = row.get(2).map_err(storage_err)?;
    let properties: String = row.get(6).map_err(storage_err)?;
    let created_at: i64 = row.get(7).map_err(storage_err)?;

    Ok(Node {
        id: parse_uuid(&id)?,
        client_id: parse_uuid(&client_id)?,
        graph_id: parse_uuid(&graph_id)?,
        key: row.get(3).map_err(storage_err)?,
        node_type: row.get(4).map_err(storage_err)?,
        display_name: row.get(5).map_err(storage_err)?,
        properties: serde_json::from_str(&properties)?,
        created_at: from_millis(created_at),
    })
}

fn row_to_edge(row: &rusqlite::Row<'_>) -> Result<Edge, OpscribeError> {
    let id: String = row.get(0).map_err(storage_err)?;
    let client_id: String = row.get(1).map_err(storage_err)?;
    let graph_id: String = row.get(2).map_err(storage_err)?;
    let source_id: String = row.get(3).map_err(storage_err)?;
    let target_id: String = row.get(4).map_err(storage_err)?;
    let properties: String = row.get(6).map_err(storage_err)?;
    let created_at: i64 = row.get(7).map_err(storage_err)?;

    Ok(Edge {
        id: parse_uuid(&id)?,
        client_id: parse_uuid(&client_id)?,
        graph_id: parse_uuid(&graph_id)?,
        source_id: parse_uuid(&source_id)?,
        target_id: parse_uuid(&target_id)?,
        edge_type: row.get(5).map_err(storage_err)?,
        properties: serde_json::from_str(&properties)?,
        created_at: from_millis(created_at),
    })
}
