//! Database schema migrations.
//!
//! v1 creates the graph-of-record tables (clients, graphs, nodes, edges).
//! v2 adds the knowledge base and its store metadata.

use rusqlite::Connection;
use tracing::info;

use opscribe_core::error::OpscribeError;

/// Run all pending database migrations.
pub fn run_migrations(conn: &Connection) -> Result<(), OpscribeError> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS schema_migrations (
            version     INTEGER PRIMARY KEY NOT NULL,
            name        TEXT NOT NULL,
            applied_at  INTEGER NOT NULL DEFAULT (strftime('%s', 'now'))
        );",
    )
    .map_err(|e| OpscribeError::Storage(format!("Failed to create migrations table: {}", e)))?;

    let current_version: i64 = conn
        .query_row(
            "SELECT COALESCE(MAX(version), 0) FROM schema_migrations",
            [],
            |row| row.get(0),
        )
        .map_err(|e| OpscribeError::Storage(format!("Failed to query migration version: {}", e)))?;

    if current_version < 1 {
        apply_v1(conn)?;
        info!("Applied migration v1: graph_of_record");
    }
    if current_version < 2 {
        apply_v2(conn)?;
        info!("Applied migration v2: knowledge_base");
    }

    Ok(())
}

/// Version 1: clients, graphs, nodes, edges.
///
/// Endpoint columns on `edges` carry no foreign key: dangling endpoints are
/// tolerated in the graph of record and skipped at ingestion time.
fn apply_v1(conn: &Connection) -> Result<(), OpscribeError> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS clients (
            id              TEXT PRIMARY KEY NOT NULL,
            name            TEXT NOT NULL,
            created_at      INTEGER NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_clients_name ON clients (name);

        CREATE TABLE IF NOT EXISTS graphs (
            id              TEXT PRIMARY KEY NOT NULL,
            client_id       TEXT NOT NULL,
            name            TEXT NOT NULL,
            description     TEXT,
            created_at      INTEGER NOT NULL,
            FOREIGN KEY (client_id) REFERENCES clients(id) ON DELETE CASCADE
        );

        CREATE INDEX IF NOT EXISTS idx_graphs_client ON graphs (client_id);

        CREATE TABLE IF NOT EXISTS nodes (
            seq             INTEGER PRIMARY KEY AUTOINCREMENT,
            id              TEXT NOT NULL UNIQUE,
            client_id       TEXT NOT NULL,
            graph_id        TEXT NOT NULL,
            key             TEXT NOT NULL,
            node_type       TEXT NOT NULL,
            display_name    TEXT,
            properties      TEXT NOT NULL DEFAULT '{}',
            created_at      INTEGER NOT NULL,
            UNIQUE (client_id, graph_id, key),
            FOREIGN KEY (client_id) REFERENCES clients(id) ON DELETE CASCADE,
            FOREIGN KEY (graph_id) REFERENCES graphs(id) ON DELETE CASCADE
        );

        CREATE INDEX IF NOT EXISTS idx_nodes_graph ON nodes (graph_id, seq);

        CREATE INDEX IF NOT EXISTS idx_nodes_client_type ON nodes (client_id, node_type);

        CREATE TABLE IF NOT EXISTS edges (
            seq             INTEGER PRIMARY KEY AUTOINCREMENT,
            id              TEXT NOT NULL UNIQUE,
            client_id       TEXT NOT NULL,
            graph_id        TEXT NOT NULL,
            source_id       TEXT NOT NULL,
            target_id       TEXT NOT NULL,
            edge_type       TEXT NOT NULL,
            properties      TEXT NOT NULL DEFAULT '{}',
            created_at      INTEGER NOT NULL,
            FOREIGN KEY (client_id) REFERENCES clients(id) ON DELETE CASCADE,
            FOREIGN KEY (graph_id) REFERENCES graphs(id) ON DELETE CASCADE
        );

        CREATE INDEX IF NOT EXISTS idx_edges_graph ON edges (graph_id, seq);

        CREATE INDEX IF NOT EXISTS idx_edges_graph_source ON edges (client_id, graph_id, source_id);

        CREATE INDEX IF NOT EXISTS idx_edges_graph_target ON edges (client_id, graph_id, target_id);

        INSERT OR IGNORE INTO schema_migrations (version, name) VALUES (1, 'graph_of_record');
        ",
    )
    .map_err(|e| OpscribeError::Storage(format!("Failed to apply migration v1: {}", e)))?;

    Ok(())
}

/// Version 2: knowledge base items and store metadata.
fn apply_v2(conn: &Connection) -> Result<(), OpscribeError> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS knowledge_base_items (
            seq             INTEGER PRIMARY KEY AUTOINCREMENT,
            id              TEXT NOT NULL UNIQUE,
            tenant_id       TEXT NOT NULL,
            graph_id        TEXT NOT NULL,
            entity_id       TEXT NOT NULL,
            kind            TEXT NOT NULL CHECK (kind IN ('node', 'edge')),
            content         TEXT NOT NULL,
            embedding       BLOB NOT NULL,
            tags            TEXT NOT NULL DEFAULT '{}',
            created_at      INTEGER NOT NULL,
            updated_at      INTEGER NOT NULL,
            UNIQUE (graph_id, entity_id)
        );

        CREATE INDEX IF NOT EXISTS idx_kb_tenant ON knowledge_base_items (tenant_id, seq);

        CREATE INDEX IF NOT EXISTS idx_kb_graph ON knowledge_base_items (graph_id);

        CREATE TABLE IF NOT EXISTS store_meta (
            key             TEXT PRIMARY KEY NOT NULL,
            value           TEXT NOT NULL
        );

        INSERT OR IGNORE INTO schema_migrations (version, name) VALUES (2, 'knowledge_base');
        ",
    )
    .map_err(|e| OpscribeError::Storage(format!("Failed to apply migration v2: {}", e)))?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn open_test_conn() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch("PRAGMA foreign_keys = ON;").unwrap();
        conn
    }

    #[test]
    fn test_migrations_run_once() {
        let conn = open_test_conn();
        run_migrations(&conn).unwrap();
        run_migrations(&conn).unwrap();

        let count: i64 = conn
            .query_row("SELECT COUNT(*) FROM schema_migrations", [], |row| row.get(0))
            .unwrap();
        assert_eq!(count, 2);
    }

    #[test]
    fn test_node_key_unique_per_graph() {
        let conn = open_test_conn();
        run_migrations(&conn).unwrap();

        conn.execute_batch(
            "INSERT INTO clients (id, name, created_at) VALUES ('c1', 'Acme', 0);
             INSERT INTO graphs (id, client_id, name, created_at) VALUES ('g1', 'c1', 'prod', 0);
             INSERT INTO nodes (id, client_id, graph_id, key, node_type, created_at)
                 VALUES ('n1', 'c1', 'g1', 'checkout', 'service', 0);",
        )
        .unwrap();

        let result = conn.execute(
            "INSERT INTO nodes (id, client_id, graph_id, key, node_type, created_at)
             VALUES ('n2', 'c1', 'g1', 'checkout', 'service', 0)",
            [],
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_graph_requires_client() {
        let conn = open_test_conn();
        run_migrations(&conn).unwrap();

        let result = conn.execute(
            "INSERT INTO graphs (id, client_id, name, created_at) VALUES ('g1', 'missing', 'x', 0)",
            [],
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_knowledge_item_kind_check() {
        let conn = open_test_conn();
        run_migrations(&conn).unwrap();

        let result = conn.execute(
            "INSERT INTO knowledge_base_items
                (id, tenant_id, graph_id, entity_id, kind, content, embedding, created_at, updated_at)
             VALUES ('i1', 't', 'g', 'e', 'cluster', 'x', x'00', 0, 0)",
            [],
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_knowledge_item_unique_per_entity() {
        let conn = open_test_conn();
        run_migrations(&conn).unwrap();

        let insert = "INSERT INTO knowledge_base_items
                (id, tenant_id, graph_id, entity_id, kind, content, embedding, created_at, updated_at)
             VALUES (?1, 't', 'g', 'e', 'node', 'x', x'00', 0, 0)";
        conn.execute(insert, ["i1"]).unwrap();
        assert!(conn.execute(insert, ["i2"]).is_err());
    }
}
