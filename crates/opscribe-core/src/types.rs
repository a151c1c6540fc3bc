use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

/// Free-form key/value payload. Keys iterate in sorted order, which keeps
/// rendered passages stable across re-ingestion.
pub type Properties = Map<String, Value>;

// =============================================================================
// Graph-of-record
// =============================================================================

/// A tenant. Every graph belongs to exactly one client.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Client {
    pub id: Uuid,
    pub name: String,
    pub created_at: DateTime<Utc>,
}

/// An architecture graph owned by a client.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Graph {
    pub id: Uuid,
    pub client_id: Uuid,
    pub name: String,
    pub description: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl Graph {
    /// The tenant that owns this graph and everything derived from it.
    pub fn tenant_id(&self) -> Uuid {
        self.client_id
    }
}

/// A typed node (component) in a graph.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Node {
    pub id: Uuid,
    pub client_id: Uuid,
    pub graph_id: Uuid,
    /// Unique identifier within the graph.
    pub key: String,
    #[serde(rename = "type")]
    pub node_type: String,
    pub display_name: Option<String>,
    #[serde(default)]
    pub properties: Properties,
    pub created_at: DateTime<Utc>,
}

impl Node {
    /// Human-readable label: the display name, or the key when unnamed.
    pub fn label(&self) -> &str {
        match self.display_name.as_deref() {
            Some(name) if !name.trim().is_empty() => name,
            _ => &self.key,
        }
    }
}

/// A typed, directed edge (connection) between two nodes.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Edge {
    pub id: Uuid,
    pub client_id: Uuid,
    pub graph_id: Uuid,
    pub source_id: Uuid,
    pub target_id: Uuid,
    #[serde(rename = "type")]
    pub edge_type: String,
    #[serde(default)]
    pub properties: Properties,
    pub created_at: DateTime<Utc>,
}

/// A graph together with its full node and edge sets, as read at one point in time.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct GraphSnapshot {
    pub graph: Graph,
    pub nodes: Vec<Node>,
    pub edges: Vec<Edge>,
}

// =============================================================================
// Knowledge base
// =============================================================================

/// Kind of graph entity a knowledge base item was derived from.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    Node,
    Edge,
}

impl EntityKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntityKind::Node => "node",
            EntityKind::Edge => "edge",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "node" => Some(EntityKind::Node),
            "edge" => Some(EntityKind::Edge),
            _ => None,
        }
    }
}

impl std::fmt::Display for EntityKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One retrievable passage derived from a node or edge.
///
/// `tenant_id` and `graph_id` are fixed at creation. `embedding` always has
/// the store's dimension.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct KnowledgeBaseItem {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub graph_id: Uuid,
    /// Id of the source node or edge.
    pub entity_id: Uuid,
    pub content: String,
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub embedding: Vec<f32>,
    /// Always carries `kind`, plus `node_type` for nodes or `relation` for edges.
    pub tags: Properties,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl KnowledgeBaseItem {
    /// Entity kind recorded in the `kind` tag.
    pub fn kind(&self) -> Option<EntityKind> {
        self.tags
            .get("kind")
            .and_then(Value::as_str)
            .and_then(EntityKind::parse)
    }
}

/// A knowledge base item paired with its cosine distance to a query vector.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ScoredItem {
    pub item: KnowledgeBaseItem,
    /// `1 - cosine_similarity`; lower is closer.
    pub distance: f64,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_node(display_name: Option<&str>) -> Node {
        Node {
            id: Uuid::new_v4(),
            client_id: Uuid::new_v4(),
            graph_id: Uuid::new_v4(),
            key: "checkout-svc".to_string(),
            node_type: "service".to_string(),
            display_name: display_name.map(String::from),
            properties: Properties::new(),
            created_at: Utc::now(),
        }
    }

    #[test]
    fn test_node_label_prefers_display_name() {
        assert_eq!(make_node(Some("Checkout")).label(), "Checkout");
        assert_eq!(make_node(None).label(), "checkout-svc");
        assert_eq!(make_node(Some("  ")).label(), "checkout-svc");
    }

    #[test]
    fn test_node_type_serializes_as_type() {
        let json = serde_json::to_value(make_node(None)).unwrap();
        assert_eq!(json["type"], "service");
        assert!(json.get("node_type").is_none());
    }

    #[test]
    fn test_entity_kind_parse() {
        assert_eq!(EntityKind::parse("node"), Some(EntityKind::Node));
        assert_eq!(EntityKind::parse("edge"), Some(EntityKind::Edge));
        assert_eq!(EntityKind::parse("graph"), None);
        assert_eq!(EntityKind::Edge.to_string(), "edge");
    }

    #[test]
    fn test_item_kind_from_tags() {
        let mut tags = Properties::new();
        tags.insert("kind".to_string(), Value::from("edge"));
        let item = KnowledgeBaseItem {
            id: Uuid::new_v4(),
            tenant_id: Uuid::new_v4(),
            graph_id: Uuid::new_v4(),
            entity_id: Uuid::new_v4(),
            content: "Connection: A interacts with B.".to_string(),
            embedding: vec![0.0; 4],
            tags,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        };
        assert_eq!(item.kind(), Some(EntityKind::Edge));
    }

    #[test]
    fn test_graph_tenant_is_client() {
        let graph = Graph {
            id: Uuid::new_v4(),
            client_id: Uuid::new_v4(),
            name: "prod".to_string(),
            description: None,
            created_at: Utc::now(),
        };
        assert_eq!(graph.tenant_id(), graph.client_id);
    }
}
