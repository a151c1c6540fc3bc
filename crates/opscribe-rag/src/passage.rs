//! Passage formatting.
//!
//! Renders one graph entity into deterministic text plus a tag set. The same
//! entity always renders to the same passage, so re-ingestion is idempotent
//! in content.

use std::collections::HashMap;

use serde_json::Value;
use thiserror::Error;
use uuid::Uuid;

use opscribe_core::types::{Edge, EntityKind, Node, Properties};

/// Text rendering of one node or edge, ready to embed.
#[derive(Debug, Clone, PartialEq)]
pub struct Passage {
    pub entity_id: Uuid,
    pub kind: EntityKind,
    pub content: String,
    pub tags: Properties,
}

/// An edge endpoint that is not among the graph's nodes.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("edge {edge_id} references unresolved node {node_id}")]
pub struct UnresolvedEndpoint {
    pub edge_id: Uuid,
    pub node_id: Uuid,
}

/// `Component: <label> (<type>).` followed by ` Configuration: <payload>.`
/// when the node has properties.
pub fn format_node(node: &Node) -> Passage {
    let mut content = format!("Component: {} ({}).", node.label(), node.node_type);
    if let Some(payload) = render_payload(&node.properties) {
        content.push_str(&format!(" Configuration: {}.", payload));
    }

    let mut tags = Properties::new();
    tags.insert("kind".to_string(), Value::from(EntityKind::Node.as_str()));
    tags.insert("type".to_string(), Value::from(node.node_type.as_str()));
    tags.insert("node_type".to_string(), Value::from(node.node_type.as_str()));

    Passage {
        entity_id: node.id,
        kind: EntityKind::Node,
        content,
        tags,
    }
}

/// `Connection: <source> interacts with <target>. Type: <type>.` followed by
/// ` Details: <payload>.` when the edge has properties.
///
/// Both endpoints must be present in `nodes`.
pub fn format_edge(
    edge: &Edge,
    nodes: &HashMap<Uuid, &Node>,
) -> Result<Passage, UnresolvedEndpoint> {
    let resolve = |node_id: Uuid| {
        nodes.get(&node_id).copied().ok_or(UnresolvedEndpoint {
            edge_id: edge.id,
            node_id,
        })
    };
    let source = resolve(edge.source_id)?;
    let target = resolve(edge.target_id)?;

    let mut content = format!(
        "Connection: {} interacts with {}. Type: {}.",
        source.label(),
        target.label(),
        edge.edge_type
    );
    if let Some(payload) = render_payload(&edge.properties) {
        content.push_str(&format!(" Details: {}.", payload));
    }

    let mut tags = Properties::new();
    tags.insert("kind".to_string(), Value::from(EntityKind::Edge.as_str()));
    tags.insert("type".to_string(), Value::from(edge.edge_type.as_str()));
    tags.insert("relation".to_string(), Value::from(edge.edge_type.as_str()));

    Ok(Passage {
        entity_id: edge.id,
        kind: EntityKind::Edge,
        content,
        tags,
    })
}

/// `key: value` pairs in key order, joined by `, `. Strings are written
/// bare; every other value as compact JSON. `None` for an empty payload.
fn render_payload(properties: &Properties) -> Option<String> {
    if properties.is_empty() {
        return None;
    }

    let mut entries: Vec<(&String, &Value)> = properties.iter().collect();
    entries.sort_by(|a, b| a.0.cmp(b.0));

    let rendered: Vec<String> = entries
        .into_iter()
        .map(|(key, value)| match value {
            Value::String(s) => format!("{}: {}", key, s),
            other => format!("{}: {}", key, other),
        })
        .collect();
    Some(rendered.join(", "))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use serde_json::json;

    fn node(key: &str, node_type: &str, display_name: Option<&str>) -> Node {
        Node {
            id: Uuid::new_v4(),
            client_id: Uuid::nil(),
            graph_id: Uuid::nil(),
            key: key.to_string(),
            node_type: node_type.to_string(),
            display_name: display_name.map(String::from),
            properties: Properties::new(),
            created_at: Utc::now(),
        }
    }

    fn edge(source: &Node, target: &Node, edge_type: &str) -> Edge {
        Edge {
            id: Uuid::new_v4(),
            client_id: Uuid::nil(),
            graph_id: Uuid::nil(),
            source_id: source.id,
            target_id: target.id,
            edge_type: edge_type.to_string(),
            properties: Properties::new(),
            created_at: Utc::now(),
        }
    }

    fn props(value: Value) -> Properties {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn test_node_without_payload() {
        let n = node("checkout", "service", Some("Checkout"));
        let passage = format_node(&n);
        assert_eq!(passage.content, "Component: Checkout (service).");
        assert_eq!(passage.entity_id, n.id);
        assert_eq!(passage.kind, EntityKind::Node);
        assert_eq!(passage.tags["kind"], "node");
        assert_eq!(passage.tags["node_type"], "service");
        assert_eq!(passage.tags["type"], "service");
    }

    #[test]
    fn test_node_label_falls_back_to_key() {
        let passage = format_node(&node("orders-db", "database", None));
        assert_eq!(passage.content, "Component: orders-db (database).");
    }

    #[test]
    fn test_node_payload_is_sorted_and_unquoted() {
        let mut n = node("checkout", "service", Some("Checkout"));
        n.properties = props(json!({
            "replicas": 3,
            "image": "checkout:1.4",
            "ports": [80, 443],
            "env": {"TIER": "web"}
        }));
        let passage = format_node(&n);
        assert_eq!(
            passage.content,
            "Component: Checkout (service). Configuration: env: {\"TIER\":\"web\"}, \
             image: checkout:1.4, ports: [80,443], replicas: 3."
        );
    }

    #[test]
    fn test_rendering_is_deterministic() {
        let mut n = node("cache", "redis", None);
        n.properties = props(json!({"b": 2, "a": 1, "c": null}));
        let first = format_node(&n).content;
        for _ in 0..5 {
            assert_eq!(format_node(&n).content, first);
        }
        assert!(first.ends_with("Configuration: a: 1, b: 2, c: null."));
    }

    #[test]
    fn test_edge_passage() {
        let a = node("checkout", "service", Some("Checkout"));
        let b = node("orders-db", "database", Some("Orders DB"));
        let e = edge(&a, &b, "stores_in");
        let nodes: HashMap<Uuid, &Node> = [(a.id, &a), (b.id, &b)].into_iter().collect();

        let passage = format_edge(&e, &nodes).unwrap();
        assert_eq!(
            passage.content,
            "Connection: Checkout interacts with Orders DB. Type: stores_in."
        );
        assert_eq!(passage.kind, EntityKind::Edge);
        assert_eq!(passage.tags["kind"], "edge");
        assert_eq!(passage.tags["relation"], "stores_in");
    }

    #[test]
    fn test_edge_with_details() {
        let a = node("api", "service", None);
        let b = node("queue", "sqs", None);
        let mut e = edge(&a, &b, "publishes_to");
        e.properties = props(json!({"protocol": "https"}));
        let nodes: HashMap<Uuid, &Node> = [(a.id, &a), (b.id, &b)].into_iter().collect();

        let passage = format_edge(&e, &nodes).unwrap();
        assert_eq!(
            passage.content,
            "Connection: api interacts with queue. Type: publishes_to. Details: protocol: https."
        );
    }

    #[test]
    fn test_edge_with_missing_endpoint() {
        let a = node("api", "service", None);
        let gone = node("gone", "service", None);
        let e = edge(&a, &gone, "calls");
        let nodes: HashMap<Uuid, &Node> = [(a.id, &a)].into_iter().collect();

        let err = format_edge(&e, &nodes).unwrap_err();
        assert_eq!(
            err,
            UnresolvedEndpoint {
                edge_id: e.id,
                node_id: gone.id
            }
        );
    }
}
