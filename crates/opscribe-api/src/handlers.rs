//! Route handler functions for all API endpoints.
//!
//! Each handler extracts query/path parameters via axum extractors,
//! calls into the AppState services, and returns JSON responses.

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::Json;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use opscribe_core::types::{Client, Edge, Graph, GraphSnapshot, Node, Properties};
use opscribe_rag::IngestReport;
use opscribe_storage::{NewEdge, NewNode};

use crate::error::ApiError;
use crate::state::AppState;

// =============================================================================
// Request types
// =============================================================================

#[derive(Debug, Deserialize)]
pub struct CreateClientRequest {
    pub name: String,
}

#[derive(Debug, Deserialize)]
pub struct CreateGraphRequest {
    pub client_id: Uuid,
    pub name: String,
    pub description: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct CreateNodeRequest {
    pub key: String,
    #[serde(rename = "type")]
    pub node_type: String,
    pub display_name: Option<String>,
    #[serde(default)]
    pub properties: Properties,
}

#[derive(Debug, Deserialize)]
pub struct CreateEdgeRequest {
    pub source_id: Uuid,
    pub target_id: Uuid,
    #[serde(rename = "type")]
    pub edge_type: String,
    #[serde(default)]
    pub properties: Properties,
}

/// Query parameters for `/retrieve`.
///
/// `tenant_id` and `limit` arrive as raw strings so malformed input becomes
/// a JSON 400 instead of an extractor rejection.
#[derive(Debug, Deserialize)]
pub struct RetrieveParams {
    pub q: Option<String>,
    pub tenant_id: Option<String>,
    pub limit: Option<String>,
}

// =============================================================================
// Response types
// =============================================================================

#[derive(Debug, Serialize, Deserialize)]
pub struct RetrievedItem {
    pub id: Uuid,
    pub graph_id: Uuid,
    pub entity_id: Uuid,
    pub content: String,
    pub tags: Properties,
    pub distance: f64,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct RetrieveResponse {
    pub results: Vec<RetrievedItem>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub uptime_secs: u64,
    pub indexed_items: u64,
}

// =============================================================================
// Graph-of-record handlers
// =============================================================================

/// POST /clients
pub async fn create_client(
    State(state): State<AppState>,
    Json(body): Json<CreateClientRequest>,
) -> Result<(StatusCode, Json<Client>), ApiError> {
    let client = state.graphs.create_client(&body.name)?;
    Ok((StatusCode::CREATED, Json(client)))
}

/// POST /graphs
pub async fn create_graph(
    State(state): State<AppState>,
    Json(body): Json<CreateGraphRequest>,
) -> Result<(StatusCode, Json<Graph>), ApiError> {
    let graph =
        state
            .graphs
            .create_graph(body.client_id, &body.name, body.description.as_deref())?;
    Ok((StatusCode::CREATED, Json(graph)))
}

/// GET /clients/{id}
pub async fn get_client(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<Client>, ApiError> {
    state
        .graphs
        .get_client(id)?
        .map(Json)
        .ok_or_else(|| ApiError::NotFound(format!("Client {} not found", id)))
}

/// GET /graphs/{id} - the graph with all of its nodes and edges.
pub async fn get_graph(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<GraphSnapshot>, ApiError> {
    Ok(Json(state.graphs.load_snapshot(id)?))
}

/// DELETE /graphs/{id} - the graph, its nodes, edges and indexed items.
pub async fn delete_graph(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, ApiError> {
    let deleted = state
        .ingestor
        .with_graph_locked(id, || state.graphs.delete_graph(id))
        .await?;
    if !deleted {
        return Err(ApiError::NotFound(format!("Graph {} not found", id)));
    }
    Ok(StatusCode::NO_CONTENT)
}

/// POST /graphs/{id}/nodes
pub async fn create_node(
    State(state): State<AppState>,
    Path(graph_id): Path<Uuid>,
    Json(body): Json<CreateNodeRequest>,
) -> Result<(StatusCode, Json<Node>), ApiError> {
    let node = state.graphs.create_node(
        graph_id,
        NewNode {
            key: body.key,
            node_type: body.node_type,
            display_name: body.display_name,
            properties: body.properties,
        },
    )?;
    Ok((StatusCode::CREATED, Json(node)))
}

/// POST /graphs/{id}/edges
pub async fn create_edge(
    State(state): State<AppState>,
    Path(graph_id): Path<Uuid>,
    Json(body): Json<CreateEdgeRequest>,
) -> Result<(StatusCode, Json<Edge>), ApiError> {
    let edge = state.graphs.create_edge(
        graph_id,
        NewEdge {
            source_id: body.source_id,
            target_id: body.target_id,
            edge_type: body.edge_type,
            properties: body.properties,
        },
    )?;
    Ok((StatusCode::CREATED, Json(edge)))
}

/// GET /nodes/{id}
pub async fn get_node(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<Node>, ApiError> {
    state
        .graphs
        .get_node(id)?
        .map(Json)
        .ok_or_else(|| ApiError::NotFound(format!("Node {} not found", id)))
}

/// DELETE /nodes/{id} - edges touching the node stay until re-ingestion
/// skips them.
pub async fn delete_node(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, ApiError> {
    if !state.graphs.delete_node(id)? {
        return Err(ApiError::NotFound(format!("Node {} not found", id)));
    }
    Ok(StatusCode::NO_CONTENT)
}

/// GET /edges/{id}
pub async fn get_edge(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<Edge>, ApiError> {
    state
        .graphs
        .get_edge(id)?
        .map(Json)
        .ok_or_else(|| ApiError::NotFound(format!("Edge {} not found", id)))
}

/// DELETE /edges/{id}
pub async fn delete_edge(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, ApiError> {
    if !state.graphs.delete_edge(id)? {
        return Err(ApiError::NotFound(format!("Edge {} not found", id)));
    }
    Ok(StatusCode::NO_CONTENT)
}

// =============================================================================
// Knowledge base handlers
// =============================================================================

/// POST /graphs/{id}/ingest - rebuild the graph's knowledge base items.
pub async fn ingest_graph(
    State(state): State<AppState>,
    Path(graph_id): Path<Uuid>,
) -> Result<Json<IngestReport>, ApiError> {
    let report = state.ingestor.ingest_graph(graph_id).await?;
    Ok(Json(report))
}

/// GET /retrieve?q=...&tenant_id=...&limit=...
pub async fn retrieve(
    State(state): State<AppState>,
    Query(params): Query<RetrieveParams>,
) -> Result<Json<RetrieveResponse>, ApiError> {
    let q = params
        .q
        .ok_or_else(|| ApiError::BadRequest("Parameter 'q' is required".to_string()))?;

    let tenant_id = params
        .tenant_id
        .ok_or_else(|| ApiError::BadRequest("Parameter 'tenant_id' is required".to_string()))?;
    let tenant_id = Uuid::parse_str(tenant_id.trim()).map_err(|_| {
        ApiError::BadRequest(format!("Invalid tenant_id '{}': expected a UUID", tenant_id))
    })?;

    let limit = match params.limit {
        None => state.config.retrieval.default_limit,
        Some(raw) => parse_limit(&raw)?,
    };

    let scored = state.retriever.retrieve_scored(&q, tenant_id, limit).await?;
    let results = scored
        .into_iter()
        .map(|s| RetrievedItem {
            id: s.item.id,
            graph_id: s.item.graph_id,
            entity_id: s.item.entity_id,
            content: s.item.content,
            tags: s.item.tags,
            distance: s.distance,
        })
        .collect();

    Ok(Json(RetrieveResponse { results }))
}

/// A positive integer; anything else is a 400.
fn parse_limit(raw: &str) -> Result<usize, ApiError> {
    match raw.trim().parse::<i64>() {
        Ok(n) if n > 0 => Ok(usize::try_from(n).unwrap_or(usize::MAX)),
        _ => Err(ApiError::BadRequest(format!(
            "Invalid limit '{}': must be a positive integer",
            raw
        ))),
    }
}

// =============================================================================
// Health
// =============================================================================

/// GET /health
pub async fn health(State(state): State<AppState>) -> Result<Json<HealthResponse>, ApiError> {
    let indexed_items = state.store.count(None)? as u64;

    Ok(Json(HealthResponse {
        status: "healthy".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        uptime_secs: state.start_time.elapsed().as_secs(),
        indexed_items,
    }))
}
