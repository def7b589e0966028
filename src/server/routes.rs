//! HTTP route handlers for the conversation graph API.

use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{get, post, put};
use axum::{Json, Router};
use serde::Deserialize;
use tracing::error;

use crate::graph::core::errors::GraphError;
use crate::graph::core::ids::{ConversationId, MessageId, UserId};
use crate::graph::core::kinds::EdgeType;
use crate::graph::core::models::{
    Conversation, ConversationDetail, ConversationGraph, Edge, Message, NewMessage, Snapshot,
};

use super::state::AppState;

type ApiError = (StatusCode, String);
type ApiResult<T> = Result<T, ApiError>;

/// Create the API router with all routes.
pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/api/users/{user_id}/conversations", get(list_conversations))
        .route("/api/conversations", post(create_conversation))
        .route(
            "/api/conversations/{id}",
            get(get_conversation)
                .patch(update_conversation)
                .delete(delete_conversation),
        )
        .route("/api/conversations/{id}/path", get(message_path))
        .route("/api/conversations/{id}/graph", get(conversation_graph))
        .route("/api/conversations/{id}/messages", post(add_message))
        .route("/api/conversations/{id}/active-leaf", put(switch_branch))
        .route("/api/conversations/{id}/edges", post(add_edge))
        .route(
            "/api/conversations/{id}/snapshots",
            get(list_snapshots).post(create_snapshot),
        )
        .route("/api/messages/{id}/branches", get(branches))
        .with_state(state)
}

/// Map an engine error onto a status code.
fn api_error(err: GraphError) -> ApiError {
    let status = if err.is_not_found() {
        StatusCode::NOT_FOUND
    } else if err.is_invalid_input() {
        StatusCode::BAD_REQUEST
    } else {
        error!("Request failed: {}", err);
        StatusCode::INTERNAL_SERVER_ERROR
    };
    (status, err.to_string())
}

/// Health check endpoint.
async fn health_check() -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "service": "convo-graph",
        "version": env!("CARGO_PKG_VERSION")
    }))
}

async fn list_conversations(
    State(state): State<Arc<AppState>>,
    Path(user_id): Path<UserId>,
) -> ApiResult<Json<Vec<Conversation>>> {
    let rows = state
        .engine
        .list_conversations(user_id)
        .await
        .map_err(api_error)?;
    Ok(Json(rows))
}

/// Conversation creation request.
#[derive(Debug, Default, Deserialize)]
pub struct CreateConversationRequest {
    /// Owner; anonymous when absent.
    #[serde(default)]
    pub user_id: Option<UserId>,
    /// Title; the configured default when absent.
    #[serde(default)]
    pub title: Option<String>,
}

async fn create_conversation(
    State(state): State<Arc<AppState>>,
    Json(request): Json<CreateConversationRequest>,
) -> ApiResult<(StatusCode, Json<Conversation>)> {
    let conversation = state
        .engine
        .create_conversation(request.user_id, request.title.as_deref())
        .await
        .map_err(api_error)?;
    Ok((StatusCode::CREATED, Json(conversation)))
}

async fn get_conversation(
    State(state): State<Arc<AppState>>,
    Path(id): Path<ConversationId>,
) -> ApiResult<Json<ConversationDetail>> {
    state
        .engine
        .get_conversation(id)
        .await
        .map_err(api_error)?
        .map(Json)
        .ok_or_else(|| api_error(GraphError::ConversationNotFound(id)))
}

/// Conversation rename request.
#[derive(Debug, Deserialize)]
pub struct UpdateConversationRequest {
    /// New title.
    pub title: String,
}

async fn update_conversation(
    State(state): State<Arc<AppState>>,
    Path(id): Path<ConversationId>,
    Json(request): Json<UpdateConversationRequest>,
) -> ApiResult<Json<Conversation>> {
    let conversation = state
        .engine
        .update_conversation_title(id, &request.title)
        .await
        .map_err(api_error)?;
    Ok(Json(conversation))
}

async fn delete_conversation(
    State(state): State<Arc<AppState>>,
    Path(id): Path<ConversationId>,
) -> ApiResult<StatusCode> {
    if state.engine.delete_conversation(id).await.map_err(api_error)? {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(api_error(GraphError::ConversationNotFound(id)))
    }
}

/// Query string of the path endpoint.
#[derive(Debug, Default, Deserialize)]
pub struct PathQuery {
    /// Leaf to walk from; the active leaf when absent.
    #[serde(default)]
    pub leaf: Option<MessageId>,
}

async fn message_path(
    State(state): State<Arc<AppState>>,
    Path(id): Path<ConversationId>,
    Query(query): Query<PathQuery>,
) -> ApiResult<Json<Vec<Message>>> {
    let path = state
        .engine
        .get_message_path(id, query.leaf)
        .await
        .map_err(api_error)?;
    Ok(Json(path))
}

async fn conversation_graph(
    State(state): State<Arc<AppState>>,
    Path(id): Path<ConversationId>,
) -> ApiResult<Json<ConversationGraph>> {
    let graph = state
        .engine
        .get_conversation_graph(id)
        .await
        .map_err(api_error)?;
    Ok(Json(graph))
}

async fn add_message(
    State(state): State<Arc<AppState>>,
    Path(id): Path<ConversationId>,
    Json(message): Json<NewMessage>,
) -> ApiResult<(StatusCode, Json<Message>)> {
    let message = state
        .engine
        .add_message(id, message)
        .await
        .map_err(api_error)?;
    Ok((StatusCode::CREATED, Json(message)))
}

/// Branch switch request.
#[derive(Debug, Deserialize)]
pub struct SwitchBranchRequest {
    /// Message that becomes the active leaf.
    pub message_id: MessageId,
}

async fn switch_branch(
    State(state): State<Arc<AppState>>,
    Path(id): Path<ConversationId>,
    Json(request): Json<SwitchBranchRequest>,
) -> ApiResult<StatusCode> {
    state
        .engine
        .switch_branch(id, request.message_id)
        .await
        .map_err(api_error)?;
    Ok(StatusCode::NO_CONTENT)
}

/// Edge creation request.
#[derive(Debug, Deserialize)]
pub struct AddEdgeRequest {
    /// Source message.
    pub source_id: MessageId,
    /// Target message.
    pub target_id: MessageId,
    /// Edge kind; `default` when absent.
    #[serde(default, rename = "type")]
    pub edge_type: EdgeType,
    /// Free-form metadata.
    #[serde(default)]
    pub metadata: Option<serde_json::Value>,
}

async fn add_edge(
    State(state): State<Arc<AppState>>,
    Path(id): Path<ConversationId>,
    Json(request): Json<AddEdgeRequest>,
) -> ApiResult<(StatusCode, Json<Edge>)> {
    let edge = state
        .engine
        .add_typed_edge(
            id,
            request.source_id,
            request.target_id,
            request.edge_type,
            request.metadata,
        )
        .await
        .map_err(api_error)?;
    Ok((StatusCode::CREATED, Json(edge)))
}

async fn list_snapshots(
    State(state): State<Arc<AppState>>,
    Path(id): Path<ConversationId>,
) -> ApiResult<Json<Vec<Snapshot>>> {
    let snapshots = state.engine.get_snapshots(id).await.map_err(api_error)?;
    Ok(Json(snapshots))
}

/// Snapshot creation request.
#[derive(Debug, Deserialize)]
pub struct CreateSnapshotRequest {
    /// Message the snapshot belongs to.
    pub message_id: MessageId,
    /// Opaque execution state.
    pub snapshot: serde_json::Value,
}

async fn create_snapshot(
    State(state): State<Arc<AppState>>,
    Path(id): Path<ConversationId>,
    Json(request): Json<CreateSnapshotRequest>,
) -> ApiResult<(StatusCode, Json<Snapshot>)> {
    let snapshot = state
        .engine
        .create_snapshot(id, request.message_id, request.snapshot)
        .await
        .map_err(api_error)?;
    Ok((StatusCode::CREATED, Json(snapshot)))
}

async fn branches(
    State(state): State<Arc<AppState>>,
    Path(id): Path<MessageId>,
) -> ApiResult<Json<Vec<Message>>> {
    let children = state.engine.get_branches(id).await.map_err(api_error)?;
    Ok(Json(children))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::core::config::GraphConfig;
    use crate::graph::engine::core::{GraphBackends, GraphEngine};
    use crate::graph::storage::database::GraphDatabase;
    use axum::body::{Body, to_bytes};
    use axum::http::Request;
    use serde::de::DeserializeOwned;
    use serde_json::{Value, json};
    use tower::ServiceExt;

    async fn app() -> Router {
        let db = GraphDatabase::open_in_memory().await.unwrap();
        let engine = GraphEngine::new(GraphConfig::default(), GraphBackends::sqlite(&db)).unwrap();
        create_router(AppState::new(engine))
    }

    async fn send(app: &Router, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Vec<u8>) {
        let builder = Request::builder().method(method).uri(uri);
        let request = match body {
            Some(body) => builder
                .header("content-type", "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        };
        let response = app.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, bytes.to_vec())
    }

    fn parse<T: DeserializeOwned>(bytes: &[u8]) -> T {
        serde_json::from_slice(bytes).unwrap()
    }

    #[tokio::test]
    async fn test_health() {
        let app = app().await;
        let (status, body) = send(&app, "GET", "/health", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(parse::<Value>(&body)["status"], "ok");
    }

    #[tokio::test]
    async fn test_conversation_flow() {
        let app = app().await;
        let (status, body) = send(&app, "POST", "/api/conversations", Some(json!({}))).await;
        assert_eq!(status, StatusCode::CREATED);
        let conversation: Conversation = parse(&body);
        assert_eq!(conversation.title.as_deref(), Some("New Conversation"));
        let base = format!("/api/conversations/{}", conversation.id);

        let (status, body) = send(
            &app,
            "POST",
            &format!("{base}/messages"),
            Some(json!({"type": "human", "content": "hi"})),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        let m1: Message = parse(&body);

        let (_, body) = send(
            &app,
            "POST",
            &format!("{base}/messages"),
            Some(json!({"type": "ai", "content": "first", "parent_id": m1.id})),
        )
        .await;
        let m2: Message = parse(&body);
        let (_, body) = send(
            &app,
            "POST",
            &format!("{base}/messages"),
            Some(json!({"type": "ai", "content": "second", "parent_id": m1.id})),
        )
        .await;
        let m3: Message = parse(&body);

        let (status, _) = send(
            &app,
            "PUT",
            &format!("{base}/active-leaf"),
            Some(json!({"message_id": m2.id})),
        )
        .await;
        assert_eq!(status, StatusCode::NO_CONTENT);

        let (_, body) = send(&app, "GET", &format!("{base}/path"), None).await;
        let path: Vec<Message> = parse(&body);
        assert_eq!(path.iter().map(|m| m.id).collect::<Vec<_>>(), vec![m1.id, m2.id]);

        let (_, body) = send(&app, "GET", &format!("{base}/path?leaf={}", m3.id), None).await;
        let path: Vec<Message> = parse(&body);
        assert_eq!(path.iter().map(|m| m.id).collect::<Vec<_>>(), vec![m1.id, m3.id]);

        let (_, body) = send(&app, "GET", &format!("/api/messages/{}/branches", m1.id), None).await;
        let children: Vec<Message> = parse(&body);
        assert_eq!(children.iter().map(|m| m.branch_index).collect::<Vec<_>>(), vec![0, 1]);

        let (_, body) = send(&app, "GET", &format!("{base}/graph"), None).await;
        let graph: ConversationGraph = parse(&body);
        assert_eq!(graph.messages.len(), 3);
        assert_eq!(graph.edges.len(), 2);

        let (status, body) = send(&app, "PATCH", &base, Some(json!({"title": "Renamed"}))).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(parse::<Conversation>(&body).title.as_deref(), Some("Renamed"));

        let (status, _) = send(&app, "DELETE", &base, None).await;
        assert_eq!(status, StatusCode::NO_CONTENT);
        let (status, _) = send(&app, "GET", &base, None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_edges_and_snapshots() {
        let app = app().await;
        let (_, body) = send(&app, "POST", "/api/conversations", Some(json!({"title": "x"}))).await;
        let conversation: Conversation = parse(&body);
        let base = format!("/api/conversations/{}", conversation.id);
        let (_, body) = send(
            &app,
            "POST",
            &format!("{base}/messages"),
            Some(json!({"type": "human", "content": "a"})),
        )
        .await;
        let a: Message = parse(&body);
        let (_, body) = send(
            &app,
            "POST",
            &format!("{base}/messages"),
            Some(json!({"type": "human", "content": "b"})),
        )
        .await;
        let b: Message = parse(&body);

        let (status, body) = send(
            &app,
            "POST",
            &format!("{base}/edges"),
            Some(json!({"source_id": a.id, "target_id": b.id, "type": "branch"})),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(parse::<Edge>(&body).edge_type, EdgeType::Branch);

        let (status, _) = send(
            &app,
            "POST",
            &format!("{base}/snapshots"),
            Some(json!({"message_id": b.id, "snapshot": {"state": 1}})),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        let (_, body) = send(&app, "GET", &format!("{base}/snapshots"), None).await;
        let snapshots: Vec<Snapshot> = parse(&body);
        assert_eq!(snapshots.len(), 1);
        assert_eq!(snapshots[0].snapshot, json!({"state": 1}));
    }

    #[tokio::test]
    async fn test_error_statuses() {
        let app = app().await;
        let (_, body) = send(&app, "POST", "/api/conversations", Some(json!({}))).await;
        let first: Conversation = parse(&body);
        let (_, body) = send(&app, "POST", "/api/conversations", Some(json!({}))).await;
        let second: Conversation = parse(&body);
        let (_, body) = send(
            &app,
            "POST",
            &format!("/api/conversations/{}/messages", second.id),
            Some(json!({"type": "human", "content": "elsewhere"})),
        )
        .await;
        let foreign: Message = parse(&body);

        let (status, _) = send(
            &app,
            "PUT",
            &format!("/api/conversations/{}/active-leaf", first.id),
            Some(json!({"message_id": foreign.id})),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, _) = send(
            &app,
            "PATCH",
            &format!("/api/conversations/{}", ConversationId::new()),
            Some(json!({"title": "x"})),
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let (status, _) = send(
            &app,
            "PUT",
            &format!("/api/conversations/{}/active-leaf", first.id),
            Some(json!({"message_id": MessageId::new()})),
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_user_conversation_listing() {
        let app = app().await;
        let user = UserId::new();
        let (status, body) = send(&app, "GET", &format!("/api/users/{user}/conversations"), None).await;
        assert_eq!(status, StatusCode::OK);
        assert!(parse::<Vec<Conversation>>(&body).is_empty());

        let (status, _) = send(
            &app,
            "POST",
            "/api/conversations",
            Some(json!({"user_id": user, "title": "orphan"})),
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }
}
