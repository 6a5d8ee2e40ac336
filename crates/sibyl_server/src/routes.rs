//! Route table and handlers.

use crate::respond::ApiError;
use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::json;
use sibyl_core::{QueryOptions, QueryRequest};
use sibyl_error::GatewayError;
use sibyl_pipeline::QueryPipeline;
use std::sync::Arc;
use uuid::Uuid;

/// Shared state injected into every handler.
#[derive(Clone)]
pub struct AppState {
    /// The query pipeline everything routes through.
    pub pipeline: Arc<QueryPipeline>,
}

/// Build the route table.
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/llm-providers", get(list_providers))
        .route("/cache/flush", post(flush_cache))
        .route("/workspaces/{workspace}/query", post(run_query))
        .route("/workspaces/{workspace}/generate", post(generate_only))
        .route(
            "/workspaces/{workspace}/connections/{connection}/schema",
            get(get_schema),
        )
        .route(
            "/workspaces/{workspace}/connections/{connection}/schema/refresh",
            post(refresh_schema),
        )
        .route(
            "/workspaces/{workspace}/sessions",
            get(list_sessions).post(create_session),
        )
        .route(
            "/workspaces/{workspace}/sessions/{session}",
            get(get_session).delete(delete_session),
        )
        .route(
            "/workspaces/{workspace}/sessions/{session}/messages",
            get(session_messages),
        )
        .route("/workspaces/{workspace}/suggestions", get(suggestions))
        .with_state(state)
}

/// Caller identity rides in the `X-User-Id` header; token validation is
/// the outer proxy's concern.
fn caller(headers: &HeaderMap) -> Result<Uuid, ApiError> {
    let raw = headers
        .get("x-user-id")
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| ApiError(GatewayError::invalid("missing X-User-Id header").into()))?;
    Uuid::parse_str(raw)
        .map_err(|_| ApiError(GatewayError::invalid("X-User-Id is not a UUID").into()))
}

async fn health() -> impl IntoResponse {
    (StatusCode::OK, Json(json!({ "status": "ok" })))
}

async fn list_providers(State(state): State<AppState>) -> impl IntoResponse {
    let llm = state.pipeline.llm();
    Json(json!({
        "providers": llm.provider_info(),
        "default": llm.default_provider(),
    }))
}

async fn flush_cache(State(state): State<AppState>) -> Result<impl IntoResponse, ApiError> {
    let flushed = state.pipeline.flush_schema_cache().await?;
    Ok(Json(json!({ "flushed": flushed })))
}

/// Query body: [`QueryRequest`] with `execute` optional so the two query
/// endpoints can pick their own default.
#[derive(Debug, Deserialize)]
struct QueryBody {
    connection_id: Uuid,
    question: String,
    #[serde(default)]
    session_id: Option<Uuid>,
    #[serde(default)]
    llm_provider: Option<String>,
    #[serde(default)]
    llm_model: Option<String>,
    #[serde(default)]
    execute: Option<bool>,
    #[serde(default)]
    options: Option<QueryOptions>,
}

impl QueryBody {
    fn into_request(self, execute: bool) -> QueryRequest {
        QueryRequest {
            connection_id: self.connection_id,
            question: self.question,
            session_id: self.session_id,
            llm_provider: self.llm_provider,
            llm_model: self.llm_model,
            execute,
            options: self.options,
        }
    }
}

async fn run_query(
    State(state): State<AppState>,
    Path(workspace): Path<Uuid>,
    headers: HeaderMap,
    Json(body): Json<QueryBody>,
) -> Result<impl IntoResponse, ApiError> {
    let user = caller(&headers)?;
    let execute = body.execute.unwrap_or(true);
    let request = body.into_request(execute);
    let response = state.pipeline.execute(user, workspace, request).await?;
    Ok(Json(response))
}

async fn generate_only(
    State(state): State<AppState>,
    Path(workspace): Path<Uuid>,
    headers: HeaderMap,
    Json(body): Json<QueryBody>,
) -> Result<impl IntoResponse, ApiError> {
    let user = caller(&headers)?;
    let request = body.into_request(false);
    let response = state.pipeline.execute(user, workspace, request).await?;
    Ok(Json(response))
}

async fn get_schema(
    State(state): State<AppState>,
    Path((workspace, connection)): Path<(Uuid, Uuid)>,
    headers: HeaderMap,
) -> Result<impl IntoResponse, ApiError> {
    let user = caller(&headers)?;
    let snapshot = state.pipeline.get_schema(user, workspace, connection).await?;
    Ok(Json(snapshot))
}

async fn refresh_schema(
    State(state): State<AppState>,
    Path((workspace, connection)): Path<(Uuid, Uuid)>,
    headers: HeaderMap,
) -> Result<impl IntoResponse, ApiError> {
    let user = caller(&headers)?;
    let snapshot = state.pipeline.refresh_schema(user, workspace, connection).await?;
    Ok(Json(snapshot))
}

#[derive(Debug, Deserialize)]
struct ListParams {
    #[serde(default = "default_limit")]
    limit: usize,
    #[serde(default)]
    offset: usize,
}

fn default_limit() -> usize {
    50
}

async fn list_sessions(
    State(state): State<AppState>,
    Path(workspace): Path<Uuid>,
    Query(params): Query<ListParams>,
    headers: HeaderMap,
) -> Result<impl IntoResponse, ApiError> {
    let user = caller(&headers)?;
    let sessions = state
        .pipeline
        .list_sessions(user, workspace, params.limit, params.offset)
        .await?;
    Ok(Json(sessions))
}

#[derive(Debug, Deserialize)]
struct CreateSessionBody {
    #[serde(default)]
    title: Option<String>,
}

async fn create_session(
    State(state): State<AppState>,
    Path(workspace): Path<Uuid>,
    headers: HeaderMap,
    Json(body): Json<CreateSessionBody>,
) -> Result<impl IntoResponse, ApiError> {
    let user = caller(&headers)?;
    let session = state.pipeline.create_session(user, workspace, body.title).await?;
    Ok((StatusCode::CREATED, Json(session)))
}

async fn get_session(
    State(state): State<AppState>,
    Path((workspace, session)): Path<(Uuid, Uuid)>,
    headers: HeaderMap,
) -> Result<impl IntoResponse, ApiError> {
    let user = caller(&headers)?;
    let session = state.pipeline.get_session(user, workspace, session).await?;
    Ok(Json(session))
}

async fn delete_session(
    State(state): State<AppState>,
    Path((workspace, session)): Path<(Uuid, Uuid)>,
    headers: HeaderMap,
) -> Result<impl IntoResponse, ApiError> {
    let user = caller(&headers)?;
    state.pipeline.delete_session(user, workspace, session).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn session_messages(
    State(state): State<AppState>,
    Path((workspace, session)): Path<(Uuid, Uuid)>,
    headers: HeaderMap,
) -> Result<impl IntoResponse, ApiError> {
    let user = caller(&headers)?;
    let messages = state.pipeline.session_history(user, workspace, session).await?;
    Ok(Json(messages))
}

async fn suggestions(
    State(state): State<AppState>,
    Path(workspace): Path<Uuid>,
    headers: HeaderMap,
) -> Result<impl IntoResponse, ApiError> {
    let user = caller(&headers)?;
    let questions = state.pipeline.suggested_questions(user, workspace).await?;
    Ok(Json(json!({ "suggestions": questions })))
}
