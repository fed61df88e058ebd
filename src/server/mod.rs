use anyhow::{Context, Result};
use async_trait::async_trait;
use axum::body::Body;
use axum::extract::{Path, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use bytes::Bytes;
use chrono::Utc;
use futures::StreamExt;
use serde_json::json;
use std::convert::Infallible;
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{error, info};

use crate::config::AppConfig;
use crate::models::{CompletionResponse, GenerateRequest};
use crate::orchestrator::{Orchestrator, RequestContext, WireEvent};
use crate::persistence::{JsonlMessageStore, MemoryMessageStore, MessageStore};
use crate::providers::ClientRegistry;

/// Decides whether a user may touch a project. The gateway keeps no project
/// table of its own, so this sits at the trait seam; the default lets
/// everything through.
#[async_trait]
pub trait OwnershipCheck: Send + Sync {
    async fn owns(&self, user_id: Option<&str>, project_id: &str) -> bool;
}

pub struct AllowAll;

#[async_trait]
impl OwnershipCheck for AllowAll {
    async fn owns(&self, _user_id: Option<&str>, _project_id: &str) -> bool {
        true
    }
}

#[derive(Clone)]
pub struct AppState {
    pub orchestrator: Orchestrator,
    pub store: Arc<dyn MessageStore>,
    pub ownership: Arc<dyn OwnershipCheck>,
}

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/v1/generate", post(generate))
        .route("/v1/projects/:project_id/messages", get(list_messages))
        .route("/health", get(health))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

pub async fn run(config: AppConfig) -> Result<()> {
    let store: Arc<dyn MessageStore> = match config.storage.path {
        Some(ref path) => Arc::new(
            JsonlMessageStore::open(path)
                .with_context(|| format!("failed to open message store at {}", path.display()))?,
        ),
        None => Arc::new(MemoryMessageStore::new()),
    };

    let registry = Arc::new(ClientRegistry::from_config(&config.providers));
    let orchestrator = Orchestrator::new(registry, Arc::clone(&store), config.defaults.clone());
    let state = AppState {
        orchestrator,
        store,
        ownership: Arc::new(AllowAll),
    };

    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind {}", addr))?;
    info!(addr = %addr, "listening");
    axum::serve(listener, build_router(state))
        .await
        .context("server error")?;
    Ok(())
}

fn user_id_from(headers: &HeaderMap) -> Option<String> {
    headers
        .get("x-user-id")
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
}

async fn generate(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(request): Json<GenerateRequest>,
) -> Response {
    let ctx = RequestContext {
        user_id: user_id_from(&headers),
    };
    let wants_stream = request.stream
        || headers
            .get(header::ACCEPT)
            .and_then(|v| v.to_str().ok())
            .map(|v| v.contains("text/event-stream"))
            .unwrap_or(false);

    if let Some(ref project_id) = request.project_id {
        if !state
            .ownership
            .owns(ctx.user_id.as_deref(), project_id)
            .await
        {
            let denial =
                WireEvent::fatal("Project not found or not owned by user", "NotFoundError");
            if wants_stream {
                return sse_response(futures::stream::once(async move { denial }));
            }
            return (
                StatusCode::NOT_FOUND,
                Json(json!({
                    "error": true,
                    "message": "Project not found or not owned by user",
                    "type": "NotFoundError",
                })),
            )
                .into_response();
        }
    }

    if wants_stream {
        sse_response(state.orchestrator.process(request, ctx))
    } else {
        let response = state.orchestrator.complete(request).await;
        let status = response_status(&response);
        (status, Json(response)).into_response()
    }
}

fn response_status(response: &CompletionResponse) -> StatusCode {
    if !response.error {
        return StatusCode::OK;
    }
    if let Some(code) = response.status_code {
        if let Ok(status) = StatusCode::from_u16(code) {
            return status;
        }
    }
    match response.error_type.as_deref() {
        Some("ConfigurationError") => StatusCode::SERVICE_UNAVAILABLE,
        Some("RoutingError") => StatusCode::BAD_REQUEST,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn sse_response<S>(events: S) -> Response
where
    S: futures::Stream<Item = WireEvent> + Send + 'static,
{
    let body = Body::from_stream(
        events.map(|event| Ok::<_, Infallible>(Bytes::from(event.to_sse()))),
    );
    Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, "text/event-stream")
        .header(header::CACHE_CONTROL, "no-cache")
        .header(header::CONNECTION, "keep-alive")
        .body(body)
        .unwrap_or_else(|e| {
            error!(error = %e, "failed to build sse response");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        })
}

async fn list_messages(
    State(state): State<AppState>,
    Path(project_id): Path<String>,
) -> Response {
    match state.store.list_for_project(&project_id).await {
        Ok(messages) => (StatusCode::OK, Json(messages)).into_response(),
        Err(e) => {
            error!(error = %e, project_id = %project_id, "failed to list messages");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({"error": true, "message": e.to_string()})),
            )
                .into_response()
        }
    }
}

async fn health() -> Json<serde_json::Value> {
    Json(json!({
        "status": "ok",
        "timestamp": Utc::now().to_rfc3339(),
    }))
}
