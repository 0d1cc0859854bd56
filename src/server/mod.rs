//! Control-plane gateway powered by axum.
//!
//! Serves:
//! - `POST /rpc/v1`  — JSON-RPC 2.0 endpoint (`deliberate`, `query_decisions`)
//! - `GET  /health`  — health check with graph metrics and cache stats
//!
//! Verbs run concurrently against distinct deliberations — nothing here
//! serialises unrelated calls.

pub mod types;

pub use types::*;

use crate::config::{Config, ServerConfig};
use crate::engine::types::{DeliberationRequest, EngineError, Mode};
use crate::engine::DeliberationEngine;
use crate::graph::DecisionGraph;
use axum::{
    Router,
    extract::State,
    response::{IntoResponse, Json},
    routing::{get, post},
};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tower_http::cors::{AllowOrigin, CorsLayer};

/// Shared state for the control plane.
#[derive(Clone)]
pub struct ServerState {
    pub engine: Arc<DeliberationEngine>,
    pub graph: Option<Arc<DecisionGraph>>,
    pub config: Arc<Config>,
}

/// Build the axum router for the control plane.
pub fn build_router(state: ServerState, allowed_origins: &[String]) -> Router {
    let cors = if allowed_origins.is_empty() {
        CorsLayer::new()
    } else {
        let origins: Vec<_> = allowed_origins
            .iter()
            .filter_map(|o| o.parse().ok())
            .collect();
        CorsLayer::new().allow_origin(AllowOrigin::list(origins))
    };

    Router::new()
        .route("/rpc/v1", post(handle_jsonrpc))
        .route("/health", get(health_check))
        .layer(cors)
        .with_state(state)
}

/// Start the control-plane server. Runs until the process exits.
pub async fn start_server(config: &ServerConfig, state: ServerState) -> anyhow::Result<()> {
    let app = build_router(state, &config.allowed_origins);
    let addr: SocketAddr = format!("{}:{}", config.bind, config.port)
        .parse()
        .map_err(|e| anyhow::anyhow!("Invalid control-plane address: {e}"))?;

    tracing::info!("Control plane listening on http://{addr}");
    tracing::info!("   JSON-RPC: http://{addr}/rpc/v1");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}

async fn handle_jsonrpc(
    State(state): State<ServerState>,
    body: String,
) -> impl IntoResponse {
    let request: JsonRpcRequest = match serde_json::from_str(&body) {
        Ok(req) => req,
        Err(e) => {
            return Json(JsonRpcResponse::error(
                serde_json::Value::Null,
                error_codes::PARSE_ERROR,
                format!("Invalid JSON-RPC request: {e}"),
            ));
        }
    };
    Json(dispatch(request, state).await)
}

/// Dispatch a JSON-RPC request to the matching verb handler.
pub async fn dispatch(request: JsonRpcRequest, state: ServerState) -> JsonRpcResponse {
    match request.method.as_str() {
        "deliberate" => handle_deliberate(request.id, request.params, state).await,
        "query_decisions" => handle_query_decisions(request.id, request.params, state).await,
        _ => JsonRpcResponse::error(
            request.id,
            error_codes::METHOD_NOT_FOUND,
            format!("Method not found: {}", request.method),
        ),
    }
}

async fn handle_deliberate(
    id: serde_json::Value,
    params: serde_json::Value,
    state: ServerState,
) -> JsonRpcResponse {
    let params: DeliberateParams = match serde_json::from_value(params) {
        Ok(p) => p,
        Err(e) => {
            return JsonRpcResponse::error(
                id,
                error_codes::INVALID_PARAMS,
                format!("Invalid deliberate params: {e}"),
            );
        }
    };

    if params.question.trim().is_empty() {
        return JsonRpcResponse::error(
            id,
            error_codes::INVALID_PARAMS,
            "question must not be empty",
        );
    }
    if params.participants.len() < 2 {
        return JsonRpcResponse::error(
            id,
            error_codes::INVALID_PARAMS,
            format!(
                "at least 2 participants are required, got {}",
                params.participants.len()
            ),
        );
    }

    let defaults = &state.config.defaults;
    let mode_str = params.mode.as_deref().unwrap_or(&defaults.mode);
    let Some(mode) = Mode::parse(mode_str) else {
        return JsonRpcResponse::error(
            id,
            error_codes::INVALID_PARAMS,
            format!("unknown mode '{mode_str}' (expected \"quick\" or \"conference\")"),
        );
    };
    let rounds = params
        .rounds
        .unwrap_or(defaults.rounds)
        .clamp(1, defaults.max_rounds);

    let request = DeliberationRequest {
        question: params.question,
        participants: params.participants,
        rounds,
        mode,
        context: params.context,
    };

    match state.engine.deliberate(request, CancellationToken::new()).await {
        Ok(result) => match serde_json::to_value(&result) {
            Ok(value) => JsonRpcResponse::success(id, value),
            Err(e) => JsonRpcResponse::error(
                id,
                error_codes::INTERNAL_ERROR,
                format!("Failed to serialise result: {e}"),
            ),
        },
        Err(e @ (EngineError::NotEnoughParticipants(_) | EngineError::InvalidRequest(_))) => {
            JsonRpcResponse::error(id, error_codes::INVALID_PARAMS, e.to_string())
        }
        Err(e) => JsonRpcResponse::error(id, error_codes::INTERNAL_ERROR, e.to_string()),
    }
}

async fn handle_query_decisions(
    id: serde_json::Value,
    params: serde_json::Value,
    state: ServerState,
) -> JsonRpcResponse {
    let params: QueryDecisionsParams = match serde_json::from_value(params) {
        Ok(p) => p,
        Err(e) => {
            return JsonRpcResponse::error(
                id,
                error_codes::INVALID_PARAMS,
                format!("Invalid query_decisions params: {e}"),
            );
        }
    };

    let limit = params.limit.unwrap_or(10).max(1);

    let results = match &state.graph {
        Some(graph) => {
            match graph
                .query_decisions(&params.query_text, limit, params.threshold)
                .await
            {
                Ok(scored) => scored,
                Err(e) => {
                    return JsonRpcResponse::error(
                        id,
                        error_codes::INTERNAL_ERROR,
                        format!("Query failed: {e}"),
                    );
                }
            }
        }
        None => Vec::new(),
    };

    let summaries: Vec<DecisionSummary> = results
        .into_iter()
        .map(|scored| DecisionSummary {
            id: scored.node.id.to_string(),
            question: scored.node.question,
            consensus: scored.node.consensus,
            score: scored.score,
            participants: scored.node.participants,
            timestamp: scored.node.timestamp.to_rfc3339(),
        })
        .collect();

    let result = QueryDecisionsResult {
        kind: "similar_decisions".to_string(),
        count: summaries.len(),
        results: summaries,
    };

    match serde_json::to_value(&result) {
        Ok(value) => JsonRpcResponse::success(id, value),
        Err(e) => JsonRpcResponse::error(
            id,
            error_codes::INTERNAL_ERROR,
            format!("Failed to serialise result: {e}"),
        ),
    }
}

async fn health_check(State(state): State<ServerState>) -> impl IntoResponse {
    let graph_healthy = match &state.graph {
        Some(graph) => graph.health_check().await,
        None => true,
    };
    let metrics = match &state.graph {
        Some(graph) => graph.metrics().await.ok(),
        None => None,
    };
    let cache = state.graph.as_ref().map(|g| g.cache_stats());

    Json(serde_json::json!({
        "status": if graph_healthy { "ok" } else { "degraded" },
        "version": crate::VERSION,
        "graph": metrics,
        "cache": cache,
    }))
}
