//! Operator endpoints, served on a separate (loopback by default) listener.

use std::sync::Arc;

use axum::{
    Json, Router,
    extract::State,
    middleware,
    routing::{get, post},
};
use serde_json::{Value, json};
use tracing::info;

use crate::cache::ResultCache;

use super::middleware::{log_responses, set_request_context};

#[derive(Clone)]
pub struct AdminState {
    pub cache: Arc<ResultCache>,
    pub persistence_enabled: bool,
    pub llm_configured: bool,
}

pub fn build_admin_router(state: AdminState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/cache/stats", get(cache_stats))
        .route("/cache/sweep", post(sweep_cache))
        .route("/cache/invalidate", post(invalidate_cache))
        .with_state(state)
        .layer(middleware::from_fn(log_responses))
        .layer(middleware::from_fn(set_request_context))
}

async fn health(State(state): State<AdminState>) -> Json<Value> {
    Json(json!({
        "status": "ok",
        "persistence": state.persistence_enabled,
        "llm_configured": state.llm_configured,
    }))
}

async fn cache_stats(State(state): State<AdminState>) -> Json<Value> {
    let stats = state.cache.stats();
    let config = state.cache.config();
    Json(json!({
        "file_count": stats.file_count,
        "analysis_count": stats.analysis_count,
        "ttl_hours": stats.ttl_hours(),
        "sweep_interval_seconds": config.sweep_interval.as_secs(),
        "max_entries": config.max_entries.map(|max| max.get()),
        "single_flight": config.single_flight,
    }))
}

async fn sweep_cache(State(state): State<AdminState>) -> Json<Value> {
    let removed = state.cache.sweep_expired();
    info!(
        target = "bimvision::http::admin",
        files = removed.files,
        analyses = removed.analyses,
        "manual cache sweep"
    );
    Json(json!({ "status": "success", "removed": removed }))
}

async fn invalidate_cache(State(state): State<AdminState>) -> Json<Value> {
    let removed = state.cache.invalidate_all();
    info!(
        target = "bimvision::http::admin",
        files = removed.files,
        analyses = removed.analyses,
        "cache invalidated"
    );
    Json(json!({ "status": "success", "removed": removed }))
}
