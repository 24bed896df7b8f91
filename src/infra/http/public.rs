use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{DefaultBodyLimit, Multipart, Path, Query, State, multipart::MultipartError},
    http::StatusCode,
    middleware,
    response::{IntoResponse, Response},
    routing::{get, post},
};
use serde::Deserialize;
use serde_json::{Value, json};
use uuid::Uuid;

use crate::application::analysis::{AnalysisService, UploadRequest};

use super::{
    error::{ApiError, codes},
    middleware::{log_responses, set_request_context, track_process_time},
};

const UPLOAD_FIELD: &str = "file";
const DEFAULT_USER: &str = "anonymous";
const DEFAULT_HISTORY_LIMIT: usize = 50;
/// Room for multipart boundaries and part headers on top of the model itself.
const MULTIPART_OVERHEAD_BYTES: usize = 64 * 1024;

#[derive(Clone)]
pub struct HttpState {
    pub analysis: Arc<AnalysisService>,
    pub slow_request: std::time::Duration,
    pub max_file_bytes: usize,
}

pub fn build_router(state: HttpState) -> Router {
    let upload_limit = state.max_file_bytes.saturating_add(MULTIPART_OVERHEAD_BYTES);
    let slow_request = state.slow_request;

    let upload_routes = Router::new()
        .route("/api/upload-ifc", post(upload_ifc))
        .layer(DefaultBodyLimit::max(upload_limit));

    Router::new()
        .route("/", get(health))
        .route("/api/cache-stats", get(cache_stats))
        .route("/api/test", get(test_llm))
        .route("/api/ask-question", post(ask_question))
        .route("/api/history/{user_id}", get(history))
        .route(
            "/api/analysis/{id}",
            get(analysis_detail).delete(delete_analysis),
        )
        .route("/api/stats/{user_id}", get(user_statistics))
        .merge(upload_routes)
        .with_state(state)
        .layer(middleware::from_fn_with_state(
            slow_request,
            track_process_time,
        ))
        .layer(middleware::from_fn(log_responses))
        .layer(middleware::from_fn(set_request_context))
}

async fn health() -> Json<Value> {
    Json(json!({
        "status": "ok",
        "message": "bimvision API is running",
    }))
}

async fn cache_stats(State(state): State<HttpState>) -> Json<Value> {
    let stats = state.analysis.cache().stats();
    Json(json!({
        "status": "success",
        "cache_stats": {
            "file_count": stats.file_count,
            "analysis_count": stats.analysis_count,
            "ttl_hours": stats.ttl_hours(),
        },
    }))
}

async fn test_llm(State(state): State<HttpState>) -> Response {
    let status = state.analysis.analyst_status();
    if !status.configured {
        return ApiError::new(
            "infra::http::public::test_llm",
            StatusCode::BAD_REQUEST,
            codes::LLM_CONFIGURATION,
            "API key error: LLM API key is not configured",
            Some("Set OPENAI_API_KEY or llm.api_key".to_string()),
        )
        .into_response();
    }

    Json(json!({
        "status": "success",
        "message": "LLM client configured",
        "model": status.model,
    }))
    .into_response()
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct UserQuery {
    user_id: Option<String>,
}

async fn upload_ifc(
    State(state): State<HttpState>,
    Query(query): Query<UserQuery>,
    multipart: Multipart,
) -> Response {
    const SOURCE: &str = "infra::http::public::upload_ifc";

    let (filename, bytes) = match read_upload(multipart).await {
        Ok(Some(upload)) => upload,
        Ok(None) => {
            return ApiError::bad_request(SOURCE, "multipart field `file` is required")
                .into_response();
        }
        Err(err) => return multipart_error(SOURCE, err).into_response(),
    };

    let request = UploadRequest {
        filename: filename.clone(),
        bytes,
        user_id: Some(query.user_id.unwrap_or_else(|| DEFAULT_USER.to_string())),
    };

    match state.analysis.analyze_upload(request).await {
        Ok(outcome) => {
            let message = if outcome.cached {
                "IFC file analysed (from cache)"
            } else {
                "IFC file analysed"
            };
            Json(json!({
                "status": "success",
                "message": message,
                "filename": filename,
                "analysis_id": outcome.analysis_id,
                "file_size": outcome.file_size,
                "processing_time": outcome.processing_time.as_secs_f64(),
                "cached": outcome.cached,
                "fingerprint": outcome.fingerprint.to_hex(),
                "building_data": outcome.file.record,
                "analysis": &*outcome.file.analysis,
            }))
            .into_response()
        }
        Err(err) => ApiError::from_analysis(SOURCE, err).into_response(),
    }
}

async fn read_upload(
    mut multipart: Multipart,
) -> Result<Option<(String, bytes::Bytes)>, MultipartError> {
    while let Some(field) = multipart.next_field().await? {
        if field.name() != Some(UPLOAD_FIELD) {
            continue;
        }
        let filename = field.file_name().unwrap_or_default().to_string();
        let bytes = field.bytes().await?;
        return Ok(Some((filename, bytes)));
    }
    Ok(None)
}

fn multipart_error(source: &'static str, err: MultipartError) -> ApiError {
    let status = err.status();
    let code = if status == StatusCode::PAYLOAD_TOO_LARGE {
        codes::FILE_TOO_LARGE
    } else {
        codes::BAD_REQUEST
    };
    ApiError::new(source, status, code, "invalid multipart upload", Some(err.body_text()))
}

#[derive(Debug, Deserialize)]
struct QuestionRequest {
    question: String,
    #[serde(default)]
    analysis_id: Option<Uuid>,
    #[serde(default)]
    user_id: Option<String>,
}

async fn ask_question(
    State(state): State<HttpState>,
    Json(request): Json<QuestionRequest>,
) -> Response {
    match state
        .analysis
        .answer_question(&request.question, request.analysis_id, request.user_id)
        .await
    {
        Ok(outcome) => Json(json!({
            "status": "success",
            "question": outcome.question,
            "answer": outcome.answer,
            "analysis_id": outcome.analysis_id,
        }))
        .into_response(),
        Err(err) => ApiError::from_analysis("infra::http::public::ask_question", err).into_response(),
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct HistoryQuery {
    limit: Option<usize>,
    offset: Option<usize>,
}

async fn history(
    State(state): State<HttpState>,
    Path(user_id): Path<String>,
    Query(query): Query<HistoryQuery>,
) -> Response {
    let limit = query.limit.unwrap_or(DEFAULT_HISTORY_LIMIT);
    let offset = query.offset.unwrap_or(0);

    match state.analysis.history(&user_id, limit, offset).await {
        Ok(analyses) => Json(json!({
            "status": "success",
            "user_id": user_id,
            "count": analyses.len(),
            "analyses": analyses,
        }))
        .into_response(),
        Err(err) => ApiError::from_analysis("infra::http::public::history", err).into_response(),
    }
}

async fn analysis_detail(State(state): State<HttpState>, Path(id): Path<Uuid>) -> Response {
    match state.analysis.analysis_detail(id).await {
        Ok(detail) => Json(json!({
            "status": "success",
            "qa_count": detail.qa_history.len(),
            "analysis": detail.analysis,
            "qa_history": detail.qa_history,
        }))
        .into_response(),
        Err(err) => {
            ApiError::from_analysis("infra::http::public::analysis_detail", err).into_response()
        }
    }
}

async fn delete_analysis(State(state): State<HttpState>, Path(id): Path<Uuid>) -> Response {
    match state.analysis.delete_analysis(id).await {
        Ok(()) => Json(json!({
            "status": "success",
            "message": format!("Analysis deleted: {id}"),
        }))
        .into_response(),
        Err(err) => {
            ApiError::from_analysis("infra::http::public::delete_analysis", err).into_response()
        }
    }
}

async fn user_statistics(State(state): State<HttpState>, Path(user_id): Path<String>) -> Response {
    match state.analysis.user_statistics(&user_id).await {
        Ok(Some(statistics)) => Json(json!({
            "status": "success",
            "user_id": user_id,
            "statistics": statistics,
        }))
        .into_response(),
        Ok(None) => Json(json!({
            "status": "success",
            "user_id": user_id,
            "message": "No statistics available",
            "total_analyses": 0,
        }))
        .into_response(),
        Err(err) => {
            ApiError::from_analysis("infra::http::public::user_statistics", err).into_response()
        }
    }
}
