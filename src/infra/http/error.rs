use axum::Json;
use axum::http::{HeaderValue, StatusCode, header::RETRY_AFTER};
use axum::response::{IntoResponse, Response};
use serde::Serialize;

use crate::application::analysis::AnalysisError;
use crate::application::error::ErrorReport;
use crate::application::ports::{ErrorClass, InferenceError};

pub mod codes {
    pub const BAD_REQUEST: &str = "bad_request";
    pub const INVALID_FILE_TYPE: &str = "invalid_file_type";
    pub const EMPTY_UPLOAD: &str = "empty_upload";
    pub const FILE_TOO_LARGE: &str = "file_too_large";
    pub const EMPTY_QUESTION: &str = "empty_question";
    pub const NO_BUILDING: &str = "no_building_loaded";
    pub const PARSE_FAILED: &str = "parse_failed";
    pub const LLM_CONFIGURATION: &str = "llm_configuration";
    pub const RATE_LIMITED: &str = "rate_limited";
    pub const UPSTREAM: &str = "upstream_unavailable";
    pub const LLM_FAILED: &str = "analysis_failed";
    pub const PERSISTENCE_UNAVAILABLE: &str = "persistence_unavailable";
    pub const PERSISTENCE: &str = "persistence_error";
    pub const NOT_FOUND: &str = "not_found";
    pub const UPLOAD: &str = "upload_error";
}

#[derive(Debug, Serialize)]
pub struct ApiErrorBody {
    pub status: &'static str,
    pub error: ApiErrorMessage,
}

#[derive(Debug, Serialize)]
pub struct ApiErrorMessage {
    pub code: &'static str,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hint: Option<String>,
}

/// JSON error response; carries an `ErrorReport` for the response logger.
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    code: &'static str,
    message: String,
    hint: Option<String>,
    retry_after: Option<u64>,
    report: ErrorReport,
}

impl ApiError {
    pub fn new(
        source: &'static str,
        status: StatusCode,
        code: &'static str,
        message: impl Into<String>,
        hint: Option<String>,
    ) -> Self {
        let message = message.into();
        let report = ErrorReport::from_message(source, status, format!("{code}: {message}"));
        Self {
            status,
            code,
            message,
            hint,
            retry_after: None,
            report,
        }
    }

    pub fn bad_request(source: &'static str, message: impl Into<String>) -> Self {
        Self::new(source, StatusCode::BAD_REQUEST, codes::BAD_REQUEST, message, None)
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }

    pub fn code(&self) -> &'static str {
        self.code
    }

    /// Map a service failure to its response; `source` names the handler.
    pub fn from_analysis(source: &'static str, err: AnalysisError) -> Self {
        let (status, code, hint) = match &err {
            AnalysisError::InvalidFileType { .. } => (
                StatusCode::BAD_REQUEST,
                codes::INVALID_FILE_TYPE,
                Some("Upload a model exported as .ifc".to_string()),
            ),
            AnalysisError::EmptyUpload => (StatusCode::BAD_REQUEST, codes::EMPTY_UPLOAD, None),
            AnalysisError::FileTooLarge { .. } => {
                (StatusCode::PAYLOAD_TOO_LARGE, codes::FILE_TOO_LARGE, None)
            }
            AnalysisError::EmptyQuestion => (StatusCode::BAD_REQUEST, codes::EMPTY_QUESTION, None),
            AnalysisError::NoBuildingLoaded => (
                StatusCode::BAD_REQUEST,
                codes::NO_BUILDING,
                Some("POST a model to /api/upload-ifc before asking questions".to_string()),
            ),
            AnalysisError::PersistenceUnavailable => (
                StatusCode::SERVICE_UNAVAILABLE,
                codes::PERSISTENCE_UNAVAILABLE,
                Some("Set SUPABASE_URL and SUPABASE_KEY to enable history".to_string()),
            ),
            AnalysisError::NotFound { .. } => (StatusCode::NOT_FOUND, codes::NOT_FOUND, None),
            AnalysisError::Upload(_) => {
                (StatusCode::INTERNAL_SERVER_ERROR, codes::UPLOAD, None)
            }
            AnalysisError::Parse(parse) => (
                StatusCode::UNPROCESSABLE_ENTITY,
                codes::PARSE_FAILED,
                Some(parse.to_string()),
            ),
            AnalysisError::Inference(inference) => return Self::from_inference(source, &err, inference),
            AnalysisError::Store(store) => (
                StatusCode::BAD_GATEWAY,
                codes::PERSISTENCE,
                Some(store.to_string()),
            ),
        };

        Self {
            status,
            code,
            message: err.to_string(),
            hint,
            retry_after: None,
            report: ErrorReport::from_error(source, status, &err),
        }
    }

    fn from_inference(
        source: &'static str,
        err: &AnalysisError,
        inference: &InferenceError,
    ) -> Self {
        let (status, code) = match (inference, inference.class()) {
            (InferenceError::RateLimited { .. }, _) => {
                (StatusCode::TOO_MANY_REQUESTS, codes::RATE_LIMITED)
            }
            (_, ErrorClass::Configuration) => (StatusCode::BAD_REQUEST, codes::LLM_CONFIGURATION),
            (_, ErrorClass::Transient) => (StatusCode::BAD_GATEWAY, codes::UPSTREAM),
            (_, ErrorClass::Failure) => (StatusCode::INTERNAL_SERVER_ERROR, codes::LLM_FAILED),
        };
        let retry_after = match inference {
            InferenceError::RateLimited { retry_after } => {
                Some(retry_after.map_or(1, |delay| delay.as_secs().max(1)))
            }
            _ => None,
        };
        let hint = match inference.class() {
            ErrorClass::Configuration => Some(format!(
                "{inference}; check OPENAI_API_KEY and llm.model"
            )),
            ErrorClass::Transient => Some(format!("{inference}; try again shortly")),
            ErrorClass::Failure => Some(inference.to_string()),
        };

        Self {
            status,
            code,
            message: err.to_string(),
            hint,
            retry_after,
            report: ErrorReport::from_error(source, status, err),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = ApiErrorBody {
            status: "error",
            error: ApiErrorMessage {
                code: self.code,
                message: self.message,
                hint: self.hint,
            },
        };
        let mut response = (self.status, Json(body)).into_response();
        if let Some(value) = self
            .retry_after
            .and_then(|seconds| HeaderValue::from_str(&seconds.to_string()).ok())
        {
            response.headers_mut().insert(RETRY_AFTER, value);
        }
        self.report.attach(&mut response);
        response
    }
}
