//! Collaborator traits the analysis service depends on.
//!
//! Concrete adapters live in `infra`: the STEP parser, the OpenAI-compatible
//! analyst and the Supabase store.

use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;
use uuid::Uuid;

use crate::domain::building::BuildingRecord;

// ============================================================================
// Parser
// ============================================================================

#[derive(Debug, Error)]
pub enum ParseError {
    #[error("failed to read model file")]
    Io(#[from] std::io::Error),
    #[error("file is not an ISO 10303-21 model")]
    NotStep,
    #[error("model has no DATA section")]
    MissingData,
    #[error("syntax error on line {line}: {message}")]
    Syntax { line: usize, message: String },
    #[error("parser worker failed: {0}")]
    Worker(String),
}

#[async_trait]
pub trait BuildingParser: Send + Sync {
    async fn parse(&self, path: &Path) -> Result<BuildingRecord, ParseError>;
}

// ============================================================================
// Analyst
// ============================================================================

/// Coarse category used when reporting inference failures to clients.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Missing or rejected credentials, unknown model.
    Configuration,
    /// Rate limiting or upstream unavailability; retrying may help.
    Transient,
    Failure,
}

#[derive(Debug, Error)]
pub enum InferenceError {
    #[error("LLM API key is not configured")]
    MissingApiKey,
    #[error("LLM API rejected the credentials: {0}")]
    Authentication(String),
    #[error("model `{model}` is not available")]
    ModelUnavailable { model: String },
    #[error("LLM rate limit reached")]
    RateLimited { retry_after: Option<Duration> },
    #[error("LLM upstream error (status {status}): {message}")]
    Upstream { status: u16, message: String },
    #[error("LLM request failed: {0}")]
    Transport(String),
    #[error("LLM returned an unusable response: {0}")]
    InvalidResponse(String),
}

impl InferenceError {
    pub fn class(&self) -> ErrorClass {
        match self {
            Self::MissingApiKey | Self::Authentication(_) | Self::ModelUnavailable { .. } => {
                ErrorClass::Configuration
            }
            Self::RateLimited { .. } | Self::Transport(_) => ErrorClass::Transient,
            Self::Upstream { status, .. } if *status >= 500 => ErrorClass::Transient,
            Self::Upstream { .. } | Self::InvalidResponse(_) => ErrorClass::Failure,
        }
    }
}

#[async_trait]
pub trait BuildingAnalyst: Send + Sync {
    fn model(&self) -> &str;

    /// Whether credentials are present. Says nothing about their validity.
    fn is_configured(&self) -> bool;

    async fn summarize(&self, record: &BuildingRecord) -> Result<String, InferenceError>;

    async fn answer(&self, record: &BuildingRecord, question: &str)
    -> Result<String, InferenceError>;
}

// ============================================================================
// Persistence
// ============================================================================

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("persistence request failed: {0}")]
    Transport(String),
    #[error("persistence backend returned status {status}: {message}")]
    Status { status: u16, message: String },
    #[error("persistence response could not be decoded: {0}")]
    Decode(String),
}

/// Analysis to persist after a fresh (non-cached) upload.
#[derive(Debug, Clone)]
pub struct NewAnalysis {
    pub filename: String,
    pub record: BuildingRecord,
    pub analysis: String,
    pub user_id: String,
    pub processing_time: Duration,
    pub file_size: u64,
}

#[derive(Debug, Clone)]
pub struct NewQuestion {
    pub analysis_id: Uuid,
    pub user_id: String,
    pub question: String,
    pub answer: String,
}

/// Remote history store. Rows are returned in the backend's own JSON shape.
#[async_trait]
pub trait AnalysisStore: Send + Sync {
    async fn store_analysis(&self, analysis: &NewAnalysis) -> Result<Uuid, StoreError>;

    async fn store_qa(&self, qa: &NewQuestion) -> Result<(), StoreError>;

    /// Newest first.
    async fn list_user_analyses(
        &self,
        user_id: &str,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<Value>, StoreError>;

    async fn find_analysis(&self, id: Uuid) -> Result<Option<Value>, StoreError>;

    /// Oldest first.
    async fn qa_history(&self, analysis_id: Uuid, limit: usize) -> Result<Vec<Value>, StoreError>;

    /// Remove an analysis and its Q&A; `false` when nothing matched.
    async fn delete_analysis(&self, id: Uuid) -> Result<bool, StoreError>;

    async fn user_statistics(&self, user_id: &str) -> Result<Option<Value>, StoreError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn inference_errors_are_classified() {
        assert_eq!(
            InferenceError::MissingApiKey.class(),
            ErrorClass::Configuration
        );
        assert_eq!(
            InferenceError::ModelUnavailable {
                model: "gpt-x".into()
            }
            .class(),
            ErrorClass::Configuration
        );
        assert_eq!(
            InferenceError::RateLimited { retry_after: None }.class(),
            ErrorClass::Transient
        );
        assert_eq!(
            InferenceError::Upstream {
                status: 503,
                message: "overloaded".into()
            }
            .class(),
            ErrorClass::Transient
        );
        assert_eq!(
            InferenceError::Upstream {
                status: 400,
                message: "bad request".into()
            }
            .class(),
            ErrorClass::Failure
        );
    }
}
