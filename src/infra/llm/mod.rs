//! OpenAI-compatible chat completion client.

mod prompt;

use std::time::{Duration, Instant};

use async_trait::async_trait;
use reqwest::{Client, StatusCode, header::HeaderMap};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};
use url::Url;

use crate::application::ports::{BuildingAnalyst, InferenceError};
use crate::domain::building::BuildingRecord;
use crate::infra::error::InfraError;

pub use prompt::{analysis_prompt, question_prompt};

/// Values shipped in sample `.env` files; treated as absent.
const PLACEHOLDER_KEYS: &[&str] = &["your_openai_api_key_here", "sk-..."];

#[derive(Clone)]
pub struct LlmConfig {
    pub api_key: Option<String>,
    pub base_url: Url,
    pub model: String,
    pub analysis_max_tokens: u32,
    pub answer_max_tokens: u32,
    pub temperature: f32,
    pub timeout: Duration,
}

impl std::fmt::Debug for LlmConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LlmConfig")
            .field("api_key", &self.api_key.as_ref().map(|_| "[REDACTED]"))
            .field("base_url", &self.base_url.as_str())
            .field("model", &self.model)
            .field("analysis_max_tokens", &self.analysis_max_tokens)
            .field("answer_max_tokens", &self.answer_max_tokens)
            .field("temperature", &self.temperature)
            .field("timeout", &self.timeout)
            .finish()
    }
}

impl From<&crate::config::LlmSettings> for LlmConfig {
    fn from(settings: &crate::config::LlmSettings) -> Self {
        Self {
            api_key: settings.api_key.clone(),
            base_url: settings.base_url.clone(),
            model: settings.model.clone(),
            analysis_max_tokens: settings.analysis_max_tokens.get(),
            answer_max_tokens: settings.answer_max_tokens.get(),
            temperature: settings.temperature,
            timeout: settings.timeout,
        }
    }
}

#[derive(Debug, Serialize)]
struct CompletionRequest<'a> {
    model: &'a str,
    messages: [Message<'a>; 1],
    max_tokens: u32,
    temperature: f32,
}

#[derive(Debug, Serialize)]
struct Message<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct CompletionResponse {
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChoiceMessage {
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ApiErrorBody {
    error: ApiErrorDetail,
}

#[derive(Debug, Deserialize)]
struct ApiErrorDetail {
    message: String,
    #[serde(default)]
    code: Option<String>,
}

pub struct OpenAiAnalyst {
    client: Client,
    endpoint: Url,
    config: LlmConfig,
}

impl std::fmt::Debug for OpenAiAnalyst {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpenAiAnalyst")
            .field("endpoint", &self.endpoint.as_str())
            .field("model", &self.config.model)
            .field("api_key", &"[REDACTED]")
            .finish()
    }
}

impl OpenAiAnalyst {
    pub fn new(config: LlmConfig) -> Result<Self, InfraError> {
        let mut base = config.base_url.clone();
        if !base.path().ends_with('/') {
            let path = format!("{}/", base.path());
            base.set_path(&path);
        }
        let endpoint = base
            .join("chat/completions")
            .map_err(|err| InfraError::configuration(format!("invalid llm.base_url: {err}")))?;

        let client = Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|err| InfraError::http_client(err.to_string()))?;

        Ok(Self {
            client,
            endpoint,
            config,
        })
    }

    fn api_key(&self) -> Result<&str, InferenceError> {
        self.config
            .api_key
            .as_deref()
            .map(str::trim)
            .filter(|key| !key.is_empty() && !PLACEHOLDER_KEYS.contains(key))
            .ok_or(InferenceError::MissingApiKey)
    }

    async fn complete(&self, prompt: &str, max_tokens: u32) -> Result<String, InferenceError> {
        let api_key = self.api_key()?;
        let body = CompletionRequest {
            model: &self.config.model,
            messages: [Message {
                role: "user",
                content: prompt,
            }],
            max_tokens,
            temperature: self.config.temperature,
        };

        let started = Instant::now();
        let response = self
            .client
            .post(self.endpoint.clone())
            .bearer_auth(api_key)
            .json(&body)
            .send()
            .await
            .map_err(|err| {
                if err.is_timeout() {
                    InferenceError::Transport(format!(
                        "request timed out after {}s",
                        self.config.timeout.as_secs()
                    ))
                } else {
                    InferenceError::Transport(err.to_string())
                }
            })?;

        let status = response.status();
        debug!(
            target = "bimvision::llm",
            model = %self.config.model,
            status = status.as_u16(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "completion response received"
        );

        if status.is_success() {
            let parsed: CompletionResponse = response
                .json()
                .await
                .map_err(|err| InferenceError::InvalidResponse(err.to_string()))?;
            return parsed
                .choices
                .into_iter()
                .next()
                .and_then(|choice| choice.message.content)
                .filter(|content| !content.trim().is_empty())
                .ok_or_else(|| InferenceError::InvalidResponse("no completion content".into()));
        }

        let retry_after = parse_retry_after(response.headers());
        let text = response.text().await.unwrap_or_default();
        let error = self.classify(status, retry_after, &text);
        warn!(
            target = "bimvision::llm",
            model = %self.config.model,
            status = status.as_u16(),
            error = %error,
            "completion request failed"
        );
        Err(error)
    }

    fn classify(&self, status: StatusCode, retry_after: Option<Duration>, body: &str) -> InferenceError {
        let (message, code) = match serde_json::from_str::<ApiErrorBody>(body) {
            Ok(parsed) => (parsed.error.message, parsed.error.code),
            Err(_) if body.trim().is_empty() => (status.to_string(), None),
            Err(_) => (body.trim().to_string(), None),
        };

        let model_missing = code.as_deref() == Some("model_not_found")
            || message.to_ascii_lowercase().contains("does not exist");

        match status {
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
                InferenceError::Authentication(message)
            }
            StatusCode::TOO_MANY_REQUESTS => InferenceError::RateLimited { retry_after },
            _ if model_missing => InferenceError::ModelUnavailable {
                model: self.config.model.clone(),
            },
            _ => InferenceError::Upstream {
                status: status.as_u16(),
                message,
            },
        }
    }
}

fn parse_retry_after(headers: &HeaderMap) -> Option<Duration> {
    headers
        .get(reqwest::header::RETRY_AFTER)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.trim().parse::<f64>().ok())
        .and_then(|seconds| Duration::try_from_secs_f64(seconds).ok())
}

#[async_trait]
impl BuildingAnalyst for OpenAiAnalyst {
    fn model(&self) -> &str {
        &self.config.model
    }

    fn is_configured(&self) -> bool {
        self.api_key().is_ok()
    }

    async fn summarize(&self, record: &BuildingRecord) -> Result<String, InferenceError> {
        let prompt = analysis_prompt(record);
        self.complete(&prompt, self.config.analysis_max_tokens).await
    }

    async fn answer(
        &self,
        record: &BuildingRecord,
        question: &str,
    ) -> Result<String, InferenceError> {
        let prompt = question_prompt(record, question);
        self.complete(&prompt, self.config.answer_max_tokens).await
    }
}
