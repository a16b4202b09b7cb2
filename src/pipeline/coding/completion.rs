//! Structured-output completion backends.
//!
//! Every backend receives system instructions, a user prompt and one of the
//! three output schemas, and returns the parsed JSON object.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::CodingError;
use crate::config::{COMPLETION_MAX_TOKENS, COMPLETION_TEMPERATURE};
use crate::models::OutputSchema;

/// Base delay before the first retry. Doubles on each attempt.
const RETRY_BASE_DELAY_MS: u64 = 500;
/// Upper bound on any single backoff delay.
const RETRY_MAX_DELAY_MS: u64 = 30_000;

#[derive(Debug, Clone)]
pub struct CompletionRequest {
    pub system: String,
    pub prompt: String,
    pub schema: OutputSchema,
}

#[async_trait]
pub trait CompletionService: Send + Sync {
    async fn complete(&self, request: &CompletionRequest) -> Result<Value, CodingError>;

    fn model_name(&self) -> &str;
}

/// Call `service`, retrying transient failures up to `max_retries` times
/// with exponential backoff. Returns exactly one result.
pub async fn complete_with_retry(
    service: &dyn CompletionService,
    request: &CompletionRequest,
    max_retries: u32,
) -> Result<Value, CodingError> {
    let mut attempt = 0;
    loop {
        match service.complete(request).await {
            Ok(value) => return Ok(value),
            Err(e) if is_retryable_error(&e) && attempt < max_retries => {
                let delay = retry_delay(attempt);
                attempt += 1;
                tracing::warn!(
                    schema = request.schema.name(),
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    error = %e,
                    "Completion call failed, retrying"
                );
                tokio::time::sleep(delay).await;
            }
            Err(e) => return Err(e),
        }
    }
}

/// Backoff before retry number `attempt + 1`, capped at `RETRY_MAX_DELAY_MS`.
pub fn retry_delay(attempt: u32) -> Duration {
    let ms = 1u64
        .checked_shl(attempt)
        .and_then(|factor| RETRY_BASE_DELAY_MS.checked_mul(factor))
        .map_or(RETRY_MAX_DELAY_MS, |ms| ms.min(RETRY_MAX_DELAY_MS));
    Duration::from_millis(ms)
}

/// Connection failures, client timeouts, 5xx and 429 are transient.
pub fn is_retryable_error(e: &CodingError) -> bool {
    match e {
        CodingError::CompletionConnection(_) | CodingError::HttpClient(_) => true,
        CodingError::CompletionService { status, .. } => *status >= 500 || *status == 429,
        _ => false,
    }
}

/// Extract JSON content from a response that may be wrapped in ```json blocks.
pub fn extract_json_block(text: &str) -> &str {
    if let Some(start) = text.find("```json") {
        let json_start = start + 7;
        if let Some(end) = text[json_start..].find("```") {
            return text[json_start..json_start + end].trim();
        }
    }
    if let Some(start) = text.find("```") {
        let json_start = start + 3;
        if let Some(end) = text[json_start..].find("```") {
            return text[json_start..json_start + end].trim();
        }
    }
    text.trim()
}

fn parse_content(content: &str, schema: OutputSchema) -> Result<Value, CodingError> {
    let value: Value =
        serde_json::from_str(extract_json_block(content)).map_err(|e| {
            CodingError::MalformedOutput {
                stage: schema.name().to_string(),
                detail: e.to_string(),
            }
        })?;
    if !value.is_object() {
        return Err(CodingError::MalformedOutput {
            stage: schema.name().to_string(),
            detail: "expected a JSON object".into(),
        });
    }
    Ok(value)
}

fn map_send_error(e: reqwest::Error, base_url: &str, timeout_secs: u64) -> CodingError {
    if e.is_connect() {
        CodingError::CompletionConnection(base_url.to_string())
    } else if e.is_timeout() {
        CodingError::HttpClient(format!("Request timed out after {timeout_secs}s"))
    } else {
        CodingError::HttpClient(e.to_string())
    }
}

async fn read_error(response: reqwest::Response) -> CodingError {
    let status = response.status().as_u16();
    let body = response.text().await.unwrap_or_default();
    CodingError::CompletionService { status, body }
}

fn build_client(timeout_secs: u64) -> Result<reqwest::Client, CodingError> {
    reqwest::Client::builder()
        .timeout(Duration::from_secs(timeout_secs))
        .build()
        .map_err(|e| CodingError::HttpClient(e.to_string()))
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

fn chat_messages(request: &CompletionRequest) -> [ChatMessage<'_>; 2] {
    [
        ChatMessage {
            role: "system",
            content: &request.system,
        },
        ChatMessage {
            role: "user",
            content: &request.prompt,
        },
    ]
}

// ═══════════════════════════════════════════════════════════
// Ollama: POST {base}/api/chat with `format` = JSON Schema
// ═══════════════════════════════════════════════════════════

pub struct OllamaCompletion {
    base_url: String,
    model: String,
    client: reqwest::Client,
    timeout_secs: u64,
}

#[derive(Serialize)]
struct OllamaChatRequest<'a> {
    model: &'a str,
    messages: [ChatMessage<'a>; 2],
    format: Value,
    stream: bool,
    options: OllamaOptions,
}

#[derive(Serialize)]
struct OllamaOptions {
    temperature: f32,
    num_predict: u32,
}

#[derive(Deserialize)]
struct OllamaChatResponse {
    message: OllamaChatMessage,
}

#[derive(Deserialize)]
struct OllamaChatMessage {
    content: String,
}

impl OllamaCompletion {
    pub fn new(base_url: &str, model: &str, timeout_secs: u64) -> Result<Self, CodingError> {
        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            model: model.to_string(),
            client: build_client(timeout_secs)?,
            timeout_secs,
        })
    }
}

#[async_trait]
impl CompletionService for OllamaCompletion {
    async fn complete(&self, request: &CompletionRequest) -> Result<Value, CodingError> {
        let url = format!("{}/api/chat", self.base_url);
        let body = OllamaChatRequest {
            model: &self.model,
            messages: chat_messages(request),
            format: request.schema.json_schema(),
            stream: false,
            options: OllamaOptions {
                temperature: COMPLETION_TEMPERATURE,
                num_predict: COMPLETION_MAX_TOKENS,
            },
        };

        let response = self
            .client
            .post(&url)
            .json(&body)
            .send()
            .await
            .map_err(|e| map_send_error(e, &self.base_url, self.timeout_secs))?;

        if !response.status().is_success() {
            return Err(read_error(response).await);
        }

        let parsed: OllamaChatResponse =
            response.json().await.map_err(|e| CodingError::MalformedOutput {
                stage: request.schema.name().to_string(),
                detail: format!("unexpected chat response: {e}"),
            })?;

        parse_content(&parsed.message.content, request.schema)
    }

    fn model_name(&self) -> &str {
        &self.model
    }
}

// ═══════════════════════════════════════════════════════════
// OpenAI: POST {base}/v1/chat/completions with json_schema
// ═══════════════════════════════════════════════════════════

pub struct OpenAiCompletion {
    base_url: String,
    model: String,
    api_key: String,
    client: reqwest::Client,
    timeout_secs: u64,
}

#[derive(Serialize)]
struct OpenAiChatRequest<'a> {
    model: &'a str,
    messages: [ChatMessage<'a>; 2],
    response_format: Value,
    max_tokens: u32,
    temperature: f32,
}

#[derive(Deserialize)]
struct OpenAiChatResponse {
    choices: Vec<OpenAiChoice>,
}

#[derive(Deserialize)]
struct OpenAiChoice {
    message: OpenAiMessage,
}

#[derive(Deserialize)]
struct OpenAiMessage {
    content: Option<String>,
    #[serde(default)]
    refusal: Option<String>,
}

impl OpenAiCompletion {
    pub fn new(
        base_url: &str,
        model: &str,
        api_key: &str,
        timeout_secs: u64,
    ) -> Result<Self, CodingError> {
        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            model: model.to_string(),
            api_key: api_key.to_string(),
            client: build_client(timeout_secs)?,
            timeout_secs,
        })
    }
}

#[async_trait]
impl CompletionService for OpenAiCompletion {
    async fn complete(&self, request: &CompletionRequest) -> Result<Value, CodingError> {
        let url = format!("{}/v1/chat/completions", self.base_url);
        let body = OpenAiChatRequest {
            model: &self.model,
            messages: chat_messages(request),
            response_format: serde_json::json!({
                "type": "json_schema",
                "json_schema": {
                    "name": request.schema.name(),
                    "schema": request.schema.json_schema(),
                },
            }),
            max_tokens: COMPLETION_MAX_TOKENS,
            temperature: COMPLETION_TEMPERATURE,
        };

        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| map_send_error(e, &self.base_url, self.timeout_secs))?;

        if !response.status().is_success() {
            return Err(read_error(response).await);
        }

        let malformed = |detail: String| CodingError::MalformedOutput {
            stage: request.schema.name().to_string(),
            detail,
        };
        let parsed: OpenAiChatResponse = response
            .json()
            .await
            .map_err(|e| malformed(format!("unexpected completion response: {e}")))?;
        let message = parsed
            .choices
            .into_iter()
            .next()
            .map(|c| c.message)
            .ok_or_else(|| malformed("no choices returned".into()))?;

        if let Some(refusal) = message.refusal {
            return Err(malformed(format!("model refused: {refusal}")));
        }
        let content = message
            .content
            .ok_or_else(|| malformed("empty message content".into()))?;
        parse_content(&content, request.schema)
    }

    fn model_name(&self) -> &str {
        &self.model
    }
}
