use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

use crate::config::Config;
use crate::error::AuditError;

// --- Provider trait ---

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseFormat {
    #[allow(dead_code)]
    Text,
    Json,
}

#[derive(Debug, Clone)]
pub struct GenerationRequest<'a> {
    pub prompt: &'a str,
    pub format: ResponseFormat,
    pub temperature: f32,
    pub max_tokens: u32,
}

/// Prompt in, raw text out. Parsing the text is the caller's job.
pub trait AIProvider: Send + Sync {
    fn generate(&self, request: &GenerationRequest<'_>) -> Result<String, AuditError>;
    fn model_name(&self) -> &str;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProviderKind {
    Gemini,
    OpenAI,
}

#[derive(Debug, Clone)]
pub struct ModelSpec {
    pub provider: ProviderKind,
    pub model_id: String,
    pub short_name: String,
}

pub fn resolve_model(name: &str) -> Result<ModelSpec> {
    match name {
        // Google Gemini (GEMINI_API_KEY)
        "gemini-2.5-flash" | "flash" => Ok(ModelSpec {
            provider: ProviderKind::Gemini,
            model_id: "gemini-2.5-flash".to_string(),
            short_name: "flash".to_string(),
        }),
        "gemini-2.5-pro" | "pro" => Ok(ModelSpec {
            provider: ProviderKind::Gemini,
            model_id: "gemini-2.5-pro".to_string(),
            short_name: "pro".to_string(),
        }),
        "gemini-2.5-flash-lite" | "flash-lite" => Ok(ModelSpec {
            provider: ProviderKind::Gemini,
            model_id: "gemini-2.5-flash-lite".to_string(),
            short_name: "flash-lite".to_string(),
        }),
        // OpenAI (OPENAI_API_KEY)
        "gpt-4o" => Ok(ModelSpec {
            provider: ProviderKind::OpenAI,
            model_id: "gpt-4o".to_string(),
            short_name: "gpt-4o".to_string(),
        }),
        "gpt-4o-mini" | "mini" => Ok(ModelSpec {
            provider: ProviderKind::OpenAI,
            model_id: "gpt-4o-mini".to_string(),
            short_name: "gpt-4o-mini".to_string(),
        }),
        _ => Err(anyhow!(
            "Unknown model '{}'. Available: gemini-2.5-flash (default), gemini-2.5-pro, \
             gemini-2.5-flash-lite, gpt-4o, gpt-4o-mini",
            name
        )),
    }
}

/// Builds the provider for `spec`. A missing API key is not an error here;
/// the provider reports it on the first call.
pub fn create_provider(spec: &ModelSpec, config: &Config) -> Result<Arc<dyn AIProvider>> {
    let client = reqwest::blocking::Client::builder()
        .timeout(config.request_timeout)
        .build()
        .context("Failed to create HTTP client")?;

    match spec.provider {
        ProviderKind::Gemini => Ok(Arc::new(GeminiProvider::new(
            spec.model_id.clone(),
            config.gemini_api_key.clone(),
            client,
            config.request_timeout,
        ))),
        ProviderKind::OpenAI => Ok(Arc::new(OpenAIProvider::new(
            spec.model_id.clone(),
            config.openai_api_key.clone(),
            client,
            config.request_timeout,
        ))),
    }
}

fn send_error(provider: &str, err: reqwest::Error, timeout: Duration) -> AuditError {
    if err.is_timeout() {
        AuditError::Service(format!(
            "{} request timed out after {} seconds",
            provider,
            timeout.as_secs()
        ))
    } else {
        AuditError::Service(format!("Failed to send request to {}: {}", provider, err))
    }
}

fn missing_key(var: &str) -> AuditError {
    AuditError::Service(format!(
        "{var} environment variable not set. Set it with: export {var}=your-key-here"
    ))
}

// --- Gemini provider ---

const GEMINI_API_BASE: &str = "https://generativelanguage.googleapis.com/v1beta/models";

#[derive(Debug, Serialize)]
struct GeminiPart {
    text: String,
}

#[derive(Debug, Serialize)]
struct GeminiContent {
    role: String,
    parts: Vec<GeminiPart>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GeminiGenerationConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    response_mime_type: Option<String>,
    temperature: f32,
    max_output_tokens: u32,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GeminiRequest {
    contents: Vec<GeminiContent>,
    generation_config: GeminiGenerationConfig,
}

#[derive(Debug, Deserialize)]
struct GeminiResponsePart {
    #[serde(default)]
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
struct GeminiResponseContent {
    #[serde(default)]
    parts: Vec<GeminiResponsePart>,
}

#[derive(Debug, Deserialize)]
struct GeminiCandidate {
    content: Option<GeminiResponseContent>,
}

#[derive(Debug, Deserialize)]
struct GeminiResponse {
    #[serde(default)]
    candidates: Vec<GeminiCandidate>,
}

impl GeminiResponse {
    /// Text of the first candidate; empty when the model returned nothing.
    fn text(&self) -> String {
        self.candidates
            .first()
            .and_then(|c| c.content.as_ref())
            .map(|content| {
                content
                    .parts
                    .iter()
                    .filter_map(|p| p.text.as_deref())
                    .collect::<String>()
            })
            .unwrap_or_default()
    }
}

#[derive(Debug)]
pub struct GeminiProvider {
    api_key: Option<String>,
    model_id: String,
    client: reqwest::blocking::Client,
    timeout: Duration,
}

impl GeminiProvider {
    pub fn new(
        model_id: String,
        api_key: Option<String>,
        client: reqwest::blocking::Client,
        timeout: Duration,
    ) -> Self {
        Self { api_key, model_id, client, timeout }
    }

    fn build_request(&self, request: &GenerationRequest<'_>) -> GeminiRequest {
        GeminiRequest {
            contents: vec![GeminiContent {
                role: "user".to_string(),
                parts: vec![GeminiPart {
                    text: request.prompt.to_string(),
                }],
            }],
            generation_config: GeminiGenerationConfig {
                response_mime_type: match request.format {
                    ResponseFormat::Json => Some("application/json".to_string()),
                    ResponseFormat::Text => None,
                },
                temperature: request.temperature,
                max_output_tokens: request.max_tokens,
            },
        }
    }
}

impl AIProvider for GeminiProvider {
    fn generate(&self, request: &GenerationRequest<'_>) -> Result<String, AuditError> {
        let api_key = self.api_key.as_deref().ok_or_else(|| missing_key("GEMINI_API_KEY"))?;
        let url = format!("{}/{}:generateContent", GEMINI_API_BASE, self.model_id);
        debug!(model = %self.model_id, "Sending Gemini generateContent request");

        let response = self
            .client
            .post(&url)
            .header("x-goog-api-key", api_key)
            .header("content-type", "application/json")
            .json(&self.build_request(request))
            .send()
            .map_err(|e| send_error("Gemini API", e, self.timeout))?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().unwrap_or_default();
            return Err(AuditError::Service(format!(
                "Gemini API request failed with status {}: {}",
                status, error_text
            )));
        }

        let api_response: GeminiResponse = response
            .json()
            .map_err(|e| AuditError::Service(format!("Failed to parse Gemini API response: {}", e)))?;

        Ok(api_response.text())
    }

    fn model_name(&self) -> &str {
        &self.model_id
    }
}

// --- OpenAI provider ---

const OPENAI_API_URL: &str = "https://api.openai.com/v1/chat/completions";

#[derive(Debug, Serialize)]
struct OpenAIMessage {
    role: String,
    content: String,
}

#[derive(Debug, Serialize)]
struct OpenAIResponseFormat {
    #[serde(rename = "type")]
    format_type: String,
}

#[derive(Debug, Serialize)]
struct OpenAIRequest {
    model: String,
    max_tokens: u32,
    temperature: f32,
    messages: Vec<OpenAIMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    response_format: Option<OpenAIResponseFormat>,
}

#[derive(Debug, Deserialize)]
struct OpenAIResponseMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct OpenAIChoice {
    message: OpenAIResponseMessage,
}

#[derive(Debug, Deserialize)]
struct OpenAIResponse {
    choices: Vec<OpenAIChoice>,
}

#[derive(Debug)]
pub struct OpenAIProvider {
    api_key: Option<String>,
    model_id: String,
    client: reqwest::blocking::Client,
    timeout: Duration,
}

impl OpenAIProvider {
    pub fn new(
        model_id: String,
        api_key: Option<String>,
        client: reqwest::blocking::Client,
        timeout: Duration,
    ) -> Self {
        Self { api_key, model_id, client, timeout }
    }
}

impl AIProvider for OpenAIProvider {
    fn generate(&self, request: &GenerationRequest<'_>) -> Result<String, AuditError> {
        let api_key = self.api_key.as_deref().ok_or_else(|| missing_key("OPENAI_API_KEY"))?;

        let body = OpenAIRequest {
            model: self.model_id.clone(),
            max_tokens: request.max_tokens,
            temperature: request.temperature,
            messages: vec![OpenAIMessage {
                role: "user".to_string(),
                content: request.prompt.to_string(),
            }],
            response_format: match request.format {
                ResponseFormat::Json => Some(OpenAIResponseFormat {
                    format_type: "json_object".to_string(),
                }),
                ResponseFormat::Text => None,
            },
        };
        debug!(model = %self.model_id, "Sending OpenAI chat completion request");

        let response = self
            .client
            .post(OPENAI_API_URL)
            .header("Authorization", format!("Bearer {}", api_key))
            .header("Content-Type", "application/json")
            .json(&body)
            .send()
            .map_err(|e| send_error("OpenAI API", e, self.timeout))?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().unwrap_or_default();
            return Err(AuditError::Service(format!(
                "OpenAI API request failed with status {}: {}",
                status, error_text
            )));
        }

        let api_response: OpenAIResponse = response
            .json()
            .map_err(|e| AuditError::Service(format!("Failed to parse OpenAI API response: {}", e)))?;

        Ok(api_response
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .unwrap_or_default())
    }

    fn model_name(&self) -> &str {
        &self.model_id
    }
}
