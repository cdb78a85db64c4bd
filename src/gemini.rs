use std::sync::Arc;

use async_trait::async_trait;
use base64::Engine;
use reqwest::Client;
use serde::Deserialize;
use serde_json::json;
use thiserror::Error;
use tracing::{error, info};

use crate::models::DesignImage;

/// Errors from the generation service. `Display` is what the user sees, so the
/// service's own message is passed through untouched.
#[derive(Debug, Error)]
pub enum GeminiError {
    #[error("{0}")]
    Transport(String),
    #[error("{message}")]
    Api { status: u16, message: String },
    #[error("response blocked: {0}")]
    Blocked(String),
    #[error("no text content found in response")]
    EmptyResponse,
    #[error("failed to parse response: {0}")]
    Decode(String),
}

/// A vision-capable text generator: one prompt plus one image in, free-form text out.
#[async_trait]
pub trait GenerativeModel: Send + Sync {
    async fn generate(&self, prompt: &str, image: &DesignImage) -> Result<String, GeminiError>;
}

/// Builds a model bound to one credential. The key can change per request.
pub trait ModelFactory: Send + Sync {
    fn connect(&self, api_key: &str) -> Arc<dyn GenerativeModel>;
}

#[derive(Debug, Clone)]
pub struct GeminiSettings {
    pub base_url: String,
    pub model: String,
}

pub struct GeminiClient {
    client: Client,
    api_key: String,
    settings: GeminiSettings,
}

impl GeminiClient {
    pub fn new(client: Client, api_key: String, settings: GeminiSettings) -> Self {
        Self { client, api_key, settings }
    }

    fn endpoint(&self) -> String {
        format!(
            "{}/models/{}:generateContent?key={}",
            self.settings.base_url.trim_end_matches('/'),
            self.settings.model,
            self.api_key
        )
    }
}

/// Hands out `GeminiClient`s that share one connection pool.
pub struct GeminiFactory {
    client: Client,
    settings: GeminiSettings,
}

impl GeminiFactory {
    pub fn new(settings: GeminiSettings) -> Self {
        Self { client: Client::new(), settings }
    }
}

impl ModelFactory for GeminiFactory {
    fn connect(&self, api_key: &str) -> Arc<dyn GenerativeModel> {
        Arc::new(GeminiClient::new(self.client.clone(), api_key.to_string(), self.settings.clone()))
    }
}

#[async_trait]
impl GenerativeModel for GeminiClient {
    async fn generate(&self, prompt: &str, image: &DesignImage) -> Result<String, GeminiError> {
        let url = self.endpoint();
        info!("🔗 Making request to: {}", url.replace(&self.api_key, "***"));

        let payload = json!({
            "contents": [{
                "parts": [
                    {"text": prompt},
                    {"inline_data": {
                        "mime_type": image.mime_type,
                        "data": base64::engine::general_purpose::STANDARD.encode(&image.bytes),
                    }}
                ]
            }],
            "generationConfig": {
                "candidateCount": 1
            }
        });

        info!(
            "📤 Prompt ({} chars): {} | image {}x{} {} ({} bytes)",
            prompt.len(),
            preview(prompt, 120),
            image.width,
            image.height,
            image.mime_type,
            image.bytes.len()
        );

        let response = self.client
            .post(&url)
            .json(&payload)
            .send()
            .await
            .map_err(|e| GeminiError::Transport(e.without_url().to_string()))?;

        let status = response.status();
        info!("📥 Response status: {}", status);
        let response_text = response.text().await
            .map_err(|e| GeminiError::Transport(e.without_url().to_string()))?;

        if !status.is_success() {
            error!("❌ API Error response: {}", preview(&response_text, 1000));
            return Err(GeminiError::Api {
                status: status.as_u16(),
                message: service_message(&response_text),
            });
        }

        let parsed: GeminiResponse = serde_json::from_str(&response_text)
            .map_err(|e| GeminiError::Decode(e.to_string()))?;
        let text = reply_text(parsed)?;
        info!("✅ Received {} chars of text", text.len());
        Ok(text)
    }
}

/// The `error.message` of a Google API error body, or the raw body if it has none.
fn service_message(body: &str) -> String {
    serde_json::from_str::<ErrorEnvelope>(body)
        .ok()
        .and_then(|e| e.error.message)
        .unwrap_or_else(|| body.trim().to_string())
}

/// Char-boundary safe prefix for log lines.
fn preview(s: &str, max: usize) -> String {
    match s.char_indices().nth(max) {
        Some((idx, _)) => format!("{}...[{} chars total]", &s[..idx], s.chars().count()),
        None => s.to_string(),
    }
}

// --- Response Parsing Helpers ---

#[derive(Debug, Deserialize)]
struct ErrorEnvelope { error: ErrorBody }

#[derive(Debug, Deserialize)]
struct ErrorBody { #[serde(default)] message: Option<String> }

#[derive(Debug, Deserialize)]
struct GeminiResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
    #[serde(default, rename = "promptFeedback")]
    prompt_feedback: Option<PromptFeedback>,
}

#[derive(Debug, Deserialize)]
struct PromptFeedback {
    #[serde(default, rename = "blockReason")]
    block_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    #[serde(default)]
    content: Content,
    #[serde(default, rename = "finishReason")]
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
struct Content { #[serde(default)] parts: Vec<Part> }

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum Part {
    Text {
        text: String,
        #[serde(default)]
        thought: bool,
    },
    Other(serde::de::IgnoredAny),
}

/// All non-thought text parts of the first candidate, concatenated.
fn reply_text(resp: GeminiResponse) -> Result<String, GeminiError> {
    let Some(candidate) = resp.candidates.into_iter().next() else {
        let reason = resp.prompt_feedback.and_then(|f| f.block_reason);
        return Err(match reason {
            Some(reason) => GeminiError::Blocked(reason),
            None => GeminiError::EmptyResponse,
        });
    };

    let text: String = candidate.content.parts
        .into_iter()
        .filter_map(|p| match p {
            Part::Text { text, thought: false } => Some(text),
            _ => None,
        })
        .collect();

    if text.is_empty() {
        info!("⚠️ No text parts in candidate (finish reason: {:?})", candidate.finish_reason);
        let reason = candidate.finish_reason.unwrap_or_default();
        let blocked = matches!(reason.as_str(), "SAFETY" | "RECITATION" | "BLOCKLIST" | "PROHIBITED_CONTENT");
        return Err(if blocked { GeminiError::Blocked(reason) } else { GeminiError::EmptyResponse });
    }
    Ok(text)
}
