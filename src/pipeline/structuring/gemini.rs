use std::sync::{LazyLock, Mutex};
use std::time::Duration;

use base64::Engine;
use regex::Regex;
use serde::{Deserialize, Serialize};

use super::types::LlmClient;
use super::StructuringError;
use crate::config::{ConfigError, ModelConfig};
use crate::pipeline::types::ModelPart;

const GEMINI_BASE_URL: &str = "https://generativelanguage.googleapis.com";

/// Base wait before the first rate-limit retry; doubles per attempt.
const BASE_RETRY_DELAY: Duration = Duration::from_secs(2);
const MAX_RETRY_DELAY: Duration = Duration::from_secs(60);

/// Provider error bodies are cut to this length before surfacing.
const ERROR_BODY_CHARS: usize = 500;

/// `"retryDelay": "17s"` in a RetryInfo detail, or "Please retry in 17.5s." in the message.
static RETRY_DELAY_PATTERNS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    vec![
        Regex::new(r#""retryDelay"\s*:\s*"(\d+(?:\.\d+)?)s""#).unwrap(),
        Regex::new(r"(?i)retry in (\d+(?:\.\d+)?)\s*s").unwrap(),
    ]
});

/// Gemini `generateContent` client with bounded retry on rate limiting.
pub struct GeminiClient {
    base_url: String,
    api_key: String,
    model: String,
    max_retries: u32,
    timeout: Duration,
    client: reqwest::blocking::Client,
}

impl GeminiClient {
    pub fn new(config: &ModelConfig) -> Result<Self, StructuringError> {
        if config.api_key.trim().is_empty() {
            return Err(ConfigError::MissingApiKey.into());
        }

        let client = reqwest::blocking::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| StructuringError::HttpClient(e.to_string()))?;

        Ok(Self {
            base_url: GEMINI_BASE_URL.to_string(),
            api_key: config.api_key.clone(),
            model: config.model.clone(),
            max_retries: config.max_retries,
            timeout: config.timeout,
            client,
        })
    }

    /// Point at a different endpoint (proxy or local emulator).
    pub fn with_base_url(mut self, base_url: &str) -> Self {
        self.base_url = base_url.trim_end_matches('/').to_string();
        self
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    fn endpoint(&self) -> String {
        format!("{}/v1beta/models/{}:generateContent", self.base_url, self.model)
    }
}

/// Request body for `models/*:generateContent`.
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateRequest<'a> {
    contents: Vec<RequestContent<'a>>,
    generation_config: GenerationConfig,
}

#[derive(Serialize)]
struct RequestContent<'a> {
    role: &'static str,
    parts: Vec<RequestPart<'a>>,
}

#[derive(Serialize)]
#[serde(untagged)]
enum RequestPart<'a> {
    Text {
        text: &'a str,
    },
    Inline {
        #[serde(rename = "inlineData")]
        inline_data: InlineData<'a>,
    },
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct InlineData<'a> {
    mime_type: &'a str,
    data: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig {
    response_mime_type: &'static str,
    temperature: f32,
}

#[derive(Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Deserialize)]
struct Candidate {
    #[serde(default)]
    content: Option<CandidateContent>,
}

#[derive(Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<CandidatePart>,
}

#[derive(Deserialize)]
struct CandidatePart {
    #[serde(default)]
    text: Option<String>,
}

fn build_request<'a>(prompt: &'a str, parts: &'a [ModelPart]) -> GenerateRequest<'a> {
    let mut request_parts = Vec::with_capacity(parts.len() + 1);
    request_parts.push(RequestPart::Text { text: prompt });
    for part in parts {
        request_parts.push(match part {
            ModelPart::Text { content } => RequestPart::Text { text: content },
            ModelPart::Binary { mime_type, bytes } => RequestPart::Inline {
                inline_data: InlineData {
                    mime_type,
                    data: base64::engine::general_purpose::STANDARD.encode(bytes),
                },
            },
        });
    }

    GenerateRequest {
        contents: vec![RequestContent {
            role: "user",
            parts: request_parts,
        }],
        generation_config: GenerationConfig {
            response_mime_type: "application/json",
            temperature: 0.0,
        },
    }
}

/// Concatenated text of the first candidate; empty when the model produced nothing.
fn response_text(response: GenerateResponse) -> String {
    response
        .candidates
        .into_iter()
        .next()
        .and_then(|c| c.content)
        .map(|content| {
            content
                .parts
                .into_iter()
                .filter_map(|p| p.text)
                .collect::<String>()
        })
        .unwrap_or_default()
}

/// HTTP 429, or a RESOURCE_EXHAUSTED status smuggled in another error code.
pub fn is_rate_limited(status: u16, body: &str) -> bool {
    status == 429 || body.contains("RESOURCE_EXHAUSTED")
}

/// Delay the provider asked for, if its error payload names one.
pub fn suggested_retry_delay(body: &str) -> Option<Duration> {
    RETRY_DELAY_PATTERNS.iter().find_map(|re| {
        re.captures(body)
            .and_then(|caps| caps[1].parse::<f64>().ok())
            .filter(|secs| secs.is_finite() && *secs >= 0.0)
            .map(|secs| Duration::from_secs_f64(secs.min(MAX_RETRY_DELAY.as_secs_f64())))
    })
}

/// 2s, 4s, 8s, ... capped at one minute.
pub fn backoff_delay(attempt: u32) -> Duration {
    BASE_RETRY_DELAY
        .saturating_mul(2u32.saturating_pow(attempt))
        .min(MAX_RETRY_DELAY)
}

fn truncate_body(body: &str) -> String {
    match body.char_indices().nth(ERROR_BODY_CHARS) {
        Some((cut, _)) => format!("{}...", &body[..cut]),
        None => body.to_string(),
    }
}

impl LlmClient for GeminiClient {
    fn generate(&self, prompt: &str, parts: &[ModelPart]) -> Result<String, StructuringError> {
        let url = self.endpoint();
        let body = build_request(prompt, parts);
        let mut attempt: u32 = 0;

        loop {
            let response = self
                .client
                .post(&url)
                .header("x-goog-api-key", &self.api_key)
                .json(&body)
                .send()
                .map_err(|e| {
                    if e.is_timeout() {
                        StructuringError::HttpClient(format!(
                            "Request timed out after {}s",
                            self.timeout.as_secs()
                        ))
                    } else {
                        StructuringError::HttpClient(e.to_string())
                    }
                })?;

            let status = response.status();
            if status.is_success() {
                let parsed: GenerateResponse = response
                    .json()
                    .map_err(|e| StructuringError::ResponseParsing(e.to_string()))?;
                let text = response_text(parsed);
                tracing::info!(
                    model = %self.model,
                    attempts = attempt + 1,
                    response_chars = text.len(),
                    "Model call completed"
                );
                return Ok(text);
            }

            let error_body = response.text().unwrap_or_default();
            if !is_rate_limited(status.as_u16(), &error_body) {
                return Err(StructuringError::ProviderError {
                    status: status.as_u16(),
                    body: truncate_body(&error_body),
                });
            }

            if attempt >= self.max_retries {
                return Err(StructuringError::RateLimited {
                    attempts: attempt + 1,
                });
            }

            let delay = suggested_retry_delay(&error_body).unwrap_or_else(|| backoff_delay(attempt));
            tracing::warn!(
                model = %self.model,
                attempt = attempt + 1,
                delay_ms = delay.as_millis() as u64,
                "Rate limited by model provider, retrying"
            );
            std::thread::sleep(delay);
            attempt += 1;
        }
    }
}

/// Mock LLM client for testing: returns a fixed reply and records what it was sent.
pub struct MockLlmClient {
    response: String,
    received: Mutex<Vec<ModelPart>>,
}

impl MockLlmClient {
    pub fn new(response: &str) -> Self {
        Self {
            response: response.to_string(),
            received: Mutex::new(Vec::new()),
        }
    }

    /// Parts passed to the most recent `generate` call.
    pub fn received_parts(&self) -> Vec<ModelPart> {
        self.received
            .lock()
            .map(|parts| parts.clone())
            .unwrap_or_default()
    }
}

impl LlmClient for MockLlmClient {
    fn generate(&self, _prompt: &str, parts: &[ModelPart]) -> Result<String, StructuringError> {
        if let Ok(mut received) = self.received.lock() {
            *received = parts.to_vec();
        }
        Ok(self.response.clone())
    }
}
