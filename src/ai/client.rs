//! Chat-completions client for OpenAI-compatible endpoints (OpenAI, Groq)

use std::fmt;
use std::time::Duration;

use anyhow::{Context, Result};
use futures::FutureExt;
use futures::future::BoxFuture;
use reqwest::header::RETRY_AFTER;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};

use crate::config::{AiConfig, Provider};

/// Result of a single completion attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CompletionOutcome {
    Success(String),
    /// HTTP 429. `retry_after` is the server's hint, zero if none was given.
    RateLimited { retry_after: Duration },
    /// HTTP 401/403, carrying the provider's message
    AuthError(String),
    /// 5xx, 408, timeouts and connection failures
    TransientError(String),
    /// Anything else: other 4xx, malformed bodies, exhausted quota
    FatalError(String),
}

impl CompletionOutcome {
    pub fn kind(&self) -> &'static str {
        match self {
            CompletionOutcome::Success(_) => "success",
            CompletionOutcome::RateLimited { .. } => "rate_limited",
            CompletionOutcome::AuthError(_) => "auth_error",
            CompletionOutcome::TransientError(_) => "transient_error",
            CompletionOutcome::FatalError(_) => "fatal_error",
        }
    }
}

impl fmt::Display for CompletionOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CompletionOutcome::Success(_) => write!(f, "success"),
            CompletionOutcome::RateLimited { retry_after } => {
                write!(f, "rate limited (retry after {:?})", retry_after)
            }
            CompletionOutcome::AuthError(msg) => write!(f, "authentication failed: {}", msg),
            CompletionOutcome::TransientError(msg) => write!(f, "transient error: {}", msg),
            CompletionOutcome::FatalError(msg) => write!(f, "error: {}", msg),
        }
    }
}

/// One-shot text completion. Implementations never retry.
pub trait CompletionClient: Send + Sync {
    fn name(&self) -> &str;

    fn complete<'a>(
        &'a self,
        prompt: &'a str,
        timeout: Duration,
    ) -> BoxFuture<'a, CompletionOutcome>;
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<Message<'a>>,
    temperature: f32,
    max_tokens: u32,
}

#[derive(Serialize)]
struct Message<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<Choice>,
}

#[derive(Deserialize)]
struct Choice {
    message: ResponseMessage,
}

#[derive(Deserialize)]
struct ResponseMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Deserialize)]
struct ApiErrorBody {
    error: ApiError,
}

#[derive(Deserialize)]
struct ApiError {
    #[serde(default)]
    message: String,
    #[serde(default, rename = "type")]
    kind: Option<String>,
    #[serde(default)]
    code: Option<String>,
}

#[derive(Deserialize)]
struct ModelList {
    data: Vec<ModelEntry>,
}

#[derive(Deserialize)]
struct ModelEntry {
    id: String,
}

/// HTTPS client for a provider's `/chat/completions` endpoint
#[derive(Clone)]
pub struct ChatCompletionClient {
    client: Client,
    provider: Provider,
    api_key: String,
    model: String,
    base_url: String,
    temperature: f32,
    max_tokens: u32,
}

impl ChatCompletionClient {
    pub fn new(config: &AiConfig, api_key: String) -> Self {
        let base_url = config
            .base_url
            .clone()
            .unwrap_or_else(|| config.provider.default_base_url().to_string());

        Self {
            client: Client::new(),
            provider: config.provider,
            api_key,
            model: config.model_or_default().to_string(),
            base_url: base_url.trim_end_matches('/').to_string(),
            temperature: config.temperature,
            max_tokens: config.max_tokens,
        }
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    async fn send(&self, prompt: &str, timeout: Duration) -> CompletionOutcome {
        let request = ChatRequest {
            model: &self.model,
            messages: vec![Message {
                role: "user",
                content: prompt,
            }],
            temperature: self.temperature,
            max_tokens: self.max_tokens,
        };

        let response = match self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(&self.api_key)
            .timeout(timeout)
            .json(&request)
            .send()
            .await
        {
            Ok(response) => response,
            Err(e) => return classify_transport_error(&e),
        };

        let status = response.status();
        let retry_after = parse_retry_after(&response);

        let body = match response.text().await {
            Ok(body) => body,
            Err(e) => return classify_transport_error(&e),
        };

        if !status.is_success() {
            return classify_status(status, retry_after, &body);
        }

        parse_completion(&body)
    }

    /// List model ids available to the configured key
    pub async fn list_models(&self) -> Result<Vec<String>> {
        let response = self
            .client
            .get(format!("{}/models", self.base_url))
            .bearer_auth(&self.api_key)
            .send()
            .await
            .with_context(|| format!("Failed to send request to {}", self.provider))?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();
            anyhow::bail!(
                "{} API error ({}): {}",
                self.provider,
                status,
                error_message(&error_text)
            );
        }

        let list: ModelList = response
            .json()
            .await
            .with_context(|| format!("Failed to parse {} model list", self.provider))?;

        let mut models: Vec<String> = list
            .data
            .into_iter()
            .map(|m| m.id)
            .filter(|id| self.provider != Provider::OpenAi || id.to_lowercase().contains("gpt"))
            .collect();
        models.sort();
        Ok(models)
    }
}

impl CompletionClient for ChatCompletionClient {
    fn name(&self) -> &str {
        self.provider.display_name()
    }

    fn complete<'a>(
        &'a self,
        prompt: &'a str,
        timeout: Duration,
    ) -> BoxFuture<'a, CompletionOutcome> {
        self.send(prompt, timeout).boxed()
    }
}

fn classify_transport_error(err: &reqwest::Error) -> CompletionOutcome {
    if err.is_timeout() {
        CompletionOutcome::TransientError("request timed out".to_string())
    } else if err.is_connect() || err.is_request() || err.is_body() {
        CompletionOutcome::TransientError(format!("network error: {}", err))
    } else {
        CompletionOutcome::FatalError(format!("request failed: {}", err))
    }
}

fn classify_status(status: StatusCode, retry_after: Duration, body: &str) -> CompletionOutcome {
    let message = error_message(body);
    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => CompletionOutcome::AuthError(message),
        StatusCode::TOO_MANY_REQUESTS if is_quota_exhausted(body) => {
            CompletionOutcome::FatalError(format!("quota exhausted: {}", message))
        }
        StatusCode::TOO_MANY_REQUESTS => CompletionOutcome::RateLimited { retry_after },
        StatusCode::REQUEST_TIMEOUT => {
            CompletionOutcome::TransientError(format!("{}: {}", status, message))
        }
        s if s.is_server_error() => {
            CompletionOutcome::TransientError(format!("{}: {}", status, message))
        }
        _ => CompletionOutcome::FatalError(format!("{}: {}", status, message)),
    }
}

fn parse_completion(body: &str) -> CompletionOutcome {
    let chat_response: ChatResponse = match serde_json::from_str(body) {
        Ok(parsed) => parsed,
        Err(e) => return CompletionOutcome::FatalError(format!("malformed response: {}", e)),
    };

    chat_response
        .choices
        .into_iter()
        .next()
        .and_then(|choice| choice.message.content)
        .filter(|content| !content.trim().is_empty())
        .map(CompletionOutcome::Success)
        .unwrap_or_else(|| CompletionOutcome::FatalError("no response content".to_string()))
}

/// `Retry-After` in seconds; HTTP-date and out-of-range values are ignored
fn parse_retry_after(response: &reqwest::Response) -> Duration {
    response
        .headers()
        .get(RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse::<f64>().ok())
        .and_then(|secs| Duration::try_from_secs_f64(secs).ok())
        .unwrap_or(Duration::ZERO)
}

fn error_message(body: &str) -> String {
    match serde_json::from_str::<ApiErrorBody>(body) {
        Ok(parsed) if !parsed.error.message.is_empty() => parsed.error.message,
        _ => {
            let trimmed = body.trim();
            if trimmed.chars().count() > 200 {
                format!("{}...", trimmed.chars().take(200).collect::<String>())
            } else {
                trimmed.to_string()
            }
        }
    }
}

fn is_quota_exhausted(body: &str) -> bool {
    if let Ok(parsed) = serde_json::from_str::<ApiErrorBody>(body) {
        let error = parsed.error;
        if error.kind.as_deref() == Some("insufficient_quota")
            || error.code.as_deref() == Some("insufficient_quota")
        {
            return true;
        }
    }
    // Plain-text bodies from proxies that drop the JSON envelope
    body.to_ascii_lowercase().contains("exceeded your current quota")
}
