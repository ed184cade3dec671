//! Code generation service seam and its HTTP client.

use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;
use tracing::debug;

use crate::config::CodeGenConfig;

#[derive(Debug, thiserror::Error)]
pub enum CodeGenError {
    #[error("code generation request failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("code generation service returned {status}: {body}")]
    Status { status: u16, body: String },

    #[error("code generation service returned an empty response")]
    Empty,

    #[error("{0}")]
    Other(String),
}

/// Text-in, text-out generator used by the external rewrite tier.
#[async_trait]
pub trait CodeGenService: Send + Sync {
    async fn generate(&self, prompt: &str) -> Result<String, CodeGenError>;
}

#[derive(Debug, Serialize)]
struct GenerateRequest<'a> {
    prompt: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    model: Option<&'a str>,
}

/// POSTs `{"prompt": ...}` to an HTTP endpoint.
pub struct HttpCodeGenService {
    config: CodeGenConfig,
    token: Option<String>,
    http_client: reqwest::Client,
}

impl HttpCodeGenService {
    /// Build the client, reading the bearer token from `api_key_env` once.
    pub fn new(config: CodeGenConfig) -> Result<Self, CodeGenError> {
        let http_client = reqwest::Client::builder()
            .user_agent(concat!("canship/", env!("CARGO_PKG_VERSION")))
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        let token = config
            .api_key_env
            .as_deref()
            .and_then(|var| std::env::var(var).ok())
            .filter(|t| !t.is_empty());

        Ok(Self {
            config,
            token,
            http_client,
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.config.endpoint
    }
}

#[async_trait]
impl CodeGenService for HttpCodeGenService {
    async fn generate(&self, prompt: &str) -> Result<String, CodeGenError> {
        let mut request = self.http_client.post(&self.config.endpoint).json(&GenerateRequest {
            prompt,
            model: self.config.model.as_deref(),
        });
        if let Some(token) = &self.token {
            request = request.bearer_auth(token);
        }

        let response = request.send().await?;
        let status = response.status();
        let body = response.text().await?;
        debug!(status = status.as_u16(), bytes = body.len(), "code generation response");

        if !status.is_success() {
            return Err(CodeGenError::Status {
                status: status.as_u16(),
                body,
            });
        }
        extract_text(&body).ok_or(CodeGenError::Empty)
    }
}

/// `text`, `content` or `completion` field of a JSON body; the raw body
/// otherwise.
fn extract_text(body: &str) -> Option<String> {
    if let Ok(Value::Object(map)) = serde_json::from_str::<Value>(body) {
        if let Some(text) = ["text", "content", "completion"]
            .iter()
            .find_map(|k| map.get(*k).and_then(Value::as_str))
        {
            return Some(text.to_string()).filter(|t| !t.trim().is_empty());
        }
    }
    Some(body.to_string()).filter(|t| !t.trim().is_empty())
}
