//! Hosted API tunnel (Anthropic-style messages endpoint)

use super::{AvailabilityCache, Tunnel, TunnelError};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;

pub const DEFAULT_URL: &str = "https://api.anthropic.com/v1/messages";
pub const DEFAULT_MODEL: &str = "claude-haiku-4-5-20251001";
pub const DEFAULT_KEY_ENV: &str = "ANTHROPIC_API_KEY";
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(60);
const API_VERSION: &str = "2023-06-01";

#[derive(Serialize)]
struct MessagesRequest<'a> {
    model: &'a str,
    max_tokens: u32,
    messages: [RequestMessage<'a>; 1],
}

#[derive(Serialize)]
struct RequestMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Deserialize)]
struct MessagesResponse {
    #[serde(default)]
    content: Vec<ContentBlock>,
}

#[derive(Deserialize)]
struct ContentBlock {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    text: String,
}

#[derive(Deserialize)]
struct ErrorResponse {
    error: ApiError,
}

#[derive(Deserialize)]
struct ApiError {
    message: String,
}

pub struct HostedApiTunnel {
    name: String,
    url: String,
    model: String,
    api_key_env: String,
    max_tokens: u32,
    timeout: Duration,
    markers: Vec<String>,
    client: reqwest::Client,
    availability: AvailabilityCache,
}

impl std::fmt::Debug for HostedApiTunnel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HostedApiTunnel")
            .field("name", &self.name)
            .field("url", &self.url)
            .field("model", &self.model)
            .field("api_key_env", &self.api_key_env)
            .finish()
    }
}

impl HostedApiTunnel {
    pub fn new(name: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            url: DEFAULT_URL.to_string(),
            model: model.into(),
            api_key_env: DEFAULT_KEY_ENV.to_string(),
            max_tokens: 4096,
            timeout: DEFAULT_TIMEOUT,
            markers: Vec::new(),
            client: reqwest::Client::new(),
            availability: AvailabilityCache::new(),
        }
    }

    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.url = url.into();
        self
    }

    pub fn with_api_key_env(mut self, var: impl Into<String>) -> Self {
        self.api_key_env = var.into();
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_markers(mut self, markers: Vec<String>) -> Self {
        self.markers = markers;
        self
    }

    fn api_key(&self) -> Option<String> {
        std::env::var(&self.api_key_env)
            .ok()
            .filter(|k| !k.trim().is_empty())
    }
}

/// Concatenate the text blocks of a messages response
fn parse_messages(body: &str) -> Result<String, TunnelError> {
    if let Ok(err) = serde_json::from_str::<ErrorResponse>(body) {
        return Err(TunnelError::Transport(err.error.message));
    }
    let parsed: MessagesResponse =
        serde_json::from_str(body).map_err(|e| TunnelError::Decode(e.to_string()))?;
    Ok(parsed
        .content
        .into_iter()
        .filter(|block| block.kind == "text")
        .map(|block| block.text)
        .collect::<Vec<_>>()
        .join(""))
}

#[async_trait]
impl Tunnel for HostedApiTunnel {
    fn name(&self) -> &str {
        &self.name
    }

    fn timeout(&self) -> Duration {
        self.timeout
    }

    fn telemetry_markers(&self) -> &[String] {
        &self.markers
    }

    fn availability(&self) -> &AvailabilityCache {
        &self.availability
    }

    async fn call(&self, prompt: &str) -> Result<String, TunnelError> {
        let key = self.api_key().ok_or_else(|| TunnelError::Unavailable {
            tunnel: self.name.clone(),
        })?;

        let request = MessagesRequest {
            model: &self.model,
            max_tokens: self.max_tokens,
            messages: [RequestMessage {
                role: "user",
                content: prompt,
            }],
        };

        let body = self
            .client
            .post(&self.url)
            .timeout(self.timeout)
            .header("x-api-key", key)
            .header("anthropic-version", API_VERSION)
            .json(&request)
            .send()
            .await?
            .text()
            .await?;
        parse_messages(&body)
    }

    /// Credentials present; no network round trip
    async fn probe(&self) -> bool {
        self.api_key().is_some()
    }
}
