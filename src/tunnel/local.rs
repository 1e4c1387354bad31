//! Local model runtime over HTTP (ollama-compatible `/api/generate`)

use super::{AvailabilityCache, Tunnel, TunnelError};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;

pub const DEFAULT_URL: &str = "http://localhost:11434";
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(60);

#[derive(Serialize)]
struct GenerateRequest<'a> {
    model: &'a str,
    prompt: &'a str,
    stream: bool,
}

#[derive(Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    response: String,
    #[serde(default)]
    error: Option<String>,
}

pub struct LocalModelTunnel {
    name: String,
    base_url: String,
    model: String,
    timeout: Duration,
    markers: Vec<String>,
    client: reqwest::Client,
    availability: AvailabilityCache,
}

impl LocalModelTunnel {
    pub fn new(name: impl Into<String>, base_url: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            model: model.into(),
            timeout: DEFAULT_TIMEOUT,
            markers: Vec::new(),
            client: reqwest::Client::new(),
            availability: AvailabilityCache::new(),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_markers(mut self, markers: Vec<String>) -> Self {
        self.markers = markers;
        self
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }
}

/// Pull the generated text out of a `/api/generate` body
fn parse_generate(body: &str) -> Result<String, TunnelError> {
    let parsed: GenerateResponse =
        serde_json::from_str(body).map_err(|e| TunnelError::Decode(e.to_string()))?;
    match parsed.error {
        Some(err) => Err(TunnelError::Transport(err)),
        None => Ok(parsed.response),
    }
}

#[async_trait]
impl Tunnel for LocalModelTunnel {
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
        let request = GenerateRequest {
            model: &self.model,
            prompt,
            stream: false,
        };
        let body = self
            .client
            .post(self.endpoint("/api/generate"))
            .timeout(self.timeout)
            .json(&request)
            .send()
            .await?
            .text()
            .await?;
        parse_generate(&body)
    }

    async fn probe(&self) -> bool {
        let response = self
            .client
            .get(self.endpoint("/api/tags"))
            .timeout(Duration::from_secs(3))
            .send()
            .await;
        match response {
            Ok(r) => r.status().is_success(),
            Err(e) => {
                tracing::debug!(tunnel = %self.name, error = %e, "local model probe failed");
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_generate_response() {
        let body = r#"{"model":"llama3.2","response":"fn main() {}","done":true}"#;
        assert_eq!(parse_generate(body).unwrap(), "fn main() {}");
    }

    #[test]
    fn test_parse_generate_error() {
        let body = r#"{"error":"model 'nope' not found"}"#;
        let err = parse_generate(body).unwrap_err();
        assert_eq!(err.to_string(), "[Error: model 'nope' not found]");
    }

    #[test]
    fn test_parse_generate_garbage() {
        assert!(matches!(parse_generate("<html>"), Err(TunnelError::Decode(_))));
    }

    #[test]
    fn test_base_url_trailing_slash() {
        let tunnel = LocalModelTunnel::new("ollama", "http://box:11434/", "llama3.2");
        assert_eq!(tunnel.endpoint("/api/tags"), "http://box:11434/api/tags");
    }

    #[tokio::test]
    async fn test_unreachable_runtime_is_unavailable() {
        // Port 9 (discard) is essentially never serving HTTP.
        let tunnel = LocalModelTunnel::new("ollama", "http://127.0.0.1:9", "llama3.2");
        let result = tunnel.send("hello").await;
        assert!(!result.success);
        assert_eq!(result.error.as_deref(), Some("[unavailable: ollama]"));
    }
}
