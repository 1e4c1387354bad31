//! Echo tunnel - the always-available offline backend

use super::{AvailabilityCache, Tunnel, TunnelError};
use async_trait::async_trait;
use std::time::Duration;

pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);

/// Returns the prompt back, prefixed with `[echo]`.
///
/// Sits at the end of fallback circuits so the editor always gets an answer.
pub struct EchoTunnel {
    name: String,
    timeout: Duration,
    availability: AvailabilityCache,
}

impl EchoTunnel {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            timeout: DEFAULT_TIMEOUT,
            availability: AvailabilityCache::new(),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

#[async_trait]
impl Tunnel for EchoTunnel {
    fn name(&self) -> &str {
        &self.name
    }

    fn timeout(&self) -> Duration {
        self.timeout
    }

    fn availability(&self) -> &AvailabilityCache {
        &self.availability
    }

    async fn call(&self, prompt: &str) -> Result<String, TunnelError> {
        Ok(format!("[echo] {}", prompt))
    }

    async fn probe(&self) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_echo_send() {
        let tunnel = EchoTunnel::new("echo");
        let result = tunnel.send("hello").await;
        assert!(result.success);
        assert_eq!(result.response, "[echo] hello");
        assert_eq!(result.tunnel, "echo");
        assert!(tunnel.is_available().await);
    }
}
