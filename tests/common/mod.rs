//! Scripted tunnels shared by the integration tests.

#![allow(dead_code)]

use async_trait::async_trait;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tunnelvision::tunnel::AvailabilityCache;
use tunnelvision::{Tunnel, TunnelError, TunnelRegistry};

/// Replies with a fixed text (or fails), counting every call
pub struct ScriptedTunnel {
    name: String,
    reply: Result<String, String>,
    available: bool,
    delay: Duration,
    probe_delay: Duration,
    gate: Option<Arc<Notify>>,
    timeout: Duration,
    calls: Arc<AtomicUsize>,
    prompts: Arc<std::sync::Mutex<Vec<String>>>,
    availability: AvailabilityCache,
}

impl ScriptedTunnel {
    pub fn ok(name: &str, reply: &str) -> Self {
        Self::new(name, Ok(reply.to_string()))
    }

    pub fn failing(name: &str, error: &str) -> Self {
        Self::new(name, Err(error.to_string()))
    }

    pub fn offline(name: &str) -> Self {
        let mut tunnel = Self::new(name, Ok(String::new()));
        tunnel.available = false;
        tunnel
    }

    fn new(name: &str, reply: Result<String, String>) -> Self {
        Self {
            name: name.to_string(),
            reply,
            available: true,
            delay: Duration::ZERO,
            probe_delay: Duration::ZERO,
            gate: None,
            timeout: Duration::from_secs(5),
            calls: Arc::new(AtomicUsize::new(0)),
            prompts: Arc::new(std::sync::Mutex::new(Vec::new())),
            availability: AvailabilityCache::new(),
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn with_probe_delay(mut self, delay: Duration) -> Self {
        self.probe_delay = delay;
        self
    }

    /// Hold every call until the returned `Notify` is signalled
    pub fn gated(mut self) -> (Self, Arc<Notify>) {
        let gate = Arc::new(Notify::new());
        self.gate = Some(Arc::clone(&gate));
        (self, gate)
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Shared call counter, readable after the tunnel moves into a registry
    pub fn calls(&self) -> Arc<AtomicUsize> {
        Arc::clone(&self.calls)
    }

    /// Every prompt this tunnel received, in order
    pub fn prompts(&self) -> Arc<std::sync::Mutex<Vec<String>>> {
        Arc::clone(&self.prompts)
    }
}

#[async_trait]
impl Tunnel for ScriptedTunnel {
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
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.prompts.lock().unwrap().push(prompt.to_string());
        if let Some(gate) = &self.gate {
            gate.notified().await;
        }
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        self.reply.clone().map_err(TunnelError::Transport)
    }

    async fn probe(&self) -> bool {
        if !self.probe_delay.is_zero() {
            tokio::time::sleep(self.probe_delay).await;
        }
        self.available
    }
}

pub fn count(calls: &Arc<AtomicUsize>) -> usize {
    calls.load(Ordering::SeqCst)
}

pub fn registry(tunnels: Vec<ScriptedTunnel>) -> TunnelRegistry {
    let mut registry = TunnelRegistry::new();
    for tunnel in tunnels {
        registry.register(Arc::new(tunnel));
    }
    registry
}
