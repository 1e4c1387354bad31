//! Tunnel registry - owns every tunnel instance by name

use super::{Tunnel, TunnelResult};
use std::collections::BTreeMap;
use std::sync::Arc;

/// All tunnels known to one editor session.
///
/// Registration happens at startup; afterwards the registry is shared
/// read-only (behind an `Arc`) with circuits and background tasks.
#[derive(Default)]
pub struct TunnelRegistry {
    tunnels: BTreeMap<String, Arc<dyn Tunnel>>,
}

impl std::fmt::Debug for TunnelRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TunnelRegistry")
            .field("tunnels", &self.tunnels.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl TunnelRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a tunnel, replacing any previous tunnel with the same name
    pub fn register(&mut self, tunnel: Arc<dyn Tunnel>) {
        let name = tunnel.name().to_string();
        if self.tunnels.insert(name.clone(), tunnel).is_some() {
            tracing::debug!(tunnel = %name, "replaced existing tunnel");
        }
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Tunnel>> {
        self.tunnels.get(name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.tunnels.contains_key(name)
    }

    /// All registered names, sorted
    pub fn names(&self) -> Vec<&str> {
        self.tunnels.keys().map(|s| s.as_str()).collect()
    }

    pub fn len(&self) -> usize {
        self.tunnels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tunnels.is_empty()
    }

    /// Send through the named tunnel. Never fails: an unknown name or a
    /// backend failure both come back as `success = false`.
    pub async fn send(&self, name: &str, prompt: &str) -> TunnelResult {
        match self.tunnels.get(name) {
            Some(tunnel) => tunnel.send(prompt).await,
            None => {
                tracing::warn!(tunnel = name, "send to unknown tunnel");
                TunnelResult::failed(name, prompt, format!("unknown tunnel: {}", name))
            }
        }
    }

    /// Names of tunnels whose (memoized) probe succeeds
    pub async fn list_available(&self) -> Vec<String> {
        let mut available = Vec::new();
        for (name, tunnel) in &self.tunnels {
            if tunnel.is_available().await {
                available.push(name.clone());
            }
        }
        available
    }
}
