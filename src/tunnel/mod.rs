//! Tunnels: one uniform capability over one AI backend
//!
//! A tunnel knows how to reach exactly one backend (a local echo, a CLI
//! assistant, a local or remote model runtime, a hosted API) and exposes two
//! things to the rest of the editor:
//!
//! - `send(prompt)` which always produces a [`TunnelResult`], never an error
//! - `is_available()` which probes the backend once and memoizes the answer
//!
//! ```text
//!   TunnelRegistry ──owns──▶ Arc<dyn Tunnel>
//!                                 │ call(prompt)   (one round trip, bounded timeout)
//!                                 ▼
//!                           raw backend text ──▶ strip_telemetry ──▶ TunnelResult
//! ```
//!
//! Adapters only implement [`Tunnel::call`] and [`Tunnel::probe`]. The provided
//! [`Tunnel::send`] converts every failure into `success = false` with a
//! bracketed, user-visible error string.

pub mod cli;
pub mod echo;
pub mod hosted;
pub mod local;
mod process;
pub mod registry;

pub use cli::{CliAssistantTunnel, RemoteModelTunnel};
pub use echo::EchoTunnel;
pub use hosted::HostedApiTunnel;
pub use local::LocalModelTunnel;
pub use registry::TunnelRegistry;

use async_trait::async_trait;
use serde::Serialize;
use std::time::Duration;
use tokio::sync::Mutex;

/// Substrings that mark backend telemetry or usage lines.
///
/// Any response line containing one of these is dropped before the text is
/// handed back to the caller.
pub const TELEMETRY_MARKERS: &[&str] = &[
    "Total cost:",
    "Total duration",
    "total duration:",
    "load duration:",
    "prompt eval",
    "eval count:",
    "eval rate:",
    "Usage:",
    "tokens used",
];

/// Errors a tunnel can hit while talking to its backend
///
/// `Display` produces the bracketed text shown inline in the editor.
#[derive(Debug, thiserror::Error)]
pub enum TunnelError {
    /// Backend not reachable or not authenticated
    #[error("[unavailable: {tunnel}]")]
    Unavailable { tunnel: String },

    /// Backend exceeded its time budget
    #[error("[Timeout after {}]", format_budget(.after))]
    Timeout { after: Duration },

    /// Executable missing or could not be started
    #[error("[Error: could not start `{program}`: {source}]")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    /// Process finished with a non-zero exit status
    #[error("[Error: `{program}` exited with {code}: {stderr}]")]
    Exit {
        program: String,
        code: i32,
        stderr: String,
    },

    /// Connection refused, bad status code, ...
    #[error("[Error: {0}]")]
    Transport(String),

    /// Backend answered with something we could not read
    #[error("[Error: could not decode response: {0}]")]
    Decode(String),
}

/// `120s` for whole seconds, `250ms` otherwise
fn format_budget(budget: &Duration) -> String {
    if budget.subsec_nanos() == 0 {
        format!("{}s", budget.as_secs())
    } else {
        format!("{}ms", budget.as_millis())
    }
}

impl From<reqwest::Error> for TunnelError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_decode() {
            TunnelError::Decode(e.to_string())
        } else {
            TunnelError::Transport(e.to_string())
        }
    }
}

/// Outcome of exactly one send attempt through one tunnel
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TunnelResult {
    pub tunnel: String,
    pub prompt: String,
    pub response: String,
    pub success: bool,
    pub error: Option<String>,
}

impl TunnelResult {
    pub fn ok(tunnel: &str, prompt: &str, response: impl Into<String>) -> Self {
        Self {
            tunnel: tunnel.to_string(),
            prompt: prompt.to_string(),
            response: response.into(),
            success: true,
            error: None,
        }
    }

    pub fn failed(tunnel: &str, prompt: &str, error: impl Into<String>) -> Self {
        Self {
            tunnel: tunnel.to_string(),
            prompt: prompt.to_string(),
            response: String::new(),
            success: false,
            error: Some(error.into()),
        }
    }

    /// The error text, or an empty string for successful results
    pub fn error_text(&self) -> &str {
        self.error.as_deref().unwrap_or("")
    }
}

/// A single backend connection.
///
/// Implementations perform one round trip per [`call`](Tunnel::call) and are
/// responsible for their own timeout. They never need to catch their own
/// errors; [`send`](Tunnel::send) does the normalization.
#[async_trait]
pub trait Tunnel: Send + Sync {
    /// Stable identifier, unique within a registry
    fn name(&self) -> &str;

    /// Per-call time budget
    fn timeout(&self) -> Duration;

    /// Extra telemetry markers on top of [`TELEMETRY_MARKERS`]
    fn telemetry_markers(&self) -> &[String] {
        &[]
    }

    /// Memo cell for the availability probe
    fn availability(&self) -> &AvailabilityCache;

    /// Perform one raw round trip to the backend
    async fn call(&self, prompt: &str) -> Result<String, TunnelError>;

    /// Check whether the backend can be reached right now
    async fn probe(&self) -> bool;

    /// Memoized availability. The first probe decides for the lifetime of
    /// this instance unless [`invalidate_availability`](Tunnel::invalidate_availability)
    /// is called.
    async fn is_available(&self) -> bool {
        self.availability().get_or_probe(self.probe()).await
    }

    async fn invalidate_availability(&self) {
        self.availability().invalidate().await;
    }

    /// Send a prompt and normalize every outcome into a [`TunnelResult`]
    async fn send(&self, prompt: &str) -> TunnelResult {
        let name = self.name();
        if !self.is_available().await {
            tracing::debug!(tunnel = name, "skipping send, tunnel unavailable");
            let err = TunnelError::Unavailable {
                tunnel: name.to_string(),
            };
            return TunnelResult::failed(name, prompt, err.to_string());
        }

        let budget = self.timeout();
        let outcome = match tokio::time::timeout(budget, self.call(prompt)).await {
            Ok(outcome) => outcome,
            Err(_) => Err(TunnelError::Timeout { after: budget }),
        };

        match outcome {
            Ok(raw) => {
                let text = strip_telemetry(&raw, self.telemetry_markers());
                tracing::debug!(tunnel = name, bytes = text.len(), "tunnel responded");
                TunnelResult::ok(name, prompt, text)
            }
            Err(e) => {
                tracing::warn!(tunnel = name, error = %e, "tunnel send failed");
                TunnelResult::failed(name, prompt, e.to_string())
            }
        }
    }
}

/// Lazily-filled availability flag with no expiry
///
/// The probe runs at most once per instance; concurrent callers wait for the
/// in-flight probe rather than starting another one.
#[derive(Debug, Default)]
pub struct AvailabilityCache {
    state: Mutex<Option<bool>>,
}

impl AvailabilityCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn get_or_probe<F>(&self, probe: F) -> bool
    where
        F: std::future::Future<Output = bool>,
    {
        let mut state = self.state.lock().await;
        if let Some(known) = *state {
            return known;
        }
        let available = probe.await;
        *state = Some(available);
        available
    }

    /// The cached answer, if a probe has completed
    pub async fn cached(&self) -> Option<bool> {
        *self.state.lock().await
    }

    pub async fn invalidate(&self) {
        *self.state.lock().await = None;
    }
}

/// Drop telemetry/usage lines and trim the remaining text
pub fn strip_telemetry(raw: &str, extra_markers: &[String]) -> String {
    raw.lines()
        .filter(|line| {
            !TELEMETRY_MARKERS.iter().any(|m| line.contains(m))
                && !extra_markers.iter().any(|m| line.contains(m.as_str()))
        })
        .collect::<Vec<_>>()
        .join("\n")
        .trim()
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_strip_telemetry_default_markers() {
        let raw = "Here is the fix.\n\ntotal duration: 1.2s\neval count: 42 token(s)\nDone.\n";
        assert_eq!(strip_telemetry(raw, &[]), "Here is the fix.\n\nDone.");
    }

    #[test]
    fn test_strip_telemetry_extra_markers() {
        let raw = "answer\n>> billing: 3 credits\n";
        let extra = vec![">> billing".to_string()];
        assert_eq!(strip_telemetry(raw, &extra), "answer");
    }

    #[test]
    fn test_error_display_is_bracketed() {
        let timeout = TunnelError::Timeout {
            after: Duration::from_secs(120),
        };
        assert_eq!(timeout.to_string(), "[Timeout after 120s]");

        let short = TunnelError::Timeout {
            after: Duration::from_millis(250),
        };
        assert_eq!(short.to_string(), "[Timeout after 250ms]");

        let unavailable = TunnelError::Unavailable {
            tunnel: "claude".to_string(),
        };
        assert_eq!(unavailable.to_string(), "[unavailable: claude]");

        let transport = TunnelError::Transport("connection refused".to_string());
        assert_eq!(transport.to_string(), "[Error: connection refused]");
    }

    #[test]
    fn test_tunnel_result_constructors() {
        let ok = TunnelResult::ok("echo", "hi", "[echo] hi");
        assert!(ok.success);
        assert_eq!(ok.error_text(), "");

        let failed = TunnelResult::failed("claude", "hi", "[Timeout after 1s]");
        assert!(!failed.success);
        assert!(failed.response.is_empty());
        assert_eq!(failed.error_text(), "[Timeout after 1s]");
    }

    #[tokio::test]
    async fn test_availability_probes_once() {
        let cache = AvailabilityCache::new();
        let probes = AtomicUsize::new(0);

        for _ in 0..3 {
            let available = cache
                .get_or_probe(async {
                    probes.fetch_add(1, Ordering::SeqCst);
                    false
                })
                .await;
            assert!(!available);
        }
        assert_eq!(probes.load(Ordering::SeqCst), 1);
        assert_eq!(cache.cached().await, Some(false));
    }

    #[tokio::test]
    async fn test_availability_invalidate_reprobes() {
        let cache = AvailabilityCache::new();
        assert!(!cache.get_or_probe(async { false }).await);

        cache.invalidate().await;
        assert_eq!(cache.cached().await, None);
        assert!(cache.get_or_probe(async { true }).await);
    }
}
