//! Subprocess-backed tunnels
//!
//! - [`CliAssistantTunnel`] drives a command-line assistant (`claude -p`, ...)
//! - [`RemoteModelTunnel`] runs a model on another machine over `ssh`

use super::process;
use super::{AvailabilityCache, Tunnel, TunnelError};
use async_trait::async_trait;
use std::time::Duration;

/// CLI assistants may stream long answers, so they get the largest budget.
pub const CLI_TIMEOUT: Duration = Duration::from_secs(120);
pub const REMOTE_TIMEOUT: Duration = Duration::from_secs(90);
const PROBE_TIMEOUT: Duration = Duration::from_secs(5);

/// Runs `program args... <prompt>` and returns stdout
pub struct CliAssistantTunnel {
    name: String,
    program: String,
    args: Vec<String>,
    timeout: Duration,
    markers: Vec<String>,
    availability: AvailabilityCache,
}

impl CliAssistantTunnel {
    pub fn new(name: impl Into<String>, program: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            name: name.into(),
            program: program.into(),
            args,
            timeout: CLI_TIMEOUT,
            markers: Vec::new(),
            availability: AvailabilityCache::new(),
        }
    }

    /// Build from a shell-style command string such as `"claude -p"`
    pub fn from_command_string(name: impl Into<String>, cmd: &str) -> Result<Self, String> {
        let parts =
            shell_words::split(cmd).map_err(|e| format!("Failed to parse command: {}", e))?;

        let (program, args) = parts
            .split_first()
            .ok_or_else(|| "Command string cannot be empty".to_string())?;

        Ok(Self::new(name, program.clone(), args.to_vec()))
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_markers(mut self, markers: Vec<String>) -> Self {
        self.markers = markers;
        self
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    pub fn args(&self) -> &[String] {
        &self.args
    }
}

#[async_trait]
impl Tunnel for CliAssistantTunnel {
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
        let mut args = self.args.clone();
        args.push(prompt.to_string());
        process::run(&self.program, &args).await
    }

    async fn probe(&self) -> bool {
        process::succeeds_within(&self.program, &["--version".to_string()], PROBE_TIMEOUT).await
    }
}

/// Runs `ssh [ssh_args] <host> ollama run <model> <prompt>`
pub struct RemoteModelTunnel {
    name: String,
    host: String,
    model: String,
    ssh_args: Vec<String>,
    timeout: Duration,
    markers: Vec<String>,
    availability: AvailabilityCache,
}

impl RemoteModelTunnel {
    pub fn new(name: impl Into<String>, host: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            host: host.into(),
            model: model.into(),
            ssh_args: Vec::new(),
            timeout: REMOTE_TIMEOUT,
            markers: Vec::new(),
            availability: AvailabilityCache::new(),
        }
    }

    pub fn with_ssh_args(mut self, ssh_args: Vec<String>) -> Self {
        self.ssh_args = ssh_args;
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

    pub fn host(&self) -> &str {
        &self.host
    }

    fn command_args(&self, prompt: &str) -> Vec<String> {
        let mut args = self.ssh_args.clone();
        args.push(self.host.clone());
        args.push("ollama".to_string());
        args.push("run".to_string());
        args.push(self.model.clone());
        // The remote shell re-parses the command line.
        args.push(shell_words::quote(prompt).into_owned());
        args
    }
}

#[async_trait]
impl Tunnel for RemoteModelTunnel {
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
        process::run("ssh", &self.command_args(prompt)).await
    }

    /// One non-interactive handshake
    async fn probe(&self) -> bool {
        let mut args = self.ssh_args.clone();
        args.extend(
            ["-o", "BatchMode=yes", "-o", "ConnectTimeout=5"]
                .iter()
                .map(|s| s.to_string()),
        );
        args.push(self.host.clone());
        args.push("true".to_string());
        process::succeeds_within("ssh", &args, PROBE_TIMEOUT * 2).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_command_string() {
        let tunnel = CliAssistantTunnel::from_command_string("claude", "claude -p --verbose").unwrap();
        assert_eq!(tunnel.program(), "claude");
        assert_eq!(tunnel.args(), ["-p", "--verbose"]);
        assert_eq!(tunnel.timeout(), CLI_TIMEOUT);
    }

    #[test]
    fn test_from_command_string_empty() {
        assert!(CliAssistantTunnel::from_command_string("claude", "").is_err());
        assert!(CliAssistantTunnel::from_command_string("claude", "'unterminated").is_err());
    }

    #[test]
    fn test_remote_command_args_quote_prompt() {
        let tunnel = RemoteModelTunnel::new("gpu", "gpu-box", "qwen2.5-coder")
            .with_ssh_args(vec!["-p".to_string(), "2222".to_string()]);
        let args = tunnel.command_args("what's up");
        assert_eq!(
            args,
            ["-p", "2222", "gpu-box", "ollama", "run", "qwen2.5-coder", "'what'\\''s up'"]
        );
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_cli_send_appends_prompt() {
        // `echo` has no --version flag but still exits 0, so the probe passes.
        let tunnel = CliAssistantTunnel::new("shout", "echo", vec!["reply:".to_string()]);
        let result = tunnel.send("hello there").await;
        assert!(result.success, "{:?}", result.error);
        assert_eq!(result.response, "reply: hello there");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_cli_send_timeout_is_normalized() {
        let tunnel = CliAssistantTunnel::new("slow", "sh", vec!["-c".to_string(), "sleep 5".to_string()])
            .with_timeout(Duration::from_millis(100));
        // Prime the cache so the probe (`sh --version`) doesn't matter here.
        tunnel.availability().get_or_probe(async { true }).await;

        let result = tunnel.send("ignored").await;
        assert!(!result.success);
        assert_eq!(result.error.as_deref(), Some("[Timeout after 100ms]"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_cli_missing_executable_is_unavailable() {
        let tunnel = CliAssistantTunnel::new("ghost", "tunnelvision-no-such-binary", vec![]);
        assert!(!tunnel.is_available().await);
        let result = tunnel.send("hi").await;
        assert!(!result.success);
        assert_eq!(result.error.as_deref(), Some("[unavailable: ghost]"));
    }
}
