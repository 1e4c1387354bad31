//! Configuration
//!
//! Supports both global (~/.config/tunnelvision/config.toml) and local
//! (.tunnelvision/config.toml) files. Local settings override global ones,
//! which override the built-in defaults.
//!
//! ```toml
//! default_circuit = "auto"
//! accept_mode = "on-save"
//!
//! [tunnels.claude]
//! kind = "cli"
//! command = "claude -p"
//! timeout_secs = 180
//!
//! [tunnels.gpu]
//! kind = "remote"
//! host = "gpu-box"
//! model = "qwen2.5-coder"
//!
//! [circuits.review]
//! kind = "chain"
//! tunnels = ["gpu", "claude"]
//! ```

use crate::circuit::registry::DEFAULT_CIRCUIT;
use crate::circuit::{Circuit, CircuitRegistry};
use crate::edits::AcceptMode;
use crate::tunnel::{
    hosted, local, CliAssistantTunnel, EchoTunnel, HostedApiTunnel, LocalModelTunnel,
    RemoteModelTunnel, Tunnel, TunnelRegistry,
};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

pub const LOCAL_DIR: &str = ".tunnelvision";
pub const CONFIG_FILE: &str = "config.toml";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Could not read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Invalid config {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
    #[error("Tunnel '{name}': {reason}")]
    Tunnel { name: String, reason: String },
    #[error("Circuit '{name}': {reason}")]
    Circuit { name: String, reason: String },
}

/// Top-level configuration
#[derive(Debug, Deserialize, Serialize, Default, Clone)]
pub struct Config {
    /// Circuit used for prompts without an `@name` sigil
    #[serde(default)]
    pub default_circuit: Option<String>,

    #[serde(default)]
    pub accept_mode: Option<AcceptMode>,

    /// Tunnel configurations by name
    #[serde(default)]
    pub tunnels: HashMap<String, TunnelConfig>,

    /// Derived circuits by name
    #[serde(default)]
    pub circuits: HashMap<String, CircuitConfig>,
}

/// One backend
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum TunnelConfig {
    Echo {
        #[serde(default)]
        timeout_secs: Option<u64>,
    },
    Cli {
        /// Shell-style command, prompt is appended as the last argument
        command: String,
        #[serde(default)]
        timeout_secs: Option<u64>,
        #[serde(default)]
        telemetry_markers: Vec<String>,
    },
    Local {
        #[serde(default)]
        url: Option<String>,
        model: String,
        #[serde(default)]
        timeout_secs: Option<u64>,
        #[serde(default)]
        telemetry_markers: Vec<String>,
    },
    Remote {
        host: String,
        model: String,
        #[serde(default)]
        ssh_args: Vec<String>,
        #[serde(default)]
        timeout_secs: Option<u64>,
        #[serde(default)]
        telemetry_markers: Vec<String>,
    },
    Hosted {
        #[serde(default)]
        url: Option<String>,
        #[serde(default)]
        model: Option<String>,
        #[serde(default)]
        api_key_env: Option<String>,
        #[serde(default)]
        max_tokens: Option<u32>,
        #[serde(default)]
        timeout_secs: Option<u64>,
        #[serde(default)]
        telemetry_markers: Vec<String>,
    },
}

#[derive(Debug, Deserialize, Serialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum CircuitKindConfig {
    Direct,
    Chain,
    Parallel,
    Fallback,
}

/// A circuit defined in config, on top of the built-ins
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct CircuitConfig {
    pub kind: CircuitKindConfig,
    pub tunnels: Vec<String>,
}

impl TunnelConfig {
    /// Instantiate the tunnel this entry describes
    pub fn build(&self, name: &str) -> Result<Arc<dyn Tunnel>, ConfigError> {
        let secs = |t: &Option<u64>, default: Duration| t.map(Duration::from_secs).unwrap_or(default);

        let tunnel: Arc<dyn Tunnel> = match self {
            TunnelConfig::Echo { timeout_secs } => Arc::new(
                EchoTunnel::new(name).with_timeout(secs(timeout_secs, crate::tunnel::echo::DEFAULT_TIMEOUT)),
            ),
            TunnelConfig::Cli {
                command,
                timeout_secs,
                telemetry_markers,
            } => {
                let tunnel = CliAssistantTunnel::from_command_string(name, command).map_err(
                    |reason| ConfigError::Tunnel {
                        name: name.to_string(),
                        reason,
                    },
                )?;
                Arc::new(
                    tunnel
                        .with_timeout(secs(timeout_secs, crate::tunnel::cli::CLI_TIMEOUT))
                        .with_markers(telemetry_markers.clone()),
                )
            }
            TunnelConfig::Local {
                url,
                model,
                timeout_secs,
                telemetry_markers,
            } => Arc::new(
                LocalModelTunnel::new(name, url.as_deref().unwrap_or(local::DEFAULT_URL), model)
                    .with_timeout(secs(timeout_secs, local::DEFAULT_TIMEOUT))
                    .with_markers(telemetry_markers.clone()),
            ),
            TunnelConfig::Remote {
                host,
                model,
                ssh_args,
                timeout_secs,
                telemetry_markers,
            } => {
                if host.trim().is_empty() {
                    return Err(ConfigError::Tunnel {
                        name: name.to_string(),
                        reason: "remote tunnels need a host".to_string(),
                    });
                }
                Arc::new(
                    RemoteModelTunnel::new(name, host, model)
                        .with_ssh_args(ssh_args.clone())
                        .with_timeout(secs(timeout_secs, crate::tunnel::cli::REMOTE_TIMEOUT))
                        .with_markers(telemetry_markers.clone()),
                )
            }
            TunnelConfig::Hosted {
                url,
                model,
                api_key_env,
                max_tokens,
                timeout_secs,
                telemetry_markers,
            } => {
                let mut tunnel =
                    HostedApiTunnel::new(name, model.as_deref().unwrap_or(hosted::DEFAULT_MODEL))
                        .with_timeout(secs(timeout_secs, hosted::DEFAULT_TIMEOUT))
                        .with_markers(telemetry_markers.clone());
                if let Some(url) = url {
                    tunnel = tunnel.with_url(url);
                }
                if let Some(var) = api_key_env {
                    tunnel = tunnel.with_api_key_env(var);
                }
                if let Some(max_tokens) = max_tokens {
                    tunnel = tunnel.with_max_tokens(*max_tokens);
                }
                Arc::new(tunnel)
            }
        };
        Ok(tunnel)
    }
}

impl CircuitConfig {
    pub fn build(&self, name: &str) -> Result<Circuit, ConfigError> {
        let invalid = |reason: &str| ConfigError::Circuit {
            name: name.to_string(),
            reason: reason.to_string(),
        };

        if self.tunnels.is_empty() {
            return Err(invalid("needs at least one tunnel"));
        }

        Ok(match self.kind {
            CircuitKindConfig::Direct => match self.tunnels.as_slice() {
                [tunnel] => Circuit::direct(name, tunnel.clone()),
                _ => return Err(invalid("direct circuits take exactly one tunnel")),
            },
            CircuitKindConfig::Chain => Circuit::chain(name, self.tunnels.clone()),
            CircuitKindConfig::Parallel => Circuit::parallel(name, self.tunnels.clone()),
            CircuitKindConfig::Fallback => Circuit::fallback(name, self.tunnels.clone()),
        })
    }
}

impl Config {
    /// Load config, merging global and local files over the defaults
    ///
    /// Priority: local > global > defaults. Unreadable or invalid files are
    /// logged and skipped.
    pub fn load() -> Self {
        let mut config = Self::with_defaults();
        for path in [Self::global_path(), Self::local_path()].into_iter().flatten() {
            match Self::load_from_path(&path) {
                Ok(Some(file)) => {
                    tracing::info!(path = %path.display(), "loaded config");
                    config = config.merge(file);
                }
                Ok(None) => {}
                Err(e) => tracing::warn!(error = %e, "ignoring config file"),
            }
        }
        config
    }

    /// ~/.config/tunnelvision/config.toml
    pub fn global_path() -> Option<PathBuf> {
        Some(dirs::config_dir()?.join("tunnelvision").join(CONFIG_FILE))
    }

    /// .tunnelvision/config.toml in the nearest ancestor that has one
    pub fn local_path() -> Option<PathBuf> {
        Some(find_local_dir()?.join(CONFIG_FILE))
    }

    /// Parse one file; `Ok(None)` if it does not exist
    pub fn load_from_path(path: &Path) -> Result<Option<Self>, ConfigError> {
        let contents = match std::fs::read_to_string(path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(source) => {
                return Err(ConfigError::Io {
                    path: path.to_path_buf(),
                    source,
                })
            }
        };

        toml::from_str::<Config>(&contents)
            .map(Some)
            .map_err(|source| ConfigError::Parse {
                path: path.to_path_buf(),
                source,
            })
    }

    /// Merge two configs, with `other` taking precedence
    pub fn merge(mut self, other: Self) -> Self {
        if other.default_circuit.is_some() {
            self.default_circuit = other.default_circuit;
        }
        if other.accept_mode.is_some() {
            self.accept_mode = other.accept_mode;
        }
        self.tunnels.extend(other.tunnels);
        self.circuits.extend(other.circuits);
        self
    }

    /// Built-in tunnels: echo, claude (CLI), ollama (local), api (hosted)
    pub fn with_defaults() -> Self {
        let mut tunnels = HashMap::new();

        tunnels.insert("echo".to_string(), TunnelConfig::Echo { timeout_secs: None });

        tunnels.insert(
            "claude".to_string(),
            TunnelConfig::Cli {
                command: "claude -p".to_string(),
                timeout_secs: None,
                telemetry_markers: vec![],
            },
        );

        tunnels.insert(
            "ollama".to_string(),
            TunnelConfig::Local {
                url: None,
                model: "llama3.2".to_string(),
                timeout_secs: None,
                telemetry_markers: vec![],
            },
        );

        tunnels.insert(
            "api".to_string(),
            TunnelConfig::Hosted {
                url: None,
                model: None,
                api_key_env: None,
                max_tokens: None,
                timeout_secs: None,
                telemetry_markers: vec![],
            },
        );

        Self {
            default_circuit: Some(DEFAULT_CIRCUIT.to_string()),
            accept_mode: Some(AcceptMode::Manual),
            tunnels,
            circuits: HashMap::new(),
        }
    }

    pub fn default_circuit(&self) -> &str {
        self.default_circuit.as_deref().unwrap_or(DEFAULT_CIRCUIT)
    }

    pub fn accept_mode(&self) -> AcceptMode {
        self.accept_mode.unwrap_or_default()
    }

    /// Instantiate every configured tunnel. A broken entry is logged and
    /// skipped; circuits that name it will report "unknown tunnel".
    pub fn build_tunnels(&self) -> TunnelRegistry {
        let mut registry = TunnelRegistry::new();
        let mut names: Vec<&String> = self.tunnels.keys().collect();
        names.sort();
        for name in names {
            match self.tunnels[name].build(name) {
                Ok(tunnel) => registry.register(tunnel),
                Err(e) => tracing::warn!(error = %e, "skipping tunnel"),
            }
        }
        registry
    }

    /// Built-in circuits plus the configured ones (configured win on name clash)
    pub fn build_circuits(&self, tunnels: Arc<TunnelRegistry>) -> CircuitRegistry {
        let mut registry = CircuitRegistry::with_builtins(tunnels);
        let mut names: Vec<&String> = self.circuits.keys().collect();
        names.sort();
        for name in names {
            match self.circuits[name].build(name) {
                Ok(circuit) => registry.register(circuit),
                Err(e) => tracing::warn!(error = %e, "skipping circuit"),
            }
        }
        registry
    }
}

/// Find the .tunnelvision directory by walking up the directory tree
pub fn find_local_dir() -> Option<PathBuf> {
    let current_dir = std::env::current_dir().ok()?;
    let mut dir = current_dir.as_path();

    loop {
        let candidate = dir.join(LOCAL_DIR);
        if candidate.is_dir() {
            return Some(candidate);
        }

        match dir.parent() {
            Some(parent) => dir = parent,
            None => break,
        }
    }
    None
}
