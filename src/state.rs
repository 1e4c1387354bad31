//! Persisted editor state between runs
//!
//! Stored as `state.json` under the platform data directory
//! (`~/.local/share/tunnelvision/` on Linux). Only small, user-facing choices
//! are kept: the last default circuit, the accept mode and the last file.

use crate::circuit::CircuitRegistry;
use crate::edits::AcceptMode;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

pub const STATE_FILE: &str = "state.json";
pub const STATE_VERSION: u32 = 1;

#[derive(Debug, thiserror::Error)]
pub enum StateError {
    #[error("No data directory on this platform")]
    NoDataDir,
    #[error("State file error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Corrupt state file: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Unsupported state version {0}")]
    Version(u32),
}

/// state.json contents
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionState {
    pub version: u32,
    #[serde(default)]
    pub circuit: Option<String>,
    #[serde(default)]
    pub accept_mode: Option<AcceptMode>,
    #[serde(default)]
    pub last_file: Option<PathBuf>,
    #[serde(default)]
    pub saved_at: Option<DateTime<Utc>>,
}

impl Default for SessionState {
    fn default() -> Self {
        Self {
            version: STATE_VERSION,
            circuit: None,
            accept_mode: None,
            last_file: None,
            saved_at: None,
        }
    }
}

impl SessionState {
    /// The remembered circuit, checked against what is registered now.
    ///
    /// A name that no longer exists is still returned; routing then reports
    /// "Unknown circuit" instead of silently picking something else.
    pub fn resolve_circuit(&self, circuits: &CircuitRegistry) -> Option<&str> {
        let name = self.circuit.as_deref()?;
        if !circuits.contains(name) {
            tracing::warn!(circuit = name, "remembered circuit is no longer registered");
        }
        Some(name)
    }
}

/// Reads and writes [`SessionState`] in one directory
#[derive(Debug, Clone)]
pub struct StateStore {
    dir: PathBuf,
}

impl StateStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// `dirs::data_local_dir()/tunnelvision`
    pub fn default_location() -> Result<Self, StateError> {
        let base = dirs::data_local_dir().ok_or(StateError::NoDataDir)?;
        Ok(Self::new(base.join("tunnelvision")))
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn path(&self) -> PathBuf {
        self.dir.join(STATE_FILE)
    }

    /// Load saved state; a missing file is the default state
    pub fn load(&self) -> Result<SessionState, StateError> {
        let path = self.path();
        if !path.exists() {
            return Ok(SessionState::default());
        }

        let content = fs::read_to_string(&path)?;
        let state: SessionState = serde_json::from_str(&content)?;
        if state.version > STATE_VERSION {
            return Err(StateError::Version(state.version));
        }
        Ok(state)
    }

    /// Like [`load`](Self::load) but falls back to the default on any error
    pub fn load_or_default(&self) -> SessionState {
        self.load().unwrap_or_else(|e| {
            tracing::warn!(error = %e, path = %self.path().display(), "ignoring saved state");
            SessionState::default()
        })
    }

    pub fn save(&self, state: &SessionState) -> Result<(), StateError> {
        fs::create_dir_all(&self.dir)?;

        let mut state = state.clone();
        state.version = STATE_VERSION;
        state.saved_at = Some(Utc::now());

        let content = serde_json::to_string_pretty(&state)?;
        fs::write(self.path(), content)?;
        tracing::debug!(path = %self.path().display(), "saved state");
        Ok(())
    }
}
