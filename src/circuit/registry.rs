//! Circuit registry - named circuits plus the tunnels they run over

use super::{Circuit, CircuitResult};
use crate::tunnel::TunnelRegistry;
use std::collections::BTreeMap;
use std::sync::Arc;

/// Chain: cheap local draft, then polish with the CLI assistant
pub const REFINE: &str = "refine";
/// Parallel: ask two backends and show both answers
pub const CONSENSUS: &str = "consensus";
/// Fallback: best available backend, ending at the offline echo
pub const AUTO: &str = "auto";

pub const DEFAULT_CIRCUIT: &str = AUTO;

/// Preference order for the `auto` circuit; always ends offline
pub const AUTO_ORDER: &[&str] = &["claude", "api", "ollama", "echo"];

pub struct CircuitRegistry {
    tunnels: Arc<TunnelRegistry>,
    circuits: BTreeMap<String, Circuit>,
}

impl std::fmt::Debug for CircuitRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CircuitRegistry")
            .field("tunnels", &self.tunnels)
            .field("circuits", &self.circuits.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl CircuitRegistry {
    /// Registry with no circuits at all
    pub fn empty(tunnels: Arc<TunnelRegistry>) -> Self {
        Self {
            tunnels,
            circuits: BTreeMap::new(),
        }
    }

    /// Registry with the built-in set: one direct circuit per registered
    /// tunnel, plus `refine`, `consensus` and `auto`
    pub fn with_builtins(tunnels: Arc<TunnelRegistry>) -> Self {
        let mut registry = Self::empty(tunnels);

        let names: Vec<String> = registry.tunnels.names().iter().map(|s| s.to_string()).collect();
        for name in &names {
            registry.register(Circuit::direct(name.clone(), name.clone()));
        }

        registry.register(Circuit::chain(
            REFINE,
            vec!["ollama".to_string(), "claude".to_string()],
        ));
        registry.register(Circuit::parallel(
            CONSENSUS,
            vec!["claude".to_string(), "ollama".to_string()],
        ));
        registry.register(Circuit::fallback(
            AUTO,
            AUTO_ORDER.iter().map(|s| s.to_string()).collect(),
        ));

        registry
    }

    /// Insert a circuit, replacing any circuit with the same name
    pub fn register(&mut self, circuit: Circuit) {
        let missing: Vec<&str> = circuit
            .tunnels()
            .into_iter()
            .filter(|t| !self.tunnels.contains(t))
            .collect();
        if !missing.is_empty() {
            // Allowed: tunnels resolve at execution time and may be added later.
            tracing::debug!(circuit = circuit.name(), ?missing, "circuit references unregistered tunnels");
        }
        self.circuits.insert(circuit.name().to_string(), circuit);
    }

    pub fn get(&self, name: &str) -> Option<&Circuit> {
        self.circuits.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.circuits.contains_key(name)
    }

    pub fn names(&self) -> Vec<&str> {
        self.circuits.keys().map(|s| s.as_str()).collect()
    }

    pub fn circuits(&self) -> impl Iterator<Item = &Circuit> {
        self.circuits.values()
    }

    pub fn tunnels(&self) -> &Arc<TunnelRegistry> {
        &self.tunnels
    }

    /// Run the named circuit. An unknown name is a failed result, not an error.
    pub async fn execute(&self, name: &str, prompt: &str) -> CircuitResult {
        match self.circuits.get(name) {
            Some(circuit) => circuit.execute(&self.tunnels, prompt).await,
            None => {
                tracing::warn!(circuit = name, "execute on unknown circuit");
                CircuitResult::rejected(name, prompt, format!("Unknown circuit: {}", name))
            }
        }
    }
}
