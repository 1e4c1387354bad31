//! Prompt routing: `@circuit` sigils and the current default circuit
//!
//! ```text
//! "@refine tidy this up"  → circuit_override = Some("refine"), prompt = "tidy this up"
//! "@consensus"            → circuit_override = Some("consensus"), prompt = ""   (switch only)
//! "plain question"        → circuit_override = None, prompt unchanged
//! ```

use super::{CircuitRegistry, CircuitResult};
use lazy_static::lazy_static;
use regex::Regex;
use std::sync::{Arc, RwLock};

lazy_static! {
    static ref SIGIL: Regex =
        Regex::new(r"^\s*@([A-Za-z0-9_][A-Za-z0-9_.-]*)(?:\s+|$)").expect("sigil regex is valid");
}

/// A user prompt with its optional circuit override split off
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedPrompt {
    pub circuit_override: Option<String>,
    pub prompt: String,
}

impl ParsedPrompt {
    /// `@name` with nothing after it
    pub fn is_switch_only(&self) -> bool {
        self.circuit_override.is_some() && self.prompt.is_empty()
    }
}

/// Split a leading `@name ` sigil off the input
pub fn parse_prompt(input: &str) -> ParsedPrompt {
    match SIGIL.captures(input) {
        Some(caps) => {
            let whole = caps.get(0).map(|m| m.end()).unwrap_or(0);
            ParsedPrompt {
                circuit_override: caps.get(1).map(|m| m.as_str().to_string()),
                prompt: input[whole..].trim().to_string(),
            }
        }
        None => ParsedPrompt {
            circuit_override: None,
            prompt: input.trim().to_string(),
        },
    }
}

/// What a routed prompt turned into
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RouteOutcome {
    /// Bare sigil: default circuit changed (or refused), nothing was sent
    Switched { circuit: String, message: String },
    Executed(CircuitResult),
}

impl RouteOutcome {
    pub fn display_text(&self) -> String {
        match self {
            RouteOutcome::Switched { message, .. } => message.clone(),
            RouteOutcome::Executed(result) => result.display_text(),
        }
    }
}

/// Single entry point from user input to circuit execution
#[derive(Debug)]
pub struct Router {
    circuits: Arc<CircuitRegistry>,
    current: RwLock<String>,
}

impl Router {
    pub fn new(circuits: Arc<CircuitRegistry>, default_circuit: impl Into<String>) -> Self {
        let default_circuit = default_circuit.into();
        if !circuits.contains(&default_circuit) {
            // Kept as-is: routing degrades to "Unknown circuit" errors.
            tracing::warn!(circuit = %default_circuit, "default circuit is not registered");
        }
        Self {
            circuits,
            current: RwLock::new(default_circuit),
        }
    }

    pub fn circuits(&self) -> &Arc<CircuitRegistry> {
        &self.circuits
    }

    /// The circuit used for prompts without a sigil
    pub fn current(&self) -> String {
        self.current
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    /// Make `name` the default. Unknown names are refused.
    pub fn switch(&self, name: &str) -> bool {
        if !self.circuits.contains(name) {
            return false;
        }
        let mut current = self
            .current
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if *current != name {
            tracing::info!(from = %*current, to = name, "switched default circuit");
            *current = name.to_string();
        }
        true
    }

    /// Parse, resolve and execute one user input.
    ///
    /// A sigil naming a registered circuit also becomes the new default.
    pub async fn route(&self, input: &str) -> RouteOutcome {
        let parsed = parse_prompt(input);

        if let Some(name) = &parsed.circuit_override {
            let switched = self.switch(name);

            if parsed.prompt.is_empty() {
                let message = if switched {
                    format!("[Switched to circuit: {}]", name)
                } else {
                    format!("[Unknown circuit: {}]", name)
                };
                return RouteOutcome::Switched {
                    circuit: self.current(),
                    message,
                };
            }

            return RouteOutcome::Executed(self.circuits.execute(name, &parsed.prompt).await);
        }

        let circuit = self.current();
        RouteOutcome::Executed(self.circuits.execute(&circuit, &parsed.prompt).await)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tunnel::{EchoTunnel, TunnelRegistry};

    fn router() -> Router {
        let mut tunnels = TunnelRegistry::new();
        tunnels.register(Arc::new(EchoTunnel::new("echo")));
        let circuits = CircuitRegistry::with_builtins(Arc::new(tunnels));
        Router::new(Arc::new(circuits), "auto")
    }

    #[test]
    fn test_parse_plain_prompt() {
        let parsed = parse_prompt("  explain this function ");
        assert_eq!(parsed.circuit_override, None);
        assert_eq!(parsed.prompt, "explain this function");
        assert!(!parsed.is_switch_only());
    }

    #[test]
    fn test_parse_override() {
        let parsed = parse_prompt("@refine tidy\nthis up");
        assert_eq!(parsed.circuit_override.as_deref(), Some("refine"));
        assert_eq!(parsed.prompt, "tidy\nthis up");
    }

    #[test]
    fn test_parse_bare_sigil() {
        let parsed = parse_prompt("@consensus");
        assert_eq!(parsed.circuit_override.as_deref(), Some("consensus"));
        assert!(parsed.is_switch_only());
    }

    #[test]
    fn test_parse_email_like_text_is_not_a_sigil() {
        let parsed = parse_prompt("mail me@example.com");
        assert_eq!(parsed.circuit_override, None);

        let parsed = parse_prompt("@@weird");
        assert_eq!(parsed.circuit_override, None);
    }

    #[tokio::test]
    async fn test_bare_sigil_switches_without_sending() {
        let router = router();
        let outcome = router.route("@echo").await;
        assert_eq!(
            outcome,
            RouteOutcome::Switched {
                circuit: "echo".to_string(),
                message: "[Switched to circuit: echo]".to_string(),
            }
        );
        assert_eq!(router.current(), "echo");
    }

    #[tokio::test]
    async fn test_unknown_bare_sigil_keeps_default() {
        let router = router();
        let outcome = router.route("@nope").await;
        assert_eq!(outcome.display_text(), "[Unknown circuit: nope]");
        assert_eq!(router.current(), "auto");
    }

    #[tokio::test]
    async fn test_override_executes_and_persists() {
        let router = router();
        match router.route("@echo hi").await {
            RouteOutcome::Executed(result) => {
                assert_eq!(result.circuit, "echo");
                assert_eq!(result.response, "[echo] hi");
            }
            other => panic!("unexpected outcome: {other:?}"),
        }
        assert_eq!(router.current(), "echo");
    }

    #[tokio::test]
    async fn test_unknown_override_fails_without_persisting() {
        let router = router();
        match router.route("@nope hi").await {
            RouteOutcome::Executed(result) => {
                assert!(!result.success);
                assert_eq!(result.error.as_deref(), Some("Unknown circuit: nope"));
            }
            other => panic!("unexpected outcome: {other:?}"),
        }
        assert_eq!(router.current(), "auto");
    }
}
