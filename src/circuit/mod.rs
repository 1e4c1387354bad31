//! Circuits: named composition strategies over tunnels
//!
//! | Kind     | Sends                                 | Succeeds when                       |
//! |----------|---------------------------------------|-------------------------------------|
//! | Direct   | one tunnel                            | that tunnel succeeds                |
//! | Chain    | each tunnel in order, refining        | every step succeeds                 |
//! | Parallel | all tunnels at once, same prompt      | at least one branch succeeds        |
//! | Fallback | tunnels in order until one answers    | a step succeeds with non-empty text |
//!
//! Circuits hold tunnel *names*, resolved through the [`TunnelRegistry`] at
//! execution time, so tunnels can be swapped without rebuilding circuits.

pub mod registry;
pub mod router;

pub use registry::CircuitRegistry;
pub use router::{parse_prompt, ParsedPrompt, RouteOutcome, Router};

use crate::tunnel::{TunnelRegistry, TunnelResult};
use futures::future::join_all;
use serde::Serialize;
use std::sync::Arc;

/// Builds the prompt for chain step `i > 0` from `(last_response, original_prompt)`
pub type TransformFn = Arc<dyn Fn(&str, &str) -> String + Send + Sync>;

/// Combines the successful parallel responses (in issue order) into one text
pub type MergeFn = Arc<dyn Fn(&[String]) -> String + Send + Sync>;

pub const ALL_TUNNELS_FAILED: &str = "All tunnels failed";
pub const ALL_FALLBACKS_EXHAUSTED: &str = "All fallbacks exhausted";

/// Default chain transform: feed the previous answer in as context
pub fn default_transform(last_response: &str, original_prompt: &str) -> String {
    format!("Context:\n{}\n\nQuestion: {}", last_response, original_prompt)
}

/// Default parallel merge: numbered blocks separated by blank lines
pub fn default_merge(responses: &[String]) -> String {
    responses
        .iter()
        .enumerate()
        .map(|(i, text)| format!("[Response {}]\n{}", i + 1, text))
        .collect::<Vec<_>>()
        .join("\n\n")
}

/// The execution strategy of a circuit
#[derive(Clone)]
pub enum CircuitKind {
    Direct {
        tunnel: String,
    },
    Chain {
        tunnels: Vec<String>,
        transform: TransformFn,
    },
    Parallel {
        tunnels: Vec<String>,
        merge: MergeFn,
    },
    Fallback {
        tunnels: Vec<String>,
    },
}

impl CircuitKind {
    pub fn label(&self) -> &'static str {
        match self {
            CircuitKind::Direct { .. } => "direct",
            CircuitKind::Chain { .. } => "chain",
            CircuitKind::Parallel { .. } => "parallel",
            CircuitKind::Fallback { .. } => "fallback",
        }
    }
}

/// A named strategy
#[derive(Clone)]
pub struct Circuit {
    name: String,
    kind: CircuitKind,
}

impl std::fmt::Debug for Circuit {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Circuit")
            .field("name", &self.name)
            .field("kind", &self.kind.label())
            .field("tunnels", &self.tunnels())
            .finish()
    }
}

/// Outcome of one circuit execution
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CircuitResult {
    pub circuit: String,
    pub prompt: String,
    pub response: String,
    pub success: bool,
    /// Constituent tunnel results in call order (issue order for parallel)
    pub steps: Vec<TunnelResult>,
    pub error: Option<String>,
}

impl CircuitResult {
    fn finish(
        circuit: &str,
        prompt: &str,
        response: String,
        steps: Vec<TunnelResult>,
        error: Option<String>,
    ) -> Self {
        Self {
            circuit: circuit.to_string(),
            prompt: prompt.to_string(),
            response,
            success: error.is_none(),
            steps,
            error,
        }
    }

    /// A failed result with no steps (unknown circuit, empty circuit, ...)
    pub fn rejected(circuit: &str, prompt: &str, error: impl Into<String>) -> Self {
        Self::finish(circuit, prompt, String::new(), Vec::new(), Some(error.into()))
    }

    /// Text to show the user: the response, or the bracketed error
    /// (after any partial response)
    pub fn display_text(&self) -> String {
        match &self.error {
            None => self.response.clone(),
            Some(err) => {
                let err = if err.starts_with('[') {
                    err.clone()
                } else {
                    format!("[Error: {}]", err)
                };
                if self.response.is_empty() {
                    err
                } else {
                    format!("{}\n{}", self.response, err)
                }
            }
        }
    }
}

impl Circuit {
    pub fn direct(name: impl Into<String>, tunnel: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: CircuitKind::Direct {
                tunnel: tunnel.into(),
            },
        }
    }

    pub fn chain(name: impl Into<String>, tunnels: Vec<String>) -> Self {
        Self::chain_with(name, tunnels, Arc::new(default_transform))
    }

    pub fn chain_with(name: impl Into<String>, tunnels: Vec<String>, transform: TransformFn) -> Self {
        Self {
            name: name.into(),
            kind: CircuitKind::Chain { tunnels, transform },
        }
    }

    pub fn parallel(name: impl Into<String>, tunnels: Vec<String>) -> Self {
        Self::parallel_with(name, tunnels, Arc::new(default_merge))
    }

    pub fn parallel_with(name: impl Into<String>, tunnels: Vec<String>, merge: MergeFn) -> Self {
        Self {
            name: name.into(),
            kind: CircuitKind::Parallel { tunnels, merge },
        }
    }

    pub fn fallback(name: impl Into<String>, tunnels: Vec<String>) -> Self {
        Self {
            name: name.into(),
            kind: CircuitKind::Fallback { tunnels },
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> &CircuitKind {
        &self.kind
    }

    /// Referenced tunnel names, in declared order
    pub fn tunnels(&self) -> Vec<&str> {
        match &self.kind {
            CircuitKind::Direct { tunnel } => vec![tunnel.as_str()],
            CircuitKind::Chain { tunnels, .. }
            | CircuitKind::Parallel { tunnels, .. }
            | CircuitKind::Fallback { tunnels } => tunnels.iter().map(|s| s.as_str()).collect(),
        }
    }

    /// Run the strategy. Backend failures never escape as errors; a panic
    /// inside a custom transform/merge function does propagate.
    pub async fn execute(&self, tunnels: &TunnelRegistry, prompt: &str) -> CircuitResult {
        tracing::debug!(circuit = %self.name, kind = self.kind.label(), "executing circuit");

        let result = match &self.kind {
            CircuitKind::Direct { tunnel } => self.run_direct(tunnels, tunnel, prompt).await,
            CircuitKind::Chain {
                tunnels: names,
                transform,
            } => self.run_chain(tunnels, names, transform, prompt).await,
            CircuitKind::Parallel {
                tunnels: names,
                merge,
            } => self.run_parallel(tunnels, names, merge, prompt).await,
            CircuitKind::Fallback { tunnels: names } => {
                self.run_fallback(tunnels, names, prompt).await
            }
        };

        match &result.error {
            None => tracing::info!(circuit = %self.name, steps = result.steps.len(), "circuit succeeded"),
            Some(err) => tracing::warn!(circuit = %self.name, error = %err, "circuit failed"),
        }
        result
    }

    async fn run_direct(&self, tunnels: &TunnelRegistry, tunnel: &str, prompt: &str) -> CircuitResult {
        let step = tunnels.send(tunnel, prompt).await;
        let error = (!step.success).then(|| step.error_text().to_string());
        let response = step.response.clone();
        CircuitResult::finish(&self.name, prompt, response, vec![step], error)
    }

    async fn run_chain(
        &self,
        tunnels: &TunnelRegistry,
        names: &[String],
        transform: &TransformFn,
        prompt: &str,
    ) -> CircuitResult {
        if names.is_empty() {
            return CircuitResult::rejected(&self.name, prompt, "Circuit has no tunnels");
        }

        let mut steps = Vec::with_capacity(names.len());
        let mut last_response: Option<String> = None;

        for name in names {
            let step_prompt = match &last_response {
                None => prompt.to_string(),
                Some(previous) => transform(previous, prompt),
            };
            let step = tunnels.send(name, &step_prompt).await;

            if !step.success {
                let error = format!("Failed at {}: {}", name, step.error_text());
                steps.push(step);
                return CircuitResult::finish(
                    &self.name,
                    prompt,
                    last_response.unwrap_or_default(),
                    steps,
                    Some(error),
                );
            }

            last_response = Some(step.response.clone());
            steps.push(step);
        }

        CircuitResult::finish(&self.name, prompt, last_response.unwrap_or_default(), steps, None)
    }

    async fn run_parallel(
        &self,
        tunnels: &TunnelRegistry,
        names: &[String],
        merge: &MergeFn,
        prompt: &str,
    ) -> CircuitResult {
        // Join point: every branch resolves before the merge runs.
        let steps: Vec<TunnelResult> =
            join_all(names.iter().map(|name| tunnels.send(name, prompt))).await;

        let successes: Vec<String> = steps
            .iter()
            .filter(|s| s.success)
            .map(|s| s.response.clone())
            .collect();

        if successes.is_empty() {
            return CircuitResult::finish(
                &self.name,
                prompt,
                String::new(),
                steps,
                Some(ALL_TUNNELS_FAILED.to_string()),
            );
        }

        let merged = merge(&successes);
        CircuitResult::finish(&self.name, prompt, merged, steps, None)
    }

    async fn run_fallback(&self, tunnels: &TunnelRegistry, names: &[String], prompt: &str) -> CircuitResult {
        let mut steps = Vec::with_capacity(names.len());

        for name in names {
            let step = tunnels.send(name, prompt).await;
            let answered = step.success && !step.response.trim().is_empty();
            let response = step.response.clone();
            steps.push(step);

            if answered {
                tracing::debug!(circuit = %self.name, tunnel = %name, "fallback answered");
                return CircuitResult::finish(&self.name, prompt, response, steps, None);
            }
        }

        CircuitResult::finish(
            &self.name,
            prompt,
            String::new(),
            steps,
            Some(ALL_FALLBACKS_EXHAUSTED.to_string()),
        )
    }
}
