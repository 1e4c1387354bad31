//! Bridge between the synchronous editor loop and async tunnel calls
//!
//! The editor's main loop never blocks on a backend. It either:
//!
//! - calls [`Bridge::send_blocking`] (one-shot CLI use), or
//! - calls [`Bridge::submit`] and later drains [`BridgeEvent`]s with
//!   [`Bridge::poll_events`] on its own thread, where it owns the edit queue
//!   and buffer.
//!
//! ```text
//!  main loop ──submit──▶ Bridge ──spawn──▶ tokio task ──route──▶ Router
//!      ▲                                        │
//!      └──── poll_events ◀── mpsc ◀── Response{id,text}, Done{id}
//! ```
//!
//! One request at a time: a submit while another is in flight gets an
//! immediate `[Request in progress...]` response and `Done`, and spawns nothing.
//!
//! Availability is judged per circuit: the one a prompt's `@name` picks, or
//! the current default. A bare `@name` switch is never gated.

use crate::circuit::{parse_prompt, RouteOutcome, Router};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::runtime::Runtime;
use tokio::task::AbortHandle;

pub const IN_PROGRESS: &str = "[Request in progress...]";
pub const UNAVAILABLE: &str = "[unavailable]";

/// Identifies one `submit` call
pub type RequestId = u64;

/// Delivered to the main loop for each submitted request
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BridgeEvent {
    /// At most once per request, before `Done`
    Response { id: RequestId, text: String },
    /// Exactly once per request, even when no response was produced
    Done { id: RequestId },
}

impl BridgeEvent {
    pub fn id(&self) -> RequestId {
        match self {
            BridgeEvent::Response { id, .. } | BridgeEvent::Done { id } => *id,
        }
    }
}

/// Result of [`Bridge::submit`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Submission {
    pub id: RequestId,
    /// False when the request was turned away without spawning work
    pub started: bool,
}

/// Memoized "is any tunnel of this circuit reachable", keyed by circuit name
#[derive(Debug, Default)]
struct CircuitAvailability {
    known: Mutex<HashMap<String, bool>>,
}

impl CircuitAvailability {
    fn known(&self, circuit: &str) -> Option<bool> {
        self.lock().get(circuit).copied()
    }

    async fn check(&self, router: &Router, circuit: &str) -> bool {
        if let Some(known) = self.known(circuit) {
            return known;
        }

        let circuits = router.circuits();
        let available = match circuits.get(circuit) {
            Some(found) => {
                let mut any = false;
                for name in found.tunnels() {
                    if let Some(tunnel) = circuits.tunnels().get(name) {
                        if tunnel.is_available().await {
                            any = true;
                            break;
                        }
                    }
                }
                any
            }
            // Unknown circuit: let routing report it.
            None => true,
        };

        self.lock().insert(circuit.to_string(), available);
        available
    }

    fn clear(&self) {
        self.lock().clear();
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, bool>> {
        self.known
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

pub struct Bridge {
    router: Arc<Router>,
    runtime: Runtime,
    events_tx: mpsc::Sender<BridgeEvent>,
    events_rx: mpsc::Receiver<BridgeEvent>,
    next_id: AtomicU64,
    /// Id of the in-flight request, 0 when idle
    running: Arc<AtomicU64>,
    in_flight: Mutex<Option<AbortHandle>>,
    availability: Arc<CircuitAvailability>,
}

impl std::fmt::Debug for Bridge {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Bridge")
            .field("current_circuit", &self.router.current())
            .field("running", &self.is_running())
            .finish()
    }
}

impl Bridge {
    /// Create a bridge with its own worker runtime
    pub fn new(router: Arc<Router>) -> std::io::Result<Self> {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(2)
            .thread_name("tunnelvision-bridge")
            .enable_all()
            .build()?;
        let (events_tx, events_rx) = mpsc::channel();

        Ok(Self {
            router,
            runtime,
            events_tx,
            events_rx,
            next_id: AtomicU64::new(1),
            running: Arc::new(AtomicU64::new(0)),
            in_flight: Mutex::new(None),
            availability: Arc::new(CircuitAvailability::default()),
        })
    }

    pub fn router(&self) -> &Arc<Router> {
        &self.router
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst) != 0
    }

    /// Synchronous mode: block until the routed call finishes.
    ///
    /// Backend failures come back as bracketed text, never as errors.
    pub fn send_blocking(&self, prompt: &str) -> String {
        if self.is_running() {
            return IN_PROGRESS.to_string();
        }
        if let Some(circuit) = self.target_circuit(prompt) {
            if !self.is_circuit_available(&circuit) {
                return UNAVAILABLE.to_string();
            }
        }
        self.runtime.block_on(self.router.route(prompt)).display_text()
    }

    /// Asynchronous mode: start the request in the background and return
    /// immediately. Results arrive through [`poll_events`](Self::poll_events).
    ///
    /// Availability is probed inside the spawned task. A circuit already known
    /// to be unreachable is turned away here with a lone `Done`.
    pub fn submit(&self, prompt: &str) -> Submission {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);

        if self
            .running
            .compare_exchange(0, id, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            tracing::debug!(id, "request rejected, another request is in flight");
            self.emit(BridgeEvent::Response {
                id,
                text: IN_PROGRESS.to_string(),
            });
            self.emit(BridgeEvent::Done { id });
            return Submission { id, started: false };
        }

        let target = self.target_circuit(prompt);
        if let Some(circuit) = &target {
            if self.availability.known(circuit) == Some(false) {
                tracing::warn!(id, %circuit, "no tunnel of the circuit is available");
                self.running.store(0, Ordering::SeqCst);
                self.emit(BridgeEvent::Done { id });
                return Submission { id, started: false };
            }
        }

        let router = Arc::clone(&self.router);
        let availability = Arc::clone(&self.availability);
        let running = Arc::clone(&self.running);
        let events = self.events_tx.clone();
        let prompt = prompt.to_string();

        let task = self.runtime.spawn(async move {
            if let Some(circuit) = target {
                if !availability.check(&router, &circuit).await {
                    tracing::warn!(id, %circuit, "no tunnel of the circuit is available");
                    if running
                        .compare_exchange(id, 0, Ordering::SeqCst, Ordering::SeqCst)
                        .is_ok()
                    {
                        let _ = events.send(BridgeEvent::Done { id });
                    }
                    return;
                }
            }

            let outcome = router.route(&prompt).await;
            if let RouteOutcome::Executed(result) = &outcome {
                tracing::debug!(id, circuit = %result.circuit, success = result.success, "request finished");
            }
            // A cancel may already have cleared (or reused) the slot.
            if running
                .compare_exchange(id, 0, Ordering::SeqCst, Ordering::SeqCst)
                .is_ok()
            {
                let _ = events.send(BridgeEvent::Response {
                    id,
                    text: outcome.display_text(),
                });
                let _ = events.send(BridgeEvent::Done { id });
            }
        });

        *self.lock_in_flight() = Some(task.abort_handle());
        tracing::info!(id, "request started");
        Submission { id, started: true }
    }

    /// Abort the in-flight request, if any.
    ///
    /// Dropping the task kills any backend subprocess it spawned. No events
    /// are delivered for a cancelled request.
    pub fn cancel(&self) -> bool {
        let id = self.running.swap(0, Ordering::SeqCst);
        if let Some(handle) = self.lock_in_flight().take() {
            handle.abort();
        }
        if id != 0 {
            tracing::info!(id, "request cancelled");
        }
        id != 0
    }

    /// Drain every event that has arrived so far (non-blocking)
    pub fn poll_events(&self) -> Vec<BridgeEvent> {
        let mut events = Vec::new();
        while let Ok(event) = self.events_rx.try_recv() {
            events.push(event);
        }
        events
    }

    /// Wait up to `timeout` for the next event
    pub fn next_event_timeout(&self, timeout: Duration) -> Option<BridgeEvent> {
        self.events_rx.recv_timeout(timeout).ok()
    }

    /// Whether any tunnel of the current default circuit is reachable
    pub fn is_available(&self) -> bool {
        self.is_circuit_available(&self.router.current())
    }

    /// Whether any tunnel of `circuit` is reachable.
    ///
    /// Blocks on the probes the first time; memoized per circuit for the
    /// lifetime of the bridge (see
    /// [`invalidate_availability`](Self::invalidate_availability)).
    pub fn is_circuit_available(&self, circuit: &str) -> bool {
        if let Some(known) = self.availability.known(circuit) {
            return known;
        }
        self.runtime
            .block_on(self.availability.check(&self.router, circuit))
    }

    /// Forget the memoized availability, here and in every tunnel
    pub fn invalidate_availability(&self) {
        self.availability.clear();

        let tunnels = Arc::clone(self.router.circuits().tunnels());
        self.runtime.block_on(async move {
            for name in tunnels.names() {
                if let Some(tunnel) = tunnels.get(name) {
                    tunnel.invalidate_availability().await;
                }
            }
        });
    }

    /// Circuit a prompt will run on, `None` for a bare `@name` switch
    fn target_circuit(&self, prompt: &str) -> Option<String> {
        let parsed = parse_prompt(prompt);
        if parsed.is_switch_only() {
            return None;
        }
        Some(
            parsed
                .circuit_override
                .unwrap_or_else(|| self.router.current()),
        )
    }

    fn emit(&self, event: BridgeEvent) {
        // The receiver lives in `self`, so this cannot fail while we exist.
        let _ = self.events_tx.send(event);
    }

    fn lock_in_flight(&self) -> std::sync::MutexGuard<'_, Option<AbortHandle>> {
        self.in_flight
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
