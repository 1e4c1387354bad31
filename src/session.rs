//! Editor session: the one object the main loop talks to
//!
//! Owns the bridge, the edit queue and the buffer, and applies the accept
//! mode. Everything here runs on the main loop's thread; background work
//! only reaches it through [`EditorSession::poll`].

use crate::bridge::{Bridge, BridgeEvent, RequestId, UNAVAILABLE};
use crate::buffer::{Buffer, BufferError};
use crate::circuit::parse_prompt;
use crate::edits::{apply_edits_to_buffer, AcceptMode, Edit, EditId, EditManager};
use crate::state::SessionState;
use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

/// Who a transcript line came from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Speaker {
    User,
    /// Response through the named circuit
    Circuit(String),
    System,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TranscriptEntry {
    pub speaker: Speaker,
    pub text: String,
}

/// What happened to a prompt handed to [`EditorSession::submit_prompt`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PromptOutcome {
    /// Blank input
    Ignored,
    /// Bare `@name`: default circuit changed (or the name was refused)
    Switched { circuit: String, accepted: bool },
    /// Running in the background
    Started(RequestId),
    /// Another request is still in flight
    Busy,
    /// The target circuit is already known to be unreachable
    Unavailable,
}

#[derive(Debug)]
struct InFlight {
    query: String,
    circuit: String,
    answered: bool,
}

pub struct EditorSession {
    bridge: Bridge,
    edits: EditManager,
    buffer: Buffer,
    accept_mode: AcceptMode,
    transcript: Vec<TranscriptEntry>,
    in_flight: HashMap<RequestId, InFlight>,
}

impl EditorSession {
    pub fn new(bridge: Bridge, buffer: Buffer, accept_mode: AcceptMode) -> Self {
        Self {
            bridge,
            edits: EditManager::new(),
            buffer,
            accept_mode,
            transcript: Vec::new(),
            in_flight: HashMap::new(),
        }
    }

    pub fn bridge(&self) -> &Bridge {
        &self.bridge
    }

    pub fn edits(&self) -> &EditManager {
        &self.edits
    }

    pub fn buffer(&self) -> &Buffer {
        &self.buffer
    }

    pub fn buffer_mut(&mut self) -> &mut Buffer {
        &mut self.buffer
    }

    pub fn transcript(&self) -> &[TranscriptEntry] {
        &self.transcript
    }

    pub fn accept_mode(&self) -> AcceptMode {
        self.accept_mode
    }

    pub fn set_accept_mode(&mut self, mode: AcceptMode) {
        if mode != self.accept_mode {
            tracing::info!(from = %self.accept_mode, to = %mode, "accept mode changed");
            self.accept_mode = mode;
        }
        if mode == AcceptMode::Always {
            self.accept_all();
        }
    }

    pub fn current_circuit(&self) -> String {
        self.bridge.router().current()
    }

    pub fn is_busy(&self) -> bool {
        !self.in_flight.is_empty()
    }

    /// Hand a prompt to the current (or `@named`) circuit without blocking
    pub fn submit_prompt(&mut self, input: &str) -> PromptOutcome {
        let parsed = parse_prompt(input);
        if parsed.circuit_override.is_none() && parsed.prompt.is_empty() {
            return PromptOutcome::Ignored;
        }

        self.push(Speaker::User, input.trim());

        if parsed.is_switch_only() {
            let name = parsed.circuit_override.unwrap_or_default();
            let accepted = self.bridge.router().switch(&name);
            let message = if accepted {
                format!("[Switched to circuit: {}]", name)
            } else {
                format!("[Unknown circuit: {}]", name)
            };
            self.push(Speaker::System, message);
            return PromptOutcome::Switched {
                circuit: self.current_circuit(),
                accepted,
            };
        }

        let circuit = parsed
            .circuit_override
            .unwrap_or_else(|| self.current_circuit());
        let was_idle = self.in_flight.is_empty();
        let submission = self.bridge.submit(input);

        if submission.started {
            self.in_flight.insert(
                submission.id,
                InFlight {
                    query: parsed.prompt,
                    circuit,
                    answered: false,
                },
            );
            PromptOutcome::Started(submission.id)
        } else if was_idle {
            self.push(Speaker::System, UNAVAILABLE);
            PromptOutcome::Unavailable
        } else {
            PromptOutcome::Busy
        }
    }

    /// Drain bridge events; returns how many edits were queued
    pub fn poll(&mut self) -> usize {
        let events = self.bridge.poll_events();
        self.handle_events(events)
    }

    /// Like [`poll`](Self::poll) but waits up to `timeout` for the first event
    pub fn poll_timeout(&mut self, timeout: Duration) -> usize {
        let Some(first) = self.bridge.next_event_timeout(timeout) else {
            return 0;
        };
        let mut events = vec![first];
        events.extend(self.bridge.poll_events());
        self.handle_events(events)
    }

    fn handle_events(&mut self, events: Vec<BridgeEvent>) -> usize {
        let mut queued = 0;
        for event in events {
            match event {
                BridgeEvent::Response { id, text } => match self.in_flight.get_mut(&id) {
                    Some(request) => {
                        request.answered = true;
                        let query = request.query.clone();
                        let circuit = request.circuit.clone();
                        self.push(Speaker::Circuit(circuit), text.clone());
                        let edit_id = self.edits.add_edit(query, text);
                        queued += 1;
                        if self.accept_mode == AcceptMode::Always {
                            self.accept(edit_id);
                        }
                    }
                    // Rejections and other notices are not edits.
                    None => self.push(Speaker::System, text),
                },
                BridgeEvent::Done { id } => {
                    // Started but never answered: the circuit was unreachable.
                    if let Some(request) = self.in_flight.remove(&id) {
                        if !request.answered {
                            self.push(Speaker::System, UNAVAILABLE);
                        }
                    }
                }
            }
        }
        queued
    }

    /// Accept the oldest pending edit and append it to the buffer
    pub fn accept_next(&mut self) -> Option<EditId> {
        let id = self.edits.next_pending()?.id;
        self.accept(id).then_some(id)
    }

    /// Reject the oldest pending edit
    pub fn reject_next(&mut self) -> Option<EditId> {
        let id = self.edits.next_pending()?.id;
        self.edits.reject_edit(id).then_some(id)
    }

    /// Accept every edit pending right now, in order
    pub fn accept_all(&mut self) -> usize {
        let buffer = &mut self.buffer;
        self.edits.accept_all_with(|_, edit| {
            apply_edits_to_buffer(&mut *buffer, std::slice::from_ref(edit));
        })
    }

    pub fn reject_all(&mut self) -> usize {
        self.edits.reject_all()
    }

    fn accept(&mut self, id: EditId) -> bool {
        if !self.edits.accept_edit(id) {
            return false;
        }
        if let Some(edit) = self.edits.find(id).cloned() {
            apply_edits_to_buffer(&mut self.buffer, &[edit]);
        }
        true
    }

    /// Write the buffer, first accepting pending edits in `on-save` mode
    pub fn save(&mut self) -> Result<PathBuf, BufferError> {
        if self.accept_mode == AcceptMode::OnSave {
            let accepted = self.accept_all();
            if accepted > 0 {
                tracing::info!(accepted, "accepted pending edits on save");
            }
        }
        let path = self.buffer.save()?.to_path_buf();
        self.push(Speaker::System, format!("[Saved {}]", path.display()));
        Ok(path)
    }

    /// Abort the in-flight request; its query is dropped
    pub fn cancel(&mut self) -> bool {
        let cancelled = self.bridge.cancel();
        if cancelled {
            self.in_flight.clear();
            self.push(Speaker::System, "[Cancelled]");
        }
        cancelled
    }

    /// Oldest pending edit, for display
    pub fn next_pending(&self) -> Option<&Edit> {
        self.edits.next_pending()
    }

    /// What to remember for the next run
    pub fn state(&self) -> SessionState {
        SessionState {
            circuit: Some(self.current_circuit()),
            accept_mode: Some(self.accept_mode),
            last_file: self.buffer.path().map(|p| p.to_path_buf()),
            ..SessionState::default()
        }
    }

    fn push(&mut self, speaker: Speaker, text: impl Into<String>) {
        self.transcript.push(TranscriptEntry {
            speaker,
            text: text.into(),
        });
    }
}
