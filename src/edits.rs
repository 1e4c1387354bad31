//! Edit queue: backend responses waiting for accept/reject
//!
//! Every response becomes an [`Edit`] in the pending queue. Each edit moves
//! exactly once, to `applied` or `rejected`, and is frozen there.
//!
//! ```text
//!            accept_edit
//!  pending ─────────────▶ applied   ──apply_edits_to_buffer──▶ buffer (append only)
//!     │
//!     └──────────────────▶ rejected
//!            reject_edit
//! ```
//!
//! *When* edits get accepted is the caller's [`AcceptMode`].

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Separator line written before each applied edit
pub const EDIT_SEPARATOR: &str = "----------------------------------------";
pub const APPLIED_MARKER: &str = "[Applied Edit]";

/// Global policy for materializing pending edits
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum AcceptMode {
    /// Only on explicit user action
    #[default]
    Manual,
    /// Accept everything pending when the buffer is saved
    OnSave,
    /// Accept as soon as a response arrives
    Always,
}

impl AcceptMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            AcceptMode::Manual => "manual",
            AcceptMode::OnSave => "on-save",
            AcceptMode::Always => "always",
        }
    }

    /// manual → on-save → always → manual
    pub fn next(&self) -> Self {
        match self {
            AcceptMode::Manual => AcceptMode::OnSave,
            AcceptMode::OnSave => AcceptMode::Always,
            AcceptMode::Always => AcceptMode::Manual,
        }
    }
}

impl std::fmt::Display for AcceptMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for AcceptMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "manual" => Ok(AcceptMode::Manual),
            "on-save" | "onsave" | "on_save" => Ok(AcceptMode::OnSave),
            "always" => Ok(AcceptMode::Always),
            other => Err(format!(
                "Invalid accept mode '{}'. Use manual, on-save, or always.",
                other
            )),
        }
    }
}

pub type EditId = Uuid;

/// One (query, response) pair
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Edit {
    pub id: EditId,
    pub query: String,
    pub response: String,
    pub timestamp: DateTime<Utc>,
    pub applied: bool,
    pub rejected: bool,
}

impl Edit {
    fn new(query: impl Into<String>, response: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            query: query.into(),
            response: response.into(),
            timestamp: Utc::now(),
            applied: false,
            rejected: false,
        }
    }

    pub fn is_pending(&self) -> bool {
        !self.applied && !self.rejected
    }
}

/// Anything edits can be materialized into
///
/// Append-only: implementations must never touch existing content.
pub trait LineSink {
    fn append_lines(&mut self, lines: Vec<String>);
}

/// Three disjoint, ordered collections of edits
#[derive(Debug, Default)]
pub struct EditManager {
    pending: Vec<Edit>,
    applied: Vec<Edit>,
    rejected: Vec<Edit>,
}

impl EditManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a response for review; returns its id
    pub fn add_edit(&mut self, query: impl Into<String>, response: impl Into<String>) -> EditId {
        let edit = Edit::new(query, response);
        let id = edit.id;
        tracing::debug!(%id, pending = self.pending.len() + 1, "edit queued");
        self.pending.push(edit);
        id
    }

    /// Move a pending edit to `applied`. False if it is not pending.
    pub fn accept_edit(&mut self, id: EditId) -> bool {
        match self.take_pending(id) {
            Some(mut edit) => {
                edit.applied = true;
                tracing::debug!(%id, "edit accepted");
                self.applied.push(edit);
                true
            }
            None => false,
        }
    }

    /// Move a pending edit to `rejected`. False if it is not pending.
    pub fn reject_edit(&mut self, id: EditId) -> bool {
        match self.take_pending(id) {
            Some(mut edit) => {
                edit.rejected = true;
                tracing::debug!(%id, "edit rejected");
                self.rejected.push(edit);
                true
            }
            None => false,
        }
    }

    /// Accept everything pending at call time, in order
    pub fn accept_all(&mut self) -> usize {
        self.accept_all_with(|_, _| {})
    }

    /// Like [`accept_all`](Self::accept_all), calling `on_accepted` after each
    /// edit moves. Edits the callback adds stay pending; the batch is the
    /// snapshot taken before the first accept.
    pub fn accept_all_with<F>(&mut self, mut on_accepted: F) -> usize
    where
        F: FnMut(&mut Self, &Edit),
    {
        let batch: Vec<EditId> = self.pending.iter().map(|e| e.id).collect();
        let mut count = 0;
        for id in batch {
            if self.accept_edit(id) {
                count += 1;
                if let Some(edit) = self.applied.last().cloned() {
                    on_accepted(self, &edit);
                }
            }
        }
        count
    }

    /// Reject everything pending at call time, in order
    pub fn reject_all(&mut self) -> usize {
        let batch: Vec<EditId> = self.pending.iter().map(|e| e.id).collect();
        batch.into_iter().filter(|id| self.reject_edit(*id)).count()
    }

    pub fn pending(&self) -> &[Edit] {
        &self.pending
    }

    pub fn applied(&self) -> &[Edit] {
        &self.applied
    }

    pub fn rejected(&self) -> &[Edit] {
        &self.rejected
    }

    /// Oldest pending edit, the next one up for review
    pub fn next_pending(&self) -> Option<&Edit> {
        self.pending.first()
    }

    pub fn find(&self, id: EditId) -> Option<&Edit> {
        self.pending
            .iter()
            .chain(&self.applied)
            .chain(&self.rejected)
            .find(|e| e.id == id)
    }

    fn take_pending(&mut self, id: EditId) -> Option<Edit> {
        let index = self.pending.iter().position(|e| e.id == id)?;
        Some(self.pending.remove(index))
    }
}

/// Append each applied edit to `sink` as a delimited block.
///
/// Returns how many edits were written; edits that are not applied (or
/// somehow also rejected) are skipped.
pub fn apply_edits_to_buffer<S: LineSink + ?Sized>(sink: &mut S, edits: &[Edit]) -> usize {
    let mut count = 0;
    for edit in edits.iter().filter(|e| e.applied && !e.rejected) {
        let mut lines = vec![
            EDIT_SEPARATOR.to_string(),
            APPLIED_MARKER.to_string(),
            format!("Query: {}", edit.query),
        ];
        lines.extend(edit.response.lines().map(str::to_string));
        sink.append_lines(lines);
        count += 1;
    }
    count
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    impl LineSink for Vec<String> {
        fn append_lines(&mut self, lines: Vec<String>) {
            self.extend(lines);
        }
    }

    #[test]
    fn test_add_edit_keeps_arrival_order() {
        let mut manager = EditManager::new();
        let a = manager.add_edit("q1", "r1");
        let b = manager.add_edit("q2", "r2");
        let ids: Vec<EditId> = manager.pending().iter().map(|e| e.id).collect();
        assert_eq!(ids, vec![a, b]);
        assert!(manager.pending().iter().all(Edit::is_pending));
    }

    #[test]
    fn test_accept_then_reject_returns_false() {
        let mut manager = EditManager::new();
        let id = manager.add_edit("q", "r");

        assert!(manager.accept_edit(id));
        assert!(!manager.reject_edit(id));
        assert!(!manager.accept_edit(id));

        assert!(manager.pending().is_empty());
        assert!(manager.rejected().is_empty());
        assert_eq!(manager.applied().len(), 1);
        assert!(manager.find(id).unwrap().applied);
    }

    #[test]
    fn test_unknown_id_is_noop() {
        let mut manager = EditManager::new();
        manager.add_edit("q", "r");
        assert!(!manager.accept_edit(Uuid::new_v4()));
        assert!(!manager.reject_edit(Uuid::new_v4()));
        assert_eq!(manager.pending().len(), 1);
    }

    #[test]
    fn test_accept_all_is_a_snapshot() {
        let mut manager = EditManager::new();
        manager.add_edit("q1", "r1");
        manager.add_edit("q2", "r2");

        let mut late = None;
        let count = manager.accept_all_with(|m, _| {
            if late.is_none() {
                late = Some(m.add_edit("late", "arrived mid-batch"));
            }
        });

        assert_eq!(count, 2);
        let late = late.unwrap();
        assert_eq!(manager.pending().len(), 1);
        assert_eq!(manager.pending()[0].id, late);
        assert_eq!(manager.applied().len(), 2);
    }

    #[test]
    fn test_reject_all() {
        let mut manager = EditManager::new();
        manager.add_edit("q1", "r1");
        manager.add_edit("q2", "r2");
        assert_eq!(manager.reject_all(), 2);
        assert_eq!(manager.reject_all(), 0);
        assert_eq!(manager.rejected().len(), 2);
        assert!(manager.rejected().iter().all(|e| e.rejected && !e.applied));
    }

    #[test]
    fn test_apply_edits_is_append_only() {
        let mut manager = EditManager::new();
        let id = manager.add_edit("split it", "a\nb");
        manager.add_edit("ignored", "still pending");
        manager.accept_edit(id);

        let mut buffer = vec!["fn main() {".to_string(), "}".to_string()];
        let mut edits = manager.applied().to_vec();
        edits.extend(manager.pending().iter().cloned());

        let written = apply_edits_to_buffer(&mut buffer, &edits);
        assert_eq!(written, 1);
        assert_eq!(&buffer[..2], ["fn main() {", "}"]);
        assert_eq!(
            &buffer[2..],
            [EDIT_SEPARATOR, APPLIED_MARKER, "Query: split it", "a", "b"]
        );
    }

    #[test]
    fn test_accept_mode_parse_and_cycle() {
        assert_eq!("on-save".parse::<AcceptMode>().unwrap(), AcceptMode::OnSave);
        assert_eq!("ALWAYS".parse::<AcceptMode>().unwrap(), AcceptMode::Always);
        assert!("sometimes".parse::<AcceptMode>().is_err());
        assert_eq!(AcceptMode::Always.next(), AcceptMode::Manual);
        assert_eq!(AcceptMode::OnSave.to_string(), "on-save");
    }

    #[derive(Debug, Clone)]
    enum Op {
        Add,
        Accept(usize),
        Reject(usize),
        AcceptAll,
        RejectAll,
    }

    fn op() -> impl Strategy<Value = Op> {
        prop_oneof![
            Just(Op::Add),
            (0usize..8).prop_map(Op::Accept),
            (0usize..8).prop_map(Op::Reject),
            Just(Op::AcceptAll),
            Just(Op::RejectAll),
        ]
    }

    proptest! {
        #[test]
        fn prop_edit_lives_in_exactly_one_collection(ops in proptest::collection::vec(op(), 0..40)) {
            let mut manager = EditManager::new();
            let mut ids = Vec::new();

            for op in ops {
                match op {
                    Op::Add => ids.push(manager.add_edit("q", "r")),
                    Op::Accept(i) => if let Some(id) = ids.get(i) {
                        let was_pending = manager.pending().iter().any(|e| e.id == *id);
                        prop_assert_eq!(manager.accept_edit(*id), was_pending);
                    },
                    Op::Reject(i) => if let Some(id) = ids.get(i) {
                        let was_pending = manager.pending().iter().any(|e| e.id == *id);
                        prop_assert_eq!(manager.reject_edit(*id), was_pending);
                    },
                    Op::AcceptAll => { manager.accept_all(); }
                    Op::RejectAll => { manager.reject_all(); }
                }
            }

            for id in &ids {
                let homes = [manager.pending(), manager.applied(), manager.rejected()]
                    .iter()
                    .filter(|list| list.iter().any(|e| e.id == *id))
                    .count();
                prop_assert_eq!(homes, 1);
            }
            prop_assert!(manager.applied().iter().all(|e| e.applied && !e.rejected));
            prop_assert!(manager.rejected().iter().all(|e| e.rejected && !e.applied));
        }
    }
}
