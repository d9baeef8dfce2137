//! Phase-gated workflow state per spec, plus the front door for workspace
//! events.
//!
//! A spec moves requirements → design → tasks → implementation. Each step
//! beyond requirements is reachable only once the previous phase has been
//! approved. States are created on first reference and live as long as the
//! controller.

use crate::approval::{ApplyReport, ApprovalQueue, FileEdit, FilesystemSink, PendingChange};
use crate::engine::HookEngine;
use crate::error::{Result, SpecflowError};
use crate::event::WorkspaceEvent;
use crate::executor::DispatchResult;
use crate::types::Phase;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use uuid::Uuid;

// ---------------------------------------------------------------------------
// WorkflowState
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HistoryAction {
    Approved,
    Reset,
    Transitioned,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub action: HistoryAction,
    pub phase: Phase,
    pub at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkflowState {
    pub phase: Phase,
    pub requirements_approved: bool,
    pub design_approved: bool,
    pub tasks_approved: bool,
    #[serde(default)]
    pub history: Vec<HistoryEntry>,
}

impl Default for WorkflowState {
    fn default() -> Self {
        Self {
            phase: Phase::Requirements,
            requirements_approved: false,
            design_approved: false,
            tasks_approved: false,
            history: Vec::new(),
        }
    }
}

impl WorkflowState {
    pub fn is_approved(&self, phase: Phase) -> bool {
        match phase {
            Phase::Requirements => self.requirements_approved,
            Phase::Design => self.design_approved,
            Phase::Tasks => self.tasks_approved,
            Phase::Implementation => false,
        }
    }

    /// Why `target` is not reachable, or `None` if it is.
    fn blocker(&self, target: Phase) -> Option<&'static str> {
        match target {
            Phase::Requirements => None,
            Phase::Design if !self.requirements_approved => Some("requirements not approved"),
            Phase::Tasks if !self.design_approved => Some("design not approved"),
            Phase::Implementation if !self.tasks_approved => Some("tasks not approved"),
            _ => None,
        }
    }

    pub fn can_transition(&self, target: Phase) -> bool {
        self.blocker(target).is_none()
    }

    fn log(&mut self, action: HistoryAction, phase: Phase) {
        self.history.push(HistoryEntry {
            action,
            phase,
            at: Utc::now(),
        });
    }

    fn approve_current(&mut self) -> bool {
        let current = self.phase;
        let Some(next) = current.next() else {
            return false;
        };
        match current {
            Phase::Requirements => self.requirements_approved = true,
            Phase::Design => self.design_approved = true,
            Phase::Tasks => self.tasks_approved = true,
            Phase::Implementation => {}
        }
        self.phase = next;
        self.log(HistoryAction::Approved, current);
        true
    }

    fn reset(&mut self, phase: Phase) -> bool {
        match phase {
            Phase::Requirements => {
                self.requirements_approved = false;
                self.design_approved = false;
                self.tasks_approved = false;
                self.phase = Phase::Requirements;
            }
            Phase::Design => {
                self.design_approved = false;
                self.tasks_approved = false;
                if self.phase > Phase::Design {
                    self.phase = Phase::Design;
                }
            }
            // Design approval survives a tasks reset.
            Phase::Tasks => {
                self.tasks_approved = false;
                if self.phase == Phase::Implementation {
                    self.phase = Phase::Tasks;
                }
            }
            Phase::Implementation => return false,
        }
        self.log(HistoryAction::Reset, phase);
        true
    }
}

// ---------------------------------------------------------------------------
// EventOutcome
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EventOutcome {
    /// Id of the change queued from an agent completion, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub queued: Option<Uuid>,
    pub results: Vec<DispatchResult>,
}

// ---------------------------------------------------------------------------
// WorkflowController
// ---------------------------------------------------------------------------

pub struct WorkflowController {
    states: Mutex<BTreeMap<String, WorkflowState>>,
    approvals: ApprovalQueue,
    engine: Arc<HookEngine>,
    fs: Arc<dyn FilesystemSink>,
}

impl WorkflowController {
    pub fn new(engine: Arc<HookEngine>, fs: Arc<dyn FilesystemSink>) -> Self {
        Self {
            states: Mutex::new(BTreeMap::new()),
            approvals: ApprovalQueue::new(),
            engine,
            fs,
        }
    }

    pub fn engine(&self) -> &Arc<HookEngine> {
        &self.engine
    }

    fn states(&self) -> MutexGuard<'_, BTreeMap<String, WorkflowState>> {
        self.states.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn with_state<T>(&self, name: &str, f: impl FnOnce(&mut WorkflowState) -> T) -> T {
        let mut states = self.states();
        f(states.entry(name.to_string()).or_default())
    }

    // -----------------------------------------------------------------------
    // Phase gate
    // -----------------------------------------------------------------------

    pub fn phase(&self, name: &str) -> Phase {
        self.with_state(name, |s| s.phase)
    }

    pub fn state(&self, name: &str) -> WorkflowState {
        self.with_state(name, |s| s.clone())
    }

    /// Pure check; does not create a state for an unknown spec.
    pub fn can_transition(&self, name: &str, target: Phase) -> bool {
        match self.states().get(name) {
            Some(state) => state.can_transition(target),
            None => WorkflowState::default().can_transition(target),
        }
    }

    /// Approve the current phase and advance to the next. Returns false in
    /// the implementation phase.
    pub fn approve_current_phase(&self, name: &str) -> bool {
        let (approved, phase) = self.with_state(name, |s| (s.approve_current(), s.phase));
        if approved {
            tracing::info!(spec = name, phase = %phase, "phase approved, advanced");
        }
        approved
    }

    /// Clear the approval of `phase` and of every later phase, moving the
    /// spec back if it had advanced past the reset point.
    pub fn reset_phase_approval(&self, name: &str, phase: Phase) {
        let (changed, now) = self.with_state(name, |s| (s.reset(phase), s.phase));
        if changed {
            tracing::info!(spec = name, reset = %phase, phase = %now, "phase approval reset");
        }
    }

    /// Move to `target` if the gate allows it.
    pub fn transition(&self, name: &str, target: Phase) -> Result<()> {
        let mut states = self.states();
        let state = states.entry(name.to_string()).or_default();
        if let Some(reason) = state.blocker(target) {
            return Err(SpecflowError::InvalidTransition {
                from: state.phase.to_string(),
                to: target.to_string(),
                reason: reason.to_string(),
            });
        }
        if state.phase != target {
            state.phase = target;
            state.log(HistoryAction::Transitioned, target);
            tracing::info!(spec = name, phase = %target, "phase transition");
        }
        Ok(())
    }

    pub fn specs(&self) -> Vec<String> {
        self.states().keys().cloned().collect()
    }

    pub fn forget(&self, name: &str) -> Result<WorkflowState> {
        self.states()
            .remove(name)
            .ok_or_else(|| SpecflowError::NotFound {
                kind: "spec",
                id: name.to_string(),
            })
    }

    // -----------------------------------------------------------------------
    // Approval queue
    // -----------------------------------------------------------------------

    pub fn queue_changes(&self, edits: Vec<FileEdit>, spec: Option<String>) -> Result<Uuid> {
        self.approvals.queue(edits, spec)
    }

    pub fn approve_change(&self, id: Uuid) -> bool {
        self.approvals.approve(id)
    }

    pub fn reject_change(&self, id: Uuid) -> bool {
        self.approvals.reject(id)
    }

    pub fn list_pending(&self) -> Vec<PendingChange> {
        self.approvals.list_pending()
    }

    pub fn pending_change(&self, id: Uuid) -> Option<PendingChange> {
        self.approvals.get(id)
    }

    /// Apply approved changes through the workspace filesystem.
    pub async fn apply_approved_changes(&self) -> ApplyReport {
        self.apply_approved_changes_to(self.fs.as_ref()).await
    }

    /// Apply approved changes through `sink` instead of the workspace
    /// filesystem.
    pub async fn apply_approved_changes_to(&self, sink: &dyn FilesystemSink) -> ApplyReport {
        let report = self.approvals.apply_approved(sink).await;
        tracing::info!(
            applied = report.applied.len(),
            edits = report.edits_applied,
            failures = report.failures.len(),
            "approved changes applied"
        );
        report
    }

    // -----------------------------------------------------------------------
    // Events
    // -----------------------------------------------------------------------

    /// Take an external event: queue any proposed edits, then forward the
    /// event to the hook engine. Invalid edits are rejected before anything
    /// else happens.
    pub async fn handle_event(&self, event: WorkspaceEvent) -> Result<EventOutcome> {
        let mut outcome = EventOutcome::default();
        if let WorkspaceEvent::AgentComplete { spec, edits } = &event {
            if let Some(name) = spec {
                self.with_state(name, |_| ());
            }
            if !edits.is_empty() {
                outcome.queued = Some(self.approvals.queue(edits.clone(), spec.clone())?);
            }
        }
        outcome.results = self.engine.dispatch(&event.to_hook_event()).await;
        Ok(outcome)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
