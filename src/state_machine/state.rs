use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::warn;

use crate::error::{PipelineError, Result};

pub const NOT_STARTED: &str = "not_started";
pub const COMPLETE: &str = "complete";
pub const APPROVAL_GATE: &str = "approval_gate";
pub const DOCS_PARITY_GATE: &str = "docs_parity_gate";

const BLOCK_STAGES: &[&str] = &[
    NOT_STARTED,
    "B1",
    "B2",
    "B3",
    "B4",
    "B5",
    "B6",
    "B7",
    "B8",
    COMPLETE,
];

const MIGRATION_STAGES: &[&str] = &[
    NOT_STARTED,
    "extract",
    "transform",
    "load",
    "validate",
    "report",
    COMPLETE,
];

const BOOTSTRAP_STAGES: &[&str] = &[
    NOT_STARTED,
    APPROVAL_GATE,
    "generate_bundle",
    DOCS_PARITY_GATE,
    COMPLETE,
];

/// The three pipeline families. Each has a fixed stage set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineKind {
    Blocks,
    Migration,
    Bootstrap,
}

impl PipelineKind {
    pub fn stages(&self) -> &'static [&'static str] {
        match self {
            PipelineKind::Blocks => BLOCK_STAGES,
            PipelineKind::Migration => MIGRATION_STAGES,
            PipelineKind::Bootstrap => BOOTSTRAP_STAGES,
        }
    }

    /// Signal gates the pipeline declares, in the order they are reached.
    pub fn gates(&self) -> &'static [&'static str] {
        match self {
            PipelineKind::Blocks => &[APPROVAL_GATE],
            PipelineKind::Migration => &[],
            PipelineKind::Bootstrap => &[APPROVAL_GATE, DOCS_PARITY_GATE],
        }
    }
}

impl fmt::Display for PipelineKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PipelineKind::Blocks => write!(f, "blocks"),
            PipelineKind::Migration => write!(f, "migration"),
            PipelineKind::Bootstrap => write!(f, "bootstrap"),
        }
    }
}

/// Lifecycle status of a pipeline instance.
///
/// pending → running → {waiting_*} → running → {complete | failed | terminated}
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineStatus {
    Pending,
    Running,
    WaitingForApproval,
    WaitingForDocsParity,
    WaitingForAdvance,
    Complete,
    Failed,
    Terminated,
}

impl PipelineStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            PipelineStatus::Complete | PipelineStatus::Failed | PipelineStatus::Terminated
        )
    }

    pub fn is_waiting(&self) -> bool {
        matches!(
            self,
            PipelineStatus::WaitingForApproval
                | PipelineStatus::WaitingForDocsParity
                | PipelineStatus::WaitingForAdvance
        )
    }

    /// Whether `self → next` is a legal move.
    pub fn can_transition_to(&self, next: PipelineStatus) -> bool {
        use PipelineStatus::*;
        if self.is_terminal() {
            return false;
        }
        match (self, next) {
            (_, Terminated) => true,
            (Pending, Running) => true,
            (Pending, Failed) => true,
            (Running, Complete | Failed) => true,
            (Running, s) if s.is_waiting() => true,
            (s, Running) if s.is_waiting() => true,
            (s, Failed) if s.is_waiting() => true,
            _ => false,
        }
    }
}

impl fmt::Display for PipelineStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            PipelineStatus::Pending => "pending",
            PipelineStatus::Running => "running",
            PipelineStatus::WaitingForApproval => "waiting_for_approval",
            PipelineStatus::WaitingForDocsParity => "waiting_for_docs_parity",
            PipelineStatus::WaitingForAdvance => "waiting_for_advance",
            PipelineStatus::Complete => "complete",
            PipelineStatus::Failed => "failed",
            PipelineStatus::Terminated => "terminated",
        };
        f.write_str(text)
    }
}

/// Outcome recorded by one history entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventStatus {
    Completed,
    Failed,
    Waiting,
    Approved,
    /// A phase before the resume checkpoint was not executed.
    Resumed,
    /// A phase was derived without invoking its activity.
    Backfilled,
    Skipped,
    Terminated,
}

/// Immutable history entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageEvent {
    /// 1-based position in the history.
    pub sequence: u64,
    pub stage: String,
    pub status: EventStatus,
    pub payload: Value,
    pub recorded_at: DateTime<Utc>,
}

/// Approval state of one signal gate.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GateState {
    pub granted: bool,
    /// Approval note, or the evidence path for the docs-parity gate.
    pub note: Option<String>,
    pub granted_at: Option<DateTime<Utc>>,
}

/// Complete observable state of one pipeline instance.
///
/// Owned by the instance and mutated only by its own execution or its signal
/// handlers. Once the status is terminal every mutator is a no-op, so nothing
/// is written after completion, failure or termination.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineState {
    pub instance_id: String,
    pub pipeline: PipelineKind,
    pub status: PipelineStatus,
    pub current_stage: String,
    pub approvals: BTreeMap<String, GateState>,
    /// Accumulated stage outputs; later writes win.
    pub outputs: Map<String, Value>,
    pub history: Vec<StageEvent>,
    pub error: Option<String>,
    pub started_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl PipelineState {
    pub fn new(instance_id: String, pipeline: PipelineKind) -> Self {
        let now = Utc::now();
        let approvals = pipeline
            .gates()
            .iter()
            .map(|gate| (gate.to_string(), GateState::default()))
            .collect();
        Self {
            instance_id,
            pipeline,
            status: PipelineStatus::Pending,
            current_stage: NOT_STARTED.to_string(),
            approvals,
            outputs: Map::new(),
            history: Vec::new(),
            error: None,
            started_at: now,
            updated_at: now,
        }
    }

    /// Move to `next` if legal; illegal moves are logged and ignored.
    pub fn set_status(&mut self, next: PipelineStatus) -> bool {
        if self.status == next {
            return true;
        }
        if !self.status.can_transition_to(next) {
            warn!(
                instance_id = %self.instance_id,
                from = %self.status,
                to = %next,
                "ignoring illegal status transition"
            );
            return false;
        }
        self.status = next;
        self.touch();
        true
    }

    /// Enter a stage of this pipeline's fixed stage set.
    pub fn enter_stage(&mut self, stage: &str) -> Result<()> {
        if !self.pipeline.stages().contains(&stage) {
            return Err(PipelineError::UnknownStage {
                pipeline: self.pipeline.to_string(),
                stage: stage.to_string(),
            });
        }
        if self.status.is_terminal() {
            return Ok(());
        }
        self.current_stage = stage.to_string();
        self.set_status(PipelineStatus::Running);
        self.touch();
        Ok(())
    }

    /// Append a history entry, returning its sequence number.
    pub fn record(&mut self, stage: &str, status: EventStatus, payload: Value) -> Option<u64> {
        if self.status.is_terminal() {
            return None;
        }
        Some(self.push_event(stage, status, payload))
    }

    fn push_event(&mut self, stage: &str, status: EventStatus, payload: Value) -> u64 {
        let sequence = self.history.len() as u64 + 1;
        self.history.push(StageEvent {
            sequence,
            stage: stage.to_string(),
            status,
            payload,
            recorded_at: Utc::now(),
        });
        self.touch();
        sequence
    }

    /// Park at a gate: status becomes `waiting` and a waiting event is logged.
    pub fn wait_at(&mut self, stage: &str, waiting: PipelineStatus, payload: Value) {
        if self.set_status(waiting) {
            self.push_event(stage, EventStatus::Waiting, payload);
        }
    }

    /// Mark a gate granted. Returns `false` when already granted or finished.
    pub fn grant(&mut self, gate: &str, note: Option<String>) -> bool {
        if self.status.is_terminal() {
            return false;
        }
        let entry = self.approvals.entry(gate.to_string()).or_default();
        if entry.granted {
            return false;
        }
        entry.granted = true;
        entry.note = note;
        entry.granted_at = Some(Utc::now());
        self.touch();
        true
    }

    pub fn is_granted(&self, gate: &str) -> bool {
        self.approvals.get(gate).is_some_and(|g| g.granted)
    }

    pub fn gate(&self, gate: &str) -> Option<&GateState> {
        self.approvals.get(gate)
    }

    pub fn set_output(&mut self, key: &str, value: Value) {
        if self.status.is_terminal() {
            return;
        }
        self.outputs.insert(key.to_string(), value);
        self.touch();
    }

    /// Merge `values` into the accumulator; on collision the new value wins.
    pub fn merge_outputs(&mut self, values: &Map<String, Value>) {
        if self.status.is_terminal() {
            return;
        }
        for (key, value) in values {
            self.outputs.insert(key.clone(), value.clone());
        }
        self.touch();
    }

    pub fn complete(&mut self, payload: Value) {
        if self.status.is_terminal() {
            return;
        }
        self.current_stage = COMPLETE.to_string();
        if self.set_status(PipelineStatus::Complete) {
            self.push_event(COMPLETE, EventStatus::Completed, payload);
        }
    }

    /// Fail at the current stage; committed history is kept.
    pub fn fail(&mut self, message: &str) {
        if self.status.is_terminal() {
            return;
        }
        let stage = self.current_stage.clone();
        self.push_event(
            &stage,
            EventStatus::Failed,
            serde_json::json!({ "error": message }),
        );
        self.error = Some(message.to_string());
        self.set_status(PipelineStatus::Failed);
    }

    /// End immediately from any non-terminal status.
    pub fn terminate(&mut self, reason: &str) -> bool {
        if self.status.is_terminal() {
            return false;
        }
        let stage = self.current_stage.clone();
        self.push_event(
            &stage,
            EventStatus::Terminated,
            serde_json::json!({ "reason": reason }),
        );
        self.error = Some(reason.to_string());
        self.set_status(PipelineStatus::Terminated)
    }

    /// Stage ids with a `completed` event, in history order.
    pub fn completed_stages(&self) -> Vec<&str> {
        self.history
            .iter()
            .filter(|e| e.status == EventStatus::Completed && e.stage != COMPLETE)
            .map(|e| e.stage.as_str())
            .collect()
    }

    fn touch(&mut self) {
        self.updated_at = Utc::now();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn blocks_state() -> PipelineState {
        PipelineState::new("inst-1".into(), PipelineKind::Blocks)
    }

    #[test]
    fn new_state_is_pending_at_not_started() {
        let state = blocks_state();
        assert_eq!(state.status, PipelineStatus::Pending);
        assert_eq!(state.current_stage, NOT_STARTED);
        assert!(state.history.is_empty());
        assert!(!state.is_granted(APPROVAL_GATE));
        assert_eq!(state.approvals.len(), 1);
    }

    #[test]
    fn bootstrap_declares_both_gates() {
        let state = PipelineState::new("b".into(), PipelineKind::Bootstrap);
        let gates: Vec<_> = state.approvals.keys().cloned().collect();
        assert_eq!(gates, vec![APPROVAL_GATE, DOCS_PARITY_GATE]);
    }

    #[test]
    fn happy_path_walks_statuses() {
        let mut state = blocks_state();
        state.enter_stage("B1").unwrap();
        assert_eq!(state.status, PipelineStatus::Running);
        state.record("B1", EventStatus::Completed, json!({}));

        state.wait_at("B7", PipelineStatus::WaitingForApproval, json!({}));
        assert_eq!(state.status, PipelineStatus::WaitingForApproval);
        assert!(state.set_status(PipelineStatus::Running));

        state.complete(json!({"ok": true}));
        assert_eq!(state.status, PipelineStatus::Complete);
        assert_eq!(state.current_stage, COMPLETE);

        let seqs: Vec<u64> = state.history.iter().map(|e| e.sequence).collect();
        assert_eq!(seqs, vec![1, 2, 3]);
    }

    #[test]
    fn unknown_stage_is_rejected() {
        let mut state = blocks_state();
        let err = state.enter_stage("extract").unwrap_err();
        assert!(matches!(err, PipelineError::UnknownStage { .. }));
        assert_eq!(state.current_stage, NOT_STARTED);
    }

    #[test]
    fn illegal_transition_is_ignored() {
        let mut state = blocks_state();
        assert!(!state.set_status(PipelineStatus::Complete));
        assert_eq!(state.status, PipelineStatus::Pending);
    }

    #[test]
    fn grant_is_idempotent() {
        let mut state = blocks_state();
        assert!(state.grant(APPROVAL_GATE, Some("first".into())));
        assert!(!state.grant(APPROVAL_GATE, Some("second".into())));
        assert_eq!(
            state.gate(APPROVAL_GATE).unwrap().note.as_deref(),
            Some("first")
        );
    }

    #[test]
    fn terminal_state_ignores_mutation() {
        let mut state = blocks_state();
        state.enter_stage("B3").unwrap();
        assert!(state.terminate("manual-termination"));
        let len = state.history.len();

        assert!(state.record("B4", EventStatus::Completed, json!({})).is_none());
        state.set_output("k", json!(1));
        state.enter_stage("B4").unwrap();
        state.fail("late failure");
        assert!(!state.terminate("again"));

        assert_eq!(state.status, PipelineStatus::Terminated);
        assert_eq!(state.current_stage, "B3");
        assert_eq!(state.history.len(), len);
        assert!(state.outputs.is_empty());
    }

    #[test]
    fn fail_keeps_committed_history() {
        let mut state = blocks_state();
        state.enter_stage("B1").unwrap();
        state.record("B1", EventStatus::Completed, json!({}));
        state.enter_stage("B2").unwrap();
        state.fail("dependency service down");

        assert_eq!(state.status, PipelineStatus::Failed);
        assert_eq!(state.history.len(), 2);
        let last = state.history.last().unwrap();
        assert_eq!(last.stage, "B2");
        assert_eq!(last.status, EventStatus::Failed);
        assert_eq!(last.payload["error"], "dependency service down");
        assert_eq!(state.completed_stages(), vec!["B1"]);
    }

    #[test]
    fn merge_outputs_last_write_wins() {
        let mut state = blocks_state();
        state.enter_stage("B1").unwrap();
        let mut first = Map::new();
        first.insert("scope".into(), json!("v1"));
        first.insert("owner".into(), json!("planner"));
        state.merge_outputs(&first);

        let mut second = Map::new();
        second.insert("scope".into(), json!("v2"));
        state.merge_outputs(&second);

        assert_eq!(state.outputs["scope"], "v2");
        assert_eq!(state.outputs["owner"], "planner");
    }

    #[test]
    fn status_serializes_snake_case() {
        let json = serde_json::to_string(&PipelineStatus::WaitingForApproval).unwrap();
        assert_eq!(json, r#""waiting_for_approval""#);
        assert_eq!(
            PipelineStatus::WaitingForDocsParity.to_string(),
            "waiting_for_docs_parity"
        );
    }
}
