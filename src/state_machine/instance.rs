//! Instance runtime: start, signal, query and terminate a running pipeline.
//!
//! A pipeline body runs as one tokio task and is the only writer of stage
//! progress. Signal handlers and queries go through the same mutex, so every
//! query sees a consistent snapshot. A `watch` version counter is bumped on
//! each mutation; a body parked at a gate re-checks its condition whenever
//! the counter moves.

use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard};

use serde_json::{Map, Value, json};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::state::{
    APPROVAL_GATE, DOCS_PARITY_GATE, EventStatus, GateState, PipelineKind, PipelineState,
    PipelineStatus,
};
use crate::error::{PipelineError, Result};

pub const DEFAULT_APPROVE_NOTE: &str = "manual-approval";
pub const DEFAULT_TERMINATE_REASON: &str = "manual-termination";

/// External asynchronous message delivered to a running instance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Signal {
    Approve { note: Option<String> },
    DocsParity { evidence_path: String },
    /// Step mode only: release exactly one block.
    Advance { note: Option<String> },
}

struct Inner {
    state: PipelineState,
    pending_advances: u32,
}

struct Shared {
    inner: Mutex<Inner>,
    version: watch::Sender<u64>,
    cancel: CancellationToken,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, Inner> {
        // A panicked writer cannot leave the state half-updated; keep serving.
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn update<R>(&self, f: impl FnOnce(&mut Inner) -> R) -> R {
        let out = {
            let mut inner = self.lock();
            f(&mut inner)
        };
        self.version.send_modify(|v| *v += 1);
        out
    }

    fn snapshot(&self) -> PipelineState {
        self.lock().state.clone()
    }
}

/// Handed to the pipeline body; the body's only way to touch its state.
#[derive(Clone)]
pub struct RunContext {
    shared: Arc<Shared>,
}

impl RunContext {
    pub fn instance_id(&self) -> String {
        self.shared.lock().state.instance_id.clone()
    }

    pub fn snapshot(&self) -> PipelineState {
        self.shared.snapshot()
    }

    pub fn enter_stage(&self, stage: &str) -> Result<()> {
        self.shared.update(|inner| inner.state.enter_stage(stage))?;
        debug!(stage, "entered stage");
        Ok(())
    }

    pub fn record(&self, stage: &str, status: EventStatus, payload: Value) {
        self.shared
            .update(|inner| inner.state.record(stage, status, payload));
    }

    pub fn set_output(&self, key: &str, value: Value) {
        self.shared
            .update(|inner| inner.state.set_output(key, value));
    }

    pub fn merge_outputs(&self, values: &Map<String, Value>) {
        self.shared
            .update(|inner| inner.state.merge_outputs(values));
    }

    /// Current accumulator contents.
    pub fn outputs(&self) -> Map<String, Value> {
        self.shared.lock().state.outputs.clone()
    }

    pub fn complete(&self, payload: Value) {
        self.shared.update(|inner| inner.state.complete(payload));
    }

    /// Park until `gate` is granted.
    ///
    /// Returns immediately when the signal already arrived. Otherwise the
    /// status becomes `waiting` and a waiting event is logged for `stage`.
    /// The returned flag is `true` when the instance actually suspended.
    pub async fn wait_for_gate(
        &self,
        gate: &str,
        stage: &str,
        waiting: PipelineStatus,
    ) -> Result<(GateState, bool)> {
        let mut rx = self.shared.version.subscribe();
        let mut suspended = false;
        loop {
            {
                let inner = self.shared.lock();
                if inner.state.status.is_terminal() {
                    return Err(terminated_error(&inner.state));
                }
                if let Some(gate_state) = inner.state.gate(gate)
                    && gate_state.granted
                {
                    let gate_state = gate_state.clone();
                    drop(inner);
                    if suspended {
                        self.shared
                            .update(|inner| inner.state.set_status(PipelineStatus::Running));
                    }
                    return Ok((gate_state, suspended));
                }
            }
            if !suspended {
                suspended = true;
                self.shared.update(|inner| {
                    inner
                        .state
                        .wait_at(stage, waiting, json!({ "gate": gate }))
                });
                info!(gate, stage, status = %waiting, "instance suspended at gate");
                // The mutation above bumped the version; re-check before parking.
                continue;
            }
            if rx.changed().await.is_err() {
                return Err(PipelineError::Terminated("instance dropped".into()));
            }
        }
    }

    /// Step mode: consume one advance signal, parking until one is available.
    pub async fn wait_for_advance(&self, stage: &str) -> Result<()> {
        let mut rx = self.shared.version.subscribe();
        let mut suspended = false;
        loop {
            let released = {
                let mut inner = self.shared.lock();
                if inner.state.status.is_terminal() {
                    return Err(terminated_error(&inner.state));
                }
                if inner.pending_advances > 0 {
                    inner.pending_advances -= 1;
                    true
                } else {
                    false
                }
            };
            if released {
                if suspended {
                    self.shared
                        .update(|inner| inner.state.set_status(PipelineStatus::Running));
                }
                return Ok(());
            }
            if !suspended {
                suspended = true;
                self.shared.update(|inner| {
                    inner.state.wait_at(
                        stage,
                        PipelineStatus::WaitingForAdvance,
                        json!({ "next_stage": stage }),
                    )
                });
                continue;
            }
            if rx.changed().await.is_err() {
                return Err(PipelineError::Terminated("instance dropped".into()));
            }
        }
    }
}

fn terminated_error(state: &PipelineState) -> PipelineError {
    PipelineError::Terminated(
        state
            .error
            .clone()
            .unwrap_or_else(|| DEFAULT_TERMINATE_REASON.to_string()),
    )
}

/// Control surface for one running instance.
pub struct PipelineHandle<O> {
    instance_id: String,
    initial: PipelineState,
    shared: Arc<Shared>,
    task: JoinHandle<Result<O>>,
}

/// Start `body` as a new instance of `kind`.
pub fn spawn<O, F, Fut>(kind: PipelineKind, body: F) -> PipelineHandle<O>
where
    O: Send + 'static,
    F: FnOnce(RunContext) -> Fut,
    Fut: Future<Output = Result<O>> + Send + 'static,
{
    let instance_id = Uuid::new_v4().to_string();
    let initial = PipelineState::new(instance_id.clone(), kind);
    let (version, _) = watch::channel(0u64);
    let shared = Arc::new(Shared {
        inner: Mutex::new(Inner {
            state: initial.clone(),
            pending_advances: 0,
        }),
        version,
        cancel: CancellationToken::new(),
    });

    let fut = body(RunContext {
        shared: shared.clone(),
    });
    let runner = shared.clone();
    let id = instance_id.clone();
    let task = tokio::spawn(async move {
        info!(instance_id = %id, pipeline = %kind, "instance started");
        runner.update(|inner| inner.state.set_status(PipelineStatus::Running));

        let outcome = tokio::select! {
            biased;
            _ = runner.cancel.cancelled() => {
                Err(terminated_error(&runner.snapshot()))
            }
            result = fut => result,
        };

        match &outcome {
            Ok(_) => info!(instance_id = %id, "instance complete"),
            Err(PipelineError::Terminated(reason)) => {
                info!(instance_id = %id, reason = %reason, "instance terminated");
            }
            Err(err) => {
                warn!(instance_id = %id, error = %err, "instance failed");
                let message = err.to_string();
                runner.update(|inner| inner.state.fail(&message));
            }
        }
        outcome
    });

    PipelineHandle {
        instance_id,
        initial,
        shared,
        task,
    }
}

impl<O> PipelineHandle<O> {
    pub fn id(&self) -> &str {
        &self.instance_id
    }

    /// State at the moment the instance was created.
    pub fn initial_state(&self) -> &PipelineState {
        &self.initial
    }

    /// Side-effect-free snapshot of the current state.
    pub fn query(&self) -> PipelineState {
        self.shared.snapshot()
    }

    /// Deliver a signal. Returns `true` when it changed the instance.
    ///
    /// Signals not meaningful for this pipeline are rejected. Signals sent to
    /// a finished instance are ignored.
    pub fn signal(&self, signal: Signal) -> Result<bool> {
        let kind = self.initial.pipeline;
        match signal {
            Signal::Approve { note } => {
                if !kind.gates().contains(&APPROVAL_GATE) {
                    return Err(PipelineError::Validation(format!(
                        "{kind} pipeline has no approval gate"
                    )));
                }
                let note = note
                    .filter(|n| !n.trim().is_empty())
                    .unwrap_or_else(|| DEFAULT_APPROVE_NOTE.to_string());
                Ok(self.shared.update(|inner| {
                    let granted = inner.state.grant(APPROVAL_GATE, Some(note));
                    if granted {
                        info!(instance_id = %inner.state.instance_id, "approval signal received");
                    }
                    granted
                }))
            }
            Signal::DocsParity { evidence_path } => {
                if !kind.gates().contains(&DOCS_PARITY_GATE) {
                    return Err(PipelineError::Validation(format!(
                        "{kind} pipeline has no docs parity gate"
                    )));
                }
                if evidence_path.trim().is_empty() {
                    return Err(PipelineError::Validation(
                        "docs parity evidence path must not be empty".into(),
                    ));
                }
                Ok(self
                    .shared
                    .update(|inner| inner.state.grant(DOCS_PARITY_GATE, Some(evidence_path))))
            }
            Signal::Advance { note } => {
                if kind != PipelineKind::Blocks {
                    return Err(PipelineError::Validation(format!(
                        "{kind} pipeline does not accept advance signals"
                    )));
                }
                Ok(self.shared.update(|inner| {
                    if inner.state.status.is_terminal() {
                        return false;
                    }
                    inner.pending_advances += 1;
                    debug!(note = ?note, pending = inner.pending_advances, "advance signal received");
                    true
                }))
            }
        }
    }

    pub fn approve(&self, note: Option<String>) -> Result<bool> {
        self.signal(Signal::Approve { note })
    }

    pub fn docs_parity(&self, evidence_path: impl Into<String>) -> Result<bool> {
        self.signal(Signal::DocsParity {
            evidence_path: evidence_path.into(),
        })
    }

    pub fn advance(&self) -> Result<bool> {
        self.signal(Signal::Advance { note: None })
    }

    /// End the instance immediately. No-op once finished.
    pub fn terminate(&self, reason: Option<&str>) -> bool {
        let reason = reason
            .filter(|r| !r.trim().is_empty())
            .unwrap_or(DEFAULT_TERMINATE_REASON);
        let changed = self.shared.update(|inner| inner.state.terminate(reason));
        if changed {
            self.shared.cancel.cancel();
        }
        changed
    }

    /// Wait until `predicate` holds for the current state, returning it.
    pub async fn wait_until(&self, predicate: impl Fn(&PipelineState) -> bool) -> PipelineState {
        let mut rx = self.shared.version.subscribe();
        loop {
            let snapshot = self.shared.snapshot();
            if predicate(&snapshot) || snapshot.status.is_terminal() {
                return snapshot;
            }
            rx.borrow_and_update();
            let snapshot = self.shared.snapshot();
            if predicate(&snapshot) || snapshot.status.is_terminal() {
                return snapshot;
            }
            if rx.changed().await.is_err() {
                return self.shared.snapshot();
            }
        }
    }

    /// Wait until the instance finishes or parks at a gate.
    pub async fn settle(&self) -> PipelineState {
        self.wait_until(|s| s.status.is_waiting()).await
    }

    /// Wait for the body's result.
    pub async fn result(self) -> Result<O> {
        match self.task.await {
            Ok(outcome) => outcome,
            Err(join) => Err(PipelineError::Terminated(format!(
                "instance task aborted: {join}"
            ))),
        }
    }
}
