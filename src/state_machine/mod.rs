mod instance;
mod state;

pub use instance::{
    DEFAULT_APPROVE_NOTE, DEFAULT_TERMINATE_REASON, PipelineHandle, RunContext, Signal, spawn,
};
pub use state::{
    APPROVAL_GATE, COMPLETE, DOCS_PARITY_GATE, EventStatus, GateState, NOT_STARTED, PipelineKind,
    PipelineState, PipelineStatus, StageEvent,
};
