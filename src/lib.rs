//! Gatehouse: resumable, approval-gated automation pipelines.
//!
//! Three pipelines share one instance runtime ([`state_machine`]): the fixed
//! B1..B8 block pipeline ([`blocks`]), the checkpointed migration ETL
//! ([`migration`]) and the self-bootstrap pipeline ([`bootstrap`]). Each
//! instance is started in-process, queried through a snapshot and steered
//! with signals.

pub mod activity;
pub mod artifacts;
pub mod blocks;
pub mod bootstrap;
pub mod config;
pub mod error;
pub mod generation;
pub mod git;
pub mod migration;
pub mod paths;
pub mod state_machine;

pub use error::{PipelineError, Result};
pub use state_machine::{PipelineHandle, PipelineKind, PipelineState, PipelineStatus, Signal};
