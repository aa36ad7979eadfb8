//! B1..B8 block pipeline.
//!
//! Blocks run strictly in order. Each block's declared outputs are merged
//! into a shared accumulator that later blocks read. B7 waits on the
//! approval gate, and in step mode every block first waits for one
//! `advance` signal.

mod catalog;

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::Deserialize;
use serde_json::{Map, Value, json};
use tracing::info;

use crate::activity::{self, ActivityOptions};
use crate::error::{PipelineError, Result};
use crate::generation::TextGenerator;
use crate::state_machine::{
    APPROVAL_GATE, EventStatus, PipelineHandle, PipelineKind, PipelineStatus, RunContext, spawn,
};

pub use catalog::{BLOCKS, BlockSpec, GATED_BLOCK, compute_outputs, find};

const DEFAULT_TASK_ID: &str = "adhoc";

/// Start payload for the block pipeline.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct BlockPayload {
    #[serde(default)]
    pub task_id: Option<String>,
    /// Per-block input overrides, keyed by block id.
    #[serde(default)]
    pub block_inputs: BTreeMap<String, Map<String, Value>>,
    #[serde(default)]
    pub step_mode: bool,
    #[serde(default)]
    pub rerun_of_workflow_id: Option<String>,
}

impl BlockPayload {
    pub fn from_value(value: Value) -> Result<Self> {
        if !value.is_object() {
            return Err(PipelineError::Validation(
                "block payload must be a JSON object".into(),
            ));
        }
        let payload: BlockPayload = serde_json::from_value(value)
            .map_err(|e| PipelineError::Validation(e.to_string()))?;
        payload.validate()?;
        Ok(payload)
    }

    fn validate(&self) -> Result<()> {
        if let Some(unknown) = self.block_inputs.keys().find(|k| find(k).is_none()) {
            return Err(PipelineError::Validation(format!(
                "block_inputs has unknown block {unknown}"
            )));
        }
        if let Some(task_id) = &self.task_id
            && task_id.trim().is_empty()
        {
            return Err(PipelineError::Validation("task_id must not be blank".into()));
        }
        Ok(())
    }

    pub fn task_id(&self) -> &str {
        self.task_id.as_deref().unwrap_or(DEFAULT_TASK_ID)
    }
}

/// Starts block pipeline instances.
#[derive(Clone)]
pub struct BlockPipeline {
    options: ActivityOptions,
    generator: Option<Arc<dyn TextGenerator>>,
}

impl BlockPipeline {
    pub fn new(options: ActivityOptions) -> Self {
        Self {
            options,
            generator: None,
        }
    }

    pub fn with_generator(mut self, generator: Arc<dyn TextGenerator>) -> Self {
        self.generator = Some(generator);
        self
    }

    /// Validate `payload` and start an instance. Validation errors reject the
    /// call without creating an instance.
    pub fn start(&self, payload: Value) -> Result<PipelineHandle<Value>> {
        let payload = BlockPayload::from_value(payload)?;
        let pipeline = self.clone();
        Ok(spawn(PipelineKind::Blocks, move |ctx| async move {
            pipeline.run(ctx, payload).await
        }))
    }

    async fn run(self, ctx: RunContext, payload: BlockPayload) -> Result<Value> {
        let task_id = payload.task_id().to_string();
        info!(
            instance_id = %ctx.instance_id(),
            task_id = %task_id,
            step_mode = payload.step_mode,
            "block pipeline started"
        );

        for block in BLOCKS {
            if payload.step_mode {
                ctx.wait_for_advance(block.id).await?;
            }
            ctx.enter_stage(block.id)?;

            if block.id == GATED_BLOCK {
                let (gate, suspended) = ctx
                    .wait_for_gate(APPROVAL_GATE, block.id, PipelineStatus::WaitingForApproval)
                    .await?;
                ctx.record(
                    APPROVAL_GATE,
                    EventStatus::Approved,
                    json!({ "note": gate.note, "resumed": suspended }),
                );
            }

            let own_inputs = payload.block_inputs.get(block.id);
            let mut input = ctx.outputs();
            if let Some(own) = own_inputs {
                for (key, value) in own {
                    input.insert(key.clone(), value.clone());
                }
            }

            let outputs = activity::invoke(&format!("block_{}", block.id), &self.options, |_| {
                let input = input.clone();
                let task_id = task_id.clone();
                let generator = self.generator.clone();
                async move {
                    execute_block(block, &task_id, &input, own_inputs, generator.as_deref()).await
                }
            })
            .await?;

            ctx.merge_outputs(&outputs);
            ctx.record(
                block.id,
                EventStatus::Completed,
                json!({
                    "name": block.name,
                    "owner": block.owner,
                    "outputs": outputs,
                }),
            );
            info!(block = block.id, name = block.name, "block completed");
        }

        let outputs = ctx.outputs();
        let ship_decision = outputs.get("ship_decision").cloned().unwrap_or(Value::Null);
        let summary = json!({
            "instance_id": ctx.instance_id(),
            "task_id": task_id,
            "rerun_of_workflow_id": payload.rerun_of_workflow_id,
            "ship_decision": ship_decision,
            "outputs": outputs,
        });
        ctx.complete(summary.clone());
        Ok(summary)
    }
}

/// One attempt of one block: deterministic outputs, an optional narrative,
/// then the block's own input values for declared fields.
async fn execute_block(
    block: &BlockSpec,
    task_id: &str,
    input: &Map<String, Value>,
    own_inputs: Option<&Map<String, Value>>,
    generator: Option<&dyn TextGenerator>,
) -> Result<Map<String, Value>> {
    let mut outputs = compute_outputs(block, task_id, input);

    if let (Some(generator), Some(field)) = (generator, block.narrative) {
        let prompt = catalog::narrative_prompt(block, task_id, input);
        let text = generator.generate(&prompt).await?;
        outputs.insert(field.to_string(), Value::String(text.trim().to_string()));
    }

    if let Some(own) = own_inputs {
        for field in block.outputs {
            if let Some(value) = own.get(*field) {
                outputs.insert((*field).to_string(), value.clone());
            }
        }
    }
    Ok(outputs)
}
