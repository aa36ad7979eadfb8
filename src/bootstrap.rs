//! Self-bootstrap pipeline: approval gate → bundle generation → docs-parity
//! gate → complete.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tracing::info;

use crate::activity::{self, ActivityOptions};
use crate::artifacts::{ArtifactStore, FsArtifactStore};
use crate::error::{PipelineError, Result};
use crate::git::{self, RepoInfo};
use crate::paths::{DEFAULT_OUTPUT_DIR, absolute_root, resolve_under};
use crate::state_machine::{
    APPROVAL_GATE, DOCS_PARITY_GATE, EventStatus, PipelineHandle, PipelineKind, PipelineStatus,
    RunContext, spawn,
};

pub const DEFAULT_ROADMAP_TASK_ID: &str = "P2-MH-10";
pub const BUNDLE_DIR: &str = "self-bootstrap";
pub const METADATA_FILE: &str = "bundle-metadata.json";
pub const DIFF_FILE: &str = "bundle-placeholder.diff";

#[derive(Debug, Clone, Deserialize)]
pub struct BootstrapPayload {
    #[serde(default = "default_task_id")]
    pub roadmap_task_id: String,
    #[serde(default = "default_repo_root")]
    pub repo_root: PathBuf,
    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,
    #[serde(default)]
    pub continuous_mode: bool,
}

fn default_task_id() -> String {
    DEFAULT_ROADMAP_TASK_ID.to_string()
}

fn default_repo_root() -> PathBuf {
    PathBuf::from(".")
}

fn default_output_dir() -> PathBuf {
    PathBuf::from(DEFAULT_OUTPUT_DIR)
}

impl Default for BootstrapPayload {
    fn default() -> Self {
        Self {
            roadmap_task_id: default_task_id(),
            repo_root: default_repo_root(),
            output_dir: default_output_dir(),
            continuous_mode: false,
        }
    }
}

/// `3..=64` characters of `A-Z`, `0-9`, `.` or `-`.
fn valid_task_id(id: &str) -> bool {
    (3..=64).contains(&id.len())
        && id
            .chars()
            .all(|c| c.is_ascii_uppercase() || c.is_ascii_digit() || c == '.' || c == '-')
}

#[derive(Debug, Clone)]
struct BootstrapPlan {
    roadmap_task_id: String,
    repo_root: PathBuf,
    output_dir: PathBuf,
    continuous_mode: bool,
}

impl BootstrapPlan {
    fn from_value(value: Value) -> Result<Self> {
        if !value.is_object() {
            return Err(PipelineError::Validation(
                "bootstrap payload must be a JSON object".into(),
            ));
        }
        let payload: BootstrapPayload = serde_json::from_value(value)
            .map_err(|e| PipelineError::Validation(e.to_string()))?;
        if !valid_task_id(&payload.roadmap_task_id) {
            return Err(PipelineError::Validation(format!(
                "roadmap_task_id {:?} must be 3-64 characters of A-Z, 0-9, '.' or '-'",
                payload.roadmap_task_id
            )));
        }
        let repo_root = absolute_root(&payload.repo_root)?;
        let output_dir = resolve_under(&repo_root, &payload.output_dir)?;
        Ok(Self {
            roadmap_task_id: payload.roadmap_task_id,
            repo_root,
            output_dir,
            continuous_mode: payload.continuous_mode,
        })
    }
}

/// Paths written by the bundle-generation activity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BundleArtifacts {
    pub metadata_path: String,
    pub diff_path: String,
}

#[derive(Debug, Serialize)]
struct BundleMetadata<'a> {
    roadmap_task_id: &'a str,
    instance_id: &'a str,
    continuous_mode: bool,
    approval_note: Option<&'a str>,
    git: Option<RepoInfo>,
    generated_at: chrono::DateTime<chrono::Utc>,
}

/// Starts bootstrap instances.
#[derive(Clone)]
pub struct BootstrapPipeline {
    options: ActivityOptions,
    store: Option<Arc<dyn ArtifactStore>>,
}

impl BootstrapPipeline {
    pub fn new(options: ActivityOptions) -> Self {
        Self {
            options,
            store: None,
        }
    }

    /// Replace the filesystem store rooted at `output_dir` that receives the
    /// bundle.
    pub fn with_store(mut self, store: Arc<dyn ArtifactStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn start(&self, payload: Value) -> Result<PipelineHandle<Value>> {
        let plan = BootstrapPlan::from_value(payload)?;
        let pipeline = self.clone();
        Ok(spawn(PipelineKind::Bootstrap, move |ctx| async move {
            pipeline.run(ctx, plan).await
        }))
    }

    async fn run(self, ctx: RunContext, plan: BootstrapPlan) -> Result<Value> {
        let instance_id = ctx.instance_id();
        info!(
            instance_id = %instance_id,
            roadmap_task_id = %plan.roadmap_task_id,
            continuous_mode = plan.continuous_mode,
            "bootstrap started"
        );

        ctx.enter_stage(APPROVAL_GATE)?;
        let (approval, suspended) = ctx
            .wait_for_gate(APPROVAL_GATE, APPROVAL_GATE, PipelineStatus::WaitingForApproval)
            .await?;
        ctx.record(
            APPROVAL_GATE,
            EventStatus::Approved,
            json!({ "note": approval.note, "resumed": suspended }),
        );

        ctx.enter_stage("generate_bundle")?;
        let info = repo_info(plan.repo_root.clone()).await;
        let store: Arc<dyn ArtifactStore> = match &self.store {
            Some(store) => store.clone(),
            None => Arc::new(FsArtifactStore::new(&plan.output_dir)),
        };
        let bundle_dir = Path::new(BUNDLE_DIR).join(&instance_id);
        let metadata = BundleMetadata {
            roadmap_task_id: &plan.roadmap_task_id,
            instance_id: &instance_id,
            continuous_mode: plan.continuous_mode,
            approval_note: approval.note.as_deref(),
            git: info,
            generated_at: chrono::Utc::now(),
        };
        let metadata_bytes = serde_json::to_vec_pretty(&metadata)?;
        let diff_bytes = placeholder_diff(&plan.roadmap_task_id, &instance_id).into_bytes();

        let artifacts = activity::invoke("generate_bundle", &self.options, |_| {
            let store = store.clone();
            let bundle_dir = bundle_dir.clone();
            let metadata_bytes = metadata_bytes.clone();
            let diff_bytes = diff_bytes.clone();
            async move {
                let metadata_path = store
                    .write(&bundle_dir.join(METADATA_FILE), &metadata_bytes)
                    .await?;
                let diff_path = store
                    .write(&bundle_dir.join(DIFF_FILE), &diff_bytes)
                    .await?;
                Ok::<_, PipelineError>(BundleArtifacts {
                    metadata_path: metadata_path.display().to_string(),
                    diff_path: diff_path.display().to_string(),
                })
            }
        })
        .await?;
        ctx.set_output("bundle_metadata_path", json!(artifacts.metadata_path));
        ctx.set_output("bundle_diff_path", json!(artifacts.diff_path));
        ctx.record("generate_bundle", EventStatus::Completed, json!(artifacts));

        ctx.enter_stage(DOCS_PARITY_GATE)?;
        let (parity, suspended) = ctx
            .wait_for_gate(
                DOCS_PARITY_GATE,
                DOCS_PARITY_GATE,
                PipelineStatus::WaitingForDocsParity,
            )
            .await?;
        ctx.record(
            DOCS_PARITY_GATE,
            EventStatus::Approved,
            json!({ "evidence_path": parity.note, "resumed": suspended }),
        );

        let summary = json!({
            "instance_id": instance_id,
            "roadmap_task_id": plan.roadmap_task_id,
            "continuous_mode": plan.continuous_mode,
            "approval_note": approval.note,
            "docs_parity_evidence": parity.note,
            "bundle": artifacts,
        });
        ctx.complete(summary.clone());
        info!(instance_id = %instance_id, "bootstrap complete");
        Ok(summary)
    }
}

// libgit2 is blocking.
async fn repo_info(root: PathBuf) -> Option<RepoInfo> {
    tokio::task::spawn_blocking(move || git::repo_info(&root))
        .await
        .ok()
        .flatten()
}

fn placeholder_diff(task_id: &str, instance_id: &str) -> String {
    format!(
        "# gatehouse self-bootstrap bundle\n\
         # roadmap_task_id: {task_id}\n\
         # instance_id: {instance_id}\n\
         # No changes were generated for this run.\n"
    )
}
