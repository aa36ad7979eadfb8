use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use super::connector::ConnectorSettings;
use super::source::{DEFAULT_SYSTEM, SourceFormat, SourceMode, default_inline_records};
use crate::error::{PipelineError, Result};
use crate::paths::{DEFAULT_OUTPUT_DIR, absolute_root, resolve_under};

pub const MAX_SAMPLE: usize = 10;

/// Resume point of the migration pipeline.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Checkpoint {
    #[default]
    Extract,
    Transform,
    Load,
    Validate,
}

impl Checkpoint {
    pub fn runs_extract(self) -> bool {
        self == Checkpoint::Extract
    }

    pub fn runs_transform(self) -> bool {
        self <= Checkpoint::Transform
    }

    pub fn runs_load(self) -> bool {
        self <= Checkpoint::Load
    }
}

impl fmt::Display for Checkpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            Checkpoint::Extract => "extract",
            Checkpoint::Transform => "transform",
            Checkpoint::Load => "load",
            Checkpoint::Validate => "validate",
        };
        f.write_str(text)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct InlineSource {
    #[serde(default)]
    pub system: Option<String>,
    #[serde(default)]
    pub records: Vec<Value>,
}

/// Start payload as received.
#[derive(Debug, Clone, Deserialize)]
pub struct MigrationPayload {
    #[serde(default)]
    pub migration_id: Option<String>,
    #[serde(default = "default_true")]
    pub dry_run: bool,
    #[serde(default = "default_repo_root")]
    pub repo_root: PathBuf,
    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,
    #[serde(default = "default_sample")]
    pub sample_verify_count: i64,
    #[serde(default)]
    pub resume_from_checkpoint: Checkpoint,
    #[serde(default)]
    pub source_mode: Option<SourceMode>,
    #[serde(default)]
    pub source: Option<InlineSource>,
    #[serde(default)]
    pub source_path: Option<PathBuf>,
    #[serde(default)]
    pub source_format: Option<String>,
    #[serde(default)]
    pub source_connector: Option<ConnectorSettings>,
    #[serde(default)]
    pub checkpoint_records: Option<Vec<Value>>,
}

fn default_true() -> bool {
    true
}

fn default_repo_root() -> PathBuf {
    PathBuf::from(".")
}

fn default_output_dir() -> PathBuf {
    PathBuf::from(DEFAULT_OUTPUT_DIR)
}

fn default_sample() -> i64 {
    2
}

/// Where extraction reads from, after validation.
#[derive(Debug, Clone)]
pub enum SourceSpec {
    Inline { system: String, records: Vec<Value> },
    File { path: PathBuf, format: SourceFormat },
    Connector(ConnectorSettings),
}

impl SourceSpec {
    pub fn mode(&self) -> SourceMode {
        match self {
            SourceSpec::Inline { .. } => SourceMode::Inline,
            SourceSpec::File { .. } => SourceMode::File,
            SourceSpec::Connector(_) => SourceMode::Connector,
        }
    }
}

/// Validated, fully-defaulted migration request.
#[derive(Debug, Clone)]
pub struct MigrationPlan {
    pub migration_id: String,
    pub dry_run: bool,
    pub repo_root: PathBuf,
    /// Absolute and inside `repo_root`.
    pub output_dir: PathBuf,
    pub sample_verify_count: usize,
    pub resume_from: Checkpoint,
    pub source: SourceSpec,
    pub checkpoint_records: Option<Vec<Value>>,
}

impl MigrationPlan {
    /// Parse and validate. Any failure is a validation error and no I/O has
    /// happened yet.
    pub fn from_value(value: Value) -> Result<Self> {
        if !value.is_object() {
            return Err(PipelineError::Validation(
                "migration payload must be a JSON object".into(),
            ));
        }
        let payload: MigrationPayload = serde_json::from_value(value)
            .map_err(|e| PipelineError::Validation(e.to_string()))?;
        Self::from_payload(payload)
    }

    pub fn from_payload(payload: MigrationPayload) -> Result<Self> {
        let migration_id = match payload.migration_id {
            Some(id) => {
                validate_migration_id(&id)?;
                id
            }
            None => format!("migration-{}", &Uuid::new_v4().simple().to_string()[..8]),
        };

        let repo_root = absolute_root(&payload.repo_root)?;
        let output_dir = resolve_under(&repo_root, &payload.output_dir)?;

        let mode = payload.source_mode.unwrap_or(if payload.source_connector.is_some() {
            SourceMode::Connector
        } else if payload.source_path.is_some() {
            SourceMode::File
        } else {
            SourceMode::Inline
        });

        let source = match mode {
            SourceMode::Inline => {
                let inline = payload.source.unwrap_or(InlineSource {
                    system: None,
                    records: default_inline_records(),
                });
                SourceSpec::Inline {
                    system: inline.system.unwrap_or_else(|| DEFAULT_SYSTEM.to_string()),
                    records: inline.records,
                }
            }
            SourceMode::File => {
                let relative = payload.source_path.ok_or_else(|| {
                    PipelineError::Validation("file mode requires source_path".into())
                })?;
                let path = resolve_under(&repo_root, &relative)?;
                let format = SourceFormat::resolve(payload.source_format.as_deref(), &path)?;
                SourceSpec::File { path, format }
            }
            SourceMode::Connector => {
                let mut settings = payload.source_connector.unwrap_or_default();
                settings.timeout_seconds = settings.timeout_seconds.max(1);
                if settings.token_env.trim().is_empty() {
                    return Err(PipelineError::Validation(
                        "source_connector.token_env must name a variable".into(),
                    ));
                }
                SourceSpec::Connector(settings)
            }
        };

        Ok(Self {
            migration_id,
            dry_run: payload.dry_run,
            repo_root,
            output_dir,
            sample_verify_count: payload.sample_verify_count.clamp(1, MAX_SAMPLE as i64) as usize,
            resume_from: payload.resume_from_checkpoint,
            source,
            checkpoint_records: payload.checkpoint_records,
        })
    }

    pub fn report_file_name(&self) -> String {
        format!("migration-report-{}.json", self.migration_id)
    }
}

fn validate_migration_id(id: &str) -> Result<()> {
    let ok = !id.is_empty()
        && id.len() <= 128
        && id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
        && !id.starts_with('.');
    if ok {
        Ok(())
    } else {
        Err(PipelineError::Validation(format!(
            "migration_id {id:?} must use letters, digits, '-', '_' or '.'"
        )))
    }
}
