use chrono::{DateTime, Utc};
use serde::Serialize;

use super::audit::{AuditRow, LoadResult};
use super::payload::Checkpoint;
use super::record::{ExtractionIssue, TransformedRecord};
use super::source::SourceMode;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MigrationCounts {
    pub extracted: usize,
    pub transformed: usize,
    pub loaded: usize,
    pub skipped: usize,
    pub transform_failed: usize,
    pub load_failed: usize,
}

/// Final migration report, persisted as `migration-report-<id>.json`.
#[derive(Debug, Clone, Serialize)]
pub struct MigrationReport {
    pub migration_id: String,
    pub instance_id: String,
    pub dry_run: bool,
    pub source_mode: SourceMode,
    pub resumed_from: Checkpoint,
    pub counts: MigrationCounts,
    pub extraction_errors: Vec<ExtractionIssue>,
    pub row_count_match: bool,
    pub dry_run_guard_passed: bool,
    pub sample_target_ids: Vec<String>,
    pub transformed_records: Vec<TransformedRecord>,
    pub load_results: Vec<LoadResult>,
    pub audit: Vec<AuditRow>,
    /// Set once the report has been written.
    pub report_path: Option<String>,
    pub generated_at: DateTime<Utc>,
}

/// Result of the validate phase.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Validation {
    pub row_count_match: bool,
    pub dry_run_guard_passed: bool,
    pub sample_target_ids: Vec<String>,
}

/// `sample` is already clamped to 1..=10.
pub fn validate(
    extracted: usize,
    transformed: &[TransformedRecord],
    loaded: usize,
    dry_run: bool,
    sample: usize,
) -> Validation {
    Validation {
        row_count_match: extracted == transformed.len(),
        dry_run_guard_passed: !dry_run || loaded == 0,
        sample_target_ids: transformed
            .iter()
            .take(sample)
            .map(|r| r.target_id.clone())
            .collect(),
    }
}
