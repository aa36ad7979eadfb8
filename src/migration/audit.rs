//! Per-record audit trail through transform and load.
//!
//! Rows are addressed by extraction index, so the trail keeps extraction
//! order no matter which records fail or in what order work completes.

use serde::{Deserialize, Serialize};

use super::record::SourceRecord;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransformStatus {
    Pending,
    Success,
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LoadStatus {
    Pending,
    Loaded,
    DryRunSkipped,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditRow {
    pub source_identifier: String,
    pub transform_status: TransformStatus,
    pub load_status: LoadStatus,
    pub error: Option<String>,
}

/// Outcome of loading one record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoadResult {
    pub source_identifier: String,
    pub target_id: String,
    pub status: LoadStatus,
    pub write_performed: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct RecordAudit {
    rows: Vec<AuditRow>,
}

impl RecordAudit {
    /// One pending row per record.
    pub fn new(records: &[SourceRecord]) -> Self {
        let rows = records
            .iter()
            .map(|r| AuditRow {
                source_identifier: r.source_identifier.clone(),
                transform_status: TransformStatus::Pending,
                load_status: LoadStatus::Pending,
                error: None,
            })
            .collect();
        Self { rows }
    }

    pub fn mark_transform(&mut self, index: usize, outcome: Result<(), String>) {
        if let Some(row) = self.rows.get_mut(index) {
            match outcome {
                Ok(()) => row.transform_status = TransformStatus::Success,
                Err(message) => {
                    row.transform_status = TransformStatus::Failed;
                    row.error = Some(message);
                }
            }
        }
    }

    pub fn mark_load(&mut self, index: usize, result: &LoadResult) {
        if let Some(row) = self.rows.get_mut(index) {
            row.load_status = result.status;
            if let Some(message) = &result.error {
                row.error = Some(message.clone());
            }
        }
    }

    pub fn rows(&self) -> &[AuditRow] {
        &self.rows
    }

    pub fn into_rows(self) -> Vec<AuditRow> {
        self.rows
    }

    pub fn count_transform(&self, status: TransformStatus) -> usize {
        self.rows
            .iter()
            .filter(|r| r.transform_status == status)
            .count()
    }

    pub fn count_load(&self, status: LoadStatus) -> usize {
        self.rows.iter().filter(|r| r.load_status == status).count()
    }
}
