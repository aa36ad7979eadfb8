//! Inline and file-backed record sources.

use std::path::Path;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};

use crate::error::{PipelineError, Result};

pub const DEFAULT_SYSTEM: &str = "mendix_stub";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceMode {
    Inline,
    File,
    Connector,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceFormat {
    Json,
    Csv,
}

impl SourceFormat {
    /// Explicit format wins; otherwise the file extension decides.
    pub fn resolve(explicit: Option<&str>, path: &Path) -> Result<Self> {
        let name = match explicit {
            Some(format) => format.trim().to_ascii_lowercase(),
            None => path
                .extension()
                .and_then(|e| e.to_str())
                .map(str::to_ascii_lowercase)
                .unwrap_or_default(),
        };
        match name.as_str() {
            "json" => Ok(SourceFormat::Json),
            "csv" => Ok(SourceFormat::Csv),
            "" => Err(PipelineError::UnsupportedFormat(format!(
                "cannot infer format of {}",
                path.display()
            ))),
            other => Err(PipelineError::UnsupportedFormat(other.to_string())),
        }
    }
}

/// Records used when an inline run supplies none.
pub fn default_inline_records() -> Vec<Value> {
    vec![
        json!({
            "source_id": "mx-001",
            "full_name": "Alex Rivera",
            "email": "alex.rivera@example.com",
            "created_at": "2026-01-15T10:00:00Z",
            "active": true,
        }),
        json!({
            "source_id": "mx-002",
            "full_name": "Sam Jordan",
            "email": "sam.jordan@example.com",
            "created_at": "2026-01-20T12:30:00Z",
            "active": true,
        }),
    ]
}

/// Records reused when resuming past extract without `checkpoint_records`.
pub fn default_checkpoint_records() -> Vec<Value> {
    let mut records = default_inline_records();
    records.push(json!({
        "source_id": "mx-003",
        "full_name": "Taylor Morgan",
        "email": "taylor.morgan@example.com",
        "created_at": "2026-01-25T08:15:00Z",
        "active": true,
    }));
    records
}

/// Read raw rows from a JSON or CSV file.
pub async fn read_file(path: &Path, format: SourceFormat) -> Result<Vec<Value>> {
    let contents = tokio::fs::read_to_string(path).await?;
    match format {
        SourceFormat::Json => parse_json(&contents),
        SourceFormat::Csv => parse_csv(&contents),
    }
}

fn parse_json(contents: &str) -> Result<Vec<Value>> {
    match serde_json::from_str::<Value>(contents)? {
        Value::Array(rows) => Ok(rows),
        Value::Object(mut obj) => match obj.remove("records") {
            Some(Value::Array(rows)) => Ok(rows),
            _ => Err(PipelineError::Validation(
                "JSON source object must carry a records array".into(),
            )),
        },
        _ => Err(PipelineError::Validation(
            "JSON source must be an array or an object with records".into(),
        )),
    }
}

fn parse_csv(contents: &str) -> Result<Vec<Value>> {
    let mut reader = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .from_reader(contents.as_bytes());
    let headers = reader.headers()?.clone();
    let mut rows = Vec::new();
    for row in reader.records() {
        let row = row?;
        let obj: Map<String, Value> = headers
            .iter()
            .zip(row.iter())
            .map(|(key, value)| (key.to_string(), Value::String(value.to_string())))
            .collect();
        rows.push(Value::Object(obj));
    }
    Ok(rows)
}
