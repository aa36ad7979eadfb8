use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::Mutex;

use super::record::TransformedRecord;
use crate::error::Result;

/// Destination system for loaded records.
///
/// Loads run inside retried activities, so an attempt that timed out after
/// its write landed is attempted again. Implementations must tolerate the
/// same record arriving more than once.
#[async_trait]
pub trait LoadTarget: Send + Sync {
    async fn load(&self, record: &TransformedRecord) -> Result<()>;
}

/// One JSON line per record, keyed by `target_id`.
///
/// Loading a record whose `target_id` is already present replaces its line.
/// The file is rewritten through a temporary sibling and renamed into place.
pub struct JsonlTarget {
    path: PathBuf,
    rows: Mutex<Option<Vec<(String, String)>>>,
}

impl JsonlTarget {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            rows: Mutex::new(None),
        }
    }
}

#[async_trait]
impl LoadTarget for JsonlTarget {
    async fn load(&self, record: &TransformedRecord) -> Result<()> {
        let line = serde_json::to_string(record)?;

        let mut guard = self.rows.lock().await;
        if guard.is_none() {
            *guard = Some(read_existing(&self.path).await?);
        }
        let rows = guard.get_or_insert_with(Vec::new);
        match rows.iter_mut().find(|(id, _)| *id == record.target_id) {
            Some(row) => row.1 = line,
            None => rows.push((record.target_id.clone(), line)),
        }

        let mut contents = String::new();
        for (_, row) in rows.iter() {
            contents.push_str(row);
            contents.push('\n');
        }
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let staging = self.path.with_extension("jsonl.tmp");
        tokio::fs::write(&staging, contents).await?;
        tokio::fs::rename(&staging, &self.path).await?;
        Ok(())
    }
}

// Rows already on disk from an earlier run of the same migration.
async fn read_existing(path: &Path) -> Result<Vec<(String, String)>> {
    let contents = match tokio::fs::read_to_string(path).await {
        Ok(contents) => contents,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(err) => return Err(err.into()),
    };
    let mut rows = Vec::new();
    for line in contents.lines().filter(|l| !l.trim().is_empty()) {
        let value: Value = serde_json::from_str(line)?;
        let id = value
            .get("target_id")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        rows.push((id, line.to_string()));
    }
    Ok(rows)
}
