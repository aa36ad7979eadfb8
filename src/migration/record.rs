use chrono::{DateTime, NaiveDate, NaiveDateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One extracted row after normalisation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceRecord {
    pub source_id: String,
    /// Never empty: falls back to `row-<1-based index>`.
    pub source_identifier: String,
    pub full_name: String,
    pub email: String,
    pub created_at: String,
    pub active: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransformedRecord {
    pub target_id: String,
    pub first_name: String,
    pub last_name: String,
    pub email: String,
    pub created_at: String,
    pub is_active: bool,
}

/// Non-fatal problem found while normalising a row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtractionIssue {
    pub source_identifier: String,
    pub message: String,
}

fn field_text(obj: &serde_json::Map<String, Value>, key: &str) -> String {
    match obj.get(key) {
        Some(Value::String(s)) => s.trim().to_string(),
        Some(Value::Number(n)) => n.to_string(),
        Some(Value::Bool(b)) => b.to_string(),
        _ => String::new(),
    }
}

fn field_flag(obj: &serde_json::Map<String, Value>, key: &str) -> bool {
    match obj.get(key) {
        Some(Value::Bool(b)) => *b,
        Some(Value::Number(n)) => n.as_f64().is_some_and(|v| v != 0.0),
        Some(Value::String(s)) => matches!(
            s.trim().to_ascii_lowercase().as_str(),
            "true" | "1" | "yes" | "y"
        ),
        Some(_) => false,
        None => true,
    }
}

/// Normalise raw row `index` (0-based). A row missing `full_name` or `email`
/// still yields a record, together with one issue naming the missing fields.
pub fn normalize(raw: &Value, index: usize) -> (SourceRecord, Option<ExtractionIssue>) {
    let empty = serde_json::Map::new();
    let obj = raw.as_object().unwrap_or(&empty);

    let source_id = field_text(obj, "source_id");
    let source_identifier = if source_id.is_empty() {
        format!("row-{}", index + 1)
    } else {
        source_id.clone()
    };

    let record = SourceRecord {
        source_id,
        source_identifier,
        full_name: field_text(obj, "full_name"),
        email: field_text(obj, "email").to_lowercase(),
        created_at: field_text(obj, "created_at"),
        active: field_flag(obj, "active"),
    };

    let mut missing = Vec::new();
    if record.full_name.is_empty() {
        missing.push("full_name");
    }
    if record.email.is_empty() {
        missing.push("email");
    }
    let message = if !raw.is_object() {
        Some("row is not an object".to_string())
    } else if missing.is_empty() {
        None
    } else {
        Some(format!("missing required field(s): {}", missing.join(", ")))
    };
    let issue = message.map(|message| ExtractionIssue {
        source_identifier: record.source_identifier.clone(),
        message,
    });

    (record, issue)
}

/// Normalise every row, keeping extraction order.
pub fn normalize_all(raw: &[Value]) -> (Vec<SourceRecord>, Vec<ExtractionIssue>) {
    let mut records = Vec::with_capacity(raw.len());
    let mut issues = Vec::new();
    for (index, row) in raw.iter().enumerate() {
        let (record, issue) = normalize(row, index);
        records.push(record);
        issues.extend(issue);
    }
    (records, issues)
}

/// Normalise a timestamp to RFC 3339 UTC. Empty stays empty.
pub fn normalize_timestamp(value: &str) -> Result<String, String> {
    let value = value.trim();
    if value.is_empty() {
        return Ok(String::new());
    }
    let parsed = DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .or_else(|_| {
            NaiveDateTime::parse_from_str(value, "%Y-%m-%d %H:%M:%S").map(|naive| naive.and_utc())
        })
        .or_else(|_| {
            NaiveDate::parse_from_str(value, "%Y-%m-%d")
                .map(|date| date.and_time(chrono::NaiveTime::MIN).and_utc())
        })
        .map_err(|_| format!("invalid created_at {value:?}"))?;
    Ok(parsed.to_rfc3339_opts(SecondsFormat::Secs, true))
}

/// Derive the target shape. Shared by the transform activity and backfill.
pub fn transform(record: &SourceRecord) -> Result<TransformedRecord, String> {
    let mut tokens = record.full_name.split_whitespace();
    let first_name = tokens.next().unwrap_or_default().to_string();
    let last_name = tokens.collect::<Vec<_>>().join(" ");
    let created_at = normalize_timestamp(&record.created_at)
        .map_err(|e| format!("{}: {e}", record.source_identifier))?;

    Ok(TransformedRecord {
        target_id: record.source_id.clone(),
        first_name,
        last_name,
        email: record.email.clone(),
        created_at,
        is_active: record.active,
    })
}
