//! JSON Lines reader for complaint records
//!
//! One object per line with `issue_type`, `complaint_text`, `attachments` and
//! an optional `priority_label`. Blank lines are skipped; every error names
//! the 1-based line it came from.

use crate::error::{AppError, Result};
use crate::models::{ComplaintRecord, Priority};
use serde::Deserialize;
use serde_json::Value;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;
use std::str::FromStr;
use tracing::info;

#[derive(Debug, Deserialize)]
struct RawRecord {
    issue_type: String,
    complaint_text: String,
    attachments: Value,
    #[serde(default)]
    priority_label: Option<String>,
}

impl RawRecord {
    fn into_record(self) -> Result<ComplaintRecord> {
        let attachments = match &self.attachments {
            Value::Number(n) => n.as_i64().ok_or_else(|| {
                AppError::InvalidInput(format!(
                    "attachments must be a non-negative integer, got {}",
                    n
                ))
            })?,
            Value::String(s) => ComplaintRecord::parse_attachments(s)?,
            other => {
                return Err(AppError::InvalidInput(format!(
                    "attachments must be a non-negative integer, got {}",
                    other
                )))
            }
        };

        match self.priority_label {
            Some(label) => {
                let priority = Priority::from_str(label.trim()).map_err(|_| {
                    AppError::InvalidInput(format!("unknown priority label {:?}", label))
                })?;
                ComplaintRecord::labeled(self.issue_type, self.complaint_text, attachments, priority)
            }
            None => ComplaintRecord::new(self.issue_type, self.complaint_text, attachments),
        }
    }
}

fn at_line(line: usize, err: AppError) -> AppError {
    match err {
        AppError::InvalidInput(msg) => AppError::InvalidInput(format!("line {}: {}", line, msg)),
        AppError::Serialization(msg) => AppError::Serialization(format!("line {}: {}", line, msg)),
        other => other,
    }
}

/// Parse records from any buffered reader
pub fn read_records<R: BufRead>(reader: R) -> Result<Vec<ComplaintRecord>> {
    let mut records = Vec::new();
    for (idx, line) in reader.lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let raw: RawRecord = serde_json::from_str(&line).map_err(|e| at_line(idx + 1, e.into()))?;
        records.push(raw.into_record().map_err(|e| at_line(idx + 1, e))?);
    }
    Ok(records)
}

pub fn load_records(path: &Path) -> Result<Vec<ComplaintRecord>> {
    let file = File::open(path)?;
    let records = read_records(BufReader::new(file))?;
    info!(path = %path.display(), records = records.len(), "Loaded complaint records");
    Ok(records)
}
