//! Wire Protocol Module
//!
//! Payload shapes for the remote sheet API and the row-parsing helpers
//! shared by the snapshot, changes and CSV paths.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use crate::error::{Result, SyncError};

// == Snapshot Response ==
/// Full dataset fetch: `GET <base>?action=snapshot&sheet=<name>`.
#[derive(Debug, Clone, Deserialize)]
pub struct SnapshotResponse {
    /// The change id this snapshot represents
    pub version: u64,
    /// Raw sheet rows, transformed into typed records by the caller
    pub rows: Vec<Value>,
}

// == Change Operations ==
/// One incremental mutation against a cached dataset.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChangeOp {
    pub op: ChangeKind,
    /// Record id the operation applies to
    pub id: String,
    /// Row payload for add/update, absent for remove
    #[serde(default)]
    pub row: Option<Value>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeKind {
    Add,
    Update,
    Remove,
}

// == Changes Response ==
/// Incremental fetch: `GET <base>?action=changes&sheet=<name>&since=<v>`.
///
/// The server either returns a change set or signals that `since` is too
/// old to diff against, in which case the caller must take a fresh
/// snapshot.
#[derive(Debug, Clone)]
pub enum ChangesOutcome {
    Changes(ChangeSet),
    ReloadRequired,
}

#[derive(Debug, Clone)]
pub struct ChangeSet {
    pub version: u64,
    pub changes: Vec<ChangeOp>,
}

#[derive(Debug, Deserialize)]
struct RawChangesResponse {
    #[serde(default)]
    version: Option<u64>,
    #[serde(default)]
    changes: Option<Vec<ChangeOp>>,
    #[serde(default, alias = "reloadRequired")]
    reload_required: bool,
}

impl ChangesOutcome {
    /// Interprets a changes response body.
    pub fn from_value(value: Value) -> Result<Self> {
        let raw: RawChangesResponse = serde_json::from_value(value)?;

        if raw.reload_required {
            return Ok(ChangesOutcome::ReloadRequired);
        }
        match (raw.version, raw.changes) {
            (Some(version), Some(changes)) => {
                Ok(ChangesOutcome::Changes(ChangeSet { version, changes }))
            }
            _ => Err(SyncError::Protocol(
                "changes response carries neither a change set nor a reload signal".to_string(),
            )),
        }
    }
}

// == Row Parsing ==
/// Transforms raw sheet rows into typed records.
///
/// Malformed rows are skipped rather than failing the whole dataset; sheet
/// data is entered by hand and a single bad row must not block a sync.
pub fn parse_rows<T: DeserializeOwned>(rows: Vec<Value>) -> Vec<T> {
    let total = rows.len();
    let parsed: Vec<T> = rows
        .into_iter()
        .filter_map(|row| serde_json::from_value(row).ok())
        .collect();

    if parsed.len() < total {
        debug!("Skipped {} of {} malformed sheet rows", total - parsed.len(), total);
    }
    parsed
}

// == CSV Fallback ==
/// Parses a CSV export into the same raw-row shape the JSON API returns.
///
/// The first record is the header row. Cells that parse as numbers become
/// JSON numbers so the typed row shapes deserialize the same way on both
/// paths.
pub fn parse_csv(text: &str) -> Result<Vec<Value>> {
    let mut reader = csv::Reader::from_reader(text.as_bytes());
    let headers: Vec<String> = reader
        .headers()?
        .iter()
        .map(|h| h.trim().to_string())
        .collect();
    if headers.is_empty() {
        return Err(SyncError::Protocol("CSV export has no header row".to_string()));
    }

    let mut rows = Vec::new();
    for record in reader.records() {
        let record = record?;
        let mut row = serde_json::Map::new();
        for (header, cell) in headers.iter().zip(record.iter()) {
            row.insert(header.clone(), cell_to_value(cell));
        }
        rows.push(Value::Object(row));
    }
    Ok(rows)
}

fn cell_to_value(cell: &str) -> Value {
    let trimmed = cell.trim();
    if let Ok(int) = trimmed.parse::<i64>() {
        return Value::from(int);
    }
    if let Ok(float) = trimmed.parse::<f64>() {
        if float.is_finite() {
            return Value::from(float);
        }
    }
    Value::from(trimmed)
}
