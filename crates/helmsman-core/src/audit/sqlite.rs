//! SQLite-backed audit store.

use super::{AuditQuery, DecisionRecord, DecisionType};
use crate::error::AuditError;
use chrono::{DateTime, Utc};
use log::info;
use parking_lot::Mutex;
use rusqlite::types::Value as SqlValue;
use rusqlite::{Connection, params, params_from_iter};
use std::path::Path;
use uuid::Uuid;

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS decisions (
    seq INTEGER PRIMARY KEY AUTOINCREMENT,
    id TEXT NOT NULL UNIQUE,
    ts_nanos INTEGER NOT NULL,
    trace_id TEXT NOT NULL,
    decision_type TEXT NOT NULL,
    stage TEXT NOT NULL,
    target TEXT NOT NULL,
    reason TEXT NOT NULL,
    alternatives TEXT NOT NULL,
    confidence REAL NOT NULL,
    metadata TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_decisions_trace ON decisions(trace_id, ts_nanos);
CREATE INDEX IF NOT EXISTS idx_decisions_ts ON decisions(ts_nanos);
"#;

/// Transactional audit store; each append commits before returning.
pub struct SqliteAuditStore {
    conn: Mutex<Connection>,
}

struct DecisionRow {
    id: String,
    ts_nanos: i64,
    trace_id: String,
    decision_type: String,
    stage: String,
    target: String,
    reason: String,
    alternatives: String,
    confidence: f64,
    metadata: String,
}

impl SqliteAuditStore {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, AuditError> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path)?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "synchronous", "FULL")?;
        conn.execute_batch(SCHEMA)?;
        info!("initialized SQLite audit store (path={})", path.display());
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// In-memory database, mainly for tests.
    pub fn open_in_memory() -> Result<Self, AuditError> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    pub(super) fn append(&self, record: &DecisionRecord) -> Result<(), AuditError> {
        let ts_nanos = record.timestamp.timestamp_nanos_opt().ok_or_else(|| {
            AuditError::Corrupt(format!("timestamp out of range: {}", record.timestamp))
        })?;
        let alternatives = serde_json::to_string(&record.alternatives)?;
        let metadata = serde_json::to_string(&record.metadata)?;

        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        tx.execute(
            "INSERT INTO decisions (id, ts_nanos, trace_id, decision_type, stage, target, reason, alternatives, confidence, metadata)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
            params![
                record.id.to_string(),
                ts_nanos,
                record.trace_id,
                record.decision_type.as_str(),
                record.stage,
                record.target,
                record.reason,
                alternatives,
                record.confidence,
                metadata,
            ],
        )?;
        tx.commit()?;
        Ok(())
    }

    pub(super) fn latest_timestamp(&self) -> Result<Option<DateTime<Utc>>, AuditError> {
        let conn = self.conn.lock();
        let latest: Option<i64> =
            conn.query_row("SELECT MAX(ts_nanos) FROM decisions", [], |row| row.get(0))?;
        Ok(latest.map(DateTime::from_timestamp_nanos))
    }

    pub(super) fn query(&self, query: &AuditQuery) -> Result<Vec<DecisionRecord>, AuditError> {
        let mut sql = String::from(
            "SELECT id, ts_nanos, trace_id, decision_type, stage, target, reason, alternatives, confidence, metadata
             FROM decisions WHERE 1 = 1",
        );
        let mut values: Vec<SqlValue> = Vec::new();
        if let Some(trace_id) = &query.trace_id {
            sql.push_str(" AND trace_id = ?");
            values.push(SqlValue::Text(trace_id.clone()));
        }
        if let Some(kind) = query.decision_type {
            sql.push_str(" AND decision_type = ?");
            values.push(SqlValue::Text(kind.as_str().to_string()));
        }
        if let Some(since) = query.since {
            sql.push_str(" AND ts_nanos >= ?");
            values.push(SqlValue::Integer(saturating_nanos(since)));
        }
        if let Some(until) = query.until {
            sql.push_str(" AND ts_nanos <= ?");
            values.push(SqlValue::Integer(saturating_nanos(until)));
        }
        sql.push_str(" ORDER BY ts_nanos ASC, seq ASC");

        let conn = self.conn.lock();
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt
            .query_map(params_from_iter(values.iter()), |row| {
                Ok(DecisionRow {
                    id: row.get(0)?,
                    ts_nanos: row.get(1)?,
                    trace_id: row.get(2)?,
                    decision_type: row.get(3)?,
                    stage: row.get(4)?,
                    target: row.get(5)?,
                    reason: row.get(6)?,
                    alternatives: row.get(7)?,
                    confidence: row.get(8)?,
                    metadata: row.get(9)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;

        rows.into_iter().map(decode_row).collect()
    }
}

/// Nanoseconds since the epoch, pinned to the i64 range for bounds that
/// cannot be represented.
fn saturating_nanos(ts: DateTime<Utc>) -> i64 {
    ts.timestamp_nanos_opt().unwrap_or(if ts.timestamp() < 0 {
        i64::MIN
    } else {
        i64::MAX
    })
}

fn decode_row(row: DecisionRow) -> Result<DecisionRecord, AuditError> {
    let id = Uuid::parse_str(&row.id)
        .map_err(|err| AuditError::Corrupt(format!("bad id `{}`: {err}", row.id)))?;
    Ok(DecisionRecord {
        id,
        timestamp: DateTime::from_timestamp_nanos(row.ts_nanos),
        trace_id: row.trace_id,
        decision_type: row.decision_type.parse::<DecisionType>()?,
        stage: row.stage,
        target: row.target,
        reason: row.reason,
        alternatives: serde_json::from_str(&row.alternatives)?,
        confidence: row.confidence,
        metadata: serde_json::from_str(&row.metadata)?,
    })
}
