//! JSONL-backed audit log.

use super::{AuditQuery, DecisionRecord};
use crate::error::AuditError;
use chrono::{DateTime, Utc};
use log::{info, warn};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};

const SCHEMA_VERSION: u32 = 1;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum AuditLine {
    SchemaVersion { version: u32 },
    Decision(DecisionRecord),
}

/// Append-only audit file; every record is fsynced before `append` returns.
pub struct JsonlAuditLog {
    path: PathBuf,
    /// Serialize write access to the log file.
    write_lock: Mutex<()>,
}

impl JsonlAuditLog {
    /// Open or create the log, writing a schema header to new files.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, AuditError> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        let log = Self {
            path,
            write_lock: Mutex::new(()),
        };
        let is_new = fs::metadata(&log.path).map(|m| m.len() == 0).unwrap_or(true);
        if is_new {
            log.write_line(&AuditLine::SchemaVersion {
                version: SCHEMA_VERSION,
            })?;
        }
        info!("initialized JSONL audit log (path={})", log.path.display());
        Ok(log)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub(super) fn append(&self, record: &DecisionRecord) -> Result<(), AuditError> {
        self.write_line(&AuditLine::Decision(record.clone()))
    }

    fn write_line(&self, line: &AuditLine) -> Result<(), AuditError> {
        let _guard = self.write_lock.lock();
        let encoded = serde_json::to_string(line)?;
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        writeln!(file, "{encoded}")?;
        file.sync_data()?;
        Ok(())
    }

    pub(super) fn latest_timestamp(&self) -> Result<Option<DateTime<Utc>>, AuditError> {
        Ok(self
            .query(&AuditQuery::all())?
            .iter()
            .map(|record| record.timestamp)
            .max())
    }

    pub(super) fn query(&self, query: &AuditQuery) -> Result<Vec<DecisionRecord>, AuditError> {
        let file = match File::open(&self.path) {
            Ok(file) => file,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => return Err(err.into()),
        };
        let lines = BufReader::new(file)
            .lines()
            .collect::<Result<Vec<_>, _>>()?;
        let last = lines.len().saturating_sub(1);

        let mut records = Vec::new();
        for (idx, line) in lines.iter().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<AuditLine>(line) {
                Ok(AuditLine::SchemaVersion { version }) if version > SCHEMA_VERSION => {
                    return Err(AuditError::UnsupportedSchema(version));
                }
                Ok(AuditLine::SchemaVersion { .. }) => {}
                Ok(AuditLine::Decision(record)) => {
                    if query.matches(&record) {
                        records.push(record);
                    }
                }
                // A torn final line is what a crash mid-append leaves behind.
                Err(err) if idx == last => {
                    warn!(
                        "skipping truncated audit line (path={}): {}",
                        self.path.display(),
                        err
                    );
                }
                Err(err) => return Err(err.into()),
            }
        }
        Ok(records)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::DecisionType;
    use pretty_assertions::assert_eq;
    use tempfile::tempdir;

    #[test]
    fn writes_header_once_and_reads_back() {
        let dir = tempdir().expect("tempdir");
        let path = dir.path().join("nested").join("audit.jsonl");
        let log = JsonlAuditLog::open(&path).expect("open");
        let record = DecisionRecord::new("t1", DecisionType::Routing, "route", "w1", "only one");
        log.append(&record).expect("append");
        drop(log);

        let reopened = JsonlAuditLog::open(&path).expect("reopen");
        let contents = fs::read_to_string(&path).expect("read");
        assert_eq!(contents.matches("schema_version").count(), 1);
        assert_eq!(reopened.query(&AuditQuery::all()).expect("query"), vec![record]);
    }

    #[test]
    fn skips_torn_trailing_line() {
        let dir = tempdir().expect("tempdir");
        let path = dir.path().join("audit.jsonl");
        let log = JsonlAuditLog::open(&path).expect("open");
        log.append(&DecisionRecord::new(
            "t1",
            DecisionType::Planning,
            "created",
            "plan",
            "ok",
        ))
        .expect("append");
        let mut file = OpenOptions::new().append(true).open(&path).expect("open");
        write!(file, "{{\"type\":\"decision\",\"id\":").expect("write");

        assert_eq!(log.query(&AuditQuery::all()).expect("query").len(), 1);
    }

    #[test]
    fn rejects_newer_schema() {
        let dir = tempdir().expect("tempdir");
        let path = dir.path().join("audit.jsonl");
        fs::write(&path, "{\"type\":\"schema_version\",\"version\":9}\n").expect("write");
        let log = JsonlAuditLog::open(&path).expect("open");
        match log.query(&AuditQuery::all()) {
            Err(AuditError::UnsupportedSchema(9)) => {}
            other => panic!("unexpected result: {other:?}"),
        }
    }
}
