use super::{AuditQuery, DecisionRecord};
use chrono::{DateTime, Utc};
use parking_lot::RwLock;

/// Process-local audit log. Contents are lost when the process exits.
#[derive(Default)]
pub struct MemoryAuditLog {
    records: RwLock<Vec<DecisionRecord>>,
}

impl MemoryAuditLog {
    pub fn len(&self) -> usize {
        self.records.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.read().is_empty()
    }

    pub(super) fn append(&self, record: &DecisionRecord) {
        self.records.write().push(record.clone());
    }

    pub(super) fn latest_timestamp(&self) -> Option<DateTime<Utc>> {
        self.records.read().iter().map(|r| r.timestamp).max()
    }

    pub(super) fn query(&self, query: &AuditQuery) -> Vec<DecisionRecord> {
        self.records
            .read()
            .iter()
            .filter(|record| query.matches(record))
            .cloned()
            .collect()
    }
}
