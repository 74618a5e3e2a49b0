//! Audit Trail
//!
//! Append-only record of pipeline stage transitions, kept in a bounded
//! in-memory buffer and optionally mirrored to a JSON-lines file.

use crate::error::Result;
use crate::security::{AuditAction, AuditRecord};
use std::collections::VecDeque;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::PathBuf;
use std::sync::Mutex;
use tracing::info;

pub const DEFAULT_IN_MEMORY_RECORDS: usize = 1_000;

pub struct AuditTrail {
    log_file: Option<PathBuf>,
    records: Mutex<VecDeque<AuditRecord>>,
    max_in_memory: usize,
}

impl AuditTrail {
    pub fn new(log_file: Option<PathBuf>, max_in_memory: usize) -> Self {
        Self {
            log_file,
            records: Mutex::new(VecDeque::new()),
            max_in_memory: max_in_memory.max(1),
        }
    }

    /// Append a record. The in-memory copy is kept even if the file write fails.
    pub fn record(&self, record: AuditRecord) -> Result<()> {
        info!(
            "AUDIT: action={} hash={} length={}",
            record.action, record.query_hash, record.query_length
        );

        if let Ok(mut records) = self.records.lock() {
            records.push_back(record.clone());
            while records.len() > self.max_in_memory {
                records.pop_front();
            }
        }

        if let Some(ref log_file) = self.log_file {
            let mut file = OpenOptions::new().create(true).append(true).open(log_file)?;
            let json = serde_json::to_string(&record)?;
            writeln!(file, "{}", json)?;
        }

        Ok(())
    }

    /// Most recent last
    pub fn recent(&self, limit: usize) -> Vec<AuditRecord> {
        self.records
            .lock()
            .map(|records| {
                let skip = records.len().saturating_sub(limit);
                records.iter().skip(skip).cloned().collect()
            })
            .unwrap_or_default()
    }

    /// Latest record of `action` tagged with `request_id`
    pub fn find(&self, action: AuditAction, request_id: &str) -> Option<AuditRecord> {
        let records = self.records.lock().ok()?;
        records
            .iter()
            .rev()
            .find(|r| {
                r.action == action
                    && r.metadata.get("request_id").and_then(|v| v.as_str()) == Some(request_id)
            })
            .cloned()
    }

    pub fn count(&self, action: AuditAction) -> usize {
        self.records
            .lock()
            .map(|records| records.iter().filter(|r| r.action == action).count())
            .unwrap_or(0)
    }
}

impl Default for AuditTrail {
    fn default() -> Self {
        Self::new(None, DEFAULT_IN_MEMORY_RECORDS)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bounded_buffer() {
        let trail = AuditTrail::new(None, 2);
        trail.record(AuditRecord::new("SELECT 1", AuditAction::Generated)).unwrap();
        trail.record(AuditRecord::new("SELECT 2", AuditAction::Validated)).unwrap();
        trail.record(AuditRecord::new("SELECT 3", AuditAction::Executed)).unwrap();

        let recent = trail.recent(10);
        assert_eq!(recent.len(), 2);
        assert_eq!(recent[0].action, AuditAction::Validated);
        assert_eq!(recent[1].action, AuditAction::Executed);
        assert_eq!(trail.count(AuditAction::Generated), 0);
    }

    #[test]
    fn test_jsonl_mirror() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("audit.jsonl");
        let trail = AuditTrail::new(Some(path.clone()), 10);
        trail
            .record(AuditRecord::new("SELECT a FROM t", AuditAction::Generated).with_metadata("rank", 1))
            .unwrap();
        trail.record(AuditRecord::new("SELECT a FROM t", AuditAction::Executed)).unwrap();

        let content = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(lines.len(), 2);
        let first: serde_json::Value = serde_json::from_str(lines[0]).unwrap();
        assert_eq!(first["action"], "generated");
        assert_eq!(first["metadata"]["rank"], 1);
    }

    #[test]
    fn test_find_by_request_id() {
        let trail = AuditTrail::default();
        trail
            .record(AuditRecord::new("SELECT a FROM t", AuditAction::Generated).with_metadata("request_id", "r1"))
            .unwrap();
        trail
            .record(AuditRecord::new("SELECT b FROM t", AuditAction::Generated).with_metadata("request_id", "r2"))
            .unwrap();

        let found = trail.find(AuditAction::Generated, "r1").unwrap();
        assert_eq!(found.normalized_preview, "select a from t");
        assert!(trail.find(AuditAction::Executed, "r1").is_none());
        assert!(trail.find(AuditAction::Generated, "r3").is_none());
    }
}
