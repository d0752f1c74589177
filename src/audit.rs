//! Audit trail
//!
//! Structured, append-only record of every cycle attempt and halt transition.
//! Writing is fire-and-forget from the loop's point of view: a failed append
//! is reported to the caller (who records it as an io health failure) and
//! never retried inline.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::fs::{File, OpenOptions};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::info;

use crate::clock::Clock;
use crate::domain::{CycleId, CycleRecord, HaltStatus};
use crate::error::Result;

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum AuditEntry {
    Cycle {
        #[serde(flatten)]
        record: CycleRecord,
    },
    HaltTransition {
        cycle_id: Option<CycleId>,
        from: HaltStatus,
        to: HaltStatus,
        reason: Option<String>,
    },
    Flatten {
        cycle_id: Option<CycleId>,
        ok: bool,
        detail: String,
    },
    /// A tick that never got a cycle id
    CycleNotStarted {
        at: DateTime<Utc>,
        error: String,
    },
}

impl AuditEntry {
    pub fn kind(&self) -> &'static str {
        match self {
            AuditEntry::Cycle { .. } => "cycle",
            AuditEntry::HaltTransition { .. } => "halt_transition",
            AuditEntry::Flatten { .. } => "flatten",
            AuditEntry::CycleNotStarted { .. } => "cycle_not_started",
        }
    }
}

#[derive(Serialize)]
struct AuditLine<'a> {
    ts: DateTime<Utc>,
    #[serde(flatten)]
    entry: &'a AuditEntry,
}

#[async_trait]
pub trait AuditSink: Send + Sync {
    async fn append(&self, entry: &AuditEntry) -> Result<()>;
}

/// Emits audit entries as structured log events only
#[derive(Debug, Default)]
pub struct TracingAuditSink;

#[async_trait]
impl AuditSink for TracingAuditSink {
    async fn append(&self, entry: &AuditEntry) -> Result<()> {
        let line = serde_json::to_string(entry)?;
        info!(target: "warden::audit", kind = entry.kind(), entry = %line, "audit");
        Ok(())
    }
}

/// One JSON object per line, appended to a file. Lines are stamped with
/// the orchestrator's clock.
pub struct JsonlAuditSink {
    path: PathBuf,
    file: Mutex<Option<File>>,
    clock: Arc<dyn Clock>,
}

impl JsonlAuditSink {
    pub fn new(path: impl AsRef<Path>, clock: Arc<dyn Clock>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            file: Mutex::new(None),
            clock,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn open(&self) -> Result<File> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await?;
        Ok(file)
    }
}

#[async_trait]
impl AuditSink for JsonlAuditSink {
    async fn append(&self, entry: &AuditEntry) -> Result<()> {
        let mut line = serde_json::to_string(&AuditLine {
            ts: self.clock.now(),
            entry,
        })?;
        line.push('\n');

        let mut guard = self.file.lock().await;
        if guard.is_none() {
            *guard = Some(self.open().await?);
        }
        if let Some(file) = guard.as_mut() {
            let written = async {
                file.write_all(line.as_bytes()).await?;
                file.flush().await
            }
            .await;
            if let Err(e) = written {
                // Reopen on the next append.
                *guard = None;
                return Err(e.into());
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::domain::CycleId;
    use chrono::TimeZone;
    use uuid::Uuid;

    fn clock() -> Arc<ManualClock> {
        Arc::new(ManualClock::new(
            Utc.with_ymd_and_hms(2024, 3, 4, 15, 0, 0).unwrap(),
        ))
    }

    #[tokio::test]
    async fn test_jsonl_sink_appends_lines() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("audit.jsonl");
        let clock = clock();
        let sink = JsonlAuditSink::new(&path, clock.clone());

        let started = clock.now();
        let mut record = CycleRecord::start(CycleId(1), Uuid::new_v4(), started);
        record.finish(started);
        tokio_test::assert_ok!(sink.append(&AuditEntry::Cycle { record }).await);
        sink.append(&AuditEntry::HaltTransition {
            cycle_id: Some(CycleId(1)),
            from: HaltStatus::Running,
            to: HaltStatus::Halted,
            reason: Some("manual halt: ops".into()),
        })
        .await
        .unwrap();
        clock.advance(chrono::Duration::seconds(5));
        sink.append(&AuditEntry::CycleNotStarted {
            at: clock.now(),
            error: "state store error: database is locked".into(),
        })
        .await
        .unwrap();

        let contents = tokio::fs::read_to_string(&path).await.unwrap();
        let lines: Vec<serde_json::Value> = contents
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect();
        assert_eq!(lines.len(), 3);
        assert_eq!(lines[0]["event"], "cycle");
        assert_eq!(lines[0]["cycle_id"], 1);
        assert_eq!(lines[1]["event"], "halt_transition");
        assert_eq!(lines[1]["to"], "HALTED");
        assert_eq!(lines[2]["event"], "cycle_not_started");

        // Stamped by the injected clock, not wall time
        let ts = |line: &serde_json::Value| {
            line["ts"]
                .as_str()
                .unwrap()
                .parse::<DateTime<Utc>>()
                .unwrap()
        };
        assert_eq!(ts(&lines[0]), started);
        assert_eq!(ts(&lines[1]), started);
        assert_eq!(ts(&lines[2]), started + chrono::Duration::seconds(5));
    }

    #[tokio::test]
    async fn test_unwritable_path_reports_error() {
        let dir = tempfile::tempdir().unwrap();
        // A directory where the file should be
        let sink = JsonlAuditSink::new(dir.path(), clock());
        let entry = AuditEntry::Flatten {
            cycle_id: None,
            ok: true,
            detail: "nothing to close".into(),
        };
        tokio_test::assert_err!(sink.append(&entry).await);
    }
}
