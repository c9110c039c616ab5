use crate::job::{JobId, LogId, TriggerKind};

use std::sync::atomic::{AtomicI64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::warn;

/// Terminal status of a dispatched trigger.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TriggerStatus {
  Success,
  Failed,
  /// Rejected before dispatch (pool queue full).
  Discarded,
}

/// The finalized half of a trigger record: what happened once the trigger
/// left the scheduler. Written exactly once per record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TriggerOutcome {
  pub status: TriggerStatus,
  /// Target address(es) the router selected; empty when none were chosen.
  pub addresses: Vec<String>,
  pub message: String,
  pub elapsed: Duration,
}

impl TriggerOutcome {
  pub fn success(addresses: Vec<String>, message: impl Into<String>, elapsed: Duration) -> Self {
    Self {
      status: TriggerStatus::Success,
      addresses,
      message: message.into(),
      elapsed,
    }
  }

  pub fn failed(addresses: Vec<String>, message: impl Into<String>, elapsed: Duration) -> Self {
    Self {
      status: TriggerStatus::Failed,
      addresses,
      message: message.into(),
      elapsed,
    }
  }

  pub fn discarded(message: impl Into<String>) -> Self {
    Self {
      status: TriggerStatus::Discarded,
      addresses: Vec::new(),
      message: message.into(),
      elapsed: Duration::ZERO,
    }
  }
}

/// One trigger of one job: appended when the trigger is dispatched,
/// finalized when the executor result (or a terminal local failure) is
/// known. Never mutated after finalization.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TriggerRecord {
  pub job_id: JobId,
  pub kind: TriggerKind,
  /// Logical trigger time (when the scheduler decided to fire).
  pub trigger_at: DateTime<Utc>,
  pub outcome: Option<TriggerOutcome>,
}

impl TriggerRecord {
  pub fn begin(job_id: JobId, kind: TriggerKind) -> Self {
    Self {
      job_id,
      kind,
      trigger_at: Utc::now(),
      outcome: None,
    }
  }
}

/// Sink for trigger records. Persistence (database, file, ...) is the
/// embedder's concern; the core only appends and finalizes.
#[async_trait]
pub trait JobLogSink: Send + Sync {
  /// Stores a fresh record and returns its assigned id.
  async fn append(&self, record: TriggerRecord) -> LogId;
  /// Completes the record. Implementations must ignore (and may log) a
  /// second finalize for the same id.
  async fn finalize(&self, log_id: LogId, outcome: TriggerOutcome);
}

/// In-memory sink: keeps every record for inspection. The reference
/// implementation used by tests and single-node embeddings.
#[derive(Debug, Default)]
pub struct MemoryLogSink {
  next_id: AtomicI64,
  records: Mutex<Vec<(LogId, TriggerRecord)>>,
}

impl MemoryLogSink {
  pub fn new() -> Self {
    Self::default()
  }

  /// Snapshot of all records appended so far.
  pub fn records(&self) -> Vec<(LogId, TriggerRecord)> {
    self.records.lock().clone()
  }

  /// Finalized records with the given status, in append order.
  pub fn finalized_with(&self, status: TriggerStatus) -> Vec<(LogId, TriggerRecord)> {
    self
      .records
      .lock()
      .iter()
      .filter(|(_, r)| r.outcome.as_ref().map(|o| o.status) == Some(status))
      .cloned()
      .collect()
  }
}

#[async_trait]
impl JobLogSink for MemoryLogSink {
  async fn append(&self, record: TriggerRecord) -> LogId {
    let log_id = self.next_id.fetch_add(1, Ordering::Relaxed) + 1;
    self.records.lock().push((log_id, record));
    log_id
  }

  async fn finalize(&self, log_id: LogId, outcome: TriggerOutcome) {
    let mut records = self.records.lock();
    match records.iter_mut().find(|(id, _)| *id == log_id) {
      Some((_, record)) => {
        if record.outcome.is_some() {
          warn!(log_id, "Trigger record already finalized; ignoring.");
        } else {
          record.outcome = Some(outcome);
        }
      }
      None => warn!(log_id, "Finalize for unknown trigger record."),
    }
  }
}
