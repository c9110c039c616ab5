use crate::error::StoreError;
use crate::job::{Job, JobId, JobStatus};

use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;

/// CRUD plus due-job queries over job definitions.
///
/// Persistence is the embedder's concern; the scheduling core only needs
/// these five operations. All of them are invoked from the scan loop or
/// dispatcher workers, never from the ring task.
#[async_trait]
pub trait JobStore: Send + Sync {
  /// Up to `limit` enabled jobs with `next_trigger_at <= due_before`,
  /// ordered by id descending. Paused jobs are never returned.
  async fn query_due(
    &self,
    due_before: DateTime<Utc>,
    limit: usize,
  ) -> Result<Vec<Job>, StoreError>;

  /// Persists the job's scheduling state (`next_trigger_at`,
  /// `last_trigger_at`, `status`).
  async fn update_schedule(&self, job: &Job) -> Result<(), StoreError>;

  async fn load(&self, job_id: JobId) -> Result<Job, StoreError>;

  /// Stores a new definition and returns its assigned id.
  async fn insert(&self, job: Job) -> Result<JobId, StoreError>;

  async fn set_status(&self, job_id: JobId, status: JobStatus) -> Result<(), StoreError>;
}

/// In-memory store. Reference implementation for tests and single-node
/// embeddings; ids are assigned sequentially like a database identity
/// column.
#[derive(Debug, Default)]
pub struct MemoryJobStore {
  next_id: AtomicI64,
  jobs: RwLock<HashMap<JobId, Job>>,
}

impl MemoryJobStore {
  pub fn new() -> Self {
    Self::default()
  }

  /// All definitions, unfiltered. Test/monitoring convenience.
  pub fn all(&self) -> Vec<Job> {
    let mut jobs: Vec<Job> = self.jobs.read().values().cloned().collect();
    jobs.sort_by_key(|j| j.id);
    jobs
  }
}

#[async_trait]
impl JobStore for MemoryJobStore {
  async fn query_due(
    &self,
    due_before: DateTime<Utc>,
    limit: usize,
  ) -> Result<Vec<Job>, StoreError> {
    let jobs = self.jobs.read();
    let mut due: Vec<Job> = jobs
      .values()
      .filter(|j| j.status == JobStatus::Enabled)
      .filter(|j| matches!(j.next_trigger_at, Some(at) if at <= due_before))
      .cloned()
      .collect();
    due.sort_by(|a, b| b.id.cmp(&a.id));
    due.truncate(limit);
    Ok(due)
  }

  async fn update_schedule(&self, job: &Job) -> Result<(), StoreError> {
    let mut jobs = self.jobs.write();
    match jobs.get_mut(&job.id) {
      Some(stored) => {
        stored.next_trigger_at = job.next_trigger_at;
        stored.last_trigger_at = job.last_trigger_at;
        stored.status = job.status;
        Ok(())
      }
      None => Err(StoreError::NotFound(job.id)),
    }
  }

  async fn load(&self, job_id: JobId) -> Result<Job, StoreError> {
    self
      .jobs
      .read()
      .get(&job_id)
      .cloned()
      .ok_or(StoreError::NotFound(job_id))
  }

  async fn insert(&self, mut job: Job) -> Result<JobId, StoreError> {
    let id = self.next_id.fetch_add(1, Ordering::Relaxed) + 1;
    job.id = id;
    if job.next_trigger_at.is_none() && job.status == JobStatus::Enabled {
      job.refresh_next(Utc::now());
    }
    self.jobs.write().insert(id, job);
    Ok(id)
  }

  async fn set_status(&self, job_id: JobId, status: JobStatus) -> Result<(), StoreError> {
    let mut jobs = self.jobs.write();
    let job = jobs.get_mut(&job_id).ok_or(StoreError::NotFound(job_id))?;
    if status == JobStatus::Enabled && job.status == JobStatus::Paused {
      // Resume recomputes from now; stale fire instants must not replay.
      job.refresh_next(Utc::now());
      // refresh_next pauses a spec with no future instants; keep that.
      if job.next_trigger_at.is_some() {
        job.status = JobStatus::Enabled;
      }
    } else {
      job.status = status;
    }
    Ok(())
  }
}
