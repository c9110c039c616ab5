use crate::context::SchedulerContext;
use crate::dispatch::TriggerDispatcher;
use crate::job::{ring_slot, Job, MisfirePolicy, TriggerKind};
use crate::ring::until_next_second;
use crate::scheduler::ShutdownMode;

use std::sync::atomic::Ordering as AtomicOrdering;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use tokio::sync::watch;
use tokio::time::sleep;
use tracing::{debug, info, warn};

/// Cadence and cluster-coordination parameters of the schedule loop.
#[derive(Debug, Clone)]
pub struct ScanConfig {
  /// Name under which cluster leadership is contended.
  pub lock_name: String,
  /// How long one try-lock attempt may wait before the cycle is skipped.
  pub lock_timeout: Duration,
  /// Pre-read horizon: jobs due within this window are ring-scheduled.
  pub pre_read_window: Duration,
  /// Overdue beyond this applies the job's misfire policy.
  pub misfire_threshold: Duration,
  /// Batch size of one due query.
  pub pre_read_count: usize,
}

impl Default for ScanConfig {
  fn default() -> Self {
    let window = Duration::from_secs(5);
    Self {
      lock_name: "cronwheel:schedule".to_string(),
      lock_timeout: Duration::from_millis(500),
      pre_read_window: window,
      misfire_threshold: window,
      pre_read_count: 800,
    }
  }
}

/// What a single scan cycle did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleOutcome {
  /// Another node holds the lock (or the lock backend failed); nothing ran.
  Skipped,
  /// Leadership held, nothing due.
  Idle,
  /// Leadership held, this many jobs scanned.
  Scanned(usize),
}

/// The leader-elected periodic scan: reads due jobs, applies misfire
/// policy, fires overdue jobs, feeds near-term jobs to the time ring, and
/// persists each job's advanced schedule.
///
/// One instance runs per engine; cycles are strictly sequential, so they
/// can never overlap within a node, and the distributed lock serializes
/// them across nodes.
pub struct ScanLoop {
  ctx: Arc<SchedulerContext>,
  dispatcher: Arc<TriggerDispatcher>,
  config: ScanConfig,
}

impl ScanLoop {
  pub fn new(
    ctx: Arc<SchedulerContext>,
    dispatcher: Arc<TriggerDispatcher>,
    config: ScanConfig,
  ) -> Self {
    Self {
      ctx,
      dispatcher,
      config,
    }
  }

  pub(crate) async fn run(self, mut shutdown_rx: watch::Receiver<Option<ShutdownMode>>) {
    info!(
      lock = %self.config.lock_name,
      window_ms = self.config.pre_read_window.as_millis() as u64,
      batch = self.config.pre_read_count,
      "Schedule loop started."
    );

    loop {
      if shutdown_rx.borrow().is_some() {
        break;
      }

      let outcome = self.run_cycle().await;

      // Second-aligned cadence; an idle leader backs off to the window
      // boundary instead of re-querying the store every second.
      let pause = match outcome {
        CycleOutcome::Idle => self.config.pre_read_window.saturating_sub(
          Duration::from_secs(1).saturating_sub(until_next_second()),
        ),
        _ => until_next_second(),
      };

      tokio::select! {
        biased;

        Ok(()) = shutdown_rx.changed() => {
          if shutdown_rx.borrow().is_some() {
            break;
          }
        }

        _ = sleep(pause) => {}
      }
    }

    info!("Schedule loop stopped.");
  }

  /// One complete cycle: try-lock, scan, unconditional unlock.
  ///
  /// Public so embedders (and tests) can drive cycles manually instead of
  /// running the background loop.
  pub async fn run_cycle(&self) -> CycleOutcome {
    match self
      .ctx
      .lock
      .try_lock(&self.config.lock_name, self.config.lock_timeout)
      .await
    {
      Ok(true) => {}
      Ok(false) => {
        self
          .ctx
          .metrics
          .cycles_skipped_lock
          .fetch_add(1, AtomicOrdering::Relaxed);
        debug!("Cycle skipped; another node is scheduling.");
        return CycleOutcome::Skipped;
      }
      Err(e) => {
        warn!(error = %e, "Lock backend failed; cycle skipped.");
        return CycleOutcome::Skipped;
      }
    }

    // scan_batch is infallible (per-job failures are contained inside), so
    // the unlock below runs on every path out of the critical section.
    let outcome = self.scan_batch().await;

    if let Err(e) = self.ctx.lock.unlock(&self.config.lock_name).await {
      warn!(error = %e, "Unlock failed; lease will expire on its own.");
    }
    outcome
  }

  async fn scan_batch(&self) -> CycleOutcome {
    let now = Utc::now();
    let window = ChronoDuration::from_std(self.config.pre_read_window)
      .unwrap_or_else(|_| ChronoDuration::seconds(5));
    let due_before = now + window;

    let batch = match self
      .ctx
      .store
      .query_due(due_before, self.config.pre_read_count)
      .await
    {
      Ok(batch) => batch,
      Err(e) => {
        warn!(error = %e, "Due query failed; retrying next cycle.");
        self
          .ctx
          .metrics
          .cycles_total
          .fetch_add(1, AtomicOrdering::Relaxed);
        return CycleOutcome::Scanned(0);
      }
    };

    self
      .ctx
      .metrics
      .cycles_total
      .fetch_add(1, AtomicOrdering::Relaxed);

    if batch.is_empty() {
      self
        .ctx
        .metrics
        .cycles_idle
        .fetch_add(1, AtomicOrdering::Relaxed);
      return CycleOutcome::Idle;
    }

    let scanned = batch.len();
    for mut job in batch {
      self.schedule_one(&mut job, now).await;
      // Persist progress even when scheduling the job hit a snag; the
      // advanced next-trigger-time is what prevents a replay storm.
      if let Err(e) = self.ctx.store.update_schedule(&job).await {
        warn!(job_id = job.id, error = %e, "Failed to persist job schedule.");
      }
      self
        .ctx
        .metrics
        .jobs_scanned
        .fetch_add(1, AtomicOrdering::Relaxed);
    }

    CycleOutcome::Scanned(scanned)
  }

  /// Applies the three pre-read branches to one job. Never propagates: a
  /// single job's failure must not abort its siblings in the batch.
  async fn schedule_one(&self, job: &mut Job, now: DateTime<Utc>) {
    let Some(next) = job.next_trigger_at else {
      // Due query should not have returned it; advance defensively.
      job.refresh_next(now);
      return;
    };
    let threshold = ChronoDuration::from_std(self.config.misfire_threshold)
      .unwrap_or_else(|_| ChronoDuration::seconds(5));
    let window = ChronoDuration::from_std(self.config.pre_read_window)
      .unwrap_or_else(|_| ChronoDuration::seconds(5));

    if now > next + threshold {
      // Overdue beyond the threshold: the fire instant is gone; the policy
      // decides whether it is compensated.
      warn!(job_id = job.id, scheduled = %next, "Trigger misfired past threshold.");
      match job.misfire {
        MisfirePolicy::Skip => {
          self
            .ctx
            .metrics
            .misfires_skipped
            .fetch_add(1, AtomicOrdering::Relaxed);
        }
        MisfirePolicy::FireNow => {
          self
            .ctx
            .metrics
            .misfires_fired
            .fetch_add(1, AtomicOrdering::Relaxed);
          self.submit(job.id, TriggerKind::Misfire).await;
        }
      }
      job.refresh_next(now);
    } else if now > next {
      // Overdue within the threshold: fire immediately.
      self.submit(job.id, TriggerKind::Cron).await;
      job.refresh_next(now);

      // The fresh next instant may itself land inside the window; ring it
      // now rather than waiting for the next due query.
      if job.is_enabled() {
        if let Some(new_next) = job.next_trigger_at {
          if new_next <= now + window {
            self.push_ring(job.id, new_next);
            job.refresh_next(new_next);
          }
        }
      }
    } else {
      // Due within the window: hand to the ring at its fire second.
      self.push_ring(job.id, next);
      job.refresh_next(next);
    }
  }

  fn push_ring(&self, job_id: i64, at: DateTime<Utc>) {
    let slot = ring_slot(at);
    self.ctx.ring.push(slot, job_id);
    self
      .ctx
      .metrics
      .ring_pushed
      .fetch_add(1, AtomicOrdering::Relaxed);
    debug!(job_id, slot, fire_at = %at, "Job pushed to ring.");
  }

  async fn submit(&self, job_id: i64, kind: TriggerKind) {
    if let Err(e) = self.dispatcher.submit(job_id, kind).await {
      // Already recorded as a Discarded trigger by the dispatcher.
      debug!(job_id, error = %e, "Scan trigger submission rejected.");
    }
  }
}
