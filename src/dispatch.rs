use crate::context::SchedulerContext;
use crate::error::SubmitError;
use crate::job::{Job, JobId, TriggerKind};
use crate::joblog::{TriggerOutcome, TriggerRecord};
use crate::scheduler::ShutdownMode;
use crate::transport::TriggerRequest;

use std::collections::HashMap;
use std::sync::atomic::Ordering as AtomicOrdering;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_channel::{Receiver, Sender, TrySendError};
use parking_lot::Mutex;
use tokio::runtime::Handle;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Sizing and behavior of the two trigger pools.
#[derive(Debug, Clone)]
pub struct DispatchConfig {
  /// Worker count of the fast (default) pool.
  pub fast_workers: usize,
  /// Queue bound of the fast pool.
  pub fast_queue: usize,
  /// Worker count of the slow pool.
  pub slow_workers: usize,
  /// Queue bound of the slow pool.
  pub slow_queue: usize,
  /// Rolling RTT above this routes a job to the slow pool.
  pub slow_rtt_threshold: Duration,
  /// Samples required before a job can be classified slow.
  pub min_rtt_samples: usize,
  /// Trigger call timeout for jobs without their own.
  pub default_timeout: Duration,
}

impl Default for DispatchConfig {
  fn default() -> Self {
    Self {
      fast_workers: 32,
      fast_queue: 256,
      slow_workers: 8,
      slow_queue: 64,
      slow_rtt_threshold: Duration::from_millis(500),
      min_rtt_samples: 3,
      default_timeout: Duration::from_secs(10),
    }
  }
}

/// One accepted trigger, queued for a pool worker.
#[derive(Debug, Clone, Copy)]
pub(crate) struct TriggerTask {
  pub job_id: JobId,
  pub kind: TriggerKind,
}

#[derive(Debug, Clone, Copy, Default)]
struct RttStat {
  avg_ms: f64,
  samples: usize,
}

/// Exponentially weighted rolling average of per-job trigger round trips.
/// Recent behavior dominates, so a job recovering from a slow patch drifts
/// back to the fast pool.
#[derive(Debug)]
pub(crate) struct RttTracker {
  threshold: Duration,
  min_samples: usize,
  stats: Mutex<HashMap<JobId, RttStat>>,
}

const RTT_ALPHA: f64 = 0.3;

impl RttTracker {
  fn new(threshold: Duration, min_samples: usize) -> Self {
    Self {
      threshold,
      min_samples,
      stats: Mutex::new(HashMap::new()),
    }
  }

  pub fn record(&self, job_id: JobId, rtt: Duration) {
    let sample_ms = rtt.as_secs_f64() * 1000.0;
    let mut stats = self.stats.lock();
    let stat = stats.entry(job_id).or_default();
    stat.avg_ms = if stat.samples == 0 {
      sample_ms
    } else {
      stat.avg_ms * (1.0 - RTT_ALPHA) + sample_ms * RTT_ALPHA
    };
    stat.samples += 1;
  }

  pub fn is_slow(&self, job_id: JobId) -> bool {
    let stats = self.stats.lock();
    match stats.get(&job_id) {
      Some(stat) => {
        stat.samples >= self.min_samples && stat.avg_ms > self.threshold.as_secs_f64() * 1000.0
      }
      None => false,
    }
  }
}

/// Bounded two-pool trigger dispatcher.
///
/// Jobs trending slow (by rolling RTT) are routed to the smaller slow pool
/// so they cannot starve fast jobs through head-of-line blocking. A
/// submission that would exceed a pool's queue bound is rejected
/// synchronously and recorded as a `Discarded` trigger record, so the ring
/// consumer is never blocked.
pub struct TriggerDispatcher {
  ctx: Arc<SchedulerContext>,
  fast_tx: Sender<TriggerTask>,
  slow_tx: Sender<TriggerTask>,
  rtt: Arc<RttTracker>,
}

impl TriggerDispatcher {
  /// Builds the dispatcher and spawns its pool workers onto the current
  /// runtime. The engine builder calls this; embedders driving components
  /// manually (their own scan cadence, tests) may too.
  pub fn start(
    ctx: Arc<SchedulerContext>,
    config: &DispatchConfig,
    shutdown_rx: watch::Receiver<Option<ShutdownMode>>,
  ) -> (Arc<Self>, Vec<JoinHandle<()>>) {
    let (fast_tx, fast_rx) = async_channel::bounded::<TriggerTask>(config.fast_queue.max(1));
    let (slow_tx, slow_rx) = async_channel::bounded::<TriggerTask>(config.slow_queue.max(1));
    let rtt = Arc::new(RttTracker::new(
      config.slow_rtt_threshold,
      config.min_rtt_samples,
    ));

    let mut handles = Vec::with_capacity(config.fast_workers + config.slow_workers);
    let pools: [(&'static str, usize, Receiver<TriggerTask>); 2] = [
      ("fast", config.fast_workers, fast_rx),
      ("slow", config.slow_workers, slow_rx),
    ];
    for (pool, workers, rx) in pools {
      for worker_id in 0..workers {
        let worker = TriggerWorker {
          id: worker_id,
          pool,
          rx: rx.clone(),
          ctx: ctx.clone(),
          rtt: rtt.clone(),
          default_timeout: config.default_timeout,
          shutdown_rx: shutdown_rx.clone(),
        };
        handles.push(Handle::current().spawn(worker.run()));
      }
    }

    let dispatcher = Arc::new(Self {
      ctx,
      fast_tx,
      slow_tx,
      rtt,
    });
    (dispatcher, handles)
  }

  /// Fail-fast submission. Pool choice follows the job's rolling RTT; a
  /// full queue rejects immediately with exactly one `Discarded` record.
  pub async fn submit(&self, job_id: JobId, kind: TriggerKind) -> Result<(), SubmitError> {
    let (pool, tx) = if self.rtt.is_slow(job_id) {
      ("slow", &self.slow_tx)
    } else {
      ("fast", &self.fast_tx)
    };

    match tx.try_send(TriggerTask { job_id, kind }) {
      Ok(()) => {
        self
          .ctx
          .metrics
          .triggers_submitted
          .fetch_add(1, AtomicOrdering::Relaxed);
        Ok(())
      }
      Err(TrySendError::Full(_)) => {
        self
          .ctx
          .metrics
          .triggers_discarded
          .fetch_add(1, AtomicOrdering::Relaxed);
        let log_id = self
          .ctx
          .log_sink
          .append(TriggerRecord::begin(job_id, kind))
          .await;
        self
          .ctx
          .log_sink
          .finalize(
            log_id,
            TriggerOutcome::discarded(format!("{pool} trigger pool queue full")),
          )
          .await;
        warn!(job_id, pool, "Trigger discarded; pool queue full.");
        Err(SubmitError::QueueFull { pool, job_id })
      }
      Err(TrySendError::Closed(_)) => Err(SubmitError::Closed(job_id)),
    }
  }

  /// Closes both pool queues. Workers drain what was accepted, then exit.
  pub(crate) fn close(&self) {
    self.fast_tx.close();
    self.slow_tx.close();
  }

  /// Current queue depths `(fast, slow)`.
  pub fn queue_depths(&self) -> (usize, usize) {
    (self.fast_tx.len(), self.slow_tx.len())
  }
}

impl std::fmt::Debug for TriggerDispatcher {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("TriggerDispatcher")
      .field("fast_queue", &self.fast_tx.len())
      .field("slow_queue", &self.slow_tx.len())
      .finish()
  }
}

/// A pool worker: pulls accepted triggers off its queue and performs the
/// full trigger call (route, send, record).
struct TriggerWorker {
  id: usize,
  pool: &'static str,
  rx: Receiver<TriggerTask>,
  ctx: Arc<SchedulerContext>,
  rtt: Arc<RttTracker>,
  default_timeout: Duration,
  shutdown_rx: watch::Receiver<Option<ShutdownMode>>,
}

impl TriggerWorker {
  async fn run(mut self) {
    debug!(pool = self.pool, worker_id = self.id, "Trigger worker started.");

    loop {
      tokio::select! {
        biased;

        Ok(()) = self.shutdown_rx.changed() => {
          if *self.shutdown_rx.borrow() == Some(ShutdownMode::Force) {
            info!(pool = self.pool, worker_id = self.id, "Trigger worker forced shutdown.");
            break;
          }
          // Graceful: keep draining until the queue is closed and empty.
        }

        result = self.rx.recv() => {
          match result {
            Ok(task) => self.run_trigger(task).await,
            Err(_) => break, // closed and drained
          }
        }
      }
    }

    debug!(pool = self.pool, worker_id = self.id, "Trigger worker stopped.");
  }

  async fn run_trigger(&self, task: TriggerTask) {
    let job = match self.ctx.store.load(task.job_id).await {
      Ok(job) => job,
      Err(e) => {
        warn!(job_id = task.job_id, error = %e, "Dropping trigger; job cannot be loaded.");
        return;
      }
    };
    // A pause between enqueue and dispatch wins; only manual triggers may
    // fire a paused job.
    if !job.is_enabled() && task.kind != TriggerKind::Manual {
      warn!(job_id = job.id, "Dropping trigger for paused job.");
      return;
    }

    let log_id = self
      .ctx
      .log_sink
      .append(TriggerRecord::begin(job.id, task.kind))
      .await;

    let candidates = self.ctx.registry.live_instances(&job.app_name).await;
    if candidates.is_empty() {
      self.finalize_no_executor(
        log_id,
        format!("no executor available for application {}", job.app_name),
      )
      .await;
      return;
    }

    let strategy = self.ctx.routes.resolve(&job.route);
    let selected = strategy.route(&job, &candidates).await;
    if selected.is_empty() {
      self.finalize_no_executor(
        log_id,
        format!("route strategy {} selected no executor", strategy.name()),
      )
      .await;
      return;
    }
    let addresses: Vec<String> = selected.iter().map(|c| c.address.clone()).collect();

    let timeout = job.timeout.unwrap_or(self.default_timeout);
    let started = Instant::now();
    let (success, message) = self.send_all(&job, &addresses, log_id, timeout).await;
    let elapsed = started.elapsed();

    self.rtt.record(job.id, elapsed);
    self.ctx.metrics.trigger_rtt.record(elapsed);

    let outcome = if success {
      self
        .ctx
        .metrics
        .triggers_success
        .fetch_add(1, AtomicOrdering::Relaxed);
      TriggerOutcome::success(addresses, message, elapsed)
    } else {
      self
        .ctx
        .metrics
        .triggers_failed
        .fetch_add(1, AtomicOrdering::Relaxed);
      TriggerOutcome::failed(addresses, message, elapsed)
    };
    self.ctx.log_sink.finalize(log_id, outcome).await;
  }

  /// Sends the trigger to every selected address; success only if all
  /// succeed. The first failure message wins over any success message.
  async fn send_all(
    &self,
    job: &Job,
    addresses: &[String],
    log_id: i64,
    timeout: Duration,
  ) -> (bool, String) {
    let mut success = true;
    let mut message = String::new();
    for address in addresses {
      let request = TriggerRequest {
        job_id: job.id,
        param: job.param.clone(),
        log_id,
      };
      match tokio::time::timeout(timeout, self.ctx.transport.send(address, request)).await {
        Ok(reply) => {
          if !reply.success && success {
            success = false;
            message = reply.message;
          } else if success && message.is_empty() {
            message = reply.message;
          }
        }
        Err(_) => {
          if success {
            success = false;
            message = format!("trigger timed out after {} ms", timeout.as_millis());
          }
          warn!(
            job_id = job.id,
            address = %address,
            timeout_ms = timeout.as_millis() as u64,
            "Trigger call timed out."
          );
        }
      }
    }
    (success, message)
  }

  async fn finalize_no_executor(&self, log_id: i64, message: String) {
    self
      .ctx
      .metrics
      .triggers_no_executor
      .fetch_add(1, AtomicOrdering::Relaxed);
    warn!(log_id, message = %message, "Trigger failed without dispatch.");
    self
      .ctx
      .log_sink
      .finalize(
        log_id,
        TriggerOutcome::failed(Vec::new(), message, Duration::ZERO),
      )
      .await;
  }
}
