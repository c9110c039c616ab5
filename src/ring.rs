use crate::context::SchedulerContext;
use crate::dispatch::TriggerDispatcher;
use crate::job::{JobId, TriggerKind};
use crate::scheduler::ShutdownMode;

use std::collections::HashMap;
use std::sync::atomic::Ordering as AtomicOrdering;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use parking_lot::Mutex;
use tokio::sync::watch;
use tokio::time::sleep;
use tracing::{debug, info, trace, warn};

pub const RING_SLOTS: i64 = 60;

/// The 60-slot second-indexed ring holding near-term due job ids.
///
/// Slot key is the wall-clock second of minute a job should fire at.
/// Writers are the scan loop (and admin calls); the single ring consumer is
/// the only reader. The interior mutex makes both safe without caller-side
/// locking.
#[derive(Debug, Default)]
pub struct TimeRing {
  slots: Mutex<HashMap<u32, Vec<JobId>>>,
}

impl TimeRing {
  pub fn new() -> Self {
    Self::default()
  }

  /// Inserts a job id at `slot` (taken mod 60).
  pub fn push(&self, slot: u32, job_id: JobId) {
    let slot = slot % RING_SLOTS as u32;
    self.slots.lock().entry(slot).or_default().push(job_id);
    trace!(slot, job_id, "Pushed job into time ring.");
  }

  /// Removes and returns everything in `slot`, leaving it empty.
  pub fn drain(&self, slot: u32) -> Vec<JobId> {
    let slot = slot % RING_SLOTS as u32;
    self.slots.lock().remove(&slot).unwrap_or_default()
  }

  /// Total job ids currently resident across all slots.
  pub fn depth(&self) -> usize {
    self.slots.lock().values().map(Vec::len).sum()
  }

  pub fn is_empty(&self) -> bool {
    self.slots.lock().values().all(Vec::is_empty)
  }
}

/// Sleep span to the next wall-clock second boundary.
pub(crate) fn until_next_second() -> Duration {
  let subsec_ms = u64::from(Utc::now().timestamp_subsec_millis());
  Duration::from_millis(1000 - (subsec_ms % 1000))
}

/// The dedicated ring consumer task.
///
/// Wakes once per second boundary and drains both the current second's slot
/// and the previous one, tolerating up to one second of processing overrun.
/// A stall beyond that window can still miss fires; that bounded recovery
/// window is intentional.
pub(crate) struct RingConsumer {
  ctx: Arc<SchedulerContext>,
  dispatcher: Arc<TriggerDispatcher>,
  shutdown_rx: watch::Receiver<Option<ShutdownMode>>,
  grace: Duration,
}

impl RingConsumer {
  pub fn new(
    ctx: Arc<SchedulerContext>,
    dispatcher: Arc<TriggerDispatcher>,
    shutdown_rx: watch::Receiver<Option<ShutdownMode>>,
    grace: Duration,
  ) -> Self {
    Self {
      ctx,
      dispatcher,
      shutdown_rx,
      grace,
    }
  }

  pub async fn run(mut self) {
    info!("Time ring consumer started.");

    loop {
      tokio::select! {
        biased;

        Ok(()) = self.shutdown_rx.changed() => {
          let mode = *self.shutdown_rx.borrow();
          if let Some(mode) = mode {
            info!(?mode, "Ring consumer received shutdown signal.");
            if mode == ShutdownMode::Graceful {
              self.drain_remaining().await;
            }
            break;
          }
        }

        _ = sleep(until_next_second()) => {
          self.tick().await;
        }
      }
    }

    info!("Time ring consumer stopped.");
  }

  /// Drains slot `now` and slot `now - 1`, submitting each id in drain
  /// order. A per-job rejection is logged and never stops the tick.
  async fn tick(&self) {
    let now_sec = Utc::now().timestamp();
    for offset in 0..2i64 {
      let slot = (now_sec - offset).rem_euclid(RING_SLOTS) as u32;
      let ids = self.ctx.ring.drain(slot);
      if ids.is_empty() {
        continue;
      }
      debug!(slot, count = ids.len(), "Ring tick draining slot.");
      for job_id in ids {
        self
          .ctx
          .metrics
          .ring_drained
          .fetch_add(1, AtomicOrdering::Relaxed);
        if let Err(e) = self.dispatcher.submit(job_id, TriggerKind::Ring).await {
          warn!(job_id, error = %e, "Ring trigger submission rejected.");
        }
      }
    }
  }

  /// Bounded grace drain at graceful shutdown: keep ticking until the ring
  /// is empty or the grace period lapses.
  async fn drain_remaining(&self) {
    if self.ctx.ring.is_empty() {
      return;
    }
    info!(
      depth = self.ctx.ring.depth(),
      grace_ms = self.grace.as_millis() as u64,
      "Draining remaining ring slots before shutdown."
    );
    let deadline = Instant::now() + self.grace;
    while !self.ctx.ring.is_empty() && Instant::now() < deadline {
      sleep(until_next_second()).await;
      self.tick().await;
    }
    let left = self.ctx.ring.depth();
    if left > 0 {
      warn!(left, "Ring grace period lapsed with jobs still resident.");
    }
  }
}
