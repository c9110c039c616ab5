use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

// --- Simple Histogram Implementation ---

/// A basic concurrent histogram storing count and sum.
///
/// Suitable for simple latency tracking without detailed percentile
/// information. Uses `Relaxed` ordering; strict inter-metric consistency is
/// not required here.
#[derive(Debug, Default)]
pub struct SimpleHistogram {
  count: AtomicUsize,
  sum_micros: AtomicUsize,
}

impl SimpleHistogram {
  /// Records a duration observation in the histogram.
  pub fn record(&self, duration: Duration) {
    self.count.fetch_add(1, Ordering::Relaxed);
    self.sum_micros.fetch_add(
      duration.as_micros().try_into().unwrap_or(usize::MAX),
      Ordering::Relaxed,
    );
  }

  pub fn get_count(&self) -> usize {
    self.count.load(Ordering::Relaxed)
  }

  pub fn get_sum_micros(&self) -> usize {
    self.sum_micros.load(Ordering::Relaxed)
  }
}

// --- Main Metrics Struct (Internal State) ---

/// Internal state for tracking scheduler metrics using atomic counters.
///
/// Cloned and shared between the scan loop, ring task and dispatcher
/// workers. Cloning only clones the `Arc`s.
#[derive(Debug, Clone)]
pub struct SchedulerMetrics {
  // --- Counters (monotonically increasing) ---
  /// Scan cycles that ran to completion while holding the lock.
  pub cycles_total: Arc<AtomicUsize>,
  /// Scan cycles skipped because another node held the lock.
  pub cycles_skipped_lock: Arc<AtomicUsize>,
  /// Completed cycles with nothing due.
  pub cycles_idle: Arc<AtomicUsize>,
  /// Jobs processed across all scan cycles.
  pub jobs_scanned: Arc<AtomicUsize>,
  /// Misfires resolved by skipping the missed instant.
  pub misfires_skipped: Arc<AtomicUsize>,
  /// Misfires resolved with a compensating immediate trigger.
  pub misfires_fired: Arc<AtomicUsize>,
  /// Job ids pushed into the time ring.
  pub ring_pushed: Arc<AtomicUsize>,
  /// Job ids drained out of the time ring by ticks.
  pub ring_drained: Arc<AtomicUsize>,
  /// Triggers accepted into a pool queue.
  pub triggers_submitted: Arc<AtomicUsize>,
  /// Triggers rejected by a full pool queue (one Discarded record each).
  pub triggers_discarded: Arc<AtomicUsize>,
  /// Triggers finalized successfully.
  pub triggers_success: Arc<AtomicUsize>,
  /// Triggers finalized as failed (transport error, timeout, executor error).
  pub triggers_failed: Arc<AtomicUsize>,
  /// Triggers finalized as failed for want of a live executor.
  pub triggers_no_executor: Arc<AtomicUsize>,
  /// Handler bindings replaced by a newer version.
  pub handlers_swapped: Arc<AtomicUsize>,
  /// Script registrations rejected at compile time.
  pub handler_compile_failures: Arc<AtomicUsize>,

  // --- Gauges (current state values) ---
  /// Job ids currently resident in ring slots.
  pub ring_depth_current: Arc<AtomicUsize>,
  /// Entries currently queued in the fast pool.
  pub fast_queue_current: Arc<AtomicUsize>,
  /// Entries currently queued in the slow pool.
  pub slow_queue_current: Arc<AtomicUsize>,

  // --- Histograms ---
  /// Round-trip time of trigger calls, in microseconds.
  pub trigger_rtt: Arc<SimpleHistogram>,
}

impl SchedulerMetrics {
  pub fn new() -> Self {
    Self {
      cycles_total: Default::default(),
      cycles_skipped_lock: Default::default(),
      cycles_idle: Default::default(),
      jobs_scanned: Default::default(),
      misfires_skipped: Default::default(),
      misfires_fired: Default::default(),
      ring_pushed: Default::default(),
      ring_drained: Default::default(),
      triggers_submitted: Default::default(),
      triggers_discarded: Default::default(),
      triggers_success: Default::default(),
      triggers_failed: Default::default(),
      triggers_no_executor: Default::default(),
      handlers_swapped: Default::default(),
      handler_compile_failures: Default::default(),
      ring_depth_current: Default::default(),
      fast_queue_current: Default::default(),
      slow_queue_current: Default::default(),
      trigger_rtt: Arc::new(SimpleHistogram::default()),
    }
  }

  /// Creates a point-in-time snapshot of the current metric values.
  pub fn snapshot(&self) -> SchedulerStats {
    let order = Ordering::Relaxed;

    SchedulerStats {
      cycles_total: self.cycles_total.load(order),
      cycles_skipped_lock: self.cycles_skipped_lock.load(order),
      cycles_idle: self.cycles_idle.load(order),
      jobs_scanned: self.jobs_scanned.load(order),
      misfires_skipped: self.misfires_skipped.load(order),
      misfires_fired: self.misfires_fired.load(order),
      ring_pushed: self.ring_pushed.load(order),
      ring_drained: self.ring_drained.load(order),
      triggers_submitted: self.triggers_submitted.load(order),
      triggers_discarded: self.triggers_discarded.load(order),
      triggers_success: self.triggers_success.load(order),
      triggers_failed: self.triggers_failed.load(order),
      triggers_no_executor: self.triggers_no_executor.load(order),
      handlers_swapped: self.handlers_swapped.load(order),
      handler_compile_failures: self.handler_compile_failures.load(order),
      ring_depth_current: self.ring_depth_current.load(order),
      fast_queue_current: self.fast_queue_current.load(order),
      slow_queue_current: self.slow_queue_current.load(order),
      trigger_rtt_count: self.trigger_rtt.get_count(),
      trigger_rtt_sum_micros: self.trigger_rtt.get_sum_micros(),
    }
  }
}

impl Default for SchedulerMetrics {
  fn default() -> Self {
    Self::new()
  }
}

// --- Stats Snapshot Struct (Public Data) ---

/// A snapshot of the scheduler's metrics at a specific point in time.
///
/// Plain data; clone, serialize or ship it to a monitoring surface as is.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct SchedulerStats {
  // Counters
  pub cycles_total: usize,
  pub cycles_skipped_lock: usize,
  pub cycles_idle: usize,
  pub jobs_scanned: usize,
  pub misfires_skipped: usize,
  pub misfires_fired: usize,
  pub ring_pushed: usize,
  pub ring_drained: usize,
  pub triggers_submitted: usize,
  pub triggers_discarded: usize,
  pub triggers_success: usize,
  pub triggers_failed: usize,
  pub triggers_no_executor: usize,
  pub handlers_swapped: usize,
  pub handler_compile_failures: usize,
  // Gauges
  pub ring_depth_current: usize,
  pub fast_queue_current: usize,
  pub slow_queue_current: usize,
  // Histogram data
  pub trigger_rtt_count: usize,
  pub trigger_rtt_sum_micros: usize,
}

impl SchedulerStats {
  /// Mean trigger round-trip time in microseconds, if any trigger completed.
  pub fn mean_trigger_rtt_micros(&self) -> Option<f64> {
    if self.trigger_rtt_count == 0 {
      None
    } else {
      Some(self.trigger_rtt_sum_micros as f64 / self.trigger_rtt_count as f64)
    }
  }

  /// Mean trigger round-trip time, if any trigger completed.
  pub fn mean_trigger_rtt(&self) -> Option<Duration> {
    self
      .mean_trigger_rtt_micros()
      .map(|micros| Duration::from_micros(micros as u64))
  }
}
