use std::str::FromStr;
use std::time::Duration as StdDuration;

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use cron::Schedule as CronSchedule;
use serde::{Deserialize, Serialize};
use tracing::warn;

/// Store-assigned identifier of a job definition. Ascending; the due query
/// orders by it (descending) so batches are deterministic.
pub type JobId = i64;

/// Sink-assigned identifier of a trigger record.
pub type LogId = i64;

/// How a job's fire instants are derived.
///
/// The variants are deliberately opaque to the scheduling core beyond
/// [`TriggerSpec::fire_times`]: the core only ever asks "when next, after
/// this instant".
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum TriggerSpec {
  /// Standard CRON expression (7-field, UTC interpretation).
  Cron(String),
  /// Fire repeatedly at a fixed rate after the previous fire instant.
  FixedRate(StdDuration),
}

impl TriggerSpec {
  /// Returns up to `n` upcoming fire instants strictly after `after`.
  ///
  /// An unparsable cron expression or an overflowing rate yields an empty
  /// vector; callers treat "no instants" as the job having run its course.
  pub fn fire_times(&self, after: DateTime<Utc>, n: usize) -> Vec<DateTime<Utc>> {
    match self {
      TriggerSpec::Cron(expression) => match CronSchedule::from_str(expression) {
        Ok(schedule) => schedule.after(&after).take(n).collect(),
        Err(e) => {
          warn!(%expression, error = %e, "Failed to parse cron expression.");
          Vec::new()
        }
      },
      TriggerSpec::FixedRate(rate) => match ChronoDuration::from_std(*rate) {
        Ok(step) => {
          let mut out = Vec::with_capacity(n);
          let mut at = after;
          for _ in 0..n {
            match at.checked_add_signed(step) {
              Some(next) => {
                out.push(next);
                at = next;
              }
              None => break,
            }
          }
          out
        }
        Err(e) => {
          warn!(?rate, error = %e, "Fixed rate does not fit a chrono duration.");
          Vec::new()
        }
      },
    }
  }

  /// Convenience for the single next fire instant strictly after `after`.
  pub fn next_after(&self, after: DateTime<Utc>) -> Option<DateTime<Utc>> {
    self.fire_times(after, 1).into_iter().next()
  }
}

/// Whether a job participates in scheduling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum JobStatus {
  /// Eligible for the due query and for triggering.
  Enabled,
  /// Invisible to the due query; stale ring entries are dropped at dispatch.
  Paused,
}

/// Policy applied when a job's fire instant is discovered after it already
/// passed the misfire threshold.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MisfirePolicy {
  /// Recompute the next instant only; the missed fire is skipped.
  Skip,
  /// Additionally enqueue one immediate compensating trigger.
  FireNow,
}

/// Why a trigger was dispatched.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TriggerKind {
  /// Scan loop found the job overdue within the threshold.
  Cron,
  /// Time ring tick drained the job at its fire second.
  Ring,
  /// Misfire compensation (`MisfirePolicy::FireNow`).
  Misfire,
  /// Administrative `trigger_now` call.
  Manual,
}

/// A registered job definition.
///
/// The scheduling core owns `next_trigger_at`/`last_trigger_at`; everything
/// else is configuration. Persisted through the `JobStore` seam.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
  /// Assigned by the store on insert; `0` until then.
  pub id: JobId,
  pub name: String,
  pub trigger: TriggerSpec,
  pub status: JobStatus,
  pub misfire: MisfirePolicy,
  /// Next computed fire instant. `None` once the spec yields no further
  /// instants; the job is then flipped to `Paused`.
  pub next_trigger_at: Option<DateTime<Utc>>,
  pub last_trigger_at: Option<DateTime<Utc>>,
  /// Executor application/group whose live instances receive the trigger.
  pub app_name: String,
  /// Opaque parameter payload handed to the job handler.
  pub param: String,
  /// Route strategy name; unknown names fall back to round-robin.
  pub route: String,
  /// Per-trigger executor timeout; the dispatcher default applies if `None`.
  pub timeout: Option<StdDuration>,
}

impl Job {
  /// Creates an enabled job definition; the first fire instant is computed
  /// on insert (or explicitly via [`Job::refresh_next`]).
  pub fn new(name: &str, trigger: TriggerSpec, app_name: &str) -> Self {
    Self {
      id: 0,
      name: name.to_string(),
      trigger,
      status: JobStatus::Enabled,
      misfire: MisfirePolicy::Skip,
      next_trigger_at: None,
      last_trigger_at: None,
      app_name: app_name.to_string(),
      param: String::new(),
      route: "round_robin".to_string(),
      timeout: None,
    }
  }

  pub fn from_cron(name: &str, expression: &str, app_name: &str) -> Self {
    Self::new(name, TriggerSpec::Cron(expression.to_string()), app_name)
  }

  pub fn from_rate(name: &str, rate: StdDuration, app_name: &str) -> Self {
    Self::new(name, TriggerSpec::FixedRate(rate), app_name)
  }

  pub fn with_param(mut self, param: &str) -> Self {
    self.param = param.to_string();
    self
  }

  /// Sets the parameter payload from any serializable value, stored as
  /// JSON for the handler to deserialize on its side.
  pub fn with_json_param<T: serde::Serialize>(
    mut self,
    value: &T,
  ) -> Result<Self, serde_json::Error> {
    self.param = serde_json::to_string(value)?;
    Ok(self)
  }

  pub fn with_route(mut self, route: &str) -> Self {
    self.route = route.to_string();
    self
  }

  pub fn with_misfire(mut self, policy: MisfirePolicy) -> Self {
    self.misfire = policy;
    self
  }

  pub fn with_timeout(mut self, timeout: StdDuration) -> Self {
    self.timeout = Some(timeout);
    self
  }

  pub fn is_enabled(&self) -> bool {
    self.status == JobStatus::Enabled
  }

  /// Advances `next_trigger_at` to the first fire instant strictly after
  /// `from`, recording the displaced instant as `last_trigger_at`.
  ///
  /// `from` is always at or past the previous instant on every caller path,
  /// so the next-trigger-time never moves backwards. A spec with no further
  /// instants pauses the job.
  pub fn refresh_next(&mut self, from: DateTime<Utc>) {
    self.last_trigger_at = self.next_trigger_at;
    match self.trigger.next_after(from) {
      Some(next) => self.next_trigger_at = Some(next),
      None => {
        warn!(job_id = self.id, name = %self.name, "No further fire instants; pausing job.");
        self.status = JobStatus::Paused;
        self.next_trigger_at = None;
      }
    }
  }
}

/// Ring slot for a fire instant: its wall-clock second of minute.
pub fn ring_slot(instant: DateTime<Utc>) -> u32 {
  (instant.timestamp().rem_euclid(60)) as u32
}
