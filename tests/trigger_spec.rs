//! tests/trigger_spec.rs
//! The fire-time oracle, slot math and store scheduling semantics.

mod common;

use std::time::Duration;

use chrono::{Duration as ChronoDuration, TimeZone, Utc};

use cronwheel::job::{ring_slot, Job, JobStatus, TriggerSpec};
use cronwheel::store::{JobStore, MemoryJobStore};

#[test]
fn cron_fire_times_are_strictly_after_reference() {
  let spec = TriggerSpec::Cron("0 * * * * * *".to_string());
  let after = Utc.with_ymd_and_hms(2024, 3, 8, 12, 0, 0).unwrap();

  let times = spec.fire_times(after, 5);
  assert_eq!(times.len(), 5);
  assert!(times.iter().all(|t| *t > after));
  assert_eq!(times[0], Utc.with_ymd_and_hms(2024, 3, 8, 12, 1, 0).unwrap());
  assert_eq!(times[4], Utc.with_ymd_and_hms(2024, 3, 8, 12, 5, 0).unwrap());
}

#[test]
fn unparsable_cron_yields_no_instants() {
  let spec = TriggerSpec::Cron("definitely not cron".to_string());
  assert!(spec.fire_times(Utc::now(), 5).is_empty());
  assert!(spec.next_after(Utc::now()).is_none());
}

#[test]
fn fixed_rate_steps_from_the_reference_instant() {
  let spec = TriggerSpec::FixedRate(Duration::from_secs(30));
  let after = Utc.with_ymd_and_hms(2024, 3, 8, 12, 0, 0).unwrap();

  let times = spec.fire_times(after, 3);
  assert_eq!(times[0], after + ChronoDuration::seconds(30));
  assert_eq!(times[1], after + ChronoDuration::seconds(60));
  assert_eq!(times[2], after + ChronoDuration::seconds(90));
}

#[test]
fn slot_is_the_fire_instant_second_of_minute() {
  let at = Utc.with_ymd_and_hms(2024, 3, 8, 12, 5, 42).unwrap();
  assert_eq!(ring_slot(at), 42);
  assert_eq!(ring_slot(at + ChronoDuration::seconds(18)), 0);
  // Pre-epoch instants still land in 0..60.
  let old = Utc.with_ymd_and_hms(1969, 12, 31, 23, 59, 17).unwrap();
  assert!(ring_slot(old) < 60);
}

#[test]
fn refresh_next_pauses_a_job_with_no_future_instants() {
  let mut job = Job::from_cron("spent", "0 0 0 1 1 * 2020", "app");
  job.refresh_next(Utc::now());
  assert_eq!(job.status, JobStatus::Paused);
  assert!(job.next_trigger_at.is_none());
}

#[test]
fn json_param_round_trips_through_the_payload_string() {
  let payload = serde_json::json!({ "table": "invoices", "shard": 3 });
  let job = Job::from_rate("payload", Duration::from_secs(60), "app")
    .with_json_param(&payload)
    .unwrap();
  let parsed: serde_json::Value = serde_json::from_str(&job.param).unwrap();
  assert_eq!(parsed["table"], "invoices");
  assert_eq!(parsed["shard"], 3);
}

#[tokio::test]
async fn store_assigns_ascending_ids_and_computes_first_fire() {
  let store = MemoryJobStore::new();
  let a = store
    .insert(Job::from_rate("a", Duration::from_secs(60), "app"))
    .await
    .unwrap();
  let b = store
    .insert(Job::from_rate("b", Duration::from_secs(60), "app"))
    .await
    .unwrap();
  assert!(b > a);

  let job = store.load(a).await.unwrap();
  assert!(job.next_trigger_at.is_some(), "insert computes the first fire");
}

#[tokio::test]
async fn due_query_orders_by_id_descending_and_respects_limit() {
  let store = MemoryJobStore::new();
  let past = Utc::now() - ChronoDuration::seconds(1);
  for name in ["one", "two", "three"] {
    let mut job = Job::from_rate(name, Duration::from_secs(60), "app");
    job.next_trigger_at = Some(past);
    store.insert(job).await.unwrap();
  }

  let due = store.query_due(Utc::now(), 10).await.unwrap();
  let ids: Vec<i64> = due.iter().map(|j| j.id).collect();
  assert_eq!(ids, vec![3, 2, 1]);

  let limited = store.query_due(Utc::now(), 2).await.unwrap();
  assert_eq!(limited.len(), 2);
  assert_eq!(limited[0].id, 3);
}
