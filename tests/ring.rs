//! tests/ring.rs
//! Time ring slot semantics and the tick drain window.

mod common;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;

use crate::common::{counting_handler, setup_tracing, Cluster};
use cronwheel::job::Job;
use cronwheel::joblog::TriggerStatus;
use cronwheel::ring::TimeRing;

#[test]
fn drain_empties_slot_until_repopulated() {
  let ring = TimeRing::new();
  ring.push(10, 1);
  ring.push(10, 2);
  ring.push(11, 3);

  assert_eq!(ring.depth(), 3);
  let drained = ring.drain(10);
  assert_eq!(drained, vec![1, 2]);

  // Slot 10 stays empty until someone pushes again.
  assert!(ring.drain(10).is_empty());
  assert_eq!(ring.depth(), 1);

  ring.push(10, 4);
  assert_eq!(ring.drain(10), vec![4]);
}

#[test]
fn slots_wrap_mod_sixty() {
  let ring = TimeRing::new();
  ring.push(75, 9);
  assert_eq!(ring.drain(15), vec![9]);

  ring.push(60, 7);
  assert_eq!(ring.drain(0), vec![7]);
}

#[tokio::test(flavor = "multi_thread")]
async fn tick_drains_current_and_previous_slot() {
  setup_tracing();
  let cluster = Cluster::new();
  let engine = cluster.engine();
  cluster.one_executor("ring-app");

  // Far-future jobs so the scan loop leaves them alone; the test feeds the
  // ring directly.
  let job_a = engine
    .register_job(Job::from_cron("ring-a", "0 0 0 1 1 * 2099", "ring-app"))
    .await
    .unwrap();
  let job_b = engine
    .register_job(Job::from_cron("ring-b", "0 0 0 1 1 * 2099", "ring-app"))
    .await
    .unwrap();

  let counter = Arc::new(AtomicUsize::new(0));
  engine
    .register_handler(job_a, counting_handler("a", counter.clone(), Duration::ZERO), 1)
    .await
    .unwrap();
  engine
    .register_handler(job_b, counting_handler("b", counter.clone(), Duration::ZERO), 1)
    .await
    .unwrap();

  // One id in the upcoming second's slot, one in the slot before it: the
  // tick at that second must drain both.
  let ctx = engine.context();
  let upcoming = Utc::now().timestamp() + 2;
  ctx.ring.push((upcoming.rem_euclid(60)) as u32, job_a);
  ctx.ring.push(((upcoming - 1).rem_euclid(60)) as u32, job_b);

  tokio::time::sleep(Duration::from_millis(3500)).await;

  assert!(ctx.ring.is_empty(), "both slots should be drained");
  assert_eq!(counter.load(Ordering::SeqCst), 2, "both jobs should have run");

  let successes = cluster.sink.finalized_with(TriggerStatus::Success);
  assert_eq!(successes.len(), 2);

  engine.shutdown_graceful(None).await.unwrap();
}

#[tokio::test(flavor = "multi_thread")]
async fn graceful_shutdown_grace_period_is_bounded() {
  setup_tracing();
  let engine = cronwheel::CronWheel::builder()
    .ring_grace(Duration::from_secs(2))
    .build()
    .unwrap();

  // An entry parked ~30s ahead can never drain inside the grace window.
  let slot = ((Utc::now().timestamp() + 30).rem_euclid(60)) as u32;
  engine.context().ring.push(slot, 999);

  let started = std::time::Instant::now();
  engine
    .shutdown_graceful(Some(Duration::from_secs(10)))
    .await
    .unwrap();
  assert!(
    started.elapsed() < Duration::from_secs(6),
    "shutdown should stop waiting once the grace period lapses"
  );
}
