//! tests/router.rs
//! Route strategies: determinism, fallback, weighting, failover probing.

mod common;

use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;

use crate::common::setup_tracing;
use cronwheel::handler::HandlerRegistry;
use cronwheel::job::Job;
use cronwheel::registry::ExecutorCandidate;
use cronwheel::router::{
  FailoverStrategy, RandomStrategy, RoundRobinStrategy, RouteStrategy, RouteTable,
  WeightedStrategy,
};
use cronwheel::transport::{LocalTransport, TriggerReply, TriggerRequest, TriggerTransport};

fn candidates(addresses: &[&str]) -> Vec<ExecutorCandidate> {
  addresses.iter().map(|a| ExecutorCandidate::new(a)).collect()
}

fn job_with_id(id: i64) -> Job {
  let mut job = Job::from_cron("route-test", "0 0 0 1 1 * 2099", "app");
  job.id = id;
  job
}

#[tokio::test]
async fn round_robin_cycles_deterministically() {
  setup_tracing();
  let strategy = RoundRobinStrategy::default();
  let job = job_with_id(7);
  let list = candidates(&["a", "b", "c"]);

  let mut picks = Vec::new();
  for _ in 0..7 {
    let selected = strategy.route(&job, &list).await;
    picks.push(selected[0].address.clone());
  }
  assert_eq!(picks, vec!["a", "b", "c", "a", "b", "c", "a"]);
}

#[tokio::test]
async fn round_robin_counters_are_per_job() {
  let strategy = RoundRobinStrategy::default();
  let list = candidates(&["a", "b"]);

  let first = strategy.route(&job_with_id(1), &list).await;
  let other_job = strategy.route(&job_with_id(2), &list).await;
  // A second job starts its own cycle at index 0.
  assert_eq!(first[0].address, "a");
  assert_eq!(other_job[0].address, "a");
  let second = strategy.route(&job_with_id(1), &list).await;
  assert_eq!(second[0].address, "b");
}

#[tokio::test]
async fn random_picks_one_live_candidate() {
  let strategy = RandomStrategy;
  let job = job_with_id(1);
  let list = candidates(&["a", "b", "c"]);
  let known: HashSet<&str> = ["a", "b", "c"].into_iter().collect();

  for _ in 0..20 {
    let selected = strategy.route(&job, &list).await;
    assert_eq!(selected.len(), 1);
    assert!(known.contains(selected[0].address.as_str()));
  }
}

#[tokio::test]
async fn weighted_never_picks_zero_weight_when_others_exist() {
  let strategy = WeightedStrategy;
  let job = job_with_id(1);
  let list = vec![
    ExecutorCandidate::new("never").with_weight(0),
    ExecutorCandidate::new("always").with_weight(5),
  ];

  for _ in 0..50 {
    let selected = strategy.route(&job, &list).await;
    assert_eq!(selected[0].address, "always");
  }
}

#[tokio::test]
async fn weighted_with_all_zero_weights_degrades_to_uniform() {
  let strategy = WeightedStrategy;
  let job = job_with_id(1);
  let list = vec![
    ExecutorCandidate::new("a").with_weight(0),
    ExecutorCandidate::new("b").with_weight(0),
  ];

  let selected = strategy.route(&job, &list).await;
  assert_eq!(selected.len(), 1);
}

/// Transport whose ping fails for a configured set of addresses.
struct PartiallyDead {
  dead: HashSet<String>,
}

#[async_trait]
impl TriggerTransport for PartiallyDead {
  async fn send(&self, _address: &str, _request: TriggerRequest) -> TriggerReply {
    TriggerReply::ok("")
  }

  async fn ping(&self, address: &str) -> bool {
    !self.dead.contains(address)
  }
}

#[tokio::test]
async fn failover_falls_through_dead_candidates() {
  setup_tracing();
  let transport = Arc::new(PartiallyDead {
    dead: ["a".to_string(), "b".to_string()].into_iter().collect(),
  });
  let strategy = FailoverStrategy::new(transport);
  let job = job_with_id(1);

  let selected = strategy.route(&job, &candidates(&["a", "b", "c"])).await;
  assert_eq!(selected.len(), 1);
  assert_eq!(selected[0].address, "c");
}

#[tokio::test]
async fn failover_with_all_dead_selects_nothing() {
  let transport = Arc::new(PartiallyDead {
    dead: ["a".to_string(), "b".to_string()].into_iter().collect(),
  });
  let strategy = FailoverStrategy::new(transport);

  let selected = strategy.route(&job_with_id(1), &candidates(&["a", "b"])).await;
  assert!(selected.is_empty());
}

#[tokio::test]
async fn empty_candidate_list_selects_nothing() {
  let job = job_with_id(1);
  assert!(RandomStrategy.route(&job, &[]).await.is_empty());
  assert!(RoundRobinStrategy::default().route(&job, &[]).await.is_empty());
  assert!(WeightedStrategy.route(&job, &[]).await.is_empty());
}

#[tokio::test]
async fn unknown_route_name_falls_back_to_round_robin() {
  let transport = Arc::new(LocalTransport::new(Arc::new(HandlerRegistry::new())));
  let table = RouteTable::new(transport);

  assert_eq!(table.resolve("no-such-strategy").name(), "round_robin");
  assert_eq!(table.resolve("").name(), "round_robin");
  assert_eq!(table.resolve("weighted").name(), "weighted");
  assert_eq!(table.resolve("failover").name(), "failover");
  assert_eq!(table.resolve("random").name(), "random");
}
