use crate::job::{Job, JobId};
use crate::registry::ExecutorCandidate;
use crate::transport::TriggerTransport;

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use rand::Rng;
use tracing::{debug, warn};

/// Selects which live executor(s) receive a trigger.
///
/// `candidates` is a snapshot owned by the caller; strategies must never
/// mutate registry state. Returning an empty vector means "no viable
/// target" and finalizes the trigger as failed.
#[async_trait]
pub trait RouteStrategy: Send + Sync {
  fn name(&self) -> &'static str;

  async fn route(&self, job: &Job, candidates: &[ExecutorCandidate]) -> Vec<ExecutorCandidate>;
}

/// Uniform pick from the live candidates.
#[derive(Debug, Default)]
pub struct RandomStrategy;

#[async_trait]
impl RouteStrategy for RandomStrategy {
  fn name(&self) -> &'static str {
    "random"
  }

  async fn route(&self, _job: &Job, candidates: &[ExecutorCandidate]) -> Vec<ExecutorCandidate> {
    if candidates.is_empty() {
      return Vec::new();
    }
    let idx = rand::rng().random_range(0..candidates.len());
    vec![candidates[idx].clone()]
  }
}

/// Per-job monotonically advancing counter mod candidate count.
/// Deterministic for a fixed candidate order.
#[derive(Debug, Default)]
pub struct RoundRobinStrategy {
  counters: Mutex<HashMap<JobId, usize>>,
}

#[async_trait]
impl RouteStrategy for RoundRobinStrategy {
  fn name(&self) -> &'static str {
    "round_robin"
  }

  async fn route(&self, job: &Job, candidates: &[ExecutorCandidate]) -> Vec<ExecutorCandidate> {
    if candidates.is_empty() {
      return Vec::new();
    }
    let idx = {
      let mut counters = self.counters.lock();
      let counter = counters.entry(job.id).or_insert(0);
      let idx = *counter % candidates.len();
      *counter = counter.wrapping_add(1);
      idx
    };
    vec![candidates[idx].clone()]
  }
}

/// Pick with probability proportional to declared weight. Zero-weight
/// candidates are excluded unless every weight is zero, which degrades to a
/// uniform pick.
#[derive(Debug, Default)]
pub struct WeightedStrategy;

#[async_trait]
impl RouteStrategy for WeightedStrategy {
  fn name(&self) -> &'static str {
    "weighted"
  }

  async fn route(&self, _job: &Job, candidates: &[ExecutorCandidate]) -> Vec<ExecutorCandidate> {
    if candidates.is_empty() {
      return Vec::new();
    }
    let total: u64 = candidates.iter().map(|c| u64::from(c.weight)).sum();
    if total == 0 {
      let idx = rand::rng().random_range(0..candidates.len());
      return vec![candidates[idx].clone()];
    }
    let mut point = rand::rng().random_range(0..total);
    for candidate in candidates {
      let weight = u64::from(candidate.weight);
      if point < weight {
        return vec![candidate.clone()];
      }
      point -= weight;
    }
    // Unreachable with a correct total; keep the last candidate as a guard.
    vec![candidates[candidates.len() - 1].clone()]
  }
}

/// Probe candidates in snapshot order; the first one answering the ping
/// wins. All probes failing selects nothing.
pub struct FailoverStrategy {
  transport: Arc<dyn TriggerTransport>,
}

impl FailoverStrategy {
  pub fn new(transport: Arc<dyn TriggerTransport>) -> Self {
    Self { transport }
  }
}

impl fmt::Debug for FailoverStrategy {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("FailoverStrategy").finish()
  }
}

#[async_trait]
impl RouteStrategy for FailoverStrategy {
  fn name(&self) -> &'static str {
    "failover"
  }

  async fn route(&self, job: &Job, candidates: &[ExecutorCandidate]) -> Vec<ExecutorCandidate> {
    for candidate in candidates {
      if self.transport.ping(&candidate.address).await {
        return vec![candidate.clone()];
      }
      debug!(
        job_id = job.id,
        address = %candidate.address,
        "Failover probe failed; trying next candidate."
      );
    }
    Vec::new()
  }
}

/// Strategy lookup by name with a round-robin fallback.
pub struct RouteTable {
  strategies: HashMap<&'static str, Arc<dyn RouteStrategy>>,
  fallback: Arc<dyn RouteStrategy>,
}

impl RouteTable {
  /// Builds the table with the four built-in strategies registered.
  pub fn new(transport: Arc<dyn TriggerTransport>) -> Self {
    let fallback: Arc<dyn RouteStrategy> = Arc::new(RoundRobinStrategy::default());
    let mut strategies: HashMap<&'static str, Arc<dyn RouteStrategy>> = HashMap::new();
    strategies.insert("random", Arc::new(RandomStrategy));
    strategies.insert(fallback.name(), fallback.clone());
    strategies.insert("weighted", Arc::new(WeightedStrategy));
    strategies.insert("failover", Arc::new(FailoverStrategy::new(transport)));
    Self {
      strategies,
      fallback,
    }
  }

  /// Registers a custom strategy under its own name.
  pub fn insert(&mut self, strategy: Arc<dyn RouteStrategy>) {
    self.strategies.insert(strategy.name(), strategy);
  }

  /// Resolves a strategy by name; unknown or empty names fall back to
  /// round-robin.
  pub fn resolve(&self, name: &str) -> Arc<dyn RouteStrategy> {
    match self.strategies.get(name) {
      Some(strategy) => strategy.clone(),
      None => {
        if !name.is_empty() {
          warn!(route = name, "Unknown route strategy; using round-robin.");
        }
        self.fallback.clone()
      }
    }
  }
}

impl fmt::Debug for RouteTable {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("RouteTable")
      .field("strategies", &self.strategies.keys().collect::<Vec<_>>())
      .finish()
  }
}
