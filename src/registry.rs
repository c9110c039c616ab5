use std::collections::HashMap;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::debug;

/// A live executor instance as the heartbeat registry sees it.
///
/// Lifecycle is owned entirely by the registry; the core reads a snapshot
/// per routing decision and never writes back.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutorCandidate {
  /// Transport address (scheme and framing are the transport's concern).
  pub address: String,
  /// Relative weight for the weighted route strategy.
  pub weight: u32,
  pub metadata: HashMap<String, String>,
}

impl ExecutorCandidate {
  pub fn new(address: &str) -> Self {
    Self {
      address: address.to_string(),
      weight: 1,
      metadata: HashMap::new(),
    }
  }

  pub fn with_weight(mut self, weight: u32) -> Self {
    self.weight = weight;
    self
  }
}

/// Registry of live executor instances per application/group, fed by
/// periodic heartbeats and expired by TTL. The ping transport and wire
/// format are owned externally.
#[async_trait]
pub trait HeartbeatRegistry: Send + Sync {
  /// Snapshot of the currently live candidates for an application group.
  async fn live_instances(&self, app_name: &str) -> Vec<ExecutorCandidate>;
}

/// In-memory TTL registry. Reference implementation for tests and
/// single-process embeddings; production deployments adapt their service
/// registry behind [`HeartbeatRegistry`] instead.
#[derive(Debug)]
pub struct MemoryRegistry {
  ttl: Duration,
  entries: RwLock<HashMap<String, HashMap<String, (ExecutorCandidate, Instant)>>>,
}

impl MemoryRegistry {
  /// `ttl` is how long a beat keeps an instance alive.
  pub fn new(ttl: Duration) -> Self {
    Self {
      ttl,
      entries: RwLock::new(HashMap::new()),
    }
  }

  /// Records a heartbeat, inserting or refreshing the candidate.
  pub fn beat(&self, app_name: &str, candidate: ExecutorCandidate) {
    let mut entries = self.entries.write();
    let app = entries.entry(app_name.to_string()).or_default();
    let known = app
      .insert(candidate.address.clone(), (candidate, Instant::now()))
      .is_some();
    if !known {
      debug!(app_name, "Executor instance registered.");
    }
  }

  /// Drops an instance immediately (graceful executor shutdown).
  pub fn remove(&self, app_name: &str, address: &str) {
    if let Some(app) = self.entries.write().get_mut(app_name) {
      app.remove(address);
    }
  }
}

#[async_trait]
impl HeartbeatRegistry for MemoryRegistry {
  async fn live_instances(&self, app_name: &str) -> Vec<ExecutorCandidate> {
    let entries = self.entries.read();
    let Some(app) = entries.get(app_name) else {
      return Vec::new();
    };
    let mut live: Vec<ExecutorCandidate> = app
      .values()
      .filter(|(_, seen)| seen.elapsed() < self.ttl)
      .map(|(candidate, _)| candidate.clone())
      .collect();
    // Fixed candidate order keeps round-robin deterministic.
    live.sort_by(|a, b| a.address.cmp(&b.address));
    live
  }
}
