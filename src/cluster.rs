use crate::error::LockError;

use std::collections::HashMap;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::time::sleep;
use tracing::{debug, warn};
use uuid::Uuid;

/// Cluster-wide mutual exclusion with lease semantics.
///
/// Implementations must be lease-based with auto-expiry: a crashed holder's
/// lease lapses on its own, so scheduling is never blocked permanently. The
/// core holds the lock only for the scan-and-enqueue phase of a cycle.
#[async_trait]
pub trait DistributedLock: Send + Sync {
  /// Attempts to acquire `name`, waiting at most `timeout`. Returns whether
  /// the lock was acquired; `false` is the normal "another node is leader"
  /// answer, not an error.
  async fn try_lock(&self, name: &str, timeout: Duration) -> Result<bool, LockError>;
  /// Releases `name` if this instance holds it.
  async fn unlock(&self, name: &str) -> Result<(), LockError>;
}

const ACQUIRE_RETRY_INTERVAL: Duration = Duration::from_millis(25);

/// In-process lease lock.
///
/// Each `LeaseLock` instance carries its own holder token, so two instances
/// sharing one `leases` table behave like two nodes contending for
/// leadership. Expired leases are claimable by anyone; `unlock` releases
/// only the caller's own lease.
#[derive(Debug)]
pub struct LeaseLock {
  holder: Uuid,
  lease: Duration,
  leases: std::sync::Arc<Mutex<HashMap<String, (Uuid, Instant)>>>,
}

impl LeaseLock {
  pub fn new(lease: Duration) -> Self {
    Self {
      holder: Uuid::new_v4(),
      lease,
      leases: std::sync::Arc::new(Mutex::new(HashMap::new())),
    }
  }

  /// A second handle on the same lease table with its own holder token:
  /// one "node" per handle.
  pub fn peer(&self) -> Self {
    Self {
      holder: Uuid::new_v4(),
      lease: self.lease,
      leases: self.leases.clone(),
    }
  }

  fn try_acquire_once(&self, name: &str) -> bool {
    let mut leases = self.leases.lock();
    let now = Instant::now();
    match leases.get(name) {
      Some((holder, acquired_at)) if now.duration_since(*acquired_at) < self.lease => {
        // Live lease. Re-entrant acquire by the same holder refreshes it.
        if *holder == self.holder {
          leases.insert(name.to_string(), (self.holder, now));
          true
        } else {
          false
        }
      }
      Some((holder, _)) => {
        warn!(name, expired_holder = %holder, "Taking over an expired lease.");
        leases.insert(name.to_string(), (self.holder, now));
        true
      }
      None => {
        leases.insert(name.to_string(), (self.holder, now));
        true
      }
    }
  }
}

impl Default for LeaseLock {
  fn default() -> Self {
    Self::new(Duration::from_secs(30))
  }
}

#[async_trait]
impl DistributedLock for LeaseLock {
  async fn try_lock(&self, name: &str, timeout: Duration) -> Result<bool, LockError> {
    let deadline = Instant::now() + timeout;
    loop {
      if self.try_acquire_once(name) {
        return Ok(true);
      }
      if Instant::now() >= deadline {
        return Ok(false);
      }
      sleep(ACQUIRE_RETRY_INTERVAL.min(timeout)).await;
    }
  }

  async fn unlock(&self, name: &str) -> Result<(), LockError> {
    let mut leases = self.leases.lock();
    match leases.get(name) {
      Some((holder, _)) if *holder == self.holder => {
        leases.remove(name);
      }
      Some(_) => debug!(name, "Unlock skipped; lease held by another node."),
      None => {}
    }
    Ok(())
  }
}
