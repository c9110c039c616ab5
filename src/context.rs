use crate::cluster::DistributedLock;
use crate::handler::HandlerRegistry;
use crate::joblog::JobLogSink;
use crate::metrics::SchedulerMetrics;
use crate::registry::HeartbeatRegistry;
use crate::ring::TimeRing;
use crate::router::RouteTable;
use crate::store::JobStore;
use crate::transport::TriggerTransport;

use std::fmt;
use std::sync::Arc;

/// Everything the scheduler's components share, constructed once by the
/// builder and passed explicitly; there is no global registry or singleton
/// to reach for.
///
/// The collaborator seams (`store`, `lock`, `registry`, `transport`,
/// `log_sink`) are narrow traits injected at construction; the remaining
/// fields are the engine's own shared structures.
pub struct SchedulerContext {
  pub store: Arc<dyn JobStore>,
  pub lock: Arc<dyn DistributedLock>,
  pub registry: Arc<dyn HeartbeatRegistry>,
  pub transport: Arc<dyn TriggerTransport>,
  pub log_sink: Arc<dyn JobLogSink>,
  pub handlers: Arc<HandlerRegistry>,
  pub ring: Arc<TimeRing>,
  pub routes: RouteTable,
  pub metrics: SchedulerMetrics,
}

impl fmt::Debug for SchedulerContext {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("SchedulerContext")
      .field("handlers", &self.handlers)
      .field("ring_depth", &self.ring.depth())
      .field("routes", &self.routes)
      .finish()
  }
}
