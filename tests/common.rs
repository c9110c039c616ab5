//! tests/common.rs
//! Shared fixtures and helpers for integration tests.
#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tracing_subscriber::fmt::TestWriter;

use cronwheel::cluster::LeaseLock;
use cronwheel::context::SchedulerContext;
use cronwheel::dispatch::{DispatchConfig, TriggerDispatcher};
use cronwheel::handler::{FnExecutable, HandlerRegistry, StaticHandler};
use cronwheel::joblog::MemoryLogSink;
use cronwheel::registry::{ExecutorCandidate, MemoryRegistry};
use cronwheel::ring::TimeRing;
use cronwheel::router::RouteTable;
use cronwheel::scan::{ScanConfig, ScanLoop};
use cronwheel::scheduler::ShutdownMode;
use cronwheel::store::MemoryJobStore;
use cronwheel::transport::LocalTransport;
use cronwheel::{CronWheel, SchedulerMetrics};

// Initializes tracing subscriber for test output.
pub fn setup_tracing() {
  // Use try_init to avoid panic if called multiple times
  let _ = tracing_subscriber::fmt()
    .with_max_level(tracing::Level::DEBUG)
    .with_writer(TestWriter::new())
    .with_test_writer()
    .try_init();
}

/// The shared collaborators of one simulated cluster node (or of several,
/// when handles are cloned across engines).
pub struct Cluster {
  pub store: Arc<MemoryJobStore>,
  pub registry: Arc<MemoryRegistry>,
  pub sink: Arc<MemoryLogSink>,
  pub lock: Arc<LeaseLock>,
}

impl Cluster {
  pub fn new() -> Self {
    Self {
      store: Arc::new(MemoryJobStore::new()),
      registry: Arc::new(MemoryRegistry::new(Duration::from_secs(30))),
      sink: Arc::new(MemoryLogSink::new()),
      lock: Arc::new(LeaseLock::new(Duration::from_secs(30))),
    }
  }

  /// An engine wired to this cluster's collaborators, with small pools to
  /// keep tests snappy.
  pub fn engine(&self) -> CronWheel {
    CronWheel::builder()
      .store(self.store.clone())
      .registry(self.registry.clone())
      .log_sink(self.sink.clone())
      .lock(self.lock.clone())
      .fast_pool(4, 32)
      .slow_pool(2, 8)
      .build()
      .expect("engine build")
  }

  /// Registers one live executor for `app` and returns its address.
  pub fn one_executor(&self, app: &str) -> String {
    let address = format!("local://{app}-1");
    self.registry.beat(app, ExecutorCandidate::new(&address));
    address
  }

  /// A second node's view of the same cluster: shared store, registry and
  /// sink, but its own holder token on the shared lease table.
  pub fn peer(&self) -> Self {
    Self {
      store: self.store.clone(),
      registry: self.registry.clone(),
      sink: self.sink.clone(),
      lock: Arc::new(self.lock.peer()),
    }
  }
}

/// Manually assembled components for tests that drive scan cycles and
/// dispatch directly instead of running the background loops.
pub struct Bench {
  pub cluster: Cluster,
  pub handlers: Arc<HandlerRegistry>,
  pub ctx: Arc<SchedulerContext>,
  pub dispatcher: Arc<TriggerDispatcher>,
  pub scan: ScanLoop,
  pub shutdown_tx: watch::Sender<Option<ShutdownMode>>,
}

pub fn build_bench(dispatch: DispatchConfig, scan: ScanConfig) -> Bench {
  build_bench_on(Cluster::new(), dispatch, scan)
}

/// Like [`build_bench`], on an existing cluster view (for multi-node tests).
pub fn build_bench_on(cluster: Cluster, dispatch: DispatchConfig, scan: ScanConfig) -> Bench {
  let handlers = Arc::new(HandlerRegistry::new());
  let transport = Arc::new(LocalTransport::new(handlers.clone()));

  let ctx = Arc::new(SchedulerContext {
    store: cluster.store.clone(),
    lock: cluster.lock.clone(),
    registry: cluster.registry.clone(),
    transport: transport.clone(),
    log_sink: cluster.sink.clone(),
    handlers: handlers.clone(),
    ring: Arc::new(TimeRing::new()),
    routes: RouteTable::new(transport),
    metrics: SchedulerMetrics::new(),
  });

  let (shutdown_tx, shutdown_rx) = watch::channel(None);
  let (dispatcher, _workers) = TriggerDispatcher::start(ctx.clone(), &dispatch, shutdown_rx);
  let scan = ScanLoop::new(ctx.clone(), dispatcher.clone(), scan);

  Bench {
    cluster,
    handlers,
    ctx,
    dispatcher,
    scan,
    shutdown_tx,
  }
}

pub fn default_bench() -> Bench {
  build_bench(DispatchConfig::default(), ScanConfig::default())
}

/// An executable that counts invocations, optionally sleeps, and succeeds
/// or fails.
pub fn counting_exec(
  counter: Arc<AtomicUsize>,
  delay: Duration,
  succeeds: bool,
) -> Arc<FnExecutable> {
  Arc::new(FnExecutable::new(move |param| {
    let ctr = counter.clone();
    async move {
      let count = ctr.fetch_add(1, Ordering::SeqCst) + 1;
      tracing::debug!(%param, count, "counting exec running");
      if delay > Duration::ZERO {
        tokio::time::sleep(delay).await;
      }
      if succeeds {
        Ok(format!("run {count}"))
      } else {
        Err(cronwheel::HandlerError::Execution("forced failure".into()))
      }
    }
  }))
}

/// A static handler wrapping [`counting_exec`].
pub fn counting_handler(
  name: &str,
  counter: Arc<AtomicUsize>,
  delay: Duration,
) -> Arc<StaticHandler> {
  Arc::new(StaticHandler::new(
    name,
    counting_exec(counter, delay, true),
  ))
}
