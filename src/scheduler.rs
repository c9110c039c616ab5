use crate::cluster::{DistributedLock, LeaseLock};
use crate::context::SchedulerContext;
use crate::dispatch::{DispatchConfig, TriggerDispatcher};
use crate::error::{BuildError, HandlerError, ShutdownError, StoreError, SubmitError};
use crate::handler::{HandlerRegistry, JobHandler};
use crate::job::{Job, JobId, JobStatus, TriggerKind};
use crate::joblog::{JobLogSink, MemoryLogSink};
use crate::metrics::SchedulerStats;
use crate::registry::{HeartbeatRegistry, MemoryRegistry};
use crate::ring::{RingConsumer, TimeRing};
use crate::router::{RouteStrategy, RouteTable};
use crate::scan::{ScanConfig, ScanLoop};
use crate::store::{JobStore, MemoryJobStore};
use crate::transport::{LocalTransport, TriggerTransport};

use std::sync::atomic::Ordering as AtomicOrdering;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use futures::future::try_join_all;
use tokio::runtime::Handle;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

/// The requested shutdown mode. Broadcast via a `watch` channel; `None`
/// means the engine is running normally.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownMode {
  /// Stop scheduling, give the ring its grace drain, let pool workers
  /// finish the queued triggers.
  Graceful,
  /// Stop all tasks as soon as possible; queued triggers are dropped.
  Force,
}

/// Builder for configuring and starting a [`CronWheel`] engine.
///
/// Every collaborator seam defaults to the in-process reference
/// implementation, so `CronWheel::builder().build()` yields a fully working
/// single-node engine; cluster deployments inject their own store, lock,
/// registry, transport and log sink.
///
/// # Example
///
/// ```no_run
/// use cronwheel::CronWheel;
///
/// # async fn run() -> Result<(), Box<dyn std::error::Error>> {
/// let engine = CronWheel::builder()
///     .fast_pool(16, 128)
///     .slow_pool(4, 32)
///     .pre_read_window(std::time::Duration::from_secs(5))
///     .build()?;
/// # Ok(())
/// # }
/// ```
pub struct EngineBuilder {
  store: Option<Arc<dyn JobStore>>,
  lock: Option<Arc<dyn DistributedLock>>,
  registry: Option<Arc<dyn HeartbeatRegistry>>,
  transport: Option<Arc<dyn TriggerTransport>>,
  log_sink: Option<Arc<dyn JobLogSink>>,
  route_strategies: Vec<Arc<dyn RouteStrategy>>,
  dispatch: DispatchConfig,
  scan: ScanConfig,
  pre_read_count: Option<usize>,
  registry_ttl: Duration,
  lock_lease: Duration,
  ring_grace: Duration,
}

impl Default for EngineBuilder {
  fn default() -> Self {
    Self {
      store: None,
      lock: None,
      registry: None,
      transport: None,
      log_sink: None,
      route_strategies: Vec::new(),
      dispatch: DispatchConfig::default(),
      scan: ScanConfig::default(),
      pre_read_count: None,
      registry_ttl: Duration::from_secs(30),
      lock_lease: Duration::from_secs(30),
      ring_grace: Duration::from_secs(8),
    }
  }
}

impl EngineBuilder {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn store(mut self, store: Arc<dyn JobStore>) -> Self {
    self.store = Some(store);
    self
  }

  pub fn lock(mut self, lock: Arc<dyn DistributedLock>) -> Self {
    self.lock = Some(lock);
    self
  }

  pub fn registry(mut self, registry: Arc<dyn HeartbeatRegistry>) -> Self {
    self.registry = Some(registry);
    self
  }

  pub fn transport(mut self, transport: Arc<dyn TriggerTransport>) -> Self {
    self.transport = Some(transport);
    self
  }

  pub fn log_sink(mut self, log_sink: Arc<dyn JobLogSink>) -> Self {
    self.log_sink = Some(log_sink);
    self
  }

  /// Registers a custom route strategy (resolvable by its `name()`).
  pub fn route_strategy(mut self, strategy: Arc<dyn RouteStrategy>) -> Self {
    self.route_strategies.push(strategy);
    self
  }

  /// Sizes the fast (default) trigger pool: worker count and queue bound.
  pub fn fast_pool(mut self, workers: usize, queue: usize) -> Self {
    self.dispatch.fast_workers = workers;
    self.dispatch.fast_queue = queue;
    self
  }

  /// Sizes the slow trigger pool: worker count and queue bound.
  pub fn slow_pool(mut self, workers: usize, queue: usize) -> Self {
    self.dispatch.slow_workers = workers;
    self.dispatch.slow_queue = queue;
    self
  }

  /// Rolling-RTT threshold above which a job is routed to the slow pool.
  pub fn slow_rtt_threshold(mut self, threshold: Duration) -> Self {
    self.dispatch.slow_rtt_threshold = threshold;
    self
  }

  /// Trigger call timeout for jobs that do not carry their own.
  pub fn default_trigger_timeout(mut self, timeout: Duration) -> Self {
    self.dispatch.default_timeout = timeout;
    self
  }

  /// Pre-read horizon of the scan loop (also the default misfire
  /// threshold).
  pub fn pre_read_window(mut self, window: Duration) -> Self {
    self.scan.misfire_threshold = window;
    self.scan.pre_read_window = window;
    self
  }

  /// Overrides the misfire threshold independently of the window.
  pub fn misfire_threshold(mut self, threshold: Duration) -> Self {
    self.scan.misfire_threshold = threshold;
    self
  }

  /// Batch size of one due query. Defaults to
  /// `(fast_workers + slow_workers) * 20`.
  pub fn pre_read_count(mut self, count: usize) -> Self {
    self.pre_read_count = Some(count);
    self
  }

  /// Name under which cluster leadership is contended.
  pub fn lock_name(mut self, name: &str) -> Self {
    self.scan.lock_name = name.to_string();
    self
  }

  /// How long one try-lock attempt may wait before the cycle is skipped.
  pub fn lock_timeout(mut self, timeout: Duration) -> Self {
    self.scan.lock_timeout = timeout;
    self
  }

  /// Lease duration of the default in-process [`LeaseLock`].
  pub fn lock_lease(mut self, lease: Duration) -> Self {
    self.lock_lease = lease;
    self
  }

  /// TTL of the default in-process [`MemoryRegistry`].
  pub fn registry_ttl(mut self, ttl: Duration) -> Self {
    self.registry_ttl = ttl;
    self
  }

  /// Grace period the ring gets to drain non-empty slots at graceful
  /// shutdown.
  pub fn ring_grace(mut self, grace: Duration) -> Self {
    self.ring_grace = grace;
    self
  }

  /// Builds and starts the engine: spawns the schedule loop, the ring
  /// consumer and the pool workers.
  ///
  /// Must be called within a Tokio runtime.
  ///
  /// # Errors
  ///
  /// - [`BuildError::ZeroFastWorkers`] if the fast pool has no workers.
  /// - [`BuildError::WindowTooSmall`] if the pre-read window is under 1s.
  pub fn build(mut self) -> Result<CronWheel, BuildError> {
    if self.dispatch.fast_workers == 0 {
      return Err(BuildError::ZeroFastWorkers);
    }
    if self.scan.pre_read_window < Duration::from_secs(1) {
      return Err(BuildError::WindowTooSmall);
    }
    self.scan.pre_read_count = self
      .pre_read_count
      .unwrap_or((self.dispatch.fast_workers + self.dispatch.slow_workers) * 20);

    // --- Assemble the context (defaults are the in-process impls) ---
    let handlers = Arc::new(HandlerRegistry::new());
    let transport: Arc<dyn TriggerTransport> = match self.transport {
      Some(transport) => transport,
      None => Arc::new(LocalTransport::new(handlers.clone())),
    };
    let store: Arc<dyn JobStore> = self
      .store
      .unwrap_or_else(|| Arc::new(MemoryJobStore::new()));
    let lock: Arc<dyn DistributedLock> = self
      .lock
      .unwrap_or_else(|| Arc::new(LeaseLock::new(self.lock_lease)));
    let registry: Arc<dyn HeartbeatRegistry> = self
      .registry
      .unwrap_or_else(|| Arc::new(MemoryRegistry::new(self.registry_ttl)));
    let log_sink: Arc<dyn JobLogSink> = self
      .log_sink
      .unwrap_or_else(|| Arc::new(MemoryLogSink::new()));

    let mut routes = RouteTable::new(transport.clone());
    for strategy in self.route_strategies {
      routes.insert(strategy);
    }

    let ctx = Arc::new(SchedulerContext {
      store,
      lock,
      registry,
      transport,
      log_sink,
      handlers,
      ring: Arc::new(TimeRing::new()),
      routes,
      metrics: Default::default(),
    });

    // --- Spawn the three execution contexts ---
    let (shutdown_tx, shutdown_rx) = watch::channel::<Option<ShutdownMode>>(None);

    let (dispatcher, mut task_handles) =
      TriggerDispatcher::start(ctx.clone(), &self.dispatch, shutdown_rx.clone());

    let scan_loop = ScanLoop::new(ctx.clone(), dispatcher.clone(), self.scan);
    task_handles.push(Handle::current().spawn(scan_loop.run(shutdown_rx.clone())));

    let ring_consumer = RingConsumer::new(
      ctx.clone(),
      dispatcher.clone(),
      shutdown_rx,
      self.ring_grace,
    );
    task_handles.push(Handle::current().spawn(ring_consumer.run()));

    Ok(CronWheel {
      ctx,
      dispatcher,
      shutdown_tx,
      task_handles: Arc::new(Mutex::new(task_handles)),
    })
  }
}

/// The cronwheel engine handle: the administrative surface an embedding
/// CLI/REST layer drives, plus shutdown.
///
/// Use [`CronWheel::builder()`] to configure and start an instance.
#[derive(Debug)]
pub struct CronWheel {
  ctx: Arc<SchedulerContext>,
  dispatcher: Arc<TriggerDispatcher>,
  shutdown_tx: watch::Sender<Option<ShutdownMode>>,
  task_handles: Arc<Mutex<Vec<JoinHandle<()>>>>,
}

impl CronWheel {
  /// Returns a builder to configure and create an engine instance.
  pub fn builder() -> EngineBuilder {
    EngineBuilder::new()
  }

  /// The shared context; exposed for embedders wiring additional
  /// components (an executor server, a monitoring surface) to the same
  /// collaborators.
  pub fn context(&self) -> &Arc<SchedulerContext> {
    &self.ctx
  }

  /// Registers a job definition; its first fire instant is computed here
  /// if absent. Returns the store-assigned id.
  pub async fn register_job(&self, mut job: Job) -> Result<JobId, StoreError> {
    if job.next_trigger_at.is_none() && job.is_enabled() {
      job.refresh_next(Utc::now());
    }
    let id = self.ctx.store.insert(job).await?;
    info!(job_id = id, "Job registered.");
    Ok(id)
  }

  /// Takes a job out of scheduling. Already-enqueued ring entries are
  /// dropped at dispatch time.
  pub async fn pause(&self, job_id: JobId) -> Result<(), StoreError> {
    self.ctx.store.set_status(job_id, JobStatus::Paused).await
  }

  /// Puts a paused job back into scheduling; the next fire instant is
  /// recomputed from now, never replayed from the pause gap.
  pub async fn resume(&self, job_id: JobId) -> Result<(), StoreError> {
    self.ctx.store.set_status(job_id, JobStatus::Enabled).await
  }

  /// Fires a job immediately, bypassing the ring and the job's schedule.
  /// Works on paused jobs too.
  pub async fn trigger_now(&self, job_id: JobId) -> Result<(), SubmitError> {
    self.dispatcher.submit(job_id, TriggerKind::Manual).await
  }

  /// Binds a handler for a job at `version`; see
  /// [`HandlerRegistry::register`] for the version-cutover rules.
  pub async fn register_handler(
    &self,
    job_id: JobId,
    handler: Arc<dyn JobHandler>,
    version: i64,
  ) -> Result<(), HandlerError> {
    let swapped = self.ctx.handlers.register(job_id, handler, version).await?;
    if swapped.is_some() {
      self
        .ctx
        .metrics
        .handlers_swapped
        .fetch_add(1, AtomicOrdering::Relaxed);
    }
    Ok(())
  }

  /// Compiles and binds a script handler; compile failure leaves the
  /// previous version serving.
  pub async fn register_script(
    &self,
    job_id: JobId,
    source: &str,
    version: i64,
  ) -> Result<(), HandlerError> {
    let result = self.ctx.handlers.register_script(job_id, source, version).await;
    match &result {
      Ok(Some(_)) => {
        self
          .ctx
          .metrics
          .handlers_swapped
          .fetch_add(1, AtomicOrdering::Relaxed);
      }
      Err(HandlerError::Compile(_)) => {
        self
          .ctx
          .metrics
          .handler_compile_failures
          .fetch_add(1, AtomicOrdering::Relaxed);
      }
      _ => {}
    }
    result.map(|_| ())
  }

  /// Removes a job's handler binding and destroys the handler.
  pub async fn unregister_handler(&self, job_id: JobId) {
    self.ctx.handlers.unregister(job_id).await;
  }

  /// Point-in-time scheduler statistics.
  pub fn stats(&self) -> SchedulerStats {
    let metrics = &self.ctx.metrics;
    metrics
      .ring_depth_current
      .store(self.ctx.ring.depth(), AtomicOrdering::Relaxed);
    let (fast, slow) = self.dispatcher.queue_depths();
    metrics.fast_queue_current.store(fast, AtomicOrdering::Relaxed);
    metrics.slow_queue_current.store(slow, AtomicOrdering::Relaxed);
    metrics.snapshot()
  }

  /// Initiates a graceful shutdown: the scan loop stops, the ring drains
  /// within its grace period, pool workers finish the accepted triggers.
  /// Waits for all tasks up to the optional timeout.
  pub async fn shutdown_graceful(&self, timeout: Option<Duration>) -> Result<(), ShutdownError> {
    info!("Initiating graceful shutdown...");
    self
      .shutdown_tx
      .send(Some(ShutdownMode::Graceful))
      .map_err(|_| ShutdownError::SignalFailed)?;
    self.dispatcher.close();
    self.await_shutdown(timeout).await
  }

  /// Initiates a forced shutdown: all tasks terminate as soon as possible
  /// and queued triggers are dropped.
  pub async fn shutdown_force(&self, timeout: Option<Duration>) -> Result<(), ShutdownError> {
    info!("Initiating forced shutdown...");
    self
      .shutdown_tx
      .send(Some(ShutdownMode::Force))
      .map_err(|_| ShutdownError::SignalFailed)?;
    self.dispatcher.close();
    self.await_shutdown(timeout).await
  }

  /// Waits for the spawned task handles, surfacing panics and timeouts.
  async fn await_shutdown(&self, timeout: Option<Duration>) -> Result<(), ShutdownError> {
    let handles = {
      let mut guard = self.task_handles.lock().await;
      std::mem::take(&mut *guard)
    };
    if handles.is_empty() {
      warn!("No tasks found to await during shutdown.");
      return Ok(());
    }

    let join_all = try_join_all(handles);
    let result = if let Some(timeout) = timeout {
      match tokio::time::timeout(timeout, join_all).await {
        Ok(Ok(_)) => Ok(()),
        Ok(Err(join_err)) => {
          error!(error = ?join_err, "A scheduler task panicked during shutdown.");
          Err(ShutdownError::TaskPanic)
        }
        Err(_) => {
          error!(timeout_ms = timeout.as_millis() as u64, "Shutdown timed out.");
          Err(ShutdownError::Timeout)
        }
      }
    } else {
      match join_all.await {
        Ok(_) => Ok(()),
        Err(join_err) => {
          error!(error = ?join_err, "A scheduler task panicked during shutdown.");
          Err(ShutdownError::TaskPanic)
        }
      }
    };

    if result.is_ok() {
      info!("All scheduler tasks joined.");
    }
    result
  }
}
