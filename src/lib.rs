//! CronWheel: A Cluster-Safe, Cron-Driven Job Trigger Engine
//!
//! Decides *when* each registered job should next fire, hands firing jobs to
//! a bounded dispatch layer, and routes the actual invocation to one of
//! several live executor instances.
//!
//! # Architecture
//!
//! Three independent execution contexts cooperate:
//!
//! - **Schedule loop**: a single second-aligned task that, while holding a
//!   lease-based distributed lock (so only one node schedules at a time),
//!   pre-reads due jobs from the [`store::JobStore`], applies the misfire
//!   policy, fires overdue jobs and feeds near-term jobs into the time ring.
//! - **Time ring**: a 60-slot second-indexed structure ([`ring::TimeRing`])
//!   with a dedicated consumer task that wakes on each second boundary and
//!   drains the current and previous slot (one second of overrun
//!   tolerance).
//! - **Trigger dispatcher**: two bounded worker pools
//!   ([`dispatch::TriggerDispatcher`]); jobs trending slow by rolling RTT
//!   go to the smaller slow pool so they cannot starve fast jobs. A full
//!   queue rejects submissions immediately and records them as discarded.
//!
//! Target selection is pluggable ([`router::RouteStrategy`]): random,
//! round-robin, weighted and failover ship built in, keyed by the job's
//! route name with a round-robin fallback.
//!
//! On the executor side, [`handler::JobHandler`] is the polymorphic unit of
//! execution: a static handler bound to a pre-resolved
//! [`handler::Executable`], or a hot-reloadable [`handler::ScriptHandler`]
//! compiled from script source with a version stamp. Re-registration with a
//! newer version swaps the binding atomically; calls already in flight
//! finish against the old handler, and a compile failure leaves the
//! last-good version serving.
//!
//! All collaborators (store, lock, heartbeat registry, trigger transport,
//! log sink) are narrow traits injected at construction; in-process
//! reference implementations ship with the crate, so a bare
//! `CronWheel::builder().build()` is a fully working single-node engine.
//!
//! # Usage
//!
//! ```no_run
//! use cronwheel::{
//!   handler::{FnExecutable, StaticHandler},
//!   job::Job,
//!   registry::{ExecutorCandidate, MemoryRegistry},
//!   CronWheel,
//! };
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!   // Keep a handle on the registry to feed heartbeats.
//!   let registry = Arc::new(MemoryRegistry::new(Duration::from_secs(30)));
//!
//!   let engine = CronWheel::builder()
//!     .registry(registry.clone())
//!     .fast_pool(16, 128)
//!     .slow_pool(4, 32)
//!     .build()?;
//!
//!   // One live executor instance for the "billing" group.
//!   registry.beat("billing", ExecutorCandidate::new("local://billing-1"));
//!
//!   // A job firing at second 10 of every minute.
//!   let job_id = engine
//!     .register_job(Job::from_cron("invoice-sync", "10 * * * * * *", "billing"))
//!     .await?;
//!
//!   // The unit of work, bound to the job id.
//!   let exec = Arc::new(FnExecutable::new(|param| async move {
//!     tracing::info!(%param, "invoice sync running");
//!     Ok("synced".to_string())
//!   }));
//!   engine
//!     .register_handler(job_id, Arc::new(StaticHandler::new("invoice-sync", exec)), 1)
//!     .await?;
//!
//!   tokio::time::sleep(Duration::from_secs(65)).await;
//!   println!("stats: {:#?}", engine.stats());
//!
//!   engine.shutdown_graceful(Some(Duration::from_secs(10))).await?;
//!   Ok(())
//! }
//! ```
//!
//! # Cluster deployment
//!
//! Inject real implementations of the five seams: a database-backed
//! [`store::JobStore`], a lease lock on your coordination service
//! ([`cluster::DistributedLock`]), your service registry behind
//! [`registry::HeartbeatRegistry`], an RPC [`transport::TriggerTransport`],
//! and a persistent [`joblog::JobLogSink`]. The engine never holds the lock
//! across a trigger call, and a node that loses the lock simply skips its
//! cycle.

// Declare modules within the crate
pub mod cluster;
pub mod context;
pub mod dispatch;
pub mod error;
pub mod handler;
pub mod job;
pub mod joblog;
pub mod metrics;
pub mod registry;
pub mod ring;
pub mod router;
pub mod scan;
pub mod scheduler;
pub mod store;
pub mod transport;

// --- Public Re-exports ---

// Engine handle and builder
pub use scheduler::{CronWheel, EngineBuilder, ShutdownMode};

// Error types
pub use error::{BuildError, HandlerError, LockError, ShutdownError, StoreError, SubmitError};

// Job related types
pub use job::{Job, JobId, JobStatus, LogId, MisfirePolicy, TriggerKind, TriggerSpec};

// Metrics related types
pub use metrics::{SchedulerMetrics, SchedulerStats};
