use crate::error::HandlerError;
use crate::job::JobId;

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;
use rhai::{Dynamic, Engine, EvalAltResult, Scope, AST};
use tracing::{debug, info, warn};

/// The unit of execution: given the job's parameter payload, do the work
/// and return a result message.
#[async_trait]
pub trait Executable: Send + Sync {
  async fn execute(&self, param: &str) -> Result<String, HandlerError>;
}

/// The function type adapted into an [`Executable`] by [`FnExecutable`].
///
/// The function must be asynchronous, `Send + Sync + 'static`, and resolve
/// to the handler's result message (or a `HandlerError`).
pub type BoxedExecFn = Box<
  dyn Fn(String) -> Pin<Box<dyn Future<Output = Result<String, HandlerError>> + Send + 'static>>
    + Send
    + Sync
    + 'static,
>;

/// Adapts an async closure into an [`Executable`].
pub struct FnExecutable {
  exec_fn: BoxedExecFn,
}

impl FnExecutable {
  /// Wraps any async closure; the returned future is boxed here so call
  /// sites need no casting.
  pub fn new<F, Fut>(exec_fn: F) -> Self
  where
    F: Fn(String) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<String, HandlerError>> + Send + 'static,
  {
    Self {
      exec_fn: Box::new(move |param| Box::pin(exec_fn(param))),
    }
  }
}

impl fmt::Debug for FnExecutable {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("FnExecutable")
      .field("exec_fn", &format_args!("<Fn>"))
      .finish()
  }
}

#[async_trait]
impl Executable for FnExecutable {
  async fn execute(&self, param: &str) -> Result<String, HandlerError> {
    (self.exec_fn)(param.to_string()).await
  }
}

/// Executor-side unit of work for one job: lifecycle around an executable.
///
/// `init` runs once when the binding is (re)created, `execute` repeatedly,
/// `destroy` once when the binding is superseded or unregistered. A handler
/// instance is never re-initialized after `destroy`.
#[async_trait]
pub trait JobHandler: Send + Sync {
  async fn init(&self) -> Result<(), HandlerError> {
    Ok(())
  }

  async fn execute(&self, param: &str) -> Result<String, HandlerError>;

  async fn destroy(&self) {}
}

/// Handler bound once to a pre-resolved executable.
pub struct StaticHandler {
  name: String,
  exec: Arc<dyn Executable>,
}

impl StaticHandler {
  pub fn new(name: &str, exec: Arc<dyn Executable>) -> Self {
    Self {
      name: name.to_string(),
      exec,
    }
  }

  pub fn name(&self) -> &str {
    &self.name
  }
}

impl fmt::Debug for StaticHandler {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("StaticHandler")
      .field("name", &self.name)
      .finish()
  }
}

#[async_trait]
impl JobHandler for StaticHandler {
  async fn execute(&self, param: &str) -> Result<String, HandlerError> {
    self.exec.execute(param).await
  }
}

/// Handler compiled from script source, carrying its version stamp.
///
/// The script must define `fn execute(param)`; `fn init()` and
/// `fn destroy()` are invoked when present. Compilation happens once at
/// registration; execution reuses the compiled AST.
pub struct ScriptHandler {
  engine: Engine,
  ast: AST,
  version: i64,
}

impl ScriptHandler {
  /// Compiles `source`. A parse error is reported to the caller, never
  /// thrown past it; the registry leaves the previous version in force.
  pub fn compile(source: &str, version: i64) -> Result<Self, HandlerError> {
    let engine = Engine::new();
    let ast = engine
      .compile(source)
      .map_err(|e| HandlerError::Compile(e.to_string()))?;
    Ok(Self {
      engine,
      ast,
      version,
    })
  }

  pub fn version(&self) -> i64 {
    self.version
  }

  /// Calls a zero-argument script function, tolerating its absence.
  fn call_optional(&self, name: &str) -> Result<(), HandlerError> {
    let mut scope = Scope::new();
    match self
      .engine
      .call_fn::<Dynamic>(&mut scope, &self.ast, name, ())
    {
      Ok(_) => Ok(()),
      Err(e) if matches!(*e, EvalAltResult::ErrorFunctionNotFound(_, _)) => Ok(()),
      Err(e) => Err(HandlerError::Execution(e.to_string())),
    }
  }
}

impl fmt::Debug for ScriptHandler {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("ScriptHandler")
      .field("version", &self.version)
      .finish()
  }
}

#[async_trait]
impl JobHandler for ScriptHandler {
  async fn init(&self) -> Result<(), HandlerError> {
    self.call_optional("init").map_err(|e| match e {
      HandlerError::Execution(msg) => HandlerError::Init(msg),
      other => other,
    })
  }

  async fn execute(&self, param: &str) -> Result<String, HandlerError> {
    let mut scope = Scope::new();
    self
      .engine
      .call_fn::<Dynamic>(&mut scope, &self.ast, "execute", (param.to_string(),))
      .map(|value| value.to_string())
      .map_err(|e| HandlerError::Execution(e.to_string()))
  }

  async fn destroy(&self) {
    if let Err(e) = self.call_optional("destroy") {
      warn!(error = %e, "Script destroy hook failed.");
    }
  }
}

#[derive(Clone)]
struct HandlerBinding {
  handler: Arc<dyn JobHandler>,
  version: i64,
}

/// Job id → current handler + version stamp.
///
/// Swaps are atomic from a reader's point of view: `get` returns a cloned
/// `Arc`, so a call already in flight against a superseded handler completes
/// normally; the old handler's `destroy` runs only after the swap.
#[derive(Default)]
pub struct HandlerRegistry {
  bindings: RwLock<HashMap<JobId, HandlerBinding>>,
}

impl HandlerRegistry {
  pub fn new() -> Self {
    Self::default()
  }

  /// Binds `handler` to `job_id` at `version`.
  ///
  /// A version not strictly greater than the currently bound one is
  /// rejected without touching the binding. On success, returns the
  /// displaced version, if any.
  pub async fn register(
    &self,
    job_id: JobId,
    handler: Arc<dyn JobHandler>,
    version: i64,
  ) -> Result<Option<i64>, HandlerError> {
    if let Some(current) = self.version(job_id) {
      if version <= current {
        return Err(HandlerError::StaleVersion {
          current,
          offered: version,
        });
      }
    }

    // Init before the swap so a failing handler never becomes visible.
    handler.init().await?;

    let displaced = {
      let mut bindings = self.bindings.write();
      // Re-check under the write lock; another registration may have raced.
      if let Some(current) = bindings.get(&job_id).map(|b| b.version) {
        if version <= current {
          drop(bindings);
          handler.destroy().await;
          return Err(HandlerError::StaleVersion {
            current,
            offered: version,
          });
        }
      }
      bindings.insert(job_id, HandlerBinding { handler, version })
    };

    match displaced {
      Some(old) => {
        info!(job_id, from = old.version, to = version, "Handler binding replaced.");
        old.handler.destroy().await;
        Ok(Some(old.version))
      }
      None => {
        debug!(job_id, version, "Handler binding created.");
        Ok(None)
      }
    }
  }

  /// Compiles `source` and binds the resulting [`ScriptHandler`].
  ///
  /// A compile failure leaves the previously bound version authoritative.
  pub async fn register_script(
    &self,
    job_id: JobId,
    source: &str,
    version: i64,
  ) -> Result<Option<i64>, HandlerError> {
    // Stale versions are cheaper to reject before paying for a compile.
    if let Some(current) = self.version(job_id) {
      if version <= current {
        return Err(HandlerError::StaleVersion {
          current,
          offered: version,
        });
      }
    }
    let handler = ScriptHandler::compile(source, version)?;
    self.register(job_id, Arc::new(handler), version).await
  }

  /// Current handler for a job, if bound.
  pub fn get(&self, job_id: JobId) -> Option<Arc<dyn JobHandler>> {
    self.bindings.read().get(&job_id).map(|b| b.handler.clone())
  }

  /// Current bound version for a job, if any.
  pub fn version(&self, job_id: JobId) -> Option<i64> {
    self.bindings.read().get(&job_id).map(|b| b.version)
  }

  /// Removes the binding and destroys its handler.
  pub async fn unregister(&self, job_id: JobId) {
    let removed = self.bindings.write().remove(&job_id);
    if let Some(binding) = removed {
      binding.handler.destroy().await;
      info!(job_id, version = binding.version, "Handler binding removed.");
    }
  }
}

impl fmt::Debug for HandlerRegistry {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("HandlerRegistry")
      .field("bound_jobs", &self.bindings.read().len())
      .finish()
  }
}
