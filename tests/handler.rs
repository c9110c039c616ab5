//! tests/handler.rs
//! Handler lifecycle: script compile, version cutover, in-flight safety.

mod common;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::common::setup_tracing;
use cronwheel::handler::{FnExecutable, HandlerRegistry, JobHandler, ScriptHandler, StaticHandler};
use cronwheel::HandlerError;

const SCRIPT_V1: &str = r#"
fn execute(param) {
  "v1:" + param
}
"#;

const SCRIPT_V2: &str = r#"
fn init() { }
fn execute(param) {
  "v2:" + param
}
fn destroy() { }
"#;

#[tokio::test]
async fn script_handler_compiles_and_executes() {
  setup_tracing();
  let handler = ScriptHandler::compile(SCRIPT_V1, 1).unwrap();
  assert_eq!(handler.version(), 1);
  assert_eq!(handler.execute("x").await.unwrap(), "v1:x");
}

#[tokio::test]
async fn script_compile_failure_is_reported_not_thrown() {
  let err = ScriptHandler::compile("fn execute(param) {", 1).unwrap_err();
  assert!(matches!(err, HandlerError::Compile(_)));
}

#[tokio::test]
async fn newer_version_swaps_the_binding() {
  setup_tracing();
  let registry = HandlerRegistry::new();
  registry.register_script(1, SCRIPT_V1, 100).await.unwrap();
  assert_eq!(registry.get(1).unwrap().execute("a").await.unwrap(), "v1:a");

  let displaced = registry.register_script(1, SCRIPT_V2, 200).await.unwrap();
  assert_eq!(displaced, Some(100));
  assert_eq!(registry.version(1), Some(200));
  assert_eq!(registry.get(1).unwrap().execute("a").await.unwrap(), "v2:a");
}

#[tokio::test]
async fn stale_and_equal_versions_are_rejected() {
  let registry = HandlerRegistry::new();
  registry.register_script(1, SCRIPT_V2, 200).await.unwrap();

  for offered in [100, 200] {
    let err = registry
      .register_script(1, SCRIPT_V1, offered)
      .await
      .unwrap_err();
    assert!(matches!(
      err,
      HandlerError::StaleVersion { current: 200, .. }
    ));
  }
  // The binding was never touched.
  assert_eq!(registry.version(1), Some(200));
  assert_eq!(registry.get(1).unwrap().execute("a").await.unwrap(), "v2:a");
}

#[tokio::test]
async fn compile_failure_keeps_last_good_version_serving() {
  setup_tracing();
  let registry = HandlerRegistry::new();
  registry.register_script(1, SCRIPT_V1, 100).await.unwrap();

  let err = registry
    .register_script(1, "fn execute(param) { oops(", 200)
    .await
    .unwrap_err();
  assert!(matches!(err, HandlerError::Compile(_)));

  assert_eq!(registry.version(1), Some(100));
  assert_eq!(registry.get(1).unwrap().execute("a").await.unwrap(), "v1:a");
}

#[tokio::test(flavor = "multi_thread")]
async fn in_flight_execution_survives_a_swap() {
  setup_tracing();
  let registry = Arc::new(HandlerRegistry::new());

  let slow_v1 = Arc::new(StaticHandler::new(
    "v1",
    Arc::new(FnExecutable::new(|_param| async move {
      tokio::time::sleep(Duration::from_millis(400)).await;
      Ok("old".to_string())
    })),
  ));
  registry.register(1, slow_v1, 1).await.unwrap();

  // Start a call against v1, then swap to v2 while it is still sleeping.
  let in_flight = {
    let handler = registry.get(1).unwrap();
    tokio::spawn(async move { handler.execute("p").await })
  };
  tokio::time::sleep(Duration::from_millis(100)).await;

  let v2 = Arc::new(StaticHandler::new(
    "v2",
    Arc::new(FnExecutable::new(|_param| async move { Ok("new".to_string()) })),
  ));
  registry.register(1, v2, 2).await.unwrap();

  // The old call completes untouched; new calls see v2.
  assert_eq!(in_flight.await.unwrap().unwrap(), "old");
  assert_eq!(registry.get(1).unwrap().execute("p").await.unwrap(), "new");
}

/// Handler that records its lifecycle transitions.
struct LifecycleHandler {
  label: &'static str,
  events: Arc<Mutex<Vec<String>>>,
}

#[async_trait]
impl JobHandler for LifecycleHandler {
  async fn init(&self) -> Result<(), HandlerError> {
    self.events.lock().push(format!("init:{}", self.label));
    Ok(())
  }

  async fn execute(&self, _param: &str) -> Result<String, HandlerError> {
    self.events.lock().push(format!("exec:{}", self.label));
    Ok(String::new())
  }

  async fn destroy(&self) {
    self.events.lock().push(format!("destroy:{}", self.label));
  }
}

#[tokio::test]
async fn lifecycle_runs_init_swap_destroy_in_order() {
  setup_tracing();
  let registry = HandlerRegistry::new();
  let events = Arc::new(Mutex::new(Vec::new()));

  let v1 = Arc::new(LifecycleHandler {
    label: "v1",
    events: events.clone(),
  });
  let v2 = Arc::new(LifecycleHandler {
    label: "v2",
    events: events.clone(),
  });

  registry.register(1, v1, 1).await.unwrap();
  registry.get(1).unwrap().execute("").await.unwrap();
  registry.register(1, v2, 2).await.unwrap();
  registry.get(1).unwrap().execute("").await.unwrap();
  registry.unregister(1).await;
  assert!(registry.get(1).is_none());

  let seen = events.lock().clone();
  assert_eq!(
    seen,
    vec![
      "init:v1",
      "exec:v1",
      // The replacement is initialized before the old handler is torn down.
      "init:v2",
      "destroy:v1",
      "exec:v2",
      "destroy:v2",
    ]
  );
}

#[tokio::test]
async fn failing_init_never_becomes_visible() {
  struct BrokenInit;

  #[async_trait]
  impl JobHandler for BrokenInit {
    async fn init(&self) -> Result<(), HandlerError> {
      Err(HandlerError::Init("no resources".into()))
    }

    async fn execute(&self, _param: &str) -> Result<String, HandlerError> {
      Ok(String::new())
    }
  }

  let registry = HandlerRegistry::new();
  let err = registry.register(1, Arc::new(BrokenInit), 1).await.unwrap_err();
  assert!(matches!(err, HandlerError::Init(_)));
  assert!(registry.get(1).is_none());
}

#[tokio::test]
async fn optional_script_hooks_are_tolerated() {
  // SCRIPT_V1 defines no init/destroy; both must be no-ops, not errors.
  let handler = ScriptHandler::compile(SCRIPT_V1, 1).unwrap();
  handler.init().await.unwrap();
  handler.destroy().await;
}
