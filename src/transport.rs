use crate::handler::HandlerRegistry;
use crate::job::{JobId, LogId};

use std::fmt;
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;

/// A trigger invocation as it crosses to an executor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TriggerRequest {
  pub job_id: JobId,
  /// Parameter payload for the handler.
  pub param: String,
  /// Correlates executor-side reporting with the scheduler's log record.
  pub log_id: LogId,
}

/// The executor's answer to a trigger request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TriggerReply {
  pub success: bool,
  pub message: String,
}

impl TriggerReply {
  pub fn ok(message: impl Into<String>) -> Self {
    Self {
      success: true,
      message: message.into(),
    }
  }

  pub fn fail(message: impl Into<String>) -> Self {
    Self {
      success: false,
      message: message.into(),
    }
  }
}

/// Carries a trigger request to a worker process and its reply back.
///
/// Framing, retries-on-the-wire and connection management are the
/// implementation's concern. Every `send` runs under the dispatcher's
/// timeout, so implementations may block for as long as the network does.
#[async_trait]
pub trait TriggerTransport: Send + Sync {
  async fn send(&self, address: &str, request: TriggerRequest) -> TriggerReply;

  /// Cheap liveness probe, used by the failover route strategy.
  async fn ping(&self, address: &str) -> bool;
}

/// In-process transport: "sends" by executing against the local handler
/// registry, the way a single-node deployment runs its own jobs.
pub struct LocalTransport {
  handlers: Arc<HandlerRegistry>,
}

impl LocalTransport {
  pub fn new(handlers: Arc<HandlerRegistry>) -> Self {
    Self { handlers }
  }
}

impl fmt::Debug for LocalTransport {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("LocalTransport").finish()
  }
}

#[async_trait]
impl TriggerTransport for LocalTransport {
  async fn send(&self, address: &str, request: TriggerRequest) -> TriggerReply {
    let Some(handler) = self.handlers.get(request.job_id) else {
      return TriggerReply::fail(format!("No handler bound for job {}", request.job_id));
    };
    let started = Instant::now();
    match handler.execute(&request.param).await {
      Ok(message) => {
        debug!(
          job_id = request.job_id,
          address,
          elapsed_ms = started.elapsed().as_millis() as u64,
          "Local trigger executed."
        );
        TriggerReply::ok(message)
      }
      Err(e) => TriggerReply::fail(e.to_string()),
    }
  }

  async fn ping(&self, _address: &str) -> bool {
    true
  }
}
