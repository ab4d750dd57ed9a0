//! Executor lanes: remote (OAuth-backed) and hosted API
//!
//! Both wrap a caller-supplied [`LaneExecutor`]. The controller does not care
//! which backend services the call; it only sees chunks arriving through the
//! [`ChunkWriter`] and the executor's final result.

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::{Canceller, LaneContext, LaneSubscription};
use crate::error::Result;
use crate::event::LaneEvent;
use crate::request::Provider;

/// Which backend an executor call is routed to
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExecutorTarget {
    RemoteExecutor {
        oauth_account_id: Option<String>,
    },
    HostedApi {
        api_provider_id: Option<String>,
        api_model: Option<String>,
    },
}

/// One executor invocation
#[derive(Debug, Clone)]
pub struct ExecutorCall {
    pub provider: Provider,
    pub prompt: String,
    pub cwd: PathBuf,
    pub model: Option<String>,
    pub reasoning_level: Option<String>,
    pub target: ExecutorTarget,
    /// Run log; an executor may append to it directly
    pub log_path: Option<PathBuf>,
}

/// Write callback handed to executors. Each call is one data event.
#[derive(Debug, Clone)]
pub struct ChunkWriter {
    tx: mpsc::UnboundedSender<LaneEvent>,
}

impl ChunkWriter {
    /// Returns `false` once the run has stopped listening
    pub fn write(&self, chunk: &str) -> bool {
        if chunk.is_empty() {
            return true;
        }
        self.tx.send(LaneEvent::stdout(chunk)).is_ok()
    }

    pub fn write_bytes(&self, bytes: &[u8]) -> bool {
        self.write(&String::from_utf8_lossy(bytes))
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// Backend that services remote or hosted runs.
///
/// Implementations must stop promptly once `cancel` fires; no forced kill is
/// possible for these lanes.
#[async_trait]
pub trait LaneExecutor: Send + Sync {
    async fn execute(
        &self,
        call: ExecutorCall,
        writer: ChunkWriter,
        cancel: CancellationToken,
    ) -> Result<()>;
}

/// Lane backed by an injected executor
pub struct ExecutorLane {
    executor: Arc<dyn LaneExecutor>,
    call: ExecutorCall,
}

impl ExecutorLane {
    pub fn new(executor: Arc<dyn LaneExecutor>, call: ExecutorCall) -> Self {
        Self { executor, call }
    }

    pub(crate) fn start(self, ctx: LaneContext) -> Result<LaneSubscription> {
        let (tx, rx) = mpsc::unbounded_channel();
        let writer = ChunkWriter { tx: tx.clone() };

        let mut call = self.call;
        call.prompt = ctx.prompt;
        call.cwd = ctx.cwd;
        call.log_path = ctx.log_path;

        info!(
            "Starting {} executor ({:?}) in {:?}",
            call.provider, call.target, call.cwd
        );

        let executor = self.executor;
        let token = ctx.cancel.clone();
        let inner = tokio::spawn(async move { executor.execute(call, writer, token).await });
        let inner_abort = inner.abort_handle();

        let outer = tokio::spawn(async move {
            let event = match inner.await {
                Ok(Ok(())) => LaneEvent::Completed { exit_code: 0 },
                Ok(Err(e)) => LaneEvent::error(e.to_string()),
                Err(e) if e.is_cancelled() => {
                    debug!("Executor task aborted");
                    return;
                }
                Err(e) => {
                    warn!("Executor task panicked: {}", e);
                    LaneEvent::error(format!("executor panicked: {}", e))
                }
            };
            let _ = tx.send(event);
        });

        Ok(LaneSubscription::new(
            rx,
            Canceller::Cooperative { token: ctx.cancel },
            vec![inner_abort, outer.abort_handle()],
        ))
    }
}
