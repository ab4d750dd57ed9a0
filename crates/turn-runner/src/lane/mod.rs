//! Execution lanes
//!
//! A lane is the backend that actually runs the agent for one turn. Exactly
//! one lane is active per run. Starting a lane yields a [`LaneSubscription`]
//! that owns the event stream, the cancellation capability and every task the
//! lane spawned, so the controller tears all of it down in one step.

pub mod executor;
pub mod subprocess;

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::AbortHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::error::Result;
use crate::event::LaneEvent;
use crate::process_tree::ProcessTreeKiller;

pub use executor::{ChunkWriter, ExecutorCall, ExecutorLane, ExecutorTarget, LaneExecutor};
pub use subprocess::{build_argv, sanitized_env, SubprocessLane};

/// Everything a lane needs to start
#[derive(Debug, Clone)]
pub struct LaneContext {
    pub prompt: String,
    pub cwd: PathBuf,
    /// Log artifact path; executors may append to it directly
    pub log_path: Option<PathBuf>,
    /// Shared cancellation signal for the run
    pub cancel: CancellationToken,
}

/// Kind of lane, for logging and recovery decisions
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LaneKind {
    Subprocess,
    RemoteExecutor,
    HostedApi,
}

impl LaneKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Subprocess => "subprocess",
            Self::RemoteExecutor => "remote_executor",
            Self::HostedApi => "hosted_api",
        }
    }

    /// Executor lanes may write output the in-memory stream never saw
    pub fn recovers_from_log(&self) -> bool {
        matches!(self, Self::RemoteExecutor | Self::HostedApi)
    }
}

/// The execution strategy selected for a run
pub enum Lane {
    Subprocess(SubprocessLane),
    /// OAuth-backed remote executor
    RemoteExecutor(ExecutorLane),
    /// Hosted API executor
    HostedApi(ExecutorLane),
}

impl Lane {
    pub fn kind(&self) -> LaneKind {
        match self {
            Self::Subprocess(_) => LaneKind::Subprocess,
            Self::RemoteExecutor(_) => LaneKind::RemoteExecutor,
            Self::HostedApi(_) => LaneKind::HostedApi,
        }
    }

    /// Start the lane. Fails only if the lane could not be launched at all.
    pub async fn start(self, ctx: LaneContext) -> Result<LaneSubscription> {
        match self {
            Self::Subprocess(lane) => lane.start(ctx).await,
            Self::RemoteExecutor(lane) | Self::HostedApi(lane) => lane.start(ctx),
        }
    }
}

/// How a started lane is stopped
pub(crate) enum Canceller {
    /// Kill the whole process tree, then signal
    ProcessTree {
        pid: Option<u32>,
        killer: Arc<dyn ProcessTreeKiller>,
        killed: AtomicBool,
        token: CancellationToken,
    },
    /// Signal only; the executor is trusted to stop promptly
    Cooperative { token: CancellationToken },
}

/// Scoped handle to a running lane.
///
/// Dropping or disposing it aborts every task the lane spawned.
pub struct LaneSubscription {
    events: mpsc::UnboundedReceiver<LaneEvent>,
    canceller: Canceller,
    tasks: Vec<AbortHandle>,
}

impl LaneSubscription {
    pub(crate) fn new(
        events: mpsc::UnboundedReceiver<LaneEvent>,
        canceller: Canceller,
        tasks: Vec<AbortHandle>,
    ) -> Self {
        Self {
            events,
            canceller,
            tasks,
        }
    }

    /// Next event, or `None` once the lane has dropped every sender
    pub async fn next_event(&mut self) -> Option<LaneEvent> {
        self.events.recv().await
    }

    /// Stop the lane. Safe to call more than once.
    pub async fn cancel(&self, reason: &str) {
        debug!("Cancelling lane: {}", reason);
        match &self.canceller {
            Canceller::ProcessTree {
                pid,
                killer,
                killed,
                token,
            } => {
                if !killed.swap(true, Ordering::SeqCst) {
                    if let Some(pid) = pid {
                        if let Err(e) = killer.kill_tree(*pid).await {
                            warn!("Failed to kill process tree {}: {}", pid, e);
                        }
                    }
                }
                token.cancel();
            }
            Canceller::Cooperative { token } => token.cancel(),
        }
    }

    /// Detach from the lane: stop listening and abort its tasks
    pub fn dispose(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        self.events.close();
        for task in self.tasks.drain(..) {
            task.abort();
        }
    }
}

impl Drop for LaneSubscription {
    fn drop(&mut self) {
        self.shutdown();
    }
}
