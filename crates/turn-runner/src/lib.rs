//! Turn Runner - one-shot agent turn execution
//!
//! This crate runs a single prompt against an AI coding agent and returns one
//! result. The agent runs through one of three lanes: a local CLI subprocess
//! (Claude Code, Codex, Gemini, OpenCode, ...), an OAuth-backed remote executor,
//! or a hosted API executor. Output is streamed to a per-run log file and an
//! optional broadcast sink, then reduced to a short reply or returned raw.

mod accumulator;
mod broadcast;
mod config;
mod controller;
mod error;
mod event;
mod extract;
mod lane;
mod log_sink;
mod policy;
mod process_tree;
mod request;
mod session;

pub use accumulator::StreamAccumulator;
pub use broadcast::{
    BroadcastEvent, BroadcastSink, ChannelBroadcast, CliOutputPayload, NoopBroadcast,
    CLI_OUTPUT_EVENT,
};
pub use config::{env_flag, ModelDefaults, ProviderModelConfig, RunnerConfig, StaticModelConfig};
pub use controller::{RunController, CANCELLED_BY_CALLER};
pub use error::{Result, RunnerError};
pub use event::{LaneEvent, OutputStream};
pub use extract::{acknowledgment, extract, ExtractionInput};
pub use lane::{ChunkWriter, ExecutorCall, ExecutorTarget, LaneExecutor, LaneKind};
pub use log_sink::LogSink;
pub use policy::scan as scan_for_tool_use;
pub use process_tree::{ProcessTreeKiller, SystemProcessTreeKiller};
pub use request::{
    AgentIdentity, Language, Provider, RunOptions, RunRequest, RunResult, TerminalMode,
    DEFAULT_TIMEOUT_MS,
};
pub use session::{RunSession, SessionState};

// Re-export so executors can be written without a direct tokio-util dependency
pub use tokio_util::sync::CancellationToken;
