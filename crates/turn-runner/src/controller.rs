//! Run controller - drives one agent turn from request to result

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::broadcast::{BroadcastSink, CliOutputPayload, NoopBroadcast, CLI_OUTPUT_EVENT};
use crate::config::{ProviderModelConfig, RunnerConfig, StaticModelConfig};
use crate::error::{Result, RunnerError};
use crate::event::{LaneEvent, OutputStream};
use crate::extract::{extract, normalize_chunk, ExtractionInput};
use crate::lane::{
    build_argv, sanitized_env, ExecutorCall, ExecutorLane, ExecutorTarget, Lane, LaneContext,
    LaneExecutor, LaneKind, LaneSubscription, SubprocessLane,
};
use crate::log_sink::open_or_disabled;
use crate::policy;
use crate::process_tree::{ProcessTreeKiller, SystemProcessTreeKiller};
use crate::request::{Provider, RunRequest, RunResult, TerminalMode, DEFAULT_TIMEOUT_MS};
use crate::session::{RunSession, SessionState};

/// Error reported when the caller cancels a run
pub const CANCELLED_BY_CALLER: &str = "cancelled by caller";

/// Executes one-shot agent turns.
///
/// Holds only shared, immutable collaborators; every call to [`execute`](Self::execute)
/// gets its own session, so one controller can serve concurrent runs.
pub struct RunController {
    config: RunnerConfig,
    models: Arc<dyn ProviderModelConfig>,
    broadcaster: Arc<dyn BroadcastSink>,
    killer: Arc<dyn ProcessTreeKiller>,
    remote_executor: Option<Arc<dyn LaneExecutor>>,
    hosted_executor: Option<Arc<dyn LaneExecutor>>,
}

impl RunController {
    /// Create a controller with no executors, no broadcast and no model defaults
    pub fn new(config: RunnerConfig) -> Self {
        Self {
            config,
            models: Arc::new(StaticModelConfig::new()),
            broadcaster: Arc::new(NoopBroadcast),
            killer: Arc::new(SystemProcessTreeKiller),
            remote_executor: None,
            hosted_executor: None,
        }
    }

    pub fn with_model_config(mut self, models: Arc<dyn ProviderModelConfig>) -> Self {
        self.models = models;
        self
    }

    pub fn with_broadcaster(mut self, broadcaster: Arc<dyn BroadcastSink>) -> Self {
        self.broadcaster = broadcaster;
        self
    }

    pub fn with_process_killer(mut self, killer: Arc<dyn ProcessTreeKiller>) -> Self {
        self.killer = killer;
        self
    }

    /// Executor for OAuth-backed providers
    pub fn with_remote_executor(mut self, executor: Arc<dyn LaneExecutor>) -> Self {
        self.remote_executor = Some(executor);
        self
    }

    /// Executor for the hosted API provider
    pub fn with_hosted_executor(mut self, executor: Arc<dyn LaneExecutor>) -> Self {
        self.hosted_executor = Some(executor);
        self
    }

    pub fn config(&self) -> &RunnerConfig {
        &self.config
    }

    /// Run one turn. Never fails: every failure is reported in [`RunResult::error`].
    pub async fn execute(&self, request: &RunRequest) -> RunResult {
        self.execute_with_cancel(request, CancellationToken::new())
            .await
    }

    /// Run one turn, stopping early when `cancel` fires
    pub async fn execute_with_cancel(
        &self,
        request: &RunRequest,
        cancel: CancellationToken,
    ) -> RunResult {
        let agent = &request.agent;
        let log = open_or_disabled(&self.config.log_dir, &agent.id);
        let mut session = RunSession::new(agent.provider.clone(), log);

        info!(
            "Starting run {} for agent {} ({})",
            session.id, agent.id, agent.provider
        );
        session.transition(SessionState::Starting);

        // Pick the lane and launch it
        let lane = self.select_lane(request);
        let lane_kind = lane.as_ref().ok().map(Lane::kind);
        if let Some(kind) = lane_kind {
            debug!("Run {} uses the {} lane", session.id, kind.as_str());
        }
        let ctx = LaneContext {
            prompt: request.prompt.clone(),
            cwd: request.options.project_path.clone(),
            log_path: session.log().path().map(|p| p.to_path_buf()),
            cancel: cancel.child_token(),
        };
        let started = match lane {
            Ok(lane) => lane.start(ctx).await,
            Err(e) => Err(e),
        };

        match started {
            Ok(mut subscription) => {
                session.transition(SessionState::Streaming);
                self.stream(&mut session, &mut subscription, request, &cancel)
                    .await;
                subscription.dispose();
            }
            Err(e) => {
                warn!("Run {} failed to start: {}", session.id, e);
                session.settle(TerminalMode::GenericError(e.to_string()));
            }
        }

        self.finalize(session, request, lane_kind).await
    }

    /// Resolve the lane for the request's provider
    fn select_lane(&self, request: &RunRequest) -> Result<Lane> {
        let agent = &request.agent;
        let defaults = self.models.lookup(&agent.provider).unwrap_or_default();
        let model = agent.model.clone().or(defaults.model);
        let reasoning_level = agent.reasoning_level.clone().or(defaults.reasoning_level);

        let executor_call = |target: ExecutorTarget| ExecutorCall {
            provider: agent.provider.clone(),
            prompt: request.prompt.clone(),
            cwd: request.options.project_path.clone(),
            model: model.clone(),
            reasoning_level: reasoning_level.clone(),
            target,
            log_path: None,
        };

        match &agent.provider {
            Provider::Copilot | Provider::Antigravity => {
                let executor = self.remote_executor.clone().ok_or_else(|| {
                    RunnerError::ExecutorMissing {
                        provider: agent.provider.to_string(),
                    }
                })?;
                let call = executor_call(ExecutorTarget::RemoteExecutor {
                    oauth_account_id: agent.oauth_account_id.clone(),
                });
                Ok(Lane::RemoteExecutor(ExecutorLane::new(executor, call)))
            }
            Provider::Api => {
                let executor = self.hosted_executor.clone().ok_or_else(|| {
                    RunnerError::ExecutorMissing {
                        provider: agent.provider.to_string(),
                    }
                })?;
                let call = executor_call(ExecutorTarget::HostedApi {
                    api_provider_id: agent.api_provider_id.clone(),
                    api_model: agent.api_model.clone().or_else(|| model.clone()),
                });
                Ok(Lane::HostedApi(ExecutorLane::new(executor, call)))
            }
            Provider::Claude
            | Provider::Codex
            | Provider::Gemini
            | Provider::Opencode
            | Provider::Other(_) => {
                let argv = match self.config.command_override(&agent.provider) {
                    Some(argv) => argv.to_vec(),
                    None => build_argv(
                        &agent.provider,
                        model.as_deref(),
                        reasoning_level.as_deref(),
                        &self.config.default_binary,
                    ),
                };
                let env = sanitized_env(std::env::vars_os(), &self.config.fallback_path);
                Ok(Lane::Subprocess(SubprocessLane::new(
                    agent.provider.clone(),
                    argv,
                    env,
                    Arc::clone(&self.killer),
                )))
            }
        }
    }

    /// Requests that keep the built-in default pick up the configured one
    fn timeout_ms(&self, request: &RunRequest) -> u64 {
        match request.options.timeout_ms {
            DEFAULT_TIMEOUT_MS => self.config.default_timeout_ms,
            ms => ms,
        }
    }

    /// Pump lane events until the run settles
    async fn stream(
        &self,
        session: &mut RunSession,
        subscription: &mut LaneSubscription,
        request: &RunRequest,
        cancel: &CancellationToken,
    ) {
        let timeout_ms = self.timeout_ms(request);
        let timer = tokio::time::sleep(Duration::from_millis(timeout_ms));
        tokio::pin!(timer);

        loop {
            tokio::select! {
                biased;

                _ = &mut timer => {
                    let reason = RunnerError::Timeout { timeout_ms }.to_string();
                    warn!("Run {} hit {}", session.id, reason);
                    self.cancel_lane(session, subscription, TerminalMode::Timeout(reason.clone()), &reason)
                        .await;
                    break;
                }
                _ = cancel.cancelled() => {
                    info!("Run {} cancelled by caller", session.id);
                    self.cancel_lane(
                        session,
                        subscription,
                        TerminalMode::GenericError(CANCELLED_BY_CALLER.to_string()),
                        CANCELLED_BY_CALLER,
                    )
                    .await;
                    break;
                }
                event = subscription.next_event() => match event {
                    Some(LaneEvent::Data { stream, chunk }) => {
                        if self.on_data(session, request, stream, &chunk) {
                            info!("Run {} blocked a tool call under the no-tools policy", session.id);
                            self.cancel_lane(
                                session,
                                subscription,
                                TerminalMode::NoToolsViolation,
                                TerminalMode::NO_TOOLS_REASON,
                            )
                            .await;
                            break;
                        }
                    }
                    Some(LaneEvent::Completed { exit_code }) => {
                        debug!("Run {} lane exited with code {}", session.id, exit_code);
                        session.record_exit(exit_code);
                        if session.settle(TerminalMode::Success) {
                            session.transition(SessionState::Completing);
                        }
                        break;
                    }
                    Some(LaneEvent::Error { message }) => {
                        warn!("Run {} lane failed: {}", session.id, message);
                        if session.settle(TerminalMode::GenericError(message)) {
                            session.transition(SessionState::Completing);
                        }
                        break;
                    }
                    None => {
                        let err = RunnerError::LaneClosed {
                            provider: session.provider.to_string(),
                        };
                        warn!("Run {}: {}", session.id, err);
                        if session.settle(TerminalMode::GenericError(err.to_string())) {
                            session.transition(SessionState::Completing);
                        }
                        break;
                    }
                },
            }
        }
    }

    /// Handle one data chunk. Returns `true` if it violates the no-tools policy.
    fn on_data(
        &self,
        session: &mut RunSession,
        request: &RunRequest,
        stream: OutputStream,
        chunk: &str,
    ) -> bool {
        let normalized = normalize_chunk(chunk, &session.provider);
        if normalized.is_empty() {
            return false;
        }

        session.log().write(&normalized);

        if let Some(task_id) = &request.options.stream_task_id {
            let payload = CliOutputPayload {
                task_id,
                stream,
                data: &normalized,
            };
            match serde_json::to_value(payload) {
                Ok(payload) => self.broadcaster.broadcast(CLI_OUTPUT_EVENT, payload),
                Err(e) => warn!("Failed to encode {} payload: {}", CLI_OUTPUT_EVENT, e),
            }
        }

        if request.options.no_tools && !session.violation_flagged() && policy::scan(&normalized) {
            session.flag_violation();
            return true;
        }

        session.accumulate(&normalized);
        false
    }

    /// Settle with `mode` and stop the lane, unless the run already settled
    async fn cancel_lane(
        &self,
        session: &mut RunSession,
        subscription: &LaneSubscription,
        mode: TerminalMode,
        reason: &str,
    ) {
        if !session.settle(mode) {
            return;
        }
        session.transition(SessionState::Cancelling);
        subscription.cancel(reason).await;
    }

    /// Close the log, recover executor output if needed, and extract the result
    async fn finalize(
        &self,
        mut session: RunSession,
        request: &RunRequest,
        lane_kind: Option<LaneKind>,
    ) -> RunResult {
        session.transition(SessionState::Finalizing);
        session.log().close_async().await;

        // Executors may have written straight to the log file
        let recover = lane_kind.is_some_and(|kind| kind.recovers_from_log())
            && session.accumulator().is_empty()
            && *session.mode() != TerminalMode::NoToolsViolation;
        if recover {
            if let Some(recovered) = session.log().read_back() {
                if !recovered.trim().is_empty() {
                    debug!(
                        "Run {} recovered {} bytes from its log",
                        session.id,
                        recovered.len()
                    );
                    let recovered = normalize_chunk(&recovered, &session.provider);
                    session.accumulate(&recovered);
                }
            }
        }

        let language = request.options.language.unwrap_or(self.config.language);
        let result = extract(&ExtractionInput {
            accumulated: session.accumulator().as_str(),
            exit_code: session.exit_code(),
            raw_output: request.options.raw_output,
            mode: session.mode(),
            provider: session.provider.as_str(),
            language,
        });

        session.transition(SessionState::Done);
        info!(
            "Run {} finished in {}ms (exit {}, {:?}, {} chunks{})",
            session.id,
            session.elapsed_ms(),
            session.exit_code(),
            session.mode(),
            session.accumulator().chunk_count(),
            result
                .error
                .as_deref()
                .map(|e| format!(", error: {}", e))
                .unwrap_or_default()
        );

        result
    }
}
