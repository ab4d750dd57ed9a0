//! Per-run session state

use std::time::Instant;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::accumulator::StreamAccumulator;
use crate::log_sink::LogSink;
use crate::request::{Provider, TerminalMode};

/// Lifecycle of a run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    Idle,
    Starting,
    Streaming,
    /// The lane finished on its own (success, failure or closed stream)
    Completing,
    /// Timeout, policy violation or external cancellation
    Cancelling,
    Finalizing,
    Done,
}

impl SessionState {
    /// Check if the state is terminal
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Done)
    }

    pub fn can_transition_to(&self, next: SessionState) -> bool {
        use SessionState::{Cancelling, Completing, Done, Finalizing, Idle, Starting, Streaming};
        matches!(
            (self, next),
            (Idle, Starting)
                | (Starting, Streaming)
                | (Starting, Finalizing)
                | (Streaming, Completing)
                | (Streaming, Cancelling)
                | (Completing, Finalizing)
                | (Cancelling, Finalizing)
                | (Finalizing, Done)
        )
    }
}

/// Mutable state of one run, owned exclusively by the controller
#[derive(Debug)]
pub struct RunSession {
    /// Unique session ID
    pub id: Uuid,
    pub provider: Provider,
    state: SessionState,
    settled: bool,
    mode: TerminalMode,
    exit_code: i32,
    violation: bool,
    accumulator: StreamAccumulator,
    log: LogSink,
    started_at: Instant,
}

impl RunSession {
    pub fn new(provider: Provider, log: LogSink) -> Self {
        Self {
            id: Uuid::new_v4(),
            provider,
            state: SessionState::Idle,
            settled: false,
            mode: TerminalMode::Success,
            exit_code: 0,
            violation: false,
            accumulator: StreamAccumulator::new(),
            log,
            started_at: Instant::now(),
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Move to `next`. Invalid transitions are logged and ignored.
    pub fn transition(&mut self, next: SessionState) -> bool {
        if !self.state.can_transition_to(next) {
            warn!(
                "Session {} ignored invalid transition {:?} -> {:?}",
                self.id, self.state, next
            );
            return false;
        }
        debug!("Session {}: {:?} -> {:?}", self.id, self.state, next);
        self.state = next;
        true
    }

    /// Record how the run ended. Only the first call wins; later calls return `false`.
    pub fn settle(&mut self, mode: TerminalMode) -> bool {
        if self.settled {
            debug!("Session {} already settled, discarding {:?}", self.id, mode);
            return false;
        }
        self.settled = true;
        self.mode = mode;
        true
    }

    pub fn is_settled(&self) -> bool {
        self.settled
    }

    pub fn mode(&self) -> &TerminalMode {
        &self.mode
    }

    pub fn record_exit(&mut self, exit_code: i32) {
        self.exit_code = exit_code;
    }

    pub fn exit_code(&self) -> i32 {
        self.exit_code
    }

    pub fn flag_violation(&mut self) {
        self.violation = true;
    }

    pub fn violation_flagged(&self) -> bool {
        self.violation
    }

    pub fn accumulate(&mut self, chunk: &str) {
        self.accumulator.push(chunk);
    }

    pub fn accumulator(&self) -> &StreamAccumulator {
        &self.accumulator
    }

    pub fn log(&self) -> &LogSink {
        &self.log
    }

    pub fn elapsed_ms(&self) -> u64 {
        self.started_at.elapsed().as_millis() as u64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_creation() {
        let session = RunSession::new(Provider::Claude, LogSink::disabled());

        assert!(!session.id.is_nil());
        assert_eq!(session.state(), SessionState::Idle);
        assert_eq!(session.exit_code(), 0);
        assert_eq!(session.mode(), &TerminalMode::Success);
        assert!(!session.is_settled());
    }

    #[test]
    fn test_happy_path_transitions() {
        let mut session = RunSession::new(Provider::Codex, LogSink::disabled());
        for next in [
            SessionState::Starting,
            SessionState::Streaming,
            SessionState::Completing,
            SessionState::Finalizing,
            SessionState::Done,
        ] {
            assert!(session.transition(next));
        }
        assert!(session.state().is_terminal());
    }

    #[test]
    fn test_cancelling_only_from_streaming() {
        let mut session = RunSession::new(Provider::Codex, LogSink::disabled());
        assert!(!session.transition(SessionState::Cancelling));
        session.transition(SessionState::Starting);
        assert!(!session.transition(SessionState::Cancelling));
        session.transition(SessionState::Streaming);
        assert!(session.transition(SessionState::Cancelling));
        assert!(!session.transition(SessionState::Streaming));
    }

    #[test]
    fn test_done_is_never_left() {
        let mut session = RunSession::new(Provider::Codex, LogSink::disabled());
        session.transition(SessionState::Starting);
        session.transition(SessionState::Finalizing);
        session.transition(SessionState::Done);
        assert!(!session.transition(SessionState::Starting));
        assert!(!session.transition(SessionState::Finalizing));
    }

    #[test]
    fn test_first_settle_wins() {
        let mut session = RunSession::new(Provider::Claude, LogSink::disabled());
        assert!(session.settle(TerminalMode::Timeout("timeout after 5ms".into())));
        assert!(!session.settle(TerminalMode::Success));
        assert_eq!(
            session.mode(),
            &TerminalMode::Timeout("timeout after 5ms".into())
        );
    }
}
