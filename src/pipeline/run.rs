//! Per-run state tracking and outcome types.
//!
//! A run moves strictly forward through
//! `Pending -> Acquiring -> Calling -> Validating -> Persisting -> Completed`
//! and may drop to `Failed` from any non-terminal state. Terminal states are
//! never left.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::domain::{PoolKey, QuestionId, QuestionType};
use crate::error::{QuizpoolError, Result};

/// Why a run ended without persisting anything.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// The concurrency gate had no slot.
    Rejected,
    /// Transient provider errors outlasted the retry budget.
    TransientExhausted,
    /// Provider error that retrying cannot fix.
    Permanent,
    /// Returned content did not pass validation.
    Validation,
    /// The batch could not be written.
    Storage,
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            FailureKind::Rejected => "rejected",
            FailureKind::TransientExhausted => "transient_exhausted",
            FailureKind::Permanent => "permanent",
            FailureKind::Validation => "validation",
            FailureKind::Storage => "storage",
        };
        write!(f, "{}", s)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailureReason {
    pub kind: FailureKind,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum RunState {
    Pending,
    Acquiring,
    Calling,
    Validating,
    Persisting,
    Completed,
    Failed(FailureReason),
}

impl RunState {
    fn rank(&self) -> u8 {
        match self {
            RunState::Pending => 0,
            RunState::Acquiring => 1,
            RunState::Calling => 2,
            RunState::Validating => 3,
            RunState::Persisting => 4,
            RunState::Completed | RunState::Failed(_) => 5,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, RunState::Completed | RunState::Failed(_))
    }

    pub fn name(&self) -> &'static str {
        match self {
            RunState::Pending => "pending",
            RunState::Acquiring => "acquiring",
            RunState::Calling => "calling",
            RunState::Validating => "validating",
            RunState::Persisting => "persisting",
            RunState::Completed => "completed",
            RunState::Failed(_) => "failed",
        }
    }
}

/// Tracks one run's state and enforces forward-only transitions.
#[derive(Debug, Clone)]
pub struct GenerationRun {
    pool: PoolKey,
    state: RunState,
}

impl GenerationRun {
    pub fn new(pool: PoolKey) -> Self {
        Self {
            pool,
            state: RunState::Pending,
        }
    }

    pub fn state(&self) -> &RunState {
        &self.state
    }

    pub fn advance(&mut self, next: RunState) -> Result<()> {
        let allowed = !self.state.is_terminal()
            && match &next {
                RunState::Failed(_) => true,
                RunState::Completed => self.state == RunState::Persisting,
                other => other.rank() > self.state.rank(),
            };
        if !allowed {
            return Err(QuizpoolError::InvalidState(format!(
                "run for {} cannot move from {} to {}",
                self.pool,
                self.state.name(),
                next.name()
            )));
        }
        tracing::debug!(pool = %self.pool, from = self.state.name(), to = next.name(), "Run state change");
        self.state = next;
        Ok(())
    }

    /// Move to `Failed`, ignoring the call if the run already ended.
    pub fn fail(&mut self, kind: FailureKind, message: impl Into<String>) {
        if !self.state.is_terminal() {
            self.state = RunState::Failed(FailureReason {
                kind,
                message: message.into(),
            });
        }
    }
}

/// Questions persisted by one successful run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeneratedBatch {
    pub pool: PoolKey,
    pub question_type: QuestionType,
    pub question_ids: Vec<QuestionId>,
    /// Provider attempts made, retries included.
    pub attempts: u32,
    /// Batched provider calls that succeeded.
    pub calls: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
#[error("generation for {pool} failed ({kind}) after {attempts} attempt(s): {message}")]
pub struct RunFailure {
    pub pool: PoolKey,
    pub question_type: QuestionType,
    pub kind: FailureKind,
    pub message: String,
    pub attempts: u32,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::UserId;

    fn run() -> GenerationRun {
        GenerationRun::new(PoolKey::new(UserId(1), "italian", "A2"))
    }

    #[test]
    fn test_happy_path_transitions() {
        let mut r = run();
        for next in [
            RunState::Acquiring,
            RunState::Calling,
            RunState::Validating,
            RunState::Persisting,
            RunState::Completed,
        ] {
            r.advance(next).unwrap();
        }
        assert_eq!(r.state(), &RunState::Completed);
    }

    #[test]
    fn test_terminal_state_is_never_left() {
        let mut r = run();
        r.advance(RunState::Acquiring).unwrap();
        r.fail(FailureKind::Rejected, "no slot");
        assert!(r.advance(RunState::Calling).is_err());
        assert!(
            r.advance(RunState::Failed(FailureReason {
                kind: FailureKind::Storage,
                message: "again".to_string()
            }))
            .is_err()
        );
        r.fail(FailureKind::Storage, "ignored");
        assert!(matches!(r.state(), RunState::Failed(reason) if reason.kind == FailureKind::Rejected));
    }

    #[test]
    fn test_states_are_not_reentered() {
        let mut r = run();
        r.advance(RunState::Acquiring).unwrap();
        r.advance(RunState::Calling).unwrap();
        assert!(r.advance(RunState::Calling).is_err());
        assert!(r.advance(RunState::Acquiring).is_err());
    }

    #[test]
    fn test_completed_only_after_persisting() {
        let mut r = run();
        r.advance(RunState::Acquiring).unwrap();
        assert!(r.advance(RunState::Completed).is_err());
    }

    #[test]
    fn test_failure_message() {
        let failure = RunFailure {
            pool: PoolKey::new(UserId(3), "spanish", "B1"),
            question_type: QuestionType::Vocabulary,
            kind: FailureKind::TransientExhausted,
            message: "timed out".to_string(),
            attempts: 3,
        };
        assert_eq!(
            failure.to_string(),
            "generation for 3/spanish/B1 failed (transient_exhausted) after 3 attempt(s): timed out"
        );
    }
}
