//! Variant pipeline state machine: explicit states and legal transition guards.
//!
//! The orchestrator loop calls `advance()` to move between stages. Each call
//! validates that the transition is legal and records it with a timestamp, so
//! a finished run carries an auditable trace of exactly which path it took
//! through Planner → (Writer → Critic)* → Accepted | Exhausted.

use std::fmt;
use std::time::Instant;

use serde::{Deserialize, Serialize};

use crate::error::PipelineError;

/// The stages of one variant run.
///
/// Every run starts at `Planning` (even when a pre-existing plan skips the
/// planner call) and terminates at `Accepted` or `Exhausted`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VariantState {
    /// Running the planner, or adopting a reused plan.
    Planning,
    /// Running the writer for the current attempt.
    Writing,
    /// Running the critic and merging lint warnings.
    Critiquing,
    /// Draft accepted: critic PASS with zero merged gaps. Terminal.
    Accepted,
    /// Attempt budget consumed without acceptance. Terminal.
    Exhausted,
}

impl VariantState {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Accepted | Self::Exhausted)
    }
}

impl fmt::Display for VariantState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Planning => write!(f, "Planning"),
            Self::Writing => write!(f, "Writing"),
            Self::Critiquing => write!(f, "Critiquing"),
            Self::Accepted => write!(f, "Accepted"),
            Self::Exhausted => write!(f, "Exhausted"),
        }
    }
}

/// Legal edges in the state graph:
/// ```text
/// Planning → Writing
/// Writing → Critiquing
/// Critiquing → Writing | Accepted | Exhausted
/// ```
fn is_legal_transition(from: VariantState, to: VariantState) -> bool {
    use VariantState::*;
    matches!(
        (from, to),
        (Planning, Writing)
            | (Writing, Critiquing)
            | (Critiquing, Writing)
            | (Critiquing, Accepted)
            | (Critiquing, Exhausted)
    )
}

/// A single recorded transition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransitionRecord {
    pub from: VariantState,
    pub to: VariantState,
    /// Attempt number at the time of transition (0 before the first write).
    pub attempt: u32,
    /// Milliseconds since the state machine was created.
    pub elapsed_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

/// Tracks the current stage, enforces legal transitions, and keeps the full
/// transition log for diagnostics.
pub struct VariantStateMachine {
    current: VariantState,
    attempt: u32,
    created_at: Instant,
    transitions: Vec<TransitionRecord>,
}

impl VariantStateMachine {
    pub fn new() -> Self {
        Self {
            current: VariantState::Planning,
            attempt: 0,
            created_at: Instant::now(),
            transitions: Vec::new(),
        }
    }

    pub fn current(&self) -> VariantState {
        self.current
    }

    pub fn set_attempt(&mut self, attempt: u32) {
        self.attempt = attempt;
    }

    /// Advance to `to`, or fail with an internal error if the edge is not in
    /// the state graph. An illegal transition is an orchestrator bug, never a
    /// model failure.
    pub fn advance(&mut self, to: VariantState, reason: Option<&str>) -> Result<(), PipelineError> {
        if !is_legal_transition(self.current, to) {
            return Err(PipelineError::IllegalTransition(format!(
                "{} → {}",
                self.current, to
            )));
        }

        tracing::debug!(
            from = %self.current,
            to = %to,
            attempt = self.attempt,
            "Variant state transition"
        );

        self.transitions.push(TransitionRecord {
            from: self.current,
            to,
            attempt: self.attempt,
            elapsed_ms: self.created_at.elapsed().as_millis() as u64,
            reason: reason.map(String::from),
        });
        self.current = to;
        Ok(())
    }

    pub fn is_terminal(&self) -> bool {
        self.current.is_terminal()
    }

    pub fn transitions(&self) -> &[TransitionRecord] {
        &self.transitions
    }
}

impl Default for VariantStateMachine {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn initial_state_is_planning() {
        let sm = VariantStateMachine::new();
        assert_eq!(sm.current(), VariantState::Planning);
        assert!(!sm.is_terminal());
        assert!(sm.transitions().is_empty());
    }

    #[test]
    fn single_attempt_accept_path() {
        let mut sm = VariantStateMachine::new();
        sm.advance(VariantState::Writing, None).unwrap();
        sm.set_attempt(1);
        sm.advance(VariantState::Critiquing, None).unwrap();
        sm.advance(VariantState::Accepted, Some("critic PASS, no gaps"))
            .unwrap();
        assert!(sm.is_terminal());
        assert_eq!(sm.transitions().len(), 3);
    }

    #[test]
    fn retry_loop_then_exhaustion() {
        let mut sm = VariantStateMachine::new();
        sm.advance(VariantState::Writing, None).unwrap();
        sm.set_attempt(1);
        sm.advance(VariantState::Critiquing, None).unwrap();
        sm.advance(VariantState::Writing, Some("critic FAIL, retrying"))
            .unwrap();
        sm.set_attempt(2);
        sm.advance(VariantState::Critiquing, None).unwrap();
        sm.advance(VariantState::Exhausted, Some("attempt budget consumed"))
            .unwrap();
        assert_eq!(sm.current(), VariantState::Exhausted);
        assert_eq!(sm.transitions().len(), 5);
        assert_eq!(sm.transitions()[4].attempt, 2);
    }

    #[test]
    fn cannot_skip_writer() {
        let mut sm = VariantStateMachine::new();
        let err = sm.advance(VariantState::Critiquing, None).unwrap_err();
        assert!(matches!(err, PipelineError::IllegalTransition(_)));
        assert!(err.to_string().contains("Planning"));
    }

    #[test]
    fn cannot_leave_terminal_state() {
        let mut sm = VariantStateMachine::new();
        sm.advance(VariantState::Writing, None).unwrap();
        sm.advance(VariantState::Critiquing, None).unwrap();
        sm.advance(VariantState::Accepted, None).unwrap();
        assert!(sm.advance(VariantState::Writing, None).is_err());
    }

    #[test]
    fn transition_record_serde_roundtrip() {
        let record = TransitionRecord {
            from: VariantState::Critiquing,
            to: VariantState::Writing,
            attempt: 1,
            elapsed_ms: 2500,
            reason: Some("critic FAIL".into()),
        };
        let json = serde_json::to_string(&record).unwrap();
        let restored: TransitionRecord = serde_json::from_str(&json).unwrap();
        assert_eq!(restored.from, VariantState::Critiquing);
        assert_eq!(restored.to, VariantState::Writing);
        assert_eq!(restored.reason.as_deref(), Some("critic FAIL"));
    }
}
