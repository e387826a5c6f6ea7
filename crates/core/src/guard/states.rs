use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GoalState {
    #[default]
    Idle,
    Validating,
    Blocked,
    Planning,
    Executing,
    Completed,
}

impl GoalState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Validating => "validating",
            Self::Blocked => "blocked",
            Self::Planning => "planning",
            Self::Executing => "executing",
            Self::Completed => "completed",
        }
    }
}

impl fmt::Display for GoalState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GuardEvent {
    ValidationStarted,
    PolicyBlocked,
    PolicyCleared,
    BudgetExceeded,
    ExecutionStarted,
    ExecutionFinished,
    RolledBack,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransitionOutcome {
    pub from: GoalState,
    pub to: GoalState,
    pub event: GuardEvent,
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum GuardTransitionError {
    #[error("invalid guard transition from {state} using event {event:?}")]
    InvalidTransition { state: GoalState, event: GuardEvent },
}

/// Validation may restart from any state and rollback always returns to
/// idle; every other edge is fixed.
pub fn transition(
    current: GoalState,
    event: GuardEvent,
) -> Result<TransitionOutcome, GuardTransitionError> {
    use GoalState::{Blocked, Completed, Executing, Idle, Planning, Validating};
    use GuardEvent::{
        BudgetExceeded, ExecutionFinished, ExecutionStarted, PolicyBlocked, PolicyCleared,
        RolledBack, ValidationStarted,
    };

    let to = match (current, event) {
        (_, ValidationStarted) => Validating,
        (Validating, PolicyBlocked) => Blocked,
        (Validating, PolicyCleared) => Planning,
        (Planning, BudgetExceeded) => Blocked,
        (Planning, ExecutionStarted) => Executing,
        (Executing, ExecutionFinished) => Completed,
        (_, RolledBack) => Idle,
        _ => return Err(GuardTransitionError::InvalidTransition { state: current, event }),
    };

    Ok(TransitionOutcome { from: current, to, event })
}

#[cfg(test)]
mod tests {
    use super::{transition, GoalState, GuardEvent, GuardTransitionError};

    const STATES: [GoalState; 6] = [
        GoalState::Idle,
        GoalState::Validating,
        GoalState::Blocked,
        GoalState::Planning,
        GoalState::Executing,
        GoalState::Completed,
    ];

    #[test]
    fn happy_path_reaches_completed() {
        let mut state = GoalState::default();
        for event in [
            GuardEvent::ValidationStarted,
            GuardEvent::PolicyCleared,
            GuardEvent::ExecutionStarted,
            GuardEvent::ExecutionFinished,
        ] {
            state = transition(state, event).expect("valid edge").to;
        }
        assert_eq!(state, GoalState::Completed);
    }

    #[test]
    fn validation_and_rollback_are_reachable_from_every_state() {
        for state in STATES {
            assert_eq!(
                transition(state, GuardEvent::ValidationStarted).expect("re-entry").to,
                GoalState::Validating
            );
            assert_eq!(
                transition(state, GuardEvent::RolledBack).expect("rollback").to,
                GoalState::Idle
            );
        }
    }

    #[test]
    fn execution_cannot_skip_validation() {
        let error = transition(GoalState::Idle, GuardEvent::ExecutionStarted)
            .expect_err("idle cannot execute");
        assert_eq!(
            error,
            GuardTransitionError::InvalidTransition {
                state: GoalState::Idle,
                event: GuardEvent::ExecutionStarted
            }
        );
        assert!(transition(GoalState::Blocked, GuardEvent::PolicyCleared).is_err());
        assert!(transition(GoalState::Completed, GuardEvent::ExecutionFinished).is_err());
    }

    #[test]
    fn budget_failure_blocks_from_planning_only() {
        assert_eq!(
            transition(GoalState::Planning, GuardEvent::BudgetExceeded).expect("edge").to,
            GoalState::Blocked
        );
        assert!(transition(GoalState::Executing, GuardEvent::BudgetExceeded).is_err());
    }
}
