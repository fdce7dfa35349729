//! Run state machine for the orchestration sequence.
//!
//! A run moves strictly forward through the working states and ends in one of
//! two terminal states. There is no resumption: a new run starts from
//! [`RunState::NotStarted`].

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum StateError {
    #[error("Illegal state transition: {from} -> {to}")]
    IllegalTransition { from: RunState, to: RunState },
}

/// States of a single CMOS run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum RunState {
    #[default]
    NotStarted,
    /// Searching attached block devices for the CMOS stick.
    Discovering,
    /// Copying images and concatenating fragments.
    Extracting,
    /// Checking that exactly one image was produced.
    Verifying,
    /// Finding the whole-disk device behind the CMOS partition.
    ResolvingTarget,
    /// External writer tool is running.
    Writing,
    PostProcessing,
    Succeeded,
    Failed,
}

impl fmt::Display for RunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RunState::NotStarted => write!(f, "NOT_STARTED"),
            RunState::Discovering => write!(f, "DISCOVERING"),
            RunState::Extracting => write!(f, "EXTRACTING"),
            RunState::Verifying => write!(f, "VERIFYING"),
            RunState::ResolvingTarget => write!(f, "RESOLVING_TARGET"),
            RunState::Writing => write!(f, "WRITING"),
            RunState::PostProcessing => write!(f, "POST_PROCESSING"),
            RunState::Succeeded => write!(f, "SUCCEEDED"),
            RunState::Failed => write!(f, "FAILED"),
        }
    }
}

impl RunState {
    /// Check if this is a terminal state.
    pub fn is_terminal(&self) -> bool {
        matches!(self, RunState::Succeeded | RunState::Failed)
    }

    /// The state that must follow this one on the success path.
    pub fn next(&self) -> Option<RunState> {
        match self {
            RunState::NotStarted => Some(RunState::Discovering),
            RunState::Discovering => Some(RunState::Extracting),
            RunState::Extracting => Some(RunState::Verifying),
            RunState::Verifying => Some(RunState::ResolvingTarget),
            RunState::ResolvingTarget => Some(RunState::Writing),
            RunState::Writing => Some(RunState::PostProcessing),
            RunState::PostProcessing => Some(RunState::Succeeded),
            RunState::Succeeded | RunState::Failed => None,
        }
    }

    /// Operator-facing `(status, description)` shown when the state is entered.
    pub fn label(&self) -> (&'static str, &'static str) {
        match self {
            RunState::NotStarted => ("Starting CMOS", "CMOS is starting."),
            RunState::Discovering => (
                "Step 1/5: Searching for CMOS USB",
                "This should take less than a minute.",
            ),
            RunState::Extracting => (
                "Step 2/5: Gather ISO File(s)",
                "Progress should be consistent and not stall out.",
            ),
            RunState::Verifying => (
                "Step 3/5: Verify ISO File(s)",
                "This should take less than a minute.",
            ),
            RunState::ResolvingTarget => (
                "Step 4/5: Get Top level device",
                "This should take less than a second.",
            ),
            RunState::Writing => ("Step 5/5: Run WoeUSB", "N/A"),
            RunState::PostProcessing => (
                "CMOS has completed successfully!",
                "It is now safe to shutdown your PC.",
            ),
            RunState::Succeeded => ("CMOS has completed successfully!", "Done."),
            RunState::Failed => ("CMOS experienced a failure!", "Error occurred."),
        }
    }
}

/// Tracks the current state of a run and enforces legal transitions.
#[derive(Debug, Default)]
pub struct RunStateMachine {
    state: RunState,
    /// Last non-terminal state entered before the run ended.
    last_working: Option<RunState>,
}

impl RunStateMachine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> RunState {
        self.state
    }

    /// The working state the run was in when it failed or finished.
    pub fn last_working_state(&self) -> Option<RunState> {
        self.last_working
    }

    /// Move to the next state on the success path.
    pub fn advance(&mut self, to: RunState) -> Result<(), StateError> {
        if self.state.next() != Some(to) {
            return Err(StateError::IllegalTransition {
                from: self.state,
                to,
            });
        }
        self.goto_state(to);
        Ok(())
    }

    /// Enter [`RunState::Failed`] from any non-terminal state.
    pub fn fail(&mut self) -> Result<(), StateError> {
        if self.state.is_terminal() {
            return Err(StateError::IllegalTransition {
                from: self.state,
                to: RunState::Failed,
            });
        }
        self.goto_state(RunState::Failed);
        Ok(())
    }

    fn goto_state(&mut self, new_state: RunState) {
        tracing::info!(from = %self.state, to = %new_state, "State transition");
        if !self.state.is_terminal() {
            self.last_working = Some(self.state);
        }
        self.state = new_state;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_forward_path_reaches_succeeded() {
        let mut machine = RunStateMachine::new();
        let mut state = RunState::NotStarted;
        while let Some(next) = state.next() {
            machine.advance(next).unwrap();
            state = next;
        }
        assert_eq!(machine.state(), RunState::Succeeded);
        assert_eq!(machine.last_working_state(), Some(RunState::PostProcessing));
    }

    #[test]
    fn test_skipping_a_phase_is_rejected() {
        let mut machine = RunStateMachine::new();
        machine.advance(RunState::Discovering).unwrap();
        let err = machine.advance(RunState::Verifying).unwrap_err();
        assert_eq!(
            err,
            StateError::IllegalTransition {
                from: RunState::Discovering,
                to: RunState::Verifying,
            }
        );
        assert_eq!(machine.state(), RunState::Discovering);
    }

    #[test]
    fn test_fail_remembers_working_state() {
        let mut machine = RunStateMachine::new();
        machine.advance(RunState::Discovering).unwrap();
        machine.advance(RunState::Extracting).unwrap();
        machine.fail().unwrap();

        assert_eq!(machine.state(), RunState::Failed);
        assert_eq!(machine.last_working_state(), Some(RunState::Extracting));
    }

    #[test]
    fn test_terminal_states_are_final() {
        let mut machine = RunStateMachine::new();
        machine.fail().unwrap();
        assert!(machine.fail().is_err());
        assert!(machine.advance(RunState::Discovering).is_err());
        assert!(RunState::Failed.is_terminal());
        assert!(RunState::Succeeded.is_terminal());
        assert!(!RunState::Writing.is_terminal());
    }
}
