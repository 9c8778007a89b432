use pattern_core::{PatternStatus, StepStatus};
use tracing::error;

use crate::error::{OrchestratorError, Result};

pub struct StepStateMachine;

impl StepStateMachine {
    pub fn validate_transition(from: &StepStatus, to: &StepStatus) -> Result<()> {
        let allowed = Self::allowed_transitions(from);

        if allowed.contains(to) {
            Ok(())
        } else {
            Err(OrchestratorError::InvalidTransition {
                from: from.as_str().to_string(),
                to: to.as_str().to_string(),
            })
        }
    }

    fn allowed_transitions(from: &StepStatus) -> Vec<StepStatus> {
        match from {
            StepStatus::Pending => vec![StepStatus::Resolving],
            StepStatus::Resolving => vec![StepStatus::Bound, StepStatus::Failed],
            StepStatus::Bound => vec![StepStatus::Executing, StepStatus::Failed],
            StepStatus::Executing => vec![
                StepStatus::Succeeded,
                StepStatus::Failed,
                StepStatus::Degraded,
            ],
            StepStatus::Succeeded | StepStatus::Failed | StepStatus::Degraded => vec![],
        }
    }

    pub fn can_transition(from: &StepStatus, to: &StepStatus) -> bool {
        Self::validate_transition(from, to).is_ok()
    }
}

pub struct PatternStateMachine;

impl PatternStateMachine {
    pub fn validate_transition(from: &PatternStatus, to: &PatternStatus) -> Result<()> {
        let allowed = Self::allowed_transitions(from);

        if allowed.contains(to) {
            Ok(())
        } else {
            Err(OrchestratorError::InvalidTransition {
                from: from.as_str().to_string(),
                to: to.as_str().to_string(),
            })
        }
    }

    fn allowed_transitions(from: &PatternStatus) -> Vec<PatternStatus> {
        match from {
            PatternStatus::Pending => vec![PatternStatus::Running, PatternStatus::Aborted],
            PatternStatus::Running => vec![PatternStatus::Completed, PatternStatus::Aborted],
            PatternStatus::Completed | PatternStatus::Aborted => vec![],
        }
    }

    pub fn can_transition(from: &PatternStatus, to: &PatternStatus) -> bool {
        Self::validate_transition(from, to).is_ok()
    }
}

/// Tracks one step's status as the orchestrator drives it.
#[derive(Debug, Clone)]
pub struct StepLifecycle {
    step_id: String,
    status: StepStatus,
}

impl StepLifecycle {
    pub fn new(step_id: impl Into<String>) -> Self {
        Self {
            step_id: step_id.into(),
            status: StepStatus::Pending,
        }
    }

    pub fn status(&self) -> StepStatus {
        self.status
    }

    pub fn advance(&mut self, to: StepStatus) -> Result<()> {
        StepStateMachine::validate_transition(&self.status, &to)?;
        self.status = to;
        Ok(())
    }

    /// Move to a terminal status. An illegal move is logged, and the status
    /// is still set so the trace reflects what actually happened.
    pub fn finish(&mut self, to: StepStatus) {
        if let Err(e) = self.advance(to) {
            error!(step_id = %self.step_id, error = %e, "Step lifecycle violated");
            self.status = to;
        }
    }
}
