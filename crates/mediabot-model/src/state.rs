//! Job lifecycle state machine.
//!
//! # Design
//! - The transition table is the single source of truth; every arc the
//!   driver takes must appear in it.
//! - History is append-only; the machine can be re-materialised from a
//!   persisted `(state, history)` pair after a restart.
//! - CANCELLED is deliberately not terminal: a cancelled job may re-enter
//!   PENDING on retry, exactly like FAILED.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{PipelineError, PipelineResult};

/// Lifecycle states a job moves through.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobState {
    /// Accepted, not yet started.
    Pending,
    /// Fetching bytes through the downloader router.
    Downloading,
    /// Probing the payload.
    Analyzing,
    /// Measuring audio/video offsets and deciding a correction.
    Syncing,
    /// Running mux and sample-generation steps.
    Processing,
    /// Verifying the processed output.
    Validating,
    /// Output assembled and manifested.
    Packaged,
    /// Package delivered to the configured target.
    Uploaded,
    /// Terminal success.
    Done,
    /// Terminal failure; retry re-enters PENDING.
    Failed,
    /// Stopped on request; retry re-enters PENDING.
    Cancelled,
}

impl JobState {
    /// Stable label used in persistence, progress records, and the API.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "PENDING",
            Self::Downloading => "DOWNLOADING",
            Self::Analyzing => "ANALYZING",
            Self::Syncing => "SYNCING",
            Self::Processing => "PROCESSING",
            Self::Validating => "VALIDATING",
            Self::Packaged => "PACKAGED",
            Self::Uploaded => "UPLOADED",
            Self::Done => "DONE",
            Self::Failed => "FAILED",
            Self::Cancelled => "CANCELLED",
        }
    }

    /// Parse a persisted label back into a state.
    #[must_use]
    pub fn parse(label: &str) -> Option<Self> {
        match label {
            "PENDING" => Some(Self::Pending),
            "DOWNLOADING" => Some(Self::Downloading),
            "ANALYZING" => Some(Self::Analyzing),
            "SYNCING" => Some(Self::Syncing),
            "PROCESSING" => Some(Self::Processing),
            "VALIDATING" => Some(Self::Validating),
            "PACKAGED" => Some(Self::Packaged),
            "UPLOADED" => Some(Self::Uploaded),
            "DONE" => Some(Self::Done),
            "FAILED" => Some(Self::Failed),
            "CANCELLED" => Some(Self::Cancelled),
            _ => None,
        }
    }

    /// States reachable from `self` in one legal transition.
    #[must_use]
    pub const fn allowed_transitions(self) -> &'static [Self] {
        match self {
            Self::Pending => &[Self::Downloading, Self::Cancelled, Self::Failed],
            Self::Downloading => &[Self::Analyzing, Self::Cancelled, Self::Failed],
            Self::Analyzing => &[
                Self::Syncing,
                Self::Processing,
                Self::Cancelled,
                Self::Failed,
            ],
            Self::Syncing => &[Self::Processing, Self::Cancelled, Self::Failed],
            Self::Processing => &[Self::Validating, Self::Cancelled, Self::Failed],
            Self::Validating => &[
                Self::Packaged,
                Self::Processing,
                Self::Cancelled,
                Self::Failed,
            ],
            Self::Packaged => &[Self::Uploaded, Self::Cancelled, Self::Failed],
            Self::Uploaded => &[Self::Done, Self::Cancelled, Self::Failed],
            Self::Done => &[],
            Self::Failed | Self::Cancelled => &[Self::Pending],
        }
    }

    /// Whether the state ends the job for good. CANCELLED is retryable and
    /// therefore not terminal.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Done | Self::Failed)
    }
}

/// One immutable entry in a job's state history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StateTransition {
    /// State the job left.
    pub from: JobState,
    /// State the job entered.
    pub to: JobState,
    /// When the transition was taken.
    pub at: DateTime<Utc>,
    /// Optional human-readable cause (e.g. `revalidate`, `retry`).
    pub reason: Option<String>,
    /// Optional structured context recorded with the transition.
    pub metadata: Option<serde_json::Value>,
}

/// In-memory transition gate for a single job.
///
/// Held exclusively by the job's pipeline driver; transitions are
/// serialised by that task, never by locking here.
#[derive(Debug, Clone)]
pub struct StateMachine {
    job_id: String,
    state: JobState,
    history: Vec<StateTransition>,
}

impl StateMachine {
    /// Fresh machine for a newly created job.
    #[must_use]
    pub fn new(job_id: impl Into<String>) -> Self {
        Self {
            job_id: job_id.into(),
            state: JobState::Pending,
            history: Vec::new(),
        }
    }

    /// Reconstruct a machine from persisted state and history.
    ///
    /// # Errors
    ///
    /// Returns `Validation` if the history's latest entry disagrees with
    /// the claimed current state, or if any recorded arc is not in the
    /// transition table.
    pub fn from_parts(
        job_id: impl Into<String>,
        state: JobState,
        history: Vec<StateTransition>,
    ) -> PipelineResult<Self> {
        for entry in &history {
            if !entry.from.allowed_transitions().contains(&entry.to) {
                return Err(PipelineError::Validation {
                    field: "history",
                    reason: format!(
                        "recorded transition {} -> {} is not legal",
                        entry.from.as_str(),
                        entry.to.as_str()
                    ),
                });
            }
        }
        if let Some(last) = history.last() {
            if last.to != state {
                return Err(PipelineError::Validation {
                    field: "state",
                    reason: format!(
                        "current state {} does not match last transition target {}",
                        state.as_str(),
                        last.to.as_str()
                    ),
                });
            }
        } else if state != JobState::Pending {
            return Err(PipelineError::Validation {
                field: "state",
                reason: format!("empty history requires PENDING, found {}", state.as_str()),
            });
        }
        Ok(Self {
            job_id: job_id.into(),
            state,
            history,
        })
    }

    /// Identifier of the job this machine gates.
    #[must_use]
    pub fn job_id(&self) -> &str {
        &self.job_id
    }

    /// Current state.
    #[must_use]
    pub const fn current(&self) -> JobState {
        self.state
    }

    /// Append-only transition history, oldest first.
    #[must_use]
    pub fn history(&self) -> &[StateTransition] {
        &self.history
    }

    /// Whether the arc `current -> target` is in the transition table.
    #[must_use]
    pub fn can_transition_to(&self, target: JobState) -> bool {
        self.state.allowed_transitions().contains(&target)
    }

    /// Whether the job has reached DONE or FAILED.
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        self.state.is_terminal()
    }

    /// Take the arc to `target`, recording the transition.
    ///
    /// # Errors
    ///
    /// Returns `InvalidStateTransition` when the arc is not in the table;
    /// the machine is left untouched in that case.
    pub fn transition_to(
        &mut self,
        target: JobState,
        reason: Option<String>,
        metadata: Option<serde_json::Value>,
    ) -> PipelineResult<&StateTransition> {
        if !self.can_transition_to(target) {
            return Err(PipelineError::InvalidStateTransition {
                from: self.state.as_str(),
                to: target.as_str(),
            });
        }
        self.history.push(StateTransition {
            from: self.state,
            to: target,
            at: Utc::now(),
            reason,
            metadata,
        });
        self.state = target;
        Ok(self.history.last().expect("transition just appended"))
    }

    /// Decompose into `(state, history)` for persistence.
    #[must_use]
    pub fn into_parts(self) -> (JobState, Vec<StateTransition>) {
        (self.state, self.history)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn state_labels_round_trip() {
        let all = [
            JobState::Pending,
            JobState::Downloading,
            JobState::Analyzing,
            JobState::Syncing,
            JobState::Processing,
            JobState::Validating,
            JobState::Packaged,
            JobState::Uploaded,
            JobState::Done,
            JobState::Failed,
            JobState::Cancelled,
        ];
        for state in all {
            assert_eq!(JobState::parse(state.as_str()), Some(state));
        }
        assert_eq!(JobState::parse("pending"), None);
    }

    #[test]
    fn happy_path_is_fully_legal() {
        let mut machine = StateMachine::new("job-1");
        let path = [
            JobState::Downloading,
            JobState::Analyzing,
            JobState::Syncing,
            JobState::Processing,
            JobState::Validating,
            JobState::Packaged,
            JobState::Uploaded,
            JobState::Done,
        ];
        for target in path {
            machine
                .transition_to(target, None, None)
                .expect("legal transition");
        }
        assert!(machine.is_terminal());
        assert_eq!(machine.history().len(), 8);
    }

    #[test]
    fn illegal_arc_is_rejected_without_mutation() {
        let mut machine = StateMachine::new("job-1");
        let err = machine
            .transition_to(JobState::Analyzing, None, None)
            .expect_err("PENDING -> ANALYZING must be rejected");
        assert!(matches!(
            err,
            PipelineError::InvalidStateTransition {
                from: "PENDING",
                to: "ANALYZING"
            }
        ));
        assert_eq!(machine.current(), JobState::Pending);
        assert!(machine.history().is_empty());
    }

    #[test]
    fn cancelled_is_not_terminal_and_retries_to_pending() {
        let mut machine = StateMachine::new("job-1");
        machine
            .transition_to(JobState::Cancelled, Some("user".into()), None)
            .expect("cancel");
        assert!(!machine.is_terminal());
        machine
            .transition_to(JobState::Pending, Some("retry".into()), None)
            .expect("retry");
        assert_eq!(machine.current(), JobState::Pending);
    }

    #[test]
    fn validating_may_reenter_processing() {
        let mut machine = StateMachine::new("job-1");
        for target in [
            JobState::Downloading,
            JobState::Analyzing,
            JobState::Processing,
            JobState::Validating,
        ] {
            machine.transition_to(target, None, None).expect("legal");
        }
        machine
            .transition_to(JobState::Processing, Some("revalidate".into()), None)
            .expect("one-shot re-processing arc");
    }

    #[test]
    fn from_parts_round_trips() {
        let mut machine = StateMachine::new("job-1");
        machine
            .transition_to(JobState::Downloading, Some("start".into()), None)
            .expect("legal");
        machine
            .transition_to(JobState::Analyzing, None, None)
            .expect("legal");
        let snapshot = machine.clone();
        let (state, history) = machine.into_parts();
        let restored = StateMachine::from_parts("job-1", state, history).expect("reconstruct");
        assert_eq!(restored.current(), snapshot.current());
        assert_eq!(restored.history(), snapshot.history());
    }

    #[test]
    fn from_parts_rejects_inconsistent_state() {
        let history = vec![StateTransition {
            from: JobState::Pending,
            to: JobState::Downloading,
            at: Utc::now(),
            reason: None,
            metadata: None,
        }];
        let err = StateMachine::from_parts("job-1", JobState::Done, history)
            .expect_err("state must match last transition");
        assert!(matches!(err, PipelineError::Validation { field: "state", .. }));
    }
}
