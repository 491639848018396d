//! Per-node execution records

use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use lodestar_graph::NodeIndex;
use serde::{Deserialize, Serialize};

/// Lifecycle state of an action
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ActionStatus {
    #[default]
    Pending,
    Running,
    Passed,
    Failed,
    /// Failed and halted the rest of the run
    FailedAndAbort,
    /// Interrupted mid-flight by an abort, or its cached result was inconsistent
    Invalid,
    Skipped,
    Cached,
}

impl ActionStatus {
    pub fn is_terminal(self) -> bool {
        !matches!(self, Self::Pending | Self::Running)
    }

    /// Statuses that block required dependents and fail the run
    pub fn is_failure(self) -> bool {
        matches!(self, Self::Failed | Self::FailedAndAbort | Self::Invalid)
    }

    pub fn is_success(self) -> bool {
        matches!(self, Self::Passed | Self::Cached)
    }
}

impl fmt::Display for ActionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Passed => "passed",
            Self::Failed => "failed",
            Self::FailedAndAbort => "failed-and-abort",
            Self::Invalid => "invalid",
            Self::Skipped => "skipped",
            Self::Cached => "cached",
        };
        f.write_str(name)
    }
}

/// One try at running a task
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Attempt {
    /// 1-based
    pub index: usize,
    pub status: ActionStatus,
    pub duration: Duration,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub exit_code: Option<i32>,
    pub error: Option<String>,
}

impl Attempt {
    pub fn new(index: usize) -> Self {
        Self {
            index,
            status: ActionStatus::Running,
            duration: Duration::ZERO,
            started_at: Utc::now(),
            finished_at: None,
            exit_code: None,
            error: None,
        }
    }

    pub fn finish(
        &mut self,
        status: ActionStatus,
        duration: Duration,
        exit_code: Option<i32>,
        error: Option<String>,
    ) {
        self.status = status;
        self.duration = duration;
        self.exit_code = exit_code;
        self.error = error;
        self.finished_at = Some(Utc::now());
    }
}

/// Execution record for one node in one run.
///
/// Owned by the worker executing the node until it reaches a terminal
/// status; read-only afterwards.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Action {
    pub node_index: NodeIndex,
    pub label: String,
    pub status: ActionStatus,
    pub duration: Duration,
    pub attempts: Vec<Attempt>,
    /// Passed after at least one failed attempt
    pub flaky: bool,
    pub error: Option<String>,
    /// Why the action was skipped
    pub skip_reason: Option<String>,
    /// Fingerprint the action ran or was restored under
    pub hash: Option<String>,
    /// Original execution time of a cached result
    pub cached_duration: Option<Duration>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl Action {
    pub fn new(node_index: NodeIndex, label: impl Into<String>) -> Self {
        Self {
            node_index,
            label: label.into(),
            status: ActionStatus::Pending,
            duration: Duration::ZERO,
            attempts: Vec::new(),
            flaky: false,
            error: None,
            skip_reason: None,
            hash: None,
            cached_duration: None,
            created_at: Utc::now(),
            started_at: None,
            finished_at: None,
        }
    }

    pub fn start(&mut self) {
        self.status = ActionStatus::Running;
        self.started_at = Some(Utc::now());
    }

    /// Move to a terminal status
    pub fn finish(&mut self, status: ActionStatus, duration: Duration) {
        self.status = status;
        self.duration = duration;
        self.finished_at = Some(Utc::now());
        self.flaky = status == ActionStatus::Passed
            && self
                .attempts
                .iter()
                .any(|attempt| attempt.status.is_failure());
    }

    pub fn fail(&mut self, status: ActionStatus, duration: Duration, error: impl Into<String>) {
        self.error = Some(error.into());
        self.finish(status, duration);
    }

    pub fn skip(&mut self, reason: impl Into<String>) {
        self.skip_reason = Some(reason.into());
        self.finish(ActionStatus::Skipped, Duration::ZERO);
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_serializes_kebab_case() {
        assert_eq!(
            serde_json::to_string(&ActionStatus::FailedAndAbort).unwrap(),
            "\"failed-and-abort\""
        );
        assert_eq!(ActionStatus::FailedAndAbort.to_string(), "failed-and-abort");
        assert!(ActionStatus::Invalid.is_failure());
        assert!(!ActionStatus::Skipped.is_failure());
        assert!(ActionStatus::Skipped.is_terminal());
        assert!(!ActionStatus::Running.is_terminal());
    }

    #[test]
    fn test_flaky_after_retry() {
        let mut action = Action::new(NodeIndex(0), "app:test");
        action.start();

        let mut first = Attempt::new(1);
        first.finish(ActionStatus::Failed, Duration::from_secs(1), Some(1), None);
        let mut second = Attempt::new(2);
        second.finish(ActionStatus::Passed, Duration::from_secs(1), Some(0), None);
        action.attempts = vec![first, second];

        action.finish(ActionStatus::Passed, Duration::from_secs(2));
        assert!(action.flaky);
        assert!(action.is_terminal());
    }

    #[test]
    fn test_skip_records_reason() {
        let mut action = Action::new(NodeIndex(3), "app:build");
        action.skip("dependency failed");

        assert_eq!(action.status, ActionStatus::Skipped);
        assert_eq!(action.skip_reason.as_deref(), Some("dependency failed"));
        assert!(!action.flaky);

        let json = serde_json::to_value(&action).unwrap();
        assert_eq!(json["nodeIndex"], 3);
        assert_eq!(json["status"], "skipped");
        assert_eq!(json["duration"]["secs"], 0);
    }
}
