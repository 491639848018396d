//! Pipeline progress reporting

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use lodestar_core::format_duration;

use crate::action::ActionStatus;
use crate::report::RunSummary;

/// Events emitted while a pipeline runs
#[derive(Debug, Clone, PartialEq)]
pub enum PipelineEvent {
    /// The run is starting
    RunStarted {
        actions: usize,
        targets: Vec<String>,
    },
    /// An attempt at an action is starting
    ActionStarted {
        label: String,
        attempt: usize,
        command: String,
    },
    /// A running command produced a line of output
    Output {
        label: String,
        line: String,
        is_stderr: bool,
    },
    /// An action reached a terminal status other than skipped
    ActionFinished {
        label: String,
        status: ActionStatus,
        duration: Duration,
        error: Option<String>,
    },
    /// An action was skipped without running
    ActionSkipped {
        label: String,
        reason: String,
    },
    /// Every action is terminal
    RunFinished {
        summary: RunSummary,
        duration: Duration,
        cancelled: bool,
    },
}

/// Trait for reporting pipeline progress
pub trait TaskReporter: Send + Sync {
    /// Handle a pipeline event
    fn report(&self, event: &PipelineEvent);
}

/// Reporter that logs to tracing
#[derive(Debug, Default)]
pub struct TracingReporter;

impl TaskReporter for TracingReporter {
    fn report(&self, event: &PipelineEvent) {
        match event {
            PipelineEvent::RunStarted { actions, targets } => {
                tracing::info!(actions, targets = ?targets, "Starting run");
            }
            PipelineEvent::ActionStarted {
                label,
                attempt,
                command,
            } => {
                if *attempt > 1 {
                    tracing::info!("Retrying {} (attempt {}): {}", label, attempt, command);
                } else {
                    tracing::info!("Starting {}: {}", label, command);
                }
            }
            PipelineEvent::Output {
                label,
                line,
                is_stderr,
            } => {
                if *is_stderr {
                    tracing::warn!("[{}] {}", label, line);
                } else {
                    tracing::debug!("[{}] {}", label, line);
                }
            }
            PipelineEvent::ActionFinished {
                label,
                status,
                duration,
                error,
            } => match error {
                Some(error) => {
                    tracing::error!("{} {} after {}: {}", label, status, format_duration(*duration), error);
                }
                None => {
                    tracing::info!("{} {} in {}", label, status, format_duration(*duration));
                }
            },
            PipelineEvent::ActionSkipped { label, reason } => {
                tracing::info!("{} skipped: {}", label, reason);
            }
            PipelineEvent::RunFinished {
                summary,
                duration,
                cancelled,
            } => {
                tracing::info!(
                    cancelled,
                    "Run complete: {}/{} passed, {} cached, {} failed, {} skipped ({})",
                    summary.passed,
                    summary.total,
                    summary.cached,
                    summary.failed,
                    summary.skipped,
                    format_duration(*duration)
                );
            }
        }
    }
}

/// Reporter that collects events for later inspection
#[derive(Debug, Default)]
pub struct CollectingReporter {
    events: Mutex<Vec<PipelineEvent>>,
}

impl CollectingReporter {
    /// Get all collected events
    pub fn events(&self) -> Vec<PipelineEvent> {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Labels of started actions, in start order
    pub fn started(&self) -> Vec<String> {
        self.events()
            .into_iter()
            .filter_map(|event| match event {
                PipelineEvent::ActionStarted { label, attempt: 1, .. } => Some(label),
                _ => None,
            })
            .collect()
    }
}

impl TaskReporter for CollectingReporter {
    fn report(&self, event: &PipelineEvent) {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(event.clone());
    }
}

/// Fan-out to several reporters
pub struct TaskReporterRegistry {
    reporters: Vec<Arc<dyn TaskReporter>>,
}

impl TaskReporterRegistry {
    pub fn new() -> Self {
        Self {
            reporters: vec![Arc::new(TracingReporter)],
        }
    }

    pub fn empty() -> Self {
        Self {
            reporters: Vec::new(),
        }
    }

    pub fn register(&mut self, reporter: Arc<dyn TaskReporter>) {
        self.reporters.push(reporter);
    }

    pub fn all(&self) -> &[Arc<dyn TaskReporter>] {
        &self.reporters
    }
}

impl Default for TaskReporterRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl TaskReporter for TaskReporterRegistry {
    fn report(&self, event: &PipelineEvent) {
        for reporter in &self.reporters {
            reporter.report(event);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn started(label: &str, attempt: usize) -> PipelineEvent {
        PipelineEvent::ActionStarted {
            label: label.to_string(),
            attempt,
            command: "cargo build".to_string(),
        }
    }

    #[test]
    fn test_collecting_reporter() {
        let reporter = CollectingReporter::default();
        reporter.report(&started("core:build", 1));
        reporter.report(&started("core:build", 2));
        reporter.report(&PipelineEvent::ActionFinished {
            label: "core:build".to_string(),
            status: ActionStatus::Passed,
            duration: Duration::from_secs(5),
            error: None,
        });

        assert_eq!(reporter.events().len(), 3);
        assert_eq!(reporter.started(), vec!["core:build"]);
    }

    #[test]
    fn test_tracing_reporter_handles_every_event() {
        let reporter = TracingReporter;
        reporter.report(&started("core:build", 1));
        reporter.report(&PipelineEvent::ActionSkipped {
            label: "core:test".to_string(),
            reason: "dry run".to_string(),
        });
        reporter.report(&PipelineEvent::RunFinished {
            summary: RunSummary::default(),
            duration: Duration::from_secs(1),
            cancelled: false,
        });
    }

    #[test]
    fn test_registry_broadcasts() {
        let collecting = Arc::new(CollectingReporter::default());
        let mut registry = TaskReporterRegistry::empty();
        assert!(registry.all().is_empty());

        registry.register(collecting.clone());
        registry.register(Arc::new(TracingReporter));
        assert_eq!(registry.all().len(), 2);

        registry.report(&started("core:build", 1));
        assert_eq!(collecting.events().len(), 1);
    }
}
