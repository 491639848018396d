//! Aggregated result of one pipeline run

use std::collections::HashMap;
use std::time::Duration;

use lodestar_core::{exit_codes, RunContext};
use lodestar_graph::{Graph, NodeIndex, NodeStyle};
use serde::{Deserialize, Serialize};

use crate::action::{Action, ActionStatus};

/// Action counts per outcome
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunSummary {
    pub total: usize,
    pub passed: usize,
    pub cached: usize,
    pub failed: usize,
    pub invalid: usize,
    pub skipped: usize,
    pub flaky: usize,
}

impl RunSummary {
    pub fn from_actions(actions: &[Action]) -> Self {
        let mut summary = Self {
            total: actions.len(),
            ..Default::default()
        };

        for action in actions {
            match action.status {
                ActionStatus::Passed => summary.passed += 1,
                ActionStatus::Cached => summary.cached += 1,
                ActionStatus::Failed | ActionStatus::FailedAndAbort => summary.failed += 1,
                ActionStatus::Invalid => summary.invalid += 1,
                ActionStatus::Skipped => summary.skipped += 1,
                ActionStatus::Pending | ActionStatus::Running => {}
            }
            if action.flaky {
                summary.flaky += 1;
            }
        }

        summary
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortBy {
    Time,
    Label,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Order {
    Asc,
    Desc,
}

/// Serializable outcome of a run. Immutable once the run completes.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunReport {
    pub actions: Vec<Action>,
    pub context: RunContext,
    pub duration: Duration,
    /// Longest chain of required dependencies, by action duration
    pub projected_duration: Duration,
    /// Original durations of every cached action
    pub estimated_savings: Duration,
    pub cancelled: bool,
    pub summary: RunSummary,
}

impl RunReport {
    pub fn new(
        actions: Vec<Action>,
        context: RunContext,
        duration: Duration,
        graph: &Graph,
        cancelled: bool,
    ) -> Self {
        let projected_duration = critical_path(graph, &actions);
        let estimated_savings = actions
            .iter()
            .filter(|action| action.status == ActionStatus::Cached)
            .filter_map(|action| action.cached_duration)
            .sum();
        let summary = RunSummary::from_actions(&actions);

        Self {
            actions,
            context,
            duration,
            projected_duration,
            estimated_savings,
            cancelled,
            summary,
        }
    }

    pub fn action(&self, label: &str) -> Option<&Action> {
        self.actions.iter().find(|action| action.label == label)
    }

    pub fn sorted_actions(&self, by: SortBy, order: Order) -> Vec<&Action> {
        let mut actions: Vec<&Action> = self.actions.iter().collect();
        match by {
            SortBy::Time => actions.sort_by_key(|action| action.duration),
            SortBy::Label => actions.sort_by(|a, b| a.label.cmp(&b.label)),
        }
        if order == Order::Desc {
            actions.reverse();
        }
        actions
    }

    pub fn is_success(&self) -> bool {
        !self.cancelled && self.actions.iter().all(|action| !action.status.is_failure())
    }

    /// Exit code an embedding CLI should report
    pub fn exit_code(&self) -> i32 {
        if self.cancelled {
            exit_codes::CANCELLED
        } else if self.is_success() {
            exit_codes::SUCCESS
        } else {
            exit_codes::FAILURE
        }
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }

    /// DOT rendering of `graph` with nodes coloured by final status
    pub fn graph_dot(&self, graph: &Graph) -> String {
        let statuses: HashMap<NodeIndex, ActionStatus> = self
            .actions
            .iter()
            .map(|action| (action.node_index, action.status))
            .collect();

        graph.to_dot_with(|idx, _| {
            statuses
                .get(&idx)
                .map_or_else(|| NodeStyle::new("#f3f4f6", "gray"), |status| status_style(*status))
        })
    }
}

fn status_style(status: ActionStatus) -> NodeStyle {
    match status {
        ActionStatus::Passed => NodeStyle::new("#22c55e", "white"),
        ActionStatus::Cached => NodeStyle::new("#3b82f6", "white"),
        ActionStatus::Failed | ActionStatus::FailedAndAbort => NodeStyle::new("#ef4444", "white"),
        ActionStatus::Invalid => NodeStyle::new("#f97316", "white"),
        ActionStatus::Skipped => NodeStyle::new("#9ca3af", "black"),
        ActionStatus::Pending | ActionStatus::Running => NodeStyle::new("#e5e7eb", "black"),
    }
}

fn critical_path(graph: &Graph, actions: &[Action]) -> Duration {
    let durations: HashMap<NodeIndex, Duration> = actions
        .iter()
        .map(|action| (action.node_index, action.duration))
        .collect();
    let mut longest: HashMap<NodeIndex, Duration> = HashMap::new();

    for idx in graph.topo_order() {
        let Some(own) = durations.get(&idx) else {
            continue;
        };
        let upstream = graph
            .edges_from(idx)
            .filter(|edge| edge.relation.is_required())
            .filter_map(|edge| longest.get(&edge.target))
            .max()
            .copied()
            .unwrap_or_default();
        longest.insert(idx, *own + upstream);
    }

    longest.into_values().max().unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use lodestar_core::format_duration;
    use lodestar_graph::{Node, Relation};

    fn finished(idx: usize, label: &str, status: ActionStatus, duration: Duration) -> Action {
        let mut action = Action::new(NodeIndex(idx), label);
        action.start();
        action.finish(status, duration);
        action
    }

    fn chain() -> Graph {
        let mut graph = Graph::new();
        for id in ["a", "b", "c", "d"] {
            graph.add_node(Node::task(id)).unwrap();
        }
        graph.add_edge("b", "a", Relation::Required).unwrap();
        graph.add_edge("c", "b", Relation::Required).unwrap();
        graph.add_edge("d", "c", Relation::Optional).unwrap();
        graph
    }

    fn report(actions: Vec<Action>) -> RunReport {
        RunReport::new(actions, RunContext::new("/repo"), Duration::ZERO, &chain(), false)
    }

    #[test]
    fn test_sort_by_time_desc() {
        let mut flaky = finished(2, "c", ActionStatus::Passed, Duration::new(64, 0));
        flaky.flaky = true;
        let report = report(vec![
            finished(0, "a", ActionStatus::Passed, Duration::ZERO),
            finished(1, "b", ActionStatus::Passed, Duration::new(32 * 60 + 2, 0)),
            flaky,
            finished(3, "d", ActionStatus::Passed, Duration::new(34, 400_000_000)),
        ]);

        let order: Vec<String> = report
            .sorted_actions(SortBy::Time, Order::Desc)
            .into_iter()
            .map(|action| format_duration(action.duration))
            .collect();
        assert_eq!(order, vec!["32m 2s", "1m 4s", "34.4s", "0s"]);
        assert_eq!(report.summary.flaky, 1);

        let labels: Vec<&str> = report
            .sorted_actions(SortBy::Label, Order::Asc)
            .into_iter()
            .map(|action| action.label.as_str())
            .collect();
        assert_eq!(labels, vec!["a", "b", "c", "d"]);
    }

    #[test]
    fn test_projected_duration_follows_required_edges() {
        let report = report(vec![
            finished(0, "a", ActionStatus::Passed, Duration::from_secs(1)),
            finished(1, "b", ActionStatus::Passed, Duration::from_secs(2)),
            finished(2, "c", ActionStatus::Passed, Duration::from_secs(3)),
            finished(3, "d", ActionStatus::Passed, Duration::from_secs(5)),
        ]);

        // d only optionally depends on c, so its chain is just itself
        assert_eq!(report.projected_duration, Duration::from_secs(6));
    }

    #[test]
    fn test_savings_and_exit_code() {
        let mut cached = finished(0, "a", ActionStatus::Cached, Duration::ZERO);
        cached.cached_duration = Some(Duration::from_secs(40));
        let mut failed = finished(1, "b", ActionStatus::Failed, Duration::from_secs(1));
        failed.error = Some("exited with code 1".into());
        let report = report(vec![cached, failed]);

        assert_eq!(report.estimated_savings, Duration::from_secs(40));
        assert_eq!(report.summary.cached, 1);
        assert_eq!(report.summary.failed, 1);
        assert_eq!(report.exit_code(), exit_codes::FAILURE);

        let mut cancelled = report.clone();
        cancelled.cancelled = true;
        assert_eq!(cancelled.exit_code(), exit_codes::CANCELLED);
    }

    #[test]
    fn test_json_shape() {
        let report = report(vec![finished(0, "a", ActionStatus::Passed, Duration::new(85, 325_000_000))]);
        let json: serde_json::Value = serde_json::from_str(&report.to_json().unwrap()).unwrap();

        assert_eq!(json["actions"][0]["status"], "passed");
        assert_eq!(json["actions"][0]["duration"]["secs"], 85);
        assert_eq!(json["actions"][0]["duration"]["nanos"], 325_000_000);
        assert_eq!(json["projectedDuration"]["secs"], 85);
        assert_eq!(json["estimatedSavings"]["secs"], 0);
        assert_eq!(json["summary"]["passed"], 1);
        assert!(json["context"].get("primaryTargets").is_some());
        assert_eq!(report.exit_code(), exit_codes::SUCCESS);
    }

    #[test]
    fn test_graph_dot_colours_by_status() {
        let graph = chain();
        let report = report(vec![
            finished(0, "a", ActionStatus::Failed, Duration::ZERO),
            finished(1, "b", ActionStatus::Skipped, Duration::ZERO),
        ]);

        let dot = report.graph_dot(&graph);
        assert!(dot.contains("0 [label=\"a\", fillcolor=\"#ef4444\""));
        assert!(dot.contains("1 [label=\"b\", fillcolor=\"#9ca3af\""));
        assert!(dot.contains("3 [label=\"d\", fillcolor=\"#f3f4f6\""));
    }
}
