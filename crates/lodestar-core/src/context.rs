//! Explicit per-run context
//!
//! Everything a run needs to know about its surroundings (workspace root,
//! touched files, requested targets, environment) travels in a
//! [`RunContext`] built once and handed to the resolver, hasher and
//! scheduler. Nothing reads process-global state behind their back.

use std::collections::BTreeMap;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Context for a single pipeline run
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunContext {
    /// Absolute workspace root
    #[serde(skip)]
    pub workspace_root: PathBuf,

    /// Files changed relative to the base revision, workspace relative
    pub touched_files: Vec<String>,

    /// Targets explicitly requested by the operator
    pub primary_targets: Vec<String>,

    /// Arguments appended to primary targets' commands
    pub passthrough_args: Vec<String>,

    /// Optional profile name (e.g. "cpu" or "heap")
    pub profile: Option<String>,

    /// Running in a CI environment; tasks with `runInCI: false` are skipped
    pub ci: bool,

    /// Environment snapshot used for `$VAR` inputs and spawned processes
    #[serde(skip)]
    pub env: BTreeMap<String, String>,
}

impl RunContext {
    /// Create a context rooted at the given workspace
    pub fn new(workspace_root: impl Into<PathBuf>) -> Self {
        Self {
            workspace_root: workspace_root.into(),
            ..Default::default()
        }
    }

    /// Snapshot the current process environment into the context
    pub fn with_process_env(mut self) -> Self {
        self.env = std::env::vars().collect();
        self.ci = self
            .env
            .get("CI")
            .is_some_and(|value| !value.is_empty() && value != "false" && value != "0");
        self
    }

    /// Mark the run as executing in CI
    pub fn with_ci(mut self, ci: bool) -> Self {
        self.ci = ci;
        self
    }

    /// Set the targets requested by the operator
    pub fn with_primary_targets<I, S>(mut self, targets: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.primary_targets = targets.into_iter().map(Into::into).collect();
        self
    }

    /// Set the touched files
    pub fn with_touched_files<I, S>(mut self, files: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.touched_files = files.into_iter().map(Into::into).collect();
        self
    }

    /// Set passthrough args
    pub fn with_passthrough_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.passthrough_args = args.into_iter().map(Into::into).collect();
        self
    }

    /// Whether a target was explicitly requested
    pub fn is_primary_target(&self, target: &str) -> bool {
        self.primary_targets.iter().any(|t| t == target)
    }

    /// Look up an environment variable in the snapshot
    pub fn env_var(&self, key: &str) -> Option<&str> {
        self.env.get(key).map(String::as_str)
    }
}
