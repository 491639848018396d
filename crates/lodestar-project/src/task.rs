//! Resolved task definitions

use std::collections::BTreeMap;
use std::fmt;

use lodestar_graph::Relation;
use serde::{Deserialize, Serialize};

use crate::target::Target;

/// What a task executes
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum TaskKind {
    /// Script run through `sh -c`
    Shell { script: String },
    /// Binary spawned directly
    System { command: String, args: Vec<String> },
    /// Passes without running anything (aggregate tasks, project sync)
    NoOp,
}

impl TaskKind {
    /// Build from declared fields. A script wins over a command; a command
    /// string is split on whitespace and its tail goes in front of `args`.
    pub fn from_parts(command: Option<&str>, script: Option<&str>, args: &[String]) -> Self {
        if let Some(script) = script.filter(|s| !s.trim().is_empty()) {
            let mut script = script.to_string();
            for arg in args {
                script.push(' ');
                script.push_str(arg);
            }
            return Self::Shell { script };
        }

        let mut parts = command.unwrap_or_default().split_whitespace();
        match parts.next() {
            Some(binary) => Self::System {
                command: binary.to_string(),
                args: parts.map(str::to_string).chain(args.iter().cloned()).collect(),
            },
            None => Self::NoOp,
        }
    }

    pub fn is_noop(&self) -> bool {
        matches!(self, Self::NoOp)
    }
}

impl fmt::Display for TaskKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Shell { script } => write!(f, "{}", script),
            Self::System { command, args } if args.is_empty() => write!(f, "{}", command),
            Self::System { command, args } => write!(f, "{} {}", command, args.join(" ")),
            Self::NoOp => write!(f, "(noop)"),
        }
    }
}

/// Options after folding every layer of the inheritance chain
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskOptions {
    /// Falls back to the pipeline default when unset
    pub retry_count: Option<u8>,
    #[serde(rename = "runInCI")]
    pub run_in_ci: bool,
    pub fail_fast: bool,
    pub cache: bool,
    /// Seconds per attempt
    pub timeout: Option<u64>,
}

impl Default for TaskOptions {
    fn default() -> Self {
        Self {
            retry_count: None,
            run_in_ci: true,
            fail_fast: false,
            cache: true,
            timeout: None,
        }
    }
}

/// An edge to another task, already resolved to a `project:task` target
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskDependency {
    pub target: String,
    pub relation: Relation,
}

impl TaskDependency {
    pub fn new(target: impl Into<String>, relation: Relation) -> Self {
        Self {
            target: target.into(),
            relation,
        }
    }
}

/// A project task with its inheritance chain merged
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Task {
    /// `project:task`
    pub target: String,
    pub project: String,
    pub id: String,
    pub kind: TaskKind,
    pub deps: Vec<TaskDependency>,
    pub env: BTreeMap<String, String>,
    /// File globs, project relative or workspace relative with a leading `/`
    pub inputs: Vec<String>,
    /// Environment variables whose values are hashed
    pub input_env: Vec<String>,
    pub outputs: Vec<String>,
    pub options: TaskOptions,
    /// Project root relative to the workspace
    pub project_root: String,
    /// Names of the inheritance layers that contributed, in merge order
    pub inherited_from: Vec<String>,
}

impl Task {
    pub fn new(project: impl Into<String>, id: impl Into<String>, kind: TaskKind) -> Self {
        let project = project.into();
        let id = id.into();

        Self {
            target: Target::format(&project, &id),
            project_root: project.clone(),
            project,
            id,
            kind,
            deps: Vec::new(),
            env: BTreeMap::new(),
            inputs: Vec::new(),
            input_env: Vec::new(),
            outputs: Vec::new(),
            options: TaskOptions::default(),
            inherited_from: Vec::new(),
        }
    }

    /// Input globs relative to the workspace root
    pub fn input_globs(&self) -> Vec<String> {
        self.inputs
            .iter()
            .map(|glob| workspace_relative(&self.project_root, glob))
            .collect()
    }

    /// Output globs relative to the workspace root
    pub fn output_globs(&self) -> Vec<String> {
        self.outputs
            .iter()
            .map(|glob| workspace_relative(&self.project_root, glob))
            .collect()
    }

    /// Dependencies whose failure blocks this task
    pub fn required_deps(&self) -> impl Iterator<Item = &TaskDependency> {
        self.deps.iter().filter(|dep| dep.relation.is_required())
    }

    /// Whether results may be read from and written to the cache
    pub fn is_cacheable(&self) -> bool {
        self.options.cache && !self.kind.is_noop()
    }

    /// Opaque metadata attached to the task's graph node
    pub fn metadata(&self) -> BTreeMap<String, serde_json::Value> {
        let mut metadata = BTreeMap::new();
        metadata.insert("command".into(), serde_json::json!(self.kind.to_string()));
        metadata.insert("inputs".into(), serde_json::json!(self.inputs));
        metadata.insert("outputs".into(), serde_json::json!(self.outputs));
        metadata.insert(
            "options".into(),
            serde_json::to_value(&self.options).unwrap_or_default(),
        );
        metadata
    }
}

fn workspace_relative(project_root: &str, glob: &str) -> String {
    if let Some(stripped) = glob.strip_prefix('/') {
        return stripped.to_string();
    }

    let root = project_root.trim_end_matches('/');
    if root.is_empty() || root == "." {
        glob.to_string()
    } else {
        format!("{}/{}", root, glob)
    }
}
