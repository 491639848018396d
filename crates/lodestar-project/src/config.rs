//! Declarations fed into the resolver
//!
//! These types mirror what an external configuration loader produces. They
//! derive serde (camelCase) so a loader can fill them directly, but this
//! crate never reads configuration files itself.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::merge::MergeStrategy;

/// A project and everything it declares
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ProjectDeclaration {
    /// Unique project id
    pub id: String,

    /// Alternative name other projects may use in references
    pub alias: Option<String>,

    /// Project root relative to the workspace root; defaults to the id
    pub source: Option<String>,

    /// Free-form tags, used by `#tag` queries and tag inheritance layers
    pub tags: Vec<String>,

    /// Toolchains the project uses (e.g. "node", "rust")
    pub toolchains: Vec<String>,

    /// Architectural layer (e.g. "application", "library", "tool")
    pub layer: Option<String>,

    /// Other projects this one depends on, by id, alias or `#tag`
    pub depends_on: Vec<DependencyConfig>,

    /// Named glob groups referenced from task inputs as `@group(name)`
    pub file_groups: BTreeMap<String, Vec<String>>,

    /// Project-local task definitions
    pub tasks: BTreeMap<String, TaskConfig>,

    /// Filters applied to tasks inherited from workspace layers
    pub inherited_tasks: InheritedTasksFilter,
}

impl ProjectDeclaration {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            ..Default::default()
        }
    }

    pub fn with_alias(mut self, alias: impl Into<String>) -> Self {
        self.alias = Some(alias.into());
        self
    }

    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.tags.push(tag.into());
        self
    }

    pub fn with_toolchain(mut self, toolchain: impl Into<String>) -> Self {
        self.toolchains.push(toolchain.into());
        self
    }

    pub fn with_layer(mut self, layer: impl Into<String>) -> Self {
        self.layer = Some(layer.into());
        self
    }

    pub fn with_dependency(mut self, dep: impl Into<DependencyConfig>) -> Self {
        self.depends_on.push(dep.into());
        self
    }

    pub fn with_file_group(mut self, name: impl Into<String>, globs: Vec<String>) -> Self {
        self.file_groups.insert(name.into(), globs);
        self
    }

    pub fn with_task(mut self, id: impl Into<String>, task: TaskConfig) -> Self {
        self.tasks.insert(id.into(), task);
        self
    }

    /// Project root relative to the workspace
    pub fn source(&self) -> &str {
        self.source.as_deref().unwrap_or(&self.id)
    }
}

/// A reference to a project or task, optionally tolerated when it fails
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "DependencyConfigRepr")]
pub struct DependencyConfig {
    pub target: String,
    pub optional: bool,
}

impl DependencyConfig {
    pub fn required(target: impl Into<String>) -> Self {
        Self {
            target: target.into(),
            optional: false,
        }
    }

    pub fn optional(target: impl Into<String>) -> Self {
        Self {
            target: target.into(),
            optional: true,
        }
    }
}

impl From<&str> for DependencyConfig {
    fn from(target: &str) -> Self {
        Self::required(target)
    }
}

impl From<String> for DependencyConfig {
    fn from(target: String) -> Self {
        Self::required(target)
    }
}

/// Dependencies may be written as a bare string or as an object
#[derive(Deserialize)]
#[serde(untagged)]
enum DependencyConfigRepr {
    Short(String),
    Full {
        target: String,
        #[serde(default)]
        optional: bool,
    },
}

impl From<DependencyConfigRepr> for DependencyConfig {
    fn from(repr: DependencyConfigRepr) -> Self {
        match repr {
            DependencyConfigRepr::Short(target) => Self::required(target),
            DependencyConfigRepr::Full { target, optional } => Self { target, optional },
        }
    }
}

/// One layer's view of a task. Unset fields don't participate in merging.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct TaskConfig {
    /// Binary plus leading arguments, e.g. "cargo build"
    pub command: Option<String>,

    /// Shell script; takes precedence over `command`
    pub script: Option<String>,

    pub args: Option<Vec<String>>,

    pub deps: Option<Vec<DependencyConfig>>,

    pub env: Option<BTreeMap<String, String>>,

    /// Globs (project relative, or workspace relative with a leading `/`),
    /// `$VAR` env inputs, and `@group(name)` file group references
    pub inputs: Option<Vec<String>>,

    pub outputs: Option<Vec<String>>,

    pub options: TaskOptionsConfig,
}

impl TaskConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_command(mut self, command: impl Into<String>) -> Self {
        self.command = Some(command.into());
        self
    }

    pub fn with_script(mut self, script: impl Into<String>) -> Self {
        self.script = Some(script.into());
        self
    }

    pub fn with_args(mut self, args: &[&str]) -> Self {
        self.args = Some(args.iter().map(|a| a.to_string()).collect());
        self
    }

    pub fn with_dep(mut self, dep: impl Into<DependencyConfig>) -> Self {
        self.deps.get_or_insert_with(Vec::new).push(dep.into());
        self
    }

    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env
            .get_or_insert_with(BTreeMap::new)
            .insert(key.into(), value.into());
        self
    }

    pub fn with_inputs(mut self, inputs: &[&str]) -> Self {
        self.inputs = Some(inputs.iter().map(|i| i.to_string()).collect());
        self
    }

    pub fn with_outputs(mut self, outputs: &[&str]) -> Self {
        self.outputs = Some(outputs.iter().map(|o| o.to_string()).collect());
        self
    }

    pub fn with_options(mut self, options: TaskOptionsConfig) -> Self {
        self.options = options;
        self
    }
}

/// Task options as declared; later layers override earlier ones field by field
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct TaskOptionsConfig {
    /// Applies to every merge field before the field-specific options
    pub merge: Option<MergeStrategy>,
    pub merge_args: Option<MergeStrategy>,
    pub merge_deps: Option<MergeStrategy>,
    pub merge_env: Option<MergeStrategy>,
    pub merge_inputs: Option<MergeStrategy>,
    pub merge_outputs: Option<MergeStrategy>,

    /// Extra attempts after a failure
    pub retry_count: Option<u8>,

    /// Whether the task runs in CI; a failing CI task halts the run
    #[serde(rename = "runInCI")]
    pub run_in_ci: Option<bool>,

    /// Halt sibling work when this task fails
    pub fail_fast: Option<bool>,

    /// Whether results may be cached
    pub cache: Option<bool>,

    /// Per-attempt timeout in seconds
    pub timeout: Option<u64>,
}

/// Which inherited tasks a project accepts
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct InheritedTasksFilter {
    /// `None` inherits everything, an empty list inherits nothing
    pub include: Option<Vec<String>>,
    pub exclude: Vec<String>,
    /// Inherited task id to local task id
    pub rename: BTreeMap<String, String>,
}
