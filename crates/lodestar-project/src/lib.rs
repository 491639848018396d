//! Lodestar Project - turns project declarations into a resolved graph
//!
//! Declarations (projects, their tasks and the workspace's inheritance
//! layers) are merged per project, `deps` references are resolved to
//! concrete `project:task` targets, and everything is inserted into a
//! [`lodestar_graph::Graph`].

pub mod builder;
pub mod config;
pub mod error;
pub mod inheritance;
pub mod merge;
pub mod resolver;
pub mod target;
pub mod task;

pub use builder::{BuiltTask, TasksBuilder};
pub use config::{
    DependencyConfig, InheritedTasksFilter, ProjectDeclaration, TaskConfig, TaskOptionsConfig,
};
pub use error::ResolveError;
pub use inheritance::{InheritanceLayer, InheritedBy, InheritedClause, LayerPrecedence};
pub use merge::MergeStrategy;
pub use resolver::{Project, ProjectDependency, ResolvedWorkspace, WorkspaceResolver};
pub use target::{Target, TargetScope};
pub use task::{Task, TaskDependency, TaskKind, TaskOptions};
