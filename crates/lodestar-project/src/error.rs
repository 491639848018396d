//! Resolution errors

use lodestar_graph::GraphError;

/// Errors raised while resolving declarations into a graph. All of them are
/// configuration errors and surface before anything executes.
#[derive(Debug, thiserror::Error)]
pub enum ResolveError {
    /// Graph insertion failed (duplicate id, unknown node, cycle)
    #[error(transparent)]
    Graph(#[from] GraphError),

    /// A dependency reference did not match anything
    #[error("'{dependent}' depends on '{token}', which does not resolve to any project or task")]
    UnknownDependency { dependent: String, token: String },

    /// Two projects claim the same alias, or an alias shadows a project id
    #[error("Alias '{alias}' of project '{project}' conflicts with '{existing}'")]
    DuplicateAlias {
        alias: String,
        project: String,
        existing: String,
    },

    /// Malformed target reference
    #[error("Invalid target '{0}': {1}")]
    InvalidTarget(String, String),

    /// Input referenced a file group the project doesn't define
    #[error("Task '{target}' references unknown file group '{group}'")]
    UnknownFileGroup { target: String, group: String },

    /// Malformed glob in a target scope or task input
    #[error("Invalid glob '{glob}': {message}")]
    InvalidGlob { glob: String, message: String },
}
