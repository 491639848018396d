//! Errors raised while building a graph

/// Errors during graph construction
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum GraphError {
    /// A node with this id already exists
    #[error("Node '{0}' already exists in the graph")]
    DuplicateNode(String),

    /// An edge endpoint does not exist
    #[error("Node '{0}' does not exist in the graph")]
    UnknownNode(String),

    /// Adding the edge would close a cycle
    #[error("Cyclic dependency detected: {}", .path.join(" -> "))]
    Cycle {
        /// Node ids along the cycle, starting and ending at the same node
        path: Vec<String>,
    },
}
