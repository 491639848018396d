//! Lodestar Graph - dependency graph model
//!
//! A directed graph of project and task nodes whose edges point from a
//! dependent to its dependency. The graph refuses any edge that would
//! introduce a cycle, so every [`Graph`] is a DAG by construction.

pub mod error;
pub mod export;
pub mod graph;
pub mod node;

pub use error::GraphError;
pub use export::{EdgeExport, GraphExport, NodeExport, NodeStyle};
pub use graph::Graph;
pub use node::{Edge, Node, NodeIndex, NodeKind, Relation};
