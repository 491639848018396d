//! Node and edge types

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Position of a node in its graph, assigned in insertion order
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeIndex(pub usize);

impl NodeIndex {
    pub fn index(self) -> usize {
        self.0
    }
}

impl fmt::Display for NodeIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// What a node represents
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeKind {
    Project,
    Task,
}

/// A vertex in the dependency graph
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Node {
    /// Stable identifier, unique within the graph
    pub id: String,
    /// Project or task
    pub kind: NodeKind,
    /// Display label
    pub label: String,
    /// Opaque data for the resolver and scheduler; the graph never reads it
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub metadata: BTreeMap<String, serde_json::Value>,
}

impl Node {
    /// Create a node labelled with its id
    pub fn new(id: impl Into<String>, kind: NodeKind) -> Self {
        let id = id.into();
        Self {
            label: id.clone(),
            id,
            kind,
            metadata: BTreeMap::new(),
        }
    }

    /// Create a project node
    pub fn project(id: impl Into<String>) -> Self {
        Self::new(id, NodeKind::Project)
    }

    /// Create a task node
    pub fn task(id: impl Into<String>) -> Self {
        Self::new(id, NodeKind::Task)
    }

    /// Set the display label
    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = label.into();
        self
    }

    /// Attach a metadata value
    pub fn with_metadata(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }

    pub fn is_task(&self) -> bool {
        self.kind == NodeKind::Task
    }
}

/// Strength of a dependency
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Relation {
    /// Failure of the dependency aborts the dependent
    #[default]
    Required,
    /// Declared optional; failure is tolerated
    Optional,
    /// Added by inheritance rather than declared; failure is tolerated
    Implicit,
}

impl Relation {
    pub fn is_required(self) -> bool {
        self == Self::Required
    }

    /// Ordering used when the same edge is declared twice: the stronger wins
    pub(crate) fn strength(self) -> u8 {
        match self {
            Self::Required => 2,
            Self::Optional => 1,
            Self::Implicit => 0,
        }
    }
}

impl fmt::Display for Relation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Required => write!(f, "required"),
            Self::Optional => write!(f, "optional"),
            Self::Implicit => write!(f, "implicit"),
        }
    }
}

/// A directed edge from a dependent (`source`) to its dependency (`target`)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Edge {
    pub source: NodeIndex,
    pub target: NodeIndex,
    pub relation: Relation,
}
