//! Graph export for external consumers (visualizer JSON, Graphviz DOT)

use std::fmt::Write;

use serde::{Deserialize, Serialize};

use crate::graph::Graph;
use crate::node::{Node, NodeIndex, NodeKind, Relation};

/// Node shape consumed by the graph visualizer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeExport {
    pub id: NodeIndex,
    pub label: String,
}

/// Edge shape consumed by the graph visualizer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EdgeExport {
    pub id: String,
    pub source: NodeIndex,
    pub target: NodeIndex,
}

/// `{ nodes, edges }` payload rendered by the visualizer
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GraphExport {
    pub nodes: Vec<NodeExport>,
    pub edges: Vec<EdgeExport>,
}

/// Visual attributes for a node in DOT output
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeStyle {
    pub fill_color: String,
    pub font_color: String,
}

impl NodeStyle {
    pub fn new(fill_color: impl Into<String>, font_color: impl Into<String>) -> Self {
        Self {
            fill_color: fill_color.into(),
            font_color: font_color.into(),
        }
    }

    fn for_kind(kind: NodeKind) -> Self {
        match kind {
            NodeKind::Project => Self::new("#a78bfa", "black"),
            NodeKind::Task => Self::new("#e5e7eb", "black"),
        }
    }
}

impl Graph {
    /// Export nodes and edges in the visualizer's JSON shape
    pub fn to_export(&self) -> GraphExport {
        let nodes = self
            .nodes()
            .map(|(idx, node)| NodeExport {
                id: idx,
                label: node.label.clone(),
            })
            .collect();

        let edges = self
            .edges()
            .iter()
            .map(|edge| EdgeExport {
                id: format!("{} -> {}", edge.source, edge.target),
                source: edge.source,
                target: edge.target,
            })
            .collect();

        GraphExport { nodes, edges }
    }

    /// Serialize [`Graph::to_export`] to JSON
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(&self.to_export())
    }

    /// Render as Graphviz DOT, colouring nodes by kind
    pub fn to_dot(&self) -> String {
        self.to_dot_with(|_, node| NodeStyle::for_kind(node.kind))
    }

    /// Render as Graphviz DOT with caller supplied node styling (e.g. by
    /// run status). Edge style encodes the relation.
    pub fn to_dot_with(&self, style: impl Fn(NodeIndex, &Node) -> NodeStyle) -> String {
        let mut dot = String::from("digraph {\n");
        dot.push_str("    node [shape=box, style=\"filled,rounded\", fontname=\"Helvetica\"];\n");

        for (idx, node) in self.nodes() {
            let NodeStyle {
                fill_color,
                font_color,
            } = style(idx, node);
            let _ = writeln!(
                dot,
                "    {} [label=\"{}\", fillcolor=\"{}\", fontcolor=\"{}\"];",
                idx,
                escape(&node.label),
                fill_color,
                font_color
            );
        }

        for edge in self.edges() {
            let edge_style = match edge.relation {
                Relation::Required => "solid",
                Relation::Optional => "dashed",
                Relation::Implicit => "dotted",
            };
            let _ = writeln!(
                dot,
                "    {} -> {} [style={}, arrowhead=box];",
                edge.source, edge.target, edge_style
            );
        }

        dot.push_str("}\n");
        dot
    }
}

fn escape(label: &str) -> String {
    label.replace('\\', "\\\\").replace('"', "\\\"")
}
