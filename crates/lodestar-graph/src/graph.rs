//! Graph construction and traversal

use std::cmp::Reverse;
use std::collections::{BTreeSet, BinaryHeap, HashMap, VecDeque};

use tracing::{debug, instrument, trace};

use crate::error::GraphError;
use crate::node::{Edge, Node, NodeIndex, Relation};

/// Directed acyclic graph of projects and tasks.
///
/// Edges point from a dependent to its dependency. Node indices are
/// assigned in insertion order and double as the deterministic tie-break
/// for traversal.
#[derive(Debug, Clone, Default)]
pub struct Graph {
    nodes: Vec<Node>,
    ids: HashMap<String, NodeIndex>,
    edges: Vec<Edge>,
    /// Edge positions keyed by source (a node's dependencies)
    outgoing: Vec<Vec<usize>>,
    /// Edge positions keyed by target (a node's dependents)
    incoming: Vec<Vec<usize>>,
}

impl Graph {
    /// Create an empty graph
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a node, failing if its id is already taken
    pub fn add_node(&mut self, node: Node) -> Result<NodeIndex, GraphError> {
        if self.ids.contains_key(&node.id) {
            return Err(GraphError::DuplicateNode(node.id));
        }

        let index = NodeIndex(self.nodes.len());
        trace!(id = %node.id, index = index.0, "adding node");
        self.ids.insert(node.id.clone(), index);
        self.nodes.push(node);
        self.outgoing.push(Vec::new());
        self.incoming.push(Vec::new());
        Ok(index)
    }

    /// Add an edge from `source` (the dependent) to `target` (its dependency).
    ///
    /// The edge is rejected, leaving the graph untouched, if either endpoint
    /// is unknown or if `target` can already reach `source`. Declaring an
    /// existing edge again keeps the stronger of the two relations.
    pub fn add_edge(&mut self, source: &str, target: &str, relation: Relation) -> Result<(), GraphError> {
        let source_idx = self
            .index_of(source)
            .ok_or_else(|| GraphError::UnknownNode(source.to_string()))?;
        let target_idx = self
            .index_of(target)
            .ok_or_else(|| GraphError::UnknownNode(target.to_string()))?;

        self.add_edge_between(source_idx, target_idx, relation)
    }

    /// Index based variant of [`Graph::add_edge`]
    pub fn add_edge_between(
        &mut self,
        source: NodeIndex,
        target: NodeIndex,
        relation: Relation,
    ) -> Result<(), GraphError> {
        for idx in [source, target] {
            if idx.0 >= self.nodes.len() {
                return Err(GraphError::UnknownNode(idx.to_string()));
            }
        }

        let existing = self.outgoing[source.0]
            .iter()
            .copied()
            .find(|&pos| self.edges[pos].target == target);

        if let Some(pos) = existing {
            let existing = &mut self.edges[pos];
            if relation.strength() > existing.relation.strength() {
                existing.relation = relation;
            }
            return Ok(());
        }

        if let Some(path) = self.path_between(target, source) {
            let mut cycle: Vec<String> = vec![self.nodes[source.0].id.clone()];
            cycle.extend(path.into_iter().map(|idx| self.nodes[idx.0].id.clone()));
            debug!(cycle = %cycle.join(" -> "), "rejecting edge that closes a cycle");
            return Err(GraphError::Cycle { path: cycle });
        }

        let pos = self.edges.len();
        self.edges.push(Edge {
            source,
            target,
            relation,
        });
        self.outgoing[source.0].push(pos);
        self.incoming[target.0].push(pos);
        Ok(())
    }

    /// Shortest dependency path from `from` to `to`, both inclusive
    fn path_between(&self, from: NodeIndex, to: NodeIndex) -> Option<Vec<NodeIndex>> {
        if from == to {
            return Some(vec![from]);
        }

        let mut parent: HashMap<NodeIndex, NodeIndex> = HashMap::new();
        let mut queue: VecDeque<NodeIndex> = VecDeque::from([from]);

        while let Some(current) = queue.pop_front() {
            for &pos in &self.outgoing[current.0] {
                let next = self.edges[pos].target;
                if next == from || parent.contains_key(&next) {
                    continue;
                }
                parent.insert(next, current);

                if next == to {
                    let mut path = vec![to];
                    let mut cursor = to;
                    while let Some(&prev) = parent.get(&cursor) {
                        path.push(prev);
                        cursor = prev;
                    }
                    path.reverse();
                    return Some(path);
                }

                queue.push_back(next);
            }
        }

        None
    }

    /// Topological order, dependencies before dependents.
    ///
    /// Kahn's algorithm with a min-heap on insertion index, so nodes that
    /// become ready together always come out in the order they were added.
    #[instrument(skip_all, fields(node_count = self.nodes.len()))]
    pub fn topo_order(&self) -> Vec<NodeIndex> {
        let mut remaining: Vec<usize> = self.outgoing.iter().map(Vec::len).collect();
        let mut ready: BinaryHeap<Reverse<NodeIndex>> = remaining
            .iter()
            .enumerate()
            .filter(|(_, &degree)| degree == 0)
            .map(|(i, _)| Reverse(NodeIndex(i)))
            .collect();
        let mut sorted = Vec::with_capacity(self.nodes.len());

        while let Some(Reverse(idx)) = ready.pop() {
            sorted.push(idx);

            for &pos in &self.incoming[idx.0] {
                let dependent = self.edges[pos].source;
                remaining[dependent.0] -= 1;
                if remaining[dependent.0] == 0 {
                    ready.push(Reverse(dependent));
                }
            }
        }

        sorted
    }

    /// Dependencies of a node, optionally following the full closure
    pub fn dependencies_of(&self, idx: NodeIndex, transitive: bool) -> BTreeSet<NodeIndex> {
        self.walk(idx, transitive, |_| true, Direction::Dependencies)
    }

    /// Dependents of a node, optionally following the full closure
    pub fn dependents_of(&self, idx: NodeIndex, transitive: bool) -> BTreeSet<NodeIndex> {
        self.walk(idx, transitive, |_| true, Direction::Dependents)
    }

    /// Dependents reachable only through `Required` edges
    pub fn required_dependents_of(&self, idx: NodeIndex, transitive: bool) -> BTreeSet<NodeIndex> {
        self.walk(idx, transitive, Relation::is_required, Direction::Dependents)
    }

    fn walk(
        &self,
        start: NodeIndex,
        transitive: bool,
        follow: impl Fn(Relation) -> bool,
        direction: Direction,
    ) -> BTreeSet<NodeIndex> {
        let mut found = BTreeSet::new();
        if start.0 >= self.nodes.len() {
            return found;
        }

        let mut queue: VecDeque<NodeIndex> = VecDeque::from([start]);
        while let Some(current) = queue.pop_front() {
            let positions = match direction {
                Direction::Dependencies => &self.outgoing[current.0],
                Direction::Dependents => &self.incoming[current.0],
            };

            for &pos in positions {
                let edge = &self.edges[pos];
                if !follow(edge.relation) {
                    continue;
                }
                let next = match direction {
                    Direction::Dependencies => edge.target,
                    Direction::Dependents => edge.source,
                };
                if found.insert(next) && transitive {
                    queue.push_back(next);
                }
            }
        }

        found
    }

    /// Direct dependency edges of a node, in declaration order
    pub fn edges_from(&self, idx: NodeIndex) -> impl Iterator<Item = &Edge> + '_ {
        self.outgoing
            .get(idx.0)
            .into_iter()
            .flatten()
            .map(|&pos| &self.edges[pos])
    }

    /// Direct dependent edges of a node, in declaration order
    pub fn edges_to(&self, idx: NodeIndex) -> impl Iterator<Item = &Edge> + '_ {
        self.incoming
            .get(idx.0)
            .into_iter()
            .flatten()
            .map(|&pos| &self.edges[pos])
    }

    /// Induced subgraph of a node's dependency closure, optionally with its
    /// direct dependents.
    pub fn subgraph(&self, focus: NodeIndex, include_dependents: bool) -> Graph {
        let mut keep = self.dependencies_of(focus, true);
        keep.insert(focus);

        if include_dependents {
            keep.extend(self.dependents_of(focus, false));
        }

        self.induced(&keep)
    }

    /// Dependency closure of several roots, roots included
    pub fn closure_of(&self, roots: &[NodeIndex]) -> BTreeSet<NodeIndex> {
        let mut keep = BTreeSet::new();
        for &root in roots {
            if root.0 < self.nodes.len() && keep.insert(root) {
                keep.extend(self.dependencies_of(root, true));
            }
        }
        keep
    }

    /// Graph containing only `keep` and the edges between them. Relative
    /// insertion order is preserved, so traversal order stays stable.
    pub fn induced(&self, keep: &BTreeSet<NodeIndex>) -> Graph {
        let mut graph = Graph::new();
        let mut remap: HashMap<NodeIndex, NodeIndex> = HashMap::new();

        for &old in keep {
            if let Some(node) = self.nodes.get(old.0) {
                // Ids are unique in self, so this cannot fail
                if let Ok(new) = graph.add_node(node.clone()) {
                    remap.insert(old, new);
                }
            }
        }

        for edge in &self.edges {
            if let (Some(&source), Some(&target)) = (remap.get(&edge.source), remap.get(&edge.target)) {
                // Subsets of a DAG stay acyclic
                let pos = graph.edges.len();
                graph.edges.push(Edge {
                    source,
                    target,
                    relation: edge.relation,
                });
                graph.outgoing[source.0].push(pos);
                graph.incoming[target.0].push(pos);
            }
        }

        graph
    }

    /// Look up a node index by id
    pub fn index_of(&self, id: &str) -> Option<NodeIndex> {
        self.ids.get(id).copied()
    }

    /// Get a node by index
    pub fn node(&self, idx: NodeIndex) -> Option<&Node> {
        self.nodes.get(idx.0)
    }

    /// Get a node by id
    pub fn get(&self, id: &str) -> Option<&Node> {
        self.index_of(id).and_then(|idx| self.node(idx))
    }

    /// All nodes in insertion order
    pub fn nodes(&self) -> impl Iterator<Item = (NodeIndex, &Node)> + '_ {
        self.nodes.iter().enumerate().map(|(i, n)| (NodeIndex(i), n))
    }

    /// All edges in insertion order
    pub fn edges(&self) -> &[Edge] {
        &self.edges
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}

#[derive(Clone, Copy)]
enum Direction {
    Dependencies,
    Dependents,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chain() -> Graph {
        // c -> b -> a, d independent
        let mut graph = Graph::new();
        for id in ["a", "b", "c", "d"] {
            graph.add_node(Node::task(id)).unwrap();
        }
        graph.add_edge("b", "a", Relation::Required).unwrap();
        graph.add_edge("c", "b", Relation::Required).unwrap();
        graph
    }

    fn ids(graph: &Graph, set: impl IntoIterator<Item = NodeIndex>) -> Vec<String> {
        set.into_iter()
            .map(|idx| graph.node(idx).unwrap().id.clone())
            .collect()
    }

    #[test]
    fn test_duplicate_node() {
        let mut graph = Graph::new();
        graph.add_node(Node::task("a")).unwrap();
        assert_eq!(
            graph.add_node(Node::task("a")),
            Err(GraphError::DuplicateNode("a".to_string()))
        );
    }

    #[test]
    fn test_unknown_endpoint() {
        let mut graph = Graph::new();
        graph.add_node(Node::task("a")).unwrap();
        assert_eq!(
            graph.add_edge("a", "missing", Relation::Required),
            Err(GraphError::UnknownNode("missing".to_string()))
        );
    }

    #[test]
    fn test_cycle_rejected_atomically() {
        let mut graph = chain();
        let before = graph.edges().len();

        let err = graph.add_edge("a", "c", Relation::Required).unwrap_err();
        assert_eq!(
            err,
            GraphError::Cycle {
                path: vec!["a".into(), "c".into(), "b".into(), "a".into()]
            }
        );
        assert_eq!(graph.edges().len(), before);
        assert!(graph.dependencies_of(graph.index_of("a").unwrap(), true).is_empty());
    }

    #[test]
    fn test_self_edge_is_a_cycle() {
        let mut graph = chain();
        let err = graph.add_edge("d", "d", Relation::Optional).unwrap_err();
        assert_eq!(
            err,
            GraphError::Cycle {
                path: vec!["d".into(), "d".into()]
            }
        );
    }

    #[test]
    fn test_duplicate_edge_keeps_stronger_relation() {
        let mut graph = Graph::new();
        graph.add_node(Node::task("a")).unwrap();
        graph.add_node(Node::task("b")).unwrap();
        graph.add_edge("b", "a", Relation::Implicit).unwrap();
        graph.add_edge("b", "a", Relation::Required).unwrap();
        graph.add_edge("b", "a", Relation::Optional).unwrap();

        assert_eq!(graph.edges().len(), 1);
        assert_eq!(graph.edges()[0].relation, Relation::Required);
    }

    #[test]
    fn test_topo_order_is_deterministic() {
        let graph = chain();
        assert_eq!(ids(&graph, graph.topo_order()), vec!["a", "b", "c", "d"]);
    }

    #[test]
    fn test_topo_order_ties_follow_insertion() {
        let mut graph = Graph::new();
        for id in ["z", "y", "x", "root"] {
            graph.add_node(Node::task(id)).unwrap();
        }
        for dep in ["x", "z", "y"] {
            graph.add_edge("root", dep, Relation::Required).unwrap();
        }
        assert_eq!(ids(&graph, graph.topo_order()), vec!["z", "y", "x", "root"]);
    }

    #[test]
    fn test_dependencies_and_dependents() {
        let graph = chain();
        let a = graph.index_of("a").unwrap();
        let c = graph.index_of("c").unwrap();

        assert_eq!(ids(&graph, graph.dependencies_of(c, false)), vec!["b"]);
        assert_eq!(ids(&graph, graph.dependencies_of(c, true)), vec!["a", "b"]);
        assert_eq!(ids(&graph, graph.dependents_of(a, false)), vec!["b"]);
        assert_eq!(ids(&graph, graph.dependents_of(a, true)), vec!["b", "c"]);
    }

    #[test]
    fn test_required_dependents_skip_optional_edges() {
        let mut graph = chain();
        graph.add_node(Node::task("e")).unwrap();
        graph.add_edge("e", "a", Relation::Optional).unwrap();

        let a = graph.index_of("a").unwrap();
        assert_eq!(ids(&graph, graph.required_dependents_of(a, true)), vec!["b", "c"]);
        assert_eq!(ids(&graph, graph.dependents_of(a, true)), vec!["b", "c", "e"]);
    }

    #[test]
    fn test_subgraph_focus() {
        let graph = chain();
        let b = graph.index_of("b").unwrap();

        let focused = graph.subgraph(b, false);
        assert_eq!(ids(&focused, focused.topo_order()), vec!["a", "b"]);
        assert_eq!(focused.edges().len(), 1);

        let with_dependents = graph.subgraph(b, true);
        assert_eq!(
            ids(&with_dependents, with_dependents.topo_order()),
            vec!["a", "b", "c"]
        );
        assert_eq!(with_dependents.edges().len(), 2);
    }

    #[test]
    fn test_closure_of_roots() {
        let graph = chain();
        let c = graph.index_of("c").unwrap();
        let d = graph.index_of("d").unwrap();

        assert_eq!(ids(&graph, graph.closure_of(&[c, d])), vec!["a", "b", "c", "d"]);
    }
}
