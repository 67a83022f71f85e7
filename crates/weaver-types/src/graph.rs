//! Playbook execution graphs.
//!
//! A playbook is a directed acyclic graph of agent ids. The graph is stored
//! as a node list plus an edge list and validated with Kahn's algorithm at
//! load time, making the acyclicity check an O(V+E) test.

use std::collections::{HashMap, HashSet, VecDeque};

use serde::{Deserialize, Serialize};

/// A directed acyclic graph of agents for one playbook column.
///
/// An empty node set means the playbook is disabled.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExecutionGraph {
    /// Agent ids participating in the playbook.
    pub nodes: Vec<String>,
    /// Directed `(from, to)` pairs; both endpoints must be declared nodes.
    pub edges: Vec<(String, String)>,
}

impl ExecutionGraph {
    /// A graph with the given nodes and no edges (all roots).
    pub fn flat(nodes: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self {
            nodes: nodes.into_iter().map(Into::into).collect(),
            edges: Vec::new(),
        }
    }

    /// A graph with explicit nodes and edges.
    pub fn new(
        nodes: impl IntoIterator<Item = impl Into<String>>,
        edges: impl IntoIterator<Item = (impl Into<String>, impl Into<String>)>,
    ) -> Self {
        Self {
            nodes: nodes.into_iter().map(Into::into).collect(),
            edges: edges
                .into_iter()
                .map(|(a, b)| (a.into(), b.into()))
                .collect(),
        }
    }

    /// Whether the playbook is disabled (no nodes).
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Number of nodes.
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Validate structural invariants: no duplicate nodes, every edge
    /// endpoint declared, no self-edges, and the graph is acyclic.
    pub fn validate(&self) -> Result<(), String> {
        let mut seen = HashSet::with_capacity(self.nodes.len());
        for node in &self.nodes {
            if node.trim().is_empty() {
                return Err("graph contains an empty node id".to_string());
            }
            if !seen.insert(node.as_str()) {
                return Err(format!("duplicate node '{node}'"));
            }
        }
        for (from, to) in &self.edges {
            if !seen.contains(from.as_str()) {
                return Err(format!("edge references undeclared node '{from}'"));
            }
            if !seen.contains(to.as_str()) {
                return Err(format!("edge references undeclared node '{to}'"));
            }
            if from == to {
                return Err(format!("self-edge on node '{from}'"));
            }
        }

        // Kahn's algorithm: every node must be drained; leftovers sit on a
        // cycle and are unreachable from any root.
        let order = self.topological_order()?;
        debug_assert_eq!(order.len(), self.nodes.len());
        Ok(())
    }

    /// Indegree of every node.
    pub fn indegrees(&self) -> HashMap<String, usize> {
        let mut indegrees: HashMap<String, usize> =
            self.nodes.iter().map(|n| (n.clone(), 0)).collect();
        for (_, to) in &self.edges {
            if let Some(d) = indegrees.get_mut(to) {
                *d += 1;
            }
        }
        indegrees
    }

    /// Adjacency map from each node to its children.
    pub fn children(&self) -> HashMap<String, Vec<String>> {
        let mut children: HashMap<String, Vec<String>> =
            self.nodes.iter().map(|n| (n.clone(), Vec::new())).collect();
        for (from, to) in &self.edges {
            if let Some(c) = children.get_mut(from) {
                c.push(to.clone());
            }
        }
        children
    }

    /// Parents of each node.
    pub fn parents(&self) -> HashMap<String, Vec<String>> {
        let mut parents: HashMap<String, Vec<String>> =
            self.nodes.iter().map(|n| (n.clone(), Vec::new())).collect();
        for (from, to) in &self.edges {
            if let Some(p) = parents.get_mut(to) {
                p.push(from.clone());
            }
        }
        parents
    }

    /// Nodes with indegree zero, in declaration order.
    pub fn roots(&self) -> Vec<String> {
        let indegrees = self.indegrees();
        self.nodes
            .iter()
            .filter(|n| indegrees.get(n.as_str()) == Some(&0))
            .cloned()
            .collect()
    }

    /// A full topological order via Kahn's algorithm, or an error naming the
    /// nodes stuck on a cycle.
    pub fn topological_order(&self) -> Result<Vec<String>, String> {
        let mut indegrees = self.indegrees();
        let children = self.children();

        let mut ready: VecDeque<String> = self
            .nodes
            .iter()
            .filter(|n| indegrees.get(n.as_str()) == Some(&0))
            .cloned()
            .collect();
        let mut order = Vec::with_capacity(self.nodes.len());

        while let Some(node) = ready.pop_front() {
            if let Some(kids) = children.get(&node) {
                for child in kids {
                    let d = indegrees
                        .get_mut(child)
                        .ok_or_else(|| format!("edge references undeclared node '{child}'"))?;
                    *d -= 1;
                    if *d == 0 {
                        ready.push_back(child.clone());
                    }
                }
            }
            order.push(node);
        }

        if order.len() != self.nodes.len() {
            let drained: HashSet<&str> = order.iter().map(String::as_str).collect();
            let mut cyclic: Vec<&str> = self
                .nodes
                .iter()
                .map(String::as_str)
                .filter(|n| !drained.contains(n))
                .collect();
            cyclic.sort_unstable();
            return Err(format!("cycle detected involving nodes {cyclic:?}"));
        }
        Ok(order)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flat_graph_is_valid() {
        let g = ExecutionGraph::flat(["geo", "temporal", "entity"]);
        assert!(g.validate().is_ok());
        assert_eq!(g.roots(), vec!["geo", "temporal", "entity"]);
    }

    #[test]
    fn chain_orders_topologically() {
        let g = ExecutionGraph::new(
            ["severity", "priority"],
            [("severity", "priority")],
        );
        assert!(g.validate().is_ok());
        assert_eq!(g.topological_order().unwrap(), vec!["severity", "priority"]);
        assert_eq!(g.roots(), vec!["severity"]);
    }

    #[test]
    fn cycle_is_rejected() {
        let g = ExecutionGraph::new(["a", "b"], [("a", "b"), ("b", "a")]);
        let err = g.validate().unwrap_err();
        assert!(err.contains("cycle"), "unexpected error: {err}");
    }

    #[test]
    fn undeclared_edge_endpoint_is_rejected() {
        let g = ExecutionGraph::new(["a"], [("a", "ghost")]);
        assert!(g.validate().is_err());
    }

    #[test]
    fn duplicate_node_is_rejected() {
        let g = ExecutionGraph::flat(["a", "a"]);
        assert!(g.validate().is_err());
    }

    #[test]
    fn self_edge_is_rejected() {
        let g = ExecutionGraph::new(["a"], [("a", "a")]);
        assert!(g.validate().is_err());
    }

    #[test]
    fn empty_graph_is_structurally_valid() {
        // Emptiness means "playbook disabled"; the loader rejects it, the
        // graph itself is well-formed.
        let g = ExecutionGraph::default();
        assert!(g.validate().is_ok());
        assert!(g.is_empty());
    }

    #[test]
    fn diamond_parents_and_children() {
        let g = ExecutionGraph::new(
            ["a", "b", "c", "d"],
            [("a", "b"), ("a", "c"), ("b", "d"), ("c", "d")],
        );
        assert!(g.validate().is_ok());
        let parents = g.parents();
        let mut d_parents = parents["d"].clone();
        d_parents.sort();
        assert_eq!(d_parents, vec!["b", "c"]);
        assert_eq!(g.children()["a"].len(), 2);
        assert_eq!(g.indegrees()["d"], 2);
    }
}
