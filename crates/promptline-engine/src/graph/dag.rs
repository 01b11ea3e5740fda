use std::collections::HashMap;

use petgraph::algo::toposort;
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::Direction;

use promptline_core::error::{PromptlineError, Result};

use super::node::DagNode;

/// Validated dependency graph. Edges point from a dependency to its dependent.
#[derive(Debug)]
pub struct Dag {
    graph: DiGraph<DagNode, ()>,
    indices: HashMap<String, NodeIndex>,
    order: Vec<NodeIndex>,
}

impl Dag {
    /// Build the graph, rejecting empty or duplicate nodes, unknown
    /// dependencies and cycles.
    pub fn new(nodes: Vec<DagNode>) -> Result<Self> {
        if nodes.is_empty() {
            return Err(PromptlineError::Planning("a dag needs at least one node".into()));
        }

        let mut graph = DiGraph::new();
        let mut indices = HashMap::new();

        for node in nodes {
            if node.tasks.is_empty() {
                return Err(PromptlineError::Planning(format!(
                    "node '{}' has no tasks",
                    node.name
                )));
            }
            if indices.contains_key(&node.name) {
                return Err(PromptlineError::Planning(format!(
                    "duplicate node '{}'",
                    node.name
                )));
            }
            let name = node.name.clone();
            let idx = graph.add_node(node);
            indices.insert(name, idx);
        }

        let edges: Vec<(NodeIndex, NodeIndex)> = graph
            .node_indices()
            .map(|idx| {
                let node = &graph[idx];
                node.depends_on
                    .iter()
                    .map(|dep| {
                        indices.get(dep).map(|&from| (from, idx)).ok_or_else(|| {
                            PromptlineError::Planning(format!(
                                "node '{}' depends on unknown node '{}'",
                                node.name, dep
                            ))
                        })
                    })
                    .collect::<Result<Vec<_>>>()
            })
            .collect::<Result<Vec<_>>>()?
            .into_iter()
            .flatten()
            .collect();

        for (from, to) in edges {
            graph.update_edge(from, to, ());
        }

        let order = toposort(&graph, None).map_err(|cycle| {
            PromptlineError::Planning(format!(
                "dependency cycle involving node '{}'",
                graph[cycle.node_id()].name
            ))
        })?;

        Ok(Self {
            graph,
            indices,
            order,
        })
    }

    /// Node names, dependencies first.
    pub fn topological_order(&self) -> Vec<&str> {
        self.order
            .iter()
            .map(|&idx| self.graph[idx].name.as_str())
            .collect()
    }

    pub fn node(&self, name: &str) -> Option<&DagNode> {
        self.indices.get(name).map(|&idx| &self.graph[idx])
    }

    pub fn dependencies(&self, name: &str) -> Vec<&str> {
        self.neighbors(name, Direction::Incoming)
    }

    pub fn dependents(&self, name: &str) -> Vec<&str> {
        self.neighbors(name, Direction::Outgoing)
    }

    /// Nodes with no dependencies.
    pub fn entry_nodes(&self) -> Vec<&str> {
        self.order
            .iter()
            .filter(|&&idx| {
                self.graph
                    .neighbors_directed(idx, Direction::Incoming)
                    .next()
                    .is_none()
            })
            .map(|&idx| self.graph[idx].name.as_str())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.graph.node_count()
    }

    pub fn is_empty(&self) -> bool {
        self.graph.node_count() == 0
    }

    pub(crate) fn graph(&self) -> &DiGraph<DagNode, ()> {
        &self.graph
    }

    pub(crate) fn order(&self) -> &[NodeIndex] {
        &self.order
    }

    fn neighbors(&self, name: &str, direction: Direction) -> Vec<&str> {
        let Some(&idx) = self.indices.get(name) else {
            return Vec::new();
        };
        let mut names: Vec<&str> = self
            .graph
            .neighbors_directed(idx, direction)
            .map(|n| self.graph[n].name.as_str())
            .collect();
        names.sort_unstable();
        names
    }
}
