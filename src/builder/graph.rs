//! The build graph.
//!
//! Nodes are builders, edges point from a builder to each of its
//! prerequisites. Nodes are numbered in the order they are first seen, and
//! that numbering breaks ties when several builders are ready at once, so
//! the execution order only depends on registration order.

use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::sync::Arc;

use petgraph::algo::tarjan_scc;
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::Direction;

use crate::builder::{BuildError, Builder};
use crate::core::BuilderId;

/// Builders and their prerequisite edges.
#[derive(Default, Clone)]
pub struct BuildGraph {
    graph: DiGraph<Arc<dyn Builder>, ()>,
    index: HashMap<BuilderId, NodeIndex>,
}

impl BuildGraph {
    pub fn new() -> Self {
        BuildGraph::default()
    }

    /// Register `builder` with its prerequisites.
    ///
    /// Calling this again for the same identity adds edges. Prerequisites
    /// need not be registered on their own. An edge from a builder to itself
    /// is ignored.
    pub fn add_builder(&mut self, builder: Arc<dyn Builder>, prerequisites: &[Arc<dyn Builder>]) {
        let from = self.node(builder);
        for prerequisite in prerequisites {
            let to = self.node(Arc::clone(prerequisite));
            if from != to && !self.graph.contains_edge(from, to) {
                self.graph.add_edge(from, to, ());
            }
        }
    }

    fn node(&mut self, builder: Arc<dyn Builder>) -> NodeIndex {
        let id = builder.id();
        if let Some(&node) = self.index.get(&id) {
            return node;
        }
        let node = self.graph.add_node(builder);
        self.index.insert(id, node);
        node
    }

    pub fn len(&self) -> usize {
        self.graph.node_count()
    }

    pub fn is_empty(&self) -> bool {
        self.graph.node_count() == 0
    }

    pub fn contains(&self, id: &BuilderId) -> bool {
        self.index.contains_key(id)
    }

    /// Direct prerequisites of a builder, in registration order.
    pub fn prerequisites(&self, id: &BuilderId) -> Vec<BuilderId> {
        let Some(&node) = self.index.get(id) else {
            return Vec::new();
        };
        let mut nodes: Vec<NodeIndex> = self.graph.neighbors(node).collect();
        nodes.sort();
        nodes.into_iter().map(|n| self.graph[n].id()).collect()
    }

    /// Builders in execution order: every builder comes after all of its
    /// prerequisites.
    pub fn sorted(&self) -> Result<Vec<Arc<dyn Builder>>, BuildError> {
        Ok(self
            .sorted_nodes()?
            .into_iter()
            .map(|n| Arc::clone(&self.graph[n]))
            .collect())
    }

    /// Builders grouped into levels. A builder's level is one more than the
    /// highest level of its prerequisites, so builders within a level never
    /// depend on each other.
    pub fn levels(&self) -> Result<Vec<Vec<Arc<dyn Builder>>>, BuildError> {
        let order = self.sorted_nodes()?;
        let mut level_of = vec![0usize; self.graph.node_count()];
        let mut levels: Vec<Vec<Arc<dyn Builder>>> = Vec::new();

        for node in order {
            let level = self
                .graph
                .neighbors(node)
                .map(|prerequisite| level_of[prerequisite.index()] + 1)
                .max()
                .unwrap_or(0);
            level_of[node.index()] = level;

            if levels.len() <= level {
                levels.resize_with(level + 1, Vec::new);
            }
            levels[level].push(Arc::clone(&self.graph[node]));
        }

        Ok(levels)
    }

    // Kahn's algorithm with an ordered ready set.
    fn sorted_nodes(&self) -> Result<Vec<NodeIndex>, BuildError> {
        let mut pending: Vec<usize> = self
            .graph
            .node_indices()
            .map(|n| self.graph.neighbors(n).count())
            .collect();

        let mut ready: BTreeSet<NodeIndex> = self
            .graph
            .node_indices()
            .filter(|n| pending[n.index()] == 0)
            .collect();

        let mut order = Vec::with_capacity(self.graph.node_count());
        while let Some(node) = ready.pop_first() {
            order.push(node);
            for dependent in self.graph.neighbors_directed(node, Direction::Incoming) {
                let count = &mut pending[dependent.index()];
                *count -= 1;
                if *count == 0 {
                    ready.insert(dependent);
                }
            }
        }

        if order.len() != self.graph.node_count() {
            return Err(self.cycle_error());
        }
        Ok(order)
    }

    fn cycle_error(&self) -> BuildError {
        let mut cycle = tarjan_scc(&self.graph)
            .into_iter()
            .find(|component| component.len() > 1)
            .unwrap_or_default();
        cycle.sort();

        BuildError::CycleDetected {
            builders: cycle
                .into_iter()
                .map(|n| self.graph[n].id().to_string())
                .collect(),
        }
    }
}

impl fmt::Debug for BuildGraph {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let edges: Vec<(BuilderId, BuilderId)> = self
            .graph
            .edge_indices()
            .filter_map(|e| self.graph.edge_endpoints(e))
            .map(|(from, to)| (self.graph[from].id(), self.graph[to].id()))
            .collect();

        f.debug_struct("BuildGraph")
            .field(
                "builders",
                &self.graph.node_weights().map(|b| b.id()).collect::<Vec<_>>(),
            )
            .field("edges", &edges)
            .finish()
    }
}
