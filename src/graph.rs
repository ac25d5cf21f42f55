//! The "is used by" dependency graph.
//!
//! An edge `A -> B` means block `B`'s data references block `A`. The graph is a derived,
//! disposable structure: [DependencyGraph::rebuild] discards everything and reconstructs it from
//! the current [BlockStore]. Full rebuilds cost `O(blocks × references)`, which is why the store
//! is bounded by [crate::config::EngineConfig::max_blocks].

use petgraph::{
    algo::tarjan_scc,
    stable_graph::{NodeIndex, StableDiGraph},
    Direction,
};
use serde::{Deserialize, Serialize};
use std::{
    collections::{BTreeMap, BTreeSet},
    fmt,
};
use thiserror::Error;

use crate::{properties::BlockId, reference::distinct_names, store::BlockStore};

/// Raised when a requested set of blocks cannot be linearized.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Error)]
#[error("Dependency cycle detected between blocks [{}]", join_ids(.involved))]
pub struct CycleError {
    /// Blocks of the strongly connected component the cycle was found in.
    pub involved: Vec<BlockId>,
}

fn join_ids(ids: &[BlockId]) -> String {
    ids.iter()
        .map(|id| id.to_string())
        .collect::<Vec<String>>()
        .join(", ")
}

#[derive(Debug, Clone, Default)]
pub struct DependencyGraph {
    graph: StableDiGraph<BlockId, ()>,
    index: BTreeMap<BlockId, NodeIndex>,
}

impl DependencyGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a fresh graph from `store`.
    pub fn from_store(store: &BlockStore) -> Self {
        let mut graph = Self::new();
        graph.rebuild(store);
        graph
    }

    /// Discard the previous graph and reconstruct it from the current block collection.
    ///
    /// Every block becomes a node. For every distinct name referenced in a block's data that
    /// resolves (case-insensitively) to another existing block, an edge from the referenced block
    /// to the referencing block is added. Unresolvable names and self references add nothing.
    pub fn rebuild(&mut self, store: &BlockStore) {
        self.graph.clear();
        self.index.clear();
        for block in store.iter() {
            self.add_node(block.id.clone());
        }
        for block in store.iter() {
            for name in distinct_names(&block.data) {
                match store.find_by_name(&name) {
                    Some(referenced) if referenced.id != block.id => {
                        self.add_edge(&referenced.id, &block.id);
                    }
                    Some(_) => {
                        tracing::trace!("[DependencyGraph] {} references itself", block.id);
                    }
                    None => {
                        tracing::trace!(
                            "[DependencyGraph] {} references unknown block '{}'",
                            block.id,
                            name
                        );
                    }
                }
            }
        }
        tracing::debug!(
            "[DependencyGraph] rebuilt: {} nodes, {} edges",
            self.graph.node_count(),
            self.graph.edge_count()
        );
    }

    /// All node ids, in insertion (store) order.
    pub fn nodes(&self) -> Vec<BlockId> {
        self.graph
            .node_indices()
            .map(|idx| self.graph[idx].clone())
            .collect()
    }

    pub fn contains(&self, id: &BlockId) -> bool {
        self.index.contains_key(id)
    }

    pub fn add_node(&mut self, id: BlockId) {
        if !self.index.contains_key(&id) {
            let idx = self.graph.add_node(id.clone());
            self.index.insert(id, idx);
        }
    }

    /// Remove a node and every edge touching it. Returns false when the node was unknown.
    pub fn remove_node(&mut self, id: &BlockId) -> bool {
        match self.index.remove(id) {
            Some(idx) => {
                self.graph.remove_node(idx);
                true
            }
            None => false,
        }
    }

    /// Add the edge `source -> sink` ("sink uses source"). Both nodes are created if missing;
    /// parallel edges are collapsed.
    pub fn add_edge(&mut self, source: &BlockId, sink: &BlockId) {
        self.add_node(source.clone());
        self.add_node(sink.clone());
        let (s, t) = (self.index[source], self.index[sink]);
        if self.graph.find_edge(s, t).is_none() {
            self.graph.add_edge(s, t, ());
        }
    }

    pub fn has_edge(&self, source: &BlockId, sink: &BlockId) -> bool {
        match (self.index.get(source), self.index.get(sink)) {
            (Some(s), Some(t)) => self.graph.find_edge(*s, *t).is_some(),
            _ => false,
        }
    }

    /// Direct dependents of `id`: the blocks whose data references it.
    pub fn adjacent(&self, id: &BlockId) -> Vec<BlockId> {
        self.neighbors(id, Direction::Outgoing)
    }

    /// Direct dependencies of `id`: the blocks its data references.
    pub fn dependencies(&self, id: &BlockId) -> Vec<BlockId> {
        self.neighbors(id, Direction::Incoming)
    }

    pub fn indegree(&self, id: &BlockId) -> usize {
        self.index
            .get(id)
            .map(|idx| {
                self.graph
                    .neighbors_directed(*idx, Direction::Incoming)
                    .count()
            })
            .unwrap_or(0)
    }

    pub fn outdegree(&self, id: &BlockId) -> usize {
        self.index
            .get(id)
            .map(|idx| {
                self.graph
                    .neighbors_directed(*idx, Direction::Outgoing)
                    .count()
            })
            .unwrap_or(0)
    }

    /// Every edge as `(source, sink)`, sorted for stable comparison.
    pub fn edges(&self) -> BTreeSet<(BlockId, BlockId)> {
        self.graph
            .edge_indices()
            .filter_map(|e| self.graph.edge_endpoints(e))
            .map(|(s, t)| (self.graph[s].clone(), self.graph[t].clone()))
            .collect()
    }

    /// Topologically order `subset`.
    ///
    /// Only the requested blocks are ordered, but each still comes after every requested block
    /// it transitively depends on, even through blocks outside the subset. Unknown ids are
    /// dropped. A cycle is an error only when two or more requested blocks sit in the same
    /// strongly connected component; cycles touching at most one of them are ignored.
    pub fn topological_sort(&self, subset: &[BlockId]) -> Result<Vec<BlockId>, CycleError> {
        let requested: BTreeSet<NodeIndex> = subset
            .iter()
            .filter_map(|id| self.index.get(id).copied())
            .collect();
        let mut order = Vec::with_capacity(requested.len());
        // tarjan_scc yields components in reverse topological order.
        for component in tarjan_scc(&self.graph).into_iter().rev() {
            let members: Vec<NodeIndex> = component
                .iter()
                .copied()
                .filter(|idx| requested.contains(idx))
                .collect();
            match members.as_slice() {
                [] => {}
                [single] => order.push(self.graph[*single].clone()),
                _ => {
                    let involved = self.sorted_ids(component);
                    tracing::warn!(
                        "[DependencyGraph] cannot linearize {} blocks: cycle through {:?}",
                        subset.len(),
                        involved
                    );
                    return Err(CycleError { involved });
                }
            }
        }
        Ok(order)
    }

    /// The strongly connected component containing `id`, sorted. A block outside any cycle is
    /// its own component.
    pub fn strongly_connected(&self, id: &BlockId) -> Vec<BlockId> {
        let Some(idx) = self.index.get(id).copied() else {
            return Vec::new();
        };
        tarjan_scc(&self.graph)
            .into_iter()
            .find(|component| component.contains(&idx))
            .map(|component| self.sorted_ids(component))
            .unwrap_or_else(|| vec![id.clone()])
    }

    fn sorted_ids(&self, component: Vec<NodeIndex>) -> Vec<BlockId> {
        let mut ids: Vec<BlockId> = component
            .into_iter()
            .map(|i| self.graph[i].clone())
            .collect();
        ids.sort();
        ids
    }

    fn neighbors(&self, id: &BlockId, direction: Direction) -> Vec<BlockId> {
        let mut ids: Vec<BlockId> = self
            .index
            .get(id)
            .map(|idx| {
                self.graph
                    .neighbors_directed(*idx, direction)
                    .map(|n| self.graph[n].clone())
                    .collect()
            })
            .unwrap_or_default();
        ids.sort();
        ids
    }
}

impl fmt::Display for DependencyGraph {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let edges = self
            .edges()
            .into_iter()
            .map(|(source, sink)| format!("{source} -> {sink}"))
            .collect::<Vec<String>>();
        write!(
            f,
            "nodes: [{}]\nedges:\n- {}",
            self.nodes()
                .iter()
                .map(|id| id.to_string())
                .collect::<Vec<String>>()
                .join(", "),
            edges.join("\n- ")
        )
    }
}
