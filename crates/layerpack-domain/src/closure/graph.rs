use indexmap::IndexSet;

use super::StorePath;
use crate::error::{LayeringError, Result};

/// Dense node index, assigned in first-occurrence order.
pub type NodeId = usize;

/// Directed graph where an edge points from a store path to each of its
/// direct references.
#[derive(Clone, Debug, Default)]
pub struct DependencyGraph {
    paths: IndexSet<String>,
    dependencies: Vec<Vec<NodeId>>,
}

impl DependencyGraph {
    /// Builds the graph from closure records.
    ///
    /// Nodes are allocated lazily for both ends of an edge, so a reference
    /// may name a path whose own record appears later (or never). Self
    /// references are dropped and repeated references collapse into one edge.
    #[must_use]
    pub fn from_store_paths(store_paths: &[StorePath]) -> Self {
        let mut graph = Self::default();
        for store_path in store_paths {
            let from = graph.intern(&store_path.path);
            for reference in &store_path.references {
                let to = graph.intern(reference);
                if from != to {
                    graph.add_edge(from, to);
                }
            }
        }
        graph
    }

    fn intern(&mut self, path: &str) -> NodeId {
        if let Some(id) = self.paths.get_index_of(path) {
            return id;
        }
        let (id, _) = self.paths.insert_full(path.to_string());
        self.dependencies.push(Vec::new());
        id
    }

    fn add_edge(&mut self, from: NodeId, to: NodeId) {
        let edges = &mut self.dependencies[from];
        if !edges.contains(&to) {
            edges.push(to);
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.paths.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.paths.is_empty()
    }

    #[must_use]
    pub fn edge_count(&self) -> usize {
        self.dependencies.iter().map(Vec::len).sum()
    }

    #[must_use]
    pub fn node_id(&self, path: &str) -> Option<NodeId> {
        self.paths.get_index_of(path)
    }

    #[must_use]
    pub fn path(&self, id: NodeId) -> Option<&str> {
        self.paths.get_index(id).map(String::as_str)
    }

    /// Direct references of `id`, in the order they were first seen.
    #[must_use]
    pub fn dependencies(&self, id: NodeId) -> &[NodeId] {
        self.dependencies.get(id).map_or(&[], Vec::as_slice)
    }

    /// For each node, the nodes that reference it directly.
    ///
    /// # Errors
    /// `Graph` when an edge points outside the node table.
    pub fn dependents(&self) -> Result<Vec<Vec<NodeId>>> {
        let mut dependents = vec![Vec::new(); self.len()];
        for (from, edges) in self.dependencies.iter().enumerate() {
            for &to in edges {
                let slot = dependents.get_mut(to).ok_or_else(|| {
                    LayeringError::Graph(format!(
                        "edge {from} -> {to} points past the {} known nodes",
                        self.len()
                    ))
                })?;
                slot.push(from);
            }
        }
        Ok(dependents)
    }
}
