use std::collections::VecDeque;

use tracing::debug;

use super::graph::{DependencyGraph, NodeId};
use super::StorePath;
use crate::error::{LayeringError, Result};

/// Popularity of one node: how many other nodes reach it through references.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ScoredNode {
    pub id: NodeId,
    pub score: usize,
}

/// Scores every node and returns them most popular first.
///
/// A node's score is the number of distinct other nodes from which it can be
/// reached by following reference edges. Equal scores keep discovery order.
/// Cycles are tolerated; a node never counts towards its own score.
///
/// # Errors
/// `Graph` when the graph holds an edge to an unknown node.
pub fn popularity_scores(graph: &DependencyGraph) -> Result<Vec<ScoredNode>> {
    let dependents = graph.dependents()?;
    let mut seen_in = vec![usize::MAX; graph.len()];
    let mut queue = VecDeque::new();
    let mut scored = Vec::with_capacity(graph.len());

    for id in 0..graph.len() {
        let mut score = 0;
        seen_in[id] = id;
        queue.push_back(id);
        while let Some(node) = queue.pop_front() {
            for &dependent in &dependents[node] {
                let mark = seen_in.get_mut(dependent).ok_or_else(|| {
                    LayeringError::Graph(format!("dependent {dependent} of {node} is unknown"))
                })?;
                if *mark != id {
                    *mark = id;
                    score += 1;
                    queue.push_back(dependent);
                }
            }
        }
        scored.push(ScoredNode { id, score });
    }

    // Stable sort: ties stay in ascending id order.
    scored.sort_by(|a, b| b.score.cmp(&a.score));
    Ok(scored)
}

/// Orders every path of the closure (including paths only seen as
/// references) by descending popularity.
///
/// See <https://grahamc.com/blog/nix-and-layered-docker-images> for why this
/// ordering makes layers shareable across images.
///
/// # Errors
/// `Graph` when scoring fails, which indicates a defect.
pub fn sorted_paths_by_popularity(store_paths: &[StorePath]) -> Result<Vec<String>> {
    let graph = DependencyGraph::from_store_paths(store_paths);
    debug!(
        nodes = graph.len(),
        edges = graph.edge_count(),
        "built dependency graph"
    );
    let scored = popularity_scores(&graph)?;
    scored
        .into_iter()
        .map(|node| {
            let path = graph.path(node.id).ok_or_else(|| {
                LayeringError::Graph(format!("scored node {} has no path", node.id))
            })?;
            debug!(score = node.score, path, "popularity");
            Ok(path.to_string())
        })
        .collect()
}
