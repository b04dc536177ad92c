//! Closure graph input, the dependency graph built from it, and the two
//! orderings layers are cut from.

mod graph;
mod popularity;
mod size;

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::files::read_json_file;

pub use graph::{DependencyGraph, NodeId};
pub use popularity::{popularity_scores, sorted_paths_by_popularity, ScoredNode};
pub use size::sorted_paths_by_nar_size;

/// One entry of a closure graph file, as emitted by `exportReferencesGraph`.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StorePath {
    pub path: String,
    #[serde(default)]
    pub references: Vec<String>,
    #[serde(default, skip_serializing_if = "is_zero")]
    pub nar_size: u64,
    #[serde(default, skip_serializing_if = "is_zero")]
    pub closure_size: u64,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub nar_hash: String,
}

#[allow(clippy::trivially_copy_pass_by_ref)]
fn is_zero(value: &u64) -> bool {
    *value == 0
}

/// Reads a closure graph file.
///
/// # Errors
/// `Io` when the file cannot be read, `Format` when it is not an array of
/// store path records.
pub fn read_closure_graph_file(file: &Path) -> Result<Vec<StorePath>> {
    read_json_file(file, "closure graph")
}
