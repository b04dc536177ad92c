#![deny(clippy::all)]
#![allow(
    clippy::missing_errors_doc,
    clippy::missing_panics_doc,
    clippy::must_use_candidate
)]

pub mod closure;
pub mod error;
pub mod files;
pub mod layer;

pub use closure::{
    popularity_scores, read_closure_graph_file, sorted_paths_by_nar_size,
    sorted_paths_by_popularity, DependencyGraph, NodeId, ScoredNode, StorePath,
};
pub use error::{LayeringError, Result};
pub use layer::{
    read_history_file, read_layers_file, read_layers_files, read_perms_file, read_rewrites_file,
    History, Layer, PathEntry, PathOptions, Perm, PermRule, Rewrite, RewriteRule,
    MEDIA_TYPE_IMAGE_LAYER,
};
