#![deny(clippy::all)]
#![allow(
    clippy::missing_errors_doc,
    clippy::missing_panics_doc,
    clippy::must_use_candidate
)]

pub mod build;
pub mod config;
pub mod pipeline;
pub mod resolve;

pub use build::{partition, BuildPlan, LayerArchiver, LayerTar, TarArchiver};
pub use config::{
    BuildSettings, EnvSnapshot, LayeringRequest, SortStrategy, DEFAULT_WORKERS, WORKERS_ENV,
};
pub use layerpack_domain::{History, Layer, LayeringError, PathEntry, Result};
pub use pipeline::{build_layers, run, write_layers};
pub use resolve::resolve_paths;
