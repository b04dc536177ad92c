//! Closure file in, layers file out.

use std::fs;
use std::io::{self, Write};
use std::os::unix::fs::PermissionsExt;
use std::path::Path;
use std::time::Instant;

use layerpack_domain::{
    read_closure_graph_file, read_history_file, read_layers_files, read_perms_file,
    read_rewrites_file, sorted_paths_by_nar_size, sorted_paths_by_popularity, Layer,
    LayeringError, Result,
};
use serde::Serialize;
use serde_json::ser::{PrettyFormatter, Serializer};
use tempfile::NamedTempFile;
use tracing::info;

use crate::build::{self, BuildPlan, TarArchiver};
use crate::config::{LayeringRequest, SortStrategy};
use crate::resolve::resolve_paths;

/// Logs how long a pipeline step took when dropped.
struct StepTimer {
    step: &'static str,
    start: Instant,
}

impl StepTimer {
    fn new(step: &'static str) -> Self {
        Self {
            step,
            start: Instant::now(),
        }
    }
}

impl Drop for StepTimer {
    fn drop(&mut self) {
        info!(
            step = self.step,
            elapsed_ms = self.start.elapsed().as_secs_f64() * 1000.0,
            "step finished"
        );
    }
}

/// Computes the layers described by `request` without writing any output.
pub fn build_layers(request: &LayeringRequest) -> Result<Vec<Layer>> {
    let store_paths = {
        let _timer = StepTimer::new("read closure graph");
        read_closure_graph_file(&request.closure_graph)?
    };
    let ranked = {
        let _timer = StepTimer::new("sort store paths");
        match request.sort {
            SortStrategy::Popularity => sorted_paths_by_popularity(&store_paths)?,
            SortStrategy::NarSize => sorted_paths_by_nar_size(&store_paths),
        }
    };
    info!(
        paths = ranked.len(),
        sort = %request.sort,
        "ranked store paths"
    );

    let entries = {
        let _timer = StepTimer::new("resolve path options");
        let parents = read_layers_files(&request.parents)?;
        let perms = request
            .perms
            .as_deref()
            .map(read_perms_file)
            .transpose()?
            .unwrap_or_default();
        let rewrites = request
            .rewrites
            .as_deref()
            .map(read_rewrites_file)
            .transpose()?
            .unwrap_or_default();
        resolve_paths(
            &ranked,
            &parents,
            &perms,
            &rewrites,
            request.exclude.as_deref(),
        )
    };

    let history = request
        .history
        .as_deref()
        .map(read_history_file)
        .transpose()?
        .unwrap_or_default();
    let plan = BuildPlan {
        max_layers: request.max_layers,
        tar_directory: request.tar_directory.clone(),
        history,
        workers: request.settings.workers,
    };
    let _timer = StepTimer::new("build layers");
    build::build_layers(&entries, &plan, &TarArchiver)
}

/// Writes `layers` as tab-indented JSON, replacing `output` atomically.
pub fn write_layers(output: &Path, layers: &[Layer]) -> Result<()> {
    let directory = output
        .parent()
        .filter(|parent| !parent.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    let mut temp =
        NamedTempFile::new_in(directory).map_err(|err| LayeringError::io(directory, err))?;
    {
        let mut serializer =
            Serializer::with_formatter(&mut temp, PrettyFormatter::with_indent(b"\t"));
        layers
            .serialize(&mut serializer)
            .map_err(|err| LayeringError::io(output, io::Error::from(err)))?;
    }
    temp.write_all(b"\n")
        .map_err(|err| LayeringError::io(output, err))?;
    temp.as_file()
        .set_permissions(fs::Permissions::from_mode(0o644))
        .map_err(|err| LayeringError::io(output, err))?;
    temp.persist(output)
        .map_err(|err| LayeringError::io(output, err.error))?;
    Ok(())
}

/// Builds the layers and writes them to `output`; nothing is written on error.
pub fn run(request: &LayeringRequest, output: &Path) -> Result<Vec<Layer>> {
    let layers = build_layers(request)?;
    write_layers(output, &layers)?;
    info!(
        layers = layers.len(),
        output = %output.display(),
        "wrote layers"
    );
    Ok(layers)
}
