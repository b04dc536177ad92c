//! Cutting resolved paths into layers and archiving them concurrently.

mod tar;

use std::path::{Path, PathBuf};
use std::sync::{mpsc, Mutex};
use std::thread;

use layerpack_domain::{History, Layer, LayeringError, PathEntry, Result, MEDIA_TYPE_IMAGE_LAYER};
use tracing::{debug, info};

pub use self::tar::TarArchiver;

/// Digest and size of one layer tarball, plus its location when written.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LayerTar {
    /// `sha256:<hex>` of the uncompressed tar stream.
    pub digest: String,
    pub size: u64,
    pub path: Option<PathBuf>,
}

/// Serializes an ordered list of store paths into a layer tarball.
///
/// Implementations must be deterministic: the same entries in the same order
/// always produce the same digest.
pub trait LayerArchiver: Sync {
    fn sum(&self, paths: &[PathEntry]) -> Result<LayerTar>;

    /// Like [`LayerArchiver::sum`], also persisting the tarball in `directory`.
    fn write(&self, paths: &[PathEntry], directory: &Path) -> Result<LayerTar>;
}

#[derive(Debug, Clone)]
pub struct BuildPlan {
    pub max_layers: usize,
    pub tar_directory: Option<PathBuf>,
    pub history: History,
    pub workers: usize,
}

/// Splits `paths` into at most `max_layers` contiguous groups.
///
/// Every group but the last holds a single path; the last one takes the
/// rest. Zero paths give zero groups, and `max_layers` of zero behaves as one.
#[must_use]
pub fn partition(paths: &[PathEntry], max_layers: usize) -> Vec<&[PathEntry]> {
    let total = paths.len();
    if total == 0 {
        return Vec::new();
    }
    let num_layers = max_layers.max(1).min(total);
    let (singles, rest) = paths.split_at(num_layers - 1);
    singles
        .chunks(1)
        .chain(std::iter::once(rest))
        .collect()
}

struct LayerJob<'a> {
    index: usize,
    paths: &'a [PathEntry],
}

/// Builds one layer per partition of `paths`, in partition order.
///
/// Partitions are archived by a pool of `plan.workers` threads. A failing
/// partition does not stop the others: every job runs to completion, then
/// the first error received is returned and no layer is.
pub fn build_layers(
    paths: &[PathEntry],
    plan: &BuildPlan,
    archiver: &dyn LayerArchiver,
) -> Result<Vec<Layer>> {
    let groups = partition(paths, plan.max_layers);
    let num_layers = groups.len();
    if num_layers == 0 {
        return Ok(Vec::new());
    }
    let worker_count = plan.workers.clamp(1, num_layers);
    debug!(layers = num_layers, workers = worker_count, "dispatching layer jobs");

    let (job_tx, job_rx) = mpsc::channel::<LayerJob<'_>>();
    let job_rx = Mutex::new(job_rx);
    let (result_tx, result_rx) = mpsc::channel();

    let results = thread::scope(|scope| {
        for _ in 0..worker_count {
            let job_rx = &job_rx;
            let result_tx = result_tx.clone();
            scope.spawn(move || loop {
                let job = {
                    let guard = match job_rx.lock() {
                        Ok(guard) => guard,
                        Err(poisoned) => poisoned.into_inner(),
                    };
                    match guard.recv() {
                        Ok(job) => job,
                        Err(_) => break,
                    }
                };
                let outcome = build_layer(&job, plan, archiver);
                if result_tx.send((job.index, outcome)).is_err() {
                    break;
                }
            });
        }
        drop(result_tx);

        for (index, group) in groups.into_iter().enumerate() {
            if job_tx.send(LayerJob { index, paths: group }).is_err() {
                break;
            }
        }
        drop(job_tx);

        result_rx.iter().take(num_layers).collect::<Vec<_>>()
    });

    let mut slots: Vec<Option<Layer>> = vec![None; num_layers];
    let mut first_error = None;
    for (index, outcome) in results {
        match outcome {
            Ok(layer) => slots[index] = Some(layer),
            Err(err) => {
                first_error.get_or_insert(err);
            }
        }
    }
    if let Some(err) = first_error {
        return Err(err);
    }
    slots.into_iter().collect::<Option<Vec<_>>>().ok_or_else(|| {
        LayeringError::digest("layer workers", "a worker exited without reporting its layer")
    })
}

fn build_layer(job: &LayerJob<'_>, plan: &BuildPlan, archiver: &dyn LayerArchiver) -> Result<Layer> {
    let tar = match plan.tar_directory.as_deref() {
        Some(directory) => archiver.write(job.paths, directory)?,
        None => archiver.sum(job.paths)?,
    };
    info!(
        paths = job.paths.len(),
        size = tar.size,
        digest = %tar.digest,
        "adding paths to layer"
    );
    Ok(Layer {
        digest: tar.digest.clone(),
        diff_ids: tar.digest,
        size: tar.size,
        media_type: MEDIA_TYPE_IMAGE_LAYER.to_string(),
        paths: job.paths.to_vec(),
        history: plan.history.clone(),
        layer_path: tar.path,
    })
}
