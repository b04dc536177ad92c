//! Settings and the request struct handed to the pipeline.

use std::collections::HashMap;
use std::env;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

/// Worker threads used to archive layers when nothing else is configured.
///
/// Archiving is bound by hashing and I/O, not by data dependencies between
/// layers, so the pool is sized well past the CPU count.
pub const DEFAULT_WORKERS: usize = 64;

pub const WORKERS_ENV: &str = "LAYERPACK_WORKERS";

#[derive(Debug, Clone)]
pub struct EnvSnapshot {
    vars: HashMap<String, String>,
}

impl EnvSnapshot {
    #[must_use]
    pub fn capture() -> Self {
        Self {
            vars: env::vars().collect(),
        }
    }

    #[must_use]
    pub fn var(&self, key: &str) -> Option<&str> {
        self.vars.get(key).map(String::as_str)
    }

    #[cfg(test)]
    pub(crate) fn testing(pairs: &[(&str, &str)]) -> Self {
        let vars = pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        Self { vars }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BuildSettings {
    pub workers: usize,
}

impl Default for BuildSettings {
    fn default() -> Self {
        Self {
            workers: DEFAULT_WORKERS,
        }
    }
}

impl BuildSettings {
    #[must_use]
    pub fn from_env() -> Self {
        Self::from_snapshot(&EnvSnapshot::capture())
    }

    /// Unset, empty, zero or unparsable values fall back to the default.
    #[must_use]
    pub fn from_snapshot(snapshot: &EnvSnapshot) -> Self {
        let workers = snapshot
            .var(WORKERS_ENV)
            .and_then(|value| value.trim().parse::<usize>().ok())
            .filter(|workers| *workers > 0)
            .unwrap_or(DEFAULT_WORKERS);
        Self { workers }
    }
}

/// How store paths are ranked before being cut into layers.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SortStrategy {
    #[default]
    Popularity,
    NarSize,
}

impl SortStrategy {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Popularity => "popularity",
            Self::NarSize => "nar-size",
        }
    }
}

impl fmt::Display for SortStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SortStrategy {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "popularity" => Ok(Self::Popularity),
            "nar-size" => Ok(Self::NarSize),
            other => Err(format!(
                "unknown sort strategy '{other}' (expected popularity or nar-size)"
            )),
        }
    }
}

/// Everything one layering run needs.
#[derive(Debug, Clone)]
pub struct LayeringRequest {
    pub closure_graph: PathBuf,
    /// Layer files produced by earlier runs whose paths must not be repeated.
    pub parents: Vec<PathBuf>,
    /// Store path dropped from the output, typically a metadata-only path.
    pub exclude: Option<String>,
    pub perms: Option<PathBuf>,
    pub rewrites: Option<PathBuf>,
    pub history: Option<PathBuf>,
    /// Upper bound on produced layers; zero behaves like one.
    pub max_layers: usize,
    pub sort: SortStrategy,
    /// When set, layer tarballs are also written to this directory.
    pub tar_directory: Option<PathBuf>,
    pub settings: BuildSettings,
}

impl LayeringRequest {
    #[must_use]
    pub fn new(closure_graph: impl Into<PathBuf>) -> Self {
        Self {
            closure_graph: closure_graph.into(),
            parents: Vec::new(),
            exclude: None,
            perms: None,
            rewrites: None,
            history: None,
            max_layers: 1,
            sort: SortStrategy::default(),
            tar_directory: None,
            settings: BuildSettings::default(),
        }
    }
}
