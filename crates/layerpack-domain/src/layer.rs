//! Layer descriptors and the per-path options that travel with them.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Deserializer, Serialize};

use crate::error::Result;
use crate::files::read_json_file;

/// Media type of an uncompressed OCI layer tarball.
pub const MEDIA_TYPE_IMAGE_LAYER: &str = "application/vnd.oci.image.layer.v1.tar";

/// Ownership and mode override applied to files whose path matches `regex`.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Perm {
    #[serde(default)]
    pub regex: String,
    /// Octal file mode, e.g. `"0755"`.
    #[serde(default)]
    pub mode: String,
    #[serde(default)]
    pub uid: u64,
    #[serde(default)]
    pub gid: u64,
    #[serde(default)]
    pub uname: String,
    #[serde(default)]
    pub gname: String,
}

/// Replaces `regex` by `repl` in every file path of a store path.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Rewrite {
    #[serde(default)]
    pub regex: String,
    #[serde(default)]
    pub repl: String,
}

impl Rewrite {
    fn is_empty(&self) -> bool {
        self.regex.is_empty() && self.repl.is_empty()
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PathOptions {
    #[serde(
        default,
        skip_serializing_if = "Vec::is_empty",
        deserialize_with = "perms_or_empty"
    )]
    pub perms: Vec<Perm>,
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        deserialize_with = "non_empty_rewrite"
    )]
    pub rewrite: Option<Rewrite>,
}

impl PathOptions {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.perms.is_empty() && self.rewrite.is_none()
    }
}

/// A store path packaged into a layer, with the options it was packed with.
///
/// Equality is structural: two entries for the same store path with
/// different options are different entries.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PathEntry {
    pub path: String,
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        deserialize_with = "non_empty_options"
    )]
    pub options: Option<PathOptions>,
}

impl PathEntry {
    #[must_use]
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            options: None,
        }
    }

    /// Attaches `options`, dropping an empty rewrite and leaving no options
    /// at all when nothing remains, the same way layer files are read back.
    #[must_use]
    pub fn with_options(mut self, mut options: PathOptions) -> Self {
        options.rewrite = options.rewrite.filter(|rewrite| !rewrite.is_empty());
        self.options = (!options.is_empty()).then_some(options);
        self
    }

    #[must_use]
    pub fn rewrite(&self) -> Option<&Rewrite> {
        self.options.as_ref().and_then(|options| options.rewrite.as_ref())
    }

    #[must_use]
    pub fn perms(&self) -> &[Perm] {
        self.options
            .as_ref()
            .map_or(&[], |options| options.perms.as_slice())
    }
}

// Layer files written by older tools spell "no perms" as `null`, "no rewrite"
// as an empty object and "no options" as an empty options object; all of them
// canonicalize to the empty value.
fn perms_or_empty<'de, D>(deserializer: D) -> Result<Vec<Perm>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<Vec<Perm>>::deserialize(deserializer)?.unwrap_or_default())
}

fn non_empty_rewrite<'de, D>(deserializer: D) -> Result<Option<Rewrite>, D::Error>
where
    D: Deserializer<'de>,
{
    let rewrite = Option::<Rewrite>::deserialize(deserializer)?;
    Ok(rewrite.filter(|rewrite| !rewrite.is_empty()))
}

fn non_empty_options<'de, D>(deserializer: D) -> Result<Option<PathOptions>, D::Error>
where
    D: Deserializer<'de>,
{
    let options = Option::<PathOptions>::deserialize(deserializer)?;
    Ok(options.filter(|options| !options.is_empty()))
}

/// OCI image history entry, copied into every produced layer.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct History {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_by: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub author: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub comment: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub empty_layer: Option<bool>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Layer {
    pub digest: String,
    #[serde(rename = "diffIDs")]
    pub diff_ids: String,
    pub size: u64,
    #[serde(rename = "mediaType")]
    pub media_type: String,
    pub paths: Vec<PathEntry>,
    #[serde(default)]
    pub history: History,
    #[serde(
        rename = "layerPath",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub layer_path: Option<PathBuf>,
}

/// A permission override as listed in a permissions file.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PermRule {
    pub path: String,
    #[serde(flatten)]
    pub perm: Perm,
}

/// A path rewrite as listed in a rewrites file.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RewriteRule {
    pub path: String,
    #[serde(flatten)]
    pub rewrite: Rewrite,
}

/// # Errors
/// `Io` or `Format` when the file cannot be read or decoded.
pub fn read_perms_file(file: &Path) -> Result<Vec<PermRule>> {
    read_json_file(file, "permissions file")
}

/// # Errors
/// `Io` or `Format` when the file cannot be read or decoded.
pub fn read_rewrites_file(file: &Path) -> Result<Vec<RewriteRule>> {
    read_json_file(file, "rewrites file")
}

/// # Errors
/// `Io` or `Format` when the file cannot be read or decoded.
pub fn read_history_file(file: &Path) -> Result<History> {
    read_json_file(file, "history file")
}

/// # Errors
/// `Io` or `Format` when the file cannot be read or decoded.
pub fn read_layers_file(file: &Path) -> Result<Vec<Layer>> {
    read_json_file(file, "layers file")
}

/// Reads and concatenates several parent layer files, in order.
///
/// # Errors
/// The first `Io` or `Format` error encountered.
pub fn read_layers_files<P: AsRef<Path>>(files: &[P]) -> Result<Vec<Layer>> {
    let mut layers = Vec::new();
    for file in files {
        layers.extend(read_layers_file(file.as_ref())?);
    }
    Ok(layers)
}
