use std::fs;
use std::path::Path;

use serde::de::DeserializeOwned;

use crate::error::{LayeringError, Result};

/// Reads and decodes a JSON input file; `what` names the input in errors.
pub fn read_json_file<T: DeserializeOwned>(file: &Path, what: &'static str) -> Result<T> {
    let contents = fs::read(file).map_err(|err| LayeringError::io(file, err))?;
    serde_json::from_slice(&contents).map_err(|source| LayeringError::Format {
        what,
        file: file.to_path_buf(),
        source,
    })
}
