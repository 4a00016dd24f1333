//! `KEY=VALUE` environment file parsing.
//!
//! Values from the file never touch the process environment; they are merged
//! into the resolved configuration explicitly.

use std::collections::HashMap;
use std::path::Path;

use crate::error::{RestarterError, Result};

/// Read and parse an environment file.
pub fn load(path: &Path) -> Result<HashMap<String, String>> {
    let contents = std::fs::read_to_string(path).map_err(|e| {
        RestarterError::config(format!(
            "Failed to read env file {}: {}",
            path.display(),
            e
        ))
    })?;
    Ok(parse(&contents))
}

/// Parse `KEY=VALUE` lines. Lines without a `=` separator are skipped; the
/// value keeps everything after the first separator.
pub fn parse(contents: &str) -> HashMap<String, String> {
    contents
        .lines()
        .filter_map(|line| line.split_once('='))
        .map(|(key, value)| (key.to_string(), value.to_string()))
        .collect()
}
