//! The skip-if-done policy shared by every stage.
//!
//! An output counts as present when it is a non-empty file or a directory with at
//! least one entry. Content is never inspected, so a file truncated by an
//! interrupted run still counts as present.

use std::fs;
use std::path::{Path, PathBuf};

use log::info;

use crate::config::defs::StageName;


pub fn output_present(path: &Path) -> bool {
    match fs::metadata(path) {
        Ok(meta) if meta.is_dir() => fs::read_dir(path)
            .map(|mut entries| entries.next().is_some())
            .unwrap_or(false),
        Ok(meta) => meta.len() > 0,
        Err(_) => false,
    }
}

/// Decides whether a unit of work must run.
///
/// # Arguments
///
/// * `expected_outputs` - Every path the unit is expected to leave behind.
/// * `overwrite` - Ignore existing outputs.
///
/// # Returns
/// true if `overwrite` is set or any expected output is missing.
pub fn should_run(expected_outputs: &[PathBuf], overwrite: bool) -> bool {
    if overwrite || expected_outputs.is_empty() {
        return true;
    }
    !expected_outputs.iter().all(|path| output_present(path))
}

/// `should_run` with the skip logged against the stage.
pub fn gate(stage: StageName, expected_outputs: &[PathBuf], overwrite: bool) -> bool {
    let run = should_run(expected_outputs, overwrite);
    if !run {
        let first = expected_outputs
            .first()
            .map(|path| path.display().to_string())
            .unwrap_or_default();
        info!("[{}] Output {} already exists. Not overwritten.", stage, first);
    }
    run
}
