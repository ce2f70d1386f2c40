use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use log::debug;

use crate::config::defs::PipelineError;

/// Writes one path per line to `manifest_path`, replacing any previous content.
///
/// # Arguments
///
/// * `artifacts` - Paths in the order the consumer should see them. Duplicates are kept.
/// * `manifest_path` - Destination. Its parent directory must already exist.
///
/// # Returns
/// Io error if the file cannot be created or written.
pub fn write_manifest(artifacts: &[PathBuf], manifest_path: &Path) -> Result<(), PipelineError> {
    let context = || format!("writing manifest {}", manifest_path.display());

    let file = File::create(manifest_path).map_err(|e| PipelineError::io(context(), e))?;
    let mut writer = BufWriter::new(file);
    for artifact in artifacts {
        writeln!(writer, "{}", artifact.display()).map_err(|e| PipelineError::io(context(), e))?;
    }
    writer.flush().map_err(|e| PipelineError::io(context(), e))?;

    debug!("Wrote {} entries to {}", artifacts.len(), manifest_path.display());
    Ok(())
}
