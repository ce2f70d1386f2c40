use std::fs;
use std::path::{Path, PathBuf};

use log::debug;

use crate::config::defs::{PipelineError, StageName};


/// What an artifact is to the stage consuming it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArtifactRole {
    ForwardReads,
    ReverseReads,
    GenomeIndex,
    Alignment,
    SortedAlignment,
    Assembly,
    Manifest,
    MergedAnnotation,
    Abundances,
    NormalizedExpression,
}

/// A resolved path handed from one stage to the next.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Artifact {
    pub path: PathBuf,
    pub role: ArtifactRole,
    pub sample: Option<String>,
}

impl Artifact {
    pub fn new(path: PathBuf, role: ArtifactRole) -> Self {
        Artifact { path, role, sample: None }
    }

    pub fn for_sample(path: PathBuf, role: ArtifactRole, sample: &str) -> Self {
        Artifact {
            path,
            role,
            sample: Some(sample.to_string()),
        }
    }
}

pub fn artifact_paths(artifacts: &[Artifact]) -> Vec<PathBuf> {
    artifacts.iter().map(|artifact| artifact.path.clone()).collect()
}


fn sorted_children<F>(dir: &Path, keep: F) -> Result<Vec<PathBuf>, PipelineError>
where
    F: Fn(&Path, &fs::FileType) -> bool,
{
    let entries = fs::read_dir(dir)
        .map_err(|e| PipelineError::io(format!("listing {}", dir.display()), e))?;

    let mut found: Vec<PathBuf> = Vec::new();
    for entry in entries {
        let entry = entry.map_err(|e| PipelineError::io(format!("listing {}", dir.display()), e))?;
        let file_type = entry
            .file_type()
            .map_err(|e| PipelineError::io(format!("inspecting {}", entry.path().display()), e))?;
        let path = entry.path();
        if keep(&path, &file_type) {
            found.push(path);
        }
    }
    // Paired and per-sample artifacts are matched up by position, so order by file name.
    found.sort_by(|a, b| a.file_name().cmp(&b.file_name()));
    Ok(found)
}

/// Lists the files directly inside `dir` whose names end with `suffix`.
///
/// # Arguments
///
/// * `dir` - Directory to list. Not searched recursively.
/// * `suffix` - Filename suffix, e.g. `_forward.fastq`.
///
/// # Returns
/// Matches ordered lexicographically by file name; empty when nothing matches.
pub fn find_files_with_suffix(dir: &Path, suffix: &str) -> Result<Vec<PathBuf>, PipelineError> {
    let found = sorted_children(dir, |path, file_type| {
        (file_type.is_file() || (file_type.is_symlink() && path.is_file()))
            && path
                .file_name()
                .map(|name| name.to_string_lossy().ends_with(suffix))
                .unwrap_or(false)
    })?;
    debug!("Found {} file(s) matching '*{}' in {}", found.len(), suffix, dir.display());
    Ok(found)
}

/// Same as `find_files_with_suffix`, but no match is an InputResolution error for `stage`.
pub fn require_files_with_suffix(
    stage: StageName,
    dir: &Path,
    suffix: &str,
) -> Result<Vec<PathBuf>, PipelineError> {
    let found = find_files_with_suffix(dir, suffix)?;
    if found.is_empty() {
        return Err(PipelineError::InputResolution {
            stage,
            pattern: suffix.to_string(),
            dir: dir.to_path_buf(),
        });
    }
    Ok(found)
}

/// Lists the directories directly inside `dir`, ordered by name.
pub fn find_subdirectories(dir: &Path) -> Result<Vec<PathBuf>, PipelineError> {
    sorted_children(dir, |path, file_type| {
        file_type.is_dir() || (file_type.is_symlink() && path.is_dir())
    })
}

/// Sample name of a file: its name with `suffix` removed.
/// `/split/s1_forward.fastq` with `_forward.fastq` -> `s1`
pub fn sample_name(path: &Path, suffix: &str) -> String {
    let file_name = path
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default();
    match file_name.strip_suffix(suffix) {
        Some(stem) => stem.to_string(),
        None => file_name,
    }
}

/// Creates `dir` and its parents. Existing directories are fine.
pub fn ensure_dir(dir: &Path) -> Result<(), PipelineError> {
    fs::create_dir_all(dir)
        .map_err(|e| PipelineError::io(format!("creating directory {}", dir.display()), e))
}


#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn touch(dir: &Path, name: &str) {
        fs::write(dir.join(name), b"@r\nACGT\n+\nIIII\n").unwrap();
    }

    #[test]
    fn test_forward_reverse_pairing_is_positional() {
        let dir = tempdir().unwrap();
        // Created out of order on purpose.
        for name in ["sampleB_reverse.fastq", "sampleA_forward.fastq", "sampleB_forward.fastq", "sampleA_reverse.fastq"] {
            touch(dir.path(), name);
        }

        let forward = find_files_with_suffix(dir.path(), "_forward.fastq").unwrap();
        let reverse = find_files_with_suffix(dir.path(), "_reverse.fastq").unwrap();
        let pairs: Vec<(String, String)> = forward
            .iter()
            .zip(reverse.iter())
            .map(|(f, r)| {
                (
                    f.file_name().unwrap().to_string_lossy().into_owned(),
                    r.file_name().unwrap().to_string_lossy().into_owned(),
                )
            })
            .collect();

        assert_eq!(
            pairs,
            vec![
                ("sampleA_forward.fastq".to_string(), "sampleA_reverse.fastq".to_string()),
                ("sampleB_forward.fastq".to_string(), "sampleB_reverse.fastq".to_string()),
            ]
        );
    }

    #[test]
    fn test_find_is_not_recursive_and_skips_directories() {
        let dir = tempdir().unwrap();
        touch(dir.path(), "a.sam");
        fs::create_dir(dir.path().join("nested.sam")).unwrap();
        touch(&dir.path().join("nested.sam"), "b.sam");

        let found = find_files_with_suffix(dir.path(), ".sam").unwrap();
        assert_eq!(found, vec![dir.path().join("a.sam")]);
    }

    #[test]
    fn test_no_match_is_empty_but_required_is_an_error() {
        let dir = tempdir().unwrap();
        touch(dir.path(), "notes.txt");

        assert!(find_files_with_suffix(dir.path(), ".sam").unwrap().is_empty());
        match require_files_with_suffix(StageName::Sort, dir.path(), ".sam") {
            Err(PipelineError::InputResolution { stage, pattern, dir: searched }) => {
                assert_eq!(stage, StageName::Sort);
                assert_eq!(pattern, ".sam");
                assert_eq!(searched, dir.path());
            }
            other => panic!("expected InputResolution, got {:?}", other),
        }
    }

    #[test]
    fn test_missing_directory_is_io_error() {
        let dir = tempdir().unwrap();
        let result = find_files_with_suffix(&dir.path().join("absent"), ".sam");
        assert!(matches!(result, Err(PipelineError::Io { .. })));
    }

    #[test]
    fn test_subdirectories_sorted() {
        let dir = tempdir().unwrap();
        for name in ["s2", "s10", "s1"] {
            fs::create_dir(dir.path().join(name)).unwrap();
        }
        touch(dir.path(), "s0");

        let names: Vec<String> = find_subdirectories(dir.path())
            .unwrap()
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec!["s1", "s10", "s2"]);
    }

    #[test]
    fn test_sample_name() {
        assert_eq!(sample_name(Path::new("/x/SRR12_forward.fastq"), "_forward.fastq"), "SRR12");
        assert_eq!(sample_name(Path::new("/x/s1.sorted.bam"), ".sorted.bam"), "s1");
        assert_eq!(sample_name(Path::new("/x/other.txt"), ".sam"), "other.txt");
    }
}
