use std::collections::HashSet;
use std::fmt;
use std::path::{Path, PathBuf};

use clap::ValueEnum;
use lazy_static::lazy_static;
use thiserror::Error;

use crate::cli::Arguments;
use crate::utils::system::tool_threads;

// External software
pub const HISAT2_TAG: &str = "hisat2";
pub const HISAT2_BUILD_TAG: &str = "hisat2-build";
pub const SAMTOOLS_TAG: &str = "samtools";
pub const CUFFLINKS_TAG: &str = "cufflinks";
pub const CUFFMERGE_TAG: &str = "cuffmerge";
pub const CUFFQUANT_TAG: &str = "cuffquant";
pub const CUFFNORM_TAG: &str = "cuffnorm";
pub const PYTHON_TAG: &str = "python";
pub const SPLITTER_TAG: &str = "Splitter.py";

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SamtoolsSubcommand {
    Sort,
}

impl SamtoolsSubcommand {
    pub fn as_str(&self) -> &'static str {
        match self {
            SamtoolsSubcommand::Sort => "sort",
        }
    }
}

// Static Filenames
pub const FORWARD_READS_TAG: &str = "_forward";
pub const REVERSE_READS_TAG: &str = "_reverse";
pub const FORWARD_READS_SUFFIX: &str = "_forward.fastq";
pub const REVERSE_READS_SUFFIX: &str = "_reverse.fastq";
pub const SAM_SUFFIX: &str = ".sam";
pub const SORTED_BAM_SUFFIX: &str = ".sorted.bam";
pub const HISAT2_INDEX_PROBE: &str = ".1.ht2";
pub const HISAT2_LARGE_INDEX_PROBE: &str = ".1.ht2l";
pub const TRANSCRIPTS_GTF: &str = "transcripts.gtf";
pub const MERGED_GTF: &str = "merged.gtf";
pub const ABUNDANCES_CXB: &str = "abundances.cxb";
pub const MANIFEST_EXT: &str = "txt";
pub const CUFF_DIR_PREFIX: &str = "Cuff";

// Defaults
pub const DEFAULT_RUN_NAME: &str = "run";
pub const DEFAULT_SAMPLE_ROOT: &str = "RNAseq";
pub const DEFAULT_GENOME_ROOT: &str = "genomes";
pub const DEFAULT_OUTPUT_ROOT: &str = "Data";
pub const DEFAULT_GENOME_FILE: &str = "cro_scaffolds.min_200bp.fasta";
pub const DEFAULT_ANNOTATION_FILE: &str = "annotation.gtf";
pub const DEFAULT_READ_EXT: &str = ".fastq";
pub const DEFAULT_THREADS: usize = 8;


/// The processing steps of the transcript quantification pipeline, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, ValueEnum)]
pub enum StageName {
    Split,
    Align,
    Sort,
    Assemble,
    Merge,
    Quantify,
    Normalize,
}

impl fmt::Display for StageName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            StageName::Split => "split",
            StageName::Align => "align",
            StageName::Sort => "sort",
            StageName::Assemble => "assemble",
            StageName::Merge => "merge",
            StageName::Quantify => "quantify",
            StageName::Normalize => "normalize",
        };
        write!(f, "{}", name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputKind {
    Directory,
    File,
}

/// Where a stage's data directory is rooted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StageRoot {
    /// `<output_root>/<prefix>_<run>_Data`
    Output,
    /// `<output_root>/Cuff_<run>_Data/<prefix>_<run>_Data`
    Cuff,
}

/// Static declaration of a stage: what it reads, what it writes and which tools it drives.
#[derive(Debug, Clone)]
pub struct StageSpec {
    pub name: StageName,
    pub dir_prefix: &'static str,
    pub root: StageRoot,
    /// Fixed external programs. The splitter is configured at run time.
    pub programs: &'static [&'static str],
    /// Filename suffixes the stage resolves its inputs by, one discovery per suffix.
    /// Empty for stages fed from RunConfig.
    pub input_suffixes: &'static [&'static str],
    /// Filename suffixes of the artifacts the stage leaves behind per unit of work.
    pub output_suffixes: &'static [&'static str],
    pub output_kind: OutputKind,
}

lazy_static! {
    pub static ref STAGE_SPECS: Vec<StageSpec> = vec![
        StageSpec {
            name: StageName::Split,
            dir_prefix: "Split",
            root: StageRoot::Output,
            programs: &[],
            input_suffixes: &[],
            output_suffixes: &[FORWARD_READS_SUFFIX, REVERSE_READS_SUFFIX],
            output_kind: OutputKind::File,
        },
        StageSpec {
            name: StageName::Align,
            dir_prefix: "Hisat",
            root: StageRoot::Output,
            programs: &[HISAT2_BUILD_TAG, HISAT2_TAG],
            input_suffixes: &[FORWARD_READS_SUFFIX, REVERSE_READS_SUFFIX],
            output_suffixes: &[SAM_SUFFIX],
            output_kind: OutputKind::File,
        },
        StageSpec {
            name: StageName::Sort,
            dir_prefix: "Sorted",
            root: StageRoot::Output,
            programs: &[SAMTOOLS_TAG],
            input_suffixes: &[SAM_SUFFIX],
            output_suffixes: &[SORTED_BAM_SUFFIX],
            output_kind: OutputKind::File,
        },
        StageSpec {
            name: StageName::Assemble,
            dir_prefix: "Cufflinks",
            root: StageRoot::Cuff,
            programs: &[CUFFLINKS_TAG],
            input_suffixes: &[SORTED_BAM_SUFFIX],
            output_suffixes: &[TRANSCRIPTS_GTF],
            output_kind: OutputKind::Directory,
        },
        StageSpec {
            name: StageName::Merge,
            dir_prefix: "Cuffmerge",
            root: StageRoot::Cuff,
            programs: &[CUFFMERGE_TAG],
            input_suffixes: &[TRANSCRIPTS_GTF],
            output_suffixes: &[MERGED_GTF],
            output_kind: OutputKind::File,
        },
        StageSpec {
            name: StageName::Quantify,
            dir_prefix: "Cuffquant",
            root: StageRoot::Cuff,
            programs: &[CUFFQUANT_TAG],
            input_suffixes: &[SORTED_BAM_SUFFIX],
            output_suffixes: &[ABUNDANCES_CXB],
            output_kind: OutputKind::Directory,
        },
        StageSpec {
            name: StageName::Normalize,
            dir_prefix: "Cuffnorm",
            root: StageRoot::Cuff,
            programs: &[CUFFNORM_TAG],
            input_suffixes: &[SORTED_BAM_SUFFIX],
            output_suffixes: &[],
            output_kind: OutputKind::Directory,
        },
    ];
}

/// Looks up the static declaration for a stage.
pub fn stage_spec(name: StageName) -> &'static StageSpec {
    STAGE_SPECS
        .iter()
        .find(|spec| spec.name == name)
        .unwrap_or_else(|| unreachable!("every StageName has a StageSpec"))
}


#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("Invalid configuration: {0}")]
    Configuration(String),

    #[error("Stage {stage}: no files matching '*{pattern}' found in {}", .dir.display())]
    InputResolution {
        stage: StageName,
        pattern: String,
        dir: PathBuf,
    },

    #[error("Stage {stage}: read files are not paired: {forward} / {reverse}")]
    UnpairedReads {
        stage: StageName,
        forward: String,
        reverse: String,
    },

    #[error("Stage {stage}: failed to spawn `{command}`: {error}")]
    ToolSpawn {
        stage: StageName,
        command: String,
        error: String,
    },

    #[error("Stage {stage}: `{command}` failed with {status}")]
    ToolExecution {
        stage: StageName,
        command: String,
        status: String,
    },

    #[error("I/O error while {context}: {source}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },
}

impl PipelineError {
    pub fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        PipelineError::Io {
            context: context.into(),
            source,
        }
    }

    /// Stage the error is attributed to, if any.
    pub fn stage(&self) -> Option<StageName> {
        match self {
            PipelineError::InputResolution { stage, .. }
            | PipelineError::UnpairedReads { stage, .. }
            | PipelineError::ToolSpawn { stage, .. }
            | PipelineError::ToolExecution { stage, .. } => Some(*stage),
            PipelineError::Configuration(_) | PipelineError::Io { .. } => None,
        }
    }
}


/// Immutable configuration for one pipeline run.
#[derive(Debug, Clone)]
pub struct RunConfig {
    pub run_name: String,
    pub sample_root: PathBuf,
    pub genome_root: PathBuf,
    pub output_root: PathBuf,
    pub overwrite: bool,
    pub overwrite_stages: HashSet<StageName>,
    pub genome_file: String,
    pub annotation_file: String,
    pub read_ext: String,
    /// Program the splitter is started with, e.g. an interpreter.
    pub splitter_program: String,
    /// Arguments placed before the raw file and split directory, e.g. the script path.
    pub splitter_args: Vec<String>,
    pub threads: usize,
    pub quantify: bool,
}

impl RunConfig {
    /// Builds the run configuration from parsed arguments, resolving relative paths against `cwd`.
    ///
    /// # Arguments
    ///
    /// * `args` - Parsed command-line arguments.
    /// * `cwd` - Directory relative paths are resolved against.
    /// * `max_threads` - Upper bound for tool thread counts.
    ///
    /// # Returns
    /// RunConfig, or a Configuration error for values that cannot be used.
    pub fn from_args(args: &Arguments, cwd: &Path, max_threads: usize) -> Result<Self, PipelineError> {
        let overwrite = parse_overwrite(&args.overwrite)?;

        if args.run_name.is_empty() || args.run_name.contains(std::path::MAIN_SEPARATOR) {
            return Err(PipelineError::Configuration(format!(
                "run name '{}' must be a non-empty single path component",
                args.run_name
            )));
        }
        if args.read_ext.is_empty() {
            return Err(PipelineError::Configuration("read extension must not be empty".to_string()));
        }
        let (splitter_program, splitter_args) = match args.splitter.split_first() {
            Some((program, rest)) if !program.is_empty() => (program.clone(), rest.to_vec()),
            _ => {
                return Err(PipelineError::Configuration("splitter command must not be empty".to_string()));
            }
        };

        Ok(RunConfig {
            run_name: args.run_name.clone(),
            sample_root: absolutize(cwd, &args.sample_root),
            genome_root: absolutize(cwd, &args.genome_root),
            output_root: absolutize(cwd, &args.output_root),
            overwrite,
            overwrite_stages: args.rerun.iter().copied().collect(),
            genome_file: args.genome_file.clone(),
            annotation_file: args.annotation.clone(),
            read_ext: args.read_ext.clone(),
            splitter_program,
            splitter_args,
            threads: tool_threads(args.threads, max_threads),
            quantify: args.quantify,
        })
    }

    /// Checks every path that must exist before the first stage runs and creates the output root.
    pub fn validate(&self) -> Result<(), PipelineError> {
        for (label, path) in [("sample root", &self.sample_root), ("genome root", &self.genome_root)] {
            if !path.is_dir() {
                return Err(PipelineError::Configuration(format!(
                    "{} {} does not exist",
                    label,
                    path.display()
                )));
            }
        }

        for (label, path) in [("genome file", self.genome_path()), ("annotation file", self.annotation_path())] {
            if !path.is_file() {
                return Err(PipelineError::Configuration(format!(
                    "{} {} does not exist",
                    label,
                    path.display()
                )));
            }
        }

        std::fs::create_dir_all(&self.output_root).map_err(|e| {
            PipelineError::io(format!("creating output root {}", self.output_root.display()), e)
        })
    }

    /// True if `stage` must ignore existing outputs.
    pub fn overwrite_for(&self, stage: StageName) -> bool {
        self.overwrite || self.overwrite_stages.contains(&stage)
    }

    pub fn genome_path(&self) -> PathBuf {
        self.genome_root.join(&self.genome_file)
    }

    pub fn annotation_path(&self) -> PathBuf {
        self.genome_root.join(&self.annotation_file)
    }

    /// `<output_root>/Cuff_<run>_Data`
    pub fn cuff_dir(&self) -> PathBuf {
        self.output_root.join(self.data_dir_name(CUFF_DIR_PREFIX))
    }

    /// Data directory owned by `stage` for this run.
    pub fn stage_dir(&self, stage: StageName) -> PathBuf {
        let spec = stage_spec(stage);
        let name = self.data_dir_name(spec.dir_prefix);
        match spec.root {
            StageRoot::Output => self.output_root.join(name),
            StageRoot::Cuff => self.cuff_dir().join(name),
        }
    }

    /// Manifest consumed by the merge step: `<cuff_dir>/<run>.txt`.
    pub fn manifest_path(&self) -> PathBuf {
        self.cuff_dir().join(format!("{}.{}", self.run_name, MANIFEST_EXT))
    }

    fn data_dir_name(&self, prefix: &str) -> String {
        format!("{}_{}_Data", prefix, self.run_name)
    }
}


/// Parses the boolean-like overwrite argument.
pub fn parse_overwrite(value: &str) -> Result<bool, PipelineError> {
    match value.trim().to_ascii_lowercase().as_str() {
        "true" | "t" | "yes" | "y" | "1" => Ok(true),
        "false" | "f" | "no" | "n" | "0" | "" => Ok(false),
        other => Err(PipelineError::Configuration(format!(
            "overwrite flag must be true or false, got '{}'",
            other
        ))),
    }
}

fn absolutize(cwd: &Path, path: &Path) -> PathBuf {
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        cwd.join(path)
    }
}
