//! Functions and structs for building external tool invocations and running them

use std::fmt;
use std::path::Path;
use std::process::{ExitStatus, Stdio};

use log::{debug, info};
use tokio::process::Command;

use crate::config::defs::{PipelineError, StageName, HISAT2_BUILD_TAG, HISAT2_TAG, SAMTOOLS_TAG};


/// A fully-formed external tool call: program plus argument vector, never a shell string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
    pub stage: StageName,
    pub program: String,
    pub args: Vec<String>,
}

impl Invocation {
    pub fn new(stage: StageName, program: &str, args: Vec<String>) -> Self {
        Invocation {
            stage,
            program: program.to_string(),
            args,
        }
    }

    /// The command line as it would be typed, used verbatim in diagnostics.
    pub fn command_line(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for Invocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.program)?;
        for arg in &self.args {
            write!(f, " {}", arg)?;
        }
        Ok(())
    }
}


/// Executes invocations. The only seam that touches process spawning.
#[allow(async_fn_in_trait)]
pub trait CommandRunner {
    /// Runs the invocation to completion.
    ///
    /// # Returns
    /// The exit status on success; ToolSpawn or ToolExecution errors otherwise.
    async fn run(&self, invocation: &Invocation) -> Result<ExitStatus, PipelineError>;
}

/// Runs invocations as tokio child processes, one at a time.
#[derive(Debug, Default, Clone)]
pub struct ProcessRunner;

impl CommandRunner for ProcessRunner {
    async fn run(&self, invocation: &Invocation) -> Result<ExitStatus, PipelineError> {
        let command_line = invocation.command_line();
        info!("[{}] {}", invocation.stage, command_line);

        let mut child = Command::new(&invocation.program)
            .args(&invocation.args)
            .stdin(Stdio::null())
            .stdout(Stdio::inherit())
            .stderr(Stdio::inherit())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| PipelineError::ToolSpawn {
                stage: invocation.stage,
                command: command_line.clone(),
                error: e.to_string(),
            })?;

        let status = child.wait().await.map_err(|e| PipelineError::ToolSpawn {
            stage: invocation.stage,
            command: command_line.clone(),
            error: e.to_string(),
        })?;

        if !status.success() {
            return Err(PipelineError::ToolExecution {
                stage: invocation.stage,
                command: command_line,
                status: status.to_string(),
            });
        }
        debug!("[{}] {} exited with {}", invocation.stage, invocation.program, status);
        Ok(status)
    }
}


fn path_arg(path: &Path) -> String {
    path.to_string_lossy().to_string()
}

pub mod splitter {
    use std::path::Path;
    use super::path_arg;

    /// Leading arguments (e.g. the script an interpreter runs), then `<raw reads> <split dir>`.
    pub fn arg_generator(leading_args: &[String], raw_reads: &Path, split_dir: &Path) -> Vec<String> {
        let mut args_vec = leading_args.to_vec();
        args_vec.push(path_arg(raw_reads));
        args_vec.push(path_arg(split_dir));
        args_vec
    }
}

pub mod hisat2 {
    use std::path::{Path, PathBuf};
    use super::path_arg;
    use crate::config::defs::{HISAT2_INDEX_PROBE, HISAT2_LARGE_INDEX_PROBE};
    use crate::utils::gate::output_present;

    /// Index base name: the genome file name cut to its first two dot-separated parts.
    /// `cro_scaffolds.min_200bp.fasta` -> `cro_scaffolds.min_200bp`
    pub fn index_base_name(genome_path: &Path) -> String {
        let file_name = genome_path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default();
        let parts: Vec<&str> = file_name.split('.').collect();
        if parts.len() >= 3 {
            format!("{}.{}", parts[0], parts[1])
        } else {
            genome_path
                .file_stem()
                .map(|stem| stem.to_string_lossy().into_owned())
                .unwrap_or(file_name)
        }
    }

    pub fn index_base(genome_path: &Path, index_dir: &Path) -> PathBuf {
        index_dir.join(index_base_name(genome_path))
    }

    /// First file of a built index: `<base>.1.ht2`, or `<base>.1.ht2l` when
    /// hisat2-build wrote a large index.
    pub fn index_probe(index_base: &Path) -> PathBuf {
        let large = PathBuf::from(format!("{}{}", index_base.display(), HISAT2_LARGE_INDEX_PROBE));
        if output_present(&large) {
            large
        } else {
            PathBuf::from(format!("{}{}", index_base.display(), HISAT2_INDEX_PROBE))
        }
    }

    pub fn build_arg_generator(threads: usize, genome_path: &Path, index_base: &Path) -> Vec<String> {
        vec![
            "-p".to_string(),
            threads.to_string(),
            path_arg(genome_path),
            path_arg(index_base),
        ]
    }

    pub fn align_arg_generator(
        threads: usize,
        index_base: &Path,
        forward: &Path,
        reverse: &Path,
        sam_out: &Path,
    ) -> Vec<String> {
        let mut args_vec: Vec<String> = Vec::new();
        args_vec.push("-p".to_string());
        args_vec.push(threads.to_string());
        args_vec.push("-t".to_string());
        args_vec.push("--no-unal".to_string());
        args_vec.push("--dta-cufflinks".to_string());
        args_vec.push("-x".to_string());
        args_vec.push(path_arg(index_base));
        args_vec.push("-1".to_string());
        args_vec.push(path_arg(forward));
        args_vec.push("-2".to_string());
        args_vec.push(path_arg(reverse));
        args_vec.push("-S".to_string());
        args_vec.push(path_arg(sam_out));
        args_vec
    }
}

pub mod samtools {
    use std::path::Path;
    use super::path_arg;
    use crate::config::defs::SamtoolsSubcommand;

    /// `samtools sort` converts SAM to coordinate-sorted BAM in one call.
    pub fn sort_arg_generator(threads: usize, sam_in: &Path, bam_out: &Path) -> Vec<String> {
        vec![
            SamtoolsSubcommand::Sort.as_str().to_string(),
            "-@".to_string(),
            threads.to_string(),
            "-O".to_string(),
            "bam".to_string(),
            "-o".to_string(),
            path_arg(bam_out),
            path_arg(sam_in),
        ]
    }
}

pub mod cufflinks {
    use std::path::Path;
    use super::path_arg;

    pub fn arg_generator(threads: usize, annotation: &Path, out_dir: &Path, sorted_bam: &Path) -> Vec<String> {
        vec![
            "-p".to_string(),
            threads.to_string(),
            "-g".to_string(),
            path_arg(annotation),
            "-o".to_string(),
            path_arg(out_dir),
            path_arg(sorted_bam),
        ]
    }
}

pub mod cuffmerge {
    use std::path::Path;
    use super::path_arg;

    pub fn arg_generator(threads: usize, out_dir: &Path, manifest: &Path) -> Vec<String> {
        vec![
            "-p".to_string(),
            threads.to_string(),
            "-o".to_string(),
            path_arg(out_dir),
            path_arg(manifest),
        ]
    }
}

pub mod cuffquant {
    use std::path::Path;
    use super::path_arg;

    pub fn arg_generator(threads: usize, out_dir: &Path, merged_gtf: &Path, sorted_bam: &Path) -> Vec<String> {
        vec![
            "-p".to_string(),
            threads.to_string(),
            "-o".to_string(),
            path_arg(out_dir),
            path_arg(merged_gtf),
            path_arg(sorted_bam),
        ]
    }
}

pub mod cuffnorm {
    use std::path::{Path, PathBuf};
    use super::path_arg;

    /// Every sample file is passed as its own argument after the merged annotation.
    pub fn arg_generator(threads: usize, out_dir: &Path, merged_gtf: &Path, samples: &[PathBuf]) -> Vec<String> {
        let mut args_vec = vec![
            "-p".to_string(),
            threads.to_string(),
            "-o".to_string(),
            path_arg(out_dir),
            path_arg(merged_gtf),
        ];
        args_vec.extend(samples.iter().map(|sample| path_arg(sample)));
        args_vec
    }
}


/// Flag each tool accepts to print its version and exit zero.
fn version_flag(tool: &str) -> &'static str {
    match tool {
        SAMTOOLS_TAG | HISAT2_TAG | HISAT2_BUILD_TAG => "--version",
        _ => "--help",
    }
}

/// Starts each tool once to confirm it is installed and on the PATH.
///
/// # Arguments
///
/// * `tools` - (stage, program) pairs to probe.
///
/// # Returns
/// Ok if every program could be spawned, otherwise ToolSpawn for the first that could not.
pub async fn check_tools(tools: &[(StageName, String)]) -> Result<(), PipelineError> {
    for (stage, tool) in tools {
        let flag = version_flag(tool);
        let output = Command::new(tool)
            .arg(flag)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| PipelineError::ToolSpawn {
                stage: *stage,
                command: format!("{} {}", tool, flag),
                error: format!("{}. Is {} installed?", e, tool),
            })?;

        let stdout = String::from_utf8_lossy(&output.stdout);
        let first_line = stdout.lines().next().unwrap_or("").trim();
        info!("Found {}: {}", tool, if first_line.is_empty() { "(no version output)" } else { first_line });
    }
    Ok(())
}
