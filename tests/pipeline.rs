#![cfg(unix)]

use std::fs;
use std::os::unix::process::ExitStatusExt;
use std::path::{Path, PathBuf};
use std::process::ExitStatus;
use std::sync::Mutex;

use anyhow::Result;
use clap::Parser;
use tempfile::{tempdir, TempDir};

use cuffpipe::cli::Arguments;
use cuffpipe::config::defs::{PipelineError, RunConfig, StageName, DEFAULT_ANNOTATION_FILE, DEFAULT_GENOME_FILE};
use cuffpipe::pipelines::transcript_quant::TranscriptQuantPipeline;
use cuffpipe::utils::command::{CommandRunner, Invocation};
use cuffpipe::utils::file::ArtifactRole;


/// Records every invocation and writes the files the real tool would have written.
#[derive(Default)]
struct FakeRunner {
    calls: Mutex<Vec<Invocation>>,
    fail_program: Option<String>,
    silent_program: Option<String>,
}

impl FakeRunner {
    fn failing_on(program: &str) -> Self {
        FakeRunner {
            fail_program: Some(program.to_string()),
            ..Default::default()
        }
    }

    /// `program` exits zero but writes nothing.
    fn silent_on(program: &str) -> Self {
        FakeRunner {
            silent_program: Some(program.to_string()),
            ..Default::default()
        }
    }

    fn calls(&self) -> Vec<Invocation> {
        self.calls.lock().unwrap().clone()
    }

    fn programs(&self) -> Vec<String> {
        self.calls().into_iter().map(|call| call.program).collect()
    }
}

fn value_after(args: &[String], flag: &str) -> PathBuf {
    let position = args.iter().position(|arg| arg == flag).unwrap();
    PathBuf::from(&args[position + 1])
}

fn write(path: &Path, content: &str) {
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    fs::write(path, content).unwrap();
}

impl CommandRunner for FakeRunner {
    async fn run(&self, invocation: &Invocation) -> Result<ExitStatus, PipelineError> {
        self.calls.lock().unwrap().push(invocation.clone());

        if self.fail_program.as_deref() == Some(invocation.program.as_str()) {
            return Err(PipelineError::ToolExecution {
                stage: invocation.stage,
                command: invocation.command_line(),
                status: "exit status: 1".to_string(),
            });
        }

        if self.silent_program.as_deref() == Some(invocation.program.as_str()) {
            return Ok(ExitStatus::from_raw(0));
        }

        let args = &invocation.args;
        match invocation.program.as_str() {
            // python Splitter.py <raw> <split dir>
            "python" => {
                assert_eq!(args[0], "Splitter.py");
                let raw = PathBuf::from(&args[args.len() - 2]);
                let split_dir = PathBuf::from(&args[args.len() - 1]);
                let file_name = raw.file_name().unwrap().to_string_lossy().into_owned();
                let stem = file_name.trim_end_matches(".fastq");
                if stem.ends_with("_forward") || stem.ends_with("_reverse") {
                    write(&split_dir.join(&file_name), "@r\nACGT\n+\nIIII\n");
                } else {
                    write(&split_dir.join(format!("{}_forward.fastq", stem)), "@r/1\nACGT\n+\nIIII\n");
                    write(&split_dir.join(format!("{}_reverse.fastq", stem)), "@r/2\nTGCA\n+\nIIII\n");
                }
            }
            "hisat2-build" => {
                let base = &args[3];
                write(Path::new(&format!("{}.1.ht2", base)), "index");
            }
            "hisat2" => write(&value_after(args, "-S"), "@HD\tVN:1.0\n"),
            "samtools" => write(&value_after(args, "-o"), "BAM"),
            "cufflinks" => write(&value_after(args, "-o").join("transcripts.gtf"), "chr1\tCufflinks\n"),
            "cuffmerge" => write(&value_after(args, "-o").join("merged.gtf"), "chr1\tCuffmerge\n"),
            "cuffquant" => write(&value_after(args, "-o").join("abundances.cxb"), "cxb"),
            "cuffnorm" => write(&value_after(args, "-o").join("genes.fpkm_table"), "tracking_id\n"),
            other => panic!("unexpected program {}", other),
        }
        Ok(ExitStatus::from_raw(0))
    }
}


struct Workspace {
    dir: TempDir,
}

impl Workspace {
    fn new(samples: &[&str]) -> Self {
        let dir = tempdir().unwrap();
        let reads = dir.path().join("reads");
        let genome = dir.path().join("genome");
        fs::create_dir_all(&reads).unwrap();
        fs::create_dir_all(&genome).unwrap();
        for sample in samples {
            write(&reads.join(format!("{}.fastq", sample)), "@r/1\nACGT\n+\nIIII\n@r/2\nTGCA\n+\nIIII\n");
        }
        write(&genome.join(DEFAULT_GENOME_FILE), ">scaffold1\nACGTACGT\n");
        write(&genome.join(DEFAULT_ANNOTATION_FILE), "scaffold1\tmaker\tgene\t1\t8\t.\t+\t.\tgene_id \"g1\";\n");
        Workspace { dir }
    }

    fn root(&self) -> &Path {
        self.dir.path()
    }

    fn out(&self) -> PathBuf {
        self.root().join("out")
    }

    fn arguments(&self, overwrite: &str, extra: &[&str]) -> Arguments {
        let root = self.root().to_string_lossy().into_owned();
        let reads = format!("{}/reads", root);
        let genome = format!("{}/genome", root);
        let out = format!("{}/out", root);
        let mut argv = vec!["cuffpipe", "go", reads.as_str(), genome.as_str(), out.as_str(), overwrite];
        argv.extend_from_slice(extra);
        Arguments::parse_from(argv)
    }

    fn config(&self, overwrite: &str, extra: &[&str]) -> RunConfig {
        let config = RunConfig::from_args(&self.arguments(overwrite, extra), self.root(), 8).unwrap();
        config.validate().unwrap();
        config
    }
}


#[tokio::test]
async fn test_end_to_end_from_clean_output_root() -> Result<()> {
    let workspace = Workspace::new(&["s1"]);
    let config = workspace.config("false", &[]);
    let runner = FakeRunner::default();

    let outputs = TranscriptQuantPipeline::new(&config, &runner).run().await?;

    assert_eq!(
        runner.programs(),
        vec!["python", "hisat2-build", "hisat2", "samtools", "cufflinks", "cuffmerge", "cuffnorm"]
    );
    assert!(outputs.reports.iter().all(|report| report.skipped == 0));
    assert_eq!(
        outputs.reports.iter().map(|report| report.stage).collect::<Vec<_>>(),
        vec![StageName::Split, StageName::Align, StageName::Sort, StageName::Assemble, StageName::Merge, StageName::Normalize]
    );

    let out = workspace.out();
    assert_eq!(fs::read_dir(out.join("Split_go_Data"))?.count(), 2);
    assert!(out.join("Hisat_go_Data/s1.sam").is_file());
    assert!(out.join("Sorted_go_Data/s1.sorted.bam").is_file());
    assert!(out.join("Cuff_go_Data/Cufflinks_go_Data/s1/transcripts.gtf").is_file());
    assert!(out.join("Cuff_go_Data/Cuffmerge_go_Data/merged.gtf").is_file());
    assert!(out.join("Cuff_go_Data/Cuffnorm_go_Data").is_dir());

    let manifest = fs::read_to_string(out.join("Cuff_go_Data/go.txt"))?;
    assert_eq!(
        manifest,
        format!("{}\n", out.join("Cuff_go_Data/Cufflinks_go_Data/s1/transcripts.gtf").display())
    );

    let calls = runner.calls();
    let hisat2 = &calls[2];
    assert_eq!(value_after(&hisat2.args, "-1"), out.join("Split_go_Data/s1_forward.fastq"));
    assert_eq!(value_after(&hisat2.args, "-2"), out.join("Split_go_Data/s1_reverse.fastq"));
    assert_eq!(value_after(&hisat2.args, "-x"), out.join("Hisat_go_Data/cro_scaffolds.min_200bp"));
    Ok(())
}

#[tokio::test]
async fn test_already_paired_reads_stay_one_sample() -> Result<()> {
    let workspace = Workspace::new(&["s1_forward", "s1_reverse"]);
    let config = workspace.config("false", &[]);
    let runner = FakeRunner::default();

    let outputs = TranscriptQuantPipeline::new(&config, &runner).run().await?;

    assert_eq!(
        runner.programs(),
        vec!["python", "python", "hisat2-build", "hisat2", "samtools", "cufflinks", "cuffmerge", "cuffnorm"]
    );
    assert!(outputs.reports.iter().all(|report| report.skipped == 0));

    let out = workspace.out();
    let mut split_files: Vec<String> = fs::read_dir(out.join("Split_go_Data"))?
        .map(|entry| entry.map(|e| e.file_name().to_string_lossy().into_owned()))
        .collect::<std::io::Result<_>>()?;
    split_files.sort();
    assert_eq!(split_files, vec!["s1_forward.fastq", "s1_reverse.fastq"]);

    assert_eq!(outputs.align.with_role(ArtifactRole::Alignment).len(), 1);
    assert!(out.join("Hisat_go_Data/s1.sam").is_file());
    assert_eq!(outputs.sort.artifacts.len(), 1);
    assert_eq!(outputs.assemble.artifacts.len(), 1);
    assert!(out.join("Cuff_go_Data/Cufflinks_go_Data/s1/transcripts.gtf").is_file());
    assert_eq!(outputs.merge.with_role(ArtifactRole::MergedAnnotation).len(), 1);
    assert!(out.join("Cuff_go_Data/Cuffnorm_go_Data").is_dir());
    Ok(())
}

#[tokio::test]
async fn test_second_run_issues_no_commands() -> Result<()> {
    let workspace = Workspace::new(&["s1", "s2"]);
    let config = workspace.config("false", &[]);

    let first = FakeRunner::default();
    TranscriptQuantPipeline::new(&config, &first).run().await?;
    assert!(!first.calls().is_empty());

    let second = FakeRunner::default();
    let outputs = TranscriptQuantPipeline::new(&config, &second).run().await?;

    assert!(second.calls().is_empty());
    assert!(outputs.reports.iter().all(|report| report.executed == 0 && report.skipped > 0));
    assert_eq!(outputs.sort.artifacts.len(), 2);
    Ok(())
}

#[tokio::test]
async fn test_resume_reruns_only_missing_sample() -> Result<()> {
    let workspace = Workspace::new(&["s1", "s2"]);
    let config = workspace.config("false", &[]);
    TranscriptQuantPipeline::new(&config, &FakeRunner::default()).run().await?;

    fs::remove_file(workspace.out().join("Sorted_go_Data/s2.sorted.bam"))?;

    let runner = FakeRunner::default();
    let outputs = TranscriptQuantPipeline::new(&config, &runner).run().await?;

    assert_eq!(runner.programs(), vec!["samtools"]);
    assert!(runner.calls()[0].args.last().unwrap().ends_with("s2.sam"));
    let sort = outputs.reports.iter().find(|report| report.stage == StageName::Sort).unwrap();
    assert_eq!((sort.executed, sort.skipped), (1, 1));
    Ok(())
}

#[tokio::test]
async fn test_large_genome_index_is_reused() -> Result<()> {
    let workspace = Workspace::new(&["s1"]);
    let config = workspace.config("false", &[]);
    TranscriptQuantPipeline::new(&config, &FakeRunner::default()).run().await?;

    let hisat_dir = workspace.out().join("Hisat_go_Data");
    fs::rename(
        hisat_dir.join("cro_scaffolds.min_200bp.1.ht2"),
        hisat_dir.join("cro_scaffolds.min_200bp.1.ht2l"),
    )?;

    let runner = FakeRunner::default();
    TranscriptQuantPipeline::new(&config, &runner).run().await?;
    assert!(runner.calls().is_empty());
    Ok(())
}

#[tokio::test]
async fn test_overwrite_reruns_every_stage() -> Result<()> {
    let workspace = Workspace::new(&["s1"]);
    let first = FakeRunner::default();
    TranscriptQuantPipeline::new(&workspace.config("false", &[]), &first).run().await?;

    let second = FakeRunner::default();
    TranscriptQuantPipeline::new(&workspace.config("true", &[]), &second).run().await?;

    assert_eq!(second.programs(), first.programs());
    Ok(())
}

#[tokio::test]
async fn test_rerun_is_scoped_to_one_stage() -> Result<()> {
    let workspace = Workspace::new(&["s1"]);
    TranscriptQuantPipeline::new(&workspace.config("false", &[]), &FakeRunner::default()).run().await?;

    let manifest = workspace.out().join("Cuff_go_Data/go.txt");
    fs::write(&manifest, "stale\n")?;

    let runner = FakeRunner::default();
    TranscriptQuantPipeline::new(&workspace.config("false", &["--rerun", "merge"]), &runner)
        .run()
        .await?;

    assert_eq!(runner.programs(), vec!["cuffmerge"]);
    assert!(!fs::read_to_string(&manifest)?.contains("stale"));
    Ok(())
}

#[tokio::test]
async fn test_failing_tool_aborts_before_next_stage() -> Result<()> {
    let workspace = Workspace::new(&["s1"]);
    let config = workspace.config("false", &[]);
    let runner = FakeRunner::failing_on("samtools");

    let result = TranscriptQuantPipeline::new(&config, &runner).run().await;

    let calls = runner.calls();
    let failed = calls.last().unwrap();
    assert_eq!(failed.program, "samtools");
    assert!(!runner.programs().contains(&"cufflinks".to_string()));
    match result {
        Err(PipelineError::ToolExecution { stage, command, .. }) => {
            assert_eq!(stage, StageName::Sort);
            assert_eq!(command, failed.command_line());
        }
        other => panic!("expected ToolExecution, got {:?}", other),
    }
    assert!(!workspace.out().join("Cuff_go_Data").exists());
    Ok(())
}

#[tokio::test]
async fn test_no_raw_reads_is_input_resolution_error() -> Result<()> {
    let workspace = Workspace::new(&[]);
    let config = workspace.config("false", &[]);
    let runner = FakeRunner::default();

    match TranscriptQuantPipeline::new(&config, &runner).run().await {
        Err(PipelineError::InputResolution { stage, pattern, dir }) => {
            assert_eq!(stage, StageName::Split);
            assert_eq!(pattern, ".fastq");
            assert_eq!(dir, workspace.root().join("reads"));
        }
        other => panic!("expected InputResolution, got {:?}", other),
    }
    assert!(runner.calls().is_empty());
    Ok(())
}

#[test]
fn test_missing_roots_are_configuration_errors() {
    for (root, label) in [("reads", "sample root"), ("genome", "genome root")] {
        let workspace = Workspace::new(&["s1"]);
        fs::remove_dir_all(workspace.root().join(root)).unwrap();

        let config = RunConfig::from_args(&workspace.arguments("false", &[]), workspace.root(), 8).unwrap();
        match config.validate() {
            Err(PipelineError::Configuration(msg)) => assert!(msg.contains(label), "{}", msg),
            other => panic!("expected configuration error for {}, got {:?}", label, other),
        }
        assert!(!workspace.out().exists());
    }
}

#[tokio::test]
async fn test_sort_without_alignments_is_input_resolution_error() -> Result<()> {
    let workspace = Workspace::new(&["s1"]);
    let config = workspace.config("false", &[]);
    let runner = FakeRunner::silent_on("hisat2");

    match TranscriptQuantPipeline::new(&config, &runner).run().await {
        Err(PipelineError::InputResolution { stage, pattern, dir }) => {
            assert_eq!(stage, StageName::Sort);
            assert_eq!(pattern, ".sam");
            assert_eq!(dir, workspace.out().join("Hisat_go_Data"));
        }
        other => panic!("expected InputResolution, got {:?}", other),
    }
    assert!(!runner.programs().contains(&"samtools".to_string()));
    Ok(())
}

#[tokio::test]
async fn test_skipped_merge_ignores_stray_assembly_directory() -> Result<()> {
    let workspace = Workspace::new(&["s1"]);
    let config = workspace.config("false", &[]);
    TranscriptQuantPipeline::new(&config, &FakeRunner::default()).run().await?;

    let stray = workspace.out().join("Cuff_go_Data/Cufflinks_go_Data/stray");
    fs::create_dir_all(&stray)?;

    let runner = FakeRunner::default();
    TranscriptQuantPipeline::new(&config, &runner).run().await?;
    assert!(runner.calls().is_empty());

    let rerun = workspace.config("false", &["--rerun", "merge"]);
    match TranscriptQuantPipeline::new(&rerun, &FakeRunner::default()).run().await {
        Err(PipelineError::InputResolution { stage, pattern, dir }) => {
            assert_eq!(stage, StageName::Merge);
            assert_eq!(pattern, "transcripts.gtf");
            assert_eq!(dir, stray);
        }
        other => panic!("expected InputResolution, got {:?}", other),
    }
    Ok(())
}

#[tokio::test]
async fn test_samples_are_paired_by_name() -> Result<()> {
    let workspace = Workspace::new(&["sampleB", "sampleA"]);
    let config = workspace.config("false", &[]);
    let runner = FakeRunner::default();

    TranscriptQuantPipeline::new(&config, &runner).run().await?;

    let split_dir = workspace.out().join("Split_go_Data");
    let alignments: Vec<(PathBuf, PathBuf)> = runner
        .calls()
        .iter()
        .filter(|call| call.program == "hisat2")
        .map(|call| (value_after(&call.args, "-1"), value_after(&call.args, "-2")))
        .collect();
    assert_eq!(
        alignments,
        vec![
            (split_dir.join("sampleA_forward.fastq"), split_dir.join("sampleA_reverse.fastq")),
            (split_dir.join("sampleB_forward.fastq"), split_dir.join("sampleB_reverse.fastq")),
        ]
    );

    let norm = runner.calls().into_iter().find(|call| call.program == "cuffnorm").unwrap();
    let sorted_dir = workspace.out().join("Sorted_go_Data");
    assert_eq!(
        &norm.args[norm.args.len() - 2..],
        [
            sorted_dir.join("sampleA.sorted.bam").to_string_lossy().into_owned(),
            sorted_dir.join("sampleB.sorted.bam").to_string_lossy().into_owned(),
        ]
    );
    Ok(())
}

#[tokio::test]
async fn test_mismatched_pairs_are_rejected() -> Result<()> {
    let workspace = Workspace::new(&["a"]);
    let split_dir = workspace.out().join("Split_go_Data");
    for name in ["a_forward.fastq", "a_reverse.fastq", "b_forward.fastq", "c_reverse.fastq"] {
        write(&split_dir.join(name), "@r\nA\n+\nI\n");
    }
    let config = workspace.config("false", &[]);
    let runner = FakeRunner::default();

    let result = TranscriptQuantPipeline::new(&config, &runner).run().await;

    assert!(matches!(result, Err(PipelineError::UnpairedReads { stage: StageName::Align, .. })));
    assert!(!runner.programs().contains(&"hisat2".to_string()));
    Ok(())
}

#[tokio::test]
async fn test_quantify_feeds_abundances_to_normalize() -> Result<()> {
    let workspace = Workspace::new(&["s1"]);
    let config = workspace.config("false", &["--quantify"]);
    let runner = FakeRunner::default();

    let outputs = TranscriptQuantPipeline::new(&config, &runner).run().await?;

    assert_eq!(
        runner.programs(),
        vec!["python", "hisat2-build", "hisat2", "samtools", "cufflinks", "cuffmerge", "cuffquant", "cuffnorm"]
    );
    let abundances = workspace.out().join("Cuff_go_Data/Cuffquant_go_Data/s1/abundances.cxb");
    let norm = runner.calls().into_iter().find(|call| call.program == "cuffnorm").unwrap();
    assert_eq!(norm.args.last().unwrap(), &abundances.to_string_lossy().into_owned());
    assert!(outputs.quantify.is_some());
    Ok(())
}

#[test]
fn test_required_tools_follow_stage_order() {
    let workspace = Workspace::new(&["s1"]);
    let config = workspace.config("false", &["--splitter", "split-reads"]);
    let runner = FakeRunner::default();
    let tools: Vec<String> = TranscriptQuantPipeline::new(&config, &runner)
        .required_tools()
        .into_iter()
        .map(|(_, tool)| tool)
        .collect();

    assert_eq!(
        tools,
        vec!["split-reads", "hisat2-build", "hisat2", "samtools", "cufflinks", "cuffmerge", "cuffnorm"]
    );
}
