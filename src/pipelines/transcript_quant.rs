use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use log::{debug, info};

use crate::config::defs::{
    stage_spec, OutputKind, PipelineError, RunConfig, StageName, STAGE_SPECS, CUFFLINKS_TAG,
    CUFFMERGE_TAG, CUFFNORM_TAG, CUFFQUANT_TAG, HISAT2_BUILD_TAG, HISAT2_TAG, SAMTOOLS_TAG,
    FORWARD_READS_SUFFIX, FORWARD_READS_TAG, REVERSE_READS_SUFFIX, REVERSE_READS_TAG, MERGED_GTF,
};
use crate::utils::command::{
    cufflinks, cuffmerge, cuffnorm, cuffquant, hisat2, samtools, splitter, CommandRunner, Invocation,
    ProcessRunner,
};
use crate::utils::file::{
    artifact_paths, ensure_dir, find_subdirectories, require_files_with_suffix, sample_name, Artifact,
    ArtifactRole,
};
use crate::utils::gate::gate;
use crate::utils::manifest::write_manifest;


/// How many units of work a stage executed and skipped.
#[derive(Debug, Clone, PartialEq)]
pub struct StageReport {
    pub stage: StageName,
    pub executed: usize,
    pub skipped: usize,
    pub elapsed: Duration,
}

impl StageReport {
    fn new(stage: StageName) -> Self {
        StageReport {
            stage,
            executed: 0,
            skipped: 0,
            elapsed: Duration::ZERO,
        }
    }
}

/// A stage's data directory plus the artifacts it hands downstream.
#[derive(Debug, Clone)]
pub struct StageOutput {
    pub dir: PathBuf,
    pub artifacts: Vec<Artifact>,
}

impl StageOutput {
    pub fn with_role(&self, role: ArtifactRole) -> Vec<&Artifact> {
        self.artifacts.iter().filter(|artifact| artifact.role == role).collect()
    }
}

#[derive(Debug, Clone)]
pub struct PipelineOutputs {
    pub split: StageOutput,
    pub align: StageOutput,
    pub sort: StageOutput,
    pub assemble: StageOutput,
    pub merge: StageOutput,
    pub quantify: Option<StageOutput>,
    pub normalize: StageOutput,
    pub reports: Vec<StageReport>,
}


/// Expected outputs of one unit of work, derived from the stage's declared output suffixes.
///
/// File stages name their outputs `<dir>/<sample><suffix>`; directory stages own
/// `<dir>/<sample>/` and are done when the declared files exist inside it. Stages that
/// run once for all samples pass no sample and own `dir` itself.
fn expected_outputs(stage: StageName, dir: &Path, sample: Option<&str>) -> Vec<PathBuf> {
    let spec = stage_spec(stage);
    match spec.output_kind {
        OutputKind::File => spec
            .output_suffixes
            .iter()
            .map(|suffix| dir.join(format!("{}{}", sample.unwrap_or_default(), suffix)))
            .collect(),
        OutputKind::Directory => {
            let unit_dir = match sample {
                Some(sample) => dir.join(sample),
                None => dir.to_path_buf(),
            };
            if spec.output_suffixes.is_empty() {
                vec![unit_dir]
            } else {
                spec.output_suffixes.iter().map(|name| unit_dir.join(name)).collect()
            }
        }
    }
}


/// Resolves the files a stage declares as inputs inside `dir`, one list per declared suffix.
/// Each list must be non-empty.
fn resolve_inputs<const N: usize>(
    stage: StageName,
    dir: &Path,
) -> Result<[(&'static str, Vec<PathBuf>); N], PipelineError> {
    let suffixes = stage_spec(stage).input_suffixes;
    let mut resolved = Vec::with_capacity(suffixes.len());
    for suffix in suffixes {
        resolved.push((*suffix, require_files_with_suffix(stage, dir, suffix)?));
    }
    resolved.try_into().map_err(|found: Vec<(&'static str, Vec<PathBuf>)>| {
        PipelineError::Configuration(format!(
            "stage {} declares {} input pattern(s), {} expected",
            stage,
            found.len(),
            N
        ))
    })
}


/// Split artifacts a raw read file yields.
///
/// A file already named `<sample>_forward<ext>` or `<sample>_reverse<ext>` is one half of a
/// pair and yields that half only. Any other file holds interleaved reads and yields both.
fn split_artifacts(raw: &Path, read_ext: &str, split_dir: &Path) -> Vec<Artifact> {
    let stem = sample_name(raw, read_ext);
    let halves = [
        (FORWARD_READS_TAG, FORWARD_READS_SUFFIX, ArtifactRole::ForwardReads),
        (REVERSE_READS_TAG, REVERSE_READS_SUFFIX, ArtifactRole::ReverseReads),
    ];
    for (tag, suffix, role) in halves {
        if let Some(sample) = stem.strip_suffix(tag).filter(|sample| !sample.is_empty()) {
            return vec![Artifact::for_sample(split_dir.join(format!("{}{}", sample, suffix)), role, sample)];
        }
    }

    expected_outputs(StageName::Split, split_dir, Some(&stem))
        .into_iter()
        .zip([ArtifactRole::ForwardReads, ArtifactRole::ReverseReads])
        .map(|(path, role)| Artifact::for_sample(path, role, &stem))
        .collect()
}


/// Zips forward and reverse read files positionally into `(sample, forward, reverse)`.
/// Both lists come out of the locator in name order, so a mismatch at any position
/// means a file is missing on one side.
fn pair_reads(
    (forward_suffix, forward): (&str, &[PathBuf]),
    (reverse_suffix, reverse): (&str, &[PathBuf]),
) -> Result<Vec<(String, PathBuf, PathBuf)>, PipelineError> {
    if forward.len() != reverse.len() {
        return Err(PipelineError::UnpairedReads {
            stage: StageName::Align,
            forward: format!("{} forward read file(s)", forward.len()),
            reverse: format!("{} reverse read file(s)", reverse.len()),
        });
    }

    let mut pairs = Vec::with_capacity(forward.len());
    for (forward_reads, reverse_reads) in forward.iter().zip(reverse.iter()) {
        let sample = sample_name(forward_reads, forward_suffix);
        if sample != sample_name(reverse_reads, reverse_suffix) {
            return Err(PipelineError::UnpairedReads {
                stage: StageName::Align,
                forward: forward_reads.display().to_string(),
                reverse: reverse_reads.display().to_string(),
            });
        }
        pairs.push((sample, forward_reads.clone(), reverse_reads.clone()));
    }
    Ok(pairs)
}


/// Runs split, align, sort, assemble, merge, (quantify) and normalize in that order.
pub struct TranscriptQuantPipeline<'a, R: CommandRunner> {
    config: &'a RunConfig,
    runner: &'a R,
}

impl<'a, R: CommandRunner> TranscriptQuantPipeline<'a, R> {
    pub fn new(config: &'a RunConfig, runner: &'a R) -> Self {
        TranscriptQuantPipeline { config, runner }
    }

    /// Every external program this run may start, with the stage that starts it.
    pub fn required_tools(&self) -> Vec<(StageName, String)> {
        let mut tools = vec![(StageName::Split, self.config.splitter_program.clone())];
        for spec in STAGE_SPECS.iter() {
            if spec.name == StageName::Quantify && !self.config.quantify {
                continue;
            }
            tools.extend(spec.programs.iter().map(|program| (spec.name, program.to_string())));
        }
        tools
    }

    /// Executes the whole chain, aborting on the first error.
    pub async fn run(&self) -> Result<PipelineOutputs, PipelineError> {
        info!(
            "Starting run '{}': samples {}, genome {}, output {}",
            self.config.run_name,
            self.config.sample_root.display(),
            self.config.genome_root.display(),
            self.config.output_root.display()
        );
        let mut reports = Vec::new();

        let split = self.timed(StageName::Split, &mut reports, |r| self.split(r)).await?;
        let align = self.timed(StageName::Align, &mut reports, |r| self.align(&split.dir, r)).await?;
        let sort = self.timed(StageName::Sort, &mut reports, |r| self.sort(&align.dir, r)).await?;
        let assemble = self.timed(StageName::Assemble, &mut reports, |r| self.assemble(&sort.dir, r)).await?;
        let merge = self.timed(StageName::Merge, &mut reports, |r| self.merge(&assemble.dir, r)).await?;

        let merged_gtf = merge
            .with_role(ArtifactRole::MergedAnnotation)
            .first()
            .map(|artifact| artifact.path.clone())
            .unwrap_or_else(|| merge.dir.join(MERGED_GTF));

        let quantify = if self.config.quantify {
            Some(self.timed(StageName::Quantify, &mut reports, |r| self.quantify(&sort.dir, &merged_gtf, r)).await?)
        } else {
            debug!("Quantification disabled; normalizing sorted alignments directly");
            None
        };

        let normalize = self
            .timed(StageName::Normalize, &mut reports, |r| {
                self.normalize(&sort.dir, quantify.as_ref(), &merged_gtf, r)
            })
            .await?;

        info!("Run '{}' complete. Normalized output in {}", self.config.run_name, normalize.dir.display());
        Ok(PipelineOutputs {
            split,
            align,
            sort,
            assemble,
            merge,
            quantify,
            normalize,
            reports,
        })
    }

    async fn timed<F, Fut>(
        &self,
        stage: StageName,
        reports: &mut Vec<StageReport>,
        body: F,
    ) -> Result<StageOutput, PipelineError>
    where
        F: FnOnce(StageReport) -> Fut,
        Fut: std::future::Future<Output = Result<(StageOutput, StageReport), PipelineError>>,
    {
        info!("---- {} ----", stage);
        let start = Instant::now();
        let (output, mut report) = body(StageReport::new(stage)).await?;
        report.elapsed = start.elapsed();
        info!(
            "Stage {} finished: {} run, {} skipped in {} milliseconds.",
            stage,
            report.executed,
            report.skipped,
            report.elapsed.as_millis()
        );
        reports.push(report);
        Ok(output)
    }

    /// Gates one unit of work and, if needed, creates `dir` and runs the invocation.
    async fn execute_unit(
        &self,
        report: &mut StageReport,
        expected: &[PathBuf],
        dir: &Path,
        invocation: Invocation,
    ) -> Result<(), PipelineError> {
        if !gate(report.stage, expected, self.config.overwrite_for(report.stage)) {
            report.skipped += 1;
            return Ok(());
        }
        ensure_dir(dir)?;
        self.runner.run(&invocation).await?;
        report.executed += 1;
        Ok(())
    }

    // *******************
    // Stages
    // *******************

    async fn split(&self, mut report: StageReport) -> Result<(StageOutput, StageReport), PipelineError> {
        let raw_reads = require_files_with_suffix(StageName::Split, &self.config.sample_root, &self.config.read_ext)?;
        let split_dir = self.config.stage_dir(StageName::Split);
        let mut artifacts = Vec::new();

        for raw in &raw_reads {
            let produced = split_artifacts(raw, &self.config.read_ext, &split_dir);
            let invocation = Invocation::new(
                StageName::Split,
                &self.config.splitter_program,
                splitter::arg_generator(&self.config.splitter_args, raw, &split_dir),
            );
            self.execute_unit(&mut report, &artifact_paths(&produced), &split_dir, invocation).await?;
            artifacts.extend(produced);
        }

        Ok((StageOutput { dir: split_dir, artifacts }, report))
    }

    async fn align(&self, split_dir: &Path, mut report: StageReport) -> Result<(StageOutput, StageReport), PipelineError> {
        let [(forward_suffix, forward), (reverse_suffix, reverse)] = resolve_inputs::<2>(StageName::Align, split_dir)?;
        let pairs = pair_reads((forward_suffix, forward.as_slice()), (reverse_suffix, reverse.as_slice()))?;

        let align_dir = self.config.stage_dir(StageName::Align);
        let genome = self.config.genome_path();
        let index_base = hisat2::index_base(&genome, &align_dir);
        let index_probe = hisat2::index_probe(&index_base);

        let build = Invocation::new(
            StageName::Align,
            HISAT2_BUILD_TAG,
            hisat2::build_arg_generator(self.config.threads, &genome, &index_base),
        );
        self.execute_unit(&mut report, &[index_probe], &align_dir, build).await?;

        let mut artifacts = vec![Artifact::new(index_base.clone(), ArtifactRole::GenomeIndex)];
        for (sample, forward_reads, reverse_reads) in &pairs {
            let expected = expected_outputs(StageName::Align, &align_dir, Some(sample));
            let invocation = Invocation::new(
                StageName::Align,
                HISAT2_TAG,
                hisat2::align_arg_generator(self.config.threads, &index_base, forward_reads, reverse_reads, &expected[0]),
            );
            self.execute_unit(&mut report, &expected, &align_dir, invocation).await?;
            artifacts.push(Artifact::for_sample(expected[0].clone(), ArtifactRole::Alignment, sample));
        }

        Ok((StageOutput { dir: align_dir, artifacts }, report))
    }

    async fn sort(&self, align_dir: &Path, mut report: StageReport) -> Result<(StageOutput, StageReport), PipelineError> {
        let [(sam_suffix, alignments)] = resolve_inputs::<1>(StageName::Sort, align_dir)?;
        let sort_dir = self.config.stage_dir(StageName::Sort);
        let mut artifacts = Vec::new();

        for sam in &alignments {
            let sample = sample_name(sam, sam_suffix);
            let expected = expected_outputs(StageName::Sort, &sort_dir, Some(&sample));
            let invocation = Invocation::new(
                StageName::Sort,
                SAMTOOLS_TAG,
                samtools::sort_arg_generator(self.config.threads, sam, &expected[0]),
            );
            self.execute_unit(&mut report, &expected, &sort_dir, invocation).await?;
            artifacts.push(Artifact::for_sample(expected[0].clone(), ArtifactRole::SortedAlignment, &sample));
        }

        Ok((StageOutput { dir: sort_dir, artifacts }, report))
    }

    async fn assemble(&self, sort_dir: &Path, mut report: StageReport) -> Result<(StageOutput, StageReport), PipelineError> {
        let [(bam_suffix, sorted)] = resolve_inputs::<1>(StageName::Assemble, sort_dir)?;
        let annotation = self.config.annotation_path();
        let assemble_dir = self.config.stage_dir(StageName::Assemble);
        let mut artifacts = Vec::new();

        for bam in &sorted {
            let sample = sample_name(bam, bam_suffix);
            let sample_dir = assemble_dir.join(&sample);
            let expected = expected_outputs(StageName::Assemble, &assemble_dir, Some(&sample));
            let invocation = Invocation::new(
                StageName::Assemble,
                CUFFLINKS_TAG,
                cufflinks::arg_generator(self.config.threads, &annotation, &sample_dir, bam),
            );
            self.execute_unit(&mut report, &expected, &sample_dir, invocation).await?;
            artifacts.push(Artifact::for_sample(sample_dir, ArtifactRole::Assembly, &sample));
        }

        Ok((StageOutput { dir: assemble_dir, artifacts }, report))
    }

    async fn merge(&self, assemble_dir: &Path, mut report: StageReport) -> Result<(StageOutput, StageReport), PipelineError> {
        let merge_dir = self.config.stage_dir(StageName::Merge);
        let manifest = self.config.manifest_path();
        let expected = expected_outputs(StageName::Merge, &merge_dir, None);
        let overwrite = self.config.overwrite_for(StageName::Merge);

        if gate(StageName::Merge, &expected, overwrite) {
            let sample_dirs = find_subdirectories(assemble_dir)?;
            if sample_dirs.is_empty() {
                return Err(PipelineError::InputResolution {
                    stage: StageName::Merge,
                    pattern: stage_spec(StageName::Merge).input_suffixes.join(", "),
                    dir: assemble_dir.to_path_buf(),
                });
            }
            let mut transcripts = Vec::with_capacity(sample_dirs.len());
            for sample_dir in &sample_dirs {
                let [(_, gtfs)] = resolve_inputs::<1>(StageName::Merge, sample_dir)?;
                transcripts.extend(gtfs);
            }

            ensure_dir(&merge_dir)?;
            // The manifest lives in the Cuff directory, next to the merge output.
            if let Some(parent) = manifest.parent() {
                ensure_dir(parent)?;
            }
            write_manifest(&transcripts, &manifest)?;
            info!("Manifest of {} assemblies written to {}", transcripts.len(), manifest.display());

            let invocation = Invocation::new(
                StageName::Merge,
                CUFFMERGE_TAG,
                cuffmerge::arg_generator(self.config.threads, &merge_dir, &manifest),
            );
            self.runner.run(&invocation).await?;
            report.executed += 1;
        } else {
            report.skipped += 1;
        }

        let mut artifacts = vec![Artifact::new(manifest, ArtifactRole::Manifest)];
        artifacts.extend(expected.into_iter().map(|path| Artifact::new(path, ArtifactRole::MergedAnnotation)));
        Ok((StageOutput { dir: merge_dir, artifacts }, report))
    }

    async fn quantify(&self, sort_dir: &Path, merged_gtf: &Path, mut report: StageReport) -> Result<(StageOutput, StageReport), PipelineError> {
        let [(bam_suffix, sorted)] = resolve_inputs::<1>(StageName::Quantify, sort_dir)?;
        let quantify_dir = self.config.stage_dir(StageName::Quantify);
        let mut artifacts = Vec::new();

        for bam in &sorted {
            let sample = sample_name(bam, bam_suffix);
            let sample_dir = quantify_dir.join(&sample);
            let expected = expected_outputs(StageName::Quantify, &quantify_dir, Some(&sample));
            let invocation = Invocation::new(
                StageName::Quantify,
                CUFFQUANT_TAG,
                cuffquant::arg_generator(self.config.threads, &sample_dir, merged_gtf, bam),
            );
            self.execute_unit(&mut report, &expected, &sample_dir, invocation).await?;
            artifacts.push(Artifact::for_sample(expected[0].clone(), ArtifactRole::Abundances, &sample));
        }

        Ok((StageOutput { dir: quantify_dir, artifacts }, report))
    }

    async fn normalize(
        &self,
        sort_dir: &Path,
        quantify: Option<&StageOutput>,
        merged_gtf: &Path,
        mut report: StageReport,
    ) -> Result<(StageOutput, StageReport), PipelineError> {
        let samples = match quantify {
            Some(output) => artifact_paths(&output.artifacts),
            None => {
                let [(_, sorted)] = resolve_inputs::<1>(StageName::Normalize, sort_dir)?;
                sorted
            }
        };

        let normalize_dir = self.config.stage_dir(StageName::Normalize);
        let invocation = Invocation::new(
            StageName::Normalize,
            CUFFNORM_TAG,
            cuffnorm::arg_generator(self.config.threads, &normalize_dir, merged_gtf, &samples),
        );
        let expected = expected_outputs(StageName::Normalize, &normalize_dir, None);
        self.execute_unit(&mut report, &expected, &normalize_dir, invocation).await?;

        let artifacts = vec![Artifact::new(normalize_dir.clone(), ArtifactRole::NormalizedExpression)];
        Ok((StageOutput { dir: normalize_dir, artifacts }, report))
    }
}


/// Runs the pipeline with real child processes.
pub async fn run(config: &RunConfig) -> Result<PipelineOutputs, PipelineError> {
    let runner = ProcessRunner;
    TranscriptQuantPipeline::new(config, &runner).run().await
}
