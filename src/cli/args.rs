use std::path::PathBuf;

use clap::Parser;

use crate::config::defs::{
    StageName, DEFAULT_ANNOTATION_FILE, DEFAULT_GENOME_FILE, DEFAULT_GENOME_ROOT, DEFAULT_OUTPUT_ROOT,
    DEFAULT_READ_EXT, DEFAULT_RUN_NAME, DEFAULT_SAMPLE_ROOT, DEFAULT_THREADS, PYTHON_TAG, SPLITTER_TAG,
};

#[derive(Parser, Debug, Clone)]
#[command(name = "cuffpipe", version, about = "Split, align, sort, assemble, merge and normalize RNA-seq samples.")]
pub struct Arguments {

    #[arg(default_value = DEFAULT_RUN_NAME, help = "Name of the run, used in every output directory name")]
    pub run_name: String,

    #[arg(default_value = DEFAULT_SAMPLE_ROOT, help = "Directory holding the raw read files")]
    pub sample_root: PathBuf,

    #[arg(default_value = DEFAULT_GENOME_ROOT, help = "Directory holding the genome FASTA and annotation")]
    pub genome_root: PathBuf,

    #[arg(default_value = DEFAULT_OUTPUT_ROOT, help = "Directory all stage outputs are written below")]
    pub output_root: PathBuf,

    #[arg(default_value = "false", help = "Re-run every stage even if its output exists [true/false]")]
    pub overwrite: String,

    #[arg(short = 'v', long = "verbose", action)]
    pub verbose: bool,

    #[arg(long, default_value = DEFAULT_GENOME_FILE, help = "Genome FASTA file name inside the genome root")]
    pub genome_file: String,

    #[arg(long, default_value = DEFAULT_ANNOTATION_FILE, help = "Reference annotation (GTF/GFF) file name inside the genome root")]
    pub annotation: String,

    #[arg(long, default_value = DEFAULT_READ_EXT)]
    pub read_ext: String,

    #[arg(
        long,
        value_delimiter = ' ',
        default_values = [PYTHON_TAG, SPLITTER_TAG],
        help = "Command splitting a raw read file into forward and reverse reads, e.g. \"python Splitter.py\""
    )]
    pub splitter: Vec<String>,

    #[arg(short = 't', long, default_value_t = DEFAULT_THREADS)]
    pub threads: usize,

    #[arg(long = "rerun", value_enum, help = "Overwrite the outputs of this stage only (repeatable)")]
    pub rerun: Vec<StageName>,

    #[arg(long, default_value_t = false, help = "Run cuffquant per sample and normalize the abundances instead of the alignments")]
    pub quantify: bool,

    #[arg(long, default_value_t = false, help = "Check that every external tool can be started before running")]
    pub check_tools: bool,
}
