use std::env;
use std::io::Write;
use std::time::Instant;

use anyhow::Result;
use log::{LevelFilter, debug, info, error};
use env_logger::Builder;

use cuffpipe::cli::parse;
use cuffpipe::config::defs::{PipelineError, RunConfig};
use cuffpipe::pipelines::transcript_quant::TranscriptQuantPipeline;
use cuffpipe::utils::command::{check_tools, ProcessRunner};
use cuffpipe::utils::system::detect_cores;


#[tokio::main]
async fn main() -> Result<()> {
    let run_start = Instant::now();

    let args = parse();

    let log_level = if args.verbose {
        LevelFilter::Debug
    } else {
        LevelFilter::Info
    };

    Builder::new()
        .filter_level(log_level)
        .format(|buf, record| {
            writeln!(
                buf,
                "[{}] {}: {}",
                chrono::Local::now().format("%Y-%m-%d %H:%M:%S"),
                record.level(),
                record.args()
            )
        })
        .init();

    println!("\n-------------\n CuffPipe\n-------------\n");

    let dir = env::current_dir()?;
    info!("The current directory is {:?}\n", dir);

    let max_cores = detect_cores();
    debug!("Detected {} physical cores; tools will use at most that many threads", max_cores);

    let check = args.check_tools;
    let run_config = match RunConfig::from_args(&args, &dir, max_cores).and_then(|config| {
        config.validate()?;
        Ok(config)
    }) {
        Ok(config) => config,
        Err(e) => {
            error!("Pipeline not started: {}", e);
            std::process::exit(1);
        }
    };

    if let Err(e) = pipeline_run(&run_config, check).await {
        match e.stage() {
            Some(stage) => error!("Pipeline failed in stage {}: {} at {} milliseconds.", stage, e, run_start.elapsed().as_millis()),
            None => error!("Pipeline failed: {} at {} milliseconds.", e, run_start.elapsed().as_millis()),
        }
        std::process::exit(1);
    }

    println!("Run complete: {} milliseconds.", run_start.elapsed().as_millis());
    Ok(())
}


async fn pipeline_run(run_config: &RunConfig, check: bool) -> Result<(), PipelineError> {
    let runner = ProcessRunner;
    let pipeline = TranscriptQuantPipeline::new(run_config, &runner);
    if check {
        check_tools(&pipeline.required_tools()).await?;
    }
    let outputs = pipeline.run().await?;
    for report in &outputs.reports {
        debug!("{}: {} run, {} skipped", report.stage, report.executed, report.skipped);
    }
    Ok(())
}
