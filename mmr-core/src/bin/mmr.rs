use std::error::Error;
use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, ValueEnum};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use mmr_core::pipeline::{DescriptorMode, PipelineJob, PipelineOrchestrator};

#[derive(Debug, Clone, Copy, ValueEnum)]
enum Mode {
    Single,
    Batch,
}

#[derive(Parser)]
#[command(name = "mmr")]
#[command(about = "Vehicle make and model recognition")]
struct Args {
    #[arg(help = "Job file (JSON)")]
    job: PathBuf,

    #[arg(short, long, value_enum, help = "Override the job's descriptor mode")]
    mode: Option<Mode>,

    #[arg(short, long, help = "Write normalized crops to this directory")]
    save_crops: Option<PathBuf>,

    #[arg(long, default_value = "info", help = "Log filter when RUST_LOG is unset")]
    log_level: String,
}

fn run(args: Args) -> Result<(), Box<dyn Error>> {
    let mut job = PipelineJob::load(&args.job)?;
    if let Some(mode) = args.mode {
        job.mode = match mode {
            Mode::Single => DescriptorMode::Single,
            Mode::Batch => DescriptorMode::Batch,
        };
    }
    if args.save_crops.is_some() {
        job.save_crops = args.save_crops;
    }

    let mut orchestrator: PipelineOrchestrator = PipelineOrchestrator::from_job(&job);
    let report = orchestrator.run_job(&job)?;

    for frame in &report.frames {
        info!(
            "{}: {} ({:?})",
            frame.image.display(),
            frame.label,
            frame.confidence
        );
    }
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

fn main() -> ExitCode {
    let args = Args::parse();
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&args.log_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    match run(args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            error!("{err}");
            eprintln!("mmr: {err}");
            ExitCode::FAILURE
        }
    }
}
