use anyhow::{Context, Result};
use clap::Parser;
use gridsweep::{
    backend::OscillatorBackend,
    config::SweepConfig,
    engine,
    progress::{PROGRESS_STATUS, ProgressReporter},
};
use std::{path::PathBuf, sync::Arc};

#[derive(Debug, Parser)]
#[command(version, about)]
struct CLI {
    /// TOML file describing the parameter sweep.
    sweep_file: PathBuf,

    /// Directory for per-run result caching; omit to disable resume.
    #[arg(long)]
    checkpoint_dir: Option<PathBuf>,

    /// Shared counter file polled by detached front-ends.
    #[arg(long, default_value = PROGRESS_STATUS)]
    progress_file: PathBuf,
}

fn main() {
    env_logger::Builder::new()
        .format_timestamp_millis()
        .filter_level(log::LevelFilter::Info)
        .parse_default_env()
        .init();

    if let Err(error) = run_cli() {
        log::error!("{error:#?}");
        std::process::exit(1);
    }
}

fn run_cli() -> Result<()> {
    let args = CLI::parse();
    log::info!("{args:#?}");

    let cfg = SweepConfig::from_file(&args.sweep_file)
        .with_context(|| format!("failed to load sweep file {:?}", args.sweep_file))?;
    let progress = ProgressReporter::file(&args.progress_file);

    let output = engine::launch_local(
        &cfg,
        Arc::new(OscillatorBackend),
        args.checkpoint_dir,
        progress,
    )?;
    log::info!("sweep results stored at {output:?}");

    Ok(())
}
