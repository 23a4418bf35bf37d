use crate::backend::SimulationBackend;
use crate::checkpoint::CheckpointStore;
use crate::config::{SimulatorConfig, SweepConfig};
use crate::metrics::{self, Metric};
use crate::progress::ProgressReporter;
use crate::reduction::SaveDataToDisk;
use crate::sequence::SimSequence;
use anyhow::{Context, Result};
use rayon::prelude::*;
use std::{path::PathBuf, sync::Arc};

/// The per-run procedure shared by both engine variants: consult the
/// checkpoint cache, otherwise simulate, score and checkpoint, then
/// report progress.
fn run_one(
    index: usize,
    config: &SimulatorConfig,
    backend: &dyn SimulationBackend,
    metric_set: &[Box<dyn Metric>],
    checkpoint: &CheckpointStore,
    progress: &ProgressReporter,
) -> Result<Vec<f64>> {
    let result = match checkpoint
        .read(index)
        .with_context(|| format!("failed to load checkpoint {index}"))?
    {
        Some(cached) => cached,
        None => {
            let (t, y) = backend
                .run(config)
                .with_context(|| format!("simulation {index} failed"))?;
            let result = metrics::score_run(metric_set, &t, &y);
            checkpoint
                .write(index, &result)
                .with_context(|| format!("failed to checkpoint run {index}"))?;
            result
        }
    };
    progress.tick();
    Ok(result)
}

/// Local execution engine: drives the sequence through a bounded
/// thread pool and hands the ordered result list to the reduction.
pub struct LocalExec {
    pub seq: SimSequence,
    pub metrics: Vec<Box<dyn Metric>>,
    pub reduction: Option<SaveDataToDisk>,
    pub backend: Arc<dyn SimulationBackend>,
    pub checkpoint: CheckpointStore,
    pub progress: ProgressReporter,
}

impl LocalExec {
    /// Run the whole sweep on `n_threads` workers, blocking until the
    /// pool drains. Returns the reduced artifact's path when a reduction
    /// is configured.
    pub fn run(&mut self, n_threads: usize) -> Result<Option<PathBuf>> {
        log::info!("simulation starts");
        self.progress.start();
        self.checkpoint
            .init(self.seq.params(), self.seq.values())
            .context("failed to init checkpoint dir")?;
        self.seq.reset();
        let specs = self.seq.run_specs().context("failed to build run specs")?;
        // Preparation phase complete.
        self.progress.tick();

        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(n_threads)
            .build()
            .context("failed to build worker pool")?;

        let backend = &*self.backend;
        let metric_set = &self.metrics;
        let checkpoint = &self.checkpoint;
        let progress = &self.progress;
        // Collected in original index order regardless of completion
        // order; the first per-run error aborts the sweep.
        let results: Vec<Vec<f64>> = pool.install(|| {
            specs
                .par_iter()
                .map(|(index, config)| {
                    run_one(*index, config, backend, metric_set, checkpoint, progress)
                })
                .collect::<Result<_>>()
        })?;

        log::info!("completed {} runs, local launch finished", results.len());
        match &self.reduction {
            Some(reduction) => Ok(Some(reduction.call(&results)?)),
            None => Ok(None),
        }
    }
}

/// One schedulable unit for a distributed client.
pub struct ClusterTask {
    pub index: usize,
    pub config: SimulatorConfig,
}

/// A distributed task scheduler. Scheduling failures and retries are the
/// client's responsibility; the engine adds none of its own.
pub trait ClusterClient {
    /// Schedule all tasks and return their results in task order.
    fn execute(
        &self,
        tasks: Vec<ClusterTask>,
        run: &(dyn Fn(usize, &SimulatorConfig) -> Result<Vec<f64>> + Sync),
    ) -> Result<Vec<Vec<f64>>>;

    /// Run the downstream reduction once all tasks have completed.
    fn reduce(&self, reduction: &SaveDataToDisk, results: &[Vec<f64>]) -> Result<PathBuf> {
        reduction.call(results)
    }
}

/// What a distributed sweep hands back to the caller.
pub enum ClusterOutcome {
    /// Path of the reduced artifact.
    Reduced(PathBuf),
    /// Raw per-run result vectors when no reduction is configured.
    Results(Vec<Vec<f64>>),
}

/// Distributed execution engine: same per-run contract as [`LocalExec`],
/// scheduling delegated to a [`ClusterClient`].
pub struct ClusterExec {
    pub seq: SimSequence,
    pub metrics: Vec<Box<dyn Metric>>,
    pub reduction: Option<SaveDataToDisk>,
    pub backend: Arc<dyn SimulationBackend>,
    pub checkpoint: CheckpointStore,
    pub progress: ProgressReporter,
}

impl ClusterExec {
    pub fn run<C: ClusterClient>(&mut self, client: &C) -> Result<ClusterOutcome> {
        self.progress.start();
        self.checkpoint
            .init(self.seq.params(), self.seq.values())
            .context("failed to init checkpoint dir")?;
        self.seq.reset();
        let tasks: Vec<ClusterTask> = self
            .seq
            .run_specs()
            .context("failed to build run specs")?
            .into_iter()
            .map(|(index, config)| ClusterTask { index, config })
            .collect();
        self.progress.tick();

        let backend = &*self.backend;
        let metric_set = &self.metrics;
        let checkpoint = &self.checkpoint;
        let progress = &self.progress;
        let run = |index: usize, config: &SimulatorConfig| {
            run_one(index, config, backend, metric_set, checkpoint, progress)
        };
        let results = client.execute(tasks, &run)?;

        match &self.reduction {
            Some(reduction) => Ok(ClusterOutcome::Reduced(
                client.reduce(reduction, &results)?,
            )),
            None => Ok(ClusterOutcome::Results(results)),
        }
    }
}

/// In-process scheduler, the default [`ClusterClient`] and the test
/// stand-in for a real distributed deployment.
pub struct ThreadCluster {
    pub n_threads: usize,
}

impl ClusterClient for ThreadCluster {
    fn execute(
        &self,
        tasks: Vec<ClusterTask>,
        run: &(dyn Fn(usize, &SimulatorConfig) -> Result<Vec<f64>> + Sync),
    ) -> Result<Vec<Vec<f64>>> {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(self.n_threads)
            .build()
            .context("failed to build cluster pool")?;
        pool.install(|| {
            tasks
                .par_iter()
                .map(|task| run(task.index, &task.config))
                .collect::<Result<_>>()
        })
    }
}

/// Convenience wrapper used by the CLI: build the sequence, metric set
/// and reduction from a [`SweepConfig`] and run it locally.
pub fn launch_local(
    cfg: &SweepConfig,
    backend: Arc<dyn SimulationBackend>,
    checkpoint_dir: Option<PathBuf>,
    progress: ProgressReporter,
) -> Result<PathBuf> {
    cfg.validate().context("invalid sweep configuration")?;
    let mut exec = LocalExec {
        seq: SimSequence::from_sweep(cfg).context("failed to build run sequence")?,
        metrics: metrics::build_metrics(&cfg.metrics, cfg.simulator.sample_period)
            .context("failed to build metric set")?,
        reduction: Some(SaveDataToDisk {
            param1: cfg.param1.clone(),
            param2: cfg.param2.clone(),
            x_values: cfg.param1_values.clone(),
            y_values: cfg.param2_values.clone(),
            metrics: cfg.metrics.clone(),
            file_name: cfg.file_name.clone(),
        }),
        backend,
        checkpoint: CheckpointStore::new(checkpoint_dir),
        progress,
    };
    let path = exec.run(cfg.n_threads)?;
    path.context("reduction produced no artifact")
}
