use anyhow::{Result, bail};
use ndarray::{Array4, Axis};

/// Identifiers accepted by the metric registry.
pub const METRIC_NAMES: [&str; 5] = [
    "GlobalVariance",
    "KuramotoIndex",
    "ProxyMetastabilitySynchrony Metastability",
    "ProxyMetastabilitySynchrony Synchrony",
    "VarianceNodeVariance",
];

/// A summary statistic for one simulation run.
///
/// Consumes the time axis and the output tensor of shape
/// (time, state_var, node, mode) and produces a small result vector.
pub trait Metric: Send + Sync {
    fn compute(&self, t: &[f64], y: &Array4<f64>) -> Result<Vec<f64>>;

    /// Number of values this metric contributes to the run's result
    /// vector; used to place NaNs when the computation fails.
    fn output_len(&self) -> usize {
        1
    }
}

/// Reject unknown metric names at sweep-construction time.
pub fn validate_names(names: &[String]) -> Result<()> {
    if names.is_empty() {
        bail!("at least one metric must be selected");
    }
    for name in names {
        if !METRIC_NAMES.contains(&name.as_str()) {
            bail!("unknown metric {name:?}, expected one of {METRIC_NAMES:?}");
        }
    }
    Ok(())
}

/// Build the requested metrics, each parameterized by the sampling
/// period of the run it will score.
pub fn build_metrics(names: &[String], sample_period: f64) -> Result<Vec<Box<dyn Metric>>> {
    validate_names(names)?;
    names
        .iter()
        .map(|name| -> Result<Box<dyn Metric>> {
            Ok(match name.as_str() {
                "GlobalVariance" => Box::new(GlobalVariance::new(sample_period)),
                "KuramotoIndex" => Box::new(KuramotoIndex { sample_period }),
                "ProxyMetastabilitySynchrony Metastability" => {
                    Box::new(ProxyMetastabilitySynchrony::new(Mode::Metastability, sample_period))
                }
                "ProxyMetastabilitySynchrony Synchrony" => {
                    Box::new(ProxyMetastabilitySynchrony::new(Mode::Synchrony, sample_period))
                }
                "VarianceNodeVariance" => Box::new(VarianceNodeVariance::new(sample_period)),
                other => bail!("unknown metric {other:?}"),
            })
        })
        .collect()
}

/// Score one run: the ordered concatenation of all requested metrics'
/// outputs. A metric that fails contributes NaN placeholders instead of
/// aborting the run.
pub fn score_run(metrics: &[Box<dyn Metric>], t: &[f64], y: &Array4<f64>) -> Vec<f64> {
    let mut result = Vec::with_capacity(metrics.len());
    for metric in metrics {
        match metric.compute(t, y) {
            Ok(values) => result.extend(values),
            Err(error) => {
                log::warn!("metric computation failed, recording NaN: {error:#}");
                result.extend(std::iter::repeat_n(f64::NAN, metric.output_len()));
            }
        }
    }
    result
}

/// Variance of the zero-centered signal over all nodes and time points
/// past the transient.
pub struct GlobalVariance {
    sample_period: f64,
    start_point: f64,
}

impl GlobalVariance {
    pub fn new(sample_period: f64) -> Self {
        Self {
            sample_period,
            start_point: 500.0,
        }
    }
}

impl Metric for GlobalVariance {
    fn compute(&self, t: &[f64], y: &Array4<f64>) -> Result<Vec<f64>> {
        let signal = steady_state(t, y, self.start_point, self.sample_period)?;
        let flat: Vec<f64> = signal.iter().copied().collect();
        let mean = mean(&flat);
        let var = flat.iter().map(|&v| (v - mean).powi(2)).sum::<f64>() / flat.len() as f64;
        Ok(vec![var])
    }
}

/// Time-averaged Kuramoto order parameter. Requires two state variables,
/// interpreted as the (x, y) plane from which per-node phases are taken.
pub struct KuramotoIndex {
    pub sample_period: f64,
}

impl Metric for KuramotoIndex {
    fn compute(&self, _t: &[f64], y: &Array4<f64>) -> Result<Vec<f64>> {
        let (n_time, n_svar, n_node, _) = y.dim();
        if n_svar < 2 {
            bail!("Kuramoto index needs two state variables, found {n_svar}");
        }
        if n_time == 0 || n_node == 0 {
            bail!("empty time series");
        }
        let mut order_sum = 0.0;
        for it in 0..n_time {
            let (mut re, mut im) = (0.0, 0.0);
            for node in 0..n_node {
                let theta = y[[it, 1, node, 0]].atan2(y[[it, 0, node, 0]]);
                re += theta.cos();
                im += theta.sin();
            }
            order_sum += (re * re + im * im).sqrt() / n_node as f64;
        }
        Ok(vec![order_sum / n_time as f64])
    }
}

pub enum Mode {
    Metastability,
    Synchrony,
}

/// Proxies for metastability and synchrony over the spatial coherence
/// trace: coherence per time point is the inverse of one plus the
/// spatial variance; synchrony is its temporal mean, metastability its
/// temporal standard deviation.
pub struct ProxyMetastabilitySynchrony {
    mode: Mode,
    sample_period: f64,
    start_point: f64,
}

impl ProxyMetastabilitySynchrony {
    pub fn new(mode: Mode, sample_period: f64) -> Self {
        Self {
            mode,
            sample_period,
            start_point: 500.0,
        }
    }
}

impl Metric for ProxyMetastabilitySynchrony {
    fn compute(&self, t: &[f64], y: &Array4<f64>) -> Result<Vec<f64>> {
        let signal = steady_state(t, y, self.start_point, self.sample_period)?;
        let coherence: Vec<f64> = signal
            .axis_iter(Axis(0))
            .map(|frame| {
                let nodes: Vec<f64> = frame.iter().copied().collect();
                let mean = mean(&nodes);
                let var =
                    nodes.iter().map(|&v| (v - mean).powi(2)).sum::<f64>() / nodes.len() as f64;
                1.0 / (1.0 + var)
            })
            .collect();
        let mean_coh = mean(&coherence);
        Ok(vec![match self.mode {
            Mode::Synchrony => mean_coh,
            Mode::Metastability => {
                (coherence.iter().map(|&v| (v - mean_coh).powi(2)).sum::<f64>()
                    / coherence.len() as f64)
                    .sqrt()
            }
        }])
    }
}

/// Variance across nodes of each node's temporal variance.
pub struct VarianceNodeVariance {
    sample_period: f64,
    start_point: f64,
}

impl VarianceNodeVariance {
    pub fn new(sample_period: f64) -> Self {
        Self {
            sample_period,
            start_point: 500.0,
        }
    }
}

impl Metric for VarianceNodeVariance {
    fn compute(&self, t: &[f64], y: &Array4<f64>) -> Result<Vec<f64>> {
        let signal = steady_state(t, y, self.start_point, self.sample_period)?;
        let (n_time, n_node) = signal.dim();
        let node_vars: Vec<f64> = (0..n_node)
            .map(|node| {
                let series: Vec<f64> = (0..n_time).map(|it| signal[[it, node]]).collect();
                let mean = mean(&series);
                series.iter().map(|&v| (v - mean).powi(2)).sum::<f64>() / series.len() as f64
            })
            .collect();
        let mean_var = mean(&node_vars);
        let var = node_vars
            .iter()
            .map(|&v| (v - mean_var).powi(2))
            .sum::<f64>()
            / node_vars.len() as f64;
        Ok(vec![var])
    }
}

/// First state variable, first mode, with the transient cut off.
fn steady_state(
    t: &[f64],
    y: &Array4<f64>,
    start_point: f64,
    sample_period: f64,
) -> Result<ndarray::Array2<f64>> {
    let (n_time, n_svar, n_node, n_mode) = y.dim();
    if n_time != t.len() {
        bail!("time axis length {} does not match data length {n_time}", t.len());
    }
    if n_svar == 0 || n_node == 0 || n_mode == 0 {
        bail!("empty output tensor");
    }
    let skip = ((start_point / sample_period) as usize).min(n_time.saturating_sub(1));
    let mut signal = ndarray::Array2::zeros((n_time - skip, n_node));
    for it in skip..n_time {
        for node in 0..n_node {
            signal[[it - skip, node]] = y[[it, 0, node, 0]];
        }
    }
    Ok(signal)
}

fn mean(vals: &[f64]) -> f64 {
    if vals.is_empty() {
        return f64::NAN;
    }
    vals.iter().sum::<f64>() / vals.len() as f64
}
