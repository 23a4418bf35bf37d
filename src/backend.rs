use crate::config::SimulatorConfig;
use anyhow::{Result, bail};
use ndarray::Array4;
use rand::prelude::*;
use rand_chacha::ChaCha12Rng;
use std::hash::{DefaultHasher, Hash, Hasher};

/// The simulation engine boundary: given a fully configured instance,
/// produce a time axis and an output tensor of shape
/// (time, state_var, node, mode).
pub trait SimulationBackend: Send + Sync {
    fn run(&self, config: &SimulatorConfig) -> Result<(Vec<f64>, Array4<f64>)>;
}

/// Built-in reference backend: a noisy two-variable oscillator network.
///
/// Stands in for the real integrator so sweeps can run end to end from
/// the CLI. Deterministic for a given configuration, which also makes it
/// usable as a test fixture.
pub struct OscillatorBackend;

impl SimulationBackend for OscillatorBackend {
    fn run(&self, config: &SimulatorConfig) -> Result<(Vec<f64>, Array4<f64>)> {
        if config.sample_period <= 0.0 {
            bail!("sample period must be positive, is {}", config.sample_period);
        }
        let n_time = (config.length / config.sample_period) as usize;
        if n_time == 0 {
            bail!("simulation length {} yields no samples", config.length);
        }
        let n_node = config.connectivity.number_of_regions;

        let first = |name: &str, default: f64| -> f64 {
            config
                .model_parameters
                .get(name)
                .and_then(|vals| vals.first())
                .copied()
                .unwrap_or(default)
        };
        let amplitude = first("a", 1.0);
        let tau = first("tau", 1.0).max(1e-3);
        let coupling = config
            .coupling_parameters
            .get("a")
            .and_then(|vals| vals.first())
            .copied()
            .unwrap_or(0.0);

        // Faster conduction and stronger coupling pull nodes together;
        // good enough to make the metrics respond to the swept axes.
        let omega = (1.0 + config.conduction_speed / 10.0) / tau;
        let spread = 1.0 / (1.0 + coupling + config.conduction_speed / 10.0);

        let mut rng = ChaCha12Rng::seed_from_u64(seed_of(config));
        let mut t = Vec::with_capacity(n_time);
        let mut y = Array4::zeros((n_time, 2, n_node, 1));
        let phases: Vec<f64> = (0..n_node)
            .map(|node| spread * node as f64 / n_node as f64 * std::f64::consts::TAU)
            .collect();

        for it in 0..n_time {
            let time = (it + 1) as f64 * config.sample_period;
            t.push(time);
            for (node, &phase) in phases.iter().enumerate() {
                let arg = omega * time / 1000.0 * std::f64::consts::TAU + phase;
                let noise = 0.01 * (rng.random::<f64>() - 0.5);
                y[[it, 0, node, 0]] = amplitude * arg.sin() + noise;
                y[[it, 1, node, 0]] = amplitude * arg.cos() + noise;
            }
        }
        Ok((t, y))
    }
}

fn seed_of(config: &SimulatorConfig) -> u64 {
    let mut hasher = DefaultHasher::new();
    config.model_class.hash(&mut hasher);
    config.connectivity.title.hash(&mut hasher);
    config.conduction_speed.to_bits().hash(&mut hasher);
    for (name, values) in &config.model_parameters {
        name.hash(&mut hasher);
        for value in values {
            value.to_bits().hash(&mut hasher);
        }
    }
    for (name, values) in &config.coupling_parameters {
        name.hash(&mut hasher);
        for value in values {
            value.to_bits().hash(&mut hasher);
        }
    }
    hasher.finish()
}
