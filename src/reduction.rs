use crate::config::{CONNECTIVITY, ParamValue};
use anyhow::{Context, Result, bail};
use ndarray::Array3;
use rmp_serde::{decode, encode};
use serde::{Deserialize, Serialize};
use std::{
    fs::File,
    io::{BufReader, BufWriter},
    path::{Path, PathBuf},
};

/// The persisted sweep artifact.
///
/// Axis values and metric names are stored as JSON-encoded lists; the
/// result array is dense with shape (num_metrics, len(x), len(y)).
#[derive(Debug, Serialize, Deserialize)]
pub struct SweepResult {
    pub x_title: String,
    pub y_title: String,
    pub x_value: String,
    pub y_value: String,
    pub metrics_names: String,
    pub results: Array3<f64>,
}

impl SweepResult {
    pub fn store<P: AsRef<Path>>(&self, file: P) -> Result<()> {
        let file = file.as_ref();
        let file = File::create(file).with_context(|| format!("failed to create {file:?}"))?;
        let mut writer = BufWriter::new(file);
        encode::write(&mut writer, self).context("failed to serialize sweep result")?;
        Ok(())
    }

    pub fn load<P: AsRef<Path>>(file: P) -> Result<Self> {
        let file = file.as_ref();
        let file = File::open(file).with_context(|| format!("failed to open {file:?}"))?;
        let mut reader = BufReader::new(file);
        decode::from_read(&mut reader).context("failed to deserialize sweep result")
    }
}

/// Final aggregation step: reshape the flat list of per-run result
/// vectors into the dense (metric, param1, param2) array and persist it.
#[derive(Debug, Clone)]
pub struct SaveDataToDisk {
    pub param1: String,
    pub param2: String,
    pub x_values: Vec<ParamValue>,
    pub y_values: Vec<ParamValue>,
    pub metrics: Vec<String>,
    pub file_name: String,
}

impl SaveDataToDisk {
    /// Reduce and persist. `metric_data` holds one result vector per run,
    /// in row-major order over (param1, param2).
    pub fn call(&self, metric_data: &[Vec<f64>]) -> Result<PathBuf> {
        let n_x = self.x_values.len();
        let n_y = self.y_values.len();
        let n_metrics = self.metrics.len();
        if metric_data.len() != n_x * n_y {
            bail!(
                "expected {} result vectors for a {n_x}x{n_y} sweep, got {}",
                n_x * n_y,
                metric_data.len()
            );
        }
        for (run, vector) in metric_data.iter().enumerate() {
            if vector.len() != n_metrics {
                bail!(
                    "run {run} produced {} metric values, expected {n_metrics}",
                    vector.len()
                );
            }
        }

        let mut results = Array3::zeros((n_metrics, n_x, n_y));
        for ix in 0..n_x {
            for iy in 0..n_y {
                let vector = &metric_data[ix * n_y + iy];
                for im in 0..n_metrics {
                    results[[im, ix, iy]] = vector[im];
                }
            }
        }

        let result = SweepResult {
            x_title: self.param1.clone(),
            y_title: self.param2.clone(),
            x_value: axis_json(&self.param1, &self.x_values)?,
            y_value: axis_json(&self.param2, &self.y_values)?,
            metrics_names: serde_json::to_string(&self.metrics)
                .context("failed to encode metric names")?,
            results,
        };

        let mut file_name = self.file_name.clone();
        if !file_name.contains(".h5") {
            file_name.push_str(".h5");
        }
        result.store(&file_name)?;
        log::info!("{file_name} file created");
        Ok(PathBuf::from(file_name))
    }
}

/// JSON-encode one axis's values. Connectivity objects are too large for
/// the axis metadata slot, so they are replaced by truncated display
/// identifiers.
fn axis_json(param: &str, values: &[ParamValue]) -> Result<String> {
    let encoded = if param == CONNECTIVITY {
        let ids = values
            .iter()
            .map(|val| {
                let title = &val.as_connectivity()?.title;
                let short: String = title.chars().take(25).collect();
                Ok(format!("{short}..."))
            })
            .collect::<Result<Vec<_>>>()?;
        serde_json::to_string(&ids)
    } else {
        let floats = values
            .iter()
            .map(ParamValue::as_scalar)
            .collect::<Result<Vec<_>>>()?;
        serde_json::to_string(&floats)
    };
    encoded.context("failed to encode axis values")
}
