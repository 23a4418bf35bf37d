use crate::config::ParamValue;
use anyhow::{Context, Result, bail};
use rmp_serde::{decode, encode};
use std::{
    fs::{self, File},
    io::{BufReader, BufWriter},
    path::{Path, PathBuf},
};

/// Per-run result cache keyed by sequence index.
///
/// Each index maps to its own file, so concurrent workers never contend.
/// With no directory configured the store is a no-op, the common case
/// for non-resumable interactive runs.
#[derive(Debug, Clone)]
pub struct CheckpointStore {
    dir: Option<PathBuf>,
}

impl CheckpointStore {
    pub fn new(dir: Option<PathBuf>) -> Self {
        Self { dir }
    }

    pub fn disabled() -> Self {
        Self { dir: None }
    }

    /// Prepare the checkpoint directory, persisting the parameter names
    /// and full value matrix once for later auditing.
    ///
    /// Reusing an existing directory is allowed, but only when its
    /// recorded parameter names and run count match the current sweep;
    /// silently mixing incompatible checkpoints would corrupt results.
    pub fn init(&self, params: &[String], values: &[Vec<ParamValue>]) -> Result<()> {
        let Some(dir) = &self.dir else {
            return Ok(());
        };

        if dir.exists() {
            log::info!("reusing existing checkpoint dir {dir:?}");
            let params_file = dir.join("params.txt");
            let recorded = fs::read_to_string(&params_file)
                .with_context(|| format!("failed to read {params_file:?}"))?;
            let recorded: Vec<&str> = recorded.lines().collect();
            if recorded != params.iter().map(String::as_str).collect::<Vec<_>>() {
                bail!(
                    "checkpoint dir {dir:?} was written for params {recorded:?}, \
                     current sweep uses {params:?}"
                );
            }
            let recorded_values =
                read_values(dir).context("failed to read recorded value matrix")?;
            if recorded_values.len() != values.len() {
                bail!(
                    "checkpoint dir {dir:?} holds {} runs, current sweep has {}",
                    recorded_values.len(),
                    values.len()
                );
            }
            return Ok(());
        }

        fs::create_dir_all(dir).with_context(|| format!("failed to create {dir:?}"))?;
        fs::write(dir.join("params.txt"), params.join("\n"))
            .context("failed to write params.txt")?;

        let values: Vec<Vec<StoredValue>> = values
            .iter()
            .map(|row| row.iter().map(StoredValue::from).collect())
            .collect();
        let file = dir.join("param_vals.msgpack");
        let file =
            File::create(&file).with_context(|| format!("failed to create {file:?}"))?;
        let mut writer = BufWriter::new(file);
        encode::write(&mut writer, &values).context("failed to serialize value matrix")?;
        Ok(())
    }

    pub fn exists(&self, index: usize) -> bool {
        match self.index_file(index) {
            Some(file) => file.exists(),
            None => false,
        }
    }

    /// Read the cached result for `index`, or `None` when absent or when
    /// checkpointing is disabled.
    pub fn read(&self, index: usize) -> Result<Option<Vec<f64>>> {
        let Some(file) = self.index_file(index) else {
            return Ok(None);
        };
        if !file.exists() {
            return Ok(None);
        }
        let file = File::open(&file).with_context(|| format!("failed to open {file:?}"))?;
        let mut reader = BufReader::new(file);
        let result = decode::from_read(&mut reader).context("failed to deserialize checkpoint")?;
        Ok(Some(result))
    }

    /// Write the result for `index`. A checkpoint, once present, is
    /// authoritative and never recomputed.
    pub fn write(&self, index: usize, result: &[f64]) -> Result<()> {
        let Some(file) = self.index_file(index) else {
            return Ok(());
        };
        let file = File::create(&file).with_context(|| format!("failed to create {file:?}"))?;
        let mut writer = BufWriter::new(file);
        encode::write(&mut writer, result).context("failed to serialize checkpoint")?;
        Ok(())
    }

    fn index_file(&self, index: usize) -> Option<PathBuf> {
        self.dir.as_ref().map(|dir| dir.join(format!("{index}.msgpack")))
    }
}

fn read_values(dir: &Path) -> Result<Vec<Vec<StoredValue>>> {
    let file = dir.join("param_vals.msgpack");
    let file = File::open(&file).with_context(|| format!("failed to open {file:?}"))?;
    let mut reader = BufReader::new(file);
    decode::from_read(&mut reader).context("failed to deserialize value matrix")
}

/// Serializable form of a parameter value for the audit file.
#[derive(Debug, serde::Serialize, serde::Deserialize)]
enum StoredValue {
    Scalar(f64),
    Connectivity(String),
}

impl From<&ParamValue> for StoredValue {
    fn from(value: &ParamValue) -> Self {
        match value {
            ParamValue::Scalar(val) => StoredValue::Scalar(*val),
            ParamValue::Connectivity(conn) => StoredValue::Connectivity(conn.title.clone()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn params() -> Vec<String> {
        vec!["model.a".to_string(), "model.b".to_string()]
    }

    fn values() -> Vec<Vec<ParamValue>> {
        vec![
            vec![ParamValue::Scalar(1.0), ParamValue::Scalar(3.0)],
            vec![ParamValue::Scalar(2.0), ParamValue::Scalar(4.0)],
        ]
    }

    #[test]
    fn disabled_store_is_a_no_op() {
        let store = CheckpointStore::disabled();
        store.init(&params(), &values()).unwrap();
        store.write(0, &[1.0]).unwrap();
        assert!(!store.exists(0));
        assert!(store.read(0).unwrap().is_none());
    }

    #[test]
    fn write_then_read_round_trips() {
        let dir = tempdir().unwrap();
        let store = CheckpointStore::new(Some(dir.path().join("ckpt")));
        store.init(&params(), &values()).unwrap();

        assert!(!store.exists(1));
        store.write(1, &[0.25, f64::NAN]).unwrap();
        assert!(store.exists(1));
        let restored = store.read(1).unwrap().unwrap();
        assert_eq!(restored[0], 0.25);
        assert!(restored[1].is_nan());
    }

    #[test]
    fn reuse_with_matching_shape_is_idempotent() {
        let dir = tempdir().unwrap();
        let store = CheckpointStore::new(Some(dir.path().join("ckpt")));
        store.init(&params(), &values()).unwrap();
        store.write(0, &[1.0]).unwrap();
        // Second init must keep existing checkpoints.
        store.init(&params(), &values()).unwrap();
        assert!(store.exists(0));
    }

    #[test]
    fn reuse_with_different_params_is_rejected() {
        let dir = tempdir().unwrap();
        let store = CheckpointStore::new(Some(dir.path().join("ckpt")));
        store.init(&params(), &values()).unwrap();

        let other = vec!["model.a".to_string(), "coupling.a".to_string()];
        assert!(store.init(&other, &values()).is_err());

        let mut longer = values();
        longer.push(vec![ParamValue::Scalar(9.0), ParamValue::Scalar(9.0)]);
        assert!(store.init(&params(), &longer).is_err());
    }
}
