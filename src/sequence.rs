use crate::config::{ParamValue, SimulatorConfig, SweepConfig};
use anyhow::{Context, Result, bail};

/// Optional per-parameter transform, applied to the raw value before it
/// is assigned onto the template copy.
pub type ParamGetter = Box<dyn Fn(ParamValue) -> ParamValue + Send + Sync>;

/// A restartable sequence of simulator configurations.
///
/// Each advance deep-copies the template and assigns the current value
/// pair onto the named attribute paths of the copy. The value matrix is
/// the full cross product, already materialized by the caller.
pub struct SimSequence {
    template: SimulatorConfig,
    params: Vec<String>,
    values: Vec<Vec<ParamValue>>,
    getters: Vec<Option<ParamGetter>>,
    pos: usize,
}

impl SimSequence {
    pub fn new(
        template: SimulatorConfig,
        params: Vec<String>,
        values: Vec<Vec<ParamValue>>,
        getters: Option<Vec<Option<ParamGetter>>>,
    ) -> Result<Self> {
        let getters = match getters {
            None => std::iter::repeat_with(|| None).take(params.len()).collect(),
            Some(getters) => {
                if getters.len() != params.len() {
                    bail!(
                        "getters length {} does not match params length {}",
                        getters.len(),
                        params.len()
                    );
                }
                getters
            }
        };
        for (idx, row) in values.iter().enumerate() {
            if row.len() != params.len() {
                bail!("value row {idx} has {} entries for {} params", row.len(), params.len());
            }
        }
        Ok(Self {
            template,
            params,
            values,
            getters,
            pos: 0,
        })
    }

    /// Build the sequence for a sweep: the row-major cross product of
    /// (param1, param2) over the configured value lists.
    pub fn from_sweep(cfg: &SweepConfig) -> Result<Self> {
        let mut values = Vec::with_capacity(cfg.n_runs());
        for val1 in &cfg.param1_values {
            for val2 in &cfg.param2_values {
                values.push(vec![val1.clone(), val2.clone()]);
            }
        }
        Self::new(
            cfg.simulator.clone(),
            vec![cfg.param1.clone(), cfg.param2.clone()],
            values,
            None,
        )
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Rewind to position 0 so the sequence can be iterated again.
    pub fn reset(&mut self) {
        self.pos = 0;
    }

    fn configure(&self, pos: usize) -> Result<SimulatorConfig> {
        let mut obj = self.template.clone();
        for ((param, getter), val) in self
            .params
            .iter()
            .zip(&self.getters)
            .zip(&self.values[pos])
        {
            let val = match getter {
                Some(getter) => getter(val.clone()),
                None => val.clone(),
            };
            obj.set_attr(param, &val)
                .with_context(|| format!("failed to assign parameter {param:?}"))?;
        }
        Ok(obj)
    }

    /// Materialize all remaining configurations as (index, config) pairs.
    pub fn run_specs(&mut self) -> Result<Vec<(usize, SimulatorConfig)>> {
        let mut specs = Vec::with_capacity(self.len() - self.pos);
        while let Some(spec) = self.try_next()? {
            specs.push(spec);
        }
        Ok(specs)
    }

    fn try_next(&mut self) -> Result<Option<(usize, SimulatorConfig)>> {
        if self.pos >= self.values.len() {
            return Ok(None);
        }
        let config = self.configure(self.pos)?;
        let spec = (self.pos, config);
        self.pos += 1;
        Ok(Some(spec))
    }

    pub fn params(&self) -> &[String] {
        &self.params
    }

    pub fn values(&self) -> &[Vec<ParamValue>] {
        &self.values
    }
}
