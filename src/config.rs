use crate::metrics;
use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};
use std::{collections::BTreeMap, fmt::Debug, fs, ops::RangeBounds, path::Path};
use toml::{Table, Value};

/// Parameter name that selects the connectivity special case: values are
/// whole connectivity objects, assigned raw instead of wrapped in a
/// single-element array.
pub const CONNECTIVITY: &str = "connectivity";

/// Parameter name whose scalar values are assigned raw (the simulator
/// stores conduction speed as a plain float, not a parameter array).
pub const CONDUCTION_SPEED: &str = "conduction_speed";

/// A structural connectivity variant, identified by its archive name.
///
/// Only the identifying metadata travels through the sweep machinery;
/// the simulation backend resolves the actual weight/tract matrices.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConnectivitySpec {
    pub title: String,
    pub number_of_regions: usize,
}

impl ConnectivitySpec {
    /// Resolve a connectivity from an archive name like `connectivity_76.zip`.
    pub fn from_file(name: &str) -> Result<Self> {
        let stem = name
            .strip_suffix(".zip")
            .with_context(|| format!("connectivity file {name:?} is not a zip archive"))?;
        let regions = stem
            .rsplit('_')
            .next()
            .and_then(|n| n.parse::<usize>().ok())
            .with_context(|| format!("cannot parse region count from {name:?}"))?;
        Ok(Self {
            title: stem.to_string(),
            number_of_regions: regions,
        })
    }

    pub fn file_name(&self) -> String {
        format!("{}.zip", self.title)
    }
}

/// One value of a sweep axis.
#[derive(Debug, Clone, PartialEq)]
pub enum ParamValue {
    Scalar(f64),
    Connectivity(ConnectivitySpec),
}

impl ParamValue {
    pub fn as_scalar(&self) -> Result<f64> {
        match self {
            ParamValue::Scalar(val) => Ok(*val),
            ParamValue::Connectivity(conn) => {
                bail!("expected a scalar value, found connectivity {:?}", conn.title)
            }
        }
    }

    pub fn as_connectivity(&self) -> Result<&ConnectivitySpec> {
        match self {
            ParamValue::Connectivity(conn) => Ok(conn),
            ParamValue::Scalar(val) => bail!("expected a connectivity value, found {val}"),
        }
    }
}

/// The template simulation configuration.
///
/// This is the sweep-side view of the simulator: enough structure to
/// override parameters by dotted path and to round-trip through the
/// serialized sweep format. Running it is the backend's job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimulatorConfig {
    pub model_class: String,
    pub coupling_class: String,
    pub conduction_speed: f64,
    /// Simulated length in ms.
    pub length: f64,
    /// Monitor sampling period in ms.
    pub sample_period: f64,
    pub connectivity: ConnectivitySpec,
    /// Numeric-array model parameters, each a flat list per the
    /// scalar-array convention of the simulation library.
    pub model_parameters: BTreeMap<String, Vec<f64>>,
    #[serde(default)]
    pub coupling_parameters: BTreeMap<String, Vec<f64>>,
    pub variables_of_interest: Vec<String>,
    /// State variable name to [low, high].
    pub state_variable_range: BTreeMap<String, [f64; 2]>,
}

impl SimulatorConfig {
    /// Assign a parameter value onto a dotted attribute path.
    ///
    /// Recognized roots: `conduction_speed`, `connectivity`, `length`,
    /// `model.<param>` and `coupling.<param>`. Scalars assigned under
    /// `model.` or `coupling.` are wrapped as single-element arrays;
    /// `conduction_speed` and `connectivity` take the raw value.
    pub fn set_attr(&mut self, path: &str, value: &ParamValue) -> Result<()> {
        match path.split_once('.') {
            None if path == CONDUCTION_SPEED => {
                self.conduction_speed = value.as_scalar()?;
            }
            None if path == CONNECTIVITY => {
                self.connectivity = value.as_connectivity()?.clone();
            }
            None if path == "length" => {
                self.length = value.as_scalar()?;
            }
            Some(("model", param)) if !param.is_empty() => {
                self.model_parameters
                    .insert(param.to_string(), vec![value.as_scalar()?]);
            }
            Some(("coupling", param)) if !param.is_empty() => {
                self.coupling_parameters
                    .insert(param.to_string(), vec![value.as_scalar()?]);
            }
            _ => bail!("unsupported parameter path {path:?}"),
        }
        Ok(())
    }
}

/// Sweep-level configuration: the full description of one
/// parameter-space exploration.
#[derive(Debug, Clone, PartialEq)]
pub struct SweepConfig {
    pub param1: String,
    pub param2: String,
    pub param1_values: Vec<ParamValue>,
    pub param2_values: Vec<ParamValue>,
    pub metrics: Vec<String>,
    pub n_threads: usize,
    pub file_name: String,
    pub simulator: SimulatorConfig,
}

impl SweepConfig {
    /// Load a [`SweepConfig`] from a serialized sweep file.
    ///
    /// # Errors
    /// Returns an error if the file cannot be read or parsed, or if the
    /// configuration values are invalid.
    pub fn from_file<P: AsRef<Path>>(file: P) -> Result<Self> {
        let file = file.as_ref();
        let contents =
            fs::read_to_string(file).with_context(|| format!("failed to read {file:?}"))?;
        Self::from_toml_str(&contents)
    }

    /// Write this sweep as a serialized sweep file.
    pub fn write_file<P: AsRef<Path>>(&self, file: P) -> Result<()> {
        let file = file.as_ref();
        let contents = self.to_toml_string().context("failed to serialize sweep")?;
        fs::write(file, contents).with_context(|| format!("failed to write {file:?}"))?;
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        check_num(self.n_threads, 1..1024).context("invalid number of threads")?;
        if self.param1_values.is_empty() || self.param2_values.is_empty() {
            bail!("parameter value lists must not be empty");
        }
        if self.file_name.is_empty() {
            bail!("output file name must not be empty");
        }
        metrics::validate_names(&self.metrics).context("invalid metric selection")?;
        check_axis(&self.param1, &self.param1_values).context("invalid param1 values")?;
        check_axis(&self.param2, &self.param2_values).context("invalid param2 values")?;
        Ok(())
    }

    pub fn n_runs(&self) -> usize {
        self.param1_values.len() * self.param2_values.len()
    }

    pub fn to_toml_string(&self) -> Result<String> {
        let mut parameters = Table::new();
        parameters.insert("param1".into(), Value::String(self.param1.clone()));
        parameters.insert("param2".into(), Value::String(self.param2.clone()));
        parameters.insert(
            "metrics".into(),
            Value::Array(self.metrics.iter().cloned().map(Value::String).collect()),
        );
        parameters.insert("file_name".into(), Value::String(self.file_name.clone()));
        parameters.insert("n_threads".into(), Value::Integer(self.n_threads as i64));

        // A connectivity-valued axis goes in its own section; scalar axes
        // stay under [parameters].
        let mut connectivity = Table::new();
        for (key, name, values) in [
            ("param1_values", &self.param1, &self.param1_values),
            ("param2_values", &self.param2, &self.param2_values),
        ] {
            if name == CONNECTIVITY {
                let files = values
                    .iter()
                    .map(|val| Ok(Value::String(val.as_connectivity()?.file_name())))
                    .collect::<Result<Vec<_>>>()?;
                connectivity.insert(key.into(), Value::Array(files));
            } else {
                let floats = values
                    .iter()
                    .map(|val| Ok(Value::Float(val.as_scalar()?)))
                    .collect::<Result<Vec<_>>>()?;
                parameters.insert(key.into(), Value::Array(floats));
            }
        }

        let mut root = Table::new();
        root.insert("parameters".into(), Value::Table(parameters));
        if !connectivity.is_empty() {
            root.insert("connectivity".into(), Value::Table(connectivity));
        }
        root.insert(
            "simulator".into(),
            Value::Table(simulator_to_toml(&self.simulator)),
        );

        toml::to_string_pretty(&root).context("failed to render sweep TOML")
    }

    pub fn from_toml_str(contents: &str) -> Result<Self> {
        let root: Table = contents.parse().context("failed to parse sweep TOML")?;

        let parameters = table_of(&root, "parameters")?;
        let param1 = str_of(parameters, "param1")?.to_string();
        let param2 = str_of(parameters, "param2")?.to_string();
        let metrics = str_list_of(parameters, "metrics")?;
        let file_name = str_of(parameters, "file_name")?.to_string();
        let n_threads = int_of(parameters, "n_threads")? as usize;

        let read_axis = |key: &str, name: &str| -> Result<Vec<ParamValue>> {
            if name == CONNECTIVITY {
                let connectivity = table_of(&root, "connectivity")?;
                str_list_of(connectivity, key)?
                    .iter()
                    .map(|file| Ok(ParamValue::Connectivity(ConnectivitySpec::from_file(file)?)))
                    .collect()
            } else {
                Ok(float_list_of(parameters, key)?
                    .into_iter()
                    .map(ParamValue::Scalar)
                    .collect())
            }
        };
        let param1_values =
            read_axis("param1_values", &param1).context("failed to read param1 values")?;
        let param2_values =
            read_axis("param2_values", &param2).context("failed to read param2 values")?;

        let simulator = simulator_from_toml(table_of(&root, "simulator")?)
            .context("failed to read simulator section")?;

        let cfg = Self {
            param1,
            param2,
            param1_values,
            param2_values,
            metrics,
            n_threads,
            file_name,
            simulator,
        };
        cfg.validate().context("failed to validate sweep")?;
        Ok(cfg)
    }
}

fn simulator_to_toml(sim: &SimulatorConfig) -> Table {
    let mut table = Table::new();
    table.insert("model_class".into(), Value::String(sim.model_class.clone()));
    table.insert(
        "coupling_class".into(),
        Value::String(sim.coupling_class.clone()),
    );
    table.insert("conduction_speed".into(), Value::Float(sim.conduction_speed));
    table.insert("length".into(), Value::Float(sim.length));
    table.insert("sample_period".into(), Value::Float(sim.sample_period));
    table.insert(
        "connectivity_from_file".into(),
        Value::String(sim.connectivity.file_name()),
    );

    let mut model_parameters = Table::new();
    for (name, values) in &sim.model_parameters {
        model_parameters.insert(
            name.clone(),
            Value::Array(values.iter().map(|&v| Value::Float(v)).collect()),
        );
    }
    table.insert("model_parameters".into(), Value::Table(model_parameters));

    let mut stvar_range = Table::new();
    for (name, range) in &sim.state_variable_range {
        stvar_range.insert(
            name.clone(),
            Value::Array(range.iter().map(|&v| Value::Float(v)).collect()),
        );
    }
    let mut attributes = Table::new();
    attributes.insert(
        "variables_of_interests".into(),
        Value::Array(
            sim.variables_of_interest
                .iter()
                .cloned()
                .map(Value::String)
                .collect(),
        ),
    );
    attributes.insert("state_variable_range".into(), Value::Table(stvar_range));
    table.insert("attributes".into(), Value::Table(attributes));
    table
}

fn simulator_from_toml(table: &Table) -> Result<SimulatorConfig> {
    let connectivity = match table.get("connectivity_from_file") {
        Some(value) => ConnectivitySpec::from_file(
            value
                .as_str()
                .context("connectivity_from_file must be a string")?,
        )?,
        // Default connectivity, as the simulation library's from_file().
        None => ConnectivitySpec::from_file("connectivity_76.zip")?,
    };

    let mut model_parameters = BTreeMap::new();
    for (name, values) in table_of(table, "model_parameters")? {
        model_parameters.insert(
            name.clone(),
            float_list(values)
                .with_context(|| format!("model parameter {name:?} must be a numeric list"))?,
        );
    }

    let attributes = table_of(table, "attributes")?;
    // The format is intentionally closed: reject attributes we do not know
    // how to restore rather than dropping them silently.
    for key in attributes.keys() {
        if key != "state_variable_range" && key != "variables_of_interests" {
            bail!("unsupported attribute: {key}");
        }
    }
    let variables_of_interest = str_list_of(attributes, "variables_of_interests")?;
    let mut state_variable_range = BTreeMap::new();
    for (name, values) in table_of(attributes, "state_variable_range")? {
        let range = float_list(values)
            .with_context(|| format!("state variable range {name:?} must be numeric"))?;
        let [lo, hi] = range.as_slice() else {
            bail!("state variable range {name:?} must have exactly two elements");
        };
        state_variable_range.insert(name.clone(), [*lo, *hi]);
    }

    Ok(SimulatorConfig {
        model_class: str_of(table, "model_class")?.to_string(),
        coupling_class: str_of(table, "coupling_class")?.to_string(),
        conduction_speed: float_of(table, "conduction_speed")?,
        length: float_of(table, "length")?,
        sample_period: match table.get("sample_period") {
            Some(value) => float(value).context("sample_period must be numeric")?,
            None => 1.0,
        },
        connectivity,
        model_parameters,
        coupling_parameters: BTreeMap::new(),
        variables_of_interest,
        state_variable_range,
    })
}

fn check_axis(param: &str, values: &[ParamValue]) -> Result<()> {
    for value in values {
        match (param == CONNECTIVITY, value) {
            (true, ParamValue::Scalar(val)) => {
                bail!("connectivity axis holds a scalar value {val}")
            }
            (false, ParamValue::Connectivity(conn)) => {
                bail!("scalar axis {param:?} holds connectivity {:?}", conn.title)
            }
            _ => {}
        }
    }
    Ok(())
}

fn check_num<T, R>(num: T, range: R) -> Result<()>
where
    T: PartialOrd + Debug,
    R: RangeBounds<T> + Debug,
{
    if !range.contains(&num) {
        bail!("number must be in the range {range:?}, but is {num:?}");
    }
    Ok(())
}

fn table_of<'t>(table: &'t Table, key: &str) -> Result<&'t Table> {
    table
        .get(key)
        .and_then(Value::as_table)
        .with_context(|| format!("missing table {key:?}"))
}

fn str_of<'t>(table: &'t Table, key: &str) -> Result<&'t str> {
    table
        .get(key)
        .and_then(Value::as_str)
        .with_context(|| format!("missing string {key:?}"))
}

fn int_of(table: &Table, key: &str) -> Result<i64> {
    table
        .get(key)
        .and_then(Value::as_integer)
        .with_context(|| format!("missing integer {key:?}"))
}

fn float(value: &Value) -> Option<f64> {
    value
        .as_float()
        .or_else(|| value.as_integer().map(|v| v as f64))
}

fn float_of(table: &Table, key: &str) -> Result<f64> {
    table
        .get(key)
        .and_then(float)
        .with_context(|| format!("missing float {key:?}"))
}

fn float_list(value: &Value) -> Option<Vec<f64>> {
    value.as_array()?.iter().map(float).collect()
}

fn float_list_of(table: &Table, key: &str) -> Result<Vec<f64>> {
    table
        .get(key)
        .and_then(float_list)
        .with_context(|| format!("missing numeric list {key:?}"))
}

fn str_list_of(table: &Table, key: &str) -> Result<Vec<String>> {
    table
        .get(key)
        .and_then(Value::as_array)
        .and_then(|arr| {
            arr.iter()
                .map(|v| v.as_str().map(str::to_string))
                .collect()
        })
        .with_context(|| format!("missing string list {key:?}"))
}

#[cfg(test)]
pub(crate) fn test_simulator() -> SimulatorConfig {
    SimulatorConfig {
        model_class: "Generic2dOscillator".to_string(),
        coupling_class: "Linear".to_string(),
        conduction_speed: 3.0,
        length: 1000.0,
        sample_period: 1.0,
        connectivity: ConnectivitySpec::from_file("connectivity_76.zip").unwrap(),
        model_parameters: BTreeMap::from([
            ("a".to_string(), vec![1.05]),
            ("tau".to_string(), vec![1.0]),
        ]),
        coupling_parameters: BTreeMap::new(),
        variables_of_interest: vec!["V".to_string()],
        state_variable_range: BTreeMap::from([
            ("V".to_string(), [-2.0, 4.0]),
            ("W".to_string(), [-6.0, 6.0]),
        ]),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scalar_sweep() -> SweepConfig {
        SweepConfig {
            param1: CONDUCTION_SPEED.to_string(),
            param2: "coupling.a".to_string(),
            param1_values: vec![
                ParamValue::Scalar(0.0),
                ParamValue::Scalar(5.0),
                ParamValue::Scalar(10.0),
            ],
            param2_values: vec![ParamValue::Scalar(0.0), ParamValue::Scalar(0.3)],
            metrics: vec!["GlobalVariance".to_string(), "KuramotoIndex".to_string()],
            n_threads: 4,
            file_name: "sweep_result".to_string(),
            simulator: test_simulator(),
        }
    }

    #[test]
    fn toml_round_trip_scalar_axes() {
        let cfg = scalar_sweep();
        let rendered = cfg.to_toml_string().unwrap();
        let restored = SweepConfig::from_toml_str(&rendered).unwrap();

        assert_eq!(restored.param1, cfg.param1);
        assert_eq!(restored.param2, cfg.param2);
        assert_eq!(restored.param1_values, cfg.param1_values);
        assert_eq!(restored.param2_values, cfg.param2_values);
        assert_eq!(restored.metrics, cfg.metrics);
        assert_eq!(restored.n_threads, cfg.n_threads);
        assert_eq!(restored.file_name, cfg.file_name);
        assert_eq!(
            restored.simulator.model_parameters,
            cfg.simulator.model_parameters
        );
    }

    #[test]
    fn toml_round_trip_connectivity_axis() {
        let mut cfg = scalar_sweep();
        cfg.param1 = CONNECTIVITY.to_string();
        cfg.param1_values = vec![
            ParamValue::Connectivity(ConnectivitySpec::from_file("connectivity_76.zip").unwrap()),
            ParamValue::Connectivity(ConnectivitySpec::from_file("connectivity_192.zip").unwrap()),
        ];

        let rendered = cfg.to_toml_string().unwrap();
        assert!(rendered.contains("[connectivity]"));
        let restored = SweepConfig::from_toml_str(&rendered).unwrap();

        let regions: Vec<_> = restored
            .param1_values
            .iter()
            .map(|val| val.as_connectivity().unwrap().number_of_regions)
            .collect();
        assert_eq!(regions, vec![76, 192]);
        assert_eq!(restored.param2_values, cfg.param2_values);
    }

    #[test]
    fn unsupported_attribute_is_fatal() {
        let cfg = scalar_sweep();
        let rendered = cfg.to_toml_string().unwrap();
        let tampered = rendered.replace(
            "[simulator.attributes.state_variable_range]",
            "stvar = [\"V\"]\n[simulator.attributes.state_variable_range]",
        );
        let err = SweepConfig::from_toml_str(&tampered).unwrap_err();
        assert!(format!("{err:#}").contains("unsupported attribute: stvar"));
    }

    #[test]
    fn unknown_metric_is_rejected() {
        let mut cfg = scalar_sweep();
        cfg.metrics = vec!["NotAMetric".to_string()];
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn set_attr_walks_dotted_paths() {
        let mut sim = test_simulator();
        sim.set_attr("model.slope", &ParamValue::Scalar(0.7)).unwrap();
        assert_eq!(sim.model_parameters["slope"], vec![0.7]);

        sim.set_attr("coupling.a", &ParamValue::Scalar(0.1)).unwrap();
        assert_eq!(sim.coupling_parameters["a"], vec![0.1]);

        sim.set_attr(CONDUCTION_SPEED, &ParamValue::Scalar(7.5)).unwrap();
        assert_eq!(sim.conduction_speed, 7.5);

        let conn = ConnectivitySpec::from_file("connectivity_192.zip").unwrap();
        sim.set_attr(CONNECTIVITY, &ParamValue::Connectivity(conn.clone()))
            .unwrap();
        assert_eq!(sim.connectivity, conn);

        assert!(sim.set_attr("monitor.period", &ParamValue::Scalar(1.0)).is_err());
        assert!(sim.set_attr("model.", &ParamValue::Scalar(1.0)).is_err());
    }
}
