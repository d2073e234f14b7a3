//! Raw technology specifications and the closed archetype set.
//!
//! A [`TechnologySpec`] is what the data-ingestion side hands over: an
//! archetype tag, size bounds, economics and raw performance data. The
//! fitter turns it into fitted coefficients; the archetype decides which
//! constraint shape the synthesizer emits.

use crate::economics::EconomicsSpec;
use crate::error::SpecificationError;
use crate::topology::Carrier;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// Structural family of a technology.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Archetype {
    /// Renewable source driven by a capacity factor
    #[serde(rename = "RES")]
    Res,
    /// n inputs, n outputs, full fuel and output substitution
    #[serde(rename = "CONV1")]
    Conv1,
    /// Fuel substitution, each output has its own function
    #[serde(rename = "CONV2")]
    Conv2,
    /// Main input with fixed secondary input ratios
    #[serde(rename = "CONV3")]
    Conv3,
    /// Storage with level recursion
    #[serde(rename = "STOR")]
    Stor,
    /// Permanent storage / injection
    #[serde(rename = "SINK")]
    Sink,
}

impl Archetype {
    pub fn as_str(&self) -> &'static str {
        match self {
            Archetype::Res => "RES",
            Archetype::Conv1 => "CONV1",
            Archetype::Conv2 => "CONV2",
            Archetype::Conv3 => "CONV3",
            Archetype::Stor => "STOR",
            Archetype::Sink => "SINK",
        }
    }

    pub fn is_conversion(&self) -> bool {
        matches!(self, Archetype::Conv1 | Archetype::Conv2 | Archetype::Conv3)
    }
}

impl fmt::Display for Archetype {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Archetype {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "RES" => Ok(Archetype::Res),
            "CONV1" => Ok(Archetype::Conv1),
            "CONV2" => Ok(Archetype::Conv2),
            "CONV3" => Ok(Archetype::Conv3),
            "STOR" => Ok(Archetype::Stor),
            "SINK" => Ok(Archetype::Sink),
            other => Err(format!("unknown technology model '{}'", other)),
        }
    }
}

/// Representation used for a conversion input/output relation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PerformanceFunction {
    /// `output = alpha1 * input`
    #[default]
    Linear,
    /// `output = alpha1 * input + alpha2 * size` when on, zero when off
    LinearWithIdle,
    /// One `(alpha1, alpha2)` pair per input segment
    Piecewise,
}

/// Measured part-load behaviour of a conversion technology.
///
/// `input` holds load fractions in `[0, 1]`; each output series is the
/// output per unit of installed size at that load.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct PerformanceCurve {
    pub input: Vec<f64>,
    pub outputs: BTreeMap<Carrier, Vec<f64>>,
}

impl PerformanceCurve {
    pub fn new(input: Vec<f64>) -> Self {
        Self {
            input,
            outputs: BTreeMap::new(),
        }
    }

    pub fn with_output(mut self, carrier: impl Into<Carrier>, values: Vec<f64>) -> Self {
        self.outputs.insert(carrier.into(), values);
        self
    }
}

/// Storage parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoragePerformance {
    pub charge_efficiency: f64,
    pub discharge_efficiency: f64,
    /// Fraction of the level lost per hour
    #[serde(default)]
    pub self_discharge: f64,
    /// Maximum charge per step as a fraction of size
    pub charge_rate: f64,
    /// Maximum discharge per step as a fraction of size
    pub discharge_rate: f64,
    /// Other carriers consumed per unit charged
    #[serde(default)]
    pub energy_consumption: BTreeMap<Carrier, f64>,
}

impl Default for StoragePerformance {
    fn default() -> Self {
        Self {
            charge_efficiency: 1.0,
            discharge_efficiency: 1.0,
            self_discharge: 0.0,
            charge_rate: 1.0,
            discharge_rate: 1.0,
            energy_consumption: BTreeMap::new(),
        }
    }
}

/// Compression energy as a function of the pressure ratio.
///
/// Segment `k` covers `[pressure_ratios[k], pressure_ratios[k + 1]]` and
/// consumes `efficiencies[k]` units of `carrier` per unit injected.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompressionSpec {
    pub carrier: Carrier,
    pub pressure_ratios: Vec<f64>,
    pub efficiencies: Vec<f64>,
    /// Operating pressure ratio; free within the table range when absent
    #[serde(default)]
    pub pressure_ratio: Option<f64>,
}

/// Permanent storage / injection parameters.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct SinkPerformance {
    /// Injection cap per step, independent of size
    pub injection_rate_max: f64,
    /// Other carriers consumed per unit injected
    #[serde(default)]
    pub energy_consumption: BTreeMap<Carrier, f64>,
    #[serde(default)]
    pub compression: Option<CompressionSpec>,
}

/// Raw performance data; which parts are required depends on the archetype.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PerformanceSpec {
    #[serde(default)]
    pub function: PerformanceFunction,
    #[serde(default)]
    pub curve: Option<PerformanceCurve>,
    /// Minimum load fraction when running
    #[serde(default)]
    pub min_part_load: f64,
    /// Explicit piecewise breakpoints (load fractions)
    #[serde(default)]
    pub breakpoints: Option<Vec<f64>>,
    /// CONV3 secondary inputs per unit of main input
    #[serde(default)]
    pub input_ratios: BTreeMap<Carrier, f64>,
    #[serde(default)]
    pub storage: Option<StoragePerformance>,
    #[serde(default)]
    pub sink: Option<SinkPerformance>,
    /// RES: allow output below the available profile
    #[serde(default = "default_curtailment")]
    pub curtailment: bool,
}

fn default_curtailment() -> bool {
    true
}

impl Default for PerformanceSpec {
    fn default() -> Self {
        Self {
            function: PerformanceFunction::Linear,
            curve: None,
            min_part_load: 0.0,
            breakpoints: None,
            input_ratios: BTreeMap::new(),
            storage: None,
            sink: None,
            curtailment: true,
        }
    }
}

/// A technology as delivered by data ingestion.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TechnologySpec {
    pub name: String,
    pub node: String,
    /// Archetype tag, parsed into [`Archetype`]
    pub technology_model: String,
    #[serde(default)]
    pub existing: bool,
    #[serde(default)]
    pub decommission_allowed: bool,
    /// Installed size of an existing technology
    #[serde(default)]
    pub size_initial: Option<f64>,
    #[serde(default)]
    pub size_min: f64,
    pub size_max: f64,
    /// Size counts discrete units of `rated_power`
    #[serde(default)]
    pub size_is_int: bool,
    #[serde(default = "default_rated_power")]
    pub rated_power: f64,
    #[serde(default)]
    pub input_carriers: Vec<Carrier>,
    #[serde(default)]
    pub output_carriers: Vec<Carrier>,
    #[serde(default)]
    pub main_input_carrier: Option<Carrier>,
    #[serde(default)]
    pub main_output_carrier: Option<Carrier>,
    /// Emissions per unit of main input; negative for capture
    #[serde(default)]
    pub emission_factor: f64,
    pub performance: PerformanceSpec,
    pub economics: EconomicsSpec,
}

fn default_rated_power() -> f64 {
    1.0
}

impl TechnologySpec {
    pub fn new(
        node: impl Into<String>,
        name: impl Into<String>,
        technology_model: impl Into<String>,
        economics: EconomicsSpec,
    ) -> Self {
        Self {
            name: name.into(),
            node: node.into(),
            technology_model: technology_model.into(),
            existing: false,
            decommission_allowed: false,
            size_initial: None,
            size_min: 0.0,
            size_max: 0.0,
            size_is_int: false,
            rated_power: 1.0,
            input_carriers: Vec::new(),
            output_carriers: Vec::new(),
            main_input_carrier: None,
            main_output_carrier: None,
            emission_factor: 0.0,
            performance: PerformanceSpec::default(),
            economics,
        }
    }

    pub fn with_size_bounds(mut self, size_min: f64, size_max: f64) -> Self {
        self.size_min = size_min;
        self.size_max = size_max;
        self
    }

    pub fn with_existing(mut self, size_initial: f64, decommission_allowed: bool) -> Self {
        self.existing = true;
        self.size_initial = Some(size_initial);
        self.decommission_allowed = decommission_allowed;
        self
    }

    pub fn with_integer_size(mut self, rated_power: f64) -> Self {
        self.size_is_int = true;
        self.rated_power = rated_power;
        self
    }

    pub fn with_input(mut self, carrier: impl Into<Carrier>) -> Self {
        self.input_carriers.push(carrier.into());
        self
    }

    pub fn with_output(mut self, carrier: impl Into<Carrier>) -> Self {
        self.output_carriers.push(carrier.into());
        self
    }

    pub fn with_main_input(mut self, carrier: impl Into<Carrier>) -> Self {
        self.main_input_carrier = Some(carrier.into());
        self
    }

    pub fn with_emission_factor(mut self, factor: f64) -> Self {
        self.emission_factor = factor;
        self
    }

    pub fn with_performance(mut self, performance: PerformanceSpec) -> Self {
        self.performance = performance;
        self
    }

    /// Human-readable identity used in error messages.
    pub fn entity(&self) -> String {
        format!("technology '{}' at node '{}'", self.name, self.node)
    }

    /// Parse the archetype tag.
    pub fn archetype(&self) -> Result<Archetype, SpecificationError> {
        self.technology_model
            .parse()
            .map_err(|_| SpecificationError::UnknownArchetype {
                node: self.node.clone(),
                technology: self.name.clone(),
                model: self.technology_model.clone(),
            })
    }

    /// Main input carrier, defaulting to the first declared input.
    pub fn main_input(&self) -> Option<&Carrier> {
        self.main_input_carrier
            .as_ref()
            .or_else(|| self.input_carriers.first())
    }

    /// Main output carrier, defaulting to the first declared output.
    pub fn main_output(&self) -> Option<&Carrier> {
        self.main_output_carrier
            .as_ref()
            .or_else(|| self.output_carriers.first())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_archetype_round_trip() {
        for tag in ["RES", "CONV1", "CONV2", "CONV3", "STOR", "SINK"] {
            let archetype: Archetype = tag.parse().unwrap();
            assert_eq!(archetype.as_str(), tag);
        }
        assert_eq!("conv2".parse::<Archetype>().unwrap(), Archetype::Conv2);
        assert!("CONV4".parse::<Archetype>().is_err());
    }

    #[test]
    fn test_unknown_archetype_reports_identity() {
        let spec = TechnologySpec::new("city", "Boiler", "BOILER", EconomicsSpec::linear(1.0, 20.0, 0.0));
        match spec.archetype() {
            Err(SpecificationError::UnknownArchetype {
                node,
                technology,
                model,
            }) => {
                assert_eq!(node, "city");
                assert_eq!(technology, "Boiler");
                assert_eq!(model, "BOILER");
            }
            other => panic!("unexpected result {:?}", other),
        }
    }

    #[test]
    fn test_main_carrier_defaults() {
        let spec = TechnologySpec::new("n", "T", "CONV3", EconomicsSpec::linear(1.0, 20.0, 0.0))
            .with_input("gas")
            .with_input("electricity")
            .with_output("heat");
        assert_eq!(spec.main_input().map(Carrier::as_str), Some("gas"));
        assert_eq!(spec.main_output().map(Carrier::as_str), Some("heat"));
    }

    #[test]
    fn test_spec_deserializes_with_defaults() {
        let json = r#"{
            "name": "PV",
            "node": "city",
            "technology_model": "RES",
            "size_max": 100.0,
            "output_carriers": ["electricity"],
            "performance": {},
            "economics": {
                "capex": { "model": "linear", "unit_capex": 800.0 },
                "lifetime": 25.0,
                "discount_rate": 0.05
            }
        }"#;
        let spec: TechnologySpec = serde_json::from_str(json).unwrap();
        assert_eq!(spec.archetype().unwrap(), Archetype::Res);
        assert!(spec.performance.curtailment);
        assert_eq!(spec.rated_power, 1.0);
        assert!(!spec.existing);
    }
}
