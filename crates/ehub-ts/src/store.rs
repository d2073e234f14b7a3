//! Full-resolution time-series store.
//!
//! Series are keyed by node, owner (carrier, technology or the node itself)
//! and kind. Every series has exactly one value per horizon step; the store
//! never pads, truncates or fills values.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use anyhow::anyhow;
use ehub_core::{Carrier, SpecificationError, Topology};
use serde::{Deserialize, Serialize};

/// What a series describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SeriesKind {
    Demand,
    ImportLimit,
    ExportLimit,
    ImportPrice,
    ExportPrice,
    ImportEmissionFactor,
    ExportEmissionFactor,
    CapacityFactor,
    NaturalInflow,
    CarbonTax,
    CarbonSubsidy,
}

/// Which kind of owner a series kind belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OwnerClass {
    Carrier,
    Technology,
    Node,
}

impl SeriesKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SeriesKind::Demand => "demand",
            SeriesKind::ImportLimit => "import_limit",
            SeriesKind::ExportLimit => "export_limit",
            SeriesKind::ImportPrice => "import_price",
            SeriesKind::ExportPrice => "export_price",
            SeriesKind::ImportEmissionFactor => "import_emission_factor",
            SeriesKind::ExportEmissionFactor => "export_emission_factor",
            SeriesKind::CapacityFactor => "capacity_factor",
            SeriesKind::NaturalInflow => "natural_inflow",
            SeriesKind::CarbonTax => "carbon_tax",
            SeriesKind::CarbonSubsidy => "carbon_subsidy",
        }
    }

    pub fn owner_class(&self) -> OwnerClass {
        match self {
            SeriesKind::CapacityFactor | SeriesKind::NaturalInflow => OwnerClass::Technology,
            SeriesKind::CarbonTax | SeriesKind::CarbonSubsidy => OwnerClass::Node,
            _ => OwnerClass::Carrier,
        }
    }
}

impl fmt::Display for SeriesKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SeriesKind {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let kind = match s.to_ascii_lowercase().as_str() {
            "demand" => SeriesKind::Demand,
            "import_limit" => SeriesKind::ImportLimit,
            "export_limit" => SeriesKind::ExportLimit,
            "import_price" => SeriesKind::ImportPrice,
            "export_price" => SeriesKind::ExportPrice,
            "import_emission_factor" => SeriesKind::ImportEmissionFactor,
            "export_emission_factor" => SeriesKind::ExportEmissionFactor,
            "capacity_factor" => SeriesKind::CapacityFactor,
            "natural_inflow" => SeriesKind::NaturalInflow,
            "carbon_tax" => SeriesKind::CarbonTax,
            "carbon_subsidy" => SeriesKind::CarbonSubsidy,
            other => return Err(anyhow!("unknown series kind '{}'", other)),
        };
        Ok(kind)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum SeriesOwner {
    Carrier(Carrier),
    Technology(String),
    Node,
}

/// Identity of one series.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SeriesKey {
    pub node: String,
    pub owner: SeriesOwner,
    pub kind: SeriesKind,
}

impl SeriesKey {
    pub fn carrier(node: impl Into<String>, carrier: impl Into<Carrier>, kind: SeriesKind) -> Self {
        Self {
            node: node.into(),
            owner: SeriesOwner::Carrier(carrier.into()),
            kind,
        }
    }

    pub fn technology(node: impl Into<String>, technology: impl Into<String>, kind: SeriesKind) -> Self {
        Self {
            node: node.into(),
            owner: SeriesOwner::Technology(technology.into()),
            kind,
        }
    }

    pub fn node(node: impl Into<String>, kind: SeriesKind) -> Self {
        Self {
            node: node.into(),
            owner: SeriesOwner::Node,
            kind,
        }
    }

    fn owner_matches_kind(&self) -> bool {
        matches!(
            (&self.owner, self.kind.owner_class()),
            (SeriesOwner::Carrier(_), OwnerClass::Carrier)
                | (SeriesOwner::Technology(_), OwnerClass::Technology)
                | (SeriesOwner::Node, OwnerClass::Node)
        )
    }
}

impl fmt::Display for SeriesKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.owner {
            SeriesOwner::Carrier(c) => write!(f, "{}/{}/{}", self.node, c, self.kind),
            SeriesOwner::Technology(t) => write!(f, "{}/{}/{}", self.node, t, self.kind),
            SeriesOwner::Node => write!(f, "{}/{}", self.node, self.kind),
        }
    }
}

/// Read-only (after population) map of full-resolution series.
#[derive(Debug, Clone, Default, Serialize)]
pub struct TimeSeriesStore {
    steps: usize,
    series: BTreeMap<SeriesKey, Vec<f64>>,
}

impl TimeSeriesStore {
    /// Empty store for a horizon of `steps` steps.
    pub fn new(steps: usize) -> Self {
        Self {
            steps,
            series: BTreeMap::new(),
        }
    }

    pub fn for_topology(topology: &Topology) -> Self {
        Self::new(topology.steps())
    }

    /// Insert a series, checking length, finiteness and owner class.
    pub fn insert(&mut self, key: SeriesKey, values: Vec<f64>) -> Result<(), SpecificationError> {
        if !key.owner_matches_kind() {
            return Err(SpecificationError::invalid(
                format!("series {}", key),
                "owner",
                format!("{} series cannot be owned by {:?}", key.kind, key.owner),
            ));
        }
        if values.len() != self.steps {
            return Err(SpecificationError::SeriesLength {
                key: key.to_string(),
                expected: self.steps,
                actual: values.len(),
            });
        }
        if let Some(step) = values.iter().position(|v| !v.is_finite()) {
            return Err(SpecificationError::NonFiniteValue {
                key: key.to_string(),
                step,
            });
        }
        self.series.insert(key, values);
        Ok(())
    }

    /// Builder-style insert.
    pub fn with(mut self, key: SeriesKey, values: Vec<f64>) -> Result<Self, SpecificationError> {
        self.insert(key, values)?;
        Ok(self)
    }

    pub fn steps(&self) -> usize {
        self.steps
    }

    pub fn len(&self) -> usize {
        self.series.len()
    }

    pub fn is_empty(&self) -> bool {
        self.series.is_empty()
    }

    pub fn get(&self, key: &SeriesKey) -> Option<&[f64]> {
        self.series.get(key).map(Vec::as_slice)
    }

    pub fn carrier_series(&self, node: &str, carrier: &Carrier, kind: SeriesKind) -> Option<&[f64]> {
        self.get(&SeriesKey::carrier(node, carrier.clone(), kind))
    }

    pub fn technology_series(&self, node: &str, technology: &str, kind: SeriesKind) -> Option<&[f64]> {
        self.get(&SeriesKey::technology(node, technology, kind))
    }

    pub fn node_series(&self, node: &str, kind: SeriesKind) -> Option<&[f64]> {
        self.get(&SeriesKey::node(node, kind))
    }

    /// Iterate in key order.
    pub fn iter(&self) -> impl Iterator<Item = (&SeriesKey, &[f64])> {
        self.series.iter().map(|(k, v)| (k, v.as_slice()))
    }

    /// Check that every series matches the topology: horizon length, known
    /// nodes and carriers balanced at their node.
    pub fn validate_against(&self, topology: &Topology) -> Result<(), SpecificationError> {
        if self.steps != topology.steps() {
            return Err(SpecificationError::SeriesLength {
                key: "time-series store".into(),
                expected: topology.steps(),
                actual: self.steps,
            });
        }
        for key in self.series.keys() {
            let entity = format!("series {}", key);
            let node = topology.require_node(&key.node, &entity)?;
            if let SeriesOwner::Carrier(carrier) = &key.owner {
                topology.require_carrier_at(node, carrier, &entity)?;
            }
        }
        Ok(())
    }
}
