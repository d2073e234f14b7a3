//! Raw network specifications.
//!
//! A network moves one carrier along directed arcs between nodes. Losses
//! scale with distance; new networks carry a sizing decision and a capex
//! model, existing ones a fixed capacity.

use crate::economics::{annualization_factor, CapexModel};
use crate::error::SpecificationError;
use crate::topology::Carrier;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Capital cost relation of a network arc.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "model", rename_all = "snake_case")]
pub enum NetworkCapexModel {
    /// `capex = unit_capex * size * distance`
    Linear { unit_capex: f64 },
    /// Linear part plus a fixed cost per km, paid only when the arc is built
    LinearWithFixed { unit_capex: f64, fixed_capex: f64 },
    /// Piecewise cost per km over size breakpoints
    Piecewise {
        breakpoints: Vec<f64>,
        values: Vec<f64>,
    },
}

impl NetworkCapexModel {
    pub fn is_piecewise(&self) -> bool {
        matches!(self, NetworkCapexModel::Piecewise { .. })
    }

    /// Whether the capex model needs a binary built indicator.
    pub fn requires_built_indicator(&self) -> bool {
        matches!(self, NetworkCapexModel::LinearWithFixed { .. })
    }

    /// Non-annualized capex of an arc of `distance` km and `size`, assuming it is built.
    pub fn evaluate(&self, size: f64, distance: f64) -> f64 {
        match self {
            NetworkCapexModel::Linear { unit_capex } => unit_capex * size * distance,
            NetworkCapexModel::LinearWithFixed {
                unit_capex,
                fixed_capex,
            } => (unit_capex * size + fixed_capex) * distance,
            NetworkCapexModel::Piecewise {
                breakpoints,
                values,
            } => {
                CapexModel::Piecewise {
                    breakpoints: breakpoints.clone(),
                    values: values.clone(),
                }
                .evaluate(size)
                    * distance
            }
        }
    }
}

/// Economic parameters of a network.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NetworkEconomics {
    pub capex: NetworkCapexModel,
    /// Variable opex per unit of flow sent
    #[serde(default)]
    pub opex_variable: f64,
    /// Fixed opex as a share of the as-new annualized capex
    #[serde(default)]
    pub opex_fixed: f64,
    pub lifetime: f64,
    pub discount_rate: f64,
    #[serde(default)]
    pub decommission_cost: f64,
}

impl NetworkEconomics {
    pub fn linear(unit_capex: f64, lifetime: f64, discount_rate: f64) -> Self {
        Self {
            capex: NetworkCapexModel::Linear { unit_capex },
            opex_variable: 0.0,
            opex_fixed: 0.0,
            lifetime,
            discount_rate,
            decommission_cost: 0.0,
        }
    }

    pub fn annualization(&self) -> f64 {
        annualization_factor(self.discount_rate, self.lifetime)
    }
}

/// One directed connection, or one node pair when the network is bidirectional.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArcSpec {
    pub from: String,
    pub to: String,
    pub distance: f64,
    /// Installed size for existing networks
    #[serde(default)]
    pub size_initial: Option<f64>,
}

impl ArcSpec {
    pub fn new(from: impl Into<String>, to: impl Into<String>, distance: f64) -> Self {
        Self {
            from: from.into(),
            to: to.into(),
            distance,
            size_initial: None,
        }
    }

    pub fn with_size(mut self, size: f64) -> Self {
        self.size_initial = Some(size);
        self
    }
}

/// A network as delivered by data ingestion.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NetworkSpec {
    pub name: String,
    pub carrier: Carrier,
    pub arcs: Vec<ArcSpec>,
    #[serde(default)]
    pub existing: bool,
    #[serde(default)]
    pub decommission_allowed: bool,
    /// Each arc also exists in reverse, sharing one size
    #[serde(default)]
    pub bidirectional: bool,
    /// Forbid simultaneous flow in both directions of a pair
    #[serde(default)]
    pub exclusive_direction: bool,
    /// Gate flow with a binary built decision
    #[serde(default)]
    pub built_indicator: bool,
    #[serde(default)]
    pub size_min: f64,
    #[serde(default)]
    pub size_max: f64,
    /// Fraction of flow lost per km
    #[serde(default)]
    pub loss_per_km: f64,
    /// Carriers consumed at the sending node per unit of flow
    #[serde(default)]
    pub energy_consumption: BTreeMap<Carrier, f64>,
    /// Emissions per unit of flow sent
    #[serde(default)]
    pub emission_factor: f64,
    pub economics: NetworkEconomics,
}

impl NetworkSpec {
    pub fn new(name: impl Into<String>, carrier: impl Into<Carrier>, economics: NetworkEconomics) -> Self {
        Self {
            name: name.into(),
            carrier: carrier.into(),
            arcs: Vec::new(),
            existing: false,
            decommission_allowed: false,
            bidirectional: false,
            exclusive_direction: false,
            built_indicator: false,
            size_min: 0.0,
            size_max: 0.0,
            loss_per_km: 0.0,
            energy_consumption: BTreeMap::new(),
            emission_factor: 0.0,
            economics,
        }
    }

    pub fn with_arc(mut self, arc: ArcSpec) -> Self {
        self.arcs.push(arc);
        self
    }

    pub fn with_size_bounds(mut self, size_min: f64, size_max: f64) -> Self {
        self.size_min = size_min;
        self.size_max = size_max;
        self
    }

    pub fn with_loss_per_km(mut self, loss: f64) -> Self {
        self.loss_per_km = loss;
        self
    }

    pub fn bidirectional(mut self, exclusive_direction: bool) -> Self {
        self.bidirectional = true;
        self.exclusive_direction = exclusive_direction;
        self
    }

    pub fn with_built_indicator(mut self) -> Self {
        self.built_indicator = true;
        self
    }

    pub fn as_existing(mut self, decommission_allowed: bool) -> Self {
        self.existing = true;
        self.decommission_allowed = decommission_allowed;
        self
    }

    pub fn entity(&self) -> String {
        format!("network '{}'", self.name)
    }

    /// Fraction of the sent flow that arrives over `distance` km.
    pub fn delivery_factor(&self, distance: f64) -> f64 {
        1.0 - self.loss_per_km * distance
    }

    /// Structural checks that do not need the topology.
    pub fn validate(&self) -> Result<(), SpecificationError> {
        let entity = self.entity();
        if self.arcs.is_empty() {
            return Err(SpecificationError::missing(entity, "arcs"));
        }
        if !(self.loss_per_km.is_finite() && self.loss_per_km >= 0.0) {
            return Err(SpecificationError::invalid(entity, "loss_per_km", "must be non-negative"));
        }
        if self.existing {
            if let Some(arc) = self.arcs.iter().find(|a| a.size_initial.is_none()) {
                return Err(SpecificationError::missing(
                    format!("{} arc {}->{}", entity, arc.from, arc.to),
                    "size_initial",
                ));
            }
        } else if !(self.size_min >= 0.0 && self.size_max >= self.size_min && self.size_max.is_finite()) {
            return Err(SpecificationError::invalid(
                entity,
                "size bounds",
                format!("expected 0 <= size_min <= size_max, got [{}, {}]", self.size_min, self.size_max),
            ));
        }
        for arc in &self.arcs {
            if arc.from == arc.to {
                return Err(SpecificationError::invalid(
                    entity,
                    "arcs",
                    format!("arc connects node '{}' to itself", arc.from),
                ));
            }
            if !(arc.distance.is_finite() && arc.distance >= 0.0) {
                return Err(SpecificationError::invalid(entity, "distance", "must be non-negative"));
            }
            let delivered = self.delivery_factor(arc.distance);
            if !(delivered > 0.0 && delivered <= 1.0) {
                return Err(SpecificationError::invalid(
                    entity,
                    "loss_per_km",
                    format!(
                        "arc {}->{} loses {:.1}% of its flow",
                        arc.from,
                        arc.to,
                        (1.0 - delivered) * 100.0
                    ),
                ));
            }
        }
        if let NetworkCapexModel::Piecewise {
            breakpoints,
            values,
        } = &self.economics.capex
        {
            CapexModel::Piecewise {
                breakpoints: breakpoints.clone(),
                values: values.clone(),
            }
            .validate(&self.entity(), self.size_min, self.size_max.max(self.max_initial_size()))?;
        }
        Ok(())
    }

    fn max_initial_size(&self) -> f64 {
        self.arcs
            .iter()
            .filter_map(|a| a.size_initial)
            .fold(0.0, f64::max)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pipeline() -> NetworkSpec {
        NetworkSpec::new("pipe", "hydrogen", NetworkEconomics::linear(10.0, 40.0, 0.05))
            .with_arc(ArcSpec::new("a", "b", 100.0))
            .with_size_bounds(0.0, 50.0)
            .with_loss_per_km(0.001)
    }

    #[test]
    fn test_delivery_factor() {
        let net = pipeline();
        assert!((net.delivery_factor(100.0) - 0.9).abs() < 1e-12);
        assert!(net.validate().is_ok());
    }

    #[test]
    fn test_total_loss_rejected() {
        let net = pipeline().with_loss_per_km(0.01);
        assert!(matches!(
            net.validate(),
            Err(SpecificationError::InvalidValue { field: "loss_per_km", .. })
        ));
    }

    #[test]
    fn test_existing_requires_sizes() {
        let net = pipeline().as_existing(false);
        assert!(matches!(
            net.validate(),
            Err(SpecificationError::MissingField { field: "size_initial", .. })
        ));
    }

    #[test]
    fn test_capex_evaluation() {
        let capex = NetworkCapexModel::LinearWithFixed {
            unit_capex: 2.0,
            fixed_capex: 100.0,
        };
        assert!((capex.evaluate(10.0, 5.0) - 600.0).abs() < 1e-12);
        assert!(capex.requires_built_indicator());
    }
}
