//! Topology registry: carriers, nodes, time horizon and investment periods.
//!
//! The registry is built once through [`TopologyBuilder`] and is read-only
//! afterwards. Every later stage (series store, fitter, synthesizers)
//! validates its references against it.

use crate::error::SpecificationError;
use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::fmt;

/// A named energy or material flow (electricity, hydrogen, CO2, ...).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Carrier(String);

impl Carrier {
    #[inline]
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    #[inline]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Carrier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Carrier {
    fn from(name: &str) -> Self {
        Carrier::new(name)
    }
}

/// A location owning carriers and technologies.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Node {
    pub name: String,
    /// Free-form type tags ("onshore", "offshore", ...)
    #[serde(default)]
    pub tags: Vec<String>,
    /// Carriers balanced at this node
    pub carriers: BTreeSet<Carrier>,
    /// Installed technologies and their installed size
    #[serde(default)]
    pub existing_technologies: BTreeMap<String, f64>,
    /// Candidate technologies the optimizer may build
    #[serde(default)]
    pub new_technologies: BTreeSet<String>,
}

impl Node {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            tags: Vec::new(),
            carriers: BTreeSet::new(),
            existing_technologies: BTreeMap::new(),
            new_technologies: BTreeSet::new(),
        }
    }

    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.tags.push(tag.into());
        self
    }

    pub fn with_carrier(mut self, carrier: impl Into<Carrier>) -> Self {
        self.carriers.insert(carrier.into());
        self
    }

    pub fn with_existing_technology(mut self, name: impl Into<String>, size: f64) -> Self {
        self.existing_technologies.insert(name.into(), size);
        self
    }

    pub fn with_new_technology(mut self, name: impl Into<String>) -> Self {
        self.new_technologies.insert(name.into());
        self
    }

    pub fn has_carrier(&self, carrier: &Carrier) -> bool {
        self.carriers.contains(carrier)
    }
}

/// Inclusive, uniformly spaced time horizon.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimeHorizon {
    pub start: NaiveDateTime,
    pub end: NaiveDateTime,
    pub resolution_hours: f64,
}

impl TimeHorizon {
    pub fn new(start: NaiveDateTime, end: NaiveDateTime, resolution_hours: f64) -> Self {
        Self {
            start,
            end,
            resolution_hours,
        }
    }

    /// Hourly horizon of `steps` steps starting at `start`.
    pub fn hourly(start: NaiveDateTime, steps: usize) -> Self {
        let last = steps.saturating_sub(1) as i64;
        Self::new(start, start + chrono::Duration::hours(last), 1.0)
    }

    pub fn validate(&self) -> Result<(), SpecificationError> {
        if !(self.resolution_hours.is_finite() && self.resolution_hours > 0.0) {
            return Err(SpecificationError::InvalidHorizon(format!(
                "resolution must be positive, got {}",
                self.resolution_hours
            )));
        }
        if self.end < self.start {
            return Err(SpecificationError::InvalidHorizon(format!(
                "end {} precedes start {}",
                self.end, self.start
            )));
        }
        Ok(())
    }

    /// Number of time steps, both ends included.
    pub fn steps(&self) -> usize {
        let span_hours = (self.end - self.start).num_seconds() as f64 / 3600.0;
        if span_hours < 0.0 || self.resolution_hours <= 0.0 {
            return 0;
        }
        (span_hours / self.resolution_hours + 1e-9).floor() as usize + 1
    }

    pub fn timestamp(&self, step: usize) -> NaiveDateTime {
        let seconds = (step as f64 * self.resolution_hours * 3600.0).round() as i64;
        self.start + chrono::Duration::seconds(seconds)
    }
}

/// A planning period; technology sizes carry over between consecutive periods.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InvestmentPeriod {
    pub name: String,
    pub length_years: f64,
}

impl InvestmentPeriod {
    pub fn new(name: impl Into<String>, length_years: f64) -> Self {
        Self {
            name: name.into(),
            length_years,
        }
    }
}

/// Validated topology shared by every construction stage.
#[derive(Debug, Clone, Serialize)]
pub struct Topology {
    carriers: Vec<Carrier>,
    nodes: Vec<Node>,
    horizon: TimeHorizon,
    investment_periods: Vec<InvestmentPeriod>,
}

impl Topology {
    pub fn builder(horizon: TimeHorizon) -> TopologyBuilder {
        TopologyBuilder::new(horizon)
    }

    pub fn carriers(&self) -> &[Carrier] {
        &self.carriers
    }

    pub fn nodes(&self) -> &[Node] {
        &self.nodes
    }

    pub fn node(&self, name: &str) -> Option<&Node> {
        self.nodes.iter().find(|n| n.name == name)
    }

    pub fn horizon(&self) -> &TimeHorizon {
        &self.horizon
    }

    pub fn steps(&self) -> usize {
        self.horizon.steps()
    }

    pub fn investment_periods(&self) -> &[InvestmentPeriod] {
        &self.investment_periods
    }

    pub fn has_carrier(&self, carrier: &Carrier) -> bool {
        self.carriers.contains(carrier)
    }

    /// Look up a node, reporting `entity` as the referrer when it is missing.
    pub fn require_node(&self, name: &str, entity: &str) -> Result<&Node, SpecificationError> {
        self.node(name).ok_or_else(|| SpecificationError::UnknownNode {
            entity: entity.to_string(),
            node: name.to_string(),
        })
    }

    /// Require that `carrier` is declared and balanced at `node`.
    pub fn require_carrier_at(
        &self,
        node: &Node,
        carrier: &Carrier,
        entity: &str,
    ) -> Result<(), SpecificationError> {
        if self.has_carrier(carrier) && node.has_carrier(carrier) {
            Ok(())
        } else {
            Err(SpecificationError::UnknownCarrier {
                entity: format!("{} at node '{}'", entity, node.name),
                carrier: carrier.to_string(),
            })
        }
    }
}

/// Fluent builder for [`Topology`].
#[derive(Debug, Clone)]
pub struct TopologyBuilder {
    carriers: Vec<Carrier>,
    nodes: Vec<Node>,
    horizon: TimeHorizon,
    investment_periods: Vec<InvestmentPeriod>,
}

impl TopologyBuilder {
    pub fn new(horizon: TimeHorizon) -> Self {
        Self {
            carriers: Vec::new(),
            nodes: Vec::new(),
            horizon,
            investment_periods: Vec::new(),
        }
    }

    pub fn carrier(mut self, carrier: impl Into<Carrier>) -> Self {
        self.carriers.push(carrier.into());
        self
    }

    pub fn node(mut self, node: Node) -> Self {
        self.nodes.push(node);
        self
    }

    pub fn investment_period(mut self, period: InvestmentPeriod) -> Self {
        self.investment_periods.push(period);
        self
    }

    pub fn build(self) -> Result<Topology, SpecificationError> {
        self.horizon.validate()?;

        let mut seen = HashSet::new();
        for carrier in &self.carriers {
            if !seen.insert(carrier.as_str()) {
                return Err(SpecificationError::Duplicate {
                    kind: "carrier",
                    name: carrier.to_string(),
                });
            }
        }

        let mut seen = HashSet::new();
        for node in &self.nodes {
            if !seen.insert(node.name.as_str()) {
                return Err(SpecificationError::Duplicate {
                    kind: "node",
                    name: node.name.clone(),
                });
            }
            if let Some(carrier) = node.carriers.iter().find(|c| !self.carriers.contains(c)) {
                return Err(SpecificationError::UnknownCarrier {
                    entity: format!("node '{}'", node.name),
                    carrier: carrier.to_string(),
                });
            }
            for (name, size) in &node.existing_technologies {
                if !(size.is_finite() && *size >= 0.0) {
                    return Err(SpecificationError::invalid(
                        format!("existing technology '{}' at node '{}'", name, node.name),
                        "size",
                        format!("expected a non-negative size, got {}", size),
                    ));
                }
            }
        }

        if self.investment_periods.is_empty() {
            return Err(SpecificationError::missing("topology", "investment_periods"));
        }
        let mut seen = HashSet::new();
        for period in &self.investment_periods {
            if !seen.insert(period.name.as_str()) {
                return Err(SpecificationError::Duplicate {
                    kind: "investment period",
                    name: period.name.clone(),
                });
            }
        }

        Ok(Topology {
            carriers: self.carriers,
            nodes: self.nodes,
            horizon: self.horizon,
            investment_periods: self.investment_periods,
        })
    }
}
