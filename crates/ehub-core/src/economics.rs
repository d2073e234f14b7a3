//! Investment economics shared by technologies and networks.
//!
//! # Annualization
//!
//! Capital costs enter the objective as equivalent annual payments using
//! the capital recovery factor:
//!
//! ```text
//! CRF = r(1+r)^n / ((1+r)^n - 1)      (r > 0)
//! CRF = 1 / n                          (r = 0)
//! ```
//!
//! # Capex models
//!
//! | Model | Relation | Needs relaxation |
//! |-------|----------|------------------|
//! | [`CapexModel::Linear`] | `capex = unit_capex * size` | no |
//! | [`CapexModel::Piecewise`] | interpolation over `(size, cost)` breakpoints | yes |

use crate::error::SpecificationError;
use serde::{Deserialize, Serialize};

/// Capital recovery factor for `discount_rate` over `lifetime_years`.
pub fn annualization_factor(discount_rate: f64, lifetime_years: f64) -> f64 {
    if lifetime_years <= 0.0 {
        return 0.0;
    }
    if discount_rate.abs() < 1e-12 {
        return 1.0 / lifetime_years;
    }
    let growth = (1.0 + discount_rate).powf(lifetime_years);
    discount_rate * growth / (growth - 1.0)
}

/// Cost relation between installed size and capital expenditure.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "model", rename_all = "snake_case")]
pub enum CapexModel {
    /// Constant cost per unit of size
    Linear { unit_capex: f64 },
    /// Piecewise-linear cost over increasing size breakpoints
    Piecewise {
        breakpoints: Vec<f64>,
        values: Vec<f64>,
    },
}

impl CapexModel {
    pub fn is_piecewise(&self) -> bool {
        matches!(self, CapexModel::Piecewise { .. })
    }

    /// Non-annualized capital cost of `size`.
    pub fn evaluate(&self, size: f64) -> f64 {
        match self {
            CapexModel::Linear { unit_capex } => unit_capex * size,
            CapexModel::Piecewise {
                breakpoints,
                values,
            } => PiecewiseLinear::new(breakpoints.clone(), values.clone()).evaluate(size),
        }
    }

    /// Check breakpoints against the admissible size range `[size_min, size_max]`.
    pub fn validate(&self, entity: &str, size_min: f64, size_max: f64) -> Result<(), SpecificationError> {
        match self {
            CapexModel::Linear { unit_capex } => {
                if !unit_capex.is_finite() {
                    return Err(SpecificationError::invalid(entity, "unit_capex", "must be finite"));
                }
                Ok(())
            }
            CapexModel::Piecewise {
                breakpoints,
                values,
            } => {
                let curve = PiecewiseLinear::new(breakpoints.clone(), values.clone());
                curve
                    .validate()
                    .map_err(|reason| SpecificationError::invalid(entity, "capex breakpoints", reason))?;
                if curve.x_min() > size_min || curve.x_max() < size_max {
                    return Err(SpecificationError::invalid(
                        entity,
                        "capex breakpoints",
                        format!(
                            "breakpoints [{}, {}] do not cover size range [{}, {}]",
                            curve.x_min(),
                            curve.x_max(),
                            size_min,
                            size_max
                        ),
                    ));
                }
                Ok(())
            }
        }
    }
}

/// Economic parameters of one technology or network.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EconomicsSpec {
    pub capex: CapexModel,
    /// Variable opex per unit of primary flow
    #[serde(default)]
    pub opex_variable: f64,
    /// Fixed opex as a share of the as-new annualized capex
    #[serde(default)]
    pub opex_fixed: f64,
    pub lifetime: f64,
    pub discount_rate: f64,
    /// Cost per unit of size removed from an existing asset
    #[serde(default)]
    pub decommission_cost: f64,
}

impl EconomicsSpec {
    pub fn linear(unit_capex: f64, lifetime: f64, discount_rate: f64) -> Self {
        Self {
            capex: CapexModel::Linear { unit_capex },
            opex_variable: 0.0,
            opex_fixed: 0.0,
            lifetime,
            discount_rate,
            decommission_cost: 0.0,
        }
    }

    pub fn with_opex(mut self, variable: f64, fixed_share: f64) -> Self {
        self.opex_variable = variable;
        self.opex_fixed = fixed_share;
        self
    }

    pub fn with_decommission_cost(mut self, cost: f64) -> Self {
        self.decommission_cost = cost;
        self
    }

    pub fn with_capex(mut self, capex: CapexModel) -> Self {
        self.capex = capex;
        self
    }

    pub fn annualization(&self) -> f64 {
        annualization_factor(self.discount_rate, self.lifetime)
    }

    pub fn validate(&self, entity: &str) -> Result<(), SpecificationError> {
        if !(self.lifetime.is_finite() && self.lifetime > 0.0) {
            return Err(SpecificationError::invalid(entity, "lifetime", "must be positive"));
        }
        if !(self.discount_rate.is_finite() && self.discount_rate > -1.0) {
            return Err(SpecificationError::invalid(
                entity,
                "discount_rate",
                "must be greater than -1",
            ));
        }
        for (field, value) in [
            ("opex_variable", self.opex_variable),
            ("opex_fixed", self.opex_fixed),
            ("decommission_cost", self.decommission_cost),
        ] {
            if !value.is_finite() {
                return Err(SpecificationError::invalid(entity, field, "must be finite"));
            }
        }
        Ok(())
    }
}

/// Piecewise-linear function over increasing breakpoints.
#[derive(Debug, Clone, PartialEq)]
pub struct PiecewiseLinear {
    pub breakpoints: Vec<f64>,
    pub values: Vec<f64>,
}

impl PiecewiseLinear {
    pub fn new(breakpoints: Vec<f64>, values: Vec<f64>) -> Self {
        Self {
            breakpoints,
            values,
        }
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.breakpoints.len() < 2 {
            return Err("at least two breakpoints are required".into());
        }
        if self.breakpoints.len() != self.values.len() {
            return Err(format!(
                "{} breakpoints but {} values",
                self.breakpoints.len(),
                self.values.len()
            ));
        }
        if self
            .breakpoints
            .iter()
            .chain(self.values.iter())
            .any(|v| !v.is_finite())
        {
            return Err("breakpoints and values must be finite".into());
        }
        if let Some(i) = self.breakpoints.windows(2).position(|w| w[1] <= w[0]) {
            return Err(format!("breakpoints not strictly increasing at position {}", i + 1));
        }
        Ok(())
    }

    pub fn x_min(&self) -> f64 {
        self.breakpoints.first().copied().unwrap_or(0.0)
    }

    pub fn x_max(&self) -> f64 {
        self.breakpoints.last().copied().unwrap_or(0.0)
    }

    /// Linear interpolation, extrapolating along the first/last segment.
    pub fn evaluate(&self, x: f64) -> f64 {
        let n = self.breakpoints.len().min(self.values.len());
        match n {
            0 => 0.0,
            1 => self.values[0],
            _ => {
                let seg = self.breakpoints[..n]
                    .windows(2)
                    .position(|w| x <= w[1])
                    .unwrap_or(n - 2);
                let (x0, x1) = (self.breakpoints[seg], self.breakpoints[seg + 1]);
                let (y0, y1) = (self.values[seg], self.values[seg + 1]);
                y0 + (y1 - y0) * (x - x0) / (x1 - x0)
            }
        }
    }
}
