//! Model-construction configuration.
//!
//! [`ModelConfig`] is read from TOML. Every section is optional and falls
//! back to its defaults, so a partial file such as
//!
//! ```toml
//! [optimization]
//! objective = "costs_emissionlimit"
//! emission_limit = 5000.0
//!
//! [aggregation]
//! typical_days = 3
//! ```
//!
//! is a complete configuration.

use std::path::Path;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{HubError, HubResult};

/// Root configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelConfig {
    pub optimization: OptimizationConfig,
    pub aggregation: AggregationConfig,
    pub performance: PerformanceConfig,
    pub relaxation: RelaxationConfig,
    pub solver: SolverConfig,
}

impl ModelConfig {
    /// Parse and validate a TOML document.
    pub fn from_toml_str(contents: &str) -> HubResult<Self> {
        let config: Self = toml::from_str(contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Load and validate a TOML file.
    pub fn load(path: impl AsRef<Path>) -> HubResult<Self> {
        let contents = std::fs::read_to_string(path.as_ref())?;
        Self::from_toml_str(&contents)
    }

    pub fn validate(&self) -> HubResult<()> {
        if self.optimization.objective == Objective::CostsEmissionLimit
            && self.optimization.emission_limit.is_none()
        {
            return Err(HubError::Config(
                "objective 'costs_emissionlimit' requires optimization.emission_limit".into(),
            ));
        }
        if !(self.aggregation.period_hours.is_finite() && self.aggregation.period_hours > 0.0) {
            return Err(HubError::Config("aggregation.period_hours must be positive".into()));
        }
        if self.performance.piecewise_segments == 0 {
            return Err(HubError::Config(
                "performance.piecewise_segments must be at least 1".into(),
            ));
        }
        if !(self.relaxation.big_m.is_finite() && self.relaxation.big_m > 0.0) {
            return Err(HubError::Config("relaxation.big_m must be positive".into()));
        }
        if !(self.solver.mip_gap >= 0.0 && self.solver.mip_gap.is_finite()) {
            return Err(HubError::Config("solver.mip_gap must be non-negative".into()));
        }
        Ok(())
    }
}

/// Quantity the solver minimises.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Objective {
    /// Total annualized cost
    #[default]
    Costs,
    /// Positive emissions only
    #[serde(rename = "emissions_pos")]
    EmissionsPositive,
    /// Positive minus negative emissions
    EmissionsNet,
    /// Total cost subject to a net emission cap
    #[serde(rename = "costs_emissionlimit")]
    CostsEmissionLimit,
}

impl FromStr for Objective {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "costs" => Ok(Objective::Costs),
            "emissions_pos" => Ok(Objective::EmissionsPositive),
            "emissions_net" => Ok(Objective::EmissionsNet),
            "costs_emissionlimit" => Ok(Objective::CostsEmissionLimit),
            other => Err(anyhow::anyhow!("unknown objective '{}'", other)),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct OptimizationConfig {
    pub objective: Objective,
    /// Net emission cap used by `costs_emissionlimit`
    pub emission_limit: Option<f64>,
}

/// Representative-period settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AggregationConfig {
    /// Number of typical periods; 0 keeps full resolution
    pub typical_days: usize,
    /// Length of one period in hours
    pub period_hours: f64,
    /// Seed for the clustering initialisation
    pub seed: u64,
    pub max_iterations: usize,
}

impl AggregationConfig {
    pub fn is_enabled(&self) -> bool {
        self.typical_days > 0
    }
}

impl Default for AggregationConfig {
    fn default() -> Self {
        Self {
            typical_days: 0,
            period_hours: 24.0,
            seed: 42,
            max_iterations: 100,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PerformanceConfig {
    /// Segments used when a piecewise fit has no explicit breakpoints
    pub piecewise_segments: usize,
}

impl Default for PerformanceConfig {
    fn default() -> Self {
        Self {
            piecewise_segments: 2,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RelaxationConfig {
    /// Fallback big-M when a disjunct constraint has unbounded terms
    pub big_m: f64,
}

impl Default for RelaxationConfig {
    fn default() -> Self {
        Self { big_m: 1e6 }
    }
}

/// Solver backend for the good_lp adapter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SolverBackend {
    /// Pure-Rust branch and bound
    #[default]
    Microlp,
    /// HiGHS (requires the `solver-highs` feature)
    Highs,
}

impl SolverBackend {
    pub fn as_str(&self) -> &'static str {
        match self {
            SolverBackend::Microlp => "microlp",
            SolverBackend::Highs => "highs",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SolverConfig {
    pub backend: SolverBackend,
    /// Relative MIP gap (HiGHS only)
    pub mip_gap: f64,
    /// Wall-clock limit in seconds (HiGHS only)
    pub time_limit_secs: Option<f64>,
}

impl Default for SolverConfig {
    fn default() -> Self {
        Self {
            backend: SolverBackend::Microlp,
            mip_gap: 0.02,
            time_limit_secs: None,
        }
    }
}
