//! # ehub-core: Energy-Hub Model Data
//!
//! Shared data model for building multi-carrier energy-system optimization
//! models: where things are (topology), what they are (technology and
//! network specifications), what they cost (economics) and what can go
//! wrong (errors, diagnostics).
//!
//! ## Design
//!
//! - **Topology** is validated once by [`TopologyBuilder`] and read-only afterwards.
//! - **Specifications** ([`TechnologySpec`], [`NetworkSpec`]) are raw ingestion
//!   records. Archetype tags stay strings until [`TechnologySpec::archetype`]
//!   parses them into the closed [`Archetype`] set.
//! - **Errors** follow a three-family taxonomy (specification, fit,
//!   aggregation) wrapped by [`HubError`].
//!
//! ## Quick Start
//!
//! ```rust
//! use chrono::NaiveDate;
//! use ehub_core::*;
//!
//! let start = NaiveDate::from_ymd_opt(2030, 1, 1).unwrap().and_hms_opt(0, 0, 0).unwrap();
//! let topology = Topology::builder(TimeHorizon::hourly(start, 24))
//!     .carrier("electricity")
//!     .carrier("gas")
//!     .node(Node::new("city").with_carrier("electricity").with_carrier("gas"))
//!     .investment_period(InvestmentPeriod::new("2030", 10.0))
//!     .build()
//!     .unwrap();
//!
//! assert_eq!(topology.steps(), 24);
//! ```

pub mod config;
pub mod diagnostics;
pub mod economics;
pub mod error;
pub mod network;
pub mod technology;
pub mod topology;

pub use config::{
    AggregationConfig, ModelConfig, Objective, OptimizationConfig, PerformanceConfig,
    RelaxationConfig, SolverBackend, SolverConfig,
};
pub use diagnostics::{DiagnosticIssue, Diagnostics, Severity};
pub use economics::{annualization_factor, CapexModel, EconomicsSpec, PiecewiseLinear};
pub use error::{
    AggregationError, FitError, FitErrorKind, HubError, HubResult, SpecificationError,
};
pub use network::{ArcSpec, NetworkCapexModel, NetworkEconomics, NetworkSpec};
pub use technology::{
    Archetype, CompressionSpec, PerformanceCurve, PerformanceFunction, PerformanceSpec,
    SinkPerformance, StoragePerformance, TechnologySpec,
};
pub use topology::{Carrier, InvestmentPeriod, Node, TimeHorizon, Topology, TopologyBuilder};
