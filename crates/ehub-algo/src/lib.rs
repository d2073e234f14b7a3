//! # ehub-algo: Energy-Hub Model Construction
//!
//! Turns a validated topology, time series and technology/network
//! specifications into a mixed-integer linear program and solves it.
//!
//! ## Pipeline
//!
//! | Stage | Module | Output |
//! |-------|--------|--------|
//! | Performance fitting | [`fit`] | [`FittedPerformance`] per technology |
//! | Technology synthesis | [`technology`] | [`TechnologyBlock`] (RES, CONV1-3, STOR, SINK) |
//! | Network synthesis | [`network`] | [`NetworkBlock`] |
//! | Node balances | [`balance`] | one equality per node, carrier and step |
//! | Objective ledger | [`objective`] | [`ObjectiveTerms`] |
//! | Relaxation | [`model`] | big-M / convex-combination constraints |
//! | Solve | [`solve`] | [`SolveOutcome`] |
//!
//! [`HubModelBuilder`] runs the stages in order and returns an
//! [`AssembledModel`] only when every stage succeeded.
//!
//! ### Time indexing
//!
//! Decision variables live at representative resolution (the steps of the
//! [`ehub_ts::RepresentativeMapping`]); storage and sink levels run over the
//! full horizon through the mapping's order. Without aggregation both
//! coincide.
//!
//! ### Relaxation
//!
//! Piecewise capex, part-load disjunctions, sink compression segments and
//! exclusive network directions are recorded as pending encodings. Every
//! synthesis call reports `needs_relaxation`; the builder ORs these and
//! [`AssembledModel::solve`] runs the relaxation pass when it is set.
//!
//! ## Example
//!
//! ```ignore
//! use ehub_algo::HubModelBuilder;
//! use ehub_core::ModelConfig;
//!
//! let assembled = HubModelBuilder::new(topology, series, ModelConfig::default())
//!     .with_technology(boiler)
//!     .build()?;
//!
//! if let Some(solution) = assembled.solve()?.optimal() {
//!     println!("total cost: {:.2}", solution.report().total_cost);
//!     let next_period = solution.carry_over();
//! }
//! ```

pub mod balance;
pub mod builder;
pub mod fit;
pub mod model;
pub mod network;
pub mod objective;
pub mod solve;
pub mod synthesis;
pub mod technology;

pub use balance::{assemble_balances, CarrierBalance};
pub use builder::{AssembledModel, CarriedOver, HubModelBuilder, HubSolution};
pub use fit::{fit_technology, FittedPerformance};
pub use model::{HubModel, LinearRelation, ModelError, NamedConstraint, RelaxationReport, VarBounds};
pub use network::{NetworkBlock, NetworkInstance, NetworkReport};
pub use objective::{ObjectiveReport, ObjectiveTerms};
pub use solve::{ModelSolution, SolveOutcome};
pub use synthesis::{SizeRule, SynthesisContext, Synthesized};
pub use technology::{TechnologyBlock, TechnologyInstance, TechnologyReport};
