//! Model assembly: validate, aggregate, fit, synthesize, solve.
//!
//! ```text
//!  HubModelBuilder::build
//!    ├─ validate config, series against topology
//!    ├─ representative mapping (identity unless aggregation is enabled)
//!    ├─ fit every technology, validate every network      (all before synthesis)
//!    ├─ synthesize technologies, networks
//!    ├─ node balances, objective ledger, emission limit
//!    └─ AssembledModel
//!
//!  AssembledModel::solve
//!    ├─ relax (only when needs_relaxation)
//!    └─ SolveOutcome<HubSolution>
//! ```
//!
//! Any failure aborts the build; no partially built model is returned.

use std::collections::BTreeSet;

use ehub_core::{Diagnostics, HubError, HubResult, ModelConfig, NetworkSpec, SpecificationError, TechnologySpec, Topology};
use ehub_ts::{representative_mapping, RepresentativeMapping, TimeSeriesStore};
use good_lp::Variable;
use serde::Serialize;
use tracing::{debug, info};

use crate::balance::{assemble_balances, CarrierBalance};
use crate::model::HubModel;
use crate::network::{NetworkBlock, NetworkInstance, NetworkReport};
use crate::objective::{ObjectiveReport, ObjectiveTerms};
use crate::solve::{ModelSolution, SolveOutcome};
use crate::synthesis::SynthesisContext;
use crate::technology::{TechnologyBlock, TechnologyInstance, TechnologyReport};

/// Collects the inputs of one investment period.
pub struct HubModelBuilder {
    topology: Topology,
    series: TimeSeriesStore,
    config: ModelConfig,
    technologies: Vec<TechnologySpec>,
    carried_technologies: Vec<TechnologyInstance>,
    networks: Vec<NetworkSpec>,
    carried_networks: Vec<NetworkInstance>,
}

impl HubModelBuilder {
    pub fn new(topology: Topology, series: TimeSeriesStore, config: ModelConfig) -> Self {
        Self {
            topology,
            series,
            config,
            technologies: Vec::new(),
            carried_technologies: Vec::new(),
            networks: Vec::new(),
            carried_networks: Vec::new(),
        }
    }

    pub fn with_technology(mut self, spec: TechnologySpec) -> Self {
        self.technologies.push(spec);
        self
    }

    pub fn with_technologies(mut self, specs: impl IntoIterator<Item = TechnologySpec>) -> Self {
        self.technologies.extend(specs);
        self
    }

    pub fn with_network(mut self, spec: NetworkSpec) -> Self {
        self.networks.push(spec);
        self
    }

    /// Add instances carried over from a previous investment period. They
    /// keep their fitted performance and skip node registration checks, but
    /// `build` rejects them when their node, carriers or fitted horizon no
    /// longer match the new topology.
    pub fn with_carried_over(mut self, carried: CarriedOver) -> Self {
        self.carried_technologies.extend(carried.technologies);
        self.carried_networks.extend(carried.networks);
        self
    }

    pub fn build(self) -> HubResult<AssembledModel> {
        let Self {
            topology,
            series,
            config,
            technologies,
            carried_technologies,
            networks,
            carried_networks,
        } = self;

        config.validate()?;
        series.validate_against(&topology)?;
        let mut diagnostics = Diagnostics::new();

        let resolution = topology.horizon().resolution_hours;
        let mapping = representative_mapping(&config.aggregation, resolution, &series)?;
        if !mapping.is_identity() {
            diagnostics.note(
                "aggregation",
                format!(
                    "{} full steps represented by {} steps",
                    mapping.n_full(),
                    mapping.n_representative()
                ),
            );
        }

        let mut tech_instances = technologies
            .into_iter()
            .map(|spec| TechnologyInstance::new(spec, &topology, &series, &config.performance))
            .collect::<HubResult<Vec<_>>>()?;
        for inst in &carried_technologies {
            inst.check_against(&topology)?;
        }
        tech_instances.extend(carried_technologies);
        let mut net_instances = networks
            .into_iter()
            .map(|spec| NetworkInstance::new(spec, &topology))
            .collect::<HubResult<Vec<_>>>()?;
        for inst in &carried_networks {
            inst.check_against(&topology)?;
        }
        net_instances.extend(carried_networks);

        check_unique(tech_instances.iter().map(|t| t.prefix()), "technology")?;
        check_unique(net_instances.iter().map(|n| n.name().to_string()), "network")?;
        for inst in &tech_instances {
            inst.diagnose(&mut diagnostics);
        }
        for inst in &net_instances {
            inst.diagnose(&mut diagnostics);
        }

        let mut model = HubModel::new();
        let ctx = SynthesisContext::new(&mapping, &series);
        let mut needs_relaxation = false;

        let mut tech_blocks = Vec::with_capacity(tech_instances.len());
        for inst in &tech_instances {
            let out = inst.synthesize(&mut model, ctx)?;
            needs_relaxation |= out.needs_relaxation;
            tech_blocks.push(out.block);
        }
        let mut net_blocks = Vec::with_capacity(net_instances.len());
        for inst in &net_instances {
            let out = inst.synthesize(&mut model, ctx)?;
            needs_relaxation |= out.needs_relaxation;
            net_blocks.push(out.block);
        }

        let balances = assemble_balances(&mut model, &topology, ctx, &tech_blocks, &net_blocks)?;
        let terms = ObjectiveTerms::assemble(ctx, &tech_blocks, &net_blocks, &balances);
        terms.apply_limits(&mut model, &config)?;

        if needs_relaxation != model.needs_relaxation() {
            return Err(HubError::Other(format!(
                "synthesizers reported needs_relaxation = {} but the model has {} pending encodings",
                needs_relaxation,
                model.pending_count()
            )));
        }

        info!(
            technologies = tech_blocks.len(),
            networks = net_blocks.len(),
            variables = model.num_variables(),
            constraints = model.num_constraints(),
            pending = model.pending_count(),
            warnings = diagnostics.warning_count(),
            "assembled hub model"
        );

        Ok(AssembledModel {
            model,
            config,
            mapping,
            technologies: tech_instances.into_iter().zip(tech_blocks).collect(),
            networks: net_instances.into_iter().zip(net_blocks).collect(),
            balances,
            terms,
            needs_relaxation,
            diagnostics,
        })
    }
}

fn check_unique(names: impl Iterator<Item = String>, kind: &'static str) -> Result<(), SpecificationError> {
    let mut seen = BTreeSet::new();
    for name in names {
        if !seen.insert(name.clone()) {
            return Err(SpecificationError::Duplicate { kind, name });
        }
    }
    Ok(())
}

/// A completely synthesized model, ready to relax and solve.
pub struct AssembledModel {
    model: HubModel,
    config: ModelConfig,
    mapping: RepresentativeMapping,
    technologies: Vec<(TechnologyInstance, TechnologyBlock)>,
    networks: Vec<(NetworkInstance, NetworkBlock)>,
    balances: Vec<CarrierBalance>,
    terms: ObjectiveTerms,
    needs_relaxation: bool,
    diagnostics: Diagnostics,
}

impl AssembledModel {
    pub fn model(&self) -> &HubModel {
        &self.model
    }

    /// Append caller-side constraints (scenario pins, extra caps) before solving.
    pub fn model_mut(&mut self) -> &mut HubModel {
        &mut self.model
    }

    /// Whether piecewise or disjunctive encodings need the relaxation pass.
    pub fn needs_relaxation(&self) -> bool {
        self.needs_relaxation
    }

    pub fn diagnostics(&self) -> &Diagnostics {
        &self.diagnostics
    }

    pub fn mapping(&self) -> &RepresentativeMapping {
        &self.mapping
    }

    pub fn terms(&self) -> &ObjectiveTerms {
        &self.terms
    }

    pub fn balances(&self) -> &[CarrierBalance] {
        &self.balances
    }

    pub fn variable(&self, name: &str, index: usize) -> Option<Variable> {
        self.model.variable(name, index)
    }

    pub fn technology_block(&self, node: &str, name: &str) -> Option<&TechnologyBlock> {
        self.technologies
            .iter()
            .map(|(_, b)| b)
            .find(|b| b.node == node && b.name == name)
    }

    pub fn network_block(&self, name: &str) -> Option<&NetworkBlock> {
        self.networks.iter().map(|(_, b)| b).find(|b| b.name == name)
    }

    /// Relax if needed, then solve with the configured backend.
    pub fn solve(self) -> HubResult<SolveOutcome<HubSolution>> {
        let Self {
            mut model,
            config,
            technologies,
            networks,
            terms,
            needs_relaxation,
            ..
        } = self;

        if needs_relaxation || model.needs_relaxation() {
            let report = model.relax(&config.relaxation)?;
            debug!(
                disjunctions = report.disjunctions,
                piecewise = report.piecewise,
                variables = report.variables,
                constraints = report.constraints,
                "relaxed pending encodings"
            );
        }
        let objective = terms.objective(config.optimization.objective);
        let outcome = model.solve(&objective, &config.solver)?;
        Ok(outcome.map(|solution| HubSolution::new(solution, &terms, technologies, networks)))
    }
}

/// Instances to start the next investment period from.
#[derive(Debug, Clone, Default)]
pub struct CarriedOver {
    pub technologies: Vec<TechnologyInstance>,
    pub networks: Vec<NetworkInstance>,
}

#[derive(Serialize)]
struct SolutionSummary<'a> {
    objective: f64,
    terms: &'a ObjectiveReport,
    technologies: &'a [TechnologyReport],
    networks: &'a [NetworkReport],
}

/// Optimal solution of an [`AssembledModel`].
#[derive(Debug, Clone)]
pub struct HubSolution {
    solution: ModelSolution,
    report: ObjectiveReport,
    technologies: Vec<TechnologyReport>,
    networks: Vec<NetworkReport>,
    carried: CarriedOver,
}

impl HubSolution {
    fn new(
        solution: ModelSolution,
        terms: &ObjectiveTerms,
        technologies: Vec<(TechnologyInstance, TechnologyBlock)>,
        networks: Vec<(NetworkInstance, NetworkBlock)>,
    ) -> Self {
        let report = terms.evaluate(&solution);

        let mut tech_reports = Vec::with_capacity(technologies.len());
        let mut carried = CarriedOver::default();
        for (inst, block) in technologies {
            let size = solution.value_of(block.size);
            let final_level = block
                .level
                .as_ref()
                .and_then(|l| l.last())
                .map(|&v| solution.value_of(v));
            carried.technologies.push(inst.carry_over(size, final_level.unwrap_or(0.0)));
            tech_reports.push(TechnologyReport {
                node: block.node,
                name: block.name,
                archetype: block.archetype,
                size,
                capex: solution.value_of(block.capex),
                final_level,
            });
        }

        let mut net_reports = Vec::with_capacity(networks.len());
        for (inst, block) in networks {
            let sizes: Vec<f64> = block.pairs.iter().map(|p| solution.value_of(p.size)).collect();
            carried.networks.push(inst.carry_over(&sizes));
            net_reports.push(NetworkReport {
                name: block.name,
                carrier: block.carrier,
                sizes: block
                    .pairs
                    .into_iter()
                    .zip(sizes)
                    .map(|(p, s)| (p.from, p.to, s))
                    .collect(),
            });
        }

        Self {
            solution,
            report,
            technologies: tech_reports,
            networks: net_reports,
            carried,
        }
    }

    /// Value of variable `name[index]`; scalars use index 0.
    pub fn value(&self, name: &str, index: usize) -> Option<f64> {
        self.solution.value(name, index)
    }

    pub fn series(&self, name: &str) -> Option<Vec<f64>> {
        self.solution.series(name)
    }

    pub fn objective(&self) -> f64 {
        self.solution.objective()
    }

    pub fn report(&self) -> &ObjectiveReport {
        &self.report
    }

    pub fn technologies(&self) -> &[TechnologyReport] {
        &self.technologies
    }

    pub fn networks(&self) -> &[NetworkReport] {
        &self.networks
    }

    pub fn solution(&self) -> &ModelSolution {
        &self.solution
    }

    /// Every instance as an existing asset with its solved size and final
    /// storage level, for the next investment period.
    pub fn carry_over(&self) -> CarriedOver {
        self.carried.clone()
    }

    pub fn to_json(&self) -> HubResult<String> {
        let summary = SolutionSummary {
            objective: self.objective(),
            terms: &self.report,
            technologies: &self.technologies,
            networks: &self.networks,
        };
        serde_json::to_string_pretty(&summary).map_err(|e| HubError::Other(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::technology::test_support::topology;
    use ehub_core::{EconomicsSpec, Node, PerformanceCurve, PerformanceSpec};

    fn boiler(name: &str) -> TechnologySpec {
        TechnologySpec::new("n", name, "CONV1", EconomicsSpec::linear(100.0, 20.0, 0.05))
            .with_size_bounds(0.0, 10.0)
            .with_input("gas")
            .with_output("heat")
            .with_performance(PerformanceSpec {
                curve: Some(PerformanceCurve::new(vec![0.0, 1.0]).with_output("heat", vec![0.0, 0.9])),
                ..PerformanceSpec::default()
            })
    }

    #[test]
    fn test_build_reports_structure() {
        let topo = topology(3, Node::new("n").with_new_technology("Boiler"));
        let series = TimeSeriesStore::for_topology(&topo);
        let assembled = HubModelBuilder::new(topo, series, ModelConfig::default())
            .with_technology(boiler("Boiler"))
            .build()
            .unwrap();
        assert!(!assembled.needs_relaxation());
        assert!(assembled.mapping().is_identity());
        assert!(assembled.technology_block("n", "Boiler").is_some());
        assert!(assembled.variable("n/balance", 0).is_none());
        assert!(assembled.model().constraint("n/balance/heat[2]").is_some());
        assert_eq!(assembled.balances().len(), 5);
    }

    #[test]
    fn test_duplicate_technology_rejected() {
        let topo = topology(3, Node::new("n").with_new_technology("Boiler"));
        let series = TimeSeriesStore::for_topology(&topo);
        let err = HubModelBuilder::new(topo, series, ModelConfig::default())
            .with_technology(boiler("Boiler"))
            .with_technology(boiler("Boiler"))
            .build()
            .err()
            .unwrap();
        assert!(matches!(
            err,
            HubError::Specification(SpecificationError::Duplicate { kind: "technology", .. })
        ));
    }

    #[test]
    fn test_invalid_config_aborts_build() {
        let topo = topology(3, Node::new("n"));
        let series = TimeSeriesStore::for_topology(&topo);
        let mut config = ModelConfig::default();
        config.relaxation.big_m = -1.0;
        assert!(matches!(
            HubModelBuilder::new(topo, series, config).build(),
            Err(HubError::Config(_))
        ));
    }
}
