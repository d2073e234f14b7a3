//! Network Constraint Synthesizer.
//!
//! Every [`ArcSpec`] becomes one *pair* with a size decision. A
//! bidirectional network adds the reverse arc to the pair, so both
//! directions share that size.
//!
//! ```text
//!  {net}/{a}-{b}/size, capex, capex_aux, opex_fixed     per pair
//!  {net}/{a}-{b}/built                                  binary, new pairs that need it
//!  {net}/{a}-{b}/opex_variable[r], emissions_pos[r], emissions_neg[r]
//!  {net}/{a}-{b}/flow[r]                                per directed arc
//!  {net}/{b}-{a}/flow[r]                                reverse arc (bidirectional)
//! ```
//!
//! A directed arc sends `flow` from its origin and delivers
//! `(1 - loss_per_km * distance) * flow` to its destination. Energy
//! consumption is charged at the sending node in the balance.

mod graph;

pub use graph::FlowGraph;

use std::collections::BTreeMap;

use ehub_core::{
    ArcSpec, Carrier, Diagnostics, HubResult, NetworkCapexModel, NetworkSpec, SpecificationError, Topology,
};
use good_lp::{Expression, Variable};
use serde::Serialize;
use tracing::debug;

use crate::model::{Disjunction, HubModel, LinearRelation, ModelError, VarBounds};
use crate::synthesis::{synthesize_investment, CapexCurve, Investment, SizeRule, SynthesisContext, Synthesized};

/// One sized connection between two nodes.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NetworkPair {
    pub from: String,
    pub to: String,
    pub distance: f64,
    pub rule: SizeRule,
}

/// One direction of flow.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DirectedArc {
    pub from: String,
    pub to: String,
    /// Index into the pair list
    pub pair: usize,
    /// Delivered fraction of the sent flow
    pub delivery: f64,
}

/// A validated network ready for synthesis.
#[derive(Debug, Clone)]
pub struct NetworkInstance {
    spec: NetworkSpec,
    pairs: Vec<NetworkPair>,
    arcs: Vec<DirectedArc>,
    graph: FlowGraph,
}

impl NetworkInstance {
    pub fn new(spec: NetworkSpec, topology: &Topology) -> HubResult<Self> {
        spec.validate()?;
        check_endpoints(&spec, topology)?;
        let pairs = spec
            .arcs
            .iter()
            .map(|arc| pair_for(&spec, arc))
            .collect::<Result<Vec<_>, _>>()?;
        let (arcs, graph) = directed_arcs(&spec, &pairs)?;
        Ok(Self {
            spec,
            pairs,
            arcs,
            graph,
        })
    }

    /// Clone into the next investment period as an existing network with
    /// the solved pair `sizes`.
    pub fn carry_over(&self, sizes: &[f64]) -> Self {
        let mut spec = self.spec.clone();
        spec.existing = true;
        let mut pairs = self.pairs.clone();
        for (p, (arc, pair)) in spec.arcs.iter_mut().zip(pairs.iter_mut()).enumerate() {
            let initial = sizes.get(p).copied().unwrap_or(pair.rule.upper()).max(0.0);
            arc.size_initial = Some(initial);
            pair.rule = if spec.decommission_allowed {
                SizeRule::Decommissionable {
                    initial,
                    min: spec.size_min.min(initial),
                }
            } else {
                SizeRule::Fixed(initial)
            };
        }
        Self {
            spec,
            pairs,
            arcs: self.arcs.clone(),
            graph: self.graph.clone(),
        }
    }

    /// Check a carried-over network against the topology of the period it
    /// is carried into.
    pub fn check_against(&self, topology: &Topology) -> Result<(), SpecificationError> {
        check_endpoints(&self.spec, topology)
    }

    pub fn spec(&self) -> &NetworkSpec {
        &self.spec
    }

    pub fn name(&self) -> &str {
        &self.spec.name
    }

    pub fn carrier(&self) -> &Carrier {
        &self.spec.carrier
    }

    pub fn pairs(&self) -> &[NetworkPair] {
        &self.pairs
    }

    pub fn arcs(&self) -> &[DirectedArc] {
        &self.arcs
    }

    pub fn graph(&self) -> &FlowGraph {
        &self.graph
    }

    /// Record non-fatal observations about this network.
    pub fn diagnose(&self, diagnostics: &mut Diagnostics) {
        let entity = self.spec.entity();
        for arc in &self.arcs {
            if arc.delivery < 0.9 {
                diagnostics.warn(
                    "network",
                    format!(
                        "arc {}->{} loses {:.1}% of its flow",
                        arc.from,
                        arc.to,
                        (1.0 - arc.delivery) * 100.0
                    ),
                    entity.clone(),
                );
            }
        }
        if !self.spec.existing && self.spec.size_max <= 0.0 {
            diagnostics.warn("network", "candidate network has zero maximum size", entity.clone());
        }
        let parts = self.graph.components();
        if parts > 1 {
            diagnostics.note(
                "network",
                format!("{} consists of {} disconnected parts", entity, parts),
            );
        }
    }

    fn pair_prefix(&self, pair: &NetworkPair) -> String {
        format!("{}/{}-{}", self.spec.name, pair.from, pair.to)
    }

    fn arc_prefix(&self, arc: &DirectedArc) -> String {
        format!("{}/{}-{}", self.spec.name, arc.from, arc.to)
    }

    fn has_built_indicator(&self, pair: &NetworkPair) -> bool {
        !pair.rule.is_existing()
            && (self.spec.built_indicator || self.spec.economics.capex.requires_built_indicator())
    }

    /// Emit all variables and constraints of this network.
    pub fn synthesize(
        &self,
        model: &mut HubModel,
        ctx: SynthesisContext<'_>,
    ) -> HubResult<Synthesized<NetworkBlock>> {
        Ok(self.synthesize_block(model, ctx)?)
    }

    fn synthesize_block(
        &self,
        model: &mut HubModel,
        ctx: SynthesisContext<'_>,
    ) -> Result<Synthesized<NetworkBlock>, ModelError> {
        let steps = ctx.steps();
        let mut needs_relaxation = false;

        let mut arcs = Vec::with_capacity(self.arcs.len());
        for arc in &self.arcs {
            let upper = self.pairs[arc.pair].rule.upper();
            let flow = model.add_series(&format!("{}/flow", self.arc_prefix(arc)), steps, |_| {
                VarBounds::non_negative(upper)
            })?;
            arcs.push(ArcBlock {
                from: arc.from.clone(),
                to: arc.to.clone(),
                pair: arc.pair,
                delivery: arc.delivery,
                flow,
                consumption: self.spec.energy_consumption.clone(),
            });
        }

        let mut pairs = Vec::with_capacity(self.pairs.len());
        for (p, pair) in self.pairs.iter().enumerate() {
            let prefix = self.pair_prefix(pair);
            let members: Vec<&ArcBlock> = arcs.iter().filter(|a| a.pair == p).collect();

            let built = if self.has_built_indicator(pair) {
                Some(model.add_variable(&format!("{}/built", prefix), VarBounds::binary())?)
            } else {
                None
            };
            let size_bounds = match (built, pair.rule) {
                (Some(_), SizeRule::New { max, .. }) => VarBounds::continuous(0.0, max),
                _ => pair.rule.bounds(),
            };
            let size = model.add_variable(&format!("{}/size", prefix), size_bounds)?;
            if let (Some(built), SizeRule::New { min, max, .. }) = (built, pair.rule) {
                model.le(format!("{}/built_max", prefix), size, max * built);
                model.ge(format!("{}/built_min", prefix), size, min * built);
            }

            for (arc, block) in self.arcs.iter().zip(&arcs).filter(|(a, _)| a.pair == p) {
                let arc_prefix = self.arc_prefix(arc);
                for r in 0..steps {
                    model.le(format!("{}/flow_max[{}]", arc_prefix, r), block.flow[r], size);
                }
            }

            if self.spec.exclusive_direction && members.len() == 2 {
                for r in 0..steps {
                    model.add_disjunction(Disjunction {
                        name: format!("{}/direction[{}]", prefix, r),
                        disjuncts: vec![
                            vec![LinearRelation::eq(members[1].flow[r], 0.0)],
                            vec![LinearRelation::eq(members[0].flow[r], 0.0)],
                        ],
                    })?;
                }
                needs_relaxation = true;
            }

            let sent = |r: usize| -> Expression { members.iter().map(|a| a.flow[r]).sum() };
            let opex_cost = self.spec.economics.opex_variable;
            let opex_variable = model.add_series(&format!("{}/opex_variable", prefix), steps, |_| {
                VarBounds::continuous(f64::NEG_INFINITY, f64::INFINITY)
            })?;
            for r in 0..steps {
                model.eq(
                    format!("{}/opex_variable_def[{}]", prefix, r),
                    opex_variable[r],
                    sent(r) * opex_cost,
                );
            }

            let factor = self.spec.emission_factor;
            let bounds = |active: bool| if active { VarBounds::free_non_negative() } else { VarBounds::fixed(0.0) };
            let emissions_pos = model.add_series(&format!("{}/emissions_pos", prefix), steps, |_| bounds(factor > 0.0))?;
            let emissions_neg = model.add_series(&format!("{}/emissions_neg", prefix), steps, |_| bounds(factor < 0.0))?;
            for r in 0..steps {
                if factor > 0.0 {
                    model.eq(format!("{}/emissions_pos_def[{}]", prefix, r), emissions_pos[r], sent(r) * factor);
                }
                if factor < 0.0 {
                    model.eq(format!("{}/emissions_neg_def[{}]", prefix, r), emissions_neg[r], sent(r) * -factor);
                }
            }

            let economics = &self.spec.economics;
            let d = pair.distance;
            let curve = match &economics.capex {
                NetworkCapexModel::Linear { unit_capex } => CapexCurve::Linear {
                    unit: unit_capex * d,
                    fixed: 0.0,
                    built: None,
                },
                NetworkCapexModel::LinearWithFixed {
                    unit_capex,
                    fixed_capex,
                } => CapexCurve::Linear {
                    unit: unit_capex * d,
                    fixed: fixed_capex * d,
                    built,
                },
                NetworkCapexModel::Piecewise { breakpoints, values } => CapexCurve::Piecewise {
                    breakpoints: breakpoints.clone(),
                    values: values.iter().map(|v| v * d).collect(),
                },
            };
            let invest = synthesize_investment(
                model,
                &prefix,
                size,
                &Investment {
                    rule: pair.rule,
                    curve,
                    annualization: economics.annualization(),
                    decommission_cost: economics.decommission_cost * d,
                    opex_fixed_share: economics.opex_fixed,
                },
            )?;
            needs_relaxation |= invest.needs_relaxation;

            pairs.push(PairBlock {
                from: pair.from.clone(),
                to: pair.to.clone(),
                size,
                built,
                capex: invest.capex,
                capex_aux: invest.capex_aux,
                opex_fixed: invest.opex_fixed,
                opex_variable,
                emissions_pos,
                emissions_neg,
            });
        }

        debug!(
            network = %self.spec.name,
            carrier = %self.spec.carrier,
            pairs = pairs.len(),
            arcs = arcs.len(),
            needs_relaxation,
            "synthesized network"
        );
        Ok(Synthesized {
            block: NetworkBlock {
                name: self.spec.name.clone(),
                carrier: self.spec.carrier.clone(),
                pairs,
                arcs,
            },
            needs_relaxation,
        })
    }
}

fn pair_for(spec: &NetworkSpec, arc: &ArcSpec) -> Result<NetworkPair, SpecificationError> {
    let rule = if spec.existing {
        let initial = arc.size_initial.ok_or_else(|| {
            SpecificationError::missing(format!("{} arc {}->{}", spec.entity(), arc.from, arc.to), "size_initial")
        })?;
        if !(initial.is_finite() && initial >= 0.0) {
            return Err(SpecificationError::invalid(spec.entity(), "size_initial", "must be non-negative"));
        }
        if spec.decommission_allowed {
            SizeRule::Decommissionable {
                initial,
                min: spec.size_min.min(initial),
            }
        } else {
            SizeRule::Fixed(initial)
        }
    } else {
        SizeRule::New {
            min: spec.size_min,
            max: spec.size_max,
            integer: false,
        }
    };
    Ok(NetworkPair {
        from: arc.from.clone(),
        to: arc.to.clone(),
        distance: arc.distance,
        rule,
    })
}

fn directed_arcs(
    spec: &NetworkSpec,
    pairs: &[NetworkPair],
) -> Result<(Vec<DirectedArc>, FlowGraph), SpecificationError> {
    let mut graph = FlowGraph::new();
    let mut arcs = Vec::new();
    for (p, pair) in pairs.iter().enumerate() {
        let delivery = spec.delivery_factor(pair.distance);
        let mut ends = vec![(&pair.from, &pair.to)];
        if spec.bidirectional {
            ends.push((&pair.to, &pair.from));
        }
        for (from, to) in ends {
            if !graph.add_arc(from, to, arcs.len()) {
                return Err(SpecificationError::Duplicate {
                    kind: "network arc",
                    name: format!("{}: {}->{}", spec.name, from, to),
                });
            }
            arcs.push(DirectedArc {
                from: from.clone(),
                to: to.clone(),
                pair: p,
                delivery,
            });
        }
    }
    Ok((arcs, graph))
}

/// Variables of one sized connection.
#[derive(Debug, Clone)]
pub struct PairBlock {
    pub from: String,
    pub to: String,
    pub size: Variable,
    pub built: Option<Variable>,
    pub capex: Variable,
    pub capex_aux: Variable,
    pub opex_fixed: Variable,
    pub opex_variable: Vec<Variable>,
    pub emissions_pos: Vec<Variable>,
    pub emissions_neg: Vec<Variable>,
}

/// Flow variables of one directed arc.
#[derive(Debug, Clone)]
pub struct ArcBlock {
    pub from: String,
    pub to: String,
    pub pair: usize,
    pub delivery: f64,
    pub flow: Vec<Variable>,
    /// Consumed at the sending node per unit of flow
    pub consumption: BTreeMap<Carrier, f64>,
}

/// Variables synthesized for one network.
#[derive(Debug, Clone)]
pub struct NetworkBlock {
    pub name: String,
    pub carrier: Carrier,
    pub pairs: Vec<PairBlock>,
    pub arcs: Vec<ArcBlock>,
}

impl NetworkBlock {
    pub fn inbound<'a>(&'a self, node: &'a str) -> impl Iterator<Item = &'a ArcBlock> + 'a {
        self.arcs.iter().filter(move |a| a.to == node)
    }

    pub fn outbound<'a>(&'a self, node: &'a str) -> impl Iterator<Item = &'a ArcBlock> + 'a {
        self.arcs.iter().filter(move |a| a.from == node)
    }
}

/// Solved sizes of one network, for reporting.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NetworkReport {
    pub name: String,
    pub carrier: Carrier,
    pub sizes: Vec<(String, String, f64)>,
}

/// Every arc end must be a node carrying the network's carrier; sending
/// ends must also carry the consumed carriers.
fn check_endpoints(spec: &NetworkSpec, topology: &Topology) -> Result<(), SpecificationError> {
    let entity = spec.entity();
    if !topology.has_carrier(&spec.carrier) {
        return Err(SpecificationError::UnknownCarrier {
            entity,
            carrier: spec.carrier.to_string(),
        });
    }
    for arc in &spec.arcs {
        for (end, sends) in [(&arc.from, true), (&arc.to, spec.bidirectional)] {
            let node = topology.require_node(end, &entity)?;
            topology.require_carrier_at(node, &spec.carrier, &entity)?;
            if sends {
                for carrier in spec.energy_consumption.keys() {
                    topology.require_carrier_at(node, carrier, &entity)?;
                }
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use ehub_core::{ArcSpec, HubError, InvestmentPeriod, NetworkEconomics, Node, TimeHorizon};
    use ehub_ts::{RepresentativeMapping, TimeSeriesStore};
    use std::collections::HashMap;

    fn topology() -> Topology {
        let start = NaiveDate::from_ymd_opt(2030, 1, 1).unwrap().and_hms_opt(0, 0, 0).unwrap();
        let node = |name: &str| Node::new(name).with_carrier("hydrogen").with_carrier("electricity");
        Topology::builder(TimeHorizon::hourly(start, 2))
            .carrier("hydrogen")
            .carrier("electricity")
            .node(node("a"))
            .node(node("b"))
            .node(node("c"))
            .investment_period(InvestmentPeriod::new("2030", 1.0))
            .build()
            .unwrap()
    }

    fn pipeline() -> NetworkSpec {
        NetworkSpec::new("h2", "hydrogen", NetworkEconomics::linear(10.0, 1.0, 0.0))
            .with_arc(ArcSpec::new("a", "b", 100.0))
            .with_size_bounds(0.0, 50.0)
            .with_loss_per_km(0.001)
    }

    fn synthesize(spec: NetworkSpec) -> (HubModel, NetworkBlock, bool) {
        let topo = topology();
        let inst = NetworkInstance::new(spec, &topo).unwrap();
        let series = TimeSeriesStore::for_topology(&topo);
        let mapping = RepresentativeMapping::identity(2);
        let mut model = HubModel::new();
        let out = inst
            .synthesize(&mut model, SynthesisContext::new(&mapping, &series))
            .unwrap();
        (model, out.block, out.needs_relaxation)
    }

    #[test]
    fn test_carried_network_needs_its_endpoints() {
        let inst = NetworkInstance::new(pipeline(), &topology()).unwrap().carry_over(&[30.0]);
        assert!(inst.check_against(&topology()).is_ok());

        let start = NaiveDate::from_ymd_opt(2031, 1, 1).unwrap().and_hms_opt(0, 0, 0).unwrap();
        let shrunk = Topology::builder(TimeHorizon::hourly(start, 2))
            .carrier("hydrogen")
            .node(Node::new("a").with_carrier("hydrogen"))
            .investment_period(InvestmentPeriod::new("2031", 1.0))
            .build()
            .unwrap();
        assert!(matches!(
            inst.check_against(&shrunk),
            Err(SpecificationError::UnknownNode { .. })
        ));
    }

    #[test]
    fn test_flow_bounded_by_size() {
        let (model, block, relax) = synthesize(pipeline());
        assert!(!relax);
        assert_eq!(block.arcs.len(), 1);
        assert!((block.arcs[0].delivery - 0.9).abs() < 1e-12);
        let mut values = HashMap::new();
        values.insert(block.pairs[0].size, 20.0);
        values.insert(block.arcs[0].flow[1], 25.0);
        let c = model.constraint("h2/a-b/flow_max[1]").unwrap();
        assert!((c.relation.violation(&values) - 5.0).abs() < 1e-12);
    }

    #[test]
    fn test_bidirectional_pair_shares_size() {
        let (model, block, relax) = synthesize(pipeline().bidirectional(false));
        assert!(!relax);
        assert_eq!(block.pairs.len(), 1);
        assert_eq!(block.arcs.len(), 2);
        assert_eq!(block.outbound("b").count(), 1);
        assert_eq!(block.inbound("b").count(), 1);
        assert!(model.constraint("h2/b-a/flow_max[0]").is_some());
        assert!(model.variable("h2/b-a/size", 0).is_none());
    }

    #[test]
    fn test_exclusive_direction_adds_disjunctions() {
        let (model, _, relax) = synthesize(pipeline().bidirectional(true));
        assert!(relax);
        assert_eq!(model.pending_count(), 2);
    }

    #[test]
    fn test_fixed_capex_needs_built_indicator() {
        let mut spec = pipeline();
        spec.economics.capex = NetworkCapexModel::LinearWithFixed {
            unit_capex: 10.0,
            fixed_capex: 5.0,
        };
        let (model, block, _) = synthesize(spec);
        let built = block.pairs[0].built.unwrap();
        // unbuilt pipe: size and capex vanish
        let mut values = HashMap::new();
        values.insert(built, 0.0);
        values.insert(block.pairs[0].size, 0.0);
        values.insert(block.pairs[0].capex_aux, 0.0);
        let c = model.constraint("h2/a-b/capex_aux_def").unwrap();
        assert!(c.relation.residual(&values).abs() < 1e-12);
        // built pipe of size 10 over 100 km: (10 * 10 + 5) * 100
        values.insert(built, 1.0);
        values.insert(block.pairs[0].size, 10.0);
        values.insert(block.pairs[0].capex_aux, 10_500.0);
        assert!(c.relation.residual(&values).abs() < 1e-9);
        let gate = model.constraint("h2/a-b/built_max").unwrap();
        assert!(gate.relation.violation(&values) < 1e-12);
    }

    #[test]
    fn test_existing_network_has_fixed_size() {
        let spec = NetworkSpec::new("h2", "hydrogen", NetworkEconomics::linear(10.0, 40.0, 0.0))
            .with_arc(ArcSpec::new("a", "b", 10.0).with_size(30.0))
            .as_existing(false);
        let (model, block, _) = synthesize(spec);
        assert_eq!(
            model.registry().bounds(block.pairs[0].size),
            Some(VarBounds::fixed(30.0))
        );
        assert!(block.pairs[0].built.is_none());
    }

    #[test]
    fn test_emissions_follow_flow() {
        let mut spec = pipeline();
        spec.emission_factor = 0.5;
        let (model, block, _) = synthesize(spec);
        let mut values = HashMap::new();
        values.insert(block.arcs[0].flow[0], 8.0);
        values.insert(block.pairs[0].emissions_pos[0], 4.0);
        let c = model.constraint("h2/a-b/emissions_pos_def[0]").unwrap();
        assert!(c.relation.residual(&values).abs() < 1e-12);
        assert_eq!(
            model.registry().bounds(block.pairs[0].emissions_neg[0]),
            Some(VarBounds::fixed(0.0))
        );
    }

    #[test]
    fn test_duplicate_arc_rejected() {
        let spec = pipeline().with_arc(ArcSpec::new("a", "b", 50.0));
        let err = NetworkInstance::new(spec, &topology()).unwrap_err();
        assert!(matches!(err, HubError::Specification(SpecificationError::Duplicate { .. })));
    }

    #[test]
    fn test_unknown_node_rejected() {
        let spec = pipeline().with_arc(ArcSpec::new("a", "z", 50.0));
        let err = NetworkInstance::new(spec, &topology()).unwrap_err();
        assert!(matches!(err, HubError::Specification(SpecificationError::UnknownNode { .. })));
    }

    #[test]
    fn test_carry_over_fixes_sizes() {
        let inst = NetworkInstance::new(pipeline(), &topology()).unwrap();
        let next = inst.carry_over(&[12.0]);
        assert!(next.spec().existing);
        assert_eq!(next.pairs()[0].rule, SizeRule::Fixed(12.0));
        assert_eq!(next.arcs().len(), 1);
    }

    #[test]
    fn test_diagnose_connected_network() {
        let spec = pipeline().with_arc(ArcSpec::new("c", "a", 10.0));
        let inst = NetworkInstance::new(spec, &topology()).unwrap();
        let mut diagnostics = Diagnostics::new();
        inst.diagnose(&mut diagnostics);
        assert!(!diagnostics.has_warnings());
        assert_eq!(inst.graph().components(), 1);
        assert_eq!(inst.graph().outbound("a"), vec![0]);
    }
}
