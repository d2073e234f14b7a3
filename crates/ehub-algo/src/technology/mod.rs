//! Technology Constraint Synthesizer.
//!
//! Every technology instance becomes a [`TechnologyBlock`] of named
//! variables in the shared [`HubModel`]. Variables are indexed by
//! representative step except the storage/sink level, which runs over the
//! full horizon.
//!
//! ```text
//!  {node}/{tech}/size                  size (fixed, decommissionable or new)
//!  {node}/{tech}/capex, capex_aux      investment (see synthesis.rs)
//!  {node}/{tech}/opex_fixed            share of capex_aux
//!  {node}/{tech}/opex_variable[r]      opex_variable * primary flow
//!  {node}/{tech}/emissions_pos[r]      emission_factor * main input (factor >= 0)
//!  {node}/{tech}/emissions_neg[r]      -emission_factor * main input (factor < 0)
//!  {node}/{tech}/input/{carrier}[r]
//!  {node}/{tech}/output/{carrier}[r]
//!  {node}/{tech}/level[t]              STOR / SINK only
//! ```
//!
//! The archetype-specific part lives in one module per family; dispatch is a
//! `match` over [`Archetype`].

mod conv;
mod instance;
mod res;
mod sink;
mod storage;

pub use instance::TechnologyInstance;

use std::collections::BTreeMap;

use ehub_core::{Archetype, Carrier, CapexModel, HubResult};
use good_lp::Variable;
use serde::Serialize;
use tracing::debug;

use crate::fit::CoefficientSeries;
use crate::model::{HubModel, ModelError, VarBounds};
use crate::synthesis::{synthesize_investment, CapexCurve, Investment, SynthesisContext, Synthesized};

/// Variables synthesized for one technology instance.
#[derive(Debug, Clone)]
pub struct TechnologyBlock {
    pub node: String,
    pub name: String,
    pub archetype: Archetype,
    pub size: Variable,
    pub capex: Variable,
    pub capex_aux: Variable,
    pub opex_fixed: Variable,
    pub opex_variable: Vec<Variable>,
    pub emissions_pos: Vec<Variable>,
    pub emissions_neg: Vec<Variable>,
    pub inputs: BTreeMap<Carrier, Vec<Variable>>,
    pub outputs: BTreeMap<Carrier, Vec<Variable>>,
    /// Full-resolution level (STOR, SINK)
    pub level: Option<Vec<Variable>>,
}

impl TechnologyBlock {
    pub fn input(&self, carrier: &Carrier, r: usize) -> Option<Variable> {
        self.inputs.get(carrier).and_then(|v| v.get(r)).copied()
    }

    pub fn output(&self, carrier: &Carrier, r: usize) -> Option<Variable> {
        self.outputs.get(carrier).and_then(|v| v.get(r)).copied()
    }
}

/// Summary of a solved block, for reporting.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TechnologyReport {
    pub node: String,
    pub name: String,
    pub archetype: Archetype,
    pub size: f64,
    pub capex: f64,
    pub final_level: Option<f64>,
}

/// Shared state handed to the archetype modules.
struct Scaffold<'a> {
    instance: &'a TechnologyInstance,
    ctx: SynthesisContext<'a>,
    prefix: String,
    size: Variable,
    rated: f64,
    inputs: BTreeMap<Carrier, Vec<Variable>>,
    outputs: BTreeMap<Carrier, Vec<Variable>>,
}

impl Scaffold<'_> {
    fn name(&self, suffix: &str) -> String {
        format!("{}/{}", self.prefix, suffix)
    }

    fn input(&self, carrier: &Carrier) -> &[Variable] {
        self.inputs.get(carrier).map(Vec::as_slice).unwrap_or(&[])
    }

    fn output(&self, carrier: &Carrier) -> &[Variable] {
        self.outputs.get(carrier).map(Vec::as_slice).unwrap_or(&[])
    }
}

/// What an archetype module adds on top of the common scaffold.
#[derive(Default)]
struct ArchetypeTerms {
    level: Option<Vec<Variable>>,
    needs_relaxation: bool,
}

impl TechnologyInstance {
    /// Emit all variables and constraints of this instance.
    pub fn synthesize(
        &self,
        model: &mut HubModel,
        ctx: SynthesisContext<'_>,
    ) -> HubResult<Synthesized<TechnologyBlock>> {
        Ok(self.synthesize_block(model, ctx)?)
    }

    fn synthesize_block(
        &self,
        model: &mut HubModel,
        ctx: SynthesisContext<'_>,
    ) -> Result<Synthesized<TechnologyBlock>, ModelError> {
        let spec = self.spec();
        let fitted = self.fitted();
        let rule = self.size_rule();
        let prefix = self.prefix();
        let rated = spec.rated_power;
        let steps = ctx.steps();

        let size = model.add_variable(&format!("{}/size", prefix), rule.bounds())?;
        let flow_bound = |coef: &CoefficientSeries, r: usize| {
            let value = coef.at(ctx.source(r)).max(0.0);
            if fitted.bounds_scale_with_size {
                value * rated * rule.upper()
            } else {
                value
            }
        };

        let mut inputs = BTreeMap::new();
        for carrier in &spec.input_carriers {
            let coef = fitted
                .input_bounds
                .get(carrier)
                .cloned()
                .unwrap_or(CoefficientSeries::Constant(1.0));
            let vars = model.add_series(&format!("{}/input/{}", prefix, carrier), steps, |r| {
                VarBounds::non_negative(flow_bound(&coef, r))
            })?;
            inputs.insert(carrier.clone(), vars);
        }
        let mut outputs = BTreeMap::new();
        for carrier in &spec.output_carriers {
            let coef = fitted
                .output_bounds
                .get(carrier)
                .cloned()
                .unwrap_or(CoefficientSeries::Constant(1.0));
            let vars = model.add_series(&format!("{}/output/{}", prefix, carrier), steps, |r| {
                VarBounds::non_negative(flow_bound(&coef, r))
            })?;
            outputs.insert(carrier.clone(), vars);
        }

        let scaffold = Scaffold {
            instance: self,
            ctx,
            prefix: prefix.clone(),
            size,
            rated,
            inputs,
            outputs,
        };
        let terms = match self.archetype() {
            Archetype::Res => res::synthesize(model, &scaffold)?,
            Archetype::Conv1 | Archetype::Conv2 | Archetype::Conv3 => conv::synthesize(model, &scaffold)?,
            Archetype::Stor => storage::synthesize(model, &scaffold)?,
            Archetype::Sink => sink::synthesize(model, &scaffold)?,
        };

        let (emissions_pos, emissions_neg) = synthesize_emissions(model, &scaffold)?;
        let opex_variable = synthesize_opex(model, &scaffold)?;

        let curve = match &spec.economics.capex {
            CapexModel::Linear { unit_capex } => CapexCurve::Linear {
                unit: *unit_capex,
                fixed: 0.0,
                built: None,
            },
            CapexModel::Piecewise { breakpoints, values } => CapexCurve::Piecewise {
                breakpoints: breakpoints.clone(),
                values: values.clone(),
            },
        };
        let investment = Investment {
            rule,
            curve,
            annualization: spec.economics.annualization(),
            decommission_cost: spec.economics.decommission_cost,
            opex_fixed_share: spec.economics.opex_fixed,
        };
        let invest = synthesize_investment(model, &prefix, size, &investment)?;

        let needs_relaxation = terms.needs_relaxation || invest.needs_relaxation;
        debug!(
            technology = %prefix,
            archetype = %self.archetype(),
            steps,
            needs_relaxation,
            "synthesized technology"
        );

        let Scaffold { inputs, outputs, .. } = scaffold;
        Ok(Synthesized {
            block: TechnologyBlock {
                node: spec.node.clone(),
                name: spec.name.clone(),
                archetype: self.archetype(),
                size,
                capex: invest.capex,
                capex_aux: invest.capex_aux,
                opex_fixed: invest.opex_fixed,
                opex_variable,
                emissions_pos,
                emissions_neg,
                inputs,
                outputs,
                level: terms.level,
            },
            needs_relaxation,
        })
    }
}

/// Positive emissions for factors >= 0, negative emissions (credits) for
/// factors < 0; the other side is fixed at zero. RES has no input and both
/// sides are fixed at zero.
fn synthesize_emissions(
    model: &mut HubModel,
    sc: &Scaffold<'_>,
) -> Result<(Vec<Variable>, Vec<Variable>), ModelError> {
    let spec = sc.instance.spec();
    let steps = sc.ctx.steps();
    let factor = spec.emission_factor;
    let main = match (sc.instance.archetype(), spec.main_input()) {
        (Archetype::Res, _) | (_, None) => None,
        (_, Some(carrier)) => Some(sc.input(carrier).to_vec()),
    };
    let positive = main.is_some() && factor > 0.0;
    let negative = main.is_some() && factor < 0.0;

    let bounds = |active: bool| if active { VarBounds::free_non_negative() } else { VarBounds::fixed(0.0) };
    let pos = model.add_series(&sc.name("emissions_pos"), steps, |_| bounds(positive))?;
    let neg = model.add_series(&sc.name("emissions_neg"), steps, |_| bounds(negative))?;

    if let Some(input) = main {
        for r in 0..steps {
            if positive {
                model.eq(format!("{}/emissions_pos_def[{}]", sc.prefix, r), pos[r], factor * input[r]);
            }
            if negative {
                model.eq(format!("{}/emissions_neg_def[{}]", sc.prefix, r), neg[r], -factor * input[r]);
            }
        }
    }
    Ok((pos, neg))
}

/// Variable opex on the primary flow: main output, or main input for sinks.
fn synthesize_opex(model: &mut HubModel, sc: &Scaffold<'_>) -> Result<Vec<Variable>, ModelError> {
    let spec = sc.instance.spec();
    let steps = sc.ctx.steps();
    let cost = spec.economics.opex_variable;
    let primary = match spec.main_output() {
        Some(carrier) => sc.output(carrier).to_vec(),
        None => spec.main_input().map(|c| sc.input(c).to_vec()).unwrap_or_default(),
    };
    let opex = model.add_series(&sc.name("opex_variable"), steps, |_| {
        VarBounds::continuous(f64::NEG_INFINITY, f64::INFINITY)
    })?;
    for r in 0..steps {
        match primary.get(r) {
            Some(&flow) => model.eq(format!("{}/opex_variable_def[{}]", sc.prefix, r), opex[r], cost * flow),
            None => model.eq(format!("{}/opex_variable_def[{}]", sc.prefix, r), opex[r], 0.0),
        }
    }
    Ok(opex)
}

#[cfg(test)]
pub(crate) mod test_support {
    use chrono::NaiveDate;
    use ehub_core::{InvestmentPeriod, Node, TimeHorizon, Topology};

    /// Single node "n" with electricity, heat, gas, hydrogen and CO2.
    pub fn topology(steps: usize, node: Node) -> Topology {
        let start = NaiveDate::from_ymd_opt(2030, 1, 1).unwrap().and_hms_opt(0, 0, 0).unwrap();
        Topology::builder(TimeHorizon::hourly(start, steps))
            .carrier("electricity")
            .carrier("heat")
            .carrier("gas")
            .carrier("hydrogen")
            .carrier("CO2")
            .node(
                node.with_carrier("electricity")
                    .with_carrier("heat")
                    .with_carrier("gas")
                    .with_carrier("hydrogen")
                    .with_carrier("CO2"),
            )
            .investment_period(InvestmentPeriod::new("2030", 1.0))
            .build()
            .unwrap()
    }
}
