//! Objective & Emission Ledger.
//!
//! Collects the cost and emission terms of every block into named scalar
//! expressions. Per-step terms are weighted by the representative-step
//! duration, so a weighted sum over representative steps equals the sum
//! over the full horizon.
//!
//! Emissions are booked per node: technologies at their node, network
//! pairs at their sending node, imports and exports at the exchanging node.
//! A positive import/export emission factor counts towards positive
//! emissions, a negative one towards negative emissions. The node's carbon
//! tax applies to positive and its carbon subsidy to negative emissions.

use std::collections::BTreeMap;

use ehub_core::{HubError, HubResult, ModelConfig, Objective};
use ehub_ts::SeriesKind;
use good_lp::{Expression, IntoAffineExpression, Solution};
use serde::Serialize;

use crate::balance::CarrierBalance;
use crate::model::HubModel;
use crate::network::NetworkBlock;
use crate::synthesis::SynthesisContext;
use crate::technology::TechnologyBlock;

/// Named scalar terms of the objective.
#[derive(Debug, Clone)]
pub struct ObjectiveTerms {
    pub total_capex: Expression,
    pub total_opex: Expression,
    pub import_cost: Expression,
    pub export_revenue: Expression,
    pub carbon_cost: Expression,
    pub emissions_positive: Expression,
    pub emissions_negative: Expression,
    pub net_emissions: Expression,
}

/// Solved values of [`ObjectiveTerms`].
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ObjectiveReport {
    pub total_capex: f64,
    pub total_opex: f64,
    pub import_cost: f64,
    pub export_revenue: f64,
    pub carbon_cost: f64,
    pub total_cost: f64,
    pub emissions_positive: f64,
    pub emissions_negative: f64,
    pub net_emissions: f64,
}

/// Per-step emission expressions of one node.
struct NodeEmissions {
    positive: Vec<Expression>,
    negative: Vec<Expression>,
}

impl NodeEmissions {
    fn new(steps: usize) -> Self {
        Self {
            positive: vec![Expression::from(0.0); steps],
            negative: vec![Expression::from(0.0); steps],
        }
    }
}

impl ObjectiveTerms {
    pub fn assemble(
        ctx: SynthesisContext<'_>,
        technologies: &[TechnologyBlock],
        networks: &[NetworkBlock],
        balances: &[CarrierBalance],
    ) -> Self {
        let steps = ctx.steps();
        let weights = ctx.mapping.weights();

        let mut total_capex = Expression::from(0.0);
        let mut total_opex = Expression::from(0.0);
        let mut nodes: BTreeMap<String, NodeEmissions> = BTreeMap::new();

        for block in technologies {
            total_capex += block.capex;
            total_opex += block.opex_fixed;
            let node = nodes
                .entry(block.node.clone())
                .or_insert_with(|| NodeEmissions::new(steps));
            for r in 0..steps {
                total_opex.add_mul(weights[r], block.opex_variable[r]);
                node.positive[r] += block.emissions_pos[r];
                node.negative[r] += block.emissions_neg[r];
            }
        }

        for network in networks {
            for pair in &network.pairs {
                total_capex += pair.capex;
                total_opex += pair.opex_fixed;
                let node = nodes
                    .entry(pair.from.clone())
                    .or_insert_with(|| NodeEmissions::new(steps));
                for r in 0..steps {
                    total_opex.add_mul(weights[r], pair.opex_variable[r]);
                    node.positive[r] += pair.emissions_pos[r];
                    node.negative[r] += pair.emissions_neg[r];
                }
            }
        }

        let mut import_cost = Expression::from(0.0);
        let mut export_revenue = Expression::from(0.0);
        for balance in balances {
            let node = nodes
                .entry(balance.node.clone())
                .or_insert_with(|| NodeEmissions::new(steps));
            for r in 0..steps {
                import_cost.add_mul(weights[r] * balance.import_price[r], balance.import[r]);
                export_revenue.add_mul(weights[r] * balance.export_price[r], balance.export[r]);
                for (flow, factor) in [
                    (balance.import[r], balance.import_emission_factor[r]),
                    (balance.export[r], balance.export_emission_factor[r]),
                ] {
                    if factor > 0.0 {
                        node.positive[r].add_mul(factor, flow);
                    } else if factor < 0.0 {
                        node.negative[r].add_mul(-factor, flow);
                    }
                }
            }
        }

        let mut carbon_cost = Expression::from(0.0);
        let mut emissions_positive = Expression::from(0.0);
        let mut emissions_negative = Expression::from(0.0);
        for (name, node) in &nodes {
            let tax = ctx.series.node_series(name, SeriesKind::CarbonTax).map(|s| ctx.mapping.reduce(s));
            let subsidy = ctx
                .series
                .node_series(name, SeriesKind::CarbonSubsidy)
                .map(|s| ctx.mapping.reduce(s));
            for r in 0..steps {
                let w = weights[r];
                emissions_positive += node.positive[r].clone() * w;
                emissions_negative += node.negative[r].clone() * w;
                if let Some(tax) = &tax {
                    carbon_cost += node.positive[r].clone() * (w * tax[r]);
                }
                if let Some(subsidy) = &subsidy {
                    carbon_cost -= node.negative[r].clone() * (w * subsidy[r]);
                }
            }
        }
        let net_emissions = emissions_positive.clone() - emissions_negative.clone();

        Self {
            total_capex,
            total_opex,
            import_cost,
            export_revenue,
            carbon_cost,
            emissions_positive,
            emissions_negative,
            net_emissions,
        }
    }

    /// capex + opex + import cost - export revenue + carbon cost
    pub fn total_cost(&self) -> Expression {
        self.total_capex.clone() + self.total_opex.clone() + self.import_cost.clone()
            - self.export_revenue.clone()
            + self.carbon_cost.clone()
    }

    /// Scalar to minimise for `objective`.
    pub fn objective(&self, objective: Objective) -> Expression {
        match objective {
            Objective::Costs | Objective::CostsEmissionLimit => self.total_cost(),
            Objective::EmissionsPositive => self.emissions_positive.clone(),
            Objective::EmissionsNet => self.net_emissions.clone(),
        }
    }

    /// All terms by name, total cost included.
    pub fn named(&self) -> Vec<(&'static str, Expression)> {
        vec![
            ("total_capex", self.total_capex.clone()),
            ("total_opex", self.total_opex.clone()),
            ("import_cost", self.import_cost.clone()),
            ("export_revenue", self.export_revenue.clone()),
            ("carbon_cost", self.carbon_cost.clone()),
            ("total_cost", self.total_cost()),
            ("emissions_positive", self.emissions_positive.clone()),
            ("emissions_negative", self.emissions_negative.clone()),
            ("net_emissions", self.net_emissions.clone()),
        ]
    }

    pub fn evaluate<S: Solution>(&self, values: &S) -> ObjectiveReport {
        let eval = |e: &Expression| e.clone().eval_with(values);
        ObjectiveReport {
            total_capex: eval(&self.total_capex),
            total_opex: eval(&self.total_opex),
            import_cost: eval(&self.import_cost),
            export_revenue: eval(&self.export_revenue),
            carbon_cost: eval(&self.carbon_cost),
            total_cost: eval(&self.total_cost()),
            emissions_positive: eval(&self.emissions_positive),
            emissions_negative: eval(&self.emissions_negative),
            net_emissions: eval(&self.net_emissions),
        }
    }

    /// Add `net_emissions <= emission_limit` when the objective asks for it.
    pub fn apply_limits(&self, model: &mut HubModel, config: &ModelConfig) -> HubResult<()> {
        if config.optimization.objective != Objective::CostsEmissionLimit {
            return Ok(());
        }
        let limit = config.optimization.emission_limit.ok_or_else(|| {
            HubError::Config("objective 'costs_emissionlimit' requires optimization.emission_limit".into())
        })?;
        model.le("emission_limit", self.net_emissions.clone(), limit);
        Ok(())
    }
}
