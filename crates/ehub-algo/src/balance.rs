//! Node Balance Assembler.
//!
//! One equality per node, carrier and representative step:
//!
//! ```text
//!   Σ tech outputs + import + Σ inbound delivery * flow
//! = Σ tech inputs  + export + Σ outbound flow + Σ network consumption + demand
//! ```
//!
//! Imports and exports are bounded by the node's limit series (absent
//! series mean no exchange). There is no slack.

use ehub_core::{Carrier, Topology};
use ehub_ts::SeriesKind;
use good_lp::{Expression, Variable};

use crate::model::{HubModel, ModelError, VarBounds};
use crate::network::NetworkBlock;
use crate::synthesis::SynthesisContext;
use crate::technology::TechnologyBlock;

/// Exchange variables and representative series of one node and carrier.
#[derive(Debug, Clone)]
pub struct CarrierBalance {
    pub node: String,
    pub carrier: Carrier,
    pub import: Vec<Variable>,
    pub export: Vec<Variable>,
    pub demand: Vec<f64>,
    pub import_price: Vec<f64>,
    pub export_price: Vec<f64>,
    pub import_emission_factor: Vec<f64>,
    pub export_emission_factor: Vec<f64>,
}

/// Add import/export variables and balance equalities for every node.
pub fn assemble_balances(
    model: &mut HubModel,
    topology: &Topology,
    ctx: SynthesisContext<'_>,
    technologies: &[TechnologyBlock],
    networks: &[NetworkBlock],
) -> Result<Vec<CarrierBalance>, ModelError> {
    let steps = ctx.steps();
    let mut balances = Vec::new();

    for node in topology.nodes() {
        for carrier in &node.carriers {
            let reduced = |kind: SeriesKind| -> Vec<f64> {
                ctx.series
                    .carrier_series(&node.name, carrier, kind)
                    .map(|full| ctx.mapping.reduce(full))
                    .unwrap_or_else(|| vec![0.0; steps])
            };
            let import_limit = reduced(SeriesKind::ImportLimit);
            let export_limit = reduced(SeriesKind::ExportLimit);
            let import = model.add_series(&format!("{}/import/{}", node.name, carrier), steps, |r| {
                VarBounds::non_negative(import_limit[r])
            })?;
            let export = model.add_series(&format!("{}/export/{}", node.name, carrier), steps, |r| {
                VarBounds::non_negative(export_limit[r])
            })?;
            let demand = reduced(SeriesKind::Demand);

            for r in 0..steps {
                let mut supply = Expression::from(import[r]);
                let mut use_ = Expression::from(export[r]);
                for block in technologies.iter().filter(|b| b.node == node.name) {
                    if let Some(v) = block.output(carrier, r) {
                        supply += v;
                    }
                    if let Some(v) = block.input(carrier, r) {
                        use_ += v;
                    }
                }
                for network in networks {
                    if &network.carrier == carrier {
                        for arc in network.inbound(&node.name) {
                            supply.add_mul(arc.delivery, arc.flow[r]);
                        }
                    }
                    for arc in network.outbound(&node.name) {
                        if &network.carrier == carrier {
                            use_ += arc.flow[r];
                        }
                        if let Some(&coef) = arc.consumption.get(carrier) {
                            use_.add_mul(coef, arc.flow[r]);
                        }
                    }
                }
                model.eq(
                    format!("{}/balance/{}[{}]", node.name, carrier, r),
                    supply,
                    use_ + demand[r],
                );
            }

            balances.push(CarrierBalance {
                node: node.name.clone(),
                carrier: carrier.clone(),
                import,
                export,
                demand,
                import_price: reduced(SeriesKind::ImportPrice),
                export_price: reduced(SeriesKind::ExportPrice),
                import_emission_factor: reduced(SeriesKind::ImportEmissionFactor),
                export_emission_factor: reduced(SeriesKind::ExportEmissionFactor),
            });
        }
    }
    Ok(balances)
}
