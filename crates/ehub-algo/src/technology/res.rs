//! RES: output limited by the capacity-factor profile.
//!
//! `output[r] <= rated_power * capacity_factor[source(r)] * size`, or `==`
//! when curtailment is disabled.

use crate::model::{HubModel, ModelError};

use super::{ArchetypeTerms, Scaffold};

pub(super) fn synthesize(model: &mut HubModel, sc: &Scaffold<'_>) -> Result<ArchetypeTerms, ModelError> {
    let fitted = sc.instance.fitted();
    for (carrier, vars) in &sc.outputs {
        let Some(profile) = fitted.output_bounds.get(carrier) else {
            continue;
        };
        for (r, &output) in vars.iter().enumerate() {
            let available = sc.rated * profile.at(sc.ctx.source(r)) * sc.size;
            let name = format!("{}/output_max/{}[{}]", sc.prefix, carrier, r);
            if fitted.curtailment {
                model.le(name, output, available);
            } else {
                model.eq(name, output, available);
            }
        }
    }
    Ok(ArchetypeTerms::default())
}

#[cfg(test)]
mod tests {
    use crate::synthesis::SynthesisContext;
    use crate::technology::test_support::topology;
    use crate::technology::TechnologyInstance;
    use crate::model::HubModel;
    use ehub_core::{Carrier, EconomicsSpec, Node, PerformanceConfig, PerformanceSpec, TechnologySpec};
    use ehub_ts::{RepresentativeMapping, SeriesKey, SeriesKind, TimeSeriesStore};
    use std::collections::HashMap;

    fn pv(curtailment: bool) -> (HubModel, crate::technology::TechnologyBlock) {
        let topo = topology(3, Node::new("n").with_new_technology("PV"));
        let series = TimeSeriesStore::for_topology(&topo)
            .with(
                SeriesKey::technology("n", "PV", SeriesKind::CapacityFactor),
                vec![0.0, 0.5, 1.0],
            )
            .unwrap();
        let spec = TechnologySpec::new("n", "PV", "RES", EconomicsSpec::linear(500.0, 25.0, 0.05))
            .with_size_bounds(0.0, 8.0)
            .with_output("electricity")
            .with_emission_factor(0.3)
            .with_performance(PerformanceSpec {
                curtailment,
                ..PerformanceSpec::default()
            });
        let inst = TechnologyInstance::new(spec, &topo, &series, &PerformanceConfig::default()).unwrap();
        let mapping = RepresentativeMapping::identity(3);
        let mut model = HubModel::new();
        let block = inst
            .synthesize(&mut model, SynthesisContext::new(&mapping, &series))
            .unwrap()
            .block;
        (model, block)
    }

    #[test]
    fn test_output_capped_by_capacity_factor_times_size() {
        let (model, block) = pv(true);
        let out = &block.outputs[&Carrier::from("electricity")];
        let mut values = HashMap::new();
        values.insert(block.size, 4.0);
        values.insert(out[1], 2.5);
        let c = model.constraint("n/PV/output_max/electricity[1]").unwrap();
        assert!((c.relation.residual(&values) - 0.5).abs() < 1e-12);
        assert!(c.relation.violation(&values) > 0.0);
        // static bound follows the profile at size_max
        let b = model.registry().bounds(out[2]).unwrap();
        assert!((b.upper - 8.0).abs() < 1e-12);
    }

    #[test]
    fn test_res_emissions_hard_zeroed() {
        let (model, block) = pv(true);
        for r in 0..3 {
            let pos = model.registry().bounds(block.emissions_pos[r]).unwrap();
            let neg = model.registry().bounds(block.emissions_neg[r]).unwrap();
            assert_eq!((pos.lower, pos.upper), (0.0, 0.0));
            assert_eq!((neg.lower, neg.upper), (0.0, 0.0));
        }
        assert!(block.inputs.is_empty());
    }

    #[test]
    fn test_no_curtailment_uses_equality() {
        let (model, _) = pv(false);
        let c = model.constraint("n/PV/output_max/electricity[0]").unwrap();
        assert_eq!(c.relation.sense, crate::model::Sense::Eq);
    }
}
