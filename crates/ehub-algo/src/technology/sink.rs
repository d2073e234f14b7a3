//! SINK: permanent injection with a cumulative level.
//!
//! ```text
//! E[t] = E[t-1] + inject[order[t]]      E[-1] = carried-over level
//! E[t] <= P * size
//! inject[r] <= injection_rate_max        (independent of size)
//! input_k[r] = c_k * inject[r] (+ compression[r] on the compression carrier)
//! ```
//!
//! With a compression table and no fixed operating point, each step picks
//! one pressure-ratio segment `j`: `pr_j <= pr[r] <= pr_{j+1}` and
//! `compression[r] = eta_j * inject[r]`. The efficiencies are indexed by
//! segment only.

use good_lp::{Expression, Variable};

use crate::fit::CompressionFit;
use crate::model::{Disjunction, HubModel, LinearRelation, ModelError, VarBounds};

use super::{ArchetypeTerms, Scaffold};

pub(super) fn synthesize(model: &mut HubModel, sc: &Scaffold<'_>) -> Result<ArchetypeTerms, ModelError> {
    let inst = sc.instance;
    let Some(sink) = inst.fitted().sink.as_ref() else {
        return Err(ModelError::MalformedEncoding {
            name: sc.prefix.clone(),
            reason: "sink technology without fitted sink parameters".into(),
        });
    };
    let Some(main) = inst.spec().main_input() else {
        return Err(ModelError::MalformedEncoding {
            name: sc.prefix.clone(),
            reason: "sink needs a main input carrier".into(),
        });
    };
    let inject = sc.input(main).to_vec();
    let steps = sc.ctx.steps();

    let compression = match &sink.compression {
        Some(table) => Some(synthesize_compression(model, sc, table, &inject)?),
        None => None,
    };

    for r in 0..steps {
        model.le(
            format!("{}/injection_max[{}]", sc.prefix, r),
            inject[r],
            sink.injection_rate_max,
        );
        for (carrier, &coef) in &sink.energy_consumption {
            let mut rhs = Expression::from(0.0);
            rhs.add_mul(coef, inject[r]);
            if let Some((table, energy)) = &compression {
                if &table.carrier == carrier {
                    rhs += energy[r];
                }
            }
            model.eq(
                format!("{}/consumption/{}[{}]", sc.prefix, carrier, r),
                sc.input(carrier)[r],
                rhs,
            );
        }
        if let Some((table, energy)) = &compression {
            if !sink.energy_consumption.contains_key(&table.carrier) {
                model.eq(
                    format!("{}/consumption/{}[{}]", sc.prefix, table.carrier, r),
                    sc.input(&table.carrier)[r],
                    energy[r],
                );
            }
        }
    }

    let order = sc.ctx.mapping.order();
    let capacity = sc.rated * inst.size_rule().upper();
    let level = model.add_series(&sc.name("level"), order.len(), |_| VarBounds::non_negative(capacity))?;
    for (t, &r) in order.iter().enumerate() {
        let mut rhs = Expression::from(inject[r]);
        if t == 0 {
            rhs += inst.initial_level();
        } else {
            rhs += level[t - 1];
        }
        model.eq(format!("{}/level_def[{}]", sc.prefix, t), level[t], rhs);
        model.le(format!("{}/level_max[{}]", sc.prefix, t), level[t], sc.rated * sc.size);
    }

    let needs_relaxation = sink
        .compression
        .as_ref()
        .is_some_and(|c| c.pressure_ratio.is_none() && c.segments() > 1);
    Ok(ArchetypeTerms {
        level: Some(level),
        needs_relaxation,
    })
}

/// Compression energy per step. A fixed operating pressure ratio selects its
/// segment up front; otherwise the pressure ratio is a decision per step.
fn synthesize_compression<'t>(
    model: &mut HubModel,
    sc: &Scaffold<'_>,
    table: &'t CompressionFit,
    inject: &[Variable],
) -> Result<(&'t CompressionFit, Vec<Variable>), ModelError> {
    let steps = sc.ctx.steps();
    let worst = table.efficiencies.iter().copied().fold(0.0, f64::max);
    let cap = sc.instance.fitted().sink.as_ref().map_or(0.0, |s| s.injection_rate_max);
    let energy = model.add_series(&sc.name("compression_energy"), steps, |_| {
        VarBounds::non_negative(worst * cap)
    })?;
    let ratios = &table.pressure_ratios;

    if let Some(p) = table.pressure_ratio {
        let j = ratios
            .windows(2)
            .position(|w| p >= w[0] && p <= w[1])
            .ok_or_else(|| ModelError::MalformedEncoding {
                name: sc.name("compression"),
                reason: format!("operating pressure ratio {} outside the table", p),
            })?;
        for r in 0..steps {
            model.eq(
                format!("{}/compression[{}]", sc.prefix, r),
                energy[r],
                table.efficiencies[j] * inject[r],
            );
        }
        return Ok((table, energy));
    }

    let (lo, hi) = (ratios[0], ratios[ratios.len() - 1]);
    let pressure = model.add_series(&sc.name("pressure_ratio"), steps, |_| VarBounds::continuous(lo, hi))?;
    if table.segments() == 1 {
        for r in 0..steps {
            model.eq(
                format!("{}/compression[{}]", sc.prefix, r),
                energy[r],
                table.efficiencies[0] * inject[r],
            );
        }
        return Ok((table, energy));
    }
    for r in 0..steps {
        let disjuncts = (0..table.segments())
            .map(|j| {
                vec![
                    LinearRelation::ge(pressure[r], ratios[j]),
                    LinearRelation::le(pressure[r], ratios[j + 1]),
                    LinearRelation::eq(energy[r], table.efficiencies[j] * inject[r]),
                ]
            })
            .collect();
        model.add_disjunction(Disjunction {
            name: format!("{}/compression[{}]", sc.prefix, r),
            disjuncts,
        })?;
    }
    Ok((table, energy))
}
