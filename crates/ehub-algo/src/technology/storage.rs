//! STOR: level recursion replayed at full resolution.
//!
//! ```text
//! E[t] = retention * E[t-1] + eta_c * charge[order[t]] - discharge[order[t]] / eta_d
//!        + inflow[t] - spill[t]
//! E[-1] = initial level (zero unless carried over)
//! E[t] <= P * size
//! ```
//!
//! Charge and discharge live at representative resolution; `order` maps
//! every full step to the representative step whose flows it replays.

use good_lp::Expression;

use crate::model::{HubModel, ModelError, VarBounds};

use super::{ArchetypeTerms, Scaffold};

pub(super) fn synthesize(model: &mut HubModel, sc: &Scaffold<'_>) -> Result<ArchetypeTerms, ModelError> {
    let inst = sc.instance;
    let spec = inst.spec();
    let Some(storage) = inst.fitted().storage.as_ref() else {
        return Err(ModelError::MalformedEncoding {
            name: sc.prefix.clone(),
            reason: "storage technology without fitted storage parameters".into(),
        });
    };
    let (Some(main_in), Some(main_out)) = (spec.main_input(), spec.main_output()) else {
        return Err(ModelError::MalformedEncoding {
            name: sc.prefix.clone(),
            reason: "storage needs a main input and output carrier".into(),
        });
    };
    let charge = sc.input(main_in);
    let discharge = sc.output(main_out);
    let capacity = sc.rated * inst.size_rule().upper();

    for r in 0..sc.ctx.steps() {
        model.le(
            format!("{}/charge_max[{}]", sc.prefix, r),
            charge[r],
            (storage.charge_rate * sc.rated) * sc.size,
        );
        model.le(
            format!("{}/discharge_max[{}]", sc.prefix, r),
            discharge[r],
            (storage.discharge_rate * sc.rated) * sc.size,
        );
        for (carrier, &coef) in &storage.energy_consumption {
            model.eq(
                format!("{}/consumption/{}[{}]", sc.prefix, carrier, r),
                sc.input(carrier)[r],
                coef * charge[r],
            );
        }
    }

    let order = sc.ctx.mapping.order();
    let level = model.add_series(&sc.name("level"), order.len(), |_| VarBounds::non_negative(capacity))?;
    let spill = match &storage.inflow {
        Some(inflow) => Some(model.add_series(&sc.name("spill"), order.len(), |t| {
            VarBounds::non_negative(inflow[t])
        })?),
        None => None,
    };

    for (t, &r) in order.iter().enumerate() {
        let mut rhs = Expression::from(0.0);
        if t == 0 {
            rhs += storage.retention * inst.initial_level();
        } else {
            rhs.add_mul(storage.retention, level[t - 1]);
        }
        rhs.add_mul(storage.charge_efficiency, charge[r]);
        rhs.add_mul(-1.0 / storage.discharge_efficiency, discharge[r]);
        if let (Some(inflow), Some(spill)) = (&storage.inflow, &spill) {
            rhs += inflow[t];
            rhs -= spill[t];
        }
        model.eq(format!("{}/level_def[{}]", sc.prefix, t), level[t], rhs);
        model.le(format!("{}/level_max[{}]", sc.prefix, t), level[t], sc.rated * sc.size);
    }

    Ok(ArchetypeTerms {
        level: Some(level),
        needs_relaxation: false,
    })
}
