//! CONV1 / CONV2 / CONV3 conversion technologies.
//!
//! The driving input is the sum of all inputs (CONV1, CONV2) or the main
//! input (CONV3). With a linear fit and no minimum part load the relation
//! is a single equality per step; otherwise every step gets a disjunction
//!
//! ```text
//!   off:        drive = 0,  out = 0
//!   segment j:  b_j * P * size <= drive <= b_{j+1} * P * size
//!               out (= | <=) alpha1_j * drive + alpha2_j * P * size
//! ```
//!
//! with `P` the rated power. CONV1 relates the total output, CONV2 and
//! CONV3 each output carrier. CONV3 outputs may fall below their curve
//! (output shares are free) and secondary inputs follow the main input at
//! fixed ratios.

use ehub_core::Archetype;
use good_lp::Expression;

use crate::fit::{FitTarget, SegmentCoefficients};
use crate::model::{Disjunction, HubModel, LinearRelation, ModelError};

use super::{ArchetypeTerms, Scaffold};

pub(super) fn synthesize(model: &mut HubModel, sc: &Scaffold<'_>) -> Result<ArchetypeTerms, ModelError> {
    let inst = sc.instance;
    let spec = inst.spec();
    let fitted = inst.fitted();
    let archetype = inst.archetype();
    let curve = fitted.curve.as_ref().ok_or_else(|| ModelError::MalformedEncoding {
        name: sc.prefix.clone(),
        reason: "conversion technology without a fitted curve".into(),
    })?;
    let flexible_outputs = archetype == Archetype::Conv3;
    let main = spec.main_input().cloned();

    let mut needs_relaxation = false;
    for r in 0..sc.ctx.steps() {
        let drive: Expression = match (archetype, &main) {
            (Archetype::Conv3, Some(main)) => sc.input(main)[r].into(),
            _ => sc.inputs.values().map(|v| v[r]).sum(),
        };
        model.le(
            format!("{}/input_capacity[{}]", sc.prefix, r),
            drive.clone(),
            sc.rated * sc.size,
        );

        if let (Archetype::Conv3, Some(main)) = (archetype, &main) {
            for (carrier, &ratio) in &fitted.input_ratios {
                model.eq(
                    format!("{}/input_ratio/{}[{}]", sc.prefix, carrier, r),
                    sc.input(carrier)[r],
                    ratio * sc.input(main)[r],
                );
            }
        }

        let targets: Vec<(Expression, &SegmentCoefficients)> = curve
            .coefficients
            .iter()
            .map(|(target, coefficients)| {
                let out: Expression = match target {
                    FitTarget::Total => sc.outputs.values().map(|v| v[r]).sum(),
                    FitTarget::Carrier(carrier) => sc.output(carrier)[r].into(),
                };
                (out, coefficients)
            })
            .collect();

        let relate = |lhs: Expression, rhs: Expression| {
            if flexible_outputs {
                LinearRelation::le(lhs, rhs)
            } else {
                LinearRelation::eq(lhs, rhs)
            }
        };

        if !fitted.needs_disjunction() {
            for (k, (out, c)) in targets.iter().enumerate() {
                let rel = relate(out.clone(), drive.clone() * c.alpha1[0]);
                model.add_relation(format!("{}/performance/{}[{}]", sc.prefix, k, r), rel);
            }
            continue;
        }

        let mut off = vec![LinearRelation::eq(drive.clone(), 0.0)];
        off.extend(targets.iter().map(|(out, _)| LinearRelation::eq(out.clone(), 0.0)));
        let mut disjuncts = vec![off];
        for j in 0..curve.segments() {
            let (lo, hi) = (curve.breakpoints[j], curve.breakpoints[j + 1]);
            let mut segment = vec![
                LinearRelation::ge(drive.clone(), (lo * sc.rated) * sc.size),
                LinearRelation::le(drive.clone(), (hi * sc.rated) * sc.size),
            ];
            for (out, c) in &targets {
                let rhs = drive.clone() * c.alpha1[j] + (c.alpha2[j] * sc.rated) * sc.size;
                segment.push(relate(out.clone(), rhs));
            }
            disjuncts.push(segment);
        }
        model.add_disjunction(Disjunction {
            name: format!("{}/performance[{}]", sc.prefix, r),
            disjuncts,
        })?;
        needs_relaxation = true;
    }

    Ok(ArchetypeTerms {
        level: None,
        needs_relaxation,
    })
}
