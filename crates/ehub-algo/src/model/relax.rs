//! Relaxation pass: pending encodings to linear constraints with binaries.
//!
//! # Disjunctions (big-M)
//!
//! For disjuncts `D_1 .. D_m` with indicator binaries `y_k`:
//!
//! ```text
//! sum_k y_k = 1
//! e <= M_e (1 - y_k)          for every  e <= 0  in D_k
//! e <= M_e (1 - y_k),
//! -e <= M'_e (1 - y_k)        for every  e == 0  in D_k
//! ```
//!
//! `M_e` is the largest value `e` can take over the variable bounds
//! (interval arithmetic); the configured fallback is used when a term is
//! unbounded.
//!
//! # Piecewise relations (convex combination)
//!
//! For breakpoints `(x_i, v_i)`, `i = 0..n`, weights `lambda_i` and segment
//! binaries `z_j`, `j = 0..n-1`:
//!
//! ```text
//! x = sum_i lambda_i x_i        y = sum_i lambda_i v_i
//! sum_i lambda_i = 1            sum_j z_j = 1
//! lambda_0 <= z_0    lambda_i <= z_{i-1} + z_i    lambda_{n-1} <= z_{n-2}
//! ```
//!
//! At most two adjacent weights are non-zero, which is the SOS2 condition.

use ehub_core::RelaxationConfig;
use good_lp::{Expression, IntoAffineExpression};
use tracing::info;

use super::{
    Disjunction, HubModel, LinearRelation, ModelError, PendingEncoding, PiecewiseRelation, Sense,
    VarBounds, VariableRegistry,
};

/// What the relaxation pass added.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RelaxationReport {
    pub disjunctions: usize,
    pub piecewise: usize,
    pub variables: usize,
    pub constraints: usize,
}

impl HubModel {
    /// Rewrite every pending encoding into linear constraints.
    pub fn relax(&mut self, config: &RelaxationConfig) -> Result<RelaxationReport, ModelError> {
        let pending = std::mem::take(&mut self.pending);
        let before_vars = self.num_variables();
        let before_cons = self.num_constraints();
        let mut report = RelaxationReport::default();

        for encoding in pending {
            match encoding {
                PendingEncoding::Disjunction(d) => {
                    self.relax_disjunction(d, config.big_m)?;
                    report.disjunctions += 1;
                }
                PendingEncoding::Piecewise(p) => {
                    self.relax_piecewise(p)?;
                    report.piecewise += 1;
                }
            }
        }

        report.variables = self.num_variables() - before_vars;
        report.constraints = self.num_constraints() - before_cons;
        info!(
            disjunctions = report.disjunctions,
            piecewise = report.piecewise,
            added_variables = report.variables,
            added_constraints = report.constraints,
            "relaxation pass complete"
        );
        Ok(report)
    }

    fn relax_disjunction(&mut self, disjunction: Disjunction, fallback: f64) -> Result<(), ModelError> {
        let name = disjunction.name;
        let indicators = self.add_series(&format!("{}/active", name), disjunction.disjuncts.len(), |_| {
            VarBounds::binary()
        })?;
        self.eq(
            format!("{}/exactly_one", name),
            indicators.iter().copied().sum::<Expression>(),
            1.0,
        );

        for (k, (relations, &y)) in disjunction.disjuncts.iter().zip(&indicators).enumerate() {
            for (i, relation) in relations.iter().enumerate() {
                let (_, hi) = expression_range(&relation.expression, &self.registry);
                let m_hi = big_m(hi, fallback);
                // e - M (1 - y) <= 0
                self.add_relation(
                    format!("{}/d{}/r{}/upper", name, k, i),
                    LinearRelation::le(relation.expression.clone() + m_hi * y, m_hi),
                );
                if relation.sense == Sense::Eq {
                    let (lo, _) = expression_range(&relation.expression, &self.registry);
                    let m_lo = big_m(-lo, fallback);
                    self.add_relation(
                        format!("{}/d{}/r{}/lower", name, k, i),
                        LinearRelation::le(m_lo * y - relation.expression.clone(), m_lo),
                    );
                }
            }
        }
        Ok(())
    }

    fn relax_piecewise(&mut self, relation: PiecewiseRelation) -> Result<(), ModelError> {
        let PiecewiseRelation {
            name,
            x,
            y,
            breakpoints,
            values,
        } = relation;
        let n = breakpoints.len();
        let lambda = self.add_series(&format!("{}/lambda", name), n, |_| VarBounds::non_negative(1.0))?;
        let segment = self.add_series(&format!("{}/segment", name), n - 1, |_| VarBounds::binary())?;

        let mut x_hull = Expression::from(0.0);
        let mut y_hull = Expression::from(0.0);
        for i in 0..n {
            x_hull.add_mul(breakpoints[i], lambda[i]);
            y_hull.add_mul(values[i], lambda[i]);
        }
        self.eq(format!("{}/x", name), x, x_hull);
        self.eq(format!("{}/y", name), y, y_hull);
        self.eq(
            format!("{}/convexity", name),
            lambda.iter().copied().sum::<Expression>(),
            1.0,
        );
        self.eq(
            format!("{}/one_segment", name),
            segment.iter().copied().sum::<Expression>(),
            1.0,
        );
        for i in 0..n {
            let mut adjacent = Expression::from(0.0);
            if i > 0 {
                adjacent += segment[i - 1];
            }
            if i < n - 1 {
                adjacent += segment[i];
            }
            self.le(format!("{}/adjacency[{}]", name, i), lambda[i], adjacent);
        }
        Ok(())
    }
}

fn big_m(bound: f64, fallback: f64) -> f64 {
    if bound.is_finite() {
        bound.max(0.0)
    } else {
        fallback
    }
}

/// Interval of values `expression` can take over the registered variable bounds.
fn expression_range(expression: &Expression, registry: &VariableRegistry) -> (f64, f64) {
    let constant = expression.constant();
    let mut lo = constant;
    let mut hi = constant;
    for (var, coef) in expression.clone().linear_coefficients() {
        if coef == 0.0 {
            continue;
        }
        let (lb, ub) = registry
            .bounds(var)
            .map_or((f64::NEG_INFINITY, f64::INFINITY), |b| (b.lower, b.upper));
        if coef > 0.0 {
            lo += coef * lb;
            hi += coef * ub;
        } else {
            lo += coef * ub;
            hi += coef * lb;
        }
    }
    (lo, hi)
}

#[cfg(test)]
mod tests {
    use super::*;
    use good_lp::Solution;
    use std::collections::HashMap;

    #[test]
    fn test_expression_range() {
        let mut model = HubModel::new();
        let x = model.add_variable("x", VarBounds::continuous(0.0, 10.0)).unwrap();
        let y = model.add_variable("y", VarBounds::continuous(-2.0, 3.0)).unwrap();
        let e: Expression = 2.0 * x - 4.0 * y + 1.0;
        let (lo, hi) = expression_range(&e, model.registry());
        assert!((lo - (1.0 - 12.0)).abs() < 1e-12);
        assert!((hi - (1.0 + 20.0 + 8.0)).abs() < 1e-12);
    }

    #[test]
    fn test_disjunction_relaxation_shape() {
        let mut model = HubModel::new();
        let x = model.add_variable("x", VarBounds::non_negative(10.0)).unwrap();
        model
            .add_disjunction(Disjunction {
                name: "mode".into(),
                disjuncts: vec![
                    vec![LinearRelation::eq(x, 0.0)],
                    vec![LinearRelation::ge(x, 4.0)],
                ],
            })
            .unwrap();

        let report = model.relax(&RelaxationConfig::default()).unwrap();
        assert!(!model.needs_relaxation());
        assert_eq!(report.disjunctions, 1);
        assert_eq!(report.variables, 2);
        // exactly_one + (upper, lower) for the equality + upper for the inequality
        assert_eq!(report.constraints, 4);

        // x = 2 is excluded: neither disjunct can be active
        let y0 = model.variable("mode/active", 0).unwrap();
        let y1 = model.variable("mode/active", 1).unwrap();
        for (a0, a1) in [(1.0, 0.0), (0.0, 1.0)] {
            let values: HashMap<_, _> = [(x, 2.0), (y0, a0), (y1, a1)].into_iter().collect();
            assert!(model.max_violation(&values) > 1e-6);
        }
        // x = 0 with the first disjunct active, x = 6 with the second
        let values: HashMap<_, _> = [(x, 0.0), (y0, 1.0), (y1, 0.0)].into_iter().collect();
        assert!(model.max_violation(&values) < 1e-9);
        let values: HashMap<_, _> = [(x, 6.0), (y0, 0.0), (y1, 1.0)].into_iter().collect();
        assert!(model.max_violation(&values) < 1e-9);
    }

    #[test]
    fn test_piecewise_relaxation_interpolates() {
        let mut model = HubModel::new();
        let size = model.add_variable("size", VarBounds::non_negative(100.0)).unwrap();
        let capex = model.add_variable("capex", VarBounds::free_non_negative()).unwrap();
        model
            .add_piecewise(PiecewiseRelation {
                name: "capex_curve".into(),
                x: size.into(),
                y: capex.into(),
                breakpoints: vec![0.0, 50.0, 100.0],
                values: vec![0.0, 500.0, 1200.0],
            })
            .unwrap();
        let report = model.relax(&RelaxationConfig::default()).unwrap();
        assert_eq!(report.piecewise, 1);

        // size 75 sits halfway on the second segment
        let lambda: Vec<_> = (0..3).map(|i| model.variable("capex_curve/lambda", i).unwrap()).collect();
        let segment: Vec<_> = (0..2).map(|j| model.variable("capex_curve/segment", j).unwrap()).collect();
        let mut values: HashMap<_, f64> = HashMap::new();
        values.insert(size, 75.0);
        values.insert(capex, 850.0);
        values.insert(lambda[0], 0.0);
        values.insert(lambda[1], 0.5);
        values.insert(lambda[2], 0.5);
        values.insert(segment[0], 0.0);
        values.insert(segment[1], 1.0);
        assert!(model.max_violation(&values) < 1e-9);

        // any other capex value breaks the y-hull equation
        values.insert(capex, 800.0);
        assert!(model.max_violation(&values) > 1.0);
        assert!((values.value(capex) - 800.0).abs() < 1e-12);
    }
}
