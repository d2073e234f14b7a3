//! Handing a relaxed [`HubModel`] to a MILP backend.
//!
//! The default backend is microlp (pure Rust, integer-capable). HiGHS is
//! available behind the `solver-highs` feature and honours the configured
//! MIP gap and time limit.

use std::collections::HashMap;
use std::time::Instant;

use ehub_core::{HubError, HubResult, SolverBackend, SolverConfig};
use good_lp::{Expression, IntoAffineExpression, ResolutionError, Solution, SolutionStatus, SolverModel, Variable};
use tracing::{debug, info, warn};

use crate::model::{HubModel, ModelError, NamedConstraint, VariableRegistry};

/// Terminal status of a solve.
#[derive(Debug, Clone, PartialEq)]
pub enum SolveOutcome<T> {
    Optimal(T),
    Infeasible,
    Unbounded,
}

impl<T> SolveOutcome<T> {
    pub fn map<U, F: FnOnce(T) -> U>(self, f: F) -> SolveOutcome<U> {
        match self {
            SolveOutcome::Optimal(v) => SolveOutcome::Optimal(f(v)),
            SolveOutcome::Infeasible => SolveOutcome::Infeasible,
            SolveOutcome::Unbounded => SolveOutcome::Unbounded,
        }
    }

    pub fn is_optimal(&self) -> bool {
        matches!(self, SolveOutcome::Optimal(_))
    }

    pub fn optimal(self) -> Option<T> {
        match self {
            SolveOutcome::Optimal(v) => Some(v),
            _ => None,
        }
    }
}

/// Variable values of an optimal solve, addressable by name.
#[derive(Debug, Clone)]
pub struct ModelSolution {
    registry: VariableRegistry,
    values: HashMap<Variable, f64>,
    objective: f64,
    solve_time_ms: u128,
}

impl ModelSolution {
    pub fn value(&self, name: &str, index: usize) -> Option<f64> {
        self.registry.get(name, index).map(|v| self.value_of(v))
    }

    pub fn series(&self, name: &str) -> Option<Vec<f64>> {
        self.registry
            .series(name)
            .map(|vars| vars.iter().map(|&v| self.value_of(v)).collect())
    }

    pub fn value_of(&self, var: Variable) -> f64 {
        self.values.get(&var).copied().unwrap_or(0.0)
    }

    pub fn eval(&self, expression: &Expression) -> f64 {
        expression.clone().eval_with(&self.values)
    }

    pub fn objective(&self) -> f64 {
        self.objective
    }

    pub fn solve_time_ms(&self) -> u128 {
        self.solve_time_ms
    }

    pub fn values(&self) -> &HashMap<Variable, f64> {
        &self.values
    }
}

impl Solution for ModelSolution {
    fn status(&self) -> SolutionStatus {
        SolutionStatus::Optimal
    }

    fn value(&self, variable: Variable) -> f64 {
        self.value_of(variable)
    }
}

impl HubModel {
    /// Minimise `objective` subject to every named constraint.
    ///
    /// Fails with [`ModelError::RelaxationPending`] if encodings still await
    /// [`HubModel::relax`].
    pub fn solve(self, objective: &Expression, config: &SolverConfig) -> HubResult<SolveOutcome<ModelSolution>> {
        if self.needs_relaxation() {
            return Err(ModelError::RelaxationPending(self.pending_count()).into());
        }
        let (vars, registry, constraints, _) = self.into_parts();
        info!(
            backend = config.backend.as_str(),
            variables = registry.len(),
            constraints = constraints.len(),
            "solving hub model"
        );
        let start = Instant::now();

        let result = match config.backend {
            SolverBackend::Microlp => {
                if config.time_limit_secs.is_some() {
                    debug!("microlp ignores the configured time limit");
                }
                let problem = vars
                    .minimise(objective.clone())
                    .using(good_lp::solvers::microlp::microlp);
                solve_with(problem, &constraints, &registry)
            }
            SolverBackend::Highs => solve_highs(vars, objective, &constraints, &registry, config)?,
        };
        let solve_time_ms = start.elapsed().as_millis();

        match result {
            Ok(values) => {
                let objective_value = objective.clone().eval_with(&values);
                info!(objective = objective_value, solve_time_ms, "optimal solution found");
                Ok(SolveOutcome::Optimal(ModelSolution {
                    registry,
                    values,
                    objective: objective_value,
                    solve_time_ms,
                }))
            }
            Err(ResolutionError::Infeasible) => {
                warn!(solve_time_ms, "model is infeasible");
                Ok(SolveOutcome::Infeasible)
            }
            Err(ResolutionError::Unbounded) => {
                warn!(solve_time_ms, "model is unbounded");
                Ok(SolveOutcome::Unbounded)
            }
            Err(e) => Err(HubError::Solver(format!("{:?}", e))),
        }
    }
}

fn solve_with<M>(
    mut problem: M,
    constraints: &[NamedConstraint],
    registry: &VariableRegistry,
) -> Result<HashMap<Variable, f64>, ResolutionError>
where
    M: SolverModel<Error = ResolutionError>,
{
    for c in constraints {
        problem.add_constraint(c.relation.to_constraint());
    }
    let solution = problem.solve()?;
    Ok(registry.variables().map(|v| (v, solution.value(v))).collect())
}

#[cfg(feature = "solver-highs")]
fn solve_highs(
    vars: good_lp::ProblemVariables,
    objective: &Expression,
    constraints: &[NamedConstraint],
    registry: &VariableRegistry,
    config: &SolverConfig,
) -> HubResult<Result<HashMap<Variable, f64>, ResolutionError>> {
    use good_lp::WithMipGap;

    let mut problem = vars
        .minimise(objective.clone())
        .using(good_lp::solvers::highs::highs)
        .with_mip_gap(config.mip_gap as f32)
        .map_err(|e| HubError::Config(format!("mip_gap: {}", e)))?;
    if let Some(limit) = config.time_limit_secs {
        problem = problem.set_time_limit(limit);
    }
    Ok(solve_with(problem, constraints, registry))
}

#[cfg(not(feature = "solver-highs"))]
fn solve_highs(
    _vars: good_lp::ProblemVariables,
    _objective: &Expression,
    _constraints: &[NamedConstraint],
    _registry: &VariableRegistry,
    _config: &SolverConfig,
) -> HubResult<Result<HashMap<Variable, f64>, ResolutionError>> {
    Err(HubError::Config(
        "solver backend 'highs' requires the solver-highs feature".into(),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Disjunction, LinearRelation, VarBounds};
    use ehub_core::RelaxationConfig;

    #[test]
    fn test_solve_simple_lp() {
        let mut model = HubModel::new();
        let x = model.add_variable("x", VarBounds::non_negative(10.0)).unwrap();
        let y = model.add_variable("y", VarBounds::non_negative(10.0)).unwrap();
        model.ge("demand", x + y, 5.0);
        let objective: Expression = 2.0 * x + 3.0 * y;

        let solution = model
            .solve(&objective, &SolverConfig::default())
            .unwrap()
            .optimal()
            .expect("optimal");
        assert!((solution.value("x", 0).unwrap() - 5.0).abs() < 1e-6);
        assert!(solution.value("y", 0).unwrap().abs() < 1e-6);
        assert!((solution.objective() - 10.0).abs() < 1e-6);
    }

    #[test]
    fn test_infeasible_reported_as_outcome() {
        let mut model = HubModel::new();
        let x = model.add_variable("x", VarBounds::non_negative(1.0)).unwrap();
        model.ge("impossible", x, 2.0);
        let outcome = model.solve(&Expression::from(x), &SolverConfig::default()).unwrap();
        assert_eq!(outcome.map(|_| ()), SolveOutcome::Infeasible);
    }

    #[test]
    fn test_pending_relaxation_refuses_to_solve() {
        let mut model = HubModel::new();
        let x = model.add_variable("x", VarBounds::non_negative(10.0)).unwrap();
        model
            .add_disjunction(Disjunction {
                name: "d".into(),
                disjuncts: vec![vec![LinearRelation::eq(x, 0.0)], vec![LinearRelation::ge(x, 3.0)]],
            })
            .unwrap();
        let err = model
            .solve(&Expression::from(x), &SolverConfig::default())
            .unwrap_err();
        assert!(matches!(err, HubError::Solver(_)));
    }

    #[test]
    fn test_disjunction_forces_gap() {
        // x in {0} or [3, 10]; minimising |x - 2| via x >= 1 lands on 3
        let mut model = HubModel::new();
        let x = model.add_variable("x", VarBounds::non_negative(10.0)).unwrap();
        model.ge("floor", x, 1.0);
        model
            .add_disjunction(Disjunction {
                name: "d".into(),
                disjuncts: vec![vec![LinearRelation::eq(x, 0.0)], vec![LinearRelation::ge(x, 3.0)]],
            })
            .unwrap();
        model.relax(&RelaxationConfig::default()).unwrap();
        let solution = model
            .solve(&Expression::from(x), &SolverConfig::default())
            .unwrap()
            .optimal()
            .expect("optimal");
        assert!((solution.value("x", 0).unwrap() - 3.0).abs() < 1e-6);
    }

    #[cfg(not(feature = "solver-highs"))]
    #[test]
    fn test_highs_without_feature_is_config_error() {
        let mut model = HubModel::new();
        let x = model.add_variable("x", VarBounds::non_negative(1.0)).unwrap();
        let config = SolverConfig {
            backend: SolverBackend::Highs,
            ..SolverConfig::default()
        };
        assert!(matches!(
            model.solve(&Expression::from(x), &config),
            Err(HubError::Config(_))
        ));
    }
}
