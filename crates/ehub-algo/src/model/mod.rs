//! Append-only MILP model container.
//!
//! [`HubModel`] wraps good_lp's `ProblemVariables` and keeps everything the
//! synthesizers emit addressable by name:
//!
//! - variables live in a [`VariableRegistry`] keyed by name, each name holding
//!   one variable (scalars) or one per time step (series);
//! - constraints are [`NamedConstraint`]s stored as `expression (= | <=) 0`,
//!   so residuals can be evaluated against any assignment;
//! - piecewise relations and disjunctions are kept as pending encodings until
//!   [`HubModel::relax`] rewrites them into linear constraints with binaries.
//!
//! ```text
//!  synthesizers ──► add_variable / add_series / eq / le / add_disjunction / add_piecewise
//!                                   │
//!                              relax(big-M)   (only when needs_relaxation())
//!                                   │
//!                               solve(objective)
//! ```

mod relax;

pub use relax::RelaxationReport;

use std::collections::{BTreeMap, HashMap};

use ehub_core::{HubError, SpecificationError};
use good_lp::{
    constraint, variable, Constraint, Expression, IntoAffineExpression, ProblemVariables, Solution, Variable,
};
use thiserror::Error;

/// Failures raised by the model container itself.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ModelError {
    #[error("variable '{0}' is already defined")]
    DuplicateVariable(String),

    #[error("invalid bounds [{lower}, {upper}] for variable '{name}'")]
    InvalidBounds { name: String, lower: f64, upper: f64 },

    #[error("encoding '{name}' is malformed: {reason}")]
    MalformedEncoding { name: String, reason: String },

    #[error("{0} piecewise/disjunctive encodings are still pending; run the relaxation pass before solving")]
    RelaxationPending(usize),
}

impl From<ModelError> for HubError {
    fn from(err: ModelError) -> Self {
        match err {
            ModelError::RelaxationPending(_) => HubError::Solver(err.to_string()),
            ModelError::DuplicateVariable(name) => SpecificationError::Duplicate { kind: "variable", name }.into(),
            ModelError::InvalidBounds { ref name, .. } => {
                SpecificationError::invalid(name.clone(), "bounds", err.to_string()).into()
            }
            ModelError::MalformedEncoding { name, reason } => {
                SpecificationError::invalid(name, "encoding", reason).into()
            }
        }
    }
}

/// Variable domain.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Domain {
    Continuous,
    Integer,
    Binary,
}

/// Bounds and domain of one variable.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VarBounds {
    pub lower: f64,
    pub upper: f64,
    pub domain: Domain,
}

impl VarBounds {
    pub fn continuous(lower: f64, upper: f64) -> Self {
        Self {
            lower,
            upper,
            domain: Domain::Continuous,
        }
    }

    /// `[0, upper]`
    pub fn non_negative(upper: f64) -> Self {
        Self::continuous(0.0, upper)
    }

    /// `[0, +inf)`
    pub fn free_non_negative() -> Self {
        Self::continuous(0.0, f64::INFINITY)
    }

    pub fn fixed(value: f64) -> Self {
        Self::continuous(value, value)
    }

    pub fn integer(lower: f64, upper: f64) -> Self {
        Self {
            lower,
            upper,
            domain: Domain::Integer,
        }
    }

    pub fn binary() -> Self {
        Self {
            lower: 0.0,
            upper: 1.0,
            domain: Domain::Binary,
        }
    }

    fn check(&self, name: &str) -> Result<(), ModelError> {
        if self.lower.is_nan() || self.upper.is_nan() || self.lower > self.upper + 1e-9 {
            return Err(ModelError::InvalidBounds {
                name: name.to_string(),
                lower: self.lower,
                upper: self.upper,
            });
        }
        Ok(())
    }
}

/// Name/index lookup for every variable in a model.
#[derive(Debug, Clone, Default)]
pub struct VariableRegistry {
    by_name: BTreeMap<String, Vec<Variable>>,
    bounds: HashMap<Variable, VarBounds>,
}

impl VariableRegistry {
    /// Variable `name[index]`; scalars use index 0.
    pub fn get(&self, name: &str, index: usize) -> Option<Variable> {
        self.by_name.get(name).and_then(|v| v.get(index)).copied()
    }

    pub fn series(&self, name: &str) -> Option<&[Variable]> {
        self.by_name.get(name).map(Vec::as_slice)
    }

    pub fn bounds(&self, var: Variable) -> Option<VarBounds> {
        self.bounds.get(&var).copied()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.by_name.keys().map(String::as_str)
    }

    pub fn variables(&self) -> impl Iterator<Item = Variable> + '_ {
        self.by_name.values().flatten().copied()
    }

    pub fn len(&self) -> usize {
        self.bounds.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bounds.is_empty()
    }
}

/// Relation between an expression and zero.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Sense {
    Eq,
    Le,
}

/// `expression == 0` or `expression <= 0`.
#[derive(Debug, Clone)]
pub struct LinearRelation {
    pub expression: Expression,
    pub sense: Sense,
}

impl LinearRelation {
    pub fn eq(lhs: impl Into<Expression>, rhs: impl Into<Expression>) -> Self {
        Self {
            expression: lhs.into() - rhs.into(),
            sense: Sense::Eq,
        }
    }

    pub fn le(lhs: impl Into<Expression>, rhs: impl Into<Expression>) -> Self {
        Self {
            expression: lhs.into() - rhs.into(),
            sense: Sense::Le,
        }
    }

    pub fn ge(lhs: impl Into<Expression>, rhs: impl Into<Expression>) -> Self {
        Self::le(rhs, lhs)
    }

    /// Signed residual; feasible when `== 0` (Eq) or `<= 0` (Le).
    pub fn residual<S: Solution>(&self, values: &S) -> f64 {
        self.expression.clone().eval_with(values)
    }

    /// Amount by which the relation is violated.
    pub fn violation<S: Solution>(&self, values: &S) -> f64 {
        let r = self.residual(values);
        match self.sense {
            Sense::Eq => r.abs(),
            Sense::Le => r.max(0.0),
        }
    }

    pub(crate) fn to_constraint(&self) -> Constraint {
        match self.sense {
            Sense::Eq => constraint!(self.expression.clone() == 0.0),
            Sense::Le => constraint!(self.expression.clone() <= 0.0),
        }
    }
}

/// A linear relation with a unique name.
#[derive(Debug, Clone)]
pub struct NamedConstraint {
    pub name: String,
    pub relation: LinearRelation,
}

/// "Exactly one of these groups of relations holds."
#[derive(Debug, Clone)]
pub struct Disjunction {
    pub name: String,
    pub disjuncts: Vec<Vec<LinearRelation>>,
}

/// `y = f(x)` for a piecewise-linear `f` given by breakpoints.
#[derive(Debug, Clone)]
pub struct PiecewiseRelation {
    pub name: String,
    pub x: Expression,
    pub y: Expression,
    pub breakpoints: Vec<f64>,
    pub values: Vec<f64>,
}

#[derive(Debug, Clone)]
enum PendingEncoding {
    Disjunction(Disjunction),
    Piecewise(PiecewiseRelation),
}

/// The model under construction.
pub struct HubModel {
    vars: ProblemVariables,
    registry: VariableRegistry,
    constraints: Vec<NamedConstraint>,
    pending: Vec<PendingEncoding>,
}

impl Default for HubModel {
    fn default() -> Self {
        Self::new()
    }
}

impl HubModel {
    pub fn new() -> Self {
        Self {
            vars: ProblemVariables::new(),
            registry: VariableRegistry::default(),
            constraints: Vec::new(),
            pending: Vec::new(),
        }
    }

    fn create(&mut self, label: String, bounds: VarBounds) -> Result<Variable, ModelError> {
        bounds.check(&label)?;
        let def = match bounds.domain {
            Domain::Binary => variable().binary(),
            Domain::Integer => variable().integer().min(bounds.lower).max(bounds.upper),
            Domain::Continuous => variable().min(bounds.lower).max(bounds.upper),
        };
        let var = self.vars.add(def.name(label));
        self.registry.bounds.insert(var, bounds);
        Ok(var)
    }

    /// Add the scalar variable `name`.
    pub fn add_variable(&mut self, name: &str, bounds: VarBounds) -> Result<Variable, ModelError> {
        if self.registry.by_name.contains_key(name) {
            return Err(ModelError::DuplicateVariable(name.to_string()));
        }
        let var = self.create(name.to_string(), bounds)?;
        self.registry.by_name.insert(name.to_string(), vec![var]);
        Ok(var)
    }

    /// Add `len` variables `name[0..len)` with per-index bounds.
    pub fn add_series<F>(&mut self, name: &str, len: usize, bounds: F) -> Result<Vec<Variable>, ModelError>
    where
        F: Fn(usize) -> VarBounds,
    {
        if self.registry.by_name.contains_key(name) {
            return Err(ModelError::DuplicateVariable(name.to_string()));
        }
        let vars = (0..len)
            .map(|t| self.create(format!("{}[{}]", name, t), bounds(t)))
            .collect::<Result<Vec<_>, _>>()?;
        self.registry.by_name.insert(name.to_string(), vars.clone());
        Ok(vars)
    }

    pub fn add_relation(&mut self, name: impl Into<String>, relation: LinearRelation) {
        self.constraints.push(NamedConstraint {
            name: name.into(),
            relation,
        });
    }

    /// `lhs == rhs`
    pub fn eq(&mut self, name: impl Into<String>, lhs: impl Into<Expression>, rhs: impl Into<Expression>) {
        self.add_relation(name, LinearRelation::eq(lhs, rhs));
    }

    /// `lhs <= rhs`
    pub fn le(&mut self, name: impl Into<String>, lhs: impl Into<Expression>, rhs: impl Into<Expression>) {
        self.add_relation(name, LinearRelation::le(lhs, rhs));
    }

    /// `lhs >= rhs`
    pub fn ge(&mut self, name: impl Into<String>, lhs: impl Into<Expression>, rhs: impl Into<Expression>) {
        self.add_relation(name, LinearRelation::ge(lhs, rhs));
    }

    /// Record a disjunction for the relaxation pass.
    pub fn add_disjunction(&mut self, disjunction: Disjunction) -> Result<(), ModelError> {
        if disjunction.disjuncts.len() < 2 {
            return Err(ModelError::MalformedEncoding {
                name: disjunction.name,
                reason: "a disjunction needs at least two disjuncts".into(),
            });
        }
        self.pending.push(PendingEncoding::Disjunction(disjunction));
        Ok(())
    }

    /// Record a piecewise relation for the relaxation pass.
    pub fn add_piecewise(&mut self, relation: PiecewiseRelation) -> Result<(), ModelError> {
        let n = relation.breakpoints.len();
        if n < 2 || relation.values.len() != n {
            return Err(ModelError::MalformedEncoding {
                name: relation.name,
                reason: format!(
                    "{} breakpoints and {} values",
                    n,
                    relation.values.len()
                ),
            });
        }
        if relation.breakpoints.windows(2).any(|w| w[1] <= w[0]) {
            return Err(ModelError::MalformedEncoding {
                name: relation.name,
                reason: "breakpoints must be strictly increasing".into(),
            });
        }
        self.pending.push(PendingEncoding::Piecewise(relation));
        Ok(())
    }

    /// Whether piecewise or disjunctive encodings still await [`HubModel::relax`].
    pub fn needs_relaxation(&self) -> bool {
        !self.pending.is_empty()
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    pub fn variable(&self, name: &str, index: usize) -> Option<Variable> {
        self.registry.get(name, index)
    }

    pub fn registry(&self) -> &VariableRegistry {
        &self.registry
    }

    pub fn constraints(&self) -> &[NamedConstraint] {
        &self.constraints
    }

    pub fn constraint(&self, name: &str) -> Option<&NamedConstraint> {
        self.constraints.iter().find(|c| c.name == name)
    }

    pub fn num_variables(&self) -> usize {
        self.registry.len()
    }

    pub fn num_constraints(&self) -> usize {
        self.constraints.len()
    }

    /// Largest violation of any named constraint under `values`.
    pub fn max_violation<S: Solution>(&self, values: &S) -> f64 {
        self.constraints
            .iter()
            .map(|c| c.relation.violation(values))
            .fold(0.0, f64::max)
    }

    pub(crate) fn into_parts(self) -> (ProblemVariables, VariableRegistry, Vec<NamedConstraint>, usize) {
        (self.vars, self.registry, self.constraints, self.pending.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_series_lookup_by_name_and_index() {
        let mut model = HubModel::new();
        let flows = model
            .add_series("n/T/output/heat", 3, |_| VarBounds::non_negative(10.0))
            .unwrap();
        assert_eq!(model.variable("n/T/output/heat", 2), Some(flows[2]));
        assert_eq!(model.variable("n/T/output/heat", 3), None);
        assert_eq!(model.num_variables(), 3);
        assert_eq!(
            model.registry().bounds(flows[0]),
            Some(VarBounds::non_negative(10.0))
        );
    }

    #[test]
    fn test_duplicate_names_rejected() {
        let mut model = HubModel::new();
        model.add_variable("size", VarBounds::non_negative(5.0)).unwrap();
        assert_eq!(
            model.add_variable("size", VarBounds::non_negative(5.0)),
            Err(ModelError::DuplicateVariable("size".into()))
        );
    }

    #[test]
    fn test_invalid_bounds_rejected() {
        let mut model = HubModel::new();
        assert!(matches!(
            model.add_variable("x", VarBounds::continuous(2.0, 1.0)),
            Err(ModelError::InvalidBounds { .. })
        ));
    }

    #[test]
    fn test_residuals() {
        let mut model = HubModel::new();
        let x = model.add_variable("x", VarBounds::free_non_negative()).unwrap();
        let y = model.add_variable("y", VarBounds::free_non_negative()).unwrap();
        model.eq("balance", x + y, 10.0);
        model.le("cap", x, 4.0);

        let mut values = HashMap::new();
        values.insert(x, 6.0);
        values.insert(y, 4.0);
        let balance = model.constraint("balance").unwrap();
        assert!(balance.relation.residual(&values).abs() < 1e-12);
        assert!((model.max_violation(&values) - 2.0).abs() < 1e-12);
    }

    #[test]
    fn test_pending_encodings_flag_relaxation() {
        let mut model = HubModel::new();
        let x = model.add_variable("x", VarBounds::non_negative(100.0)).unwrap();
        let y = model.add_variable("y", VarBounds::free_non_negative()).unwrap();
        assert!(!model.needs_relaxation());

        model
            .add_piecewise(PiecewiseRelation {
                name: "capex".into(),
                x: x.into(),
                y: y.into(),
                breakpoints: vec![0.0, 50.0, 100.0],
                values: vec![0.0, 500.0, 1200.0],
            })
            .unwrap();
        assert!(model.needs_relaxation());
        assert_eq!(model.pending_count(), 1);
    }

    #[test]
    fn test_malformed_encodings_rejected() {
        let mut model = HubModel::new();
        let x = model.add_variable("x", VarBounds::non_negative(1.0)).unwrap();
        assert!(model
            .add_disjunction(Disjunction {
                name: "single".into(),
                disjuncts: vec![vec![LinearRelation::eq(x, 0.0)]],
            })
            .is_err());
        assert!(model
            .add_piecewise(PiecewiseRelation {
                name: "unordered".into(),
                x: x.into(),
                y: x.into(),
                breakpoints: vec![0.0, 2.0, 1.0],
                values: vec![0.0, 1.0, 2.0],
            })
            .is_err());
    }

    #[test]
    fn test_construction_errors_are_specification_errors() {
        let mut model = HubModel::new();
        let x = model.add_variable("x", VarBounds::non_negative(1.0)).unwrap();
        let err: HubError = model
            .add_disjunction(Disjunction {
                name: "n/Well/compression".into(),
                disjuncts: vec![vec![LinearRelation::eq(x, 0.0)]],
            })
            .unwrap_err()
            .into();
        match err {
            HubError::Specification(SpecificationError::InvalidValue { entity, field, .. }) => {
                assert_eq!(entity, "n/Well/compression");
                assert_eq!(field, "encoding");
            }
            other => panic!("expected a specification error, got {other:?}"),
        }

        let err: HubError = model.add_variable("x", VarBounds::non_negative(1.0)).unwrap_err().into();
        assert!(matches!(
            err,
            HubError::Specification(SpecificationError::Duplicate { kind: "variable", .. })
        ));
        let err: HubError = ModelError::RelaxationPending(2).into();
        assert!(matches!(err, HubError::Solver(_)));
    }
}
