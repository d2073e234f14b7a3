//! Pieces shared by the technology and network synthesizers: the synthesis
//! context, size rules and the capex / fixed-opex terms.
//!
//! # Investment terms
//!
//! | Size rule | `capex_aux` | `capex` |
//! |-----------|-------------|---------|
//! | fixed (existing) | constant at installed size | `0` |
//! | decommissionable (existing) | constant at installed size | `decommission_cost * (initial - size)` |
//! | new | linear or piecewise in `size` | `capex_aux` |
//!
//! `capex_aux` is the annualized as-new capital cost and `opex_fixed` is a
//! share of it, so a partly decommissioned asset keeps paying fixed opex on
//! its original value.

use ehub_core::PiecewiseLinear;
use ehub_ts::{RepresentativeMapping, TimeSeriesStore};
use good_lp::{Expression, Variable};
use serde::Serialize;

use crate::model::{HubModel, ModelError, PiecewiseRelation, VarBounds};

/// Read-only inputs every synthesizer needs.
#[derive(Debug, Clone, Copy)]
pub struct SynthesisContext<'a> {
    pub mapping: &'a RepresentativeMapping,
    pub series: &'a TimeSeriesStore,
}

impl<'a> SynthesisContext<'a> {
    pub fn new(mapping: &'a RepresentativeMapping, series: &'a TimeSeriesStore) -> Self {
        Self { mapping, series }
    }

    /// Number of representative steps decision variables are indexed by.
    pub fn steps(&self) -> usize {
        self.mapping.n_representative()
    }

    /// Full-resolution step whose data representative step `r` uses.
    pub fn source(&self, r: usize) -> usize {
        self.mapping.source()[r]
    }
}

/// Result of synthesizing one instance.
#[derive(Debug, Clone)]
pub struct Synthesized<B> {
    pub block: B,
    /// Whether the instance added piecewise or disjunctive encodings
    pub needs_relaxation: bool,
}

/// How the size of an asset may change.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub enum SizeRule {
    /// Existing, non-decommissionable
    Fixed(f64),
    /// Existing, may shrink down to `min`
    Decommissionable { initial: f64, min: f64 },
    /// Candidate asset
    New { min: f64, max: f64, integer: bool },
}

impl SizeRule {
    pub fn bounds(&self) -> VarBounds {
        match *self {
            SizeRule::Fixed(size) => VarBounds::fixed(size),
            SizeRule::Decommissionable { initial, min } => VarBounds::continuous(min, initial),
            SizeRule::New {
                min,
                max,
                integer: true,
            } => VarBounds::integer(min.ceil(), max.floor()),
            SizeRule::New { min, max, .. } => VarBounds::continuous(min, max),
        }
    }

    pub fn upper(&self) -> f64 {
        match *self {
            SizeRule::Fixed(size) => size,
            SizeRule::Decommissionable { initial, .. } => initial,
            SizeRule::New { max, .. } => max,
        }
    }

    pub fn is_existing(&self) -> bool {
        !matches!(self, SizeRule::New { .. })
    }
}

/// Capital cost as a function of size, before annualization.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum CapexCurve {
    /// `unit * size + fixed * built`
    Linear {
        unit: f64,
        fixed: f64,
        built: Option<Variable>,
    },
    Piecewise { breakpoints: Vec<f64>, values: Vec<f64> },
}

impl CapexCurve {
    pub(crate) fn evaluate(&self, size: f64) -> f64 {
        match self {
            CapexCurve::Linear { unit, fixed, .. } => {
                unit * size + if size > 0.0 { *fixed } else { 0.0 }
            }
            CapexCurve::Piecewise { breakpoints, values } => {
                PiecewiseLinear::new(breakpoints.clone(), values.clone()).evaluate(size)
            }
        }
    }
}

/// Investment parameters of one asset.
#[derive(Debug, Clone)]
pub(crate) struct Investment {
    pub rule: SizeRule,
    pub curve: CapexCurve,
    pub annualization: f64,
    pub decommission_cost: f64,
    pub opex_fixed_share: f64,
}

/// Investment variables of one asset.
#[derive(Debug, Clone, Copy)]
pub(crate) struct InvestmentTerms {
    pub capex: Variable,
    pub capex_aux: Variable,
    pub opex_fixed: Variable,
    pub needs_relaxation: bool,
}

/// Add `{prefix}/capex`, `{prefix}/capex_aux` and `{prefix}/opex_fixed`.
pub(crate) fn synthesize_investment(
    model: &mut HubModel,
    prefix: &str,
    size: Variable,
    investment: &Investment,
) -> Result<InvestmentTerms, ModelError> {
    let ann = investment.annualization;
    let mut needs_relaxation = false;

    let capex_aux = match investment.rule {
        SizeRule::Fixed(initial) | SizeRule::Decommissionable { initial, .. } => model.add_variable(
            &format!("{}/capex_aux", prefix),
            VarBounds::fixed(ann * investment.curve.evaluate(initial)),
        )?,
        SizeRule::New { .. } => {
            let aux = model.add_variable(&format!("{}/capex_aux", prefix), VarBounds::free_non_negative())?;
            match &investment.curve {
                CapexCurve::Linear { unit, fixed, built } => {
                    let mut cost = ann * unit * size;
                    if let Some(built) = built {
                        cost += ann * fixed * *built;
                    }
                    model.eq(format!("{}/capex_aux_def", prefix), aux, cost);
                }
                CapexCurve::Piecewise { breakpoints, values } => {
                    model.add_piecewise(PiecewiseRelation {
                        name: format!("{}/capex_curve", prefix),
                        x: size.into(),
                        y: aux.into(),
                        breakpoints: breakpoints.clone(),
                        values: values.iter().map(|v| ann * v).collect(),
                    })?;
                    needs_relaxation = true;
                }
            }
            aux
        }
    };

    let capex = model.add_variable(
        &format!("{}/capex", prefix),
        VarBounds::continuous(f64::NEG_INFINITY, f64::INFINITY),
    )?;
    match investment.rule {
        SizeRule::Fixed(_) => model.eq(format!("{}/capex_def", prefix), capex, 0.0),
        SizeRule::Decommissionable { initial, .. } => model.eq(
            format!("{}/capex_def", prefix),
            capex,
            Expression::from(investment.decommission_cost * initial) - investment.decommission_cost * size,
        ),
        SizeRule::New { .. } => model.eq(format!("{}/capex_def", prefix), capex, capex_aux),
    }

    let opex_fixed = model.add_variable(
        &format!("{}/opex_fixed", prefix),
        VarBounds::continuous(f64::NEG_INFINITY, f64::INFINITY),
    )?;
    model.eq(
        format!("{}/opex_fixed_def", prefix),
        opex_fixed,
        investment.opex_fixed_share * capex_aux,
    );

    Ok(InvestmentTerms {
        capex,
        capex_aux,
        opex_fixed,
        needs_relaxation,
    })
}
