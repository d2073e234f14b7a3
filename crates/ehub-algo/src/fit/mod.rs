//! Technology Performance Fitter.
//!
//! Turns a raw [`TechnologySpec`] plus its time series into a
//! [`FittedPerformance`]: fitted input/output coefficients, per-unit-size
//! flow bounds (time-dependent for capacity-factor driven technologies) and
//! archetype-specific constants for storage and sinks.
//!
//! | Archetype | What is fitted |
//! |-----------|----------------|
//! | RES   | output bound `capacity_factor[t] * rated_power` |
//! | CONV1 | one curve for the total output as a function of total input |
//! | CONV2 | one curve per output carrier as a function of total input |
//! | CONV3 | one curve per output carrier as a function of the main input, fixed secondary input ratios |
//! | STOR  | efficiencies, per-step retention, charge/discharge rates, inflow |
//! | SINK  | injection cap, energy consumption, compression table |
//!
//! Failures are reported as [`FitError`] carrying the instance identity;
//! nothing is zero-filled.

mod curve;

pub use curve::SegmentCoefficients;

use std::collections::BTreeMap;

use ehub_core::{
    Archetype, Carrier, CompressionSpec, FitError, FitErrorKind, PerformanceConfig,
    PerformanceCurve, PerformanceFunction, TechnologySpec,
};
use ehub_ts::{SeriesKind, TimeSeriesStore};
use serde::Serialize;
use tracing::debug;

/// A per-step coefficient that may or may not vary over time.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum CoefficientSeries {
    Constant(f64),
    /// One value per full-resolution step
    Varying(Vec<f64>),
}

impl CoefficientSeries {
    /// Value at full-resolution step `t`.
    ///
    /// Varying series are checked against the horizon before synthesis
    /// (see [`FittedPerformance::check_horizon`]); `t` must lie within it.
    pub fn at(&self, t: usize) -> f64 {
        match self {
            CoefficientSeries::Constant(v) => *v,
            CoefficientSeries::Varying(values) => values[t],
        }
    }

    /// Number of steps a varying series was fitted on.
    pub fn steps(&self) -> Option<usize> {
        match self {
            CoefficientSeries::Constant(_) => None,
            CoefficientSeries::Varying(values) => Some(values.len()),
        }
    }

    pub fn max(&self) -> f64 {
        match self {
            CoefficientSeries::Constant(v) => *v,
            CoefficientSeries::Varying(values) => values.iter().copied().fold(0.0, f64::max),
        }
    }

    pub fn is_time_dependent(&self) -> bool {
        matches!(self, CoefficientSeries::Varying(_))
    }
}

/// What a fitted curve produces.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize)]
pub enum FitTarget {
    /// Sum of all outputs (CONV1)
    Total,
    Carrier(Carrier),
}

/// Fitted input/output relation of a conversion technology.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FittedCurve {
    pub function: PerformanceFunction,
    /// Load fractions bounding the segments; `breakpoints.len() == segments + 1`
    pub breakpoints: Vec<f64>,
    pub coefficients: BTreeMap<FitTarget, SegmentCoefficients>,
}

impl FittedCurve {
    pub fn segments(&self) -> usize {
        self.breakpoints.len().saturating_sub(1)
    }

    /// Output per unit size at full load for `target`.
    pub fn full_load_output(&self, target: &FitTarget) -> f64 {
        match (self.coefficients.get(target), self.breakpoints.last()) {
            (Some(c), Some(&x)) if c.segments() > 0 => c.value_at(c.segments() - 1, x),
            _ => 0.0,
        }
    }
}

/// Fitted storage constants.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StorageFit {
    pub charge_efficiency: f64,
    pub discharge_efficiency: f64,
    /// Fraction of the level kept from one step to the next
    pub retention: f64,
    pub charge_rate: f64,
    pub discharge_rate: f64,
    /// Natural inflow per full-resolution step
    pub inflow: Option<Vec<f64>>,
    pub energy_consumption: BTreeMap<Carrier, f64>,
}

/// Fitted compression table for sinks.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CompressionFit {
    pub carrier: Carrier,
    pub pressure_ratios: Vec<f64>,
    /// Segment-indexed, time-invariant consumption per unit injected
    pub efficiencies: Vec<f64>,
    pub pressure_ratio: Option<f64>,
}

impl CompressionFit {
    pub fn segments(&self) -> usize {
        self.efficiencies.len()
    }
}

/// Fitted sink constants.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SinkFit {
    pub injection_rate_max: f64,
    pub energy_consumption: BTreeMap<Carrier, f64>,
    pub compression: Option<CompressionFit>,
}

/// Everything the synthesizer needs to know about one instance's performance.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FittedPerformance {
    pub curve: Option<FittedCurve>,
    pub min_part_load: f64,
    /// Input bound per carrier; per unit of `rated_power * size` when
    /// `bounds_scale_with_size`, absolute otherwise
    pub input_bounds: BTreeMap<Carrier, CoefficientSeries>,
    pub output_bounds: BTreeMap<Carrier, CoefficientSeries>,
    pub bounds_scale_with_size: bool,
    /// CONV3 secondary input per unit of main input
    pub input_ratios: BTreeMap<Carrier, f64>,
    pub time_dependent: bool,
    /// RES may produce below its profile
    pub curtailment: bool,
    pub storage: Option<StorageFit>,
    pub sink: Option<SinkFit>,
}

impl FittedPerformance {
    fn empty(curtailment: bool) -> Self {
        Self {
            curve: None,
            min_part_load: 0.0,
            input_bounds: BTreeMap::new(),
            output_bounds: BTreeMap::new(),
            bounds_scale_with_size: true,
            input_ratios: BTreeMap::new(),
            time_dependent: false,
            curtailment,
            storage: None,
            sink: None,
        }
    }

    /// Every time-dependent coefficient must cover exactly `steps`
    /// full-resolution steps.
    pub fn check_horizon(&self, steps: usize) -> Result<(), FitErrorKind> {
        let fitted = self
            .input_bounds
            .values()
            .chain(self.output_bounds.values())
            .filter_map(CoefficientSeries::steps)
            .chain(self.storage.as_ref().and_then(|s| s.inflow.as_ref()).map(Vec::len));
        for actual in fitted {
            if actual != steps {
                return Err(FitErrorKind::SeriesLength { expected: steps, actual });
            }
        }
        Ok(())
    }

    /// Whether conversion needs an on/off (or segment) disjunction.
    pub fn needs_disjunction(&self) -> bool {
        match &self.curve {
            Some(curve) => curve.function != PerformanceFunction::Linear || self.min_part_load > 0.0,
            None => false,
        }
    }
}

/// Fit one technology instance.
pub fn fit_technology(
    spec: &TechnologySpec,
    archetype: Archetype,
    series: &TimeSeriesStore,
    config: &PerformanceConfig,
    resolution_hours: f64,
) -> Result<FittedPerformance, FitError> {
    let fail = |kind: FitErrorKind| FitError {
        node: spec.node.clone(),
        technology: spec.name.clone(),
        kind,
    };

    let fitted = match archetype {
        Archetype::Res => fit_res(spec, series),
        Archetype::Conv1 | Archetype::Conv2 | Archetype::Conv3 => fit_conversion(spec, archetype, config),
        Archetype::Stor => fit_storage(spec, series, resolution_hours),
        Archetype::Sink => fit_sink(spec),
    }
    .map_err(fail)?;

    debug!(
        node = %spec.node,
        technology = %spec.name,
        archetype = %archetype,
        time_dependent = fitted.time_dependent,
        segments = fitted.curve.as_ref().map_or(0, FittedCurve::segments),
        "fitted technology performance"
    );
    Ok(fitted)
}

fn fit_res(spec: &TechnologySpec, series: &TimeSeriesStore) -> Result<FittedPerformance, FitErrorKind> {
    let cf = series
        .technology_series(&spec.node, &spec.name, SeriesKind::CapacityFactor)
        .ok_or(FitErrorKind::MissingField("capacity_factor"))?;
    if cf.len() != series.steps() {
        return Err(FitErrorKind::SeriesLength {
            expected: series.steps(),
            actual: cf.len(),
        });
    }
    if let Some((step, &value)) = cf.iter().enumerate().find(|(_, v)| **v < 0.0) {
        return Err(FitErrorKind::NegativeCapacityFactor { step, value });
    }

    let mut fitted = FittedPerformance::empty(spec.performance.curtailment);
    let bound = CoefficientSeries::Varying(cf.to_vec());
    for carrier in &spec.output_carriers {
        fitted.output_bounds.insert(carrier.clone(), bound.clone());
    }
    fitted.time_dependent = true;
    Ok(fitted)
}

fn fit_conversion(
    spec: &TechnologySpec,
    archetype: Archetype,
    config: &PerformanceConfig,
) -> Result<FittedPerformance, FitErrorKind> {
    let perf = &spec.performance;
    let curve = perf.curve.as_ref().ok_or(FitErrorKind::MissingField("curve"))?;
    curve::check_domain(&curve.input)?;
    if !(0.0..1.0).contains(&perf.min_part_load) {
        return Err(FitErrorKind::OutOfDomain(format!(
            "min_part_load {} outside [0, 1)",
            perf.min_part_load
        )));
    }

    // Outputs as a function of input: summed for CONV1, per carrier otherwise
    let mut targets: Vec<(FitTarget, Vec<f64>)> = Vec::new();
    if archetype == Archetype::Conv1 {
        let mut total = vec![0.0; curve.input.len()];
        for carrier in &spec.output_carriers {
            let values = curve_output(curve, carrier)?;
            total.iter_mut().zip(values).for_each(|(t, v)| *t += v);
        }
        targets.push((FitTarget::Total, total));
    } else {
        for carrier in &spec.output_carriers {
            targets.push((FitTarget::Carrier(carrier.clone()), curve_output(curve, carrier)?.to_vec()));
        }
    }

    let breakpoints = match perf.function {
        PerformanceFunction::Linear | PerformanceFunction::LinearWithIdle => {
            let lo = perf.min_part_load;
            let hi = curve.input.last().copied().filter(|&h| h > lo).unwrap_or(1.0);
            vec![lo, hi]
        }
        PerformanceFunction::Piecewise => curve::piecewise_breakpoints(
            &curve.input,
            perf.min_part_load,
            config.piecewise_segments,
            perf.breakpoints.as_deref(),
        )?,
    };

    let mut coefficients = BTreeMap::new();
    for (target, y) in targets {
        let c = match perf.function {
            PerformanceFunction::Linear => {
                SegmentCoefficients::single(curve::slope_through_origin(&curve.input, &y)?, 0.0)
            }
            PerformanceFunction::LinearWithIdle => {
                let (a, b) = curve::ordinary_least_squares(&curve.input, &y)?;
                SegmentCoefficients::single(a, b)
            }
            PerformanceFunction::Piecewise => curve::interpolate_segments(&curve.input, &y, &breakpoints),
        };
        coefficients.insert(target, c);
    }
    let fitted_curve = FittedCurve {
        function: perf.function,
        breakpoints,
        coefficients,
    };

    let mut fitted = FittedPerformance::empty(perf.curtailment);
    fitted.min_part_load = perf.min_part_load;

    for carrier in &spec.output_carriers {
        let target = match archetype {
            Archetype::Conv1 => FitTarget::Total,
            _ => FitTarget::Carrier(carrier.clone()),
        };
        let bound = fitted_curve.full_load_output(&target).max(0.0);
        fitted
            .output_bounds
            .insert(carrier.clone(), CoefficientSeries::Constant(bound));
    }

    if archetype == Archetype::Conv3 {
        let main = spec.main_input().ok_or(FitErrorKind::MissingField("main_input_carrier"))?;
        for carrier in &spec.input_carriers {
            if carrier == main {
                fitted.input_bounds.insert(carrier.clone(), CoefficientSeries::Constant(1.0));
                continue;
            }
            let ratio = *perf.input_ratios.get(carrier).ok_or_else(|| {
                FitErrorKind::OutOfDomain(format!("no input ratio for secondary carrier '{}'", carrier))
            })?;
            if !(ratio.is_finite() && ratio >= 0.0) {
                return Err(FitErrorKind::OutOfDomain(format!(
                    "input ratio {} for '{}' must be non-negative",
                    ratio, carrier
                )));
            }
            fitted.input_ratios.insert(carrier.clone(), ratio);
            fitted
                .input_bounds
                .insert(carrier.clone(), CoefficientSeries::Constant(ratio));
        }
    } else {
        for carrier in &spec.input_carriers {
            fitted.input_bounds.insert(carrier.clone(), CoefficientSeries::Constant(1.0));
        }
    }

    fitted.curve = Some(fitted_curve);
    Ok(fitted)
}

fn curve_output<'a>(
    curve: &'a PerformanceCurve,
    carrier: &Carrier,
) -> Result<&'a [f64], FitErrorKind> {
    let values = curve.outputs.get(carrier).ok_or_else(|| {
        FitErrorKind::OutOfDomain(format!("no performance curve for output carrier '{}'", carrier))
    })?;
    if values.len() != curve.input.len() {
        return Err(FitErrorKind::OutOfDomain(format!(
            "output curve for '{}' has {} points, input has {}",
            carrier,
            values.len(),
            curve.input.len()
        )));
    }
    if values.iter().any(|v| !v.is_finite() || *v < 0.0) {
        return Err(FitErrorKind::OutOfDomain(format!(
            "output curve for '{}' must be finite and non-negative",
            carrier
        )));
    }
    Ok(values)
}

fn fit_storage(
    spec: &TechnologySpec,
    series: &TimeSeriesStore,
    resolution_hours: f64,
) -> Result<FittedPerformance, FitErrorKind> {
    let perf = &spec.performance;
    let storage = perf.storage.as_ref().ok_or(FitErrorKind::MissingField("storage"))?;
    for (field, value) in [
        ("charge_efficiency", storage.charge_efficiency),
        ("discharge_efficiency", storage.discharge_efficiency),
    ] {
        if !(value > 0.0 && value <= 1.0) {
            return Err(FitErrorKind::OutOfDomain(format!("{} {} outside (0, 1]", field, value)));
        }
    }
    if !(0.0..1.0).contains(&storage.self_discharge) {
        return Err(FitErrorKind::OutOfDomain(format!(
            "self_discharge {} outside [0, 1)",
            storage.self_discharge
        )));
    }
    if storage.charge_rate < 0.0 || storage.discharge_rate < 0.0 {
        return Err(FitErrorKind::OutOfDomain("charge/discharge rates must be non-negative".into()));
    }

    let inflow = series
        .technology_series(&spec.node, &spec.name, SeriesKind::NaturalInflow)
        .map(|v| {
            if v.len() != series.steps() {
                return Err(FitErrorKind::SeriesLength {
                    expected: series.steps(),
                    actual: v.len(),
                });
            }
            if let Some(x) = v.iter().find(|x| **x < 0.0) {
                return Err(FitErrorKind::OutOfDomain(format!("negative natural inflow {}", x)));
            }
            Ok(v.to_vec())
        })
        .transpose()?;

    let mut fitted = FittedPerformance::empty(perf.curtailment);
    if let Some(carrier) = spec.main_input() {
        fitted
            .input_bounds
            .insert(carrier.clone(), CoefficientSeries::Constant(storage.charge_rate));
    }
    for (carrier, &coef) in &storage.energy_consumption {
        fitted
            .input_bounds
            .insert(carrier.clone(), CoefficientSeries::Constant(coef * storage.charge_rate));
    }
    if let Some(carrier) = spec.main_output() {
        fitted
            .output_bounds
            .insert(carrier.clone(), CoefficientSeries::Constant(storage.discharge_rate));
    }
    fitted.time_dependent = inflow.is_some();
    fitted.storage = Some(StorageFit {
        charge_efficiency: storage.charge_efficiency,
        discharge_efficiency: storage.discharge_efficiency,
        retention: (1.0 - storage.self_discharge).powf(resolution_hours),
        charge_rate: storage.charge_rate,
        discharge_rate: storage.discharge_rate,
        inflow,
        energy_consumption: storage.energy_consumption.clone(),
    });
    Ok(fitted)
}

fn fit_sink(spec: &TechnologySpec) -> Result<FittedPerformance, FitErrorKind> {
    let perf = &spec.performance;
    let sink = perf.sink.as_ref().ok_or(FitErrorKind::MissingField("sink"))?;
    if !(sink.injection_rate_max.is_finite() && sink.injection_rate_max >= 0.0) {
        return Err(FitErrorKind::OutOfDomain(format!(
            "injection_rate_max {} must be finite and non-negative",
            sink.injection_rate_max
        )));
    }
    let compression = sink.compression.as_ref().map(fit_compression).transpose()?;

    let mut fitted = FittedPerformance::empty(perf.curtailment);
    fitted.bounds_scale_with_size = false;
    if let Some(carrier) = spec.main_input() {
        fitted
            .input_bounds
            .insert(carrier.clone(), CoefficientSeries::Constant(sink.injection_rate_max));
    }
    for (carrier, &coef) in &sink.energy_consumption {
        fitted
            .input_bounds
            .insert(carrier.clone(), CoefficientSeries::Constant(coef * sink.injection_rate_max));
    }
    if let Some(c) = &compression {
        let worst = c.efficiencies.iter().copied().fold(0.0, f64::max);
        let bound = fitted
            .input_bounds
            .entry(c.carrier.clone())
            .or_insert(CoefficientSeries::Constant(0.0));
        *bound = CoefficientSeries::Constant(bound.max() + worst * sink.injection_rate_max);
    }
    fitted.sink = Some(SinkFit {
        injection_rate_max: sink.injection_rate_max,
        energy_consumption: sink.energy_consumption.clone(),
        compression,
    });
    Ok(fitted)
}

fn fit_compression(spec: &CompressionSpec) -> Result<CompressionFit, FitErrorKind> {
    if spec.pressure_ratios.len() < 2 {
        return Err(FitErrorKind::OutOfDomain(
            "compression table needs at least two pressure ratios".into(),
        ));
    }
    if let Some(i) = spec.pressure_ratios.windows(2).position(|w| w[1] <= w[0]) {
        return Err(FitErrorKind::BreakpointOrder { position: i + 1 });
    }
    if spec.efficiencies.len() != spec.pressure_ratios.len() - 1 {
        return Err(FitErrorKind::OutOfDomain(format!(
            "{} compression efficiencies for {} segments",
            spec.efficiencies.len(),
            spec.pressure_ratios.len() - 1
        )));
    }
    if spec.efficiencies.iter().any(|e| !e.is_finite() || *e < 0.0) {
        return Err(FitErrorKind::OutOfDomain(
            "compression efficiencies must be non-negative".into(),
        ));
    }
    if let Some(p) = spec.pressure_ratio {
        let (lo, hi) = (spec.pressure_ratios[0], spec.pressure_ratios[spec.pressure_ratios.len() - 1]);
        if p < lo || p > hi {
            return Err(FitErrorKind::OutOfDomain(format!(
                "operating pressure ratio {} outside [{}, {}]",
                p, lo, hi
            )));
        }
    }
    Ok(CompressionFit {
        carrier: spec.carrier.clone(),
        pressure_ratios: spec.pressure_ratios.clone(),
        efficiencies: spec.efficiencies.clone(),
        pressure_ratio: spec.pressure_ratio,
    })
}
