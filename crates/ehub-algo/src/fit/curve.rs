//! Least-squares and piecewise fits of part-load curves.
//!
//! All fits work on load fractions `x` (input per unit of rated size) and
//! outputs `y` per unit of rated size. A segment `j` is the affine relation
//!
//! ```text
//! output = alpha1[j] * input + alpha2[j] * size
//! ```
//!
//! valid for `breakpoints[j] * size <= input <= breakpoints[j+1] * size`.

use ehub_core::{FitErrorKind, PiecewiseLinear};
use serde::Serialize;

/// Slopes and size-proportional intercepts, one entry per segment.
#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct SegmentCoefficients {
    pub alpha1: Vec<f64>,
    pub alpha2: Vec<f64>,
}

impl SegmentCoefficients {
    pub fn single(alpha1: f64, alpha2: f64) -> Self {
        Self {
            alpha1: vec![alpha1],
            alpha2: vec![alpha2],
        }
    }

    pub fn segments(&self) -> usize {
        self.alpha1.len()
    }

    /// Output per unit size at load fraction `x` on segment `j`.
    pub fn value_at(&self, j: usize, x: f64) -> f64 {
        self.alpha1[j] * x + self.alpha2[j]
    }
}

/// Check that the load fractions are usable as a curve domain.
pub(crate) fn check_domain(x: &[f64]) -> Result<(), FitErrorKind> {
    if x.is_empty() {
        return Err(FitErrorKind::MissingField("curve.input"));
    }
    if let Some(i) = x.windows(2).position(|w| w[1] <= w[0]) {
        return Err(FitErrorKind::BreakpointOrder { position: i + 1 });
    }
    if let Some(v) = x.iter().find(|v| !v.is_finite() || **v < 0.0 || **v > 1.0 + 1e-9) {
        return Err(FitErrorKind::OutOfDomain(format!(
            "load fraction {} outside [0, 1]",
            v
        )));
    }
    Ok(())
}

/// `y = a x`, least squares.
pub(crate) fn slope_through_origin(x: &[f64], y: &[f64]) -> Result<f64, FitErrorKind> {
    let sxx: f64 = x.iter().map(|v| v * v).sum();
    if sxx <= 0.0 {
        return Err(FitErrorKind::OutOfDomain(
            "curve has no positive load point".into(),
        ));
    }
    let sxy: f64 = x.iter().zip(y).map(|(a, b)| a * b).sum();
    Ok(sxy / sxx)
}

/// `y = a x + b`, ordinary least squares. Returns `(a, b)`.
pub(crate) fn ordinary_least_squares(x: &[f64], y: &[f64]) -> Result<(f64, f64), FitErrorKind> {
    let n = x.len() as f64;
    if x.len() < 2 {
        return Err(FitErrorKind::OutOfDomain(
            "an idle fit needs at least two curve points".into(),
        ));
    }
    let mean_x = x.iter().sum::<f64>() / n;
    let mean_y = y.iter().sum::<f64>() / n;
    let sxx: f64 = x.iter().map(|v| (v - mean_x).powi(2)).sum();
    let sxy: f64 = x
        .iter()
        .zip(y)
        .map(|(a, b)| (a - mean_x) * (b - mean_y))
        .sum();
    let slope = sxy / sxx;
    Ok((slope, mean_y - slope * mean_x))
}

/// Breakpoints for a piecewise fit.
///
/// Explicit breakpoints must be strictly increasing and inside the curve
/// domain; otherwise `segments` equal-width segments span
/// `[max(min_part_load, x_first), x_last]`.
pub(crate) fn piecewise_breakpoints(
    x: &[f64],
    min_part_load: f64,
    segments: usize,
    explicit: Option<&[f64]>,
) -> Result<Vec<f64>, FitErrorKind> {
    let (lo, hi) = match (x.first(), x.last()) {
        (Some(&lo), Some(&hi)) if hi > lo => (lo, hi),
        _ => {
            return Err(FitErrorKind::OutOfDomain(
                "a piecewise fit needs at least two curve points".into(),
            ))
        }
    };

    if let Some(bp) = explicit {
        if bp.len() < 2 {
            return Err(FitErrorKind::OutOfDomain(
                "at least two breakpoints are required".into(),
            ));
        }
        if let Some(i) = bp.windows(2).position(|w| w[1] <= w[0]) {
            return Err(FitErrorKind::BreakpointOrder { position: i + 1 });
        }
        if bp[0] < lo - 1e-9 || bp[bp.len() - 1] > hi + 1e-9 {
            return Err(FitErrorKind::OutOfDomain(format!(
                "breakpoints [{}, {}] outside curve domain [{}, {}]",
                bp[0],
                bp[bp.len() - 1],
                lo,
                hi
            )));
        }
        return Ok(bp.to_vec());
    }

    if segments == 0 {
        return Err(FitErrorKind::OutOfDomain(
            "number of piecewise segments must be at least 1".into(),
        ));
    }
    let start = min_part_load.max(lo);
    if start >= hi {
        return Err(FitErrorKind::OutOfDomain(format!(
            "minimum part load {} leaves no operating range",
            min_part_load
        )));
    }
    let width = (hi - start) / segments as f64;
    Ok((0..=segments).map(|k| start + width * k as f64).collect())
}

/// Per-segment coefficients interpolating `(x, y)` at `breakpoints`.
pub(crate) fn interpolate_segments(x: &[f64], y: &[f64], breakpoints: &[f64]) -> SegmentCoefficients {
    let curve = PiecewiseLinear::new(x.to_vec(), y.to_vec());
    let at: Vec<f64> = breakpoints.iter().map(|&b| curve.evaluate(b)).collect();
    let mut coefficients = SegmentCoefficients::default();
    for j in 0..breakpoints.len().saturating_sub(1) {
        let slope = (at[j + 1] - at[j]) / (breakpoints[j + 1] - breakpoints[j]);
        coefficients.alpha1.push(slope);
        coefficients.alpha2.push(at[j] - slope * breakpoints[j]);
    }
    coefficients
}
