//! Error taxonomy for energy-hub model construction
//!
//! Every failure raised while building a model belongs to one of three
//! families, each carrying enough identity to locate the faulty input:
//!
//! - [`SpecificationError`]: malformed topology, technology, network or series input
//! - [`FitError`]: performance data outside the domain the fitter accepts
//! - [`AggregationError`]: clustering requests the horizon cannot satisfy
//!
//! [`HubError`] wraps all of them (plus I/O, configuration and solver
//! failures) so API boundaries can use a single `?`-friendly result type.
//!
//! # Example
//!
//! ```ignore
//! use ehub_core::{HubError, HubResult};
//!
//! fn assemble(config_path: &str) -> HubResult<()> {
//!     let config = ModelConfig::load(config_path)?;
//!     let model = HubModelBuilder::new(topology, series, config).build()?;
//!     Ok(())
//! }
//! ```

use thiserror::Error;

/// Unified error type for model construction and solving.
#[derive(Error, Debug)]
pub enum HubError {
    /// Malformed or incomplete input
    #[error(transparent)]
    Specification(#[from] SpecificationError),

    /// Performance fitting failed for one instance
    #[error(transparent)]
    Fit(#[from] FitError),

    /// Representative-period clustering failed
    #[error(transparent)]
    Aggregation(#[from] AggregationError),

    /// I/O errors (config files)
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Solver failures other than infeasibility/unboundedness
    #[error("Solver error: {0}")]
    Solver(String),

    /// Generic errors (for wrapping external errors)
    #[error("{0}")]
    Other(String),
}

/// Convenience type alias for Results using HubError.
pub type HubResult<T> = Result<T, HubError>;

/// Malformed or incomplete topology, technology, network or series input.
///
/// Always fatal: construction aborts before any model is handed out.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SpecificationError {
    #[error("unknown technology model '{model}' for technology '{technology}' at node '{node}'")]
    UnknownArchetype {
        node: String,
        technology: String,
        model: String,
    },

    #[error("{entity}: missing required field '{field}'")]
    MissingField { entity: String, field: &'static str },

    #[error("unknown node '{node}' referenced by {entity}")]
    UnknownNode { entity: String, node: String },

    #[error("unknown carrier '{carrier}' referenced by {entity}")]
    UnknownCarrier { entity: String, carrier: String },

    #[error("duplicate {kind} '{name}'")]
    Duplicate { kind: &'static str, name: String },

    #[error("{entity}: invalid {field}: {reason}")]
    InvalidValue {
        entity: String,
        field: &'static str,
        reason: String,
    },

    #[error("invalid time horizon: {0}")]
    InvalidHorizon(String),

    #[error("series {key} has {actual} values but the horizon has {expected} steps")]
    SeriesLength {
        key: String,
        expected: usize,
        actual: usize,
    },

    #[error("series {key} has a non-finite value at step {step}")]
    NonFiniteValue { key: String, step: usize },
}

impl SpecificationError {
    pub fn invalid(entity: impl Into<String>, field: &'static str, reason: impl Into<String>) -> Self {
        SpecificationError::InvalidValue {
            entity: entity.into(),
            field,
            reason: reason.into(),
        }
    }

    pub fn missing(entity: impl Into<String>, field: &'static str) -> Self {
        SpecificationError::MissingField {
            entity: entity.into(),
            field,
        }
    }
}

/// Performance fitting failed for a single technology instance.
#[derive(Error, Debug, Clone, PartialEq)]
#[error("cannot fit technology '{technology}' at node '{node}': {kind}")]
pub struct FitError {
    pub node: String,
    pub technology: String,
    pub kind: FitErrorKind,
}

/// Cause of a [`FitError`].
#[derive(Error, Debug, Clone, PartialEq)]
pub enum FitErrorKind {
    #[error("missing performance field '{0}'")]
    MissingField(&'static str),

    #[error("fitted series has {actual} steps, horizon has {expected}")]
    SeriesLength { expected: usize, actual: usize },

    #[error("negative capacity factor {value} at step {step}")]
    NegativeCapacityFactor { step: usize, value: f64 },

    #[error("breakpoints are not strictly increasing at position {position}")]
    BreakpointOrder { position: usize },

    #[error("{0}")]
    OutOfDomain(String),
}

/// Representative-period clustering cannot be performed.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum AggregationError {
    #[error("number of representative periods must be at least 1")]
    ZeroClusters,

    #[error("horizon of {steps} steps is not a whole number of {steps_per_period}-step periods")]
    PartialPeriod { steps: usize, steps_per_period: usize },

    #[error("requested {clusters} representative periods but the horizon only has {periods}")]
    InsufficientPeriods { periods: usize, clusters: usize },

    #[error("requested {clusters} representative periods but the horizon only has {distinct} distinct ones")]
    InsufficientDistinctPeriods { distinct: usize, clusters: usize },

    #[error("no time series available to cluster on")]
    NoFeatures,

    #[error("inconsistent representative mapping: {0}")]
    InconsistentMapping(String),
}

impl From<anyhow::Error> for HubError {
    fn from(err: anyhow::Error) -> Self {
        HubError::Other(err.to_string())
    }
}

impl From<String> for HubError {
    fn from(s: String) -> Self {
        HubError::Other(s)
    }
}

impl From<&str> for HubError {
    fn from(s: &str) -> Self {
        HubError::Other(s.to_string())
    }
}

impl From<toml::de::Error> for HubError {
    fn from(err: toml::de::Error) -> Self {
        HubError::Config(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = HubError::Solver("numerical trouble".into());
        assert!(err.to_string().contains("Solver error"));
        assert!(err.to_string().contains("numerical trouble"));
    }

    #[test]
    fn test_fit_error_carries_identity() {
        let err = FitError {
            node: "city".into(),
            technology: "PV".into(),
            kind: FitErrorKind::NegativeCapacityFactor {
                step: 3,
                value: -0.2,
            },
        };
        let text = err.to_string();
        assert!(text.contains("city"));
        assert!(text.contains("PV"));
        assert!(text.contains("step 3"));
    }

    #[test]
    fn test_specification_error_converts() {
        fn inner() -> HubResult<()> {
            Err(SpecificationError::UnknownArchetype {
                node: "n1".into(),
                technology: "T".into(),
                model: "CONV9".into(),
            })?;
            Ok(())
        }

        let err = inner().unwrap_err();
        assert!(matches!(
            err,
            HubError::Specification(SpecificationError::UnknownArchetype { .. })
        ));
        assert!(err.to_string().contains("CONV9"));
    }

    #[test]
    fn test_io_error_conversion() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let hub_err: HubError = io_err.into();
        assert!(matches!(hub_err, HubError::Io(_)));
    }

    #[test]
    fn test_aggregation_error_message() {
        let err: HubError = AggregationError::InsufficientPeriods {
            periods: 2,
            clusters: 5,
        }
        .into();
        assert!(err.to_string().contains("5"));
    }
}
