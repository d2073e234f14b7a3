//! # ehub-ts: Time Series for Energy-Hub Models
//!
//! - [`TimeSeriesStore`]: full-resolution demand, price, limit, emission-factor,
//!   capacity-factor and inflow series, validated against the horizon.
//! - [`TemporalAggregator`]: seeded k-means typical-period selection producing a
//!   [`RepresentativeMapping`] (order, weights, source steps).
//!
//! Synthesizers keep the full-resolution store and reduce series on demand
//! with [`RepresentativeMapping::reduce`]; storage recursions replay the
//! full horizon through [`RepresentativeMapping::order`].

pub mod aggregate;
pub mod store;

pub use aggregate::{representative_mapping, RepresentativeMapping, TemporalAggregator};
pub use store::{OwnerClass, SeriesKey, SeriesKind, SeriesOwner, TimeSeriesStore};
