//! Domain types used throughout the pipeline.
//!
//! This module defines:
//!
//! - the series model (`TimeSeriesPoint`, `StationSeries`)
//! - acquisition outcomes and strategy selection (`AcquisitionResult`, `StrategyKind`)
//! - station identity and alias matching (`StationAliases`)
//! - the resolved run configuration (`PipelineConfig`)

pub mod station;
pub mod types;

pub use station::*;
pub use types::*;
