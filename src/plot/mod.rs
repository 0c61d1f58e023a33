//! Plot rendering.
//!
//! - `raster`: PNG line chart (Plotters bitmap backend)
//! - `ascii`: fixed-grid terminal preview

pub mod ascii;
pub mod raster;

pub use ascii::render_ascii_series;
pub use raster::{DEFAULT_PLOT_SIZE, chart_title, render_series_png};
