//! PNG line chart of the cleaned series, drawn with Plotters.
//!
//! The x axis is days since the first observation; tick labels are formatted
//! back into calendar years. Text (title, tick labels, axis names) needs a
//! font backend, which only the `labels` feature enables. Without it no label
//! areas are allocated, so plotters never reaches its text path and the chart
//! is drawn as the line plus grid only.

use std::error::Error;
use std::path::Path;

use chrono::{Days, NaiveDate};
use plotters::prelude::*;
use tracing::info;

use crate::domain::StationSeries;
use crate::error::ExportError;
use crate::io::export::{persist, temp_sibling};

/// Default image size in pixels.
pub const DEFAULT_PLOT_SIZE: (u32, u32) = (1200, 600);

/// `Riñihue Station Streamflow (1960-2025)`
pub fn chart_title(station_name: &str, series: &StationSeries) -> String {
    match series.date_range() {
        Some((start, end)) => format!(
            "{station_name} Station Streamflow ({}-{})",
            start.format("%Y"),
            end.format("%Y")
        ),
        None => format!("{station_name} Station Streamflow"),
    }
}

/// Render `series` to a PNG at `path` (written atomically).
pub fn render_series_png(
    path: &Path,
    series: &StationSeries,
    station_name: &str,
    size: (u32, u32),
) -> Result<(), ExportError> {
    let plot_err = |reason: String| ExportError::Plot {
        path: path.to_path_buf(),
        reason,
    };

    let Some((start, end)) = series.date_range() else {
        return Err(plot_err("series is empty".to_string()));
    };
    let points: Vec<(f64, f64)> = series
        .points()
        .iter()
        .filter_map(|p| p.value.map(|v| ((p.date - start).num_days() as f64, v)))
        .collect();
    if points.is_empty() {
        return Err(plot_err("series has no values".to_string()));
    }

    let span = (end - start).num_days() as f64;
    let x_bounds = [0.0, span.max(1.0)];
    let y_bounds = y_bounds(&points);
    let title = chart_title(station_name, series);

    // The temp file keeps the `.png` suffix: the bitmap encoder picks the
    // format from the extension.
    let tmp = temp_sibling(path, ".png")?;
    draw(tmp.path(), size, &title, start, &points, x_bounds, y_bounds)
        .map_err(|e| plot_err(e.to_string()))?;
    persist(tmp, path)?;

    info!("wrote plot {}", path.display());
    Ok(())
}

#[cfg_attr(not(feature = "labels"), allow(unused_variables))]
fn draw(
    target: &Path,
    size: (u32, u32),
    title: &str,
    start: NaiveDate,
    points: &[(f64, f64)],
    x_bounds: [f64; 2],
    y_bounds: [f64; 2],
) -> Result<(), Box<dyn Error>> {
    let root = BitMapBackend::new(target, size).into_drawing_area();
    root.fill(&WHITE)?;

    let mut builder = ChartBuilder::on(&root);
    builder.margin(12);
    // Label areas are where plotters draws text; without a font they stay unset.
    #[cfg(feature = "labels")]
    builder
        .caption(title, ("sans-serif", 24))
        .set_label_area_size(LabelAreaPosition::Left, 70)
        .set_label_area_size(LabelAreaPosition::Bottom, 45);
    let mut chart = builder.build_cartesian_2d(x_bounds[0]..x_bounds[1], y_bounds[0]..y_bounds[1])?;

    #[cfg(feature = "labels")]
    let (fmt_x, fmt_y) = (|v: &f64| day_label(start, *v), |v: &f64| format!("{v:.0}"));
    {
        let mut mesh = chart.configure_mesh();
        mesh.x_labels(8)
            .y_labels(6)
            .light_line_style(RGBColor(235, 235, 235));
        #[cfg(feature = "labels")]
        mesh.x_desc("Date")
            .y_desc("Streamflow (m³/s)")
            .x_label_formatter(&fmt_x)
            .y_label_formatter(&fmt_y);
        mesh.draw()?;
    }

    chart.draw_series(LineSeries::new(
        points.iter().copied(),
        RGBColor(31, 119, 180).stroke_width(1),
    ))?;

    root.present()?;
    Ok(())
}

/// Year of the date `offset` days after `start`.
#[cfg_attr(not(feature = "labels"), allow(dead_code))]
fn day_label(start: NaiveDate, offset: f64) -> String {
    let days = offset.max(0.0).round() as u64;
    start
        .checked_add_days(Days::new(days))
        .map(|d| d.format("%Y").to_string())
        .unwrap_or_default()
}

fn y_bounds(points: &[(f64, f64)]) -> [f64; 2] {
    let (min, max) = points
        .iter()
        .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), &(_, y)| {
            (lo.min(y), hi.max(y))
        });
    let span = max - min;
    let pad = if span > 0.0 {
        span * 0.05
    } else {
        min.abs().max(1.0) * 0.05
    };
    [min - pad, max + pad]
}
