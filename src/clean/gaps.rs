//! Gap filling.
//!
//! Passes run in a fixed order over the series:
//! 1. forward-fill: the trailing run of missing points takes the last valid value
//! 2. backward-fill: the leading run takes the first valid value
//! 3. interpolation: interior gaps, linear in elapsed days between neighbours
//! 4. drop: whatever is still missing (only possible with no valid value at all)
//!
//! Ends are extrapolated flat, never linearly, so a short record next to a
//! steep change cannot produce negative flows.

use serde::Serialize;
use tracing::{debug, warn};

use crate::domain::StationSeries;

/// What each pass repaired.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct GapReport {
    pub missing_before: usize,
    pub forward_filled: usize,
    pub backward_filled: usize,
    pub interpolated: usize,
    pub dropped: usize,
}

impl GapReport {
    pub fn filled(&self) -> usize {
        self.forward_filled + self.backward_filled + self.interpolated
    }
}

/// Fill every gap in `series` in place.
///
/// Afterwards the series has no missing values and is no longer than before.
/// A series without gaps is left untouched.
pub fn fill_gaps(series: &mut StationSeries) -> GapReport {
    let mut report = GapReport {
        missing_before: series.missing_count(),
        ..GapReport::default()
    };
    if report.missing_before == 0 {
        return report;
    }

    let points = series.points_mut();
    let first_valid = points.iter().position(|p| !p.is_missing());
    let last_valid = points.iter().rposition(|p| !p.is_missing());

    if let (Some(first), Some(last)) = (first_valid, last_valid) {
        // 1. Forward-fill the tail.
        let tail_value = points[last].value;
        for p in &mut points[last + 1..] {
            p.value = tail_value;
            report.forward_filled += 1;
        }

        // 2. Backward-fill the head.
        let head_value = points[first].value;
        for p in &mut points[..first] {
            p.value = head_value;
            report.backward_filled += 1;
        }

        // 3. Interpolate interior gaps between the nearest valid neighbours.
        let mut prev = first;
        for idx in first + 1..=last {
            if points[idx].is_missing() {
                continue;
            }
            if idx > prev + 1 {
                let (Some(y0), Some(y1)) = (points[prev].value, points[idx].value) else {
                    prev = idx;
                    continue;
                };
                let x0 = points[prev].date;
                let span = (points[idx].date - x0).num_days() as f64;
                for gap in &mut points[prev + 1..idx] {
                    let x = (gap.date - x0).num_days() as f64;
                    gap.value = Some(linear_interp((0.0, y0), (span, y1), x));
                    report.interpolated += 1;
                }
            }
            prev = idx;
        }
    }

    // 4. Drop what could not be repaired.
    let before = points.len();
    points.retain(|p| !p.is_missing());
    report.dropped = before - points.len();

    if report.dropped > 0 {
        warn!(
            "station {} has no valid values; dropped {} missing points",
            series.station(),
            report.dropped
        );
    }
    debug!("gap report: {report:?}");
    report
}

fn linear_interp(a: (f64, f64), b: (f64, f64), x: f64) -> f64 {
    let (x0, y0) = a;
    let (x1, y1) = b;
    if (x1 - x0).abs() < 1e-12 {
        return y0;
    }
    let u = (x - x0) / (x1 - x0);
    y0 + u * (y1 - y0)
}
