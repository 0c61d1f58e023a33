//! Reporting: run summary statistics and their terminal formatting.

pub mod format;

pub use format::*;

use chrono::NaiveDate;
use serde::Serialize;

use crate::clean::GapReport;
use crate::domain::{StationSeries, StrategyKind};

/// Descriptive statistics of a series' present values.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct SeriesStats {
    pub n: usize,
    pub min: f64,
    pub max: f64,
    pub mean: f64,
    pub median: f64,
}

/// Everything the run reports once outputs are written.
#[derive(Debug, Clone, Serialize)]
pub struct SeriesSummary {
    pub station_name: String,
    pub station_code: String,
    /// Strategy that produced the data (`None` when re-plotting an existing CSV).
    pub strategy: Option<StrategyKind>,
    pub source: String,
    pub records_before: usize,
    pub records_after: usize,
    pub missing_before: usize,
    pub bytes_before: u64,
    pub bytes_after: u64,
    pub date_range: Option<(NaiveDate, NaiveDate)>,
    pub stats: Option<SeriesStats>,
    pub gaps: GapReport,
    pub row_errors: usize,
    pub duplicates: usize,
    /// Whether the configured date window was applied (false when it would
    /// have removed every point).
    pub window_applied: bool,
}

/// Compute min/max/mean/median over present values. `None` if there are none.
pub fn describe(series: &StationSeries) -> Option<SeriesStats> {
    let mut values = series.values();
    if values.is_empty() {
        return None;
    }
    values.sort_by(|a, b| a.total_cmp(b));

    let n = values.len();
    let mean = values.iter().sum::<f64>() / n as f64;
    let median = if n % 2 == 1 {
        values[n / 2]
    } else {
        (values[n / 2 - 1] + values[n / 2]) / 2.0
    };

    Some(SeriesStats {
        n,
        min: values[0],
        max: values[n - 1],
        mean,
        median,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::TimeSeriesPoint;

    fn series(values: &[Option<f64>]) -> StationSeries {
        let start = NaiveDate::from_ymd_opt(2020, 1, 1).unwrap();
        let points = values
            .iter()
            .enumerate()
            .map(|(i, v)| TimeSeriesPoint {
                date: start + chrono::Days::new(i as u64),
                value: *v,
            })
            .collect();
        StationSeries::new("x", points).unwrap()
    }

    #[test]
    fn describe_basic() {
        let stats = describe(&series(&[Some(4.0), Some(1.0), None, Some(3.0), Some(2.0)])).unwrap();
        assert_eq!(stats.n, 4);
        assert_eq!(stats.min, 1.0);
        assert_eq!(stats.max, 4.0);
        assert_eq!(stats.mean, 2.5);
        assert_eq!(stats.median, 2.5);
    }

    #[test]
    fn describe_odd_count_median() {
        let stats = describe(&series(&[Some(10.0), Some(-1.0), Some(7.0)])).unwrap();
        assert_eq!(stats.median, 7.0);
    }

    #[test]
    fn describe_empty_is_none() {
        assert!(describe(&series(&[None, None])).is_none());
    }
}
