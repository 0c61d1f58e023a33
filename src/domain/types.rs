//! Shared domain types.
//!
//! These types are intentionally kept small and plain so they can be:
//!
//! - passed between pipeline stages by value (single owner per run)
//! - exported to CSV and reloaded for plotting
//! - constructed directly in tests

use std::path::{Path, PathBuf};

use chrono::NaiveDate;
use clap::ValueEnum;
use serde::{Deserialize, Serialize};

use crate::domain::station::StationAliases;
use crate::error::AcquisitionFailure;

/// One daily observation. `value == None` is the explicit "missing" marker.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TimeSeriesPoint {
    pub date: NaiveDate,
    pub value: Option<f64>,
}

impl TimeSeriesPoint {
    pub fn new(date: NaiveDate, value: f64) -> Self {
        Self {
            date,
            value: Some(value),
        }
    }

    pub fn missing(date: NaiveDate) -> Self {
        Self { date, value: None }
    }

    pub fn is_missing(&self) -> bool {
        self.value.is_none()
    }
}

/// Ordered daily series for exactly one station.
///
/// Dates are strictly increasing (at most one point per calendar day). The
/// constructor enforces this; stages that mutate the series may only change
/// values or remove points, never reorder.
#[derive(Debug, Clone, PartialEq)]
pub struct StationSeries {
    station: String,
    points: Vec<TimeSeriesPoint>,
}

impl StationSeries {
    pub fn new(station: impl Into<String>, points: Vec<TimeSeriesPoint>) -> Result<Self, String> {
        if let Some(w) = points.windows(2).find(|w| w[1].date <= w[0].date) {
            return Err(format!(
                "dates must be strictly increasing ({} followed by {})",
                w[0].date, w[1].date
            ));
        }
        Ok(Self {
            station: station.into(),
            points,
        })
    }

    pub fn station(&self) -> &str {
        &self.station
    }

    pub fn points(&self) -> &[TimeSeriesPoint] {
        &self.points
    }

    /// Mutable access for in-place cleaning. Callers must not reorder points.
    pub(crate) fn points_mut(&mut self) -> &mut Vec<TimeSeriesPoint> {
        &mut self.points
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn missing_count(&self) -> usize {
        self.points.iter().filter(|p| p.is_missing()).count()
    }

    /// Present values in date order (missing points skipped).
    pub fn values(&self) -> Vec<f64> {
        self.points.iter().filter_map(|p| p.value).collect()
    }

    pub fn date_range(&self) -> Option<(NaiveDate, NaiveDate)> {
        Some((self.points.first()?.date, self.points.last()?.date))
    }

    /// Copy of the series restricted to `window` (inclusive on both ends).
    pub fn within(&self, window: &DateWindow) -> StationSeries {
        StationSeries {
            station: self.station.clone(),
            points: self
                .points
                .iter()
                .filter(|p| window.contains(p.date))
                .copied()
                .collect(),
        }
    }
}

/// Payload encodings the extractor understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PayloadFormat {
    /// XLSX/XLS/ODS workbook.
    Xlsx,
    /// Comma, semicolon, tab or whitespace separated text.
    Delimited,
    /// ZIP archive of delimited text (or workbooks).
    Zip,
}

impl PayloadFormat {
    pub fn extension(self) -> &'static str {
        match self {
            PayloadFormat::Xlsx => "xlsx",
            PayloadFormat::Delimited => "csv",
            PayloadFormat::Zip => "zip",
        }
    }

    /// Guess the format from a file extension.
    pub fn from_path(path: &Path) -> Option<Self> {
        let ext = path.extension()?.to_str()?.to_ascii_lowercase();
        match ext.as_str() {
            "xlsx" | "xlsm" | "xls" | "ods" => Some(PayloadFormat::Xlsx),
            "csv" | "txt" | "tsv" => Some(PayloadFormat::Delimited),
            "zip" => Some(PayloadFormat::Zip),
            _ => None,
        }
    }
}

/// Output of one acquisition strategy.
#[derive(Debug)]
pub enum AcquisitionResult {
    RawBytes {
        format: PayloadFormat,
        payload: Vec<u8>,
    },
    FilePath(PathBuf),
    Failure(AcquisitionFailure),
}

/// Acquisition strategies, tried in configured order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum StrategyKind {
    /// Run an external download helper (R + camelsCL).
    Helper,
    /// Call the CR2 explorador export API.
    Api,
    /// Download the CAMELS-CL streamflow archive.
    Archive,
    /// Look for a previously placed file in the data directory.
    Local,
}

impl StrategyKind {
    pub const DEFAULT_ORDER: [StrategyKind; 4] = [
        StrategyKind::Helper,
        StrategyKind::Api,
        StrategyKind::Archive,
        StrategyKind::Local,
    ];

    pub fn display_name(self) -> &'static str {
        match self {
            StrategyKind::Helper => "download helper",
            StrategyKind::Api => "explorador API",
            StrategyKind::Archive => "CAMELS-CL archive",
            StrategyKind::Local => "local data directory",
        }
    }
}

impl std::fmt::Display for StrategyKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.display_name())
    }
}

/// Inclusive calendar window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DateWindow {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl DateWindow {
    pub fn contains(&self, date: NaiveDate) -> bool {
        date >= self.start && date <= self.end
    }

    /// Unix epoch seconds (UTC) covering the whole window: start-of-day to end-of-day.
    pub fn epoch_range(&self) -> (i64, i64) {
        let epoch = |date: NaiveDate, h, m, s| {
            date.and_hms_opt(h, m, s)
                .map(|dt| dt.and_utc().timestamp())
                .unwrap_or_default()
        };
        (epoch(self.start, 0, 0, 0), epoch(self.end, 23, 59, 59))
    }
}

/// Resolved configuration for one pipeline run.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub station: StationAliases,
    pub strategies: Vec<StrategyKind>,
    pub workdir: PathBuf,
    pub window: DateWindow,
    pub query_file: Option<PathBuf>,
    /// Explorador endpoint override.
    pub api_url: Option<String>,
    /// Archive mirror override; empty means the built-in list.
    pub archive_mirrors: Vec<String>,
    pub helper_command: String,
    pub timeout_secs: u64,
    pub value_column: String,
    pub plot: bool,
    pub plot_size: (u32, u32),
    pub ascii: bool,
    pub ascii_width: usize,
    pub ascii_height: usize,
}

impl PipelineConfig {
    pub fn data_dir(&self) -> PathBuf {
        self.workdir.join("data")
    }

    pub fn cleaned_csv_path(&self) -> PathBuf {
        self.workdir
            .join(format!("{}_streamflow_cleaned.csv", self.station.slug()))
    }

    pub fn plot_path(&self) -> PathBuf {
        self.workdir
            .join(format!("{}_streamflow_plot.png", self.station.slug()))
    }

    /// File stem for cached remote payloads; the extension follows the payload format.
    pub fn raw_cache_stem(&self) -> String {
        format!("{}_raw", self.station.slug())
    }

    pub fn helper_output_path(&self) -> PathBuf {
        self.data_dir()
            .join(format!("{}_helper_raw.csv", self.station.slug()))
    }
}
