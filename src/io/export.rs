//! Export the cleaned series to CSV (and read it back).
//!
//! Every output goes through a temporary file in the destination directory
//! that is renamed into place, so readers never observe a partial file.

use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::NaiveDate;
use tempfile::NamedTempFile;

use crate::domain::{StationSeries, TimeSeriesPoint};
use crate::error::{AppError, EXIT_INPUT, ExportError};

/// Default header for the value column.
pub const DEFAULT_VALUE_COLUMN: &str = "streamflow_m3s";

/// Create a temporary file next to `path` (same directory, so the final rename
/// stays on one filesystem). `suffix` matters to writers that infer the
/// format from the extension.
pub(crate) fn temp_sibling(path: &Path, suffix: &str) -> Result<NamedTempFile, ExportError> {
    let dir = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    fs::create_dir_all(dir).map_err(|source| ExportError::Io {
        path: dir.to_path_buf(),
        source,
    })?;
    tempfile::Builder::new()
        .prefix(".streamflow-")
        .suffix(suffix)
        .tempfile_in(dir)
        .map_err(|source| ExportError::Io {
            path: dir.to_path_buf(),
            source,
        })
}

pub(crate) fn persist(tmp: NamedTempFile, path: &Path) -> Result<(), ExportError> {
    tmp.persist(path).map_err(|e| ExportError::Io {
        path: path.to_path_buf(),
        source: e.error,
    })?;
    Ok(())
}

/// Write `bytes` to `path` atomically.
pub fn write_atomic(path: &Path, bytes: &[u8]) -> Result<(), ExportError> {
    let mut tmp = temp_sibling(path, ".tmp")?;
    tmp.write_all(bytes)
        .and_then(|()| tmp.as_file().sync_all())
        .map_err(|source| ExportError::Io {
            path: path.to_path_buf(),
            source,
        })?;
    persist(tmp, path)
}

/// Write the series as `date,<value_column>` rows. Returns the file size in bytes.
///
/// Values use the shortest representation that parses back to the same `f64`.
pub fn write_series_csv(path: &Path, series: &StationSeries, value_column: &str) -> Result<u64, ExportError> {
    let csv_err = |source: csv::Error| ExportError::Csv {
        path: path.to_path_buf(),
        source,
    };
    let io_err = |source: std::io::Error| ExportError::Io {
        path: path.to_path_buf(),
        source,
    };

    let mut tmp = temp_sibling(path, ".csv")?;
    {
        let mut writer = csv::Writer::from_writer(tmp.as_file_mut());
        writer.write_record(["date", value_column]).map_err(csv_err)?;
        for p in series.points() {
            let value = p.value.map(|v| v.to_string()).unwrap_or_default();
            writer
                .write_record([p.date.to_string(), value])
                .map_err(csv_err)?;
        }
        writer.flush().map_err(io_err)?;
    }
    tmp.as_file().sync_all().map_err(io_err)?;
    let size = tmp.as_file().metadata().map_err(io_err)?.len();

    persist(tmp, path)?;
    Ok(size)
}

/// A cleaned series loaded back from disk.
#[derive(Debug, Clone)]
pub struct SeriesCsv {
    pub path: PathBuf,
    pub value_column: String,
    pub series: StationSeries,
}

/// Read a file written by [`write_series_csv`].
pub fn read_series_csv(path: &Path, station: &str) -> Result<SeriesCsv, AppError> {
    let file = File::open(path).map_err(|e| {
        AppError::new(
            EXIT_INPUT,
            format!("Failed to open CSV '{}': {e}", path.display()),
        )
    })?;

    let mut reader = csv::ReaderBuilder::new()
        .flexible(true)
        .trim(csv::Trim::All)
        .from_reader(file);

    let headers = reader
        .headers()
        .map_err(|e| AppError::new(EXIT_INPUT, format!("Failed to read CSV headers: {e}")))?
        .clone();
    let date_header = headers.get(0).map(|h| h.trim_start_matches('\u{feff}'));
    if headers.len() < 2 || date_header != Some("date") {
        return Err(AppError::new(
            EXIT_INPUT,
            format!(
                "'{}' is not a cleaned series: expected header `date,<value column>`.",
                path.display()
            ),
        ));
    }
    let value_column = headers.get(1).unwrap_or(DEFAULT_VALUE_COLUMN).to_string();

    let mut points = Vec::new();
    for (idx, result) in reader.records().enumerate() {
        // +2: records() starts after the header and lines are 1-based.
        let line = idx + 2;
        let record = result
            .map_err(|e| AppError::new(EXIT_INPUT, format!("CSV parse error on line {line}: {e}")))?;

        let date_text = record.get(0).unwrap_or("");
        let date = NaiveDate::parse_from_str(date_text, "%Y-%m-%d").map_err(|_| {
            AppError::new(
                EXIT_INPUT,
                format!("Invalid date '{date_text}' on line {line} (expected YYYY-MM-DD)."),
            )
        })?;

        let value = match record.get(1).unwrap_or("") {
            "" => None,
            text => Some(text.parse::<f64>().map_err(|_| {
                AppError::new(
                    EXIT_INPUT,
                    format!("Invalid value '{text}' on line {line}."),
                )
            })?),
        };
        points.push(TimeSeriesPoint { date, value });
    }

    let series = StationSeries::new(station, points).map_err(|e| {
        AppError::new(EXIT_INPUT, format!("'{}': {e}", path.display()))
    })?;

    Ok(SeriesCsv {
        path: path.to_path_buf(),
        value_column,
        series,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn d(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).unwrap()
    }

    fn leftover_temps(dir: &Path) -> usize {
        fs::read_dir(dir)
            .unwrap()
            .flatten()
            .filter(|e| e.file_name().to_string_lossy().starts_with(".streamflow-"))
            .count()
    }

    #[test]
    fn csv_round_trip_is_exact() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out").join("rinihue_streamflow_cleaned.csv");
        let series = StationSeries::new(
            "10111001",
            vec![
                TimeSeriesPoint::new(d(1960, 1, 1), 0.1 + 0.2),
                TimeSeriesPoint::new(d(1960, 1, 2), 15.0),
                TimeSeriesPoint::new(d(1960, 1, 3), 1e-7),
                TimeSeriesPoint::new(d(1960, 1, 4), 123_456.789_012_345_6),
            ],
        )
        .unwrap();

        let size = write_series_csv(&path, &series, DEFAULT_VALUE_COLUMN).unwrap();
        assert_eq!(size, fs::metadata(&path).unwrap().len());

        let text = fs::read_to_string(&path).unwrap();
        assert!(text.starts_with("date,streamflow_m3s\n1960-01-01,0.30000000000000004\n1960-01-02,15\n"));

        let back = read_series_csv(&path, "10111001").unwrap();
        assert_eq!(back.value_column, DEFAULT_VALUE_COLUMN);
        assert_eq!(back.series, series);
        assert_eq!(leftover_temps(path.parent().unwrap()), 0);
    }

    #[test]
    fn atomic_write_replaces_existing_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("raw.zip");
        write_atomic(&path, b"old contents").unwrap();
        write_atomic(&path, b"new").unwrap();
        assert_eq!(fs::read(&path).unwrap(), b"new");
        assert_eq!(leftover_temps(dir.path()), 0);
    }

    #[test]
    fn read_rejects_foreign_csv() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("x.csv");
        fs::write(&path, "id,value\n1,2\n").unwrap();
        let err = read_series_csv(&path, "x").unwrap_err();
        assert_eq!(err.exit_code(), EXIT_INPUT);
        assert!(err.to_string().contains("expected header"));
    }

    #[test]
    fn read_reports_bad_line() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("x.csv");
        fs::write(&path, "date,q\n2020-01-01,1\n2020-13-01,2\n").unwrap();
        let err = read_series_csv(&path, "x").unwrap_err();
        assert!(err.to_string().contains("line 3"), "{err}");
    }

    #[test]
    fn missing_file_is_an_input_error() {
        let err = read_series_csv(Path::new("/definitely/not/here.csv"), "x").unwrap_err();
        assert_eq!(err.exit_code(), EXIT_INPUT);
    }
}
