//! Raw table extraction.
//!
//! This module is responsible for turning whatever a source returned
//! (delimited text, a workbook, or a ZIP of either) into a clean
//! [`StationSeries`] for the configured station.
//!
//! Design goals:
//! - **Format sniffing** from magic bytes first, the extension/hint second
//! - **Row-level validation** (skip rows with bad dates, but report them)
//! - **Deterministic behavior** (sorted output, first duplicate wins)
//! - **Streaming rows**: only the header scan is buffered, so wide archive
//!   tables with hundreds of stations are never materialized as cells

use std::fs;
use std::io::{Cursor, Read};

use calamine::{Data, Reader};
use chrono::{DateTime, Days, NaiveDate};
use tracing::{debug, info, warn};

use crate::domain::station::normalize;
use crate::domain::{
    AcquisitionResult, DateWindow, PayloadFormat, StationAliases, StationSeries, TimeSeriesPoint,
};
use crate::error::ExtractError;

/// Rows scanned from the top of a table when looking for the header row.
const HEADER_SCAN_ROWS: usize = 10;

/// Largest Excel serial day number (9999-12-31).
const EXCEL_SERIAL_MAX: f64 = 2_958_465.0;

/// Sentinel used by several hydrometric exports for "no reading".
const MISSING_SENTINEL: f64 = -9999.0;

const MISSING_TOKENS: [&str; 7] = ["", "na", "nan", "n/a", "null", "-", "."];

/// Candidate columns listed in a "station not found" error.
const MAX_CANDIDATES: usize = 25;

/// A single spreadsheet or text cell before interpretation.
#[derive(Debug, Clone, PartialEq)]
pub enum Cell {
    Empty,
    Number(f64),
    Text(String),
}

impl Cell {
    fn from_text(s: &str) -> Self {
        let s = s.trim();
        if s.is_empty() {
            Cell::Empty
        } else {
            Cell::Text(s.to_string())
        }
    }

    fn from_data(data: &Data) -> Self {
        match data {
            Data::Empty | Data::Error(_) => Cell::Empty,
            Data::Int(i) => Cell::Number(*i as f64),
            Data::Float(f) => Cell::Number(*f),
            Data::DateTime(dt) => Cell::Number(dt.as_f64()),
            Data::String(s) | Data::DateTimeIso(s) | Data::DurationIso(s) => Cell::from_text(s),
            Data::Bool(b) => Cell::Text(b.to_string()),
        }
    }

    pub fn is_empty(&self) -> bool {
        matches!(self, Cell::Empty)
    }

    /// Text used when the cell is read as a column header.
    ///
    /// Whole numbers print without a fraction so that a workbook header holding
    /// the station code `10111001` reads the same as its CSV counterpart.
    pub fn label(&self) -> String {
        match self {
            Cell::Empty => String::new(),
            Cell::Number(n) if n.fract() == 0.0 && n.abs() < 1e15 => format!("{}", *n as i64),
            Cell::Number(n) => n.to_string(),
            Cell::Text(s) => s.clone(),
        }
    }

    fn raw(&self) -> Option<String> {
        match self {
            Cell::Empty => None,
            _ => Some(self.label()),
        }
    }
}

/// One table row with its 1-based line (or spreadsheet row) number.
#[derive(Debug, Clone)]
struct RawRow {
    line: usize,
    cells: Vec<Cell>,
}

/// A row-level error encountered during extraction.
#[derive(Debug, Clone)]
pub struct RowError {
    pub line: usize,
    /// Raw contents of the offending cell, when there was one.
    pub raw: Option<String>,
    pub message: String,
}

/// Extraction output: the station series plus what happened along the way.
#[derive(Debug, Clone)]
pub struct Extracted {
    pub series: StationSeries,
    /// Header of the column the values were taken from.
    pub column: String,
    /// Human-readable origin (file, sheet, or archive entry).
    pub source: String,
    pub row_errors: Vec<RowError>,
    /// Rows dropped because their date was already seen.
    pub duplicates: usize,
    /// Non-blank data rows below the header.
    pub rows_read: usize,
}

/// Turn a successful acquisition into the station's series.
pub fn extract_station_series(
    result: AcquisitionResult,
    station: &StationAliases,
) -> Result<Extracted, ExtractError> {
    match result {
        AcquisitionResult::RawBytes { format, payload } => {
            extract_bytes(&payload, Some(format), "downloaded payload", station)
        }
        AcquisitionResult::FilePath(path) => {
            let bytes = fs::read(&path).map_err(|source| ExtractError::Io {
                path: path.clone(),
                source,
            })?;
            let name = path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_else(|| path.display().to_string());
            extract_bytes(&bytes, PayloadFormat::from_path(&path), &name, station)
        }
        AcquisitionResult::Failure(reason) => Err(ExtractError::unsupported(format!(
            "nothing to extract: {reason}"
        ))),
    }
}

/// Restrict `series` to `window`.
///
/// Returns the series and whether the window was applied. A window that
/// would remove every point is ignored with a warning.
pub fn apply_window(series: StationSeries, window: &DateWindow) -> (StationSeries, bool) {
    let cut = series.within(window);
    if cut.is_empty() && !series.is_empty() {
        if let Some((first, last)) = series.date_range() {
            warn!(
                "no observations between {} and {} (data covers {first}..{last}); keeping the full series",
                window.start, window.end
            );
        }
        return (series, false);
    }
    (cut, true)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Sniffed {
    Delimited,
    Workbook,
    Zip,
}

fn sniff(bytes: &[u8], hint: Option<PayloadFormat>) -> Sniffed {
    const ZIP_MAGIC: &[u8] = b"PK\x03\x04";
    const OLE_MAGIC: &[u8] = b"\xD0\xCF\x11\xE0";

    if bytes.starts_with(ZIP_MAGIC) {
        return Sniffed::Zip;
    }
    if bytes.starts_with(OLE_MAGIC) {
        return Sniffed::Workbook;
    }
    match hint {
        Some(PayloadFormat::Xlsx) => Sniffed::Workbook,
        Some(PayloadFormat::Zip) => Sniffed::Zip,
        Some(PayloadFormat::Delimited) | None => Sniffed::Delimited,
    }
}

fn extract_bytes(
    bytes: &[u8],
    hint: Option<PayloadFormat>,
    name: &str,
    station: &StationAliases,
) -> Result<Extracted, ExtractError> {
    let kind = sniff(bytes, hint);
    debug!("{name}: {} bytes, treated as {kind:?}", bytes.len());
    match kind {
        Sniffed::Delimited => extract_delimited(bytes, name, station),
        Sniffed::Workbook => extract_workbook(bytes, name, station),
        Sniffed::Zip => extract_zip(bytes, name, station),
    }
}

/// Collects per-table misses so the final error can list every candidate column.
#[derive(Default)]
struct Misses {
    candidates: Vec<String>,
    last: Option<ExtractError>,
}

impl Misses {
    fn record(&mut self, err: ExtractError) {
        debug!("table skipped: {err}");
        match err {
            ExtractError::StationNotFound { candidates, .. } => {
                for c in candidates {
                    if !self.candidates.contains(&c) {
                        self.candidates.push(c);
                    }
                }
            }
            other => self.last = Some(other),
        }
    }

    fn into_error(self, station: &StationAliases, what: &str) -> ExtractError {
        if !self.candidates.is_empty() {
            return not_found(station, self.candidates);
        }
        self.last
            .unwrap_or_else(|| ExtractError::unsupported(format!("{what}: no readable tables")))
    }
}

fn not_found(station: &StationAliases, mut candidates: Vec<String>) -> ExtractError {
    if candidates.len() > MAX_CANDIDATES {
        let more = candidates.len() - MAX_CANDIDATES;
        candidates.truncate(MAX_CANDIDATES);
        candidates.push(format!("... and {more} more"));
    }
    ExtractError::StationNotFound {
        aliases: station.aliases().to_vec(),
        candidates,
    }
}

// ---------------------------------------------------------------------------
// Delimited text
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Delimiter {
    Byte(u8),
    /// Runs of spaces/tabs (CAMELS `.txt` layout).
    Whitespace,
}

/// UTF-8 (BOM stripped) with a Latin-1 fallback.
fn decode_text(bytes: &[u8]) -> String {
    let bytes = bytes.strip_prefix(b"\xEF\xBB\xBF").unwrap_or(bytes);
    match std::str::from_utf8(bytes) {
        Ok(s) => s.to_string(),
        Err(_) => bytes.iter().map(|&b| b as char).collect(),
    }
}

fn sniff_delimiter(text: &str) -> Delimiter {
    let head: Vec<&str> = text
        .lines()
        .filter(|l| !l.trim().is_empty())
        .take(HEADER_SCAN_ROWS)
        .collect();

    let mut best = (b',', 0usize);
    for delim in [b',', b';', b'\t'] {
        let count: usize = head
            .iter()
            .map(|l| l.bytes().filter(|&b| b == delim).count())
            .sum();
        if count > best.1 {
            best = (delim, count);
        }
    }
    if best.1 > 0 {
        return Delimiter::Byte(best.0);
    }
    if head.iter().any(|l| l.split_whitespace().count() > 1) {
        Delimiter::Whitespace
    } else {
        Delimiter::Byte(b',')
    }
}

fn extract_delimited(bytes: &[u8], name: &str, station: &StationAliases) -> Result<Extracted, ExtractError> {
    let mut text = decode_text(bytes);
    let delimiter = sniff_delimiter(&text);
    let byte = match delimiter {
        Delimiter::Byte(b) => b,
        Delimiter::Whitespace => {
            text = text
                .lines()
                .map(|l| l.split_whitespace().collect::<Vec<_>>().join("\t"))
                .collect::<Vec<_>>()
                .join("\n");
            b'\t'
        }
    };
    debug!("{name}: delimiter {delimiter:?}");

    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .trim(csv::Trim::All)
        .delimiter(byte)
        .from_reader(text.as_bytes());

    let rows = reader.records().enumerate().map(|(idx, result)| {
        let fallback_line = idx + 1;
        match result {
            Ok(record) => Ok(RawRow {
                line: record
                    .position()
                    .map(|p| p.line() as usize)
                    .unwrap_or(fallback_line),
                cells: record.iter().map(Cell::from_text).collect(),
            }),
            Err(e) => Err(RowError {
                line: e
                    .position()
                    .map(|p| p.line() as usize)
                    .unwrap_or(fallback_line),
                raw: None,
                message: format!("CSV parse error: {e}"),
            }),
        }
    });

    extract_rows(stem(name), name, byte != b',', rows, station)
}

// ---------------------------------------------------------------------------
// Workbooks
// ---------------------------------------------------------------------------

fn extract_workbook(bytes: &[u8], name: &str, station: &StationAliases) -> Result<Extracted, ExtractError> {
    let mut workbook = calamine::open_workbook_auto_from_rs(Cursor::new(bytes))
        .map_err(|e| ExtractError::unsupported(format!("{name}: not a readable workbook: {e}")))?;

    let mut sheets = workbook.sheet_names();
    if sheets.is_empty() {
        return Err(ExtractError::unsupported(format!("{name}: workbook has no sheets")));
    }
    // A sheet named for the station goes first; the rest keep workbook order.
    sheets.sort_by_key(|s| !station.matches(s));

    let mut misses = Misses::default();
    for sheet in sheets {
        let range = match workbook.worksheet_range(&sheet) {
            Ok(range) => range,
            Err(e) => {
                misses.record(ExtractError::unsupported(format!("{name}[{sheet}]: {e}")));
                continue;
            }
        };
        let first_row = range.start().map(|(r, _)| r as usize).unwrap_or(0);
        let rows = range.rows().enumerate().map(|(idx, row)| {
            Ok(RawRow {
                line: first_row + idx + 1,
                cells: row.iter().map(Cell::from_data).collect(),
            })
        });

        // Text cells in Spanish-locale workbooks use decimal commas.
        match extract_rows(&sheet, &format!("{name}[{sheet}]"), true, rows, station) {
            Ok(found) => return Ok(found),
            Err(e) => misses.record(e),
        }
    }
    Err(misses.into_error(station, name))
}

// ---------------------------------------------------------------------------
// ZIP archives
// ---------------------------------------------------------------------------

fn is_workbook_entry(name: &str) -> bool {
    let lower = name.to_ascii_lowercase();
    [".xlsx", ".xlsm", ".xls", ".ods"].iter().any(|ext| lower.ends_with(ext))
}

fn is_text_entry(name: &str) -> bool {
    let lower = name.to_ascii_lowercase();
    [".csv", ".txt", ".tsv"].iter().any(|ext| lower.ends_with(ext))
}

fn extract_zip(bytes: &[u8], name: &str, station: &StationAliases) -> Result<Extracted, ExtractError> {
    let mut archive = zip::ZipArchive::new(Cursor::new(bytes))
        .map_err(|e| ExtractError::unsupported(format!("{name}: not a readable ZIP archive: {e}")))?;

    // XLSX and ODS files are ZIP containers themselves.
    if archive
        .file_names()
        .any(|n| n == "xl/workbook.xml" || n == "content.xml")
    {
        return extract_workbook(bytes, name, station);
    }

    let mut entries: Vec<(usize, String)> = Vec::new();
    for idx in 0..archive.len() {
        let Ok(file) = archive.by_index(idx) else {
            continue;
        };
        let entry = file.name().to_string();
        if !file.is_dir() && (is_text_entry(&entry) || is_workbook_entry(&entry)) {
            entries.push((idx, entry));
        }
    }
    if entries.is_empty() {
        return Err(ExtractError::unsupported(format!(
            "{name}: archive holds no .csv, .txt or .xlsx entries"
        )));
    }
    // Entries named after the station first (stable, so archive order otherwise).
    entries.sort_by_key(|(_, entry)| !station.matches(stem(entry)));

    let mut misses = Misses::default();
    for (idx, entry) in entries {
        let mut contents = Vec::new();
        let read = archive
            .by_index(idx)
            .map_err(|e| e.to_string())
            .and_then(|mut f| f.read_to_end(&mut contents).map_err(|e| e.to_string()));
        if let Err(e) = read {
            misses.record(ExtractError::unsupported(format!("{name}/{entry}: {e}")));
            continue;
        }

        let label = format!("{name}/{entry}");
        let outcome = if is_workbook_entry(&entry) {
            extract_workbook(&contents, &label, station)
        } else {
            extract_delimited(&contents, &label, station)
        };
        match outcome {
            Ok(found) => return Ok(found),
            Err(e) => misses.record(e),
        }
    }
    Err(misses.into_error(station, name))
}

/// `dir/10111001.csv` -> `10111001`
fn stem(name: &str) -> &str {
    let base = name.rsplit('/').next().unwrap_or(name);
    base.rsplit_once('.').map(|(s, _)| s).unwrap_or(base)
}

// ---------------------------------------------------------------------------
// Column location and row parsing
// ---------------------------------------------------------------------------

fn is_date_header(label: &str) -> bool {
    let n = normalize(label);
    n == "dia"
        || ["date", "fecha", "time", "gaugeid"]
            .iter()
            .any(|k| n.contains(k))
}

/// First date-like header, or column 0.
fn find_date_column(labels: &[String]) -> usize {
    labels.iter().position(|l| is_date_header(l)).unwrap_or(0)
}

/// Header row index, date column, value column.
fn locate_columns(
    head: &[RawRow],
    station: &StationAliases,
    named_for_station: bool,
) -> Option<(usize, usize, usize)> {
    for (idx, row) in head.iter().enumerate() {
        let mut labels: Vec<String> = row.cells.iter().map(Cell::label).collect();
        let date_col = find_date_column(&labels);
        if let Some(label) = labels.get_mut(date_col) {
            label.clear();
        }
        if let Some(col) = station.find_column(&labels) {
            return Some((idx, date_col, col));
        }
    }

    if named_for_station {
        // The table itself is the station's: take its first value column.
        let idx = head
            .iter()
            .position(|r| r.cells.iter().any(|c| !c.is_empty()))?;
        let labels: Vec<String> = head[idx].cells.iter().map(Cell::label).collect();
        let date_col = find_date_column(&labels);
        let col = (0..labels.len()).find(|&c| c != date_col)?;
        return Some((idx, date_col, col));
    }
    None
}

fn extract_rows<I>(
    title: &str,
    source: &str,
    decimal_comma: bool,
    rows: I,
    station: &StationAliases,
) -> Result<Extracted, ExtractError>
where
    I: Iterator<Item = Result<RawRow, RowError>>,
{
    let mut rows = rows;
    let mut row_errors = Vec::new();

    let mut head = Vec::with_capacity(HEADER_SCAN_ROWS);
    while head.len() < HEADER_SCAN_ROWS {
        match rows.next() {
            Some(Ok(row)) => head.push(row),
            Some(Err(e)) => row_errors.push(e),
            None => break,
        }
    }

    let named = station.matches(title);
    let Some((header_idx, date_col, value_col)) = locate_columns(&head, station, named) else {
        let candidates = head
            .iter()
            .find(|r| r.cells.iter().any(|c| !c.is_empty()))
            .map(|r| {
                r.cells
                    .iter()
                    .map(Cell::label)
                    .filter(|l| !l.is_empty())
                    .collect()
            })
            .unwrap_or_default();
        return Err(not_found(station, candidates));
    };

    let column = head[header_idx]
        .cells
        .get(value_col)
        .map(Cell::label)
        .filter(|l| !l.is_empty())
        .unwrap_or_else(|| format!("column {}", value_col + 1));
    debug!("{source}: header on line {}, value column '{column}'", head[header_idx].line);

    let mut points = Vec::new();
    let mut rows_read = 0usize;
    let body = head
        .into_iter()
        .skip(header_idx + 1)
        .map(Ok)
        .chain(rows);

    for row in body {
        let row = match row {
            Ok(row) => row,
            Err(e) => {
                row_errors.push(e);
                continue;
            }
        };
        if row.cells.iter().all(Cell::is_empty) {
            continue;
        }
        rows_read += 1;

        let date_cell = row.cells.get(date_col).unwrap_or(&Cell::Empty);
        let date = match parse_date_cell(date_cell) {
            Ok(d) => d,
            Err(message) => {
                row_errors.push(RowError {
                    line: row.line,
                    raw: date_cell.raw(),
                    message,
                });
                continue;
            }
        };
        let value = row
            .cells
            .get(value_col)
            .and_then(|c| parse_value_cell(c, decimal_comma));
        points.push(TimeSeriesPoint { date, value });
    }

    if points.is_empty() {
        return Err(ExtractError::unsupported(format!(
            "{source}: no dated rows under column '{column}'"
        )));
    }

    // Stable sort keeps file order among equal dates, so dedup keeps the first.
    points.sort_by_key(|p| p.date);
    let before = points.len();
    points.dedup_by_key(|p| p.date);
    let duplicates = before - points.len();

    let series = StationSeries::new(station.code(), points).map_err(ExtractError::unsupported)?;
    info!(
        "extracted {} points from {source} (column '{column}', {} row errors, {duplicates} duplicates)",
        series.len(),
        row_errors.len()
    );

    Ok(Extracted {
        series,
        column,
        source: source.to_string(),
        row_errors,
        duplicates,
        rows_read,
    })
}

/// Parse a date cell into a calendar date.
///
/// Accepted encodings:
/// - ISO `YYYY-MM-DD` (optionally followed by a time), `YYYY/MM/DD`,
///   `DD/MM/YYYY`, `DD-MM-YYYY`
/// - Excel serial day numbers in `[1, 2958465]` (1900 system)
/// - Unix epoch seconds for any other number (UTC)
pub fn parse_date_cell(cell: &Cell) -> Result<NaiveDate, String> {
    match cell {
        Cell::Empty => Err("missing date".to_string()),
        Cell::Number(n) => date_from_number(*n),
        Cell::Text(s) => parse_date_text(s),
    }
}

fn parse_date_text(s: &str) -> Result<NaiveDate, String> {
    const FMTS: [&str; 4] = ["%Y-%m-%d", "%Y/%m/%d", "%d/%m/%Y", "%d-%m-%Y"];

    let s = s.trim().trim_matches('"');
    let day_part = s.get(..10).unwrap_or(s);
    for candidate in [s, day_part] {
        for fmt in FMTS {
            if let Ok(d) = NaiveDate::parse_from_str(candidate, fmt) {
                return Ok(d);
            }
        }
    }
    if let Ok(n) = s.parse::<f64>() {
        return date_from_number(n);
    }
    Err(format!(
        "invalid date '{s}'. Expected YYYY-MM-DD, DD/MM/YYYY, an Excel serial, or epoch seconds."
    ))
}

fn date_from_number(n: f64) -> Result<NaiveDate, String> {
    if !n.is_finite() {
        return Err(format!("invalid date number {n}"));
    }
    if (1.0..=EXCEL_SERIAL_MAX).contains(&n) {
        let serial = n.floor() as u64;
        // The 1900 system counts a 1900-02-29 that never existed (serial 60),
        // so earlier serials sit one day closer to the epoch.
        let epoch = match serial {
            60 => return Err("Excel serial 60 is the nonexistent 1900-02-29".to_string()),
            s if s < 60 => NaiveDate::from_ymd_opt(1899, 12, 31),
            _ => NaiveDate::from_ymd_opt(1899, 12, 30),
        };
        return epoch
            .and_then(|epoch| epoch.checked_add_days(Days::new(serial)))
            .ok_or_else(|| format!("Excel serial {n} out of range"));
    }
    DateTime::from_timestamp(n.floor() as i64, 0)
        .map(|dt| dt.date_naive())
        .ok_or_else(|| format!("epoch seconds {n} out of range"))
}

/// Parse a value cell. `None` means missing.
pub fn parse_value_cell(cell: &Cell, decimal_comma: bool) -> Option<f64> {
    let v = match cell {
        Cell::Empty => return None,
        Cell::Number(n) => *n,
        Cell::Text(s) => {
            let t = s.trim().trim_matches('"');
            if MISSING_TOKENS.contains(&t.to_ascii_lowercase().as_str()) {
                return None;
            }
            if decimal_comma {
                t.replace(',', ".").parse::<f64>().ok()?
            } else {
                t.parse::<f64>().ok()?
            }
        }
    };
    if !v.is_finite() || v == MISSING_SENTINEL {
        None
    } else {
        Some(v)
    }
}
