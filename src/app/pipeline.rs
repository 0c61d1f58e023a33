//! Shared pipeline logic used by both subcommands.
//!
//! Keeping this in one place avoids duplicating the core workflow:
//! locate -> extract -> window -> fill gaps -> CSV export -> plot -> summary
//!
//! The CLI front-end can then focus on presentation (printing).

use std::fs;
use std::path::{Path, PathBuf};

use tracing::{info, warn};

use crate::clean::fill_gaps;
use crate::data::explorador::REFERER_URL;
use crate::data::{
    Acquired, ArchiveProvider, ExploradorProvider, HelperProvider, LocalProvider, QueryDescriptor, SourceLocator,
    SourceProvider, browser_client,
};
use crate::domain::{PipelineConfig, StationAliases, StationSeries, StrategyKind};
use crate::error::{AppError, AttemptFailure, EXIT_INPUT, EXIT_NO_DATA};
use crate::io::{Extracted, apply_window, extract_station_series, read_series_csv, write_series_csv};
use crate::plot::render_series_png;
use crate::report::{SeriesSummary, describe};

/// Row errors echoed individually before the rest are only counted.
const MAX_LOGGED_ROW_ERRORS: usize = 5;

/// File name of the cached CAMELS-CL streamflow archive under the data directory.
const ARCHIVE_CACHE_NAME: &str = "camels_cl_streamflow.zip";

/// All computed outputs of a single run.
#[derive(Debug)]
pub struct RunOutput {
    /// Cleaned series (no missing values).
    pub series: StationSeries,
    pub summary: SeriesSummary,
    pub csv_path: PathBuf,
    pub plot_path: Option<PathBuf>,
    /// Strategies that failed before the winning one.
    pub earlier_failures: Vec<AttemptFailure>,
}

/// Build the configured providers, in configured order.
pub fn build_providers(config: &PipelineConfig) -> Result<Vec<Box<dyn SourceProvider>>, AppError> {
    let data_dir = config.data_dir();
    let client = browser_client(config.timeout_secs, REFERER_URL)?;

    let mut providers: Vec<Box<dyn SourceProvider>> = Vec::with_capacity(config.strategies.len());
    for kind in &config.strategies {
        let provider: Box<dyn SourceProvider> = match kind {
            StrategyKind::Helper => Box::new(HelperProvider::new(
                config.helper_command.clone(),
                config.workdir.clone(),
                config.helper_output_path(),
                config.station.clone(),
            )),
            StrategyKind::Api => {
                let descriptor = match &config.query_file {
                    Some(path) => QueryDescriptor::from_file(path, config.station.code(), &config.window)?,
                    None => QueryDescriptor::builtin(config.station.code(), &config.window),
                };
                let provider = ExploradorProvider::new(
                    client.clone(),
                    descriptor,
                    data_dir.clone(),
                    config.raw_cache_stem(),
                );
                match &config.api_url {
                    Some(url) => Box::new(provider.with_base_url(url.clone())),
                    None => Box::new(provider),
                }
            }
            StrategyKind::Archive => {
                let provider = ArchiveProvider::new(client.clone(), data_dir.join(ARCHIVE_CACHE_NAME));
                if config.archive_mirrors.is_empty() {
                    Box::new(provider)
                } else {
                    Box::new(provider.with_mirrors(config.archive_mirrors.clone()))
                }
            }
            StrategyKind::Local => Box::new(LocalProvider::new(data_dir.clone(), config.station.clone())),
        };
        providers.push(provider);
    }
    Ok(providers)
}

/// Execute the full pipeline and return the computed outputs.
pub fn run(config: &PipelineConfig) -> Result<RunOutput, AppError> {
    let data_dir = config.data_dir();
    fs::create_dir_all(&data_dir).map_err(|e| {
        AppError::new(
            EXIT_INPUT,
            format!("Failed to create data directory '{}': {e}", data_dir.display()),
        )
    })?;

    let locator = SourceLocator::new(build_providers(config)?);
    info!(
        "station {} ({}), aliases [{}]",
        config.station.name(),
        config.station.code(),
        config.station.aliases().join(", ")
    );
    let order: Vec<String> = locator.strategies().iter().map(|s| s.to_string()).collect();
    info!("acquisition order: {}", order.join(" -> "));

    // 1) Locate + extract: a payload that does not contain the station falls
    //    through to the next strategy.
    let acquired = locator.locate_with(|result| extract_station_series(result, &config.station))?;

    run_with_extracted(config, acquired)
}

/// Execute the pipeline from an already extracted series.
pub fn run_with_extracted(config: &PipelineConfig, acquired: Acquired<Extracted>) -> Result<RunOutput, AppError> {
    let Acquired {
        value: extracted,
        strategy,
        raw_bytes,
        earlier_failures,
    } = acquired;

    log_row_errors(&extracted);

    // 2) Restrict to the requested window (ignored if it would empty the series).
    let (mut series, window_applied) = apply_window(extracted.series, &config.window);
    let records_before = series.len();
    let missing_before = series.missing_count();

    // 3) Fill gaps.
    let gaps = fill_gaps(&mut series);
    if series.is_empty() {
        return Err(AppError::new(
            EXIT_NO_DATA,
            format!(
                "No usable values for station {} ({}) after cleaning.",
                config.station.name(),
                config.station.code()
            ),
        ));
    }

    // 4) Export.
    let csv_path = config.cleaned_csv_path();
    let bytes_after = write_series_csv(&csv_path, &series, &config.value_column)?;
    info!("wrote {} rows to {}", series.len(), csv_path.display());

    let plot_path = if config.plot {
        let path = config.plot_path();
        render_series_png(&path, &series, config.station.name(), config.plot_size)?;
        Some(path)
    } else {
        None
    };

    // 5) Summary.
    let summary = SeriesSummary {
        station_name: config.station.name().to_string(),
        station_code: config.station.code().to_string(),
        strategy: Some(strategy),
        source: format!("{} (column '{}')", extracted.source, extracted.column),
        records_before,
        records_after: series.len(),
        missing_before,
        bytes_before: raw_bytes,
        bytes_after,
        date_range: series.date_range(),
        stats: describe(&series),
        gaps,
        row_errors: extracted.row_errors.len(),
        duplicates: extracted.duplicates,
        window_applied,
    };

    Ok(RunOutput {
        series,
        summary,
        csv_path,
        plot_path,
        earlier_failures,
    })
}

/// Reload a cleaned CSV, re-render its plot at `output`, and summarize it.
pub fn replot(input: &Path, output: &Path, station: &StationAliases, size: (u32, u32)) -> Result<RunOutput, AppError> {
    let loaded = read_series_csv(input, station.code())?;
    let bytes_before = fs::metadata(input).map(|m| m.len()).unwrap_or(0);

    let mut series = loaded.series;
    let records_before = series.len();
    let missing_before = series.missing_count();
    let gaps = fill_gaps(&mut series);
    if series.is_empty() {
        return Err(AppError::new(
            EXIT_NO_DATA,
            format!("'{}' has no values to plot.", input.display()),
        ));
    }

    render_series_png(output, &series, station.name(), size)?;
    let bytes_after = fs::metadata(output).map(|m| m.len()).unwrap_or(0);

    let summary = SeriesSummary {
        station_name: station.name().to_string(),
        station_code: station.code().to_string(),
        strategy: None,
        source: format!("{} (column '{}')", input.display(), loaded.value_column),
        records_before,
        records_after: series.len(),
        missing_before,
        bytes_before,
        bytes_after,
        date_range: series.date_range(),
        stats: describe(&series),
        gaps,
        row_errors: 0,
        duplicates: 0,
        window_applied: true,
    };

    Ok(RunOutput {
        series,
        summary,
        csv_path: input.to_path_buf(),
        plot_path: Some(output.to_path_buf()),
        earlier_failures: Vec::new(),
    })
}

fn log_row_errors(extracted: &Extracted) {
    if extracted.row_errors.is_empty() {
        return;
    }
    warn!(
        "{}: skipped {} row(s) with unusable dates",
        extracted.source,
        extracted.row_errors.len()
    );
    for e in extracted.row_errors.iter().take(MAX_LOGGED_ROW_ERRORS) {
        warn!(
            "  line {}: {} ({})",
            e.line,
            e.message,
            e.raw.as_deref().unwrap_or("empty")
        );
    }
}
