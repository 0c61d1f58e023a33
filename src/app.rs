//! Top-level application orchestration.
//!
//! `src/main.rs` is intentionally tiny; this module is the "real main" that:
//! - loads `.env` and parses CLI arguments
//! - initializes logging
//! - resolves a `PipelineConfig`
//! - runs the pipeline and prints the summary (and optional ASCII plot)

use clap::Parser;
use tracing::debug;

use crate::cli::{Command, PlotArgs, RunArgs, StationArgs};
use crate::domain::{DateWindow, PipelineConfig, StationAliases};
use crate::error::{AppError, EXIT_INPUT};

pub mod pipeline;

/// Entry point for the `streamflow` binary.
pub fn run() -> Result<(), AppError> {
    dotenvy::dotenv().ok();

    // We want `streamflow` and `streamflow --station X` to behave like
    // `streamflow run ...`.
    //
    // Clap requires a subcommand name, so we do a small, explicit rewrite of the
    // argv list before parsing. This preserves a clean clap structure while
    // retaining the requested UX.
    let argv = rewrite_args(std::env::args().collect());
    let cli = crate::cli::Cli::parse_from(argv);
    init_tracing(cli.verbose, cli.quiet);

    match cli.command {
        Command::Run(args) => handle_run(args),
        Command::Plot(args) => handle_plot(args),
    }
}

/// Logs go to stderr so stdout carries only the summary.
///
/// `-v`/`-q` pick the level; otherwise `RUST_LOG` is honoured, falling back
/// to `info` for this crate.
fn init_tracing(verbose: u8, quiet: bool) {
    use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

    let log_level = match (quiet, verbose) {
        (true, _) => "error",
        (false, 0) => "info",
        (false, 1) => "debug",
        (false, _) => "trace",
    };
    let explicit = quiet || verbose > 0;
    let filter = if explicit {
        EnvFilter::new(format!("warn,streamflow={log_level}"))
    } else {
        EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(format!("warn,streamflow={log_level}")))
    };

    // `try_init` so a second call (tests, embedding) is harmless.
    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(
            fmt::layer()
                .with_target(false)
                .with_level(true)
                .with_writer(std::io::stderr)
                .compact(),
        )
        .try_init();

    debug!("logging initialized at level: {log_level}");
}

fn handle_run(args: RunArgs) -> Result<(), AppError> {
    let config = pipeline_config_from_args(&args)?;
    let run = pipeline::run(&config)?;

    println!("{}", crate::report::format_summary(&run.summary));
    println!("Cleaned CSV: {}", run.csv_path.display());
    if let Some(path) = &run.plot_path {
        println!("Plot: {}", path.display());
    }

    if config.ascii {
        let plot = crate::plot::render_ascii_series(&run.series, config.ascii_width, config.ascii_height);
        println!("\n{plot}");
    }

    Ok(())
}

fn handle_plot(args: PlotArgs) -> Result<(), AppError> {
    let station = station_from_args(&args.station);
    let output = args.output.clone().unwrap_or_else(|| {
        args.input
            .parent()
            .map(|dir| dir.to_path_buf())
            .unwrap_or_default()
            .join(format!("{}_streamflow_plot.png", station.slug()))
    });

    let replot = pipeline::replot(
        &args.input,
        &output,
        &station,
        (args.render.png_width, args.render.png_height),
    )?;

    println!("{}", crate::report::format_summary(&replot.summary));
    println!("Plot: {}", output.display());

    if args.render.ascii {
        let plot = crate::plot::render_ascii_series(&replot.series, args.render.width, args.render.height);
        println!("\n{plot}");
    }

    Ok(())
}

fn station_from_args(args: &StationArgs) -> StationAliases {
    StationAliases::new(args.station.clone(), args.station_name.clone(), &args.aliases)
}

pub fn pipeline_config_from_args(args: &RunArgs) -> Result<PipelineConfig, AppError> {
    if args.start > args.end {
        return Err(AppError::new(
            EXIT_INPUT,
            format!("--start ({}) must not be after --end ({})", args.start, args.end),
        ));
    }
    if args.strategies.is_empty() {
        return Err(AppError::new(EXIT_INPUT, "--strategies must name at least one strategy"));
    }
    if args.station.station.trim().is_empty() {
        return Err(AppError::new(EXIT_INPUT, "--station must not be empty"));
    }

    // Keep the first occurrence of each strategy.
    let mut strategies = Vec::with_capacity(args.strategies.len());
    for s in &args.strategies {
        if !strategies.contains(s) {
            strategies.push(*s);
        }
    }

    Ok(PipelineConfig {
        station: station_from_args(&args.station),
        strategies,
        workdir: args.workdir.clone(),
        window: DateWindow {
            start: args.start,
            end: args.end,
        },
        query_file: args.query_file.clone(),
        api_url: args.api_url.clone(),
        archive_mirrors: args.archive_urls.clone(),
        helper_command: args.helper_command.clone(),
        timeout_secs: args.timeout_secs,
        value_column: args.value_column.clone(),
        plot: !args.no_plot,
        plot_size: (args.render.png_width, args.render.png_height),
        ascii: args.render.ascii,
        ascii_width: args.render.width,
        ascii_height: args.render.height,
    })
}

/// Rewrite argv so `streamflow` defaults to `streamflow run`.
///
/// Rules:
/// - `streamflow`                      -> `streamflow run`
/// - `streamflow --station X ...`      -> `streamflow run --station X ...`
/// - `streamflow --help/--version/-h`  -> unchanged (show top-level help/version)
fn rewrite_args(mut argv: Vec<String>) -> Vec<String> {
    let Some(arg1) = argv.get(1).cloned() else {
        argv.push("run".to_string());
        return argv;
    };

    let is_top_level_help_or_version = matches!(
        arg1.as_str(),
        "-h" | "--help" | "-V" | "--version" | "help"
    );
    if is_top_level_help_or_version {
        return argv;
    }

    let is_subcommand = matches!(arg1.as_str(), "run" | "plot");
    if is_subcommand {
        return argv;
    }

    // If the first token is a flag, treat it as "run flags".
    if arg1.starts_with('-') {
        argv.insert(1, "run".to_string());
        return argv;
    }

    // Otherwise, leave as-is.
    argv
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cli::Cli;
    use crate::domain::StrategyKind;

    fn argv(args: &[&str]) -> Vec<String> {
        args.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn bare_invocation_runs_pipeline() {
        assert_eq!(rewrite_args(argv(&["streamflow"])), argv(&["streamflow", "run"]));
        assert_eq!(
            rewrite_args(argv(&["streamflow", "-v", "--no-plot"])),
            argv(&["streamflow", "run", "-v", "--no-plot"])
        );
        assert_eq!(rewrite_args(argv(&["streamflow", "--help"])), argv(&["streamflow", "--help"]));
        assert_eq!(
            rewrite_args(argv(&["streamflow", "plot", "--input", "a.csv"])),
            argv(&["streamflow", "plot", "--input", "a.csv"])
        );
    }

    fn run_args(extra: &[&str]) -> RunArgs {
        let mut full = vec!["streamflow", "run"];
        full.extend_from_slice(extra);
        match Cli::parse_from(full).command {
            Command::Run(args) => args,
            Command::Plot(_) => panic!("expected run"),
        }
    }

    #[test]
    fn config_rejects_inverted_window() {
        let args = run_args(&["--start", "2020-01-02", "--end", "2020-01-01"]);
        let err = pipeline_config_from_args(&args).unwrap_err();
        assert_eq!(err.exit_code(), EXIT_INPUT);
    }

    #[test]
    fn config_dedups_strategies_and_resolves_paths() {
        let args = run_args(&[
            "--strategies",
            "local,api,local",
            "--workdir",
            "/tmp/sf",
            "--no-plot",
        ]);
        let config = pipeline_config_from_args(&args).unwrap();
        assert_eq!(config.strategies, vec![StrategyKind::Local, StrategyKind::Api]);
        assert!(!config.plot);
        assert_eq!(
            config.cleaned_csv_path(),
            std::path::PathBuf::from("/tmp/sf/rinihue_streamflow_cleaned.csv")
        );
        assert_eq!(config.data_dir(), std::path::PathBuf::from("/tmp/sf/data"));
    }
}
