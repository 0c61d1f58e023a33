//! Command-line parsing for the streamflow pipeline.
//!
//! The goal of this module is to keep **argument parsing** separate from the
//! pipeline. Every option has an environment fallback (`STREAMFLOW_*`), and a
//! `.env` file in the working directory is loaded before parsing.

use std::path::PathBuf;

use chrono::NaiveDate;
use clap::{ArgAction, Args, Parser, Subcommand};

use crate::domain::StrategyKind;

/// Top-level CLI.
#[derive(Debug, Parser)]
#[command(
    name = "streamflow",
    version,
    about = "Download, clean, and export daily streamflow for a Chilean gauging station"
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// More log output (-v debug, -vv trace).
    #[arg(short, long, action = ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Only log errors.
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    pub quiet: bool,
}

/// CLI subcommands.
#[derive(Debug, Subcommand)]
pub enum Command {
    /// Acquire, clean, export and plot the station series (the default).
    Run(RunArgs),
    /// Re-render the plot and summary from an existing cleaned CSV.
    Plot(PlotArgs),
}

/// Station identity shared by both subcommands.
#[derive(Debug, Args, Clone)]
pub struct StationArgs {
    /// Station code (e.g. the DGA/CAMELS gauge id).
    #[arg(long, env = "STREAMFLOW_STATION", default_value = "10111001")]
    pub station: String,

    /// Human-readable station name; also matched against column headers.
    #[arg(long, env = "STREAMFLOW_STATION_NAME", default_value = "Riñihue")]
    pub station_name: String,

    /// Extra names the station may appear under (repeatable or comma-separated).
    #[arg(long = "alias", env = "STREAMFLOW_ALIASES", value_delimiter = ',')]
    pub aliases: Vec<String>,
}

/// Options for a full pipeline run.
#[derive(Debug, Args, Clone)]
pub struct RunArgs {
    #[command(flatten)]
    pub station: StationArgs,

    /// Acquisition strategies, tried in this order.
    #[arg(
        long,
        env = "STREAMFLOW_STRATEGIES",
        value_enum,
        value_delimiter = ',',
        default_values = ["helper", "api", "archive", "local"]
    )]
    pub strategies: Vec<StrategyKind>,

    /// Working directory for outputs; raw data is cached under `<workdir>/data`.
    #[arg(long, env = "STREAMFLOW_WORKDIR", default_value = ".")]
    pub workdir: PathBuf,

    /// First day to keep (YYYY-MM-DD); also the start of the API time range.
    #[arg(long, default_value = "1960-01-01")]
    pub start: NaiveDate,

    /// Last day to keep (YYYY-MM-DD); also the end of the API time range.
    #[arg(long, default_value = "2025-12-31")]
    pub end: NaiveDate,

    /// JSON query descriptor for the explorador API (replaces the built-in one).
    #[arg(long, env = "STREAMFLOW_QUERY_FILE", value_name = "JSON")]
    pub query_file: Option<PathBuf>,

    /// Explorador export endpoint.
    #[arg(long, env = "STREAMFLOW_API_URL", value_name = "URL")]
    pub api_url: Option<String>,

    /// CAMELS-CL archive mirror (repeatable or comma-separated; replaces the built-in list).
    #[arg(long = "archive-url", env = "STREAMFLOW_ARCHIVE_URLS", value_delimiter = ',', value_name = "URL")]
    pub archive_urls: Vec<String>,

    /// Interpreter used to run the download helper script.
    #[arg(long, env = "STREAMFLOW_HELPER", default_value = "Rscript")]
    pub helper_command: String,

    /// HTTP timeout per request, in seconds.
    #[arg(long, default_value_t = 60)]
    pub timeout_secs: u64,

    /// Header of the value column in the cleaned CSV.
    #[arg(long, default_value = crate::io::DEFAULT_VALUE_COLUMN)]
    pub value_column: String,

    /// Skip the PNG plot.
    #[arg(long)]
    pub no_plot: bool,

    #[command(flatten)]
    pub render: RenderArgs,
}

/// Plot sizing, shared by `run` and `plot`.
#[derive(Debug, Args, Clone)]
pub struct RenderArgs {
    /// Also print an ASCII preview of the cleaned series.
    #[arg(long)]
    pub ascii: bool,

    /// ASCII plot width (columns).
    #[arg(long, default_value_t = 100)]
    pub width: usize,

    /// ASCII plot height (rows).
    #[arg(long, default_value_t = 25)]
    pub height: usize,

    /// PNG width in pixels.
    #[arg(long, default_value_t = crate::plot::DEFAULT_PLOT_SIZE.0)]
    pub png_width: u32,

    /// PNG height in pixels.
    #[arg(long, default_value_t = crate::plot::DEFAULT_PLOT_SIZE.1)]
    pub png_height: u32,
}

/// Options for plotting an existing cleaned CSV.
#[derive(Debug, Args, Clone)]
pub struct PlotArgs {
    /// Cleaned CSV produced by `streamflow run`.
    #[arg(long, value_name = "CSV")]
    pub input: PathBuf,

    /// PNG to write (default: `<slug>_streamflow_plot.png` next to the input).
    #[arg(long, value_name = "PNG")]
    pub output: Option<PathBuf>,

    #[command(flatten)]
    pub station: StationArgs,

    #[command(flatten)]
    pub render: RenderArgs,
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn run_defaults() {
        let cli = Cli::try_parse_from(["streamflow", "run"]).unwrap();
        let Command::Run(args) = cli.command else {
            panic!("expected run");
        };
        assert_eq!(args.strategies, StrategyKind::DEFAULT_ORDER.to_vec());
        assert_eq!(args.start, NaiveDate::from_ymd_opt(1960, 1, 1).unwrap());
        assert_eq!(args.end, NaiveDate::from_ymd_opt(2025, 12, 31).unwrap());
        assert_eq!(args.timeout_secs, 60);
        assert_eq!(args.value_column, "streamflow_m3s");
        assert!(!args.no_plot);
    }

    #[test]
    fn strategies_and_aliases_split_on_commas() {
        let cli = Cli::try_parse_from([
            "streamflow",
            "run",
            "--strategies",
            "local,api",
            "--alias",
            "RINIHUE,Rinihue en desague",
            "-vv",
        ])
        .unwrap();
        assert_eq!(cli.verbose, 2);
        let Command::Run(args) = cli.command else {
            panic!("expected run");
        };
        assert_eq!(args.strategies, vec![StrategyKind::Local, StrategyKind::Api]);
        assert_eq!(args.station.aliases, vec!["RINIHUE", "Rinihue en desague"]);
    }

    #[test]
    fn unknown_strategy_is_rejected() {
        assert!(Cli::try_parse_from(["streamflow", "run", "--strategies", "ftp"]).is_err());
    }

    #[test]
    fn plot_requires_input() {
        assert!(Cli::try_parse_from(["streamflow", "plot"]).is_err());
        let cli = Cli::try_parse_from(["streamflow", "plot", "--input", "x.csv", "--ascii"]).unwrap();
        let Command::Plot(args) = cli.command else {
            panic!("expected plot");
        };
        assert!(args.render.ascii);
        assert_eq!(args.input, PathBuf::from("x.csv"));
    }
}
