//! External download helper.
//!
//! The camelsCL R package knows how to fetch a single gauge from the CAMELS-CL
//! dataset. We write a short script into the working directory, run it with
//! the configured interpreter, and expect it to leave a two-column CSV
//! (`date,<station code>`) behind.

use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::process::Command;

use tracing::{debug, info};

use crate::data::SourceProvider;
use crate::domain::{AcquisitionResult, StationAliases, StrategyKind};
use crate::error::AcquisitionFailure;

/// Lines of helper stderr kept in the failure reason.
const STDERR_TAIL_LINES: usize = 5;

pub struct HelperProvider {
    command: String,
    script_dir: PathBuf,
    output: PathBuf,
    station: StationAliases,
}

impl HelperProvider {
    pub fn new(command: impl Into<String>, script_dir: PathBuf, output: PathBuf, station: StationAliases) -> Self {
        Self {
            command: command.into(),
            script_dir,
            output,
            station,
        }
    }

    fn run(&self) -> Result<AcquisitionResult, AcquisitionFailure> {
        if let Some(parent) = self.output.parent() {
            std::fs::create_dir_all(parent).map_err(|source| AcquisitionFailure::Io {
                path: parent.to_path_buf(),
                source,
            })?;
        }

        // Removed when dropped, whatever the outcome.
        let mut script = tempfile::Builder::new()
            .prefix(".streamflow-helper-")
            .suffix(".R")
            .tempfile_in(&self.script_dir)
            .map_err(|source| AcquisitionFailure::Io {
                path: self.script_dir.clone(),
                source,
            })?;
        script
            .write_all(render_script(&self.station, &self.output).as_bytes())
            .map_err(|source| AcquisitionFailure::Io {
                path: script.path().to_path_buf(),
                source,
            })?;

        info!("running {} {}", self.command, script.path().display());
        let output = Command::new(&self.command)
            .arg(script.path())
            .output()
            .map_err(|e| AcquisitionFailure::HelperFailed {
                reason: match e.kind() {
                    ErrorKind::NotFound => format!("`{}` not found on PATH", self.command),
                    _ => format!("could not start `{}`: {e}", self.command),
                },
            })?;

        debug!("helper stdout: {}", String::from_utf8_lossy(&output.stdout).trim());

        if !output.status.success() {
            return Err(AcquisitionFailure::HelperFailed {
                reason: format!(
                    "`{}` exited with {}: {}",
                    self.command,
                    output.status,
                    stderr_tail(&output.stderr)
                ),
            });
        }

        if !self.output.is_file() {
            return Err(AcquisitionFailure::HelperFailed {
                reason: format!(
                    "`{}` finished but '{}' was not created",
                    self.command,
                    self.output.display()
                ),
            });
        }

        Ok(AcquisitionResult::FilePath(self.output.clone()))
    }
}

impl SourceProvider for HelperProvider {
    fn kind(&self) -> StrategyKind {
        StrategyKind::Helper
    }

    fn attempt(&self) -> AcquisitionResult {
        self.run().unwrap_or_else(AcquisitionResult::Failure)
    }
}

/// R script fetching daily streamflow for the station and writing `date,<code>`.
pub fn render_script(station: &StationAliases, output: &Path) -> String {
    let ids: Vec<String> = station.aliases().iter().map(|a| r_string(a)).collect();
    let output = r_string(&output.to_string_lossy());
    let column = r_string(station.code());

    format!(
        r#"if (!requireNamespace("camelsCL", quietly = TRUE)) {{
  install.packages("camelsCL", repos = "https://cloud.r-project.org")
}}
library(camelsCL)
library(zoo)

ids <- c({ids})
ok <- FALSE
for (sid in ids) {{
  res <- tryCatch({{
    data <- getData(x = sid, tscale = "daily")
    q <- if ("Qobs_m3s" %in% names(data)) data$Qobs_m3s else data[, grep("Q|streamflow|flow", names(data), ignore.case = TRUE)[1]]
    df <- data.frame(date = format(index(q), "%Y-%m-%d"), value = as.numeric(coredata(q)))
    names(df) <- c("date", {column})
    write.csv(df, {output}, row.names = FALSE, na = "")
    TRUE
  }}, error = function(e) FALSE)
  if (isTRUE(res)) {{ ok <- TRUE; break }}
}}
if (!ok) stop("no camelsCL data for any station alias")
"#,
        ids = ids.join(", "),
    )
}

/// Double-quoted R string literal.
fn r_string(s: &str) -> String {
    let escaped = s.replace('\\', "/").replace('"', "\\\"");
    format!("\"{escaped}\"")
}

fn stderr_tail(stderr: &[u8]) -> String {
    let text = String::from_utf8_lossy(stderr);
    let lines: Vec<&str> = text.lines().filter(|l| !l.trim().is_empty()).collect();
    let start = lines.len().saturating_sub(STDERR_TAIL_LINES);
    let tail = lines[start..].join(" | ");
    if tail.is_empty() { "(no stderr)".to_string() } else { tail }
}
