//! Error types.
//!
//! Stage-level errors are typed (`thiserror`) so the locator can decide whether
//! to fall through to the next strategy. Everything that reaches `main` is
//! converted into [`AppError`], which carries the process exit code.

use std::path::PathBuf;

use thiserror::Error;

use crate::domain::StrategyKind;

/// Exit code for configuration and input problems.
pub const EXIT_INPUT: u8 = 2;
/// Exit code when no usable data remains after cleaning.
pub const EXIT_NO_DATA: u8 = 3;
/// Exit code when every acquisition strategy failed.
pub const EXIT_ACQUISITION: u8 = 4;
/// Exit code for output (CSV/PNG) failures.
pub const EXIT_EXPORT: u8 = 5;

#[derive(Clone)]
pub struct AppError {
    exit_code: u8,
    message: String,
}

impl AppError {
    pub fn new(exit_code: u8, message: impl Into<String>) -> Self {
        Self {
            exit_code,
            message: message.into(),
        }
    }

    pub fn exit_code(&self) -> u8 {
        self.exit_code
    }
}

impl std::fmt::Display for AppError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::fmt::Debug for AppError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppError")
            .field("exit_code", &self.exit_code)
            .field("message", &self.message)
            .finish()
    }
}

impl std::error::Error for AppError {}

/// Failures while turning a payload into a station series.
#[derive(Debug, Error)]
pub enum ExtractError {
    #[error(
        "station not found (aliases: {}); available columns: [{}]",
        .aliases.join(", "),
        .candidates.join(", ")
    )]
    StationNotFound {
        aliases: Vec<String>,
        candidates: Vec<String>,
    },

    #[error("unsupported format: {reason}")]
    UnsupportedFormat { reason: String },

    #[error("failed to read '{}': {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl ExtractError {
    pub fn unsupported(reason: impl Into<String>) -> Self {
        ExtractError::UnsupportedFormat {
            reason: reason.into(),
        }
    }
}

/// Why a single acquisition strategy did not produce usable data.
#[derive(Debug, Error)]
pub enum AcquisitionFailure {
    #[error("network unreachable ({url}): {reason}")]
    Network { url: String, reason: String },

    #[error("HTTP status {status} from {url}")]
    HttpStatus { url: String, status: u16 },

    #[error("unsupported content type '{content_type}' from {url}")]
    UnsupportedContentType { url: String, content_type: String },

    /// The service answered with JSON (metadata or an export link) instead of data.
    /// The body is kept so callers can inspect it.
    #[error("service returned JSON instead of data ({url}): {}", json_preview(.body))]
    UnexpectedJson {
        url: String,
        body: serde_json::Value,
    },

    /// Every archive mirror failed; one entry per mirror, in order.
    #[error("all {} archive mirror(s) failed: {}", .failures.len(), .failures.join("; "))]
    MirrorsFailed { failures: Vec<String> },

    #[error("no local data file found under '{}'", .path.display())]
    MissingLocalFile { path: PathBuf },

    #[error("download helper failed: {reason}")]
    HelperFailed { reason: String },

    #[error(transparent)]
    Extraction(#[from] ExtractError),

    #[error("I/O error at '{}': {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// One failed attempt, kept for the final report.
#[derive(Debug)]
pub struct AttemptFailure {
    pub strategy: StrategyKind,
    pub reason: AcquisitionFailure,
}

/// Every configured strategy failed.
#[derive(Debug, Error)]
#[error("{}", format_attempts(.attempts))]
pub struct FatalAcquisitionError {
    pub attempts: Vec<AttemptFailure>,
}

/// Failures while writing outputs.
#[derive(Debug, Error)]
pub enum ExportError {
    #[error("failed to write '{}': {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to write CSV '{}': {source}", .path.display())]
    Csv {
        path: PathBuf,
        #[source]
        source: csv::Error,
    },

    #[error("failed to render plot '{}': {reason}", .path.display())]
    Plot { path: PathBuf, reason: String },
}

impl From<ExtractError> for AppError {
    fn from(err: ExtractError) -> Self {
        AppError::new(EXIT_INPUT, err.to_string())
    }
}

impl From<FatalAcquisitionError> for AppError {
    fn from(err: FatalAcquisitionError) -> Self {
        AppError::new(EXIT_ACQUISITION, err.to_string())
    }
}

impl From<ExportError> for AppError {
    fn from(err: ExportError) -> Self {
        AppError::new(EXIT_EXPORT, err.to_string())
    }
}

fn format_attempts(attempts: &[AttemptFailure]) -> String {
    if attempts.is_empty() {
        return "no acquisition strategies configured".to_string();
    }
    let mut out = String::from("all acquisition strategies failed:");
    for (idx, attempt) in attempts.iter().enumerate() {
        out.push_str(&format!("\n  {}. {}: {}", idx + 1, attempt.strategy, attempt.reason));
    }
    out
}

fn json_preview(body: &serde_json::Value) -> String {
    const MAX: usize = 200;
    let text = body.to_string();
    if text.chars().count() <= MAX {
        return text;
    }
    let mut out: String = text.chars().take(MAX).collect();
    out.push_str("...");
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fatal_error_lists_attempts_in_order() {
        let err = FatalAcquisitionError {
            attempts: vec![
                AttemptFailure {
                    strategy: StrategyKind::Helper,
                    reason: AcquisitionFailure::HelperFailed {
                        reason: "`Rscript` not found".to_string(),
                    },
                },
                AttemptFailure {
                    strategy: StrategyKind::Api,
                    reason: AcquisitionFailure::HttpStatus {
                        url: "https://example.test".to_string(),
                        status: 503,
                    },
                },
            ],
        };
        let text = err.to_string();
        let first = text.find("1. download helper").unwrap();
        let second = text.find("2. explorador API: HTTP status 503").unwrap();
        assert!(first < second);

        let app: AppError = err.into();
        assert_eq!(app.exit_code(), EXIT_ACQUISITION);
    }

    #[test]
    fn station_not_found_lists_candidates() {
        let err = ExtractError::StationNotFound {
            aliases: vec!["10111001".to_string(), "Riñihue".to_string()],
            candidates: vec!["fecha".to_string(), "valdivia".to_string()],
        };
        assert_eq!(
            err.to_string(),
            "station not found (aliases: 10111001, Riñihue); available columns: [fecha, valdivia]"
        );
    }

    #[test]
    fn json_preview_truncates_long_bodies() {
        let body = serde_json::json!({ "message": "x".repeat(500) });
        let failure = AcquisitionFailure::UnexpectedJson {
            url: "u".to_string(),
            body,
        };
        let text = failure.to_string();
        assert!(text.ends_with("..."));
        assert!(text.len() < 300);
    }
}
