//! Prioritized acquisition with fallthrough.
//!
//! Each strategy is a [`SourceProvider`]. The locator tries them in order and
//! hands every successful payload to an acceptor (normally the table
//! extractor). A provider failure or an acceptor rejection is logged, recorded,
//! and the next provider is tried.

use std::fs;

use tracing::{info, warn};

use crate::domain::{AcquisitionResult, StrategyKind};
use crate::error::{AcquisitionFailure, AttemptFailure, ExtractError, FatalAcquisitionError};

/// One acquisition strategy.
pub trait SourceProvider {
    fn kind(&self) -> StrategyKind;

    /// Try to obtain raw tabular data. Never panics; failures are returned as
    /// `AcquisitionResult::Failure`.
    fn attempt(&self) -> AcquisitionResult;

    /// Payloads to offer the acceptor in turn. Providers that can produce
    /// several plausible payloads override this.
    fn candidates(&self) -> Vec<AcquisitionResult> {
        vec![self.attempt()]
    }
}

/// Successful locator outcome.
#[derive(Debug)]
pub struct Acquired<T> {
    pub value: T,
    pub strategy: StrategyKind,
    /// Size of the raw payload (bytes in memory, or the file size on disk).
    pub raw_bytes: u64,
    /// Failures of the strategies tried before this one.
    pub earlier_failures: Vec<AttemptFailure>,
}

pub struct SourceLocator {
    providers: Vec<Box<dyn SourceProvider>>,
}

impl SourceLocator {
    pub fn new(providers: Vec<Box<dyn SourceProvider>>) -> Self {
        Self { providers }
    }

    pub fn strategies(&self) -> Vec<StrategyKind> {
        self.providers.iter().map(|p| p.kind()).collect()
    }

    /// Return the first successful raw acquisition, without interpreting it.
    pub fn locate(&self) -> Result<Acquired<AcquisitionResult>, FatalAcquisitionError> {
        self.locate_with(Ok)
    }

    /// Try providers in order until `accept` turns a payload into a value.
    pub fn locate_with<T, F>(&self, mut accept: F) -> Result<Acquired<T>, FatalAcquisitionError>
    where
        F: FnMut(AcquisitionResult) -> Result<T, ExtractError>,
    {
        let mut attempts = Vec::new();

        for provider in &self.providers {
            let strategy = provider.kind();
            info!("trying acquisition strategy: {strategy}");

            for result in provider.candidates() {
                if let AcquisitionResult::Failure(reason) = result {
                    warn!("{strategy} failed: {reason}");
                    attempts.push(AttemptFailure { strategy, reason });
                    continue;
                }

                let raw_bytes = payload_size(&result);
                let origin = describe(&result);
                match accept(result) {
                    Ok(value) => {
                        info!("{strategy} succeeded ({raw_bytes} raw bytes)");
                        return Ok(Acquired {
                            value,
                            strategy,
                            raw_bytes,
                            earlier_failures: attempts,
                        });
                    }
                    Err(err) => {
                        warn!("{strategy} returned data that could not be used{origin}: {err}");
                        attempts.push(AttemptFailure {
                            strategy,
                            reason: AcquisitionFailure::Extraction(err),
                        });
                    }
                }
            }
        }

        Err(FatalAcquisitionError { attempts })
    }
}

/// ` (path)` for file payloads, empty otherwise.
fn describe(result: &AcquisitionResult) -> String {
    match result {
        AcquisitionResult::FilePath(path) => format!(" ({})", path.display()),
        _ => String::new(),
    }
}

fn payload_size(result: &AcquisitionResult) -> u64 {
    match result {
        AcquisitionResult::RawBytes { payload, .. } => payload.len() as u64,
        AcquisitionResult::FilePath(path) => fs::metadata(path).map(|m| m.len()).unwrap_or(0),
        AcquisitionResult::Failure(_) => 0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::domain::PayloadFormat;

    /// Provider returning a canned outcome.
    struct Fake {
        kind: StrategyKind,
        outcome: fn() -> AcquisitionResult,
    }

    impl Fake {
        fn boxed(kind: StrategyKind, outcome: fn() -> AcquisitionResult) -> Box<dyn SourceProvider> {
            Box::new(Fake { kind, outcome })
        }
    }

    impl SourceProvider for Fake {
        fn kind(&self) -> StrategyKind {
            self.kind
        }

        fn attempt(&self) -> AcquisitionResult {
            (self.outcome)()
        }
    }

    fn unreachable() -> AcquisitionResult {
        AcquisitionResult::Failure(AcquisitionFailure::Network {
            url: "https://example.test".to_string(),
            reason: "dns error".to_string(),
        })
    }

    fn csv_bytes() -> AcquisitionResult {
        AcquisitionResult::RawBytes {
            format: PayloadFormat::Delimited,
            payload: b"date,q\n2020-01-01,1\n".to_vec(),
        }
    }

    fn json_body() -> AcquisitionResult {
        AcquisitionResult::Failure(AcquisitionFailure::UnexpectedJson {
            url: "https://example.test".to_string(),
            body: serde_json::json!({ "status": "queued" }),
        })
    }

    #[test]
    fn falls_through_to_first_success() {
        let locator = SourceLocator::new(vec![
            Fake::boxed(StrategyKind::Helper, unreachable),
            Fake::boxed(StrategyKind::Api, json_body),
            Fake::boxed(StrategyKind::Local, csv_bytes),
            Fake::boxed(StrategyKind::Archive, unreachable),
        ]);

        let acquired = locator.locate().unwrap();
        assert_eq!(acquired.strategy, StrategyKind::Local);
        assert_eq!(acquired.raw_bytes, 20);
        assert_eq!(acquired.earlier_failures.len(), 2);
        assert!(matches!(
            acquired.earlier_failures[1].reason,
            AcquisitionFailure::UnexpectedJson { .. }
        ));
    }

    #[test]
    fn rejected_payload_counts_as_failure() {
        let locator = SourceLocator::new(vec![
            Fake::boxed(StrategyKind::Api, csv_bytes),
            Fake::boxed(StrategyKind::Local, csv_bytes),
        ]);

        let mut seen = 0;
        let acquired = locator
            .locate_with(|_| {
                seen += 1;
                if seen == 1 {
                    Err(ExtractError::StationNotFound {
                        aliases: vec!["rinihue".to_string()],
                        candidates: vec!["date".to_string(), "q".to_string()],
                    })
                } else {
                    Ok(seen)
                }
            })
            .unwrap();

        assert_eq!(acquired.value, 2);
        assert_eq!(acquired.strategy, StrategyKind::Local);
        assert!(matches!(
            acquired.earlier_failures[0].reason,
            AcquisitionFailure::Extraction(ExtractError::StationNotFound { .. })
        ));
    }

    #[test]
    fn all_failures_are_reported_in_order() {
        let locator = SourceLocator::new(vec![
            Fake::boxed(StrategyKind::Helper, unreachable),
            Fake::boxed(StrategyKind::Api, json_body),
        ]);

        let err = locator.locate().unwrap_err();
        let kinds: Vec<_> = err.attempts.iter().map(|a| a.strategy).collect();
        assert_eq!(kinds, vec![StrategyKind::Helper, StrategyKind::Api]);
    }

    /// Provider offering several payloads, like the local directory scan.
    struct Many(Vec<fn() -> AcquisitionResult>);

    impl SourceProvider for Many {
        fn kind(&self) -> StrategyKind {
            StrategyKind::Local
        }

        fn attempt(&self) -> AcquisitionResult {
            (self.0[0])()
        }

        fn candidates(&self) -> Vec<AcquisitionResult> {
            self.0.iter().map(|f| f()).collect()
        }
    }

    fn unavailable_page() -> AcquisitionResult {
        AcquisitionResult::RawBytes {
            format: PayloadFormat::Delimited,
            payload: b"Service temporarily unavailable\n".to_vec(),
        }
    }

    #[test]
    fn later_candidates_are_tried_after_a_rejection() {
        let locator = SourceLocator::new(vec![Box::new(Many(vec![unavailable_page, csv_bytes]))]);

        let acquired = locator
            .locate_with(|result| match result {
                AcquisitionResult::RawBytes { payload, .. } if payload.starts_with(b"date") => Ok(payload.len()),
                _ => Err(ExtractError::UnsupportedFormat {
                    reason: "no header".to_string(),
                }),
            })
            .unwrap();

        assert_eq!(acquired.value, 20);
        assert_eq!(acquired.strategy, StrategyKind::Local);
        assert_eq!(acquired.earlier_failures.len(), 1);
    }

    fn never() -> AcquisitionResult {
        panic!("providers after a success must not run")
    }

    #[test]
    fn stops_after_first_success() {
        let locator = SourceLocator::new(vec![
            Fake::boxed(StrategyKind::Local, csv_bytes),
            Fake::boxed(StrategyKind::Api, never),
        ]);
        let acquired = locator.locate().unwrap();
        assert_eq!(acquired.strategy, StrategyKind::Local);
        assert_eq!(locator.strategies(), vec![StrategyKind::Local, StrategyKind::Api]);
    }
}
