//! CAMELS-CL streamflow archive.
//!
//! The dataset is published as one ZIP holding a wide table (dates x gauge
//! codes). It has moved between hosts over time, so a short list of mirrors is
//! tried in order.

use std::fs;
use std::io::Read;
use std::path::{Path, PathBuf};

use reqwest::blocking::Client;
use tracing::{info, warn};

use crate::data::{HttpPayload, SourceProvider, ZIP_MAGIC, cache_payload, fetch};
use crate::domain::{AcquisitionResult, PayloadFormat, StrategyKind};
use crate::error::AcquisitionFailure;

pub const ARCHIVE_MIRRORS: [&str; 4] = [
    "http://www.cr2.cl/download/camels-cl/2_CAMELScl_streamflow_m3s.zip",
    "https://www.cr2.cl/wp-content/uploads/2020/01/2_CAMELScl_streamflow_m3s.zip",
    "https://camels.cr2.cl/data/2_CAMELScl_streamflow_m3s.zip",
    "https://www.cr2.cl/camels-cl/data/2_CAMELScl_streamflow_m3s.zip",
];

pub struct ArchiveProvider {
    client: Client,
    mirrors: Vec<String>,
    cache_path: PathBuf,
}

impl ArchiveProvider {
    pub fn new(client: Client, cache_path: PathBuf) -> Self {
        Self {
            client,
            mirrors: ARCHIVE_MIRRORS.iter().map(|s| s.to_string()).collect(),
            cache_path,
        }
    }

    pub fn with_mirrors(mut self, mirrors: Vec<String>) -> Self {
        self.mirrors = mirrors;
        self
    }
}

impl SourceProvider for ArchiveProvider {
    fn kind(&self) -> StrategyKind {
        StrategyKind::Archive
    }

    fn attempt(&self) -> AcquisitionResult {
        // A previous run already downloaded the archive.
        match cached_archive(&self.cache_path) {
            Cached::Usable => {
                info!("using cached archive {}", self.cache_path.display());
                return AcquisitionResult::FilePath(self.cache_path.clone());
            }
            Cached::Corrupt => {
                warn!(
                    "cached archive {} is not a ZIP file; downloading again",
                    self.cache_path.display()
                );
                if let Err(e) = fs::remove_file(&self.cache_path) {
                    warn!("could not remove {}: {e}", self.cache_path.display());
                }
            }
            Cached::Absent => {}
        }

        if self.mirrors.is_empty() {
            return AcquisitionResult::Failure(AcquisitionFailure::Network {
                url: "(none)".to_string(),
                reason: "no archive mirrors configured".to_string(),
            });
        }

        let mut failures = Vec::with_capacity(self.mirrors.len());
        for url in &self.mirrors {
            info!("trying archive mirror {url}");
            match fetch(&self.client, url, &[]).and_then(zip_body) {
                Ok(body) => {
                    info!(
                        "downloaded {:.2} MB from {url}",
                        body.len() as f64 / (1024.0 * 1024.0)
                    );
                    cache_payload(&self.cache_path, &body);
                    return AcquisitionResult::RawBytes {
                        format: PayloadFormat::Zip,
                        payload: body,
                    };
                }
                Err(failure) => {
                    warn!("mirror failed: {failure}");
                    failures.push(failure.to_string());
                }
            }
        }

        AcquisitionResult::Failure(AcquisitionFailure::MirrorsFailed { failures })
    }
}

/// Keep only bodies that are actually ZIP archives; mirrors that moved tend
/// to answer 200 with an HTML page.
fn zip_body(payload: HttpPayload) -> Result<Vec<u8>, AcquisitionFailure> {
    if payload.body.starts_with(ZIP_MAGIC) {
        Ok(payload.body)
    } else {
        Err(AcquisitionFailure::UnsupportedContentType {
            url: payload.url,
            content_type: if payload.content_type.is_empty() {
                "(none, not a ZIP archive)".to_string()
            } else {
                format!("{}, not a ZIP archive", payload.content_type)
            },
        })
    }
}

#[derive(Debug, PartialEq, Eq)]
enum Cached {
    Absent,
    Usable,
    Corrupt,
}

fn cached_archive(path: &Path) -> Cached {
    let Ok(mut file) = fs::File::open(path) else {
        return Cached::Absent;
    };
    let mut magic = [0u8; 4];
    match file.read_exact(&mut magic) {
        Ok(()) if magic == ZIP_MAGIC => Cached::Usable,
        _ => Cached::Corrupt,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn no_mirrors_is_a_failure_not_a_panic() {
        let dir = tempfile::tempdir().unwrap();
        let provider = ArchiveProvider::new(Client::new(), dir.path().join("camels.zip")).with_mirrors(Vec::new());
        assert_eq!(provider.kind(), StrategyKind::Archive);
        match provider.attempt() {
            AcquisitionResult::Failure(AcquisitionFailure::Network { reason, .. }) => {
                assert!(reason.contains("no archive mirrors"));
            }
            other => panic!("expected a network failure, got {other:?}"),
        }
    }

    /// Serve one canned HTTP response per connection on a local port.
    fn serve(responses: usize, content_type: &'static str, body: &'static [u8]) -> String {
        use std::io::Write;
        use std::net::TcpListener;

        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        std::thread::spawn(move || {
            for stream in listener.incoming().take(responses) {
                let mut stream = stream.unwrap();
                let mut buf = [0u8; 2048];
                let _ = stream.read(&mut buf);
                let head = format!(
                    "HTTP/1.1 200 OK\r\nContent-Type: {content_type}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
                    body.len()
                );
                stream.write_all(head.as_bytes()).unwrap();
                stream.write_all(body).unwrap();
            }
        });
        format!("http://{addr}/2_CAMELScl_streamflow_m3s.zip")
    }

    fn client() -> Client {
        Client::builder()
            .timeout(std::time::Duration::from_secs(5))
            .build()
            .unwrap()
    }

    #[test]
    fn html_answer_is_rejected_and_not_cached() {
        let dir = tempfile::tempdir().unwrap();
        let cache = dir.path().join("camels.zip");
        let moved = serve(1, "text/html", b"<html>moved</html>");

        let provider = ArchiveProvider::new(client(), cache.clone()).with_mirrors(vec![moved]);
        match provider.attempt() {
            AcquisitionResult::Failure(AcquisitionFailure::MirrorsFailed { failures }) => {
                assert_eq!(failures.len(), 1);
                assert!(failures[0].contains("not a ZIP archive"), "{failures:?}");
            }
            other => panic!("expected a mirror failure, got {other:?}"),
        }
        assert!(!cache.exists());
    }

    #[test]
    fn every_mirror_failure_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let moved = serve(1, "text/html", b"<html>moved</html>");
        let refused = "http://127.0.0.1:9/2_CAMELScl_streamflow_m3s.zip".to_string();

        let provider = ArchiveProvider::new(client(), dir.path().join("camels.zip"))
            .with_mirrors(vec![moved.clone(), refused.clone()]);
        let AcquisitionResult::Failure(failure) = provider.attempt() else {
            panic!("expected a failure");
        };
        let text = failure.to_string();
        assert!(text.starts_with("all 2 archive mirror(s) failed"), "{text}");
        assert!(text.contains(&moved) && text.contains(&refused), "{text}");
    }

    #[test]
    fn zip_answer_is_cached_and_returned() {
        let dir = tempfile::tempdir().unwrap();
        let cache = dir.path().join("camels.zip");
        let mirror = serve(1, "application/octet-stream", b"PK\x03\x04archive");

        let provider = ArchiveProvider::new(client(), cache.clone()).with_mirrors(vec![mirror]);
        match provider.attempt() {
            AcquisitionResult::RawBytes { format, payload } => {
                assert_eq!(format, PayloadFormat::Zip);
                assert_eq!(payload, b"PK\x03\x04archive");
            }
            other => panic!("expected raw bytes, got {other:?}"),
        }
        assert_eq!(std::fs::read(&cache).unwrap(), b"PK\x03\x04archive");
    }

    #[test]
    fn corrupt_cache_is_discarded() {
        let dir = tempfile::tempdir().unwrap();
        let cache = dir.path().join("camels.zip");
        std::fs::write(&cache, b"<html>moved</html>").unwrap();
        assert_eq!(cached_archive(&cache), Cached::Corrupt);

        let provider = ArchiveProvider::new(client(), cache.clone()).with_mirrors(Vec::new());
        assert!(matches!(provider.attempt(), AcquisitionResult::Failure(_)));
        assert!(!cache.exists());
    }

    #[test]
    fn cached_archive_is_reused_without_network() {
        let dir = tempfile::tempdir().unwrap();
        let cache = dir.path().join("camels.zip");
        std::fs::write(&cache, b"PK\x03\x04cached").unwrap();

        let provider = ArchiveProvider::new(Client::new(), cache.clone()).with_mirrors(Vec::new());
        match provider.attempt() {
            AcquisitionResult::FilePath(path) => assert_eq!(path, cache),
            other => panic!("expected the cached file, got {other:?}"),
        }
    }
}
