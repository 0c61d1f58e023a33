//! Data acquisition: the source locator and its providers.
//!
//! - `locator`: the `SourceProvider` trait and the prioritized fallthrough loop
//! - `helper`: external download helper (R + camelsCL)
//! - `explorador`: CR2 explorador export API
//! - `archive`: CAMELS-CL streamflow archive mirrors
//! - `local`: previously placed files in the data directory

use std::path::Path;
use std::time::Duration;

use reqwest::blocking::Client;
use reqwest::header::{ACCEPT, ACCEPT_LANGUAGE, HeaderMap, HeaderValue, REFERER, USER_AGENT};
use tracing::{debug, warn};

use crate::error::{AcquisitionFailure, AppError, EXIT_INPUT};

pub mod archive;
pub mod explorador;
pub mod helper;
pub mod local;
pub mod locator;

pub use archive::ArchiveProvider;
pub use explorador::{ExploradorProvider, QueryDescriptor};
pub use helper::HelperProvider;
pub use local::LocalProvider;
pub use locator::{Acquired, SourceLocator, SourceProvider};

/// Local file header of a ZIP container (also XLSX/ODS).
pub(crate) const ZIP_MAGIC: &[u8] = b"PK\x03\x04";

const BROWSER_USER_AGENT: &str = "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 \
     (KHTML, like Gecko) Chrome/143.0.0.0 Safari/537.36";

/// Blocking HTTP client with browser-like default headers.
///
/// The explorador endpoint rejects requests that do not look like they come
/// from its own web page.
pub fn browser_client(timeout_secs: u64, referer: &str) -> Result<Client, AppError> {
    let mut headers = HeaderMap::new();
    headers.insert(
        ACCEPT,
        HeaderValue::from_static("application/json, text/javascript, */*; q=0.01"),
    );
    headers.insert(
        ACCEPT_LANGUAGE,
        HeaderValue::from_static("en-US,en;q=0.9,es;q=0.8"),
    );
    headers.insert(USER_AGENT, HeaderValue::from_static(BROWSER_USER_AGENT));
    headers.insert("X-Requested-With", HeaderValue::from_static("XMLHttpRequest"));
    let referer = HeaderValue::from_str(referer)
        .map_err(|e| AppError::new(EXIT_INPUT, format!("Invalid referer '{referer}': {e}")))?;
    headers.insert(REFERER, referer);

    Client::builder()
        .default_headers(headers)
        .timeout(Duration::from_secs(timeout_secs))
        .build()
        .map_err(|e| AppError::new(EXIT_INPUT, format!("Failed to build HTTP client: {e}")))
}

/// A fetched HTTP body with its declared content type.
#[derive(Debug, Clone)]
pub struct HttpPayload {
    pub url: String,
    pub content_type: String,
    pub body: Vec<u8>,
}

/// GET `url` (with optional query pairs) and return the body on 2xx.
pub fn fetch(client: &Client, url: &str, query: &[(&str, &str)]) -> Result<HttpPayload, AcquisitionFailure> {
    debug!("GET {url}");
    let resp = client
        .get(url)
        .query(query)
        .send()
        .map_err(|e| AcquisitionFailure::Network {
            url: url.to_string(),
            reason: e.to_string(),
        })?;

    let status = resp.status();
    if !status.is_success() {
        return Err(AcquisitionFailure::HttpStatus {
            url: url.to_string(),
            status: status.as_u16(),
        });
    }

    let content_type = resp
        .headers()
        .get(reqwest::header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("")
        .to_string();

    let body = resp.bytes().map_err(|e| AcquisitionFailure::Network {
        url: url.to_string(),
        reason: format!("failed to read response body: {e}"),
    })?;

    Ok(HttpPayload {
        url: url.to_string(),
        content_type,
        body: body.to_vec(),
    })
}

/// Keep a copy of a downloaded payload for inspection. Failures only warn.
pub fn cache_payload(path: &Path, payload: &[u8]) {
    match crate::io::export::write_atomic(path, payload) {
        Ok(()) => debug!("cached raw payload to {}", path.display()),
        Err(e) => warn!("could not cache raw payload: {e}"),
    }
}
