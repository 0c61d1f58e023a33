//! CR2 explorador export API.
//!
//! The endpoint takes a single `options` query parameter holding a JSON
//! descriptor. Its semantics are undocumented, so the descriptor is handled as
//! an opaque, versioned blob: we ship one default and let users replace it.
//!
//! Depending on the descriptor the service answers with the spreadsheet itself,
//! with delimited text, or with JSON that points at an export file.

use std::fs;
use std::path::{Path, PathBuf};

use reqwest::blocking::Client;
use serde_json::{Value, json};
use tracing::{info, warn};

use crate::data::{HttpPayload, SourceProvider, ZIP_MAGIC, cache_payload, fetch};
use crate::domain::{AcquisitionResult, DateWindow, PayloadFormat, StrategyKind};
use crate::error::{AcquisitionFailure, AppError, EXIT_INPUT};

pub const BASE_URL: &str = "https://explorador.cr2.cl/request.php";
pub const REFERER_URL: &str = "https://explorador.cr2.cl/";

const DEFAULT_VERSION: &str = "explorador-v1";

/// JSON request descriptor sent as the `options` parameter.
#[derive(Debug, Clone, PartialEq)]
pub struct QueryDescriptor {
    pub version: String,
    pub blob: Value,
}

impl QueryDescriptor {
    /// Built-in descriptor: daily mean streamflow (`qflxDaily`) for one site,
    /// exported as a spreadsheet.
    pub fn builtin(station_code: &str, window: &DateWindow) -> Self {
        let (start, end) = window.epoch_range();
        let blob = json!({
            "variable": {
                "id": "qflxDaily",
                "var": "caudal",
                "intv": "daily",
                "season": "year",
                "stat": "mean",
                "minFrac": 80
            },
            "time": {
                "start": start,
                "end": end,
                "months": [1, 2, 3, 4, 5, 6, 7, 8, 9, 10, 11, 12]
            },
            "series": {
                "sites": [station_code],
                "start": null,
                "end": null
            },
            "export": {
                "series": "XLSX"
            },
            "action": ["export"]
        });
        Self {
            version: DEFAULT_VERSION.to_string(),
            blob,
        }
    }

    /// Load a user-supplied descriptor.
    ///
    /// The file is used as-is except that `series.sites`, `time.start` and
    /// `time.end` are overwritten when those keys already exist.
    pub fn from_file(path: &Path, station_code: &str, window: &DateWindow) -> Result<Self, AppError> {
        let text = fs::read_to_string(path).map_err(|e| {
            AppError::new(
                EXIT_INPUT,
                format!("Failed to read query descriptor '{}': {e}", path.display()),
            )
        })?;
        let mut blob: Value = serde_json::from_str(&text).map_err(|e| {
            AppError::new(
                EXIT_INPUT,
                format!("Invalid query descriptor JSON '{}': {e}", path.display()),
            )
        })?;

        let (start, end) = window.epoch_range();
        if let Some(sites) = blob.pointer_mut("/series/sites") {
            *sites = json!([station_code]);
        }
        if let Some(v) = blob.pointer_mut("/time/start") {
            *v = json!(start);
        }
        if let Some(v) = blob.pointer_mut("/time/end") {
            *v = json!(end);
        }

        let version = path
            .file_stem()
            .and_then(|s| s.to_str())
            .map(|s| format!("file:{s}"))
            .unwrap_or_else(|| "file".to_string());

        Ok(Self { version, blob })
    }

    /// Compact JSON for the query string (reqwest handles URL encoding).
    pub fn to_param(&self) -> String {
        self.blob.to_string()
    }
}

/// How a response body should be treated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ResponseKind {
    Spreadsheet,
    Archive,
    Delimited,
    Json,
    Html,
    Binary,
}

/// Classify a response from its declared content type, falling back to sniffing.
pub(crate) fn classify(content_type: &str, body: &[u8]) -> ResponseKind {
    let ct = content_type.to_ascii_lowercase();
    if ct.contains("spreadsheet") || ct.contains("excel") || ct.contains("xlsx") {
        return ResponseKind::Spreadsheet;
    }
    if ct.contains("zip") {
        return ResponseKind::Archive;
    }
    if ct.contains("json") || trimmed_starts_with(body, b'{') {
        return ResponseKind::Json;
    }
    if ct.contains("html") {
        return ResponseKind::Html;
    }
    if body.starts_with(ZIP_MAGIC) {
        // XLSX is itself a ZIP container; the extractor tells them apart.
        return ResponseKind::Spreadsheet;
    }
    if ct.contains("csv") || ct.starts_with("text/") || !body.contains(&0) {
        return ResponseKind::Delimited;
    }
    ResponseKind::Binary
}

fn trimmed_starts_with(body: &[u8], byte: u8) -> bool {
    body.iter()
        .find(|b| !b.is_ascii_whitespace())
        .is_some_and(|b| *b == byte)
}

/// Find an export link in a JSON answer.
///
/// Prefers the series export; the map export is only a last resort because it
/// holds spatial rather than time-series data.
pub fn find_export_url(body: &Value) -> Option<String> {
    let export = body.get("export")?;
    let pick = |v: Option<&Value>| -> Option<String> {
        match v? {
            Value::String(s) if s.starts_with("http") => Some(s.clone()),
            Value::Object(map) => map.get("url")?.as_str().map(str::to_string),
            _ => None,
        }
    };
    pick(export.get("series")).or_else(|| pick(export.get("map")))
}

pub struct ExploradorProvider {
    client: Client,
    base_url: String,
    descriptor: QueryDescriptor,
    cache_dir: PathBuf,
    cache_stem: String,
}

impl ExploradorProvider {
    pub fn new(client: Client, descriptor: QueryDescriptor, cache_dir: PathBuf, cache_stem: String) -> Self {
        Self {
            client,
            base_url: BASE_URL.to_string(),
            descriptor,
            cache_dir,
            cache_stem,
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    fn request(&self) -> Result<AcquisitionResult, AcquisitionFailure> {
        info!(
            "requesting export from {} (descriptor {})",
            self.base_url, self.descriptor.version
        );
        let param = self.descriptor.to_param();
        let payload = fetch(&self.client, &self.base_url, &[("options", param.as_str())])?;

        match interpret(payload)? {
            Interpreted::Data(result) => Ok(result),
            Interpreted::Link { url, body } => {
                info!("service answered with an export link: {url}");
                match fetch(&self.client, &url, &[]).and_then(interpret)? {
                    Interpreted::Data(result) => Ok(result),
                    // A link to another link is not followed.
                    Interpreted::Link { .. } => Err(AcquisitionFailure::UnexpectedJson { url, body }),
                }
            }
        }
    }

    fn cache(&self, result: &AcquisitionResult) {
        if let AcquisitionResult::RawBytes { format, payload } = result {
            let path = self
                .cache_dir
                .join(format!("{}.{}", self.cache_stem, format.extension()));
            cache_payload(&path, payload);
        }
    }
}

impl SourceProvider for ExploradorProvider {
    fn kind(&self) -> StrategyKind {
        StrategyKind::Api
    }

    fn attempt(&self) -> AcquisitionResult {
        match self.request() {
            Ok(result) => {
                self.cache(&result);
                result
            }
            Err(failure) => AcquisitionResult::Failure(failure),
        }
    }
}

/// Outcome of classifying one HTTP answer.
#[derive(Debug)]
pub(crate) enum Interpreted {
    Data(AcquisitionResult),
    /// JSON answer carrying an export URL; `body` is kept for diagnostics.
    Link { url: String, body: Value },
}

pub(crate) fn interpret(payload: HttpPayload) -> Result<Interpreted, AcquisitionFailure> {
    let HttpPayload {
        url,
        content_type,
        body,
    } = payload;

    let format = match classify(&content_type, &body) {
        ResponseKind::Spreadsheet => PayloadFormat::Xlsx,
        ResponseKind::Archive => PayloadFormat::Zip,
        ResponseKind::Delimited => PayloadFormat::Delimited,
        ResponseKind::Json => {
            let value = match serde_json::from_slice::<Value>(&body) {
                Ok(v) => v,
                Err(e) => {
                    warn!("response declared JSON but did not parse: {e}");
                    Value::String(String::from_utf8_lossy(&body).into_owned())
                }
            };
            return match find_export_url(&value) {
                Some(link) => Ok(Interpreted::Link { url: link, body: value }),
                None => Err(AcquisitionFailure::UnexpectedJson { url, body: value }),
            };
        }
        ResponseKind::Html | ResponseKind::Binary => {
            return Err(AcquisitionFailure::UnsupportedContentType { url, content_type });
        }
    };

    Ok(Interpreted::Data(AcquisitionResult::RawBytes {
        format,
        payload: body,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn window() -> DateWindow {
        DateWindow {
            start: NaiveDate::from_ymd_opt(1960, 1, 1).unwrap(),
            end: NaiveDate::from_ymd_opt(2025, 12, 31).unwrap(),
        }
    }

    fn payload(content_type: &str, body: &[u8]) -> HttpPayload {
        HttpPayload {
            url: "https://explorador.test/request.php".to_string(),
            content_type: content_type.to_string(),
            body: body.to_vec(),
        }
    }

    #[test]
    fn builtin_descriptor_carries_station_and_epoch_range() {
        let q = QueryDescriptor::builtin("10111001", &window());
        assert_eq!(q.blob["series"]["sites"][0], "10111001");
        assert_eq!(q.blob["variable"]["id"], "qflxDaily");
        assert_eq!(q.blob["time"]["start"], -315_619_200);
        assert_eq!(q.blob["time"]["end"], 1_767_225_599);
        assert!(!q.to_param().contains(' '));
    }

    #[test]
    fn file_descriptor_is_opaque_but_patched() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("custom.json");
        fs::write(
            &path,
            r#"{"series":{"sites":["0"]},"time":{"start":0},"extra":{"keep":true}}"#,
        )
        .unwrap();

        let q = QueryDescriptor::from_file(&path, "10111001", &window()).unwrap();
        assert_eq!(q.version, "file:custom");
        assert_eq!(q.blob["series"]["sites"][0], "10111001");
        assert_eq!(q.blob["time"]["start"], -315_619_200);
        assert!(q.blob["time"].get("end").is_none());
        assert_eq!(q.blob["extra"]["keep"], true);
    }

    #[test]
    fn classify_by_content_type_and_magic() {
        let xlsx = "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet";
        assert_eq!(classify(xlsx, b"PK\x03\x04"), ResponseKind::Spreadsheet);
        assert_eq!(classify("application/zip", b"PK\x03\x04"), ResponseKind::Archive);
        assert_eq!(classify("application/json; charset=utf-8", b"{}"), ResponseKind::Json);
        assert_eq!(classify("text/plain", b"  {\"a\":1}"), ResponseKind::Json);
        assert_eq!(classify("text/html", b"<html>"), ResponseKind::Html);
        assert_eq!(classify("text/csv", b"date,q\n"), ResponseKind::Delimited);
        assert_eq!(classify("application/octet-stream", b"PK\x03\x04.."), ResponseKind::Spreadsheet);
        assert_eq!(classify("application/octet-stream", b"\x00\x01"), ResponseKind::Binary);
    }

    #[test]
    fn json_without_link_is_surfaced_not_parsed_as_data() {
        let body = br#"{"status":"ok","message":"no data for site"}"#;
        let err = interpret(payload("application/json", body)).unwrap_err();
        match err {
            AcquisitionFailure::UnexpectedJson { body, .. } => {
                assert_eq!(body["message"], "no data for site");
            }
            other => panic!("expected UnexpectedJson, got {other:?}"),
        }
    }

    #[test]
    fn malformed_json_is_surfaced_as_text() {
        let err = interpret(payload("application/json", b"{not json")).unwrap_err();
        match err {
            AcquisitionFailure::UnexpectedJson { body, .. } => assert_eq!(body, "{not json"),
            other => panic!("expected UnexpectedJson, got {other:?}"),
        }
    }

    #[test]
    fn json_with_series_link_is_followable() {
        let body = br#"{"export":{"map":{"url":"https://x.test/map.csv"},"series":{"url":"https://x.test/s.xlsx"}}}"#;
        match interpret(payload("application/json", body)).unwrap() {
            Interpreted::Link { url, .. } => assert_eq!(url, "https://x.test/s.xlsx"),
            other => panic!("expected a link, got {other:?}"),
        }
    }

    #[test]
    fn export_url_fallbacks() {
        let as_string = json!({ "export": { "series": "https://x.test/s.csv" } });
        assert_eq!(find_export_url(&as_string).as_deref(), Some("https://x.test/s.csv"));

        let map_only = json!({ "export": { "map": { "url": "https://x.test/m.csv" } } });
        assert_eq!(find_export_url(&map_only).as_deref(), Some("https://x.test/m.csv"));

        let label_only = json!({ "export": { "series": "CSV" } });
        assert_eq!(find_export_url(&label_only), None);
        assert_eq!(find_export_url(&json!({ "status": 1 })), None);
    }

    #[test]
    fn spreadsheet_response_becomes_raw_bytes() {
        match interpret(payload("application/vnd.ms-excel", b"PK\x03\x04rest")).unwrap() {
            Interpreted::Data(AcquisitionResult::RawBytes { format, payload }) => {
                assert_eq!(format, PayloadFormat::Xlsx);
                assert_eq!(payload.len(), 8);
            }
            other => panic!("expected raw bytes, got {other:?}"),
        }
    }

    #[test]
    fn html_is_unsupported() {
        let err = interpret(payload("text/html; charset=UTF-8", b"<html></html>")).unwrap_err();
        assert!(matches!(err, AcquisitionFailure::UnsupportedContentType { .. }));
    }
}
