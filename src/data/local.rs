//! Local data directory provider.
//!
//! Last resort when every remote strategy failed: look for a file someone
//! placed under the data directory by hand (or a cache left by an earlier run).
//!
//! A candidate matches the station when, in order of preference:
//! - its file name contains one of the station aliases
//! - it is a ZIP archive with an entry named after an alias
//! - its first bytes mention an alias (e.g. a column header)

use std::fs;
use std::io::Read;
use std::path::{Path, PathBuf};

use tracing::{debug, info};

use crate::data::SourceProvider;
use crate::domain::station::normalize;
use crate::domain::{AcquisitionResult, PayloadFormat, StationAliases, StrategyKind};
use crate::error::AcquisitionFailure;

/// Directory recursion depth when scanning for data files.
const DEFAULT_SEARCH_DEPTH: usize = 4;

/// Bytes read from a file when sniffing its contents for a station alias.
const CONTENT_SNIFF_BYTES: usize = 500;

pub struct LocalProvider {
    data_dir: PathBuf,
    station: StationAliases,
}

impl LocalProvider {
    pub fn new(data_dir: PathBuf, station: StationAliases) -> Self {
        Self { data_dir, station }
    }

    /// Every matching file, best match first.
    fn find_all(&self) -> Vec<PathBuf> {
        let files = discover_data_files(&self.data_dir, DEFAULT_SEARCH_DEPTH);
        debug!(
            "{} candidate file(s) under {}",
            files.len(),
            self.data_dir.display()
        );

        let by_name = files.iter().filter(|p| {
            p.file_stem()
                .and_then(|s| s.to_str())
                .map(|stem| self.station.matches(stem))
                .unwrap_or(false)
        });
        let by_entry = files.iter().filter(|p| {
            PayloadFormat::from_path(p) == Some(PayloadFormat::Zip)
                && zip_entry_names(p)
                    .iter()
                    .any(|name| self.station.matches(entry_stem(name)))
        });
        let by_content = files
            .iter()
            .filter(|p| PayloadFormat::from_path(p) == Some(PayloadFormat::Delimited))
            .filter(|p| content_mentions(p, &self.station));

        let mut out: Vec<PathBuf> = Vec::new();
        for path in by_name.chain(by_entry).chain(by_content) {
            if !out.contains(path) {
                out.push(path.clone());
            }
        }
        out
    }

    fn missing(&self) -> AcquisitionResult {
        AcquisitionResult::Failure(AcquisitionFailure::MissingLocalFile {
            path: self.data_dir.clone(),
        })
    }
}

impl SourceProvider for LocalProvider {
    fn kind(&self) -> StrategyKind {
        StrategyKind::Local
    }

    fn attempt(&self) -> AcquisitionResult {
        match self.find_all().into_iter().next() {
            Some(path) => {
                info!("using local file {}", pretty_path(&path));
                AcquisitionResult::FilePath(path)
            }
            None => self.missing(),
        }
    }

    /// A cache left by a rejected download can match by name too, so every
    /// match is offered, not only the best one.
    fn candidates(&self) -> Vec<AcquisitionResult> {
        let found = self.find_all();
        if found.is_empty() {
            return vec![self.missing()];
        }
        info!(
            "local matches: {}",
            found.iter().map(|p| pretty_path(p)).collect::<Vec<_>>().join(", ")
        );
        found.into_iter().map(AcquisitionResult::FilePath).collect()
    }
}

/// Discover data files (`.csv`, `.txt`, `.xlsx`, `.zip`, ...) under `root`, in
/// deterministic order.
pub fn discover_data_files(root: &Path, max_depth: usize) -> Vec<PathBuf> {
    let mut out = Vec::new();
    discover_data_files_inner(root, 0, max_depth, &mut out);
    out.sort_by(|a, b| pretty_path(a).cmp(&pretty_path(b)));
    out
}

fn discover_data_files_inner(root: &Path, depth: usize, max_depth: usize, out: &mut Vec<PathBuf>) {
    if depth > max_depth {
        return;
    }

    let Ok(entries) = fs::read_dir(root) else {
        return;
    };

    for entry in entries.flatten() {
        let path = entry.path();
        let file_type = match entry.file_type() {
            Ok(ft) => ft,
            Err(_) => continue,
        };

        if file_type.is_dir() {
            if should_skip_dir(&path) {
                continue;
            }
            discover_data_files_inner(&path, depth + 1, max_depth, out);
            continue;
        }

        if file_type.is_file() && !is_hidden(&path) && PayloadFormat::from_path(&path).is_some() {
            out.push(path);
        }
    }
}

fn should_skip_dir(path: &Path) -> bool {
    let name = path.file_name().and_then(|s| s.to_str()).unwrap_or("");
    matches!(name, ".git" | "target" | "node_modules")
}

/// Temporary files from an interrupted atomic write start with a dot.
fn is_hidden(path: &Path) -> bool {
    path.file_name()
        .and_then(|s| s.to_str())
        .map(|s| s.starts_with('.'))
        .unwrap_or(false)
}

fn pretty_path(path: &Path) -> String {
    let stripped = path.strip_prefix("./").unwrap_or(path);
    stripped.display().to_string()
}

fn zip_entry_names(path: &Path) -> Vec<String> {
    let Ok(file) = fs::File::open(path) else {
        return Vec::new();
    };
    match zip::ZipArchive::new(file) {
        Ok(archive) => archive.file_names().map(str::to_string).collect(),
        Err(e) => {
            debug!("skipping unreadable archive {}: {e}", path.display());
            Vec::new()
        }
    }
}

/// `dir/10111001.csv` -> `10111001`
fn entry_stem(name: &str) -> &str {
    let base = name.rsplit('/').next().unwrap_or(name);
    base.rsplit_once('.').map(|(stem, _)| stem).unwrap_or(base)
}

fn content_mentions(path: &Path, station: &StationAliases) -> bool {
    let Ok(file) = fs::File::open(path) else {
        return false;
    };
    let mut head = Vec::with_capacity(CONTENT_SNIFF_BYTES);
    if file
        .take(CONTENT_SNIFF_BYTES as u64)
        .read_to_end(&mut head)
        .is_err()
    {
        return false;
    }
    let text = normalize(&String::from_utf8_lossy(&head));
    station
        .aliases()
        .iter()
        .map(|a| normalize(a))
        .any(|alias| !alias.is_empty() && text.contains(&alias))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn station() -> StationAliases {
        StationAliases::new("10111001", "Riñihue", &[])
    }

    fn touch(path: &Path, contents: &str) {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).unwrap();
        }
        fs::write(path, contents).unwrap();
    }

    #[test]
    fn missing_directory_is_a_failure() {
        let dir = tempfile::tempdir().unwrap();
        let provider = LocalProvider::new(dir.path().join("nope"), station());
        assert!(matches!(
            provider.attempt(),
            AcquisitionResult::Failure(AcquisitionFailure::MissingLocalFile { .. })
        ));
    }

    #[test]
    fn file_name_match_wins_over_content_match() {
        let dir = tempfile::tempdir().unwrap();
        touch(&dir.path().join("a_other.csv"), "date,RINIHUE\n2020-01-01,1\n");
        touch(&dir.path().join("sub").join("rinihue_q.csv"), "date,q\n2020-01-01,1\n");

        let provider = LocalProvider::new(dir.path().to_path_buf(), station());
        match provider.attempt() {
            AcquisitionResult::FilePath(p) => assert!(p.ends_with("sub/rinihue_q.csv")),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn content_match_finds_headers() {
        let dir = tempfile::tempdir().unwrap();
        touch(&dir.path().join("notes.txt"), "nothing here\n");
        touch(&dir.path().join("q.csv"), "fecha;10111001\n2020-01-01;1\n");

        let provider = LocalProvider::new(dir.path().to_path_buf(), station());
        match provider.attempt() {
            AcquisitionResult::FilePath(p) => assert!(p.ends_with("q.csv")),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn zip_entry_names_are_matched() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("camels.zip");
        let file = fs::File::create(&path).unwrap();
        let mut writer = zip::ZipWriter::new(file);
        let options: zip::write::FileOptions<'_, ()> = zip::write::FileOptions::default();
        writer.start_file("q/10111001.csv", options).unwrap();
        writer.write_all(b"date,q\n2020-01-01,1\n").unwrap();
        writer.finish().unwrap();

        let provider = LocalProvider::new(dir.path().to_path_buf(), station());
        match provider.attempt() {
            AcquisitionResult::FilePath(p) => assert_eq!(p, path),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn every_match_is_a_candidate_best_first() {
        let dir = tempfile::tempdir().unwrap();
        touch(&dir.path().join("rinihue_raw.csv"), "Service temporarily unavailable\n");
        touch(&dir.path().join("streamflow_rinihue.csv"), "date,rinihue\n2020-01-01,1\n");
        touch(&dir.path().join("q.csv"), "date,10111001\n2020-01-01,1\n");

        let provider = LocalProvider::new(dir.path().to_path_buf(), station());
        let names: Vec<String> = provider
            .candidates()
            .into_iter()
            .map(|c| match c {
                AcquisitionResult::FilePath(p) => p.file_name().unwrap().to_string_lossy().into_owned(),
                other => panic!("unexpected {other:?}"),
            })
            .collect();
        assert_eq!(names, vec!["rinihue_raw.csv", "streamflow_rinihue.csv", "q.csv"]);
    }

    #[test]
    fn no_match_is_a_single_failure_candidate() {
        let dir = tempfile::tempdir().unwrap();
        touch(&dir.path().join("other.csv"), "date,q\n");
        let candidates = LocalProvider::new(dir.path().to_path_buf(), station()).candidates();
        assert_eq!(candidates.len(), 1);
        assert!(matches!(
            candidates[0],
            AcquisitionResult::Failure(AcquisitionFailure::MissingLocalFile { .. })
        ));
    }

    #[test]
    fn hidden_and_unknown_files_are_ignored() {
        let dir = tempfile::tempdir().unwrap();
        touch(&dir.path().join(".streamflow-rinihue.csv"), "x");
        touch(&dir.path().join("rinihue.json"), "{}");
        touch(&dir.path().join(".git").join("rinihue.csv"), "x");
        assert!(discover_data_files(dir.path(), DEFAULT_SEARCH_DEPTH).is_empty());
    }

    #[test]
    fn entry_stem_strips_dirs_and_extension() {
        assert_eq!(entry_stem("q/10111001.csv"), "10111001");
        assert_eq!(entry_stem("plain"), "plain");
    }
}
