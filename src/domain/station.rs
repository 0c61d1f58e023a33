//! Station identity and accent-insensitive alias matching.
//!
//! Source files spell the station name inconsistently ("Riñihue", "RINIHUE",
//! "rinihue", or just the gauge code). All comparisons go through
//! [`normalize`] so extraction code never does ad hoc string checks.

use unicode_normalization::UnicodeNormalization;
use unicode_normalization::char::is_combining_mark;

/// Aliases shorter than this only match exactly, never as a substring.
const MIN_CONTAINS_LEN: usize = 4;

/// Normalize a label for comparison: strip diacritics, lowercase, drop
/// everything that is not alphanumeric.
pub fn normalize(s: &str) -> String {
    s.nfd()
        .filter(|c| !is_combining_mark(*c))
        .flat_map(char::to_lowercase)
        .filter(|c| c.is_alphanumeric())
        .collect()
}

/// The target station: gauge code, display name, and the alias set used to
/// find it in column headers, sheet names and file names.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StationAliases {
    code: String,
    name: String,
    aliases: Vec<String>,
    normalized: Vec<String>,
}

impl StationAliases {
    /// Build the alias set from the code, the display name and any extra spellings.
    pub fn new(code: impl Into<String>, name: impl Into<String>, extra: &[String]) -> Self {
        let code = code.into().trim().to_string();
        let name = name.into().trim().to_string();

        let mut aliases: Vec<String> = Vec::new();
        let mut normalized: Vec<String> = Vec::new();
        let candidates = [code.clone(), name.clone()]
            .into_iter()
            .chain(extra.iter().map(|s| s.trim().to_string()));
        for alias in candidates {
            let key = normalize(&alias);
            if key.is_empty() || normalized.contains(&key) {
                continue;
            }
            aliases.push(alias);
            normalized.push(key);
        }

        Self {
            code,
            name,
            aliases,
            normalized,
        }
    }

    pub fn code(&self) -> &str {
        &self.code
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn aliases(&self) -> &[String] {
        &self.aliases
    }

    /// File-name friendly identifier (`Riñihue` -> `rinihue`).
    pub fn slug(&self) -> String {
        let slug = normalize(&self.name);
        if slug.is_empty() { normalize(&self.code) } else { slug }
    }

    /// Exact match on the normalized form.
    pub fn matches_exactly(&self, label: &str) -> bool {
        let key = normalize(label);
        !key.is_empty() && self.normalized.iter().any(|a| *a == key)
    }

    /// Exact match, or the label contains a sufficiently long alias.
    pub fn matches(&self, label: &str) -> bool {
        let key = normalize(label);
        if key.is_empty() {
            return false;
        }
        self.normalized
            .iter()
            .any(|a| *a == key || (a.chars().count() >= MIN_CONTAINS_LEN && key.contains(a.as_str())))
    }

    /// Index of the header naming this station. Exact matches win over substring matches.
    pub fn find_column<S: AsRef<str>>(&self, headers: &[S]) -> Option<usize> {
        headers
            .iter()
            .position(|h| self.matches_exactly(h.as_ref()))
            .or_else(|| headers.iter().position(|h| self.matches(h.as_ref())))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rinihue() -> StationAliases {
        StationAliases::new("10111001", "Riñihue", &["rinihue".to_string()])
    }

    #[test]
    fn normalize_strips_accents_case_and_punctuation() {
        assert_eq!(normalize("Riñihue"), "rinihue");
        assert_eq!(normalize("  RIÑIHUE "), "rinihue");
        assert_eq!(normalize("Río Bueno (m3/s)"), "riobuenom3s");
        assert_eq!(normalize("gauge_id"), "gaugeid");
    }

    #[test]
    fn aliases_are_deduplicated_by_normalized_form() {
        let station = rinihue();
        assert_eq!(station.aliases(), &["10111001".to_string(), "Riñihue".to_string()]);
        assert_eq!(station.slug(), "rinihue");
    }

    #[test]
    fn upper_case_header_matches_lower_case_alias() {
        let station = StationAliases::new("10111001", "", &["rinihue".to_string()]);
        let headers = ["date", "RINIHUE"];
        assert_eq!(station.find_column(&headers), Some(1));
    }

    #[test]
    fn exact_match_preferred_over_substring() {
        let station = rinihue();
        let headers = ["fecha", "q_rinihue_flag", "10111001"];
        assert_eq!(station.find_column(&headers), Some(2));

        let headers = ["fecha", "Caudal Riñihue (m3/s)"];
        assert_eq!(station.find_column(&headers), Some(1));
    }

    #[test]
    fn short_aliases_only_match_exactly() {
        let station = StationAliases::new("42", "", &[]);
        assert!(station.matches("42"));
        assert!(!station.matches("1042001"));
        assert_eq!(station.find_column(&["date", "1042001"]), None);
    }

    #[test]
    fn slug_falls_back_to_code() {
        let station = StationAliases::new("10111001", "", &[]);
        assert_eq!(station.slug(), "10111001");
    }
}
