//! Severity and eventType normalizers, plus per-source severity remap
//! tables.

use std::collections::HashMap;

use regex::Regex;
use std::sync::OnceLock;

use crate::event::Severity;

/// Case-insensitive collapse of an arbitrary severity token onto the
/// canonical enum. Never produces an "unknown" value — unrecognized input
/// becomes [`Severity::Info`]. Idempotent: `normalize_severity(s.to_string())
/// == normalize_severity(normalize_severity(s).to_string())`.
pub fn normalize_severity(raw: &str) -> Severity {
    match raw.to_ascii_lowercase().as_str() {
        "critical" | "fatal" | "emergency" => Severity::Critical,
        "high" | "error" | "alert" => Severity::High,
        "medium" | "warning" | "warn" => Severity::Medium,
        "low" | "informational" => Severity::Low,
        "info" => Severity::Info,
        _ => Severity::Info,
    }
}

fn event_type_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"[^a-z0-9_]").expect("static eventType regex"))
}

/// Lowercase `raw`, replace every character outside `[a-z0-9_]` with `_`.
/// Empty input (before or after normalization) becomes `custom_event`. The
/// CRD schema constrains `eventType` to `^[a-z0-9_]+$`; this function's
/// output always satisfies that pattern.
pub fn normalize_event_type(raw: &str) -> String {
    if raw.is_empty() {
        return "custom_event".to_owned();
    }
    let lowered = raw.to_ascii_lowercase();
    let replaced = event_type_pattern().replace_all(&lowered, "_").into_owned();
    if replaced.is_empty() {
        "custom_event".to_owned()
    } else {
        replaced
    }
}

/// A per-source table mapping raw tool-specific severity tokens to canonical
/// tokens, applied *before* [`normalize_severity`]. For example Falco
/// priorities: `emergency|critical -> critical`, `alert|error -> high`.
#[derive(Debug, Clone, Default)]
pub struct SeverityRemap {
    table: HashMap<String, String>,
}

impl SeverityRemap {
    pub fn new(table: HashMap<String, String>) -> Self {
        Self { table }
    }

    /// Apply the remap (case-insensitive lookup), falling through to the raw
    /// value if no entry matches.
    pub fn apply<'a>(&'a self, raw: &'a str) -> &'a str {
        self.table
            .get(&raw.to_ascii_lowercase())
            .map(String::as_str)
            .unwrap_or(raw)
    }
}

/// Convenience: remap then normalize in one call.
pub fn normalize_with_remap(raw: &str, remap: &SeverityRemap) -> Severity {
    normalize_severity(remap.apply(raw))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn severity_normalization_is_idempotent() {
        for raw in ["CRITICAL", "Warn", "bogus", "info", "ALERT"] {
            let once = normalize_severity(raw);
            let twice = normalize_severity(&once.to_string());
            assert_eq!(once, twice);
        }
    }

    #[test]
    fn unknown_severity_becomes_info_not_unknown() {
        assert_eq!(normalize_severity("flibbertigibbet"), Severity::Info);
    }

    #[test]
    fn event_type_normalization_matches_crd_regex() {
        let regex = Regex::new("^[a-z0-9_]+$").unwrap();
        for raw in ["Access Control!!", "", "already_ok", "CVE-2024-1234"] {
            let normalized = normalize_event_type(raw);
            assert!(regex.is_match(&normalized), "{normalized} failed regex");
        }
    }

    #[test]
    fn event_type_normalization_is_idempotent() {
        for raw in ["Weird Token!!", "already_fine", ""] {
            let once = normalize_event_type(raw);
            let twice = normalize_event_type(&once);
            assert_eq!(once, twice);
        }
    }

    #[test]
    fn severity_remap_applies_before_normalization() {
        let mut table = HashMap::new();
        table.insert("emergency".to_string(), "critical".to_string());
        table.insert("notice".to_string(), "low".to_string());
        let remap = SeverityRemap::new(table);
        assert_eq!(normalize_with_remap("Emergency", &remap), Severity::Critical);
        assert_eq!(normalize_with_remap("notice", &remap), Severity::Low);
        // unmapped raw values fall through to the plain normalizer
        assert_eq!(normalize_with_remap("warning", &remap), Severity::Medium);
    }
}
