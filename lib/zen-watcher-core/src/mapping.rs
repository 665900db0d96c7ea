//! Declarative field mapping: pull a value out of a raw source document and
//! write it to a field on the outgoing [`Event`] under construction.

use std::collections::HashMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::extract::extract;

/// One field-mapping rule. Precedence when multiple are set on a single
/// rule: `constant` > `static_mappings` (requires `from`) > plain `from`
/// copy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FieldMapping {
    #[serde(default)]
    pub from: Option<String>,
    pub to: String,
    #[serde(default)]
    pub constant: Option<Value>,
    #[serde(rename = "staticMappings", default)]
    pub static_mappings: Option<HashMap<String, Value>>,
}

/// The result of applying one mapping: a field name and its resolved value,
/// or `None` if the mapping should be skipped (e.g. a `staticMappings` miss).
pub struct MappedField {
    pub to: String,
    pub value: Value,
}

impl FieldMapping {
    /// Apply this mapping against `doc`, returning the field to set or
    /// `None` to skip it.
    pub fn apply(&self, doc: &Value) -> Option<MappedField> {
        if let Some(constant) = &self.constant {
            return Some(MappedField {
                to: self.to.clone(),
                value: constant.clone(),
            });
        }

        let from = self.from.as_deref()?;
        let extracted = extract(doc, from);

        if let Some(table) = &self.static_mappings {
            let key = value_as_lookup_key(&extracted)?;
            let mapped = table.get(&key)?;
            return Some(MappedField {
                to: self.to.clone(),
                value: mapped.clone(),
            });
        }

        if extracted.is_null() {
            return None;
        }

        if self.to == "ttl" {
            let seconds = parse_ttl(&extracted)?;
            return Some(MappedField {
                to: self.to.clone(),
                value: Value::from(seconds),
            });
        }

        Some(MappedField {
            to: self.to.clone(),
            value: extracted,
        })
    }
}

fn value_as_lookup_key(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

/// Parse a TTL value that may be a plain integer (seconds) or a string with
/// a duration suffix (`s`, `m`, `h`, `d`, `w`).
fn parse_ttl(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => parse_duration_suffix(s),
        _ => None,
    }
}

/// Recognizes a single `s, m, h, d, w` suffix; a bare integer string is
/// seconds.
fn parse_duration_suffix(raw: &str) -> Option<i64> {
    let raw = raw.trim();
    if let Ok(seconds) = raw.parse::<i64>() {
        return Some(seconds);
    }
    let (number, unit) = raw.split_at(raw.len().checked_sub(1)?);
    let n: i64 = number.parse().ok()?;
    let multiplier = match unit {
        "s" => 1,
        "m" => 60,
        "h" => 3600,
        "d" => 86_400,
        "w" => 604_800,
        _ => return None,
    };
    n.checked_mul(multiplier)
}

/// Convenience for callers that already have a `Duration` in hand and want
/// the raw-string parser's inverse for logging/tests.
pub fn format_duration_seconds(duration: Duration) -> i64 {
    duration.as_secs() as i64
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn constant_takes_precedence() {
        let mapping = FieldMapping {
            from: Some(".severity".into()),
            to: "eventType".into(),
            constant: Some(json!("vulnerability")),
            static_mappings: None,
        };
        let doc = json!({"severity": "HIGH"});
        let result = mapping.apply(&doc).unwrap();
        assert_eq!(result.value, json!("vulnerability"));
    }

    #[test]
    fn static_mapping_miss_is_skipped() {
        let mut table = HashMap::new();
        table.insert("HIGH".to_string(), json!("high"));
        let mapping = FieldMapping {
            from: Some(".severity".into()),
            to: "severity".into(),
            constant: None,
            static_mappings: Some(table),
        };
        let doc = json!({"severity": "WEIRD"});
        assert!(mapping.apply(&doc).is_none());
    }

    #[test]
    fn plain_copy() {
        let mapping = FieldMapping {
            from: Some(".metadata.name".into()),
            to: "resource.name".into(),
            constant: None,
            static_mappings: None,
        };
        let doc = json!({"metadata": {"name": "api"}});
        let result = mapping.apply(&doc).unwrap();
        assert_eq!(result.value, json!("api"));
    }

    #[test]
    fn ttl_parses_duration_suffix() {
        let mapping = FieldMapping {
            from: Some(".ttl".into()),
            to: "ttl".into(),
            constant: None,
            static_mappings: None,
        };
        for (input, expected) in [("30s", 30), ("5m", 300), ("2h", 7200), ("1d", 86_400), ("1w", 604_800), ("120", 120)] {
            let doc = json!({"ttl": input});
            let result = mapping.apply(&doc).unwrap();
            assert_eq!(result.value, json!(expected), "input {input}");
        }
    }

    #[test]
    fn missing_from_without_constant_is_skipped() {
        let mapping = FieldMapping {
            from: Some(".nope".into()),
            to: "severity".into(),
            constant: None,
            static_mappings: None,
        };
        assert!(mapping.apply(&json!({})).is_none());
    }
}
