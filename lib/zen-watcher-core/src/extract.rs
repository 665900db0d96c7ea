//! Dotted-path field extraction over loosely-typed source documents.
//!
//! A path that starts with `.` is a lookup into the document; any other
//! string is treated as a literal constant. Lookups never panic on a type
//! mismatch — a missing or wrongly-shaped intermediate always yields
//! [`serde_json::Value::Null`].

use std::sync::Arc;

use dashmap::DashMap;
use path_cache::PathCache;
use serde_json::Value;

/// Extract `path` from `doc`. Empty path and missing intermediates both
/// yield `Value::Null`. A path not prefixed with `.` is returned verbatim as
/// a string constant, doubling as the "literal" branch of a field mapping.
pub fn extract(doc: &Value, path: &str) -> Value {
    if path.is_empty() {
        return Value::Null;
    }
    if !path.starts_with('.') {
        return Value::String(path.to_owned());
    }

    let segments = PathCache::global().segments(path);
    let mut current = doc;
    for segment in segments.iter() {
        if let Value::Array(items) = current {
            match items.first() {
                Some(first) => current = first,
                None => return Value::Null,
            }
        }
        match current.as_object().and_then(|obj| obj.get(segment)) {
            Some(next) => current = next,
            None => return Value::Null,
        }
    }

    if let Value::Array(items) = current {
        return items.first().cloned().unwrap_or(Value::Null);
    }
    current.clone()
}

/// Extract `path` from `doc` and coerce the result to a string, if it is a
/// string or can be trivially rendered as one (numbers, booleans). Returns
/// `None` for missing values, objects, arrays, and null.
pub fn extract_str(doc: &Value, path: &str) -> Option<String> {
    match extract(doc, path) {
        Value::String(s) => Some(s),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

mod path_cache {
    //! A tiny memoizing split-path cache, global for the process.
    use super::*;
    use std::sync::OnceLock;

    pub struct PathCache {
        entries: DashMap<String, Arc<Vec<String>>>,
    }

    static CACHE: OnceLock<PathCache> = OnceLock::new();

    impl PathCache {
        pub fn global() -> &'static PathCache {
            CACHE.get_or_init(|| PathCache {
                entries: DashMap::new(),
            })
        }

        /// Returns the cached split of `path` (minus its leading `.`),
        /// computing and inserting it on first use. Reads never block
        /// writers of unrelated keys.
        pub fn segments(&self, path: &str) -> Arc<Vec<String>> {
            if let Some(existing) = self.entries.get(path) {
                return Arc::clone(&existing);
            }
            let split: Vec<String> = path
                .trim_start_matches('.')
                .split('.')
                .filter(|s| !s.is_empty())
                .map(ToOwned::to_owned)
                .collect();
            let split = Arc::new(split);
            self.entries.insert(path.to_owned(), Arc::clone(&split));
            split
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn literal_constant_bypasses_lookup() {
        assert_eq!(extract(&json!({}), "vulnerability"), json!("vulnerability"));
    }

    #[test]
    fn empty_path_is_null() {
        assert_eq!(extract(&json!({"a": 1}), ""), Value::Null);
    }

    #[test]
    fn nested_lookup() {
        let doc = json!({"report": {"vulnerabilities": [{"severity": "CRITICAL"}]}});
        assert_eq!(
            extract(&doc, ".report.vulnerabilities.severity"),
            json!("CRITICAL")
        );
    }

    #[test]
    fn missing_intermediate_is_null() {
        let doc = json!({"a": {}});
        assert_eq!(extract(&doc, ".a.b.c"), Value::Null);
    }

    #[test]
    fn type_mismatch_does_not_panic() {
        let doc = json!({"a": "not an object"});
        assert_eq!(extract(&doc, ".a.b"), Value::Null);
    }

    #[test]
    fn repeated_calls_are_idempotent() {
        let doc = json!({"a": {"b": 42}});
        let first = extract(&doc, ".a.b");
        let second = extract(&doc, ".a.b");
        assert_eq!(first, second);
    }
}
