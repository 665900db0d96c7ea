//! Content fingerprinting and [`DedupKey`] derivation.

use sha2::{Digest, Sha256};
use std::fmt;

use crate::event::Event;

/// The reason candidates, in priority order, used to pick `DedupKey.reason`.
const REASON_KEYS: &[&str] = &[
    "reason",
    "rule",
    "testNumber",
    "checkId",
    "vulnerabilityID",
    "auditID",
];

/// The message candidates, in priority order, hashed into `messageHash`.
const MESSAGE_KEYS: &[&str] = &["message", "output"];

/// `(source, namespace, kind, name, reason, messageHash)` — identifies "the
/// same finding" across repeated arrivals.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DedupKey {
    pub source: String,
    pub namespace: String,
    pub kind: String,
    pub name: String,
    pub reason: String,
    pub message_hash: String,
}

impl DedupKey {
    /// Derive the key for `event`. `reason` falls back to `event_type` if no
    /// `details` field matches; `messageHash` is a 16-byte (32 hex char)
    /// SHA-256 prefix over the first non-empty of `details.message|output`,
    /// or over an empty string if neither is present.
    pub fn derive(event: &Event) -> Self {
        let reason = event
            .first_detail_str(REASON_KEYS)
            .unwrap_or_else(|| event.event_type.clone());
        let message = event.first_detail_str(MESSAGE_KEYS).unwrap_or_default();
        let (kind, name) = match &event.resource {
            Some(r) => (r.kind.clone(), r.name.clone()),
            None => (String::new(), String::new()),
        };
        Self {
            source: event.source.clone(),
            namespace: event.namespace.clone(),
            kind,
            name,
            reason,
            message_hash: hash_prefix(&message),
        }
    }

    /// Canonical string form, used as the dedup cache key.
    pub fn canonical(&self) -> String {
        format!(
            "{}\u{1f}{}\u{1f}{}\u{1f}{}\u{1f}{}\u{1f}{}",
            self.source, self.namespace, self.kind, self.name, self.reason, self.message_hash
        )
    }
}

impl fmt::Display for DedupKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.canonical())
    }
}

/// First 16 bytes (32 hex chars) of the SHA-256 digest of `content`.
pub fn hash_prefix(content: &str) -> String {
    let digest = Sha256::digest(content.as_bytes());
    hex_encode(&digest[..16])
}

fn hex_encode(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len() * 2);
    for b in bytes {
        out.push_str(&format!("{b:02x}"));
    }
    out
}

/// Derive a stable per-source fingerprint for a raw finding, used by
/// adapters that need a fingerprint ahead of full `Event` construction (for
/// example, to dedupe parse failures by shape). Falls back to a SHA-256 of
/// the canonicalized raw JSON when no well-known identifying fields are
/// present.
pub fn fingerprint_raw(source: &str, candidates: &[Option<&str>], raw: &serde_json::Value) -> String {
    let identity: String = candidates
        .iter()
        .filter_map(|c| *c)
        .filter(|s| !s.is_empty())
        .collect::<Vec<_>>()
        .join("/");
    if !identity.is_empty() {
        return format!("{source}:{identity}");
    }
    let canonical = canonicalize(raw);
    format!("{source}:{}", hash_prefix(&canonical))
}

/// Deterministic string form of a JSON value: keys sorted, no whitespace.
/// `serde_json::Value`'s `Display` already sorts map keys when built from a
/// `BTreeMap`-backed feature, but we don't assume that; sort explicitly.
fn canonicalize(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            let mut out = String::from("{");
            for (i, k) in keys.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                out.push_str(&format!("{k:?}:{}", canonicalize(&map[*k])));
            }
            out.push('}');
            out
        }
        serde_json::Value::Array(items) => {
            let mut out = String::from("[");
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                out.push_str(&canonicalize(item));
            }
            out.push(']');
            out
        }
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::{Category, ResourceRef};
    use serde_json::json;

    fn event_with_details(details: serde_json::Map<String, serde_json::Value>) -> Event {
        Event {
            source: "trivy".into(),
            category: Category::Security,
            severity: "critical".into(),
            event_type: "vulnerability".into(),
            resource: Some(ResourceRef {
                api_version: None,
                kind: "Deployment".into(),
                name: "api".into(),
                namespace: Some("prod".into()),
            }),
            details,
            namespace: "prod".into(),
            detected_at: None,
            ttl_seconds_after_creation: None,
            annotations: Default::default(),
        }
    }

    #[test]
    fn reason_prefers_vulnerability_id_over_event_type() {
        let details = serde_json::Map::from_iter([(
            "vulnerabilityID".to_string(),
            json!("CVE-2024-1234"),
        )]);
        let key = DedupKey::derive(&event_with_details(details));
        assert_eq!(key.reason, "CVE-2024-1234");
    }

    #[test]
    fn reason_falls_back_to_event_type() {
        let key = DedupKey::derive(&event_with_details(Default::default()));
        assert_eq!(key.reason, "vulnerability");
    }

    #[test]
    fn canonical_form_is_stable_across_calls() {
        let event = event_with_details(Default::default());
        let a = DedupKey::derive(&event).canonical();
        let b = DedupKey::derive(&event).canonical();
        assert_eq!(a, b);
    }

    #[test]
    fn message_hash_is_deterministic() {
        let mut details = serde_json::Map::new();
        details.insert("message".into(), json!("oom killed"));
        let key1 = DedupKey::derive(&event_with_details(details.clone()));
        let key2 = DedupKey::derive(&event_with_details(details));
        assert_eq!(key1.message_hash, key2.message_hash);
        assert_eq!(key1.message_hash.len(), 32);
    }
}
