//! The internal [`Event`] type and the resource document it is eventually
//! written as.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// One of the five canonical buckets a finding is filed under.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Category {
    Security,
    Compliance,
    Performance,
    Operations,
    Cost,
}

impl Default for Category {
    fn default() -> Self {
        Self::Security
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Security => "security",
            Self::Compliance => "compliance",
            Self::Performance => "performance",
            Self::Operations => "operations",
            Self::Cost => "cost",
        };
        f.write_str(s)
    }
}

/// The canonical severity enum. Always lowercase at rest; see
/// [`crate::normalize::normalize_severity`] for how arbitrary tool vocabularies
/// collapse onto this.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Critical,
    High,
    Medium,
    Low,
    Info,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Critical => "critical",
            Self::High => "high",
            Self::Medium => "medium",
            Self::Low => "low",
            Self::Info => "info",
        };
        f.write_str(s)
    }
}

/// A reference to the Kubernetes object a finding is about, if any.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ResourceRef {
    #[serde(rename = "apiVersion", skip_serializing_if = "Option::is_none")]
    pub api_version: Option<String>,
    pub kind: String,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
}

/// A normalized finding, produced by a source adapter and consumed by the
/// processor.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    /// Short tool identifier. Required; appears on outgoing labels.
    pub source: String,
    #[serde(default)]
    pub category: Category,
    /// Raw severity as reported upstream; normalized by the processor before
    /// write. May already be canonical.
    pub severity: String,
    /// Raw event type token; normalized by the processor before write.
    #[serde(rename = "eventType")]
    pub event_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resource: Option<ResourceRef>,
    #[serde(default)]
    pub details: Map<String, Value>,
    #[serde(default = "default_namespace")]
    pub namespace: String,
    #[serde(rename = "detectedAt", skip_serializing_if = "Option::is_none")]
    pub detected_at: Option<DateTime<Utc>>,
    /// TTL for the Observation, in seconds, before normalization/clamping.
    #[serde(rename = "ttlSecondsAfterCreation", skip_serializing_if = "Option::is_none")]
    pub ttl_seconds_after_creation: Option<i64>,
    /// Arbitrary annotations to copy onto the written resource.
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub annotations: Map<String, Value>,
}

pub fn default_namespace() -> String {
    "default".to_owned()
}

impl Event {
    /// First non-empty `details` value among `keys`, as a string.
    pub fn first_detail_str(&self, keys: &[&str]) -> Option<String> {
        keys.iter().find_map(|k| {
            self.details
                .get(*k)
                .and_then(Value::as_str)
                .filter(|s| !s.is_empty())
                .map(ToOwned::to_owned)
        })
    }
}

/// TTL bounds enforced on every Observation.
pub const TTL_MIN_SECONDS: i64 = 60;
pub const TTL_MAX_SECONDS: i64 = 31_536_000;

/// Clamp a requested TTL into `[TTL_MIN_SECONDS, TTL_MAX_SECONDS]`, logging a
/// warning if clamping changed the value. Returns the clamped TTL.
///
/// `default_ttl_seconds` is used when `requested` is absent (the Event
/// carried no TTL of its own); it comes from the configured
/// `OBSERVATION_TTL_SECONDS`/`OBSERVATION_TTL_DAYS` envelope, not a
/// hardcoded constant, so the configuration contract actually has effect.
pub fn clamp_ttl(requested: Option<i64>, default_ttl_seconds: i64, source: &str) -> i64 {
    let ttl = requested.unwrap_or(default_ttl_seconds);
    let clamped = ttl.clamp(TTL_MIN_SECONDS, TTL_MAX_SECONDS);
    if clamped != ttl {
        tracing::warn!(
            source,
            requested = ttl,
            clamped,
            "ttlSecondsAfterCreation out of bounds, clamped"
        );
    }
    clamped
}
