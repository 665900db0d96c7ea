//! Shared "raw document + field mappings -> Event" assembly used by every
//! adapter that extracts structured findings from a JSON document: field
//! extraction, mapping application, and severity remap.

use serde_json::Value;

use zen_watcher_core::event::{Category, Event, ResourceRef};
use zen_watcher_core::mapping::FieldMapping;
use zen_watcher_core::normalize::SeverityRemap;

/// Apply `mappings` to `doc`, folding the results into a fresh [`Event`].
/// Unrecognized `to` targets land under `details.<to>` rather than being
/// dropped, so a misconfigured mapping is visible in the written Observation
/// instead of silently vanishing.
pub fn build_event(
    source: &str,
    mappings: &[FieldMapping],
    severity_remap: &SeverityRemap,
    doc: &Value,
    namespace_fallback: &str,
) -> Event {
    let mut event = Event {
        source: source.to_owned(),
        category: Category::default(),
        severity: String::new(),
        event_type: String::new(),
        resource: None,
        details: Default::default(),
        namespace: namespace_fallback.to_owned(),
        detected_at: None,
        ttl_seconds_after_creation: None,
        annotations: Default::default(),
    };

    let mut resource = ResourceRef::default();
    let mut has_resource = false;

    for mapping in mappings {
        let Some(field) = mapping.apply(doc) else { continue };
        let value = field.value;
        match field.to.as_str() {
            "severity" => {
                let raw = value_as_string(&value);
                event.severity = severity_remap.apply(&raw);
            }
            "eventType" => event.event_type = value_as_string(&value),
            "category" => {
                if let Ok(category) = serde_json::from_value::<Category>(Value::String(value_as_string(&value).to_ascii_lowercase())) {
                    event.category = category;
                }
            }
            "namespace" => event.namespace = value_as_string(&value),
            "ttl" => event.ttl_seconds_after_creation = value.as_i64(),
            "detectedAt" => {
                if let Some(s) = value.as_str() {
                    event.detected_at = chrono::DateTime::parse_from_rfc3339(s).ok().map(|dt| dt.with_timezone(&chrono::Utc));
                }
            }
            "resource.kind" => {
                resource.kind = value_as_string(&value);
                has_resource = true;
            }
            "resource.name" => {
                resource.name = value_as_string(&value);
                has_resource = true;
            }
            "resource.namespace" => {
                resource.namespace = Some(value_as_string(&value));
                has_resource = true;
            }
            "resource.apiVersion" => {
                resource.api_version = Some(value_as_string(&value));
                has_resource = true;
            }
            to if to.starts_with("details.") => {
                event.details.insert(to.trim_start_matches("details.").to_owned(), value);
            }
            to => {
                event.details.insert(to.to_owned(), value);
            }
        }
    }

    if has_resource {
        event.resource = Some(resource);
    }
    event
}

fn value_as_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Number(n) => n.to_string(),
        Value::Bool(b) => b.to_string(),
        _ => String::new(),
    }
}
