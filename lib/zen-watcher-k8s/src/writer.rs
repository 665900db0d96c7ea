//! Converts a normalized [`Event`] into a target-kind resource document and
//! creates it via the dynamic client.

use kube::api::DynamicObject;
use kube::core::ObjectMeta;
use serde_json::{json, Map, Value};
use snafu::Snafu;

use zen_watcher_core::allowlist::{Allowlist, DenyReason, Gvr};
use zen_watcher_core::event::Event;

use crate::client::{ClientError, DynamicClient, ResolvedGvr};

/// The small error taxonomy API errors from a failed write are mapped onto.
#[derive(Debug, Snafu, PartialEq, Eq, Clone, Copy)]
pub enum WriteErrorKind {
    #[snafu(display("object already exists"))]
    AlreadyExists,
    #[snafu(display("write forbidden by RBAC"))]
    Forbidden,
    #[snafu(display("target namespace or kind not found"))]
    NotFound,
    #[snafu(display("the write was rejected by the allowlist gate"))]
    NotAllowed,
    #[snafu(display("write failed for an unclassified reason"))]
    CreateFailed,
}

impl WriteErrorKind {
    pub fn as_label(self) -> &'static str {
        match self {
            Self::AlreadyExists => "already_exists",
            Self::Forbidden => "forbidden",
            Self::NotFound => "not_found",
            Self::NotAllowed => "not_allowed",
            Self::CreateFailed => "create_failed",
        }
    }

    fn from_status(status: &kube::core::ErrorResponse) -> Self {
        match status.code {
            409 => Self::AlreadyExists,
            403 => Self::Forbidden,
            404 => Self::NotFound,
            _ => Self::CreateFailed,
        }
    }
}

#[derive(Debug, Snafu)]
pub struct WriteError {
    pub kind: WriteErrorKind,
    #[snafu(source(from(ClientError, Box::new)))]
    source: Option<Box<ClientError>>,
}

impl WriteError {
    fn new(kind: WriteErrorKind) -> Self {
        Self { kind, source: None }
    }

    fn from_client_error(err: ClientError) -> Self {
        let kind = match &err {
            ClientError::Create { source } | ClientError::List { source } | ClientError::Delete { source } => {
                match source {
                    kube::Error::Api(resp) => WriteErrorKind::from_status(resp),
                    _ => WriteErrorKind::CreateFailed,
                }
            }
            _ => WriteErrorKind::CreateFailed,
        };
        Self {
            kind,
            source: Some(Box::new(err)),
        }
    }
}

/// The destination a writer targets: a GVR plus its plural resource name
/// (needed to derive `kind` — see [`singularize_title_case`]).
#[derive(Debug, Clone)]
pub struct WriteTarget {
    pub gvr: Gvr,
    pub resolved: ResolvedGvr,
}

/// Drop a trailing `s` unless the token ends in `ss` or `us`, then
/// title-case the first rune. `"observations" -> "Observation"`,
/// `"policyreports" -> "Policyreport"`, `"status" -> "Status"`,
/// `"analysis" -> "Analysis"`.
pub fn singularize_title_case(plural: &str) -> String {
    let singular = if (plural.ends_with("ss") || plural.ends_with("us")) || !plural.ends_with('s') {
        plural.to_owned()
    } else {
        plural[..plural.len() - 1].to_owned()
    };
    let mut chars = singular.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().collect::<String>() + chars.as_str(),
        None => singular,
    }
}

/// Build the resource document for `event` targeting `target`, field by
/// field.
pub fn build_document(event: &Event, target: &WriteTarget) -> DynamicObject {
    let api_version = if target.gvr.group.is_empty() {
        target.gvr.version.clone()
    } else {
        format!("{}/{}", target.gvr.group, target.gvr.version)
    };
    let kind = singularize_title_case(&target.gvr.resource);

    let generate_name: String = event.source.chars().take(20).collect::<String>() + "-";
    let namespace = if event.namespace.is_empty() {
        "default".to_owned()
    } else {
        event.namespace.clone()
    };

    let mut labels = Map::new();
    labels.insert("source".into(), json!(event.source));
    labels.insert("category".into(), json!(event.category.to_string()));
    labels.insert("severity".into(), json!(event.severity));

    let mut spec = Map::new();
    spec.insert("source".into(), json!(event.source));
    spec.insert("category".into(), json!(event.category.to_string()));
    spec.insert("severity".into(), json!(event.severity));
    spec.insert("eventType".into(), json!(event.event_type));
    if let Some(detected_at) = event.detected_at {
        spec.insert("detectedAt".into(), json!(detected_at.to_rfc3339()));
    }
    if let Some(resource) = &event.resource {
        spec.insert("resource".into(), serde_json::to_value(resource).unwrap_or(Value::Null));
    }
    spec.insert("details".into(), Value::Object(event.details.clone()));
    spec.insert(
        "ttlSecondsAfterCreation".into(),
        json!(event.ttl_seconds_after_creation.unwrap_or(86_400)),
    );

    let mut object = DynamicObject::new("", &target.resolved.resource).within(&namespace);
    object.types = Some(kube::api::TypeMeta { api_version, kind });
    object.metadata = ObjectMeta {
        generate_name: Some(generate_name),
        namespace: Some(namespace),
        labels: Some(
            labels
                .into_iter()
                .filter_map(|(k, v)| v.as_str().map(|s| (k, s.to_owned())))
                .collect(),
        ),
        annotations: if event.annotations.is_empty() {
            None
        } else {
            Some(
                event
                    .annotations
                    .iter()
                    .filter_map(|(k, v)| v.as_str().map(|s| (k.clone(), s.to_owned())))
                    .collect(),
            )
        },
        ..Default::default()
    };
    object.data = json!({ "spec": spec });
    object
}

/// Create `event`'s resource document against `target`, re-checking the
/// allowlist as defense in depth. Every write is gated twice: once by the
/// processor before handing off, once here.
pub async fn write(
    client: &DynamicClient,
    allowlist: &Allowlist,
    target: &WriteTarget,
    event: &Event,
) -> Result<DynamicObject, WriteError> {
    allowlist
        .is_allowed(&target.gvr, Some(&event.namespace))
        .map_err(|_: DenyReason| WriteError::new(WriteErrorKind::NotAllowed))?;

    let document = build_document(event, target);
    client
        .create(&target.resolved, Some(&event.namespace), document)
        .await
        .map_err(WriteError::from_client_error)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn singularize_drops_trailing_s() {
        assert_eq!(singularize_title_case("observations"), "Observation");
    }

    #[test]
    fn singularize_keeps_ss_suffix() {
        assert_eq!(singularize_title_case("progress"), "Progress");
    }

    #[test]
    fn singularize_keeps_us_suffix() {
        assert_eq!(singularize_title_case("status"), "Status");
    }

    #[test]
    fn singularize_handles_no_trailing_s() {
        assert_eq!(singularize_title_case("analysis"), "Analysis");
    }
}
