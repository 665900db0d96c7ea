//! Cluster-event adapter: watches the native Kubernetes Events API and
//! classifies security-relevant events by reason, message keywords, and
//! involved-object kind.

use futures::StreamExt;
use k8s_openapi::api::core::v1::Event as K8sEvent;
use kube::api::Api;
use kube::runtime::watcher::{self, Event as WatchEvent};
use kube::runtime::WatchStreamExt;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{error, warn};

use zen_watcher_core::event::{Category, Event, ResourceRef};
use zen_watcher_k8s::{DynamicClient, IngesterConfig};

use super::AdapterError;

const SUSPICIOUS_KEYWORDS: &[&str] = &["unauthorized", "forbidden", "denied", "violat", "exceeded quota"];

pub struct ClusterEventAdapter {
    name: String,
    client: kube::Client,
    namespace: Option<String>,
}

impl ClusterEventAdapter {
    pub fn build(config: &IngesterConfig, client: DynamicClient) -> Self {
        Self {
            name: config.name.clone(),
            client: client.raw(),
            namespace: config.spec.namespace.clone(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub async fn run(self, cancel: CancellationToken, out: mpsc::Sender<Event>) -> Result<(), AdapterError> {
        let api: Api<K8sEvent> = match &self.namespace {
            Some(ns) => Api::namespaced(self.client.clone(), ns),
            None => Api::all(self.client.clone()),
        };

        let config = watcher::Config::default().fields("type!=Normal");
        let mut stream = watcher(api, config).default_backoff().boxed();

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => return Ok(()),
                next = stream.next() => {
                    match next {
                        Some(Ok(WatchEvent::Applied(k8s_event))) => self.emit(&k8s_event, &out, &cancel).await,
                        Some(Ok(WatchEvent::Deleted(_))) => {}
                        Some(Ok(WatchEvent::Restarted(items))) => {
                            for item in &items {
                                self.emit(item, &out, &cancel).await;
                            }
                        }
                        Some(Err(error)) => warn!(source = %self.name, %error, "cluster-event watch stream error"),
                        None => {
                            error!(source = %self.name, "cluster-event watch stream ended");
                            return Ok(());
                        }
                    }
                }
            }
        }
    }

    async fn emit(&self, k8s_event: &K8sEvent, out: &mpsc::Sender<Event>, cancel: &CancellationToken) {
        let Some(event) = classify(&self.name, k8s_event) else { return };
        tokio::select! {
            biased;
            _ = cancel.cancelled() => {}
            send = out.send(event) => {
                let _ = send;
            }
        }
    }
}

fn watcher(
    api: Api<K8sEvent>,
    config: watcher::Config,
) -> impl futures::Stream<Item = Result<WatchEvent<K8sEvent>, watcher::Error>> {
    kube::runtime::watcher(api, config)
}

/// Classify a raw `Event` object into a normalized finding, or `None` if it
/// is not security-relevant.
fn classify(source: &str, event: &K8sEvent) -> Option<Event> {
    let reason = event.reason.clone().unwrap_or_default();
    let message = event.message.clone().unwrap_or_default();
    let lowered_reason = reason.to_ascii_lowercase();
    let lowered_message = message.to_ascii_lowercase();

    let involved_kind = event.involved_object.kind.clone().unwrap_or_default();

    let relevant = SUSPICIOUS_KEYWORDS.iter().any(|w| lowered_reason.contains(w) || lowered_message.contains(w))
        || lowered_reason.starts_with("failed")
        || matches!(involved_kind.as_str(), "NetworkPolicy" | "PodSecurityPolicy" | "ResourceQuota");

    if !relevant {
        return None;
    }

    let severity = if lowered_reason.contains("unauthorized") || lowered_reason.contains("forbidden") {
        "critical"
    } else if lowered_reason.starts_with("failed") {
        "high"
    } else if event.type_.as_deref() == Some("Warning") {
        "medium"
    } else {
        "low"
    };

    let event_type = if lowered_reason.contains("unauthorized") || lowered_reason.contains("forbidden") {
        "access-control-violation"
    } else if involved_kind == "NetworkPolicy" || lowered_message.contains("networkpolicy") {
        "network-policy-violation"
    } else if involved_kind == "PodSecurityPolicy" || lowered_message.contains("securitycontext") {
        "pod-security-violation"
    } else if lowered_reason.contains("quota") || lowered_message.contains("exceeded quota") {
        "resource-exhaustion"
    } else if lowered_reason.contains("pull") {
        "image-pull-failure"
    } else if lowered_reason.contains("mount") || lowered_message.contains("storage") {
        "storage-access-failure"
    } else if lowered_message.contains("violat") {
        "policy-violation"
    } else {
        "kubernetes-event"
    };

    let mut details = serde_json::Map::new();
    details.insert("reason".into(), serde_json::json!(reason));
    details.insert("message".into(), serde_json::json!(message));

    Some(Event {
        source: source.to_owned(),
        category: Category::Security,
        severity: severity.to_owned(),
        event_type: event_type.to_owned(),
        resource: Some(ResourceRef {
            api_version: event.involved_object.api_version.clone(),
            kind: involved_kind,
            name: event.involved_object.name.clone().unwrap_or_default(),
            namespace: event.involved_object.namespace.clone(),
        }),
        details,
        namespace: event.metadata.namespace.clone().unwrap_or_else(|| "default".to_owned()),
        detected_at: None,
        ttl_seconds_after_creation: None,
        annotations: Default::default(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::api::core::v1::ObjectReference;
    use kube::core::ObjectMeta;

    fn forbidden_role_event() -> K8sEvent {
        K8sEvent {
            metadata: ObjectMeta {
                namespace: Some("prod".to_owned()),
                ..Default::default()
            },
            reason: Some("Forbidden".to_owned()),
            message: Some("User \"system:anonymous\" cannot get resource".to_owned()),
            type_: Some("Warning".to_owned()),
            involved_object: ObjectReference {
                kind: Some("Role".to_owned()),
                name: Some("admin".to_owned()),
                ..Default::default()
            },
            ..Default::default()
        }
    }

    #[test]
    fn classifies_forbidden_role_event_as_access_control_violation() {
        let event = classify("kubernetes-events", &forbidden_role_event()).expect("should be relevant");
        assert_eq!(event.severity, "critical");
        assert_eq!(event.event_type, "access-control-violation");
        assert_eq!(event.source, "kubernetes-events");
        assert_eq!(event.resource.as_ref().unwrap().kind, "Role");
    }

    #[test]
    fn normal_events_are_not_relevant() {
        let mut event = forbidden_role_event();
        event.reason = Some("Scheduled".to_owned());
        event.message = Some("Successfully assigned pod to node".to_owned());
        event.type_ = Some("Normal".to_owned());
        assert!(classify("kubernetes-events", &event).is_none());
    }

    #[test]
    fn quota_exceeded_maps_to_resource_exhaustion() {
        let mut event = forbidden_role_event();
        event.reason = Some("FailedCreate".to_owned());
        event.message = Some("exceeded quota: pods, requested: 1, used: 10, limited: 10".to_owned());
        event.involved_object.kind = Some("ReplicaSet".to_owned());
        let classified = classify("kubernetes-events", &event).expect("should be relevant");
        assert_eq!(classified.event_type, "resource-exhaustion");
        assert_eq!(classified.severity, "high");
    }
}
