//! Resource-watch adapter: subscribes to a GVR, extracts sub-records from
//! each add/update, and emits one Event per qualifying sub-record.

use futures::StreamExt;
use serde_json::Value;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{error, warn};

use zen_watcher_core::allowlist::Gvr;
use zen_watcher_core::dedup::MalformedDocThrottle;
use zen_watcher_core::event::Event;
use zen_watcher_core::fingerprint::fingerprint_raw;
use zen_watcher_core::normalize::SeverityRemap;
use zen_watcher_k8s::{DynamicClient, IngesterConfig, K8sWatchEvent, ResolvedGvr};

use super::{common, AdapterError, MissingFieldSnafu};
use snafu::{OptionExt, ResultExt};

/// The sub-record qualifying predicate: configurable per Ingester rather
/// than hard-coded. Read from `Ingester.spec.extra`.
#[derive(Debug, Clone)]
enum Qualify {
    Always,
    FieldIn { field: String, values: Vec<String> },
}

impl Qualify {
    fn from_extra(extra: &serde_json::Map<String, Value>) -> Self {
        let field = extra.get("qualifyField").and_then(Value::as_str);
        let values = extra.get("qualifyIn").and_then(Value::as_array);
        match (field, values) {
            (Some(field), Some(values)) => Qualify::FieldIn {
                field: field.to_owned(),
                values: values.iter().filter_map(Value::as_str).map(|s| s.to_ascii_uppercase()).collect(),
            },
            _ => Qualify::Always,
        }
    }

    fn accepts(&self, record: &Value) -> bool {
        match self {
            Qualify::Always => true,
            Qualify::FieldIn { field, values } => {
                let extracted = zen_watcher_core::extract::extract_str(record, field).unwrap_or_default();
                values.iter().any(|v| v.eq_ignore_ascii_case(&extracted))
            }
        }
    }
}

pub struct WatchAdapter {
    name: String,
    client: DynamicClient,
    resolved: ResolvedGvr,
    namespace: Option<String>,
    records_path: Option<String>,
    qualify: Qualify,
    mappings: Vec<zen_watcher_core::mapping::FieldMapping>,
    severity_remap: SeverityRemap,
    malformed_throttle: MalformedDocThrottle,
}

impl WatchAdapter {
    pub async fn build(config: &IngesterConfig, client: DynamicClient) -> Result<Self, AdapterError> {
        let gvr_spec = config
            .spec
            .source_gvr
            .clone()
            .context(MissingFieldSnafu { source_name: config.name.clone(), field: "sourceGvr" })?;
        let gvr = Gvr::new(gvr_spec.group, gvr_spec.version, gvr_spec.resource);
        let resolved = client.resolve(&gvr).await.context(super::DiscoverySnafu)?;

        let records_path = config.spec.extra.get("recordsPath").and_then(Value::as_str).map(str::to_owned);
        let qualify = Qualify::from_extra(&config.spec.extra);

        Ok(Self {
            name: config.name.clone(),
            client,
            resolved,
            namespace: config.spec.namespace.clone(),
            records_path,
            qualify,
            mappings: config.spec.field_mappings.clone(),
            severity_remap: SeverityRemap::new(config.spec.severity_mappings.clone()),
            malformed_throttle: MalformedDocThrottle::default(),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub async fn run(self, cancel: CancellationToken, out: mpsc::Sender<Event>) -> Result<(), AdapterError> {
        let mut stream = self.client.watch(&self.resolved, self.namespace.as_deref());

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => return Ok(()),
                next = stream.next() => {
                    match next {
                        Some(Ok(K8sWatchEvent::Applied(object))) => self.handle_object(&object, &out, &cancel).await,
                        Some(Ok(K8sWatchEvent::Deleted(_))) => {}
                        Some(Ok(K8sWatchEvent::Restarted(objects))) => {
                            for object in &objects {
                                self.handle_object(object, &out, &cancel).await;
                            }
                        }
                        Some(Err(error)) => warn!(source = %self.name, %error, "resource watch stream error"),
                        None => {
                            error!(source = %self.name, "resource watch stream ended");
                            return Ok(());
                        }
                    }
                }
            }
        }
    }

    async fn handle_object(
        &self,
        object: &zen_watcher_k8s::K8sObject,
        out: &mpsc::Sender<Event>,
        cancel: &CancellationToken,
    ) {
        let doc = object.data.clone();
        let records = match &self.records_path {
            Some(path) => {
                let (records, malformed) = extract_records(&doc, path);
                if malformed {
                    let fingerprint = fingerprint_raw(&self.name, &[Some(path.as_str())], &doc);
                    if self.malformed_throttle.should_warn(&fingerprint) {
                        warn!(source = %self.name, path = %path, "malformed source document, skipping");
                    }
                }
                records
            }
            None => vec![doc.clone()],
        };

        for record in records {
            if !self.qualify.accepts(&record) {
                continue;
            }
            let namespace_fallback = object.metadata.namespace.clone().unwrap_or_else(|| "default".to_owned());
            let event = common::build_event(&self.name, &self.mappings, &self.severity_remap, &record, &namespace_fallback);
            tokio::select! {
                biased;
                _ = cancel.cancelled() => return,
                send = out.send(event) => {
                    if send.is_err() {
                        return;
                    }
                }
            }
        }
    }
}

/// Walk a dotted path where every segment is an object key, yielding the
/// array found at the final segment. Unlike [`zen_watcher_core::extract::extract`],
/// this never collapses an array to its first element -- it is only used to
/// locate the sub-record array itself.
///
/// Returns `(records, malformed)`. `malformed` is set when the configured
/// path does not resolve to an array the way `recordsPath` promises: either
/// an intermediate segment is missing, or the final value exists but is not
/// an array. A path that resolves to `null` is not malformed (the source
/// legitimately reported no findings this round).
fn extract_records(doc: &Value, path: &str) -> (Vec<Value>, bool) {
    let mut current = doc;
    for segment in path.trim_start_matches('.').split('.') {
        match current.as_object().and_then(|obj| obj.get(segment)) {
            Some(next) => current = next,
            None => return (Vec::new(), true),
        }
    }
    match current {
        Value::Array(items) => (items.clone(), false),
        Value::Null => (Vec::new(), false),
        other => (vec![other.clone()], true),
    }
}
