//! ConfigMap-poll adapter: polls ConfigMaps on an interval, parses a JSON
//! document from a named data key, and walks a declared tree for findings.

use std::time::Duration;

use k8s_openapi::api::core::v1::ConfigMap;
use kube::api::{Api, ListParams};
use serde_json::Value;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::warn;

use zen_watcher_core::dedup::MalformedDocThrottle;
use zen_watcher_core::event::Event;
use zen_watcher_core::fingerprint::fingerprint_raw;
use zen_watcher_core::mapping::FieldMapping;
use zen_watcher_core::normalize::SeverityRemap;
use zen_watcher_k8s::{DynamicClient, IngesterConfig};

use super::{common, AdapterError, MissingFieldSnafu};
use snafu::OptionExt;

const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(300);

pub struct ConfigMapPollAdapter {
    name: String,
    client: kube::Client,
    namespace: String,
    label_selector: String,
    data_key: String,
    walk_path: String,
    interval: Duration,
    mappings: Vec<FieldMapping>,
    severity_remap: SeverityRemap,
    malformed_throttle: MalformedDocThrottle,
}

impl ConfigMapPollAdapter {
    pub async fn build(config: &IngesterConfig, client: DynamicClient) -> Result<Self, AdapterError> {
        let namespace = config
            .spec
            .namespace
            .clone()
            .context(MissingFieldSnafu { source_name: config.name.clone(), field: "namespace" })?;
        let label_selector = config.spec.label_selector.clone().unwrap_or_default();

        let data_key = config
            .spec
            .extra
            .get("dataKey")
            .and_then(Value::as_str)
            .map(str::to_owned)
            .context(MissingFieldSnafu { source_name: config.name.clone(), field: "extra.dataKey" })?;
        let walk_path = config
            .spec
            .extra
            .get("walkPath")
            .and_then(Value::as_str)
            .map(str::to_owned)
            .context(MissingFieldSnafu { source_name: config.name.clone(), field: "extra.walkPath" })?;
        let interval = config
            .spec
            .extra
            .get("pollIntervalSeconds")
            .and_then(Value::as_u64)
            .map(Duration::from_secs)
            .unwrap_or(DEFAULT_POLL_INTERVAL);
        let qualify_field = config.spec.extra.get("qualifyField").and_then(Value::as_str).map(str::to_owned);
        let qualify_equals = config.spec.extra.get("qualifyEquals").and_then(Value::as_str).map(str::to_owned);

        Ok(Self {
            name: config.name.clone(),
            client: client.raw(),
            namespace,
            label_selector,
            data_key,
            walk_path: walk_path_with_filter(walk_path, qualify_field, qualify_equals),
            interval,
            mappings: config.spec.field_mappings.clone(),
            severity_remap: SeverityRemap::new(config.spec.severity_mappings.clone()),
            malformed_throttle: MalformedDocThrottle::default(),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub async fn run(self, cancel: CancellationToken, out: mpsc::Sender<Event>) -> Result<(), AdapterError> {
        let api: Api<ConfigMap> = Api::namespaced(self.client.clone(), &self.namespace);

        loop {
            if let Err(error) = self.poll_once(&api, &out, &cancel).await {
                warn!(source = %self.name, %error, "configmap poll failed");
            }

            tokio::select! {
                biased;
                _ = cancel.cancelled() => return Ok(()),
                _ = tokio::time::sleep(self.interval) => {}
            }
        }
    }

    async fn poll_once(
        &self,
        api: &Api<ConfigMap>,
        out: &mpsc::Sender<Event>,
        cancel: &CancellationToken,
    ) -> kube::Result<()> {
        let list = api.list(&ListParams::default().labels(&self.label_selector)).await?;
        for configmap in list.items {
            let Some(data) = &configmap.data else { continue };
            let Some(raw) = data.get(&self.data_key) else { continue };
            let doc: Value = match serde_json::from_str(raw) {
                Ok(doc) => doc,
                Err(error) => {
                    let fingerprint = fingerprint_raw(&self.name, &[Some(self.data_key.as_str())], &serde_json::json!(raw));
                    if self.malformed_throttle.should_warn(&fingerprint) {
                        warn!(source = %self.name, %error, "malformed source document, skipping");
                    }
                    continue;
                }
            };

            for finding in self.walk(&doc) {
                let event = common::build_event(&self.name, &self.mappings, &self.severity_remap, &finding, &self.namespace);
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => return Ok(()),
                    send = out.send(event) => {
                        if send.is_err() {
                            return Ok(());
                        }
                    }
                }
            }
        }
        Ok(())
    }

    /// Walk `.a[].b[].c[]`-shaped paths, optionally filtering the final
    /// array by an equality predicate baked into `self.walk_path` by
    /// [`walk_path_with_filter`] at construction time.
    fn walk(&self, doc: &Value) -> Vec<Value> {
        let (path, filter) = split_filter(&self.walk_path);
        let mut frontier = vec![doc.clone()];
        for segment in path.split('.').filter(|s| !s.is_empty()) {
            let (key, is_array) = match segment.strip_suffix("[]") {
                Some(stripped) => (stripped, true),
                None => (segment, false),
            };
            let mut next = Vec::new();
            for item in frontier {
                let Some(value) = item.as_object().and_then(|o| o.get(key)) else { continue };
                if is_array {
                    if let Value::Array(items) = value {
                        next.extend(items.iter().cloned());
                    }
                } else {
                    next.push(value.clone());
                }
            }
            frontier = next;
        }

        match filter {
            Some((field, expected)) => frontier
                .into_iter()
                .filter(|item| zen_watcher_core::extract::extract_str(item, &format!(".{field}")).as_deref() == Some(expected.as_str()))
                .collect(),
            None => frontier,
        }
    }
}

fn walk_path_with_filter(walk_path: String, field: Option<String>, equals: Option<String>) -> String {
    match (field, equals) {
        (Some(field), Some(equals)) => format!("{walk_path}?{field}={equals}"),
        _ => walk_path,
    }
}

fn split_filter(walk_path: &str) -> (&str, Option<(String, String)>) {
    match walk_path.split_once('?') {
        Some((path, predicate)) => match predicate.split_once('=') {
            Some((field, value)) => (path, Some((field.to_owned(), value.to_owned()))),
            None => (path, None),
        },
        None => (walk_path, None),
    }
}
