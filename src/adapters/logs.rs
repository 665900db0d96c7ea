//! Log-tail adapter: follows container logs for pods matched by a label
//! selector, scanning each line for a JSON document or a set of keyword
//! patterns.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use k8s_openapi::api::core::v1::Pod;
use kube::api::{Api, ListParams, LogParams};
use kube::ResourceExt;
use serde_json::Value;
use tokio::io::AsyncBufReadExt;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use zen_watcher_core::dedup::MalformedDocThrottle;
use zen_watcher_core::event::Event;
use zen_watcher_core::fingerprint::fingerprint_raw;
use zen_watcher_core::mapping::FieldMapping;
use zen_watcher_core::normalize::SeverityRemap;
use zen_watcher_k8s::{DynamicClient, IngesterConfig};

use super::{common, AdapterError, MissingFieldSnafu};
use snafu::OptionExt;

const POD_REFRESH_INTERVAL: Duration = Duration::from_secs(30);
const BACKOFF_START: Duration = Duration::from_secs(1);
const BACKOFF_MAX: Duration = Duration::from_secs(30);
const BACKOFF_RESET_AFTER: Duration = Duration::from_secs(300);

#[derive(Debug, Clone)]
enum Matcher {
    Json,
    Keywords(Vec<String>),
}

pub struct LogTailAdapter {
    name: String,
    client: kube::Client,
    namespace: String,
    label_selector: String,
    matcher: Matcher,
    mappings: Vec<FieldMapping>,
    severity_remap: SeverityRemap,
    malformed_throttle: Arc<MalformedDocThrottle>,
}

impl LogTailAdapter {
    pub fn build(config: &IngesterConfig, client: DynamicClient) -> Result<Self, AdapterError> {
        let namespace = config
            .spec
            .namespace
            .clone()
            .context(MissingFieldSnafu { source_name: config.name.clone(), field: "namespace" })?;
        let label_selector = config
            .spec
            .label_selector
            .clone()
            .context(MissingFieldSnafu { source_name: config.name.clone(), field: "labelSelector" })?;

        let matcher = match config.spec.extra.get("keywords").and_then(Value::as_array) {
            Some(words) => Matcher::Keywords(words.iter().filter_map(Value::as_str).map(str::to_owned).collect()),
            None => Matcher::Json,
        };

        Ok(Self {
            name: config.name.clone(),
            client: client.raw(),
            namespace,
            label_selector,
            matcher,
            mappings: config.spec.field_mappings.clone(),
            severity_remap: SeverityRemap::new(config.spec.severity_mappings.clone()),
            malformed_throttle: Arc::new(MalformedDocThrottle::default()),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub async fn run(self, cancel: CancellationToken, out: mpsc::Sender<Event>) -> Result<(), AdapterError> {
        let pods: Api<Pod> = Api::namespaced(self.client.clone(), &self.namespace);
        let mut tailed: HashSet<String> = HashSet::new();
        let mut tasks = tokio::task::JoinSet::new();

        loop {
            let list_params = ListParams::default().labels(&self.label_selector);
            match pods.list(&list_params).await {
                Ok(list) => {
                    for pod in list.items {
                        let pod_name = pod.name_any();
                        if tailed.insert(pod_name.clone()) {
                            tasks.spawn(Self::tail_pod(
                                self.client.clone(),
                                self.namespace.clone(),
                                pod_name,
                                self.matcher.clone(),
                                self.mappings.clone(),
                                self.severity_remap.clone(),
                                self.name.clone(),
                                out.clone(),
                                cancel.clone(),
                                self.malformed_throttle.clone(),
                            ));
                        }
                    }
                }
                Err(error) => warn!(source = %self.name, %error, "failed to list pods for log-tail adapter"),
            }

            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    while tasks.join_next().await.is_some() {}
                    return Ok(());
                }
                _ = tokio::time::sleep(POD_REFRESH_INTERVAL) => {}
                Some(finished) = tasks.join_next(), if !tasks.is_empty() => {
                    if let Ok(pod_name) = finished {
                        tailed.remove(&pod_name);
                    }
                }
            }
        }
    }

    #[allow(clippy::too_many_arguments)]
    async fn tail_pod(
        client: kube::Client,
        namespace: String,
        pod_name: String,
        matcher: Matcher,
        mappings: Vec<FieldMapping>,
        severity_remap: SeverityRemap,
        source: String,
        out: mpsc::Sender<Event>,
        cancel: CancellationToken,
        malformed_throttle: Arc<MalformedDocThrottle>,
    ) -> String {
        let api: Api<Pod> = Api::namespaced(client, &namespace);
        let mut backoff = BACKOFF_START;

        while !cancel.is_cancelled() {
            let started = tokio::time::Instant::now();
            let params = LogParams { follow: true, ..Default::default() };
            let stream = match api.log_stream(&pod_name, &params).await {
                Ok(stream) => stream,
                Err(error) => {
                    warn!(source = %source, pod = %pod_name, %error, "log stream failed to open");
                    tokio::select! {
                        _ = cancel.cancelled() => break,
                        _ = tokio::time::sleep(backoff) => {}
                    }
                    backoff = (backoff * 2).min(BACKOFF_MAX);
                    continue;
                }
            };

            let mut lines = stream.lines();
            loop {
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => return pod_name,
                    next = lines.next_line() => {
                        match next {
                            Ok(Some(line)) => {
                                if let Some(event) = match_line(
                                    &line,
                                    &matcher,
                                    &source,
                                    &mappings,
                                    &severity_remap,
                                    &namespace,
                                    &malformed_throttle,
                                ) {
                                    if out.send(event).await.is_err() {
                                        return pod_name;
                                    }
                                }
                            }
                            Ok(None) => break,
                            Err(error) => {
                                debug!(source = %source, pod = %pod_name, %error, "log line read error");
                                break;
                            }
                        }
                    }
                }
            }

            if started.elapsed() >= BACKOFF_RESET_AFTER {
                backoff = BACKOFF_START;
            } else {
                backoff = (backoff * 2).min(BACKOFF_MAX);
            }
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(backoff) => {}
            }
        }
        pod_name
    }
}

#[allow(clippy::too_many_arguments)]
fn match_line(
    line: &str,
    matcher: &Matcher,
    source: &str,
    mappings: &[FieldMapping],
    severity_remap: &SeverityRemap,
    namespace: &str,
    malformed_throttle: &MalformedDocThrottle,
) -> Option<Event> {
    match matcher {
        Matcher::Json => match serde_json::from_str::<Value>(line) {
            Ok(doc) => Some(common::build_event(source, mappings, severity_remap, &doc, namespace)),
            Err(_) => {
                let fingerprint = fingerprint_raw(source, &[], &serde_json::json!(line));
                if malformed_throttle.should_warn(&fingerprint) {
                    warn!(source, "malformed source document, skipping");
                }
                None
            }
        },
        Matcher::Keywords(words) => {
            let lowered = line.to_ascii_lowercase();
            if words.iter().any(|w| lowered.contains(&w.to_ascii_lowercase())) {
                let doc = serde_json::json!({ "message": line });
                Some(common::build_event(source, mappings, severity_remap, &doc, namespace))
            } else {
                None
            }
        }
    }
}
