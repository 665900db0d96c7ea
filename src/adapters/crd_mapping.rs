//! Generic CRD mapping adapter: watches an arbitrary informer kind named by
//! an Ingester's `sourceGvr` and maps each observed object to an Event
//! wholesale, with no sub-record iteration.

use futures::StreamExt;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{error, warn};

use zen_watcher_core::allowlist::Gvr;
use zen_watcher_core::event::Event;
use zen_watcher_core::mapping::FieldMapping;
use zen_watcher_core::normalize::SeverityRemap;
use zen_watcher_k8s::{DynamicClient, IngesterConfig, K8sWatchEvent, ResolvedGvr};

use super::{common, AdapterError, MissingFieldSnafu};
use snafu::{OptionExt, ResultExt};

pub struct CrdMappingAdapter {
    name: String,
    client: DynamicClient,
    resolved: ResolvedGvr,
    namespace: Option<String>,
    mappings: Vec<FieldMapping>,
    severity_remap: SeverityRemap,
}

impl CrdMappingAdapter {
    pub async fn build(config: &IngesterConfig, client: DynamicClient) -> Result<Self, AdapterError> {
        let gvr_spec = config
            .spec
            .source_gvr
            .clone()
            .context(MissingFieldSnafu { source_name: config.name.clone(), field: "sourceGvr" })?;
        let gvr = Gvr::new(gvr_spec.group, gvr_spec.version, gvr_spec.resource);
        let resolved = client.resolve(&gvr).await.context(super::DiscoverySnafu)?;

        Ok(Self {
            name: config.name.clone(),
            client,
            resolved,
            namespace: config.spec.namespace.clone(),
            mappings: config.spec.field_mappings.clone(),
            severity_remap: SeverityRemap::new(config.spec.severity_mappings.clone()),
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
                        Some(Ok(K8sWatchEvent::Applied(object))) => self.emit(&object, &out, &cancel).await,
                        Some(Ok(K8sWatchEvent::Deleted(_))) => {}
                        Some(Ok(K8sWatchEvent::Restarted(objects))) => {
                            for object in &objects {
                                self.emit(object, &out, &cancel).await;
                            }
                        }
                        Some(Err(error)) => warn!(source = %self.name, %error, "CRD mapping watch stream error"),
                        None => {
                            error!(source = %self.name, "CRD mapping watch stream ended");
                            return Ok(());
                        }
                    }
                }
            }
        }
    }

    async fn emit(&self, object: &zen_watcher_k8s::K8sObject, out: &mpsc::Sender<Event>, cancel: &CancellationToken) {
        let namespace_fallback = object.metadata.namespace.clone().unwrap_or_else(|| "default".to_owned());
        let event = common::build_event(&self.name, &self.mappings, &self.severity_remap, &object.data, &namespace_fallback);
        tokio::select! {
            biased;
            _ = cancel.cancelled() => {}
            send = out.send(event) => {
                let _ = send;
            }
        }
    }
}
