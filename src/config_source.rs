//! Bridges the Ingester configuration loader to the processor: maintains
//! per-source order pins and resolved destination GVRs so
//! [`crate::processor::Processor`] never has to await discovery on the hot
//! path.

use dashmap::DashMap;
use zen_watcher_core::allowlist::Gvr;
use zen_watcher_core::optimize::OrderPin;
use zen_watcher_k8s::writer::WriteTarget;
use zen_watcher_k8s::{ConfigChange, DynamicClient, IngesterConfig};

/// The live, processor-facing view of per-source configuration derived from
/// [`zen_watcher_k8s::ConfigLoader`] change events.
#[derive(Clone, Default)]
pub struct SourceConfigs {
    order_pins: std::sync::Arc<DashMap<String, OrderPin>>,
    destinations: std::sync::Arc<DashMap<String, WriteTarget>>,
}

impl SourceConfigs {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn order_pin(&self, source: &str) -> Option<OrderPin> {
        self.order_pins.get(source).map(|v| *v)
    }

    pub fn destination_target(&self, source: &str) -> Option<WriteTarget> {
        self.destinations.get(source).map(|v| v.clone())
    }

    /// Apply a loader change: resolve a per-source destination override (if
    /// any) via discovery, cache it, and update the order pin. Resolution
    /// failures are logged at WARN and fall back to the processor's default
    /// destination for that source.
    pub async fn apply(&self, change: ConfigChange, client: &DynamicClient) {
        match change {
            ConfigChange::Upserted(config) => self.upsert(config, client).await,
            ConfigChange::Removed(source) => {
                self.order_pins.remove(&source);
                self.destinations.remove(&source);
            }
        }
    }

    async fn upsert(&self, config: IngesterConfig, client: &DynamicClient) {
        let source = config.name.clone();
        match config.order_pin() {
            Some(pin) => {
                self.order_pins.insert(source.clone(), pin);
            }
            None => {
                self.order_pins.remove(&source);
            }
        }

        match &config.spec.destination_gvr {
            Some(gvr_spec) => {
                let gvr = Gvr::new(gvr_spec.group.clone(), gvr_spec.version.clone(), gvr_spec.resource.clone());
                match client.resolve(&gvr).await {
                    Ok(resolved) => {
                        self.destinations.insert(source, WriteTarget { gvr, resolved });
                    }
                    Err(error) => {
                        tracing::warn!(source = %source, %error, "failed to resolve per-source destination GVR, keeping default");
                    }
                }
            }
            None => {
                self.destinations.remove(&source);
            }
        }
    }
}
