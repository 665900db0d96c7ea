//! The `Ingester` configuration custom resource.

use std::collections::HashMap;

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use zen_watcher_core::mapping::FieldMapping;
use zen_watcher_core::optimize::OrderPin;

/// Acquisition strategy an `Ingester` declares.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum AcquisitionMode {
    Informer,
    Webhook,
    Logs,
    Configmap,
    Events,
}

/// The GVR an Ingester watches (for `informer`/`events`-adjacent modes) or
/// writes to (when a per-source destination override is configured).
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct GvrSpec {
    #[serde(default)]
    pub group: String,
    pub version: String,
    pub resource: String,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum OrderPreference {
    FilterFirst,
    DedupFirst,
}

impl From<OrderPreference> for OrderPin {
    fn from(value: OrderPreference) -> Self {
        match value {
            OrderPreference::FilterFirst => OrderPin::FilterFirst,
            OrderPreference::DedupFirst => OrderPin::DedupFirst,
        }
    }
}

/// `spec` of the `Ingester` custom resource.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, CustomResource)]
#[kube(
    group = "zen-watcher.io",
    version = "v1alpha1",
    kind = "Ingester",
    namespaced,
    status = "IngesterStatus"
)]
pub struct IngesterSpec {
    pub mode: AcquisitionMode,
    #[serde(default)]
    pub source_gvr: Option<GvrSpec>,
    #[serde(default)]
    pub destination_gvr: Option<GvrSpec>,
    #[serde(default)]
    pub namespace: Option<String>,
    #[serde(default)]
    pub label_selector: Option<String>,
    #[serde(default)]
    pub field_mappings: Vec<FieldMapping>,
    #[serde(default)]
    pub severity_mappings: HashMap<String, String>,
    #[serde(default)]
    pub order_preference: Option<OrderPreference>,
    /// Mode-specific extra settings as a free-form document (webhook path,
    /// log keyword patterns, configmap poll interval, JSON data key, ...).
    #[serde(default)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

/// A minimal observed-state status subresource; the loader does not
/// currently write to it, but the field exists so future health reporting
/// has somewhere to land without a CRD migration.
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
pub struct IngesterStatus {
    #[serde(default)]
    pub active: bool,
}

/// An in-memory, already-validated form of an `Ingester`'s spec, keyed by
/// source name, that the loader hands to the adapter factory.
#[derive(Debug, Clone)]
pub struct IngesterConfig {
    pub name: String,
    pub spec: IngesterSpec,
}

impl IngesterConfig {
    pub fn order_pin(&self) -> Option<OrderPin> {
        self.spec.order_preference.map(Into::into)
    }
}
