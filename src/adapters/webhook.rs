//! Webhook-push adapter: a thin HTTP handler that validates an inbound
//! finding and queues it onto the shared channel with the same backpressure
//! discipline as every other adapter.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::post;
use axum::{Json, Router};
use serde_json::Value;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use zen_watcher_core::mapping::FieldMapping;
use zen_watcher_core::normalize::SeverityRemap;
use zen_watcher_k8s::IngesterConfig;

use super::{common, AdapterError};

const DEFAULT_BIND_ADDR: &str = "0.0.0.0:8080";

struct WebhookState {
    source: String,
    mappings: Vec<FieldMapping>,
    severity_remap: SeverityRemap,
    namespace: String,
    out: mpsc::Sender<zen_watcher_core::event::Event>,
}

pub struct WebhookAdapter {
    name: String,
    bind_addr: SocketAddr,
    path: String,
    mappings: Vec<FieldMapping>,
    severity_remap: SeverityRemap,
    namespace: String,
}

impl WebhookAdapter {
    pub fn build(config: &IngesterConfig) -> Result<Self, AdapterError> {
        let bind_addr = config
            .spec
            .extra
            .get("bindAddr")
            .and_then(Value::as_str)
            .unwrap_or(DEFAULT_BIND_ADDR)
            .parse()
            .map_err(|_| AdapterError::InvalidConfig {
                detail: format!("invalid bindAddr for ingester {:?}", config.name),
            })?;
        let path = config
            .spec
            .extra
            .get("path")
            .and_then(Value::as_str)
            .map(str::to_owned)
            .unwrap_or_else(|| format!("/webhook/{}", config.name));

        Ok(Self {
            name: config.name.clone(),
            bind_addr,
            path,
            mappings: config.spec.field_mappings.clone(),
            severity_remap: SeverityRemap::new(config.spec.severity_mappings.clone()),
            namespace: config.spec.namespace.clone().unwrap_or_else(|| "default".to_owned()),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub async fn run(self, cancel: CancellationToken, out: mpsc::Sender<zen_watcher_core::event::Event>) -> Result<(), AdapterError> {
        let state = Arc::new(WebhookState {
            source: self.name.clone(),
            mappings: self.mappings,
            severity_remap: self.severity_remap,
            namespace: self.namespace,
            out,
        });

        let router = Router::new().route(&self.path, post(handle_webhook)).with_state(state);

        let listener = tokio::net::TcpListener::bind(self.bind_addr)
            .await
            .map_err(|source| AdapterError::Io { source })?;

        info!(source = %self.name, addr = %self.bind_addr, path = %self.path, "webhook adapter listening");

        axum::serve(listener, router)
            .with_graceful_shutdown(async move { cancel.cancelled().await })
            .await
            .map_err(|source| AdapterError::Io { source })
    }
}

async fn handle_webhook(State(state): State<Arc<WebhookState>>, Json(payload): Json<Value>) -> StatusCode {
    if !payload.is_object() {
        return StatusCode::BAD_REQUEST;
    }

    let event = common::build_event(&state.source, &state.mappings, &state.severity_remap, &payload, &state.namespace);
    if event.event_type.is_empty() {
        return StatusCode::BAD_REQUEST;
    }

    match state.out.try_send(event) {
        Ok(()) => StatusCode::OK,
        Err(mpsc::error::TrySendError::Full(event)) => {
            // Channel is at capacity; fall back to a blocking send so the
            // caller still gets backpressure semantics instead of a drop.
            let out = state.out.clone();
            tokio::spawn(async move {
                if out.send(event).await.is_err() {
                    warn!("webhook event dropped, channel closed");
                }
            });
            StatusCode::ACCEPTED
        }
        Err(mpsc::error::TrySendError::Closed(_)) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}
