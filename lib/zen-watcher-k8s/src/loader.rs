//! Watches the `Ingester` configuration resource and maintains an in-memory
//! `source -> IngesterConfig` table, surfacing diffs to a caller-supplied
//! callback.

use std::sync::Arc;

use dashmap::DashMap;
use futures::StreamExt;
use kube::api::Api;
use kube::runtime::watcher::{self, Event as WatchEvent};
use kube::runtime::WatchStreamExt;
use kube::ResourceExt;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::ingester::{Ingester, IngesterConfig};

/// A single change to the source table, reported by [`ConfigLoader::run`].
#[derive(Debug, Clone)]
pub enum ConfigChange {
    /// A source was added, or its spec changed materially (the loader does
    /// not attempt to diff fields — any update is a "changed" event and the
    /// caller decides whether to restart the adapter).
    Upserted(IngesterConfig),
    Removed(String),
}

/// Maintains the live `source -> IngesterConfig` table and drives the
/// add/update/delete lifecycle. Configuration parse failures are logged at
/// ERROR and the previous valid configuration is retained.
pub struct ConfigLoader {
    client: kube::Client,
    table: Arc<DashMap<String, IngesterConfig>>,
}

impl ConfigLoader {
    pub fn new(client: kube::Client) -> Self {
        Self {
            client,
            table: Arc::new(DashMap::new()),
        }
    }

    /// Snapshot of a single source's configuration, used by the processor
    /// for order-pinning.
    pub fn get_source_config(&self, source: &str) -> Option<IngesterConfig> {
        self.table.get(source).map(|entry| entry.clone())
    }

    /// Run the watch loop until `cancel` fires, invoking `on_change` for
    /// every add/update/delete. `namespace = None` watches Ingesters
    /// cluster-wide.
    pub async fn run<F>(&self, namespace: Option<&str>, mut on_change: F, cancel: CancellationToken)
    where
        F: FnMut(ConfigChange) + Send,
    {
        let api: Api<Ingester> = match namespace {
            Some(ns) => Api::namespaced(self.client.clone(), ns),
            None => Api::all(self.client.clone()),
        };

        let mut stream = watcher(api, watcher::Config::default())
            .default_backoff()
            .boxed();

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    info!("ingester config loader cancelled");
                    break;
                }
                next = stream.next() => {
                    match next {
                        Some(Ok(event)) => self.apply(event, &mut on_change),
                        Some(Err(error)) => {
                            error!(%error, "ingester watch stream error; retaining previous configuration");
                        }
                        None => {
                            warn!("ingester watch stream ended");
                            break;
                        }
                    }
                }
            }
        }
    }

    fn apply<F>(&self, event: WatchEvent<Ingester>, on_change: &mut F)
    where
        F: FnMut(ConfigChange),
    {
        match event {
            WatchEvent::Applied(ingester) => self.upsert(ingester, on_change),
            WatchEvent::Deleted(ingester) => self.remove(&ingester, on_change),
            WatchEvent::Restarted(items) => {
                let seen: Vec<String> = items
                    .iter()
                    .map(|i| source_name(i))
                    .collect();
                for ingester in items {
                    self.upsert(ingester, on_change);
                }
                let stale: Vec<String> = self
                    .table
                    .iter()
                    .map(|e| e.key().clone())
                    .filter(|k| !seen.contains(k))
                    .collect();
                for source in stale {
                    self.table.remove(&source);
                    on_change(ConfigChange::Removed(source));
                }
            }
        }
    }

    fn upsert<F>(&self, ingester: Ingester, on_change: &mut F)
    where
        F: FnMut(ConfigChange),
    {
        let name = source_name(&ingester);
        let config = IngesterConfig {
            name: name.clone(),
            spec: ingester.spec,
        };
        self.table.insert(name.clone(), config.clone());
        info!(source = %name, mode = ?config.spec.mode, "ingester configuration upserted");
        on_change(ConfigChange::Upserted(config));
    }

    fn remove<F>(&self, ingester: &Ingester, on_change: &mut F)
    where
        F: FnMut(ConfigChange),
    {
        let name = source_name(ingester);
        self.table.remove(&name);
        info!(source = %name, "ingester configuration removed");
        on_change(ConfigChange::Removed(name));
    }
}

fn source_name(ingester: &Ingester) -> String {
    ingester.name_any()
}
