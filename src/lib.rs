//! Library surface for the `zen-watcher` binary: wiring that the
//! integration tests exercise directly, kept separate from `main` so tests
//! do not need a live cluster to construct a [`processor::Processor`].

pub mod adapters;
pub mod config_source;
pub mod error;
pub mod launcher;
pub mod processor;

use snafu::ResultExt;
use tracing::info;

use zen_watcher_core::allowlist::{Allowlist, Gvr};
use zen_watcher_core::config::RuntimeConfig;
use zen_watcher_core::dedup::DedupCache;
use zen_watcher_core::filter::{Filter, FilterPolicy};
use zen_watcher_core::metrics as metric_names;
use zen_watcher_core::optimize::OptimizationEngine;
use zen_watcher_k8s::writer::WriteTarget;
use zen_watcher_k8s::{ConfigLoader, DynamicClient};

use crate::config_source::SourceConfigs;
use crate::error::{ClientSnafu, ConfigSnafu, Result};
use crate::launcher::Launcher;
use crate::processor::Processor;

const OBSERVATION_GROUP: &str = "zen-watcher.io";
const OBSERVATION_VERSION: &str = "v1alpha1";
const OBSERVATION_RESOURCE: &str = "observations";

pub fn init_logging() {
    let filter =
        tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).with_target(true).init();
}

/// Build every long-lived component from the process environment and run
/// the launcher until a shutdown signal is received. Returns once the
/// launcher has drained in-flight work.
pub async fn run(root_cancel: tokio_util::sync::CancellationToken) -> Result<()> {
    metric_names::describe_all();

    let config = RuntimeConfig::from_env().context(ConfigSnafu)?;
    info!(?config, "starting zen-watcher");

    let client = DynamicClient::try_default().await.context(ClientSnafu)?;

    let observation_gvr = Gvr::new(OBSERVATION_GROUP, OBSERVATION_VERSION, OBSERVATION_RESOURCE);
    let resolved_observation = client.resolve(&observation_gvr).await.context(ClientSnafu)?;
    let default_target = WriteTarget {
        gvr: observation_gvr.clone(),
        resolved: resolved_observation,
    };

    let allowlist = Allowlist::new(
        observation_gvr,
        config.allowed_gvrs.clone(),
        config.allowed_namespaces.clone(),
        config.allowed_cluster_scoped_gvrs.clone(),
    );
    let filter = Filter::new(FilterPolicy::default());
    let dedup = DedupCache::new(config.dedup_window, config.dedup_max_size);
    let optimizer = OptimizationEngine::new();
    let source_configs = SourceConfigs::new();

    let processor = Processor::new(
        client.clone(),
        allowlist,
        filter,
        dedup,
        optimizer,
        default_target,
        source_configs.clone(),
        config.observation_ttl_seconds,
    );

    let loader = ConfigLoader::new(client.raw());
    let launcher = Launcher::new(client, loader, source_configs, processor, config.watch_namespace.clone());

    launcher.run(root_cancel).await;
    Ok(())
}
