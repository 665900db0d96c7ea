//! Adapter launcher: owns the bounded event channel, the set of running
//! adapters, and cancellation. One producer task per adapter, a single
//! consumer loop that drives the processor.

use std::collections::HashMap;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use zen_watcher_k8s::{ConfigChange, ConfigLoader, DynamicClient};

use crate::adapters::{self, AdapterError};
use crate::config_source::SourceConfigs;
use crate::processor::Processor;

/// Capacity of the shared, bounded event channel.
const CHANNEL_CAPACITY: usize = 1_000;

/// Grace period the consumer waits for in-flight producer sends to drain
/// before returning on shutdown.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(2);

struct RunningAdapter {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

/// Drives the whole pipeline: the config loader feeds adapter lifecycle
/// decisions, adapters feed the event channel, the processor drains it.
pub struct Launcher {
    client: DynamicClient,
    loader: ConfigLoader,
    source_configs: SourceConfigs,
    processor: Processor,
    watch_namespace: Option<String>,
}

impl Launcher {
    pub fn new(
        client: DynamicClient,
        loader: ConfigLoader,
        source_configs: SourceConfigs,
        processor: Processor,
        watch_namespace: Option<String>,
    ) -> Self {
        Self {
            client,
            loader,
            source_configs,
            processor,
            watch_namespace,
        }
    }

    /// Run until `root_cancel` fires: spawn the config loader and the
    /// consumer loop, react to adapter add/remove as the loader reports
    /// changes, then shut everything down on cancellation.
    pub async fn run(self, root_cancel: CancellationToken) {
        let Launcher {
            client,
            loader,
            source_configs,
            processor,
            watch_namespace,
        } = self;

        let (event_tx, mut event_rx) = mpsc::channel(CHANNEL_CAPACITY);
        let (change_tx, mut change_rx) = mpsc::unbounded_channel::<ConfigChange>();

        let loader_cancel = root_cancel.clone();
        let namespace = watch_namespace.clone();
        let loader_task = tokio::spawn(async move {
            loader
                .run(
                    namespace.as_deref(),
                    move |change| {
                        let _ = change_tx.send(change);
                    },
                    loader_cancel,
                )
                .await;
        });

        let consumer_cancel = root_cancel.clone();
        let processor_for_consumer = processor.clone();
        let consumer_task = tokio::spawn(async move {
            let processor = processor_for_consumer;
            loop {
                tokio::select! {
                    biased;
                    _ = consumer_cancel.cancelled() => break,
                    event = event_rx.recv() => {
                        match event {
                            Some(event) => processor.process(event).await,
                            None => break,
                        }
                    }
                }
            }
            // Drain whatever producers already queued, bounded by the
            // shutdown grace period.
            let drain_deadline = tokio::time::sleep(SHUTDOWN_GRACE);
            tokio::pin!(drain_deadline);
            loop {
                tokio::select! {
                    biased;
                    _ = &mut drain_deadline => break,
                    event = event_rx.recv() => {
                        match event {
                            Some(event) => processor.process(event).await,
                            None => break,
                        }
                    }
                }
            }
        });

        let mut adapters: HashMap<String, RunningAdapter> = HashMap::new();
        loop {
            tokio::select! {
                biased;
                _ = root_cancel.cancelled() => break,
                change = change_rx.recv() => {
                    match change {
                        Some(change) => {
                            apply_change(change, &client, &source_configs, &event_tx, &root_cancel, &mut adapters).await
                        }
                        None => break,
                    }
                }
            }
        }

        for (source, running) in adapters.drain() {
            running.cancel.cancel();
            if running.handle.await.is_err() {
                warn!(source, "adapter task panicked during shutdown");
            }
        }

        let _ = loader_task.await;
        let _ = consumer_task.await;
        info!("launcher shut down cleanly");
    }
}

async fn apply_change(
    change: ConfigChange,
    client: &DynamicClient,
    source_configs: &SourceConfigs,
    event_tx: &mpsc::Sender<zen_watcher_core::event::Event>,
    root_cancel: &CancellationToken,
    adapters: &mut HashMap<String, RunningAdapter>,
) {
    source_configs.apply(change.clone(), client).await;

    match change {
        ConfigChange::Upserted(config) => {
            let source = config.name.clone();
            if let Some(previous) = adapters.remove(&source) {
                previous.cancel.cancel();
                let _ = previous.handle.await;
            }

            match adapters::build_adapter(&config, client.clone()).await {
                Ok(adapter) => {
                    let cancel = root_cancel.child_token();
                    let adapter_name = adapter.name().to_owned();
                    let tx = event_tx.clone();
                    let task_cancel = cancel.clone();
                    let handle = tokio::spawn(async move {
                        if let Err(error) = adapter.run(task_cancel, tx).await {
                            log_adapter_error(&adapter_name, &error);
                        }
                    });
                    adapters.insert(source, RunningAdapter { cancel, handle });
                }
                Err(error) => {
                    error!(source = %source, %error, "failed to build adapter from ingester configuration");
                }
            }
        }
        ConfigChange::Removed(source) => {
            if let Some(running) = adapters.remove(&source) {
                running.cancel.cancel();
                let _ = running.handle.await;
            }
        }
    }
}

fn log_adapter_error(source: &str, error: &AdapterError) {
    error!(source, %error, "adapter exited with an unrecoverable startup error");
}
