//! Zen Watcher: aggregates heterogeneous findings from source adapters into
//! a uniform Observation custom resource.

use tokio_util::sync::CancellationToken;
use tracing::info;

#[tokio::main]
async fn main() -> zen_watcher::error::Result<()> {
    zen_watcher::init_logging();

    let root_cancel = CancellationToken::new();
    let shutdown_signal = root_cancel.clone();
    tokio::spawn(async move {
        let _ = tokio::signal::ctrl_c().await;
        info!("shutdown signal received");
        shutdown_signal.cancel();
    });

    zen_watcher::run(root_cancel).await
}
