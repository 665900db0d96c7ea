//! Top-level error type for process bootstrap and adapter-launch failures.
//! Everything downstream of bootstrap uses its own scoped error type and is
//! handled (logged, counted) rather than propagated here.

use snafu::Snafu;

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum Error {
    #[snafu(display("failed to parse environment configuration"))]
    Config { source: zen_watcher_core::config::ConfigError },

    #[snafu(display("failed to build the Kubernetes client"))]
    Client { source: zen_watcher_k8s::ClientError },

    #[snafu(display("adapter {source_name} failed to start"))]
    AdapterStartup {
        source_name: String,
        source: crate::adapters::AdapterError,
    },

    #[snafu(display("webhook HTTP server failed"))]
    Webhook { source: std::io::Error },
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
