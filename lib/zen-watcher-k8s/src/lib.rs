//! Kubernetes API surface for zen-watcher: the dynamic client, the
//! `Ingester` CRD, the config loader, and the writer that turns a
//! normalized event into a created resource.

pub mod client;
pub mod ingester;
pub mod loader;
pub mod writer;

pub use client::{ClientError, DynamicClient, K8sObject, K8sWatchEvent, ResolvedGvr};
pub use ingester::{AcquisitionMode, Ingester, IngesterConfig, IngesterSpec};
pub use loader::{ConfigChange, ConfigLoader};
pub use writer::{write, WriteError, WriteErrorKind, WriteTarget};
