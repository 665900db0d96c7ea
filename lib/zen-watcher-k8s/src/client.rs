//! A dynamic-typed Kubernetes API client, wrapping `kube`'s discovery and
//! `DynamicObject` machinery so callers can `watch`/`list`/`create` against
//! an arbitrary GVR resolved at runtime.

use futures::stream::BoxStream;
use futures::StreamExt;
use kube::api::{Api, DynamicObject, GroupVersionKind, PostParams};
use kube::discovery::{ApiCapabilities, ApiResource, Discovery, Scope};
use kube::runtime::watcher::{self, Event as WatchEvent};
use kube::{Client, ResourceExt};
use snafu::{ResultExt, Snafu};
use zen_watcher_core::allowlist::Gvr;

#[derive(Debug, Snafu)]
pub enum ClientError {
    #[snafu(display("failed to build in-cluster/kubeconfig client"))]
    Init { source: kube::Error },
    #[snafu(display("failed to run API discovery"))]
    Discovery { source: kube::Error },
    #[snafu(display("GVR {gvr:?} was not found by discovery"))]
    UnknownGvr { gvr: Gvr },
    #[snafu(display("create failed"))]
    Create { source: kube::Error },
    #[snafu(display("delete failed"))]
    Delete { source: kube::Error },
    #[snafu(display("list failed"))]
    List { source: kube::Error },
}

/// A resolved GVR: the `kube` discovery metadata needed to build an
/// `Api<DynamicObject>` for it.
#[derive(Debug, Clone)]
pub struct ResolvedGvr {
    pub resource: ApiResource,
    pub capabilities: ApiCapabilities,
}

impl ResolvedGvr {
    pub fn scope(&self) -> Scope {
        self.capabilities.scope.clone()
    }
}

/// Thin wrapper over `kube::Client` plus a discovery cache, exposing only
/// the operations this system needs: `watch`, `list`, `create`, and
/// scratch-job `delete`. Deletion is never issued against Observations.
#[derive(Clone)]
pub struct DynamicClient {
    client: Client,
}

impl DynamicClient {
    /// Build a client from the in-cluster service account or local
    /// kubeconfig, whichever `kube::Client::try_default` finds.
    pub async fn try_default() -> Result<Self, ClientError> {
        let client = Client::try_default().await.context(InitSnafu)?;
        Ok(Self { client })
    }

    pub fn from_client(client: Client) -> Self {
        Self { client }
    }

    /// Escape hatch for adapters that need a typed API (`Api<Pod>`,
    /// `Api<Event>`) the dynamic surface above does not cover.
    pub fn raw(&self) -> Client {
        self.client.clone()
    }

    /// Resolve `gvr` against the live API surface via discovery. Discovery
    /// is not cached here — callers that resolve the same GVR repeatedly
    /// (the writer, the config loader) are expected to cache the result
    /// themselves, since the set of installed CRDs changes rarely relative
    /// to write volume.
    pub async fn resolve(&self, gvr: &Gvr) -> Result<ResolvedGvr, ClientError> {
        let discovery = Discovery::new(self.client.clone())
            .run()
            .await
            .context(DiscoverySnafu)?;

        let gvk = GroupVersionKind {
            group: gvr.group.clone(),
            version: gvr.version.clone(),
            kind: String::new(),
        };

        for group in discovery.groups() {
            for (resource, capabilities) in group.recommended_resources() {
                if resource.group == gvk.group && resource.version == gvk.version && resource.plural == gvr.resource {
                    return Ok(ResolvedGvr { resource, capabilities });
                }
            }
        }

        UnknownGvrSnafu { gvr: gvr.clone() }.fail()
    }

    fn api_for(&self, resolved: &ResolvedGvr, namespace: Option<&str>) -> Api<DynamicObject> {
        match (resolved.scope(), namespace) {
            (Scope::Namespaced, Some(ns)) => {
                Api::namespaced_with(self.client.clone(), ns, &resolved.resource)
            }
            _ => Api::all_with(self.client.clone(), &resolved.resource),
        }
    }

    /// Create `object` in `namespace` (or cluster-scoped if `namespace` is
    /// `None`). Returns the created object, including its server-assigned
    /// name.
    pub async fn create(
        &self,
        resolved: &ResolvedGvr,
        namespace: Option<&str>,
        object: DynamicObject,
    ) -> Result<DynamicObject, ClientError> {
        let api = self.api_for(resolved, namespace);
        api.create(&PostParams::default(), &object).await.context(CreateSnafu)
    }

    /// List objects of `resolved` in `namespace`, used by the configmap-poll
    /// and generic-CRD adapters.
    pub async fn list(
        &self,
        resolved: &ResolvedGvr,
        namespace: Option<&str>,
        params: kube::api::ListParams,
    ) -> Result<Vec<DynamicObject>, ClientError> {
        let api = self.api_for(resolved, namespace);
        let list = api.list(&params).await.context(ListSnafu)?;
        Ok(list.items)
    }

    /// Delete a scratch resource. Never used on Observations.
    pub async fn delete(&self, resolved: &ResolvedGvr, namespace: Option<&str>, name: &str) -> Result<(), ClientError> {
        let api = self.api_for(resolved, namespace);
        api.delete(name, &Default::default()).await.context(DeleteSnafu)?;
        Ok(())
    }

    /// Watch objects of `resolved` in `namespace`. Item type mirrors `kube`'s
    /// own `watcher::Event` so callers can distinguish `Apply`/`Delete`/
    /// resync without this crate re-inventing that vocabulary.
    pub fn watch(
        &self,
        resolved: &ResolvedGvr,
        namespace: Option<&str>,
    ) -> BoxStream<'static, Result<WatchEvent<DynamicObject>, watcher::Error>> {
        let api = self.api_for(resolved, namespace);
        watcher(api, watcher::Config::default()).boxed()
    }
}

fn watcher(
    api: Api<DynamicObject>,
    config: watcher::Config,
) -> impl futures::Stream<Item = Result<WatchEvent<DynamicObject>, watcher::Error>> {
    kube::runtime::watcher(api, config)
}

/// Best-effort extraction of `(namespace, name)` from a watched object, for
/// logging and for adapters that need to build a [`ResourceRef`].
pub fn object_identity(object: &DynamicObject) -> (Option<String>, String) {
    (object.namespace(), object.name_any())
}

// Re-exported so downstream adapter code does not need a direct `kube`
// dependency merely to name these types.
pub use kube::api::DynamicObject as K8sObject;
pub use kube::runtime::watcher::Event as K8sWatchEvent;
pub use kube::Client as K8sClient;
