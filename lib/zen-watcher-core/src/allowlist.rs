//! Two-layer write authorization: GVR allowlist/denylist plus namespace scope.

use std::collections::HashSet;

use snafu::Snafu;

/// `(group, version, resource)` — identifies a Kubernetes kind the way the
/// dynamic client addresses it.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Gvr {
    pub group: String,
    pub version: String,
    pub resource: String,
}

impl Gvr {
    pub fn new(group: impl Into<String>, version: impl Into<String>, resource: impl Into<String>) -> Self {
        Self {
            group: group.into(),
            version: version.into(),
            resource: resource.into(),
        }
    }

    /// Canonical `"group/version/resource"` string form used in allowlist
    /// configuration (the core API group is empty, so it renders as
    /// `"/v1/secrets"`).
    pub fn as_key(&self) -> String {
        format!("{}/{}/{}", self.group, self.version, self.resource)
    }
}

/// Distinguishable denial reasons, one per allowlist gate that can reject a write.
#[derive(Debug, Snafu, PartialEq, Eq, Clone, Copy)]
pub enum DenyReason {
    #[snafu(display("GVR is present in the hard deny list"))]
    GvrDenied,
    #[snafu(display("GVR is not present in the allowlist"))]
    GvrNotAllowed,
    #[snafu(display("namespace is not present in the namespace allowlist"))]
    NamespaceNotAllowed,
    #[snafu(display("cluster-scoped writes of this GVR are not permitted"))]
    ClusterScopedNotAllowed,
}

impl DenyReason {
    /// Stable token for metrics labels and log fields.
    pub fn as_label(self) -> &'static str {
        match self {
            Self::GvrDenied => "gvr_denied",
            Self::GvrNotAllowed => "gvr_not_allowed",
            Self::NamespaceNotAllowed => "namespace_not_allowed",
            Self::ClusterScopedNotAllowed => "cluster_scoped_not_allowed",
        }
    }
}

/// The hard deny list: rejected even if present in the allow set. Kinds
/// dangerous enough that no configuration should be able to unlock them.
fn hard_denied() -> HashSet<&'static str> {
    HashSet::from([
        "/v1/secrets",
        "rbac.authorization.k8s.io/v1/roles",
        "rbac.authorization.k8s.io/v1/rolebindings",
        "rbac.authorization.k8s.io/v1/clusterroles",
        "rbac.authorization.k8s.io/v1/clusterrolebindings",
        "/v1/serviceaccounts",
        "admissionregistration.k8s.io/v1/validatingwebhookconfigurations",
        "admissionregistration.k8s.io/v1/mutatingwebhookconfigurations",
        "apiextensions.k8s.io/v1/customresourcedefinitions",
    ])
}

#[derive(Debug, Clone)]
pub struct Allowlist {
    allowed_kinds: HashSet<String>,
    denied_kinds: HashSet<String>,
    allowed_namespaces: HashSet<String>,
    cluster_scoped_allowed: HashSet<String>,
}

impl Allowlist {
    /// Build a new allowlist seeded with the process's own Observation GVR
    /// and the hard deny list, plus whatever environment-provided extras the
    /// caller resolved (`ALLOWED_GVRS`, `ALLOWED_NAMESPACES`,
    /// `ALLOWED_CLUSTER_SCOPED_GVRS`).
    pub fn new(
        observation_gvr: Gvr,
        extra_allowed_kinds: impl IntoIterator<Item = String>,
        allowed_namespaces: impl IntoIterator<Item = String>,
        cluster_scoped_allowed: impl IntoIterator<Item = String>,
    ) -> Self {
        let mut allowed_kinds: HashSet<String> = HashSet::from([observation_gvr.as_key()]);
        allowed_kinds.extend(extra_allowed_kinds);
        Self {
            allowed_kinds,
            denied_kinds: hard_denied().into_iter().map(ToOwned::to_owned).collect(),
            allowed_namespaces: allowed_namespaces.into_iter().collect(),
            cluster_scoped_allowed: cluster_scoped_allowed.into_iter().collect(),
        }
    }

    /// `namespace = None` means a cluster-scoped write is being attempted.
    pub fn is_allowed(&self, gvr: &Gvr, namespace: Option<&str>) -> Result<(), DenyReason> {
        let key = gvr.as_key();
        if self.denied_kinds.contains(&key) {
            return Err(DenyReason::GvrDenied);
        }
        if !self.allowed_kinds.contains(&key) {
            return Err(DenyReason::GvrNotAllowed);
        }
        match namespace {
            Some(ns) => {
                // An empty allowed-namespace set means "only the process's
                // configured watch namespace", which the caller is expected
                // to have already folded into `allowed_namespaces` at
                // construction time; here an empty set simply allows
                // nothing.
                if !self.allowed_namespaces.is_empty() && !self.allowed_namespaces.contains(ns) {
                    return Err(DenyReason::NamespaceNotAllowed);
                }
                if self.allowed_namespaces.is_empty() {
                    return Err(DenyReason::NamespaceNotAllowed);
                }
            }
            None => {
                if !self.cluster_scoped_allowed.contains(&key) {
                    return Err(DenyReason::ClusterScopedNotAllowed);
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn observation_gvr() -> Gvr {
        Gvr::new("zen-watcher.io", "v1alpha1", "observations")
    }

    #[test]
    fn observation_kind_is_allowed_in_its_namespace() {
        let allowlist = Allowlist::new(observation_gvr(), [], ["prod".to_string()], []);
        assert!(allowlist.is_allowed(&observation_gvr(), Some("prod")).is_ok());
    }

    #[test]
    fn secrets_are_hard_denied_even_if_added() {
        let secrets = Gvr::new("", "v1", "secrets");
        let allowlist = Allowlist::new(observation_gvr(), [secrets.as_key()], ["prod".to_string()], []);
        assert_eq!(
            allowlist.is_allowed(&secrets, Some("prod")),
            Err(DenyReason::GvrDenied)
        );
    }

    #[test]
    fn unknown_kind_is_not_allowed() {
        let allowlist = Allowlist::new(observation_gvr(), [], ["prod".to_string()], []);
        let other = Gvr::new("example.com", "v1", "widgets");
        assert_eq!(
            allowlist.is_allowed(&other, Some("prod")),
            Err(DenyReason::GvrNotAllowed)
        );
    }

    #[test]
    fn namespace_outside_allowlist_is_denied() {
        let allowlist = Allowlist::new(observation_gvr(), [], ["prod".to_string()], []);
        assert_eq!(
            allowlist.is_allowed(&observation_gvr(), Some("kube-system")),
            Err(DenyReason::NamespaceNotAllowed)
        );
    }

    #[test]
    fn cluster_scoped_write_requires_explicit_allow() {
        let allowlist = Allowlist::new(observation_gvr(), [], ["prod".to_string()], []);
        assert_eq!(
            allowlist.is_allowed(&observation_gvr(), None),
            Err(DenyReason::ClusterScopedNotAllowed)
        );
        let allowlist = Allowlist::new(
            observation_gvr(),
            [],
            ["prod".to_string()],
            [observation_gvr().as_key()],
        );
        assert!(allowlist.is_allowed(&observation_gvr(), None).is_ok());
    }
}
