//! Kind-based ordering of objects for install and uninstall
//!
//! Objects a bundle depends on (namespaces, quotas, secrets, RBAC) are
//! created first and deleted last. Within one kind objects are ordered by
//! name. Kinds outside the table come after every known kind, grouped by
//! kind name. Only the table flips for uninstall; both tie-breaks hold in
//! either direction.

use std::cmp::Ordering;

use kube::api::DynamicObject;

use crate::objects::{kind_of, name_of};

/// Creation order of the kinds with a fixed position
pub const INSTALL_ORDER: [&str; 25] = [
    "Namespace",
    "ResourceQuota",
    "LimitRange",
    "Secret",
    "ConfigMap",
    "StorageClass",
    "PersistentVolume",
    "PersistentVolumeClaim",
    "ServiceAccount",
    "CustomResourceDefinition",
    "ClusterRole",
    "ClusterRoleBinding",
    "Role",
    "RoleBinding",
    "Service",
    "DaemonSet",
    "Pod",
    "ReplicationController",
    "ReplicaSet",
    "Deployment",
    "StatefulSet",
    "Job",
    "CronJob",
    "Ingress",
    "APIService",
];

/// Direction of an ordering
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortOrder {
    Install,
    /// Exact reverse of the install table
    Uninstall,
}

impl SortOrder {
    /// Position of `kind` in this order's table
    pub fn priority(self, kind: &str) -> Option<usize> {
        let index = INSTALL_ORDER.iter().position(|k| *k == kind)?;
        Some(match self {
            SortOrder::Install => index,
            SortOrder::Uninstall => INSTALL_ORDER.len() - 1 - index,
        })
    }

    /// Total order over `(kind, name)` pairs
    pub fn compare(self, a: (&str, &str), b: (&str, &str)) -> Ordering {
        let (kind_a, name_a) = a;
        let (kind_b, name_b) = b;

        match (self.priority(kind_a), self.priority(kind_b)) {
            (Some(pa), Some(pb)) => pa.cmp(&pb).then_with(|| name_a.cmp(name_b)),
            (Some(_), None) => Ordering::Less,
            (None, Some(_)) => Ordering::Greater,
            (None, None) => kind_a.cmp(kind_b).then_with(|| name_a.cmp(name_b)),
        }
    }
}

/// Sort objects in place for the given direction
pub fn sort_objects(objects: &mut [DynamicObject], order: SortOrder) {
    objects.sort_by(|a, b| order.compare((kind_of(a), name_of(a)), (kind_of(b), name_of(b))));
}
