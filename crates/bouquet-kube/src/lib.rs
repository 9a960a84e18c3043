//! Bouquet Kube - Kubernetes integration for Bouquet
//!
//! This crate provides:
//! - **Cluster access**: the `ClusterApi` seam, backed by kube or an in-memory mock
//! - **REST mapping**: kind to endpoint snapshots, refreshed in the background
//! - **Objects**: decoding rendered YAML into dynamic objects
//! - **Ordering**: kind-based install and uninstall order
//! - **Apply**: idempotent create and delete with aggregated failures
//! - **Targets**: reaching a shoot cluster through its seed

pub mod apply;
pub mod cluster;
pub mod error;
pub mod mapper;
pub mod mock;
pub mod objects;
pub mod ordering;
pub mod target;

pub use apply::{DEFAULT_NAMESPACE, OperationSummary, create_objects, delete_objects};
pub use cluster::{ClusterApi, ConnectError, Connector, KubeCluster, KubeConnector};
pub use error::{KubeError, Result};
pub use mapper::{Mapping, RemoteMapperCache, RestMapper, SharedRestMapper};
pub use mock::{MockCluster, MockConnector, MockOp, OperationCounts};
pub use objects::{decode_files, decode_objects, describe, gvk_of};
pub use ordering::{INSTALL_ORDER, SortOrder, sort_objects};
pub use target::{GARDENER_SECRET, KUBECONFIG_KEY, ResolvedTarget, TargetResolver};
