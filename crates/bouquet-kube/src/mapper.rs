//! REST mapping: which endpoint serves a given kind
//!
//! A [`RestMapper`] is an immutable snapshot built from discovery. The local
//! cluster's snapshot lives in a [`SharedRestMapper`] that a background task
//! replaces periodically; remote clusters get a fresh snapshot per use unless
//! the [`RemoteMapperCache`] is enabled.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

use kube::core::GroupVersionKind;
use kube::discovery::{ApiResource, Discovery, Scope};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::cluster::ClusterApi;
use crate::error::{KubeError, Result};

/// Where a kind is served and whether it lives in a namespace
#[derive(Debug, Clone)]
pub struct Mapping {
    pub resource: ApiResource,
    pub namespaced: bool,
}

/// Snapshot of group/version/kind to REST endpoint
#[derive(Debug, Clone, Default)]
pub struct RestMapper {
    mappings: HashMap<(String, String, String), Mapping>,
}

impl RestMapper {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every served version of every resource found by discovery
    pub fn from_discovery(discovery: &Discovery) -> Self {
        let mut mapper = Self::new();
        for group in discovery.groups() {
            for version in group.versions() {
                for (resource, caps) in group.versioned_resources(version) {
                    mapper.insert(resource, caps.scope == Scope::Namespaced);
                }
            }
        }
        mapper
    }

    /// Register (or replace) a mapping
    pub fn insert(&mut self, resource: ApiResource, namespaced: bool) {
        let key = (
            resource.group.clone(),
            resource.version.clone(),
            resource.kind.clone(),
        );
        self.mappings.insert(key, Mapping { resource, namespaced });
    }

    /// Builder-style [`insert`](Self::insert)
    pub fn with(mut self, resource: ApiResource, namespaced: bool) -> Self {
        self.insert(resource, namespaced);
        self
    }

    pub fn resolve(&self, gvk: &GroupVersionKind) -> Option<&Mapping> {
        self.mappings
            .get(&(gvk.group.clone(), gvk.version.clone(), gvk.kind.clone()))
    }

    /// Like [`resolve`](Self::resolve), failing with [`KubeError::UnknownKind`]
    pub fn mapping_for(&self, gvk: &GroupVersionKind) -> Result<&Mapping> {
        self.resolve(gvk).ok_or_else(|| KubeError::UnknownKind {
            api_version: gvk.api_version(),
            kind: gvk.kind.clone(),
        })
    }

    pub fn len(&self) -> usize {
        self.mappings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.mappings.is_empty()
    }
}

/// The local cluster's mapper, shared by all workers and refreshed in place
#[derive(Debug, Clone, Default)]
pub struct SharedRestMapper {
    current: Arc<RwLock<Arc<RestMapper>>>,
}

impl SharedRestMapper {
    pub fn new(mapper: RestMapper) -> Self {
        Self {
            current: Arc::new(RwLock::new(Arc::new(mapper))),
        }
    }

    /// Snapshot in effect right now
    pub fn current(&self) -> Arc<RestMapper> {
        match self.current.read() {
            Ok(guard) => Arc::clone(&guard),
            Err(poisoned) => Arc::clone(&poisoned.into_inner()),
        }
    }

    pub fn replace(&self, mapper: RestMapper) {
        let mapper = Arc::new(mapper);
        match self.current.write() {
            Ok(mut guard) => *guard = mapper,
            Err(poisoned) => *poisoned.into_inner() = mapper,
        }
    }

    /// Re-run discovery and swap the snapshot
    pub async fn refresh<C: ClusterApi + ?Sized>(&self, cluster: &C) -> Result<()> {
        let mapper = cluster.discover().await?;
        debug!(mappings = mapper.len(), "REST mapper refreshed");
        self.replace(mapper);
        Ok(())
    }

    /// Refresh every `interval` until `shutdown` fires
    ///
    /// A failed refresh keeps the previous snapshot and is retried on the
    /// next tick.
    pub fn spawn_refresh<C>(
        &self,
        cluster: Arc<C>,
        interval: Duration,
        shutdown: CancellationToken,
    ) -> JoinHandle<()>
    where
        C: ClusterApi + ?Sized + 'static,
    {
        let shared = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(Instant::now() + interval, interval);
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = ticker.tick() => {
                        if let Err(e) = shared.refresh(cluster.as_ref()).await {
                            warn!(error = %e, "REST mapper refresh failed");
                        }
                    }
                }
            }
            debug!("REST mapper refresh stopped");
        })
    }
}

/// Per-target mapper cache; a zero TTL disables caching
#[derive(Debug, Default)]
pub struct RemoteMapperCache {
    ttl: Duration,
    entries: Mutex<HashMap<String, (Instant, Arc<RestMapper>)>>,
}

impl RemoteMapperCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            entries: Mutex::new(HashMap::new()),
        }
    }

    pub fn is_enabled(&self) -> bool {
        !self.ttl.is_zero()
    }

    /// Cached mapper for `key` if still fresh; a stale entry is dropped
    pub fn get(&self, key: &str) -> Option<Arc<RestMapper>> {
        if !self.is_enabled() {
            return None;
        }
        let mut entries = self.entries.lock().ok()?;
        let fresh = entries
            .get(key)
            .filter(|(stored, _)| stored.elapsed() < self.ttl)
            .map(|(_, mapper)| Arc::clone(mapper));
        if fresh.is_none() {
            entries.remove(key);
        }
        fresh
    }

    /// Store a fresh mapper and evict every expired entry
    pub fn put(&self, key: &str, mapper: Arc<RestMapper>) {
        if !self.is_enabled() {
            return;
        }
        if let Ok(mut entries) = self.entries.lock() {
            entries.retain(|_, (stored, _)| stored.elapsed() < self.ttl);
            entries.insert(key.to_string(), (Instant::now(), mapper));
        }
    }

    /// Entries held, fresh or not
    pub fn len(&self) -> usize {
        self.entries.lock().map_or(0, |entries| entries.len())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
