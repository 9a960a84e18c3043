//! Resolving where an instance's objects go
//!
//! A local target uses the controller's own cluster and its shared mapper. A
//! shoot target is reached in three hops, each of which must succeed:
//!
//! 1. Shoot (in the instance's namespace) -> the Seed hosting it
//! 2. Seed -> secret in the local cluster holding the seed's kubeconfig
//! 3. Seed cluster -> secret `gardener` in the shoot's control-plane
//!    namespace, holding the shoot's kubeconfig

use std::sync::Arc;
use std::time::Duration;

use bouquet_core::{Shoot, Target};
use k8s_openapi::api::core::v1::Secret;
use tracing::debug;

use crate::cluster::{ClusterApi, Connector};
use crate::error::{KubeError, Result};
use crate::mapper::{RemoteMapperCache, RestMapper, SharedRestMapper};

/// Secret key holding a kubeconfig
pub const KUBECONFIG_KEY: &str = "kubeconfig";

/// Secret in a shoot's control-plane namespace granting access to the shoot
pub const GARDENER_SECRET: &str = "gardener";

/// A cluster to act on, with the mapper to use for it
pub struct ResolvedTarget<A: ?Sized> {
    pub cluster: Arc<A>,
    pub mapper: Arc<RestMapper>,
}

impl<A: ?Sized> Clone for ResolvedTarget<A> {
    fn clone(&self) -> Self {
        Self {
            cluster: Arc::clone(&self.cluster),
            mapper: Arc::clone(&self.mapper),
        }
    }
}

/// Turns an instance's [`Target`] into a cluster handle
pub struct TargetResolver<C: Connector> {
    local: Arc<C::Cluster>,
    local_mapper: SharedRestMapper,
    connector: C,
    project: Option<String>,
    remote_mappers: RemoteMapperCache,
}

impl<C: Connector> TargetResolver<C> {
    pub fn new(local: Arc<C::Cluster>, local_mapper: SharedRestMapper, connector: C) -> Self {
        Self {
            local,
            local_mapper,
            connector,
            project: None,
            remote_mappers: RemoteMapperCache::default(),
        }
    }

    /// Project used when computing a shoot's control-plane namespace
    pub fn with_project(mut self, project: Option<String>) -> Self {
        self.project = project;
        self
    }

    /// Cache remote mappers for `ttl`; zero re-discovers on every resolve
    pub fn with_remote_mapper_ttl(mut self, ttl: Duration) -> Self {
        self.remote_mappers = RemoteMapperCache::new(ttl);
        self
    }

    pub fn local(&self) -> &Arc<C::Cluster> {
        &self.local
    }

    pub async fn resolve(
        &self,
        namespace: &str,
        target: &Target,
    ) -> Result<ResolvedTarget<C::Cluster>> {
        match target.shoot_name() {
            None => Ok(ResolvedTarget {
                cluster: Arc::clone(&self.local),
                mapper: self.local_mapper.current(),
            }),
            Some(shoot) => self.resolve_shoot(namespace, shoot).await,
        }
    }

    async fn resolve_shoot(
        &self,
        namespace: &str,
        shoot_name: &str,
    ) -> Result<ResolvedTarget<C::Cluster>> {
        let shoot = self.local.get_shoot(namespace, shoot_name).await?;
        let seed_cluster = self.seed_cluster(&shoot).await?;

        let technical_id = shoot.technical_id(self.project.as_deref());
        let secret = seed_cluster
            .get_secret(&technical_id, GARDENER_SECRET)
            .await?;
        let cluster = Arc::new(self.connect(&secret).await?);

        let cache_key = format!("{}/{}", namespace, shoot_name);
        let mapper = match self.remote_mappers.get(&cache_key) {
            Some(mapper) => mapper,
            None => {
                let mapper = Arc::new(cluster.discover().await?);
                self.remote_mappers.put(&cache_key, Arc::clone(&mapper));
                mapper
            }
        };

        debug!(shoot = %cache_key, namespace = %technical_id, "resolved shoot target");
        Ok(ResolvedTarget { cluster, mapper })
    }

    async fn seed_cluster(&self, shoot: &Shoot) -> Result<C::Cluster> {
        let seed_name = shoot.seed_name().ok_or_else(|| KubeError::NoSeed {
            namespace: shoot.metadata.namespace.clone().unwrap_or_default(),
            name: shoot.metadata.name.clone().unwrap_or_default(),
        })?;
        let seed = self.local.get_seed(seed_name).await?;

        let secret_ref = &seed.spec.secret_ref;
        let secret = self
            .local
            .get_secret(&secret_ref.namespace, &secret_ref.name)
            .await?;
        self.connect(&secret).await
    }

    async fn connect(&self, secret: &Secret) -> Result<C::Cluster> {
        let namespace = secret.metadata.namespace.clone().unwrap_or_default();
        let name = secret.metadata.name.clone().unwrap_or_default();

        let kubeconfig = secret
            .data
            .as_ref()
            .and_then(|data| data.get(KUBECONFIG_KEY))
            .ok_or_else(|| KubeError::NoKubeconfig {
                namespace: namespace.clone(),
                name: name.clone(),
                key: KUBECONFIG_KEY,
            })?;

        self.connector
            .connect(&kubeconfig.0)
            .await
            .map_err(|e| KubeError::InvalidKubeconfig {
                namespace,
                name,
                message: e.to_string(),
            })
    }
}
