//! Cluster access
//!
//! Everything Bouquet does against an API server goes through [`ClusterApi`],
//! so reconcilers can run against [`KubeCluster`] in production and
//! [`MockCluster`](crate::mock::MockCluster) in tests. A [`Connector`] turns
//! kubeconfig bytes into a cluster handle for seeds and shoots.

use async_trait::async_trait;
use bouquet_core::{AddonInstance, Seed, Shoot};
use k8s_openapi::api::core::v1::{ConfigMap, Secret};
use kube::api::{Api, DeleteParams, DynamicObject, PostParams};
use kube::config::{KubeConfigOptions, Kubeconfig};
use kube::discovery::Discovery;
use kube::{Client, Config, ResourceExt};
use thiserror::Error;

use crate::error::{KubeError, Result};
use crate::mapper::{Mapping, RestMapper};

/// Operations the controllers need from one cluster
///
/// Implementations must be Send + Sync for use across worker tasks.
#[async_trait]
pub trait ClusterApi: Send + Sync {
    async fn get_config_map(&self, namespace: &str, name: &str) -> Result<ConfigMap>;

    async fn get_secret(&self, namespace: &str, name: &str) -> Result<Secret>;

    async fn get_shoot(&self, namespace: &str, name: &str) -> Result<Shoot>;

    async fn get_seed(&self, name: &str) -> Result<Seed>;

    async fn create_instance(&self, instance: &AddonInstance) -> Result<AddonInstance>;

    /// Replace an existing instance (finalizer changes)
    async fn update_instance(&self, instance: &AddonInstance) -> Result<AddonInstance>;

    /// Create an arbitrary object at the endpoint given by `mapping`
    async fn create_object(&self, mapping: &Mapping, object: &DynamicObject) -> Result<()>;

    async fn delete_object(
        &self,
        mapping: &Mapping,
        namespace: Option<&str>,
        name: &str,
    ) -> Result<()>;

    /// Run discovery and build a fresh mapper
    async fn discover(&self) -> Result<RestMapper>;
}

/// Kubeconfig could not be turned into a client
#[derive(Debug, Error)]
#[error("{0}")]
pub struct ConnectError(pub String);

/// Builds cluster handles from kubeconfig bytes
#[async_trait]
pub trait Connector: Send + Sync + 'static {
    type Cluster: ClusterApi + 'static;

    async fn connect(&self, kubeconfig: &[u8]) -> std::result::Result<Self::Cluster, ConnectError>;
}

/// [`ClusterApi`] backed by a kube client
#[derive(Clone)]
pub struct KubeCluster {
    client: Client,
}

impl KubeCluster {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    /// Client from the given kubeconfig file, or the inferred environment
    pub async fn connect(kubeconfig: Option<&std::path::Path>) -> Result<Self> {
        let config = match kubeconfig {
            Some(path) => {
                let kubeconfig = Kubeconfig::read_from(path)
                    .map_err(|e| KubeError::Api(kube::Error::InferKubeconfig(e)))?;
                Config::from_custom_kubeconfig(kubeconfig, &KubeConfigOptions::default())
                    .await
                    .map_err(|e| KubeError::Api(kube::Error::InferKubeconfig(e)))?
            }
            None => Config::infer()
                .await
                .map_err(|e| KubeError::Api(kube::Error::InferConfig(e)))?,
        };
        Ok(Self::new(Client::try_from(config)?))
    }

    pub fn client(&self) -> &Client {
        &self.client
    }

    fn dynamic_api(&self, mapping: &Mapping, namespace: Option<&str>) -> Api<DynamicObject> {
        match (mapping.namespaced, namespace) {
            (true, Some(ns)) => Api::namespaced_with(self.client.clone(), ns, &mapping.resource),
            (true, None) => {
                Api::default_namespaced_with(self.client.clone(), &mapping.resource)
            }
            (false, _) => Api::all_with(self.client.clone(), &mapping.resource),
        }
    }
}

fn instance_namespace(instance: &AddonInstance) -> Result<String> {
    instance.namespace().ok_or_else(|| {
        KubeError::InvalidObject(format!("AddonInstance {} has no namespace", instance.name_any()))
    })
}

#[async_trait]
impl ClusterApi for KubeCluster {
    async fn get_config_map(&self, namespace: &str, name: &str) -> Result<ConfigMap> {
        let api: Api<ConfigMap> = Api::namespaced(self.client.clone(), namespace);
        Ok(api.get(name).await?)
    }

    async fn get_secret(&self, namespace: &str, name: &str) -> Result<Secret> {
        let api: Api<Secret> = Api::namespaced(self.client.clone(), namespace);
        Ok(api.get(name).await?)
    }

    async fn get_shoot(&self, namespace: &str, name: &str) -> Result<Shoot> {
        let api: Api<Shoot> = Api::namespaced(self.client.clone(), namespace);
        Ok(api.get(name).await?)
    }

    async fn get_seed(&self, name: &str) -> Result<Seed> {
        let api: Api<Seed> = Api::all(self.client.clone());
        Ok(api.get(name).await?)
    }

    async fn create_instance(&self, instance: &AddonInstance) -> Result<AddonInstance> {
        let namespace = instance_namespace(instance)?;
        let api: Api<AddonInstance> = Api::namespaced(self.client.clone(), &namespace);
        Ok(api.create(&PostParams::default(), instance).await?)
    }

    async fn update_instance(&self, instance: &AddonInstance) -> Result<AddonInstance> {
        let namespace = instance_namespace(instance)?;
        let api: Api<AddonInstance> = Api::namespaced(self.client.clone(), &namespace);
        Ok(api
            .replace(&instance.name_any(), &PostParams::default(), instance)
            .await?)
    }

    async fn create_object(&self, mapping: &Mapping, object: &DynamicObject) -> Result<()> {
        let api = self.dynamic_api(mapping, object.metadata.namespace.as_deref());
        api.create(&PostParams::default(), object).await?;
        Ok(())
    }

    async fn delete_object(
        &self,
        mapping: &Mapping,
        namespace: Option<&str>,
        name: &str,
    ) -> Result<()> {
        let api = self.dynamic_api(mapping, namespace);
        api.delete(name, &DeleteParams::background()).await?;
        Ok(())
    }

    async fn discover(&self) -> Result<RestMapper> {
        let discovery = Discovery::new(self.client.clone()).run().await?;
        Ok(RestMapper::from_discovery(&discovery))
    }
}

/// Connects to clusters through the kube client
#[derive(Debug, Clone, Copy, Default)]
pub struct KubeConnector;

#[async_trait]
impl Connector for KubeConnector {
    type Cluster = KubeCluster;

    async fn connect(&self, kubeconfig: &[u8]) -> std::result::Result<KubeCluster, ConnectError> {
        let text = std::str::from_utf8(kubeconfig)
            .map_err(|e| ConnectError(format!("kubeconfig is not UTF-8: {}", e)))?;
        let kubeconfig = Kubeconfig::from_yaml(text)
            .map_err(|e| ConnectError(format!("failed to parse kubeconfig: {}", e)))?;
        let config = Config::from_custom_kubeconfig(kubeconfig, &KubeConfigOptions::default())
            .await
            .map_err(|e| ConnectError(format!("failed to build config: {}", e)))?;
        let client = Client::try_from(config)
            .map_err(|e| ConnectError(format!("failed to create client: {}", e)))?;
        Ok(KubeCluster::new(client))
    }
}
