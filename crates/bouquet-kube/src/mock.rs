//! In-memory cluster for testing
//!
//! [`MockCluster`] keeps objects in maps, answers with the same status codes
//! an API server would (404 on missing, 409 on duplicate create), counts
//! operations and lets tests inject failures by object name.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use bouquet_core::{AddonInstance, Seed, Shoot};
use k8s_openapi::ByteString;
use k8s_openapi::api::core::v1::{ConfigMap, Secret};
use kube::ResourceExt;
use kube::api::DynamicObject;

use crate::cluster::{ClusterApi, ConnectError, Connector};
use crate::error::{KubeError, Result};
use crate::mapper::{Mapping, RestMapper};

/// Operation that can be made to fail
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MockOp {
    CreateObject,
    DeleteObject,
    CreateInstance,
    UpdateInstance,
    Discover,
}

/// Counts of operations performed for testing assertions
#[derive(Debug, Default, Clone)]
pub struct OperationCounts {
    pub gets: usize,
    pub creates: usize,
    pub updates: usize,
    pub deletes: usize,
    pub discoveries: usize,
}

type Key = (String, String);

#[derive(Default)]
struct State {
    config_maps: HashMap<Key, ConfigMap>,
    secrets: HashMap<Key, Secret>,
    shoots: HashMap<Key, Shoot>,
    seeds: HashMap<String, Seed>,
    instances: HashMap<Key, AddonInstance>,
    /// `Kind namespace/name` -> object
    objects: BTreeMap<String, DynamicObject>,
    mapper: RestMapper,
    /// Successful object creates and deletes, in order
    journal: Vec<String>,
    failures: HashSet<(MockOp, String)>,
}

/// In-memory [`ClusterApi`]
#[derive(Clone, Default)]
pub struct MockCluster {
    state: Arc<RwLock<State>>,
    operations: Arc<RwLock<OperationCounts>>,
}

fn object_key(kind: &str, namespace: Option<&str>, name: &str) -> String {
    match namespace {
        Some(ns) => format!("{} {}/{}", kind, ns, name),
        None => format!("{} {}", kind, name),
    }
}

fn key(namespace: &str, name: &str) -> Key {
    (namespace.to_string(), name.to_string())
}

fn meta_key<K: ResourceExt>(resource: &K) -> Key {
    (resource.namespace().unwrap_or_default(), resource.name_any())
}

impl MockCluster {
    /// Create a new empty mock cluster
    pub fn new() -> Self {
        Self::default()
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, State> {
        self.state.write().unwrap()
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, State> {
        self.state.read().unwrap()
    }

    fn count(&self, f: impl FnOnce(&mut OperationCounts)) {
        f(&mut self.operations.write().unwrap());
    }

    fn check_failure(&self, op: MockOp, name: &str) -> Result<()> {
        let state = self.read();
        if state.failures.contains(&(op, name.to_string()))
            || state.failures.contains(&(op, "*".to_string()))
        {
            return Err(KubeError::InvalidObject(format!(
                "injected {:?} failure for {}",
                op, name
            )));
        }
        Ok(())
    }

    pub fn with_mapper(self, mapper: RestMapper) -> Self {
        self.write().mapper = mapper;
        self
    }

    pub fn with_config_map(self, config_map: ConfigMap) -> Self {
        let k = meta_key(&config_map);
        self.write().config_maps.insert(k, config_map);
        self
    }

    pub fn with_secret(self, secret: Secret) -> Self {
        let k = meta_key(&secret);
        self.write().secrets.insert(k, secret);
        self
    }

    /// Secret holding `data` under `key`
    pub fn with_secret_data(self, namespace: &str, name: &str, key: &str, data: &[u8]) -> Self {
        let mut secret = Secret::default();
        secret.metadata.namespace = Some(namespace.to_string());
        secret.metadata.name = Some(name.to_string());
        secret.data = Some([(key.to_string(), ByteString(data.to_vec()))].into());
        self.with_secret(secret)
    }

    pub fn with_shoot(self, shoot: Shoot) -> Self {
        let k = meta_key(&shoot);
        self.write().shoots.insert(k, shoot);
        self
    }

    pub fn with_seed(self, seed: Seed) -> Self {
        let name = seed.name_any();
        self.write().seeds.insert(name, seed);
        self
    }

    pub fn with_instance(self, instance: AddonInstance) -> Self {
        let k = meta_key(&instance);
        self.write().instances.insert(k, instance);
        self
    }

    /// Make `op` fail for the object called `name` (`*` for every object)
    pub fn fail(&self, op: MockOp, name: &str) {
        self.write().failures.insert((op, name.to_string()));
    }

    /// Stop failing `op` for `name`
    pub fn heal(&self, op: MockOp, name: &str) {
        self.write().failures.remove(&(op, name.to_string()));
    }

    /// Get operation counts for assertions
    pub fn operation_counts(&self) -> OperationCounts {
        self.operations.read().unwrap().clone()
    }

    /// Reset operation counts
    pub fn reset_counts(&self) {
        *self.operations.write().unwrap() = OperationCounts::default();
    }

    /// Keys (`Kind namespace/name`) of the objects currently stored
    pub fn object_keys(&self) -> Vec<String> {
        self.read().objects.keys().cloned().collect()
    }

    /// Stored object by key, e.g. `ConfigMap addons/settings`
    pub fn object(&self, key: &str) -> Option<DynamicObject> {
        self.read().objects.get(key).cloned()
    }

    /// Successful creates and deletes so far, e.g. `create Namespace addons`
    pub fn journal(&self) -> Vec<String> {
        self.read().journal.clone()
    }

    pub fn instance(&self, namespace: &str, name: &str) -> Option<AddonInstance> {
        self.read().instances.get(&key(namespace, name)).cloned()
    }

    pub fn instances(&self) -> Vec<AddonInstance> {
        self.read().instances.values().cloned().collect()
    }
}

#[async_trait]
impl ClusterApi for MockCluster {
    async fn get_config_map(&self, namespace: &str, name: &str) -> Result<ConfigMap> {
        self.count(|c| c.gets += 1);
        self.read()
            .config_maps
            .get(&key(namespace, name))
            .cloned()
            .ok_or_else(|| KubeError::not_found("configmaps", name))
    }

    async fn get_secret(&self, namespace: &str, name: &str) -> Result<Secret> {
        self.count(|c| c.gets += 1);
        self.read()
            .secrets
            .get(&key(namespace, name))
            .cloned()
            .ok_or_else(|| KubeError::not_found("secrets", name))
    }

    async fn get_shoot(&self, namespace: &str, name: &str) -> Result<Shoot> {
        self.count(|c| c.gets += 1);
        self.read()
            .shoots
            .get(&key(namespace, name))
            .cloned()
            .ok_or_else(|| KubeError::not_found("shoots.garden.sapcloud.io", name))
    }

    async fn get_seed(&self, name: &str) -> Result<Seed> {
        self.count(|c| c.gets += 1);
        self.read()
            .seeds
            .get(name)
            .cloned()
            .ok_or_else(|| KubeError::not_found("seeds.garden.sapcloud.io", name))
    }

    async fn create_instance(&self, instance: &AddonInstance) -> Result<AddonInstance> {
        self.count(|c| c.creates += 1);
        let name = instance.name_any();
        self.check_failure(MockOp::CreateInstance, &name)?;

        let mut state = self.write();
        let k = meta_key(instance);
        if state.instances.contains_key(&k) {
            return Err(KubeError::already_exists("addoninstances.garden.sapcloud.io", &name));
        }
        state.instances.insert(k, instance.clone());
        Ok(instance.clone())
    }

    async fn update_instance(&self, instance: &AddonInstance) -> Result<AddonInstance> {
        self.count(|c| c.updates += 1);
        let name = instance.name_any();
        self.check_failure(MockOp::UpdateInstance, &name)?;

        let mut state = self.write();
        let k = meta_key(instance);
        if !state.instances.contains_key(&k) {
            return Err(KubeError::not_found("addoninstances.garden.sapcloud.io", &name));
        }
        // A deleting object with no finalizers left is gone
        if instance.metadata.deletion_timestamp.is_some() && instance.finalizers().is_empty() {
            state.instances.remove(&k);
        } else {
            state.instances.insert(k, instance.clone());
        }
        Ok(instance.clone())
    }

    async fn create_object(&self, mapping: &Mapping, object: &DynamicObject) -> Result<()> {
        self.count(|c| c.creates += 1);
        let name = object.name_any();
        self.check_failure(MockOp::CreateObject, &name)?;

        let namespace = object.metadata.namespace.as_deref().filter(|_| mapping.namespaced);
        let k = object_key(&mapping.resource.kind, namespace, &name);

        let mut state = self.write();
        if state.objects.contains_key(&k) {
            return Err(KubeError::already_exists(&mapping.resource.plural, &name));
        }
        state.objects.insert(k.clone(), object.clone());
        state.journal.push(format!("create {}", k));
        Ok(())
    }

    async fn delete_object(
        &self,
        mapping: &Mapping,
        namespace: Option<&str>,
        name: &str,
    ) -> Result<()> {
        self.count(|c| c.deletes += 1);
        self.check_failure(MockOp::DeleteObject, name)?;

        let namespace = namespace.filter(|_| mapping.namespaced);
        let k = object_key(&mapping.resource.kind, namespace, name);

        let mut state = self.write();
        if state.objects.remove(&k).is_none() {
            return Err(KubeError::not_found(&mapping.resource.plural, name));
        }
        state.journal.push(format!("delete {}", k));
        Ok(())
    }

    async fn discover(&self) -> Result<RestMapper> {
        self.count(|c| c.discoveries += 1);
        self.check_failure(MockOp::Discover, "*")?;
        Ok(self.read().mapper.clone())
    }
}

/// [`Connector`] handing out registered mock clusters by kubeconfig content
#[derive(Clone, Default)]
pub struct MockConnector {
    clusters: Arc<RwLock<HashMap<Vec<u8>, MockCluster>>>,
    connects: Arc<RwLock<usize>>,
}

impl MockConnector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Serve `cluster` for this exact kubeconfig
    pub fn register(&self, kubeconfig: &[u8], cluster: MockCluster) {
        self.clusters
            .write()
            .unwrap()
            .insert(kubeconfig.to_vec(), cluster);
    }

    pub fn connects(&self) -> usize {
        *self.connects.read().unwrap()
    }
}

#[async_trait]
impl Connector for MockConnector {
    type Cluster = MockCluster;

    async fn connect(&self, kubeconfig: &[u8]) -> std::result::Result<MockCluster, ConnectError> {
        *self.connects.write().unwrap() += 1;
        self.clusters
            .read()
            .unwrap()
            .get(kubeconfig)
            .cloned()
            .ok_or_else(|| ConnectError("no cluster registered for kubeconfig".to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kube::discovery::ApiResource;
    use kube::core::GroupVersionKind;

    fn config_map_mapping() -> Mapping {
        Mapping {
            resource: ApiResource::from_gvk(&GroupVersionKind::gvk("", "v1", "ConfigMap")),
            namespaced: true,
        }
    }

    fn object(name: &str) -> DynamicObject {
        let resource = ApiResource::from_gvk(&GroupVersionKind::gvk("", "v1", "ConfigMap"));
        DynamicObject::new(name, &resource).within("addons")
    }

    #[tokio::test]
    async fn test_create_and_delete_semantics() {
        let cluster = MockCluster::new();
        let mapping = config_map_mapping();

        cluster.create_object(&mapping, &object("a")).await.unwrap();
        let err = cluster.create_object(&mapping, &object("a")).await.unwrap_err();
        assert!(err.is_already_exists());
        assert_eq!(cluster.object_keys(), vec!["ConfigMap addons/a"]);

        cluster.delete_object(&mapping, Some("addons"), "a").await.unwrap();
        let err = cluster
            .delete_object(&mapping, Some("addons"), "a")
            .await
            .unwrap_err();
        assert!(err.is_not_found());

        assert_eq!(
            cluster.journal(),
            vec!["create ConfigMap addons/a", "delete ConfigMap addons/a"]
        );
        let counts = cluster.operation_counts();
        assert_eq!(counts.creates, 2);
        assert_eq!(counts.deletes, 2);
    }

    #[tokio::test]
    async fn test_injected_failures() {
        let cluster = MockCluster::new();
        let mapping = config_map_mapping();

        cluster.fail(MockOp::CreateObject, "b");
        assert!(cluster.create_object(&mapping, &object("b")).await.is_err());
        assert!(cluster.create_object(&mapping, &object("c")).await.is_ok());

        cluster.heal(MockOp::CreateObject, "b");
        assert!(cluster.create_object(&mapping, &object("b")).await.is_ok());
    }

    #[tokio::test]
    async fn test_connector_shares_state() {
        let connector = MockConnector::new();
        let seed = MockCluster::new().with_secret_data("ns", "s", "kubeconfig", b"x");
        connector.register(b"seed", seed.clone());

        let connected = connector.connect(b"seed").await.unwrap();
        assert!(connected.get_secret("ns", "s").await.is_ok());
        assert_eq!(seed.operation_counts().gets, 1);
        assert!(connector.connect(b"other").await.is_err());
        assert_eq!(connector.connects(), 2);
    }
}
