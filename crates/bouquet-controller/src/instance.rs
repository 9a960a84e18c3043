//! AddonInstance reconciliation
//!
//! An instance moves through four states, all derived from the object:
//!
//! - **Pending**: no finalizer yet. The first sync adds it and persists the
//!   instance before touching any target.
//! - **Active**: finalizer present. Every sync renders the selected manifest
//!   and creates the objects in install order; existing objects are left
//!   alone.
//! - **Deleting**: deletion requested, finalizer present. Objects are deleted
//!   in uninstall order; only when every delete succeeded (or found nothing)
//!   is the finalizer removed.
//! - **Gone**: the API server drops the instance once the finalizer is off.
//!
//! The manifest reference is re-resolved on every sync, so publishing a newer
//! matching manifest changes what the next sync renders.

use async_trait::async_trait;
use bouquet_core::{AddonInstance, AddonManifest, Values, find_by_ref};
use bouquet_engine::{
    AddonInfo, Engine, FileBundle, InstanceInfo, RenderContext, RenderSource, TemplateBundle,
};
use bouquet_kube::{
    ClusterApi, Connector, SortOrder, TargetResolver, create_objects, decode_files,
    delete_objects, sort_objects,
};
use kube::ResourceExt;
use kube::api::DynamicObject;
use kube::runtime::reflector::Store;
use tracing::{debug, info};

use crate::error::{ControllerError, Result};
use crate::runtime::{ObjectKey, Reconcile};

/// Renders, applies and removes the objects of AddonInstances
pub struct InstanceReconciler<C: Connector> {
    manifests: Store<AddonManifest>,
    resolver: TargetResolver<C>,
    engine: Engine,
}

impl<C: Connector> InstanceReconciler<C> {
    pub fn new(manifests: Store<AddonManifest>, resolver: TargetResolver<C>) -> Self {
        Self {
            manifests,
            resolver,
            engine: Engine::default(),
        }
    }

    /// Render with this engine instead of the lenient default
    pub fn with_engine(mut self, engine: Engine) -> Self {
        self.engine = engine;
        self
    }

    fn local(&self) -> &C::Cluster {
        self.resolver.local()
    }

    async fn install(&self, key: &ObjectKey, instance: &AddonInstance) -> Result<()> {
        let mut objects = self.render(instance).await?;
        sort_objects(&mut objects, SortOrder::Install);

        let namespace = instance.namespace().unwrap_or_default();
        let target = self
            .resolver
            .resolve(&namespace, &instance.spec.target)
            .await?;
        let summary = create_objects(target.cluster.as_ref(), &target.mapper, &objects).await?;

        info!(
            instance = %key,
            created = summary.changed.len(),
            existing = summary.unchanged.len(),
            "instance applied"
        );
        Ok(())
    }

    async fn uninstall(&self, key: &ObjectKey, mut instance: AddonInstance) -> Result<()> {
        let mut objects = self.render(&instance).await?;
        sort_objects(&mut objects, SortOrder::Uninstall);

        let namespace = instance.namespace().unwrap_or_default();
        let target = self
            .resolver
            .resolve(&namespace, &instance.spec.target)
            .await?;
        let summary = delete_objects(target.cluster.as_ref(), &target.mapper, &objects).await?;

        instance.remove_finalizer();
        match self.local().update_instance(&instance).await {
            Ok(_) => {}
            Err(e) if e.is_not_found() => debug!(instance = %key, "instance already gone"),
            Err(e) => return Err(e.into()),
        }

        info!(
            instance = %key,
            deleted = summary.changed.len(),
            missing = summary.unchanged.len(),
            "instance removed"
        );
        Ok(())
    }

    /// Objects the instance stands for, in document order
    async fn render(&self, instance: &AddonInstance) -> Result<Vec<DynamicObject>> {
        let manifests = self.manifests.state();
        let manifest = find_by_ref(&manifests, &instance.spec.manifest)?;
        debug!(
            instance = %instance.name_any(),
            manifest = %manifest.name_any(),
            "manifest selected"
        );

        let source = self.load_source(manifest).await?;
        let context = render_context(manifest, instance);
        let files = source.render_with(&self.engine, &context)?;
        Ok(decode_files(&files)?)
    }

    async fn load_source(&self, manifest: &AddonManifest) -> Result<RenderSource> {
        let namespace = manifest.namespace().unwrap_or_default();
        let spec = &manifest.spec;

        let (config_map, template) = match (&spec.config_map, &spec.config_map_template) {
            (Some(name), _) if !name.is_empty() => (name, false),
            (_, Some(name)) if !name.is_empty() => (name, true),
            _ => {
                return Err(ControllerError::NoSource {
                    namespace,
                    name: manifest.name_any(),
                });
            }
        };

        let data = self
            .local()
            .get_config_map(&namespace, config_map)
            .await?
            .data
            .unwrap_or_default();

        Ok(if template {
            RenderSource::Template(TemplateBundle::from_data(data))
        } else {
            RenderSource::Plain(FileBundle::new(data))
        })
    }
}

fn render_context(manifest: &AddonManifest, instance: &AddonInstance) -> RenderContext {
    let (name, version) = match manifest.name_and_version() {
        Some((name, version)) => (name, version.to_string()),
        None => (manifest.name_any(), String::new()),
    };

    RenderContext {
        values: Values::coalesce(&manifest.spec.values, &instance.spec.values),
        addon: AddonInfo { name, version },
        instance: InstanceInfo {
            name: instance.name_any(),
            namespace: instance.namespace().unwrap_or_default(),
            target: instance.spec.target.shoot_name().map(str::to_string),
        },
    }
}

#[async_trait]
impl<C: Connector> Reconcile for InstanceReconciler<C> {
    type Object = AddonInstance;

    fn name(&self) -> &str {
        "addon-instance"
    }

    async fn sync(&self, cached: &AddonInstance) -> Result<()> {
        let key = &ObjectKey::of(cached);
        let mut instance = cached.clone();

        if instance.is_deleting() {
            if !instance.has_finalizer() {
                debug!(instance = %key, "deleting without finalizer, nothing to clean up");
                return Ok(());
            }
            return self.uninstall(key, instance).await;
        }

        if instance.add_finalizer() {
            instance = self.local().update_instance(&instance).await?;
            debug!(instance = %key, "finalizer added");
        }
        self.install(key, &instance).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;
    use std::sync::Arc;

    use bouquet_core::{
        AddonInstanceSpec, AddonManifestSpec, FINALIZER, ManifestRef, SecretRef, Seed, SeedSpec,
        Shoot, ShootSpec, ShootStatus, Target,
    };
    use bouquet_kube::{
        GARDENER_SECRET, KUBECONFIG_KEY, KubeError, MockCluster, MockConnector, MockOp,
        RestMapper, SharedRestMapper,
    };
    use k8s_openapi::api::core::v1::ConfigMap;
    use kube::Resource;
    use kube::core::GroupVersionKind;
    use kube::discovery::ApiResource;
    use kube::runtime::reflector;
    use kube::runtime::watcher::Event;
    use serde_json::json;

    const NAMESPACE_YAML: &str = "apiVersion: v1\nkind: Namespace\nmetadata:\n  name: addons\n";

    const DEPLOYMENT_YAML: &str = r#"apiVersion: apps/v1
kind: Deployment
metadata:
  name: nginx
  namespace: addons
"#;

    fn store<K>(objects: Vec<K>) -> Store<K>
    where
        K: Resource + Clone + 'static,
        K::DynamicType: Default + Eq + std::hash::Hash + Clone,
    {
        let (reader, mut writer) = reflector::store();
        for object in objects {
            writer.apply_watcher_event(&Event::Apply(object));
        }
        reader
    }

    fn mapper() -> RestMapper {
        RestMapper::new()
            .with(ApiResource::from_gvk(&GroupVersionKind::gvk("", "v1", "Namespace")), false)
            .with(ApiResource::from_gvk(&GroupVersionKind::gvk("", "v1", "ConfigMap")), true)
            .with(ApiResource::from_gvk(&GroupVersionKind::gvk("apps", "v1", "Deployment")), true)
    }

    fn config_map(name: &str, files: &[(&str, &str)]) -> ConfigMap {
        let mut cm = ConfigMap::default();
        cm.metadata.namespace = Some("garden".to_string());
        cm.metadata.name = Some(name.to_string());
        cm.data = Some(
            files
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect::<BTreeMap<_, _>>(),
        );
        cm
    }

    fn manifest(name: &str, spec: AddonManifestSpec) -> AddonManifest {
        let mut manifest = AddonManifest::new(name, spec);
        manifest.metadata.namespace = Some("garden".to_string());
        manifest
    }

    fn plain(config_map: &str) -> AddonManifestSpec {
        AddonManifestSpec {
            config_map: Some(config_map.to_string()),
            ..Default::default()
        }
    }

    fn instance(version: &str, target: Target) -> AddonInstance {
        let mut instance = AddonInstance::new(
            "dev-nginx",
            AddonInstanceSpec {
                target,
                manifest: ManifestRef {
                    namespace: "garden".to_string(),
                    name: "nginx".to_string(),
                    version: version.to_string(),
                },
                values: Values::new(),
            },
        );
        instance.metadata.namespace = Some("garden-dev".to_string());
        instance
    }

    fn deleting(mut instance: AddonInstance, finalizer: bool) -> AddonInstance {
        instance.metadata.deletion_timestamp =
            serde_json::from_value(json!("2024-05-01T10:00:00Z")).unwrap();
        if finalizer {
            instance.add_finalizer();
        }
        instance
    }

    /// Local cluster serving both nginx versions as plain bundles
    fn local_cluster() -> MockCluster {
        MockCluster::new()
            .with_mapper(mapper())
            .with_config_map(config_map("nginx-old", &[("all.yaml", NAMESPACE_YAML)]))
            .with_config_map(config_map(
                "nginx-new",
                &[("a.yaml", DEPLOYMENT_YAML), ("b.yaml", NAMESPACE_YAML)],
            ))
    }

    fn manifests() -> Vec<AddonManifest> {
        vec![
            manifest("nginx-1.0.0", plain("nginx-old")),
            manifest("nginx-1.2.0", plain("nginx-new")),
            manifest("nginx-2.0.0", plain("missing")),
        ]
    }

    fn reconciler(
        local: &MockCluster,
        instances: &[AddonInstance],
        manifests: Vec<AddonManifest>,
    ) -> InstanceReconciler<MockConnector> {
        let resolver = TargetResolver::new(
            Arc::new(local.clone()),
            SharedRestMapper::new(mapper()),
            MockConnector::new(),
        );
        // clones share state, so this seeds `local` itself
        for instance in instances {
            let _ = local.clone().with_instance(instance.clone());
        }
        InstanceReconciler::new(store(manifests), resolver)
    }

    #[tokio::test]
    async fn test_install_adds_finalizer_then_creates_in_order() {
        let local = local_cluster();
        let pending = instance(">=1.0.0 <2.0.0", Target::local());
        let r = reconciler(&local, &[pending.clone()], manifests());

        r.sync(&pending).await.unwrap();

        let stored = local.instance("garden-dev", "dev-nginx").unwrap();
        assert_eq!(stored.finalizers(), &[FINALIZER.to_string()]);
        // nginx-1.2.0 was picked, Namespace goes first despite file order
        assert_eq!(
            local.journal(),
            vec!["create Namespace addons", "create Deployment addons/nginx"]
        );
    }

    #[tokio::test]
    async fn test_install_twice_is_idempotent() {
        let local = local_cluster();
        let mut active = instance(">=1.0.0 <2.0.0", Target::local());
        active.add_finalizer();
        let r = reconciler(&local, &[active.clone()], manifests());

        r.sync(&active).await.unwrap();
        r.sync(&active).await.unwrap();

        assert_eq!(
            local.object_keys(),
            vec!["Deployment addons/nginx", "Namespace addons"]
        );
        assert_eq!(local.operation_counts().updates, 0);
    }

    #[tokio::test]
    async fn test_template_source_sees_coalesced_values() {
        let template = r#"apiVersion: v1
kind: ConfigMap
metadata:
  name: {{ instance.name }}
  namespace: {{ values.namespace }}
data:
  replicas: "{{ values.replicas }}"
  addon: {{ addon.name }}-{{ addon.version }}
  target: {{ instance.target or "local" }}
"#;
        let local = MockCluster::new()
            .with_mapper(mapper())
            .with_config_map(config_map("nginx-tmpl", &[("cm.yaml.tmpl", template)]));

        let spec = AddonManifestSpec {
            config_map_template: Some("nginx-tmpl".to_string()),
            values: Values(json!({"namespace": "addons", "replicas": 1})),
            ..Default::default()
        };
        let mut active = instance("=1.0.0", Target::local());
        active.spec.values = Values(json!({"replicas": 3}));
        active.add_finalizer();

        let r = reconciler(&local, &[active.clone()], vec![manifest("nginx-1.0.0", spec)]);
        r.sync(&active).await.unwrap();

        let object = local.object("ConfigMap addons/dev-nginx").unwrap();
        assert_eq!(object.data["data"]["replicas"], "3");
        assert_eq!(object.data["data"]["addon"], "nginx-1.0.0");
        assert_eq!(object.data["data"]["target"], "local");
    }

    #[tokio::test]
    async fn test_manifest_without_source() {
        let local = local_cluster();
        let pending = instance(">=1.0.0", Target::local());
        let r = reconciler(
            &local,
            &[pending.clone()],
            vec![manifest("nginx-1.0.0", AddonManifestSpec::default())],
        );

        let err = r.sync(&pending).await.unwrap_err();
        insta::assert_snapshot!(err.to_string(), @"manifest garden/nginx-1.0.0 has no configMap or configMapTemplate");
        assert!(local.object_keys().is_empty());
    }

    #[tokio::test]
    async fn test_unresolved_manifest_fails_sync() {
        let local = local_cluster();
        let pending = instance(">=3.0.0", Target::local());
        let r = reconciler(&local, &[pending.clone()], manifests());

        let err = r.sync(&pending).await.unwrap_err();
        assert!(err.is_not_found());
        assert!(local.object_keys().is_empty());
    }

    #[tokio::test]
    async fn test_deleting_without_finalizer_is_noop() {
        let local = local_cluster();
        let gone = deleting(instance(">=1.0.0", Target::local()), false);
        // no manifests at all: rendering would fail
        let r = reconciler(&local, &[gone.clone()], vec![]);

        r.sync(&gone).await.unwrap();
        let counts = local.operation_counts();
        assert_eq!(counts.gets + counts.deletes + counts.updates, 0);
    }

    #[tokio::test]
    async fn test_uninstall_deletes_in_reverse_then_releases() {
        let local = local_cluster();
        let active = instance(">=1.0.0 <2.0.0", Target::local());
        reconciler(&local, &[active.clone()], manifests())
            .sync(&active)
            .await
            .unwrap();

        let removed = deleting(active, true);
        reconciler(&local, &[removed.clone()], manifests())
            .sync(&removed)
            .await
            .unwrap();

        assert!(local.object_keys().is_empty());
        assert_eq!(
            local.journal()[2..],
            ["delete Deployment addons/nginx", "delete Namespace addons"]
        );
        assert!(local.instance("garden-dev", "dev-nginx").is_none());
    }

    #[tokio::test]
    async fn test_finalizer_kept_until_every_delete_succeeds() {
        let local = local_cluster();
        let active = instance(">=1.0.0 <2.0.0", Target::local());
        reconciler(&local, &[active.clone()], manifests())
            .sync(&active)
            .await
            .unwrap();

        local.fail(MockOp::DeleteObject, "nginx");
        let removed = deleting(active, true);
        let r = reconciler(&local, &[removed.clone()], manifests());

        let err = r.sync(&removed).await.unwrap_err();
        assert!(matches!(err, ControllerError::Kube(KubeError::Aggregate(_))));
        let stored = local.instance("garden-dev", "dev-nginx").unwrap();
        assert!(stored.has_finalizer());
        // the other delete still went through
        assert_eq!(local.object_keys(), vec!["Deployment addons/nginx"]);

        local.heal(MockOp::DeleteObject, "nginx");
        r.sync(&removed).await.unwrap();
        assert!(local.instance("garden-dev", "dev-nginx").is_none());
    }

    #[tokio::test]
    async fn test_uninstall_of_missing_objects_releases() {
        let local = local_cluster();
        let removed = deleting(instance("=1.2.0", Target::local()), true);
        let r = reconciler(&local, &[removed.clone()], manifests());

        r.sync(&removed).await.unwrap();
        assert!(local.instance("garden-dev", "dev-nginx").is_none());
        assert!(local.journal().is_empty());
    }

    #[tokio::test]
    async fn test_shoot_target_receives_objects() {
        let shoot_cluster = MockCluster::new().with_mapper(mapper());
        let seed_cluster = MockCluster::new().with_secret_data(
            "shoot-dev-web",
            GARDENER_SECRET,
            KUBECONFIG_KEY,
            b"shoot",
        );
        let connector = MockConnector::new();
        connector.register(b"seed", seed_cluster);
        connector.register(b"shoot", shoot_cluster.clone());

        let mut web = Shoot::new("web", ShootSpec::default());
        web.metadata.namespace = Some("garden-dev".to_string());
        web.status = Some(ShootStatus {
            seed: Some("aws".to_string()),
            technical_id: None,
        });
        let seed = Seed::new(
            "aws",
            SeedSpec {
                secret_ref: SecretRef {
                    name: "seed-aws".to_string(),
                    namespace: "garden".to_string(),
                },
                ..Default::default()
            },
        );
        let local = local_cluster()
            .with_shoot(web)
            .with_seed(seed)
            .with_secret_data("garden", "seed-aws", KUBECONFIG_KEY, b"seed");

        let mut active = instance("=1.2.0", Target::shoot("web"));
        active.add_finalizer();
        let resolver = TargetResolver::new(
            Arc::new(local.clone()),
            SharedRestMapper::new(mapper()),
            connector,
        );
        let r = InstanceReconciler::new(store(manifests()), resolver);

        r.sync(&active).await.unwrap();

        assert!(local.object_keys().is_empty());
        assert_eq!(
            shoot_cluster.object_keys(),
            vec!["Deployment addons/nginx", "Namespace addons"]
        );
    }
}
