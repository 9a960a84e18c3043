//! Shoot reconciliation
//!
//! A shoot lists the addons it wants in an annotation holding a JSON array of
//! base names. For each one the newest manifest, from any namespace, is pinned
//! into an AddonInstance named `<shoot>-<addon>` next to the shoot. Instances
//! are only ever created here; removing an addon from the annotation does not
//! delete its instance, deleting the shoot does (through the owner reference).

use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use bouquet_core::{
    AddonInstance, AddonInstanceSpec, AddonManifest, AggregateError, CoreError, ManifestRef,
    Shoot, Target, Values, VersionRange, select,
};
use bouquet_kube::ClusterApi;
use kube::{Resource, ResourceExt};
use kube::runtime::reflector::Store;
use tracing::{debug, info};

use crate::error::{ControllerError, Result};
use crate::runtime::{ObjectKey, Reconcile};

/// Whether a shoot asks for addons at all
pub fn wants_addons(shoot: &Shoot) -> bool {
    shoot.addon_annotation().is_some()
}

/// Addon names from the annotation; every name must appear once
pub fn parse_addons(shoot: &ObjectKey, annotation: &str) -> Result<Vec<String>> {
    let addons: Vec<String> =
        serde_json::from_str(annotation).map_err(|source| ControllerError::Parse {
            shoot: shoot.to_string(),
            source,
        })?;

    let mut seen = HashSet::new();
    let mut duplicates: Vec<String> = Vec::new();
    for addon in &addons {
        if !seen.insert(addon.as_str()) && !duplicates.contains(addon) {
            duplicates.push(addon.clone());
        }
    }
    if !duplicates.is_empty() {
        return Err(ControllerError::DuplicateAddons {
            shoot: shoot.to_string(),
            addons: duplicates,
        });
    }
    Ok(addons)
}

/// AddonInstance binding `manifest` to `shoot`
pub fn instance_for(shoot: &Shoot, manifest: &AddonManifest) -> Result<AddonInstance> {
    let (base, version) = manifest.name_and_version().ok_or_else(|| {
        CoreError::ManifestNotFound {
            name: manifest.name_any(),
            range: VersionRange::any().to_string(),
        }
    })?;
    let shoot_name = shoot.name_any();

    let mut instance = AddonInstance::new(
        &format!("{}-{}", shoot_name, base),
        AddonInstanceSpec {
            target: Target::shoot(shoot_name.as_str()),
            manifest: ManifestRef {
                namespace: manifest.namespace().unwrap_or_default(),
                name: base,
                version: VersionRange::exact(&version).to_string(),
            },
            values: Values::new(),
        },
    );
    instance.metadata.namespace = shoot.namespace();
    instance.metadata.owner_references = shoot.controller_owner_ref(&()).map(|owner| vec![owner]);
    instance.add_finalizer();
    Ok(instance)
}

/// Creates the AddonInstances requested by annotated shoots
pub struct ShootReconciler<A: ?Sized> {
    cluster: Arc<A>,
    manifests: Store<AddonManifest>,
}

impl<A: ClusterApi + ?Sized + 'static> ShootReconciler<A> {
    pub fn new(cluster: Arc<A>, manifests: Store<AddonManifest>) -> Self {
        Self { cluster, manifests }
    }

    async fn ensure_instance(
        &self,
        shoot: &Shoot,
        addon: &str,
        manifests: &[Arc<AddonManifest>],
    ) -> Result<()> {
        let manifest = select(manifests, addon, &VersionRange::any())?;
        let instance = instance_for(shoot, manifest)?;

        match self.cluster.create_instance(&instance).await {
            Ok(_) => {
                info!(
                    instance = %instance.name_any(),
                    manifest = %manifest.name_any(),
                    "instance created"
                );
                Ok(())
            }
            Err(e) if e.is_already_exists() => {
                debug!(instance = %instance.name_any(), "instance already exists");
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }
}

#[async_trait]
impl<A: ClusterApi + ?Sized + 'static> Reconcile for ShootReconciler<A> {
    type Object = Shoot;

    fn name(&self) -> &str {
        "shoot"
    }

    async fn sync(&self, shoot: &Shoot) -> Result<()> {
        let key = ObjectKey::of(shoot);
        if shoot.is_deleting() {
            debug!(shoot = %key, "shoot is being deleted, skipping");
            return Ok(());
        }
        let Some(annotation) = shoot.addon_annotation() else {
            return Ok(());
        };

        let addons = parse_addons(&key, annotation)?;
        let manifests = self.manifests.state();

        let mut errors = Vec::new();
        for addon in &addons {
            if let Err(e) = self.ensure_instance(shoot, addon, &manifests).await {
                errors.push(e);
            }
        }
        AggregateError::check(errors)?;
        Ok(())
    }
}
