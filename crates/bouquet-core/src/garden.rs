//! Gardener cluster resources, reduced to the fields Bouquet reads
//!
//! A `Shoot` is a managed cluster; a `Seed` hosts the control planes of its
//! shoots. Both are owned by Gardener, so their schemas are not generated here.

use std::collections::BTreeMap;

use kube::CustomResource;
use serde::{Deserialize, Serialize};

use crate::types::ADDON_ANNOTATION;

#[derive(CustomResource, Debug, Clone, Default, Serialize, Deserialize)]
#[kube(
    group = "garden.sapcloud.io",
    version = "v1beta1",
    kind = "Shoot",
    plural = "shoots",
    namespaced,
    status = "ShootStatus",
    schema = "disabled"
)]
pub struct ShootSpec {
    #[serde(flatten)]
    pub other: BTreeMap<String, serde_json::Value>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ShootStatus {
    /// Seed hosting this shoot's control plane
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub seed: Option<String>,

    #[serde(
        rename = "technicalID",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub technical_id: Option<String>,
}

impl Shoot {
    pub fn is_deleting(&self) -> bool {
        self.metadata.deletion_timestamp.is_some()
    }

    /// Raw addon annotation, if the shoot asks for addons at all
    pub fn addon_annotation(&self) -> Option<&str> {
        self.metadata
            .annotations
            .as_ref()?
            .get(ADDON_ANNOTATION)
            .map(String::as_str)
    }

    pub fn seed_name(&self) -> Option<&str> {
        self.status
            .as_ref()?
            .seed
            .as_deref()
            .filter(|s| !s.is_empty())
    }

    /// Namespace of the shoot's control plane on its seed
    ///
    /// Uses the recorded technical id when present. Otherwise computed as
    /// `shoot-<project>-<name>`, the project defaulting to the shoot's
    /// namespace without its `garden-` prefix.
    pub fn technical_id(&self, project: Option<&str>) -> String {
        if let Some(id) = self
            .status
            .as_ref()
            .and_then(|s| s.technical_id.as_deref())
            .filter(|s| !s.is_empty())
        {
            return id.to_string();
        }

        let namespace = self.metadata.namespace.as_deref().unwrap_or_default();
        let project = project.unwrap_or_else(|| {
            namespace.strip_prefix("garden-").unwrap_or(namespace)
        });
        let name = self.metadata.name.as_deref().unwrap_or_default();
        format!("shoot-{}-{}", project, name)
    }
}

#[derive(CustomResource, Debug, Clone, Default, Serialize, Deserialize)]
#[kube(
    group = "garden.sapcloud.io",
    version = "v1beta1",
    kind = "Seed",
    plural = "seeds",
    schema = "disabled"
)]
#[serde(rename_all = "camelCase")]
pub struct SeedSpec {
    /// Secret holding the kubeconfig of the seed cluster
    pub secret_ref: SecretRef,

    #[serde(flatten)]
    pub other: BTreeMap<String, serde_json::Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SecretRef {
    pub name: String,
    pub namespace: String,
}
