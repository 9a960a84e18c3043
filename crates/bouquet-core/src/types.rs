//! Addon custom resources
//!
//! `AddonManifest` is a reusable, versioned addon definition. `AddonInstance`
//! binds one manifest version to one target cluster with concrete values.

use std::collections::BTreeMap;

use kube::{CustomResource, ResourceExt};
use once_cell::sync::Lazy;
use regex::Regex;
use schemars::JsonSchema;
use schemars::r#gen::SchemaGenerator;
use schemars::schema::{ArrayValidation, InstanceType, Schema, SchemaObject};
use semver::Version;
use serde::{Deserialize, Serialize};

use crate::values::Values;

/// Finalizer marking "cleanup owed" on an AddonInstance
pub const FINALIZER: &str = "bouquet";

/// Shoot annotation listing the desired addon base names as a JSON array
pub const ADDON_ANNOTATION: &str = "gardenextensions.sapcloud.io/addons";

static VERSIONED_NAME: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(.*)-(\d+\.\d+\.\d+(-.*)*)$").expect("versioned name pattern is valid")
});

/// Split `"<name>-<semver>"` into its base name and version
///
/// Returns `None` when the name has no version suffix at all. When the suffix
/// looks like a version but does not parse, the base name is returned alone.
pub fn parse_versioned_name(name: &str) -> Option<(&str, Option<Version>)> {
    let captures = VERSIONED_NAME.captures(name)?;
    let base = captures.get(1)?.as_str();
    let version = captures
        .get(2)
        .and_then(|m| Version::parse(m.as_str()).ok());
    Some((base, version))
}

/// Addon definition that can be instantiated
#[derive(CustomResource, Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
#[kube(
    group = "garden.sapcloud.io",
    version = "v1alpha1",
    kind = "AddonManifest",
    plural = "addonmanifests",
    namespaced
)]
#[serde(rename_all = "camelCase")]
pub struct AddonManifestSpec {
    /// ConfigMap holding plain multi-document YAML files
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub config_map: Option<String>,

    /// ConfigMap holding a template bundle (`*.tmpl` templates, `_*` helpers)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub config_map_template: Option<String>,

    /// Default parameter values
    #[serde(default, skip_serializing_if = "Values::is_empty")]
    #[schemars(schema_with = "preserve_unknown_fields")]
    pub values: Values,

    /// Declared dependencies (addon name -> version range). Never resolved.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub dependencies: BTreeMap<String, String>,
}

impl AddonManifest {
    /// Base name and version encoded in the resource name
    pub fn name_and_version(&self) -> Option<(String, Version)> {
        let name = self.metadata.name.as_deref()?;
        match parse_versioned_name(name)? {
            (base, Some(version)) => Some((base.to_string(), version)),
            (_, None) => None,
        }
    }

    /// Base name, even if the version suffix is malformed
    pub fn base_name(&self) -> Option<String> {
        let name = self.metadata.name.as_deref()?;
        parse_versioned_name(name).map(|(base, _)| base.to_string())
    }
}

/// An instantiated (templated and bound) AddonManifest
#[derive(CustomResource, Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
#[kube(
    group = "garden.sapcloud.io",
    version = "v1alpha1",
    kind = "AddonInstance",
    plural = "addoninstances",
    namespaced,
    status = "AddonInstanceStatus"
)]
#[serde(rename_all = "camelCase")]
pub struct AddonInstanceSpec {
    #[serde(default)]
    pub target: Target,

    pub manifest: ManifestRef,

    #[serde(default, skip_serializing_if = "Values::is_empty")]
    #[schemars(schema_with = "preserve_unknown_fields")]
    pub values: Values,
}

/// Advisory cache of the last applied objects
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
pub struct AddonInstanceStatus {
    #[serde(default)]
    #[schemars(schema_with = "preserve_unknown_list")]
    pub objects: Vec<serde_json::Value>,
}

/// Manifest query: namespace, base name and version range
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct ManifestRef {
    pub namespace: String,
    pub name: String,
    pub version: String,
}

/// Destination cluster of an instance; no shoot means the local cluster
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct Target {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub shoot: Option<String>,
}

impl Target {
    /// Local target
    pub fn local() -> Self {
        Self::default()
    }

    /// Remote target reached through the named shoot
    pub fn shoot(name: impl Into<String>) -> Self {
        Self {
            shoot: Some(name.into()),
        }
    }

    /// Name of the remote shoot, if any
    pub fn shoot_name(&self) -> Option<&str> {
        self.shoot.as_deref().filter(|s| !s.is_empty())
    }
}

impl AddonInstance {
    /// Deletion timestamp is set
    pub fn is_deleting(&self) -> bool {
        self.metadata.deletion_timestamp.is_some()
    }

    pub fn has_finalizer(&self) -> bool {
        self.finalizers().iter().any(|f| f == FINALIZER)
    }

    /// Add the lifecycle finalizer; returns false if it was already present
    pub fn add_finalizer(&mut self) -> bool {
        if self.has_finalizer() {
            return false;
        }
        self.finalizers_mut().push(FINALIZER.to_string());
        true
    }

    /// Remove the lifecycle finalizer; returns false if it was absent
    pub fn remove_finalizer(&mut self) -> bool {
        let finalizers = self.finalizers_mut();
        let before = finalizers.len();
        finalizers.retain(|f| f != FINALIZER);
        before != finalizers.len()
    }
}

fn preserve_unknown_fields(_: &mut SchemaGenerator) -> Schema {
    let mut schema = SchemaObject {
        instance_type: Some(InstanceType::Object.into()),
        ..Default::default()
    };
    schema.extensions.insert(
        "x-kubernetes-preserve-unknown-fields".to_string(),
        serde_json::Value::Bool(true),
    );
    Schema::Object(schema)
}

fn preserve_unknown_list(generator: &mut SchemaGenerator) -> Schema {
    Schema::Object(SchemaObject {
        instance_type: Some(InstanceType::Array.into()),
        array: Some(Box::new(ArrayValidation {
            items: Some(preserve_unknown_fields(generator).into()),
            ..Default::default()
        })),
        ..Default::default()
    })
}
