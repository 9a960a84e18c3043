//! Decoding rendered YAML into dynamic objects

use std::collections::BTreeMap;

use kube::api::DynamicObject;
use kube::core::{GroupVersionKind, TypeMeta};
use serde::Deserialize;

use crate::error::{KubeError, Result};

/// Decode every document of a multi-document YAML string
///
/// Empty and comment-only documents are skipped.
pub fn decode_objects(text: &str) -> Result<Vec<DynamicObject>> {
    decode_named("<inline>", text)
}

/// Decode rendered files in key order
pub fn decode_files(files: &BTreeMap<String, String>) -> Result<Vec<DynamicObject>> {
    let mut objects = Vec::new();
    for (file, text) in files {
        objects.extend(decode_named(file, text)?);
    }
    Ok(objects)
}

fn decode_named(file: &str, text: &str) -> Result<Vec<DynamicObject>> {
    let mut objects = Vec::new();

    for (index, document) in serde_yaml::Deserializer::from_str(text).enumerate() {
        let value = serde_json::Value::deserialize(document).map_err(|source| {
            KubeError::Decode {
                file: file.to_string(),
                source,
            }
        })?;
        if value.is_null() {
            continue;
        }
        if !value.is_object() {
            return Err(KubeError::InvalidObject(format!(
                "{} document {} is not a mapping",
                file, index
            )));
        }

        let object: DynamicObject = serde_json::from_value(value).map_err(|e| {
            KubeError::InvalidObject(format!("{} document {}: {}", file, index, e))
        })?;
        objects.push(object);
    }

    Ok(objects)
}

/// Group, version and kind of an object, from its `apiVersion` and `kind`
pub fn gvk_of(object: &DynamicObject) -> Result<GroupVersionKind> {
    let types = object
        .types
        .as_ref()
        .filter(|t| !t.api_version.is_empty() && !t.kind.is_empty())
        .ok_or_else(|| {
            KubeError::InvalidObject(format!("{} is missing apiVersion or kind", describe(object)))
        })?;
    Ok(gvk_from_type_meta(types))
}

/// - "apps/v1" -> group="apps", version="v1"
/// - "v1" -> group="", version="v1" (core API)
fn gvk_from_type_meta(tm: &TypeMeta) -> GroupVersionKind {
    let (group, version) = match tm.api_version.rsplit_once('/') {
        Some((g, v)) => (g, v),
        None => ("", tm.api_version.as_str()),
    };
    GroupVersionKind::gvk(group, version, &tm.kind)
}

/// Kind of an object, empty when unset
pub fn kind_of(object: &DynamicObject) -> &str {
    object.types.as_ref().map(|t| t.kind.as_str()).unwrap_or("")
}

/// Name of an object, empty when unset
pub fn name_of(object: &DynamicObject) -> &str {
    object.metadata.name.as_deref().unwrap_or("")
}

/// `Kind namespace/name` for logs and errors
pub fn describe(object: &DynamicObject) -> String {
    let kind = match kind_of(object) {
        "" => "<unknown>",
        kind => kind,
    };
    match object.metadata.namespace.as_deref() {
        Some(ns) => format!("{} {}/{}", kind, ns, name_of(object)),
        None => format!("{} {}", kind, name_of(object)),
    }
}
