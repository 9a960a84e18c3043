//! Parameter values with deep merge and scope coalescing

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use crate::error::Result;

/// Reserved top-level key propagated unchanged into every nested sub-bundle
pub const GLOBAL_KEY: &str = "global";

/// Values container with deep merge capability
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Values(pub JsonValue);

impl Values {
    /// Create empty values
    pub fn new() -> Self {
        Self(JsonValue::Object(serde_json::Map::new()))
    }

    /// Parse values from YAML string
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let value: JsonValue = serde_yaml::from_str(yaml)?;
        Ok(Self(value))
    }

    /// Parse values from JSON string
    pub fn from_json(json: &str) -> Result<Self> {
        let value: JsonValue = serde_json::from_str(json)?;
        Ok(Self(value))
    }

    /// Deep merge `overlay` on top of `self`
    ///
    /// Maps merge key by key, recursively. Scalars and arrays in the overlay
    /// replace whatever the base held.
    pub fn merge(&mut self, overlay: &Values) {
        deep_merge(&mut self.0, &overlay.0);
    }

    /// Coalesce an instance's own values over a manifest's defaults
    pub fn coalesce(defaults: &Values, overrides: &Values) -> Values {
        let mut result = if defaults.0.is_object() {
            defaults.clone()
        } else {
            Values::new()
        };
        if overrides.0.is_object() {
            result.merge(overrides);
        }
        result
    }

    /// Values seen by the nested sub-bundle `name`
    ///
    /// The sub-bundle's root is the parent's `<name>` table. The parent's
    /// `global` table is carried into it unchanged, replacing any `global`
    /// the sub-table declared itself.
    pub fn scope_for(&self, name: &str) -> Values {
        let mut scoped = serde_json::Map::new();

        if let JsonValue::Object(parent) = &self.0 {
            if let Some(JsonValue::Object(own)) = parent.get(name) {
                scoped.extend(own.iter().map(|(k, v)| (k.clone(), v.clone())));
            }
            if let Some(global) = parent.get(GLOBAL_KEY) {
                scoped.insert(GLOBAL_KEY.to_string(), global.clone());
            }
        }

        Values(JsonValue::Object(scoped))
    }

    /// Get a value by dotted path (e.g. `image.tag`)
    pub fn get(&self, path: &str) -> Option<&JsonValue> {
        path.split('.')
            .try_fold(&self.0, |current, key| current.as_object()?.get(key))
    }

    pub fn inner(&self) -> &JsonValue {
        &self.0
    }

    pub fn into_inner(self) -> JsonValue {
        self.0
    }

    /// Null and `{}` are both empty
    pub fn is_empty(&self) -> bool {
        match &self.0 {
            JsonValue::Object(map) => map.is_empty(),
            JsonValue::Null => true,
            _ => false,
        }
    }
}

impl From<JsonValue> for Values {
    fn from(value: JsonValue) -> Self {
        Self(value)
    }
}

fn deep_merge(base: &mut JsonValue, overlay: &JsonValue) {
    match (base, overlay) {
        (JsonValue::Object(base_map), JsonValue::Object(overlay_map)) => {
            for (key, overlay_value) in overlay_map {
                match base_map.get_mut(key) {
                    Some(base_value) => deep_merge(base_value, overlay_value),
                    None => {
                        base_map.insert(key.clone(), overlay_value.clone());
                    }
                }
            }
        }
        (base, overlay) => *base = overlay.clone(),
    }
}
