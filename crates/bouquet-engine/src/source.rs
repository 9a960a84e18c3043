//! Render sources
//!
//! An addon manifest points at one ConfigMap, interpreted either as a plain
//! set of YAML files or as a template bundle. Both render to a map of file
//! name to text.

use std::collections::BTreeMap;

use bouquet_core::Values;
use serde::Serialize;

use crate::engine::Engine;
use crate::error::Result;

/// Suffix marking a key as a template to render and emit
pub const TEMPLATE_SUFFIX: &str = ".tmpl";

/// Prefix marking a key as a helper template (loadable, never emitted)
pub const HELPER_PREFIX: &str = "_";

/// Key prefix placing a file inside a nested bundle: `charts.<name>.<key>`
pub const BUNDLE_PREFIX: &str = "charts.";

/// Rendered output, file name to text
pub type RenderedFiles = BTreeMap<String, String>;

/// Addon identity exposed to templates as `addon`
#[derive(Debug, Clone, Default, Serialize)]
pub struct AddonInfo {
    pub name: String,
    pub version: String,
}

/// Instance identity exposed to templates as `instance`
#[derive(Debug, Clone, Default, Serialize)]
pub struct InstanceInfo {
    pub name: String,
    pub namespace: String,
    /// Target shoot, `None` for the local cluster
    pub target: Option<String>,
}

/// Everything a template can see besides its bundle's files
#[derive(Debug, Clone, Default)]
pub struct RenderContext {
    /// Coalesced parameter values
    pub values: Values,
    pub addon: AddonInfo,
    pub instance: InstanceInfo,
}

impl RenderContext {
    /// Same context, values narrowed to the nested bundle `name`
    pub fn scoped(&self, name: &str) -> Self {
        Self {
            values: self.values.scope_for(name),
            addon: self.addon.clone(),
            instance: self.instance.clone(),
        }
    }
}

/// Plain multi-document YAML files, emitted as-is
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FileBundle {
    pub files: BTreeMap<String, String>,
}

impl FileBundle {
    pub fn new(files: BTreeMap<String, String>) -> Self {
        Self { files }
    }
}

/// Templates, helpers and auxiliary files, possibly with nested bundles
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TemplateBundle {
    /// Loadable template sources: emitted templates and helpers
    pub templates: BTreeMap<String, String>,

    /// Non-template files, exposed to templates as `files`
    pub files: BTreeMap<String, String>,

    /// Nested bundles by name
    pub bundles: BTreeMap<String, TemplateBundle>,
}

impl TemplateBundle {
    /// Split flat ConfigMap data into templates, files and nested bundles
    ///
    /// ConfigMap keys cannot contain `/`, so a nested bundle `dns` is spelled
    /// as keys prefixed `charts.dns.`. Nesting recurses.
    pub fn from_data(data: BTreeMap<String, String>) -> Self {
        let mut bundle = Self::default();
        let mut nested: BTreeMap<String, BTreeMap<String, String>> = BTreeMap::new();

        for (key, content) in data {
            if let Some((name, rest)) = key
                .strip_prefix(BUNDLE_PREFIX)
                .and_then(|rest| rest.split_once('.'))
                .filter(|(name, rest)| !name.is_empty() && !rest.is_empty())
            {
                nested
                    .entry(name.to_string())
                    .or_default()
                    .insert(rest.to_string(), content);
            } else if is_template(&key) || is_helper(&key) {
                bundle.templates.insert(key, content);
            } else {
                bundle.files.insert(key, content);
            }
        }

        bundle.bundles = nested
            .into_iter()
            .map(|(name, data)| (name, Self::from_data(data)))
            .collect();
        bundle
    }

    /// Templates that produce output, in key order
    pub fn emitted(&self) -> impl Iterator<Item = (&String, &String)> {
        self.templates
            .iter()
            .filter(|(key, _)| is_template(key) && !is_helper(key))
    }
}

pub(crate) fn is_template(key: &str) -> bool {
    key.ends_with(TEMPLATE_SUFFIX)
}

pub(crate) fn is_helper(key: &str) -> bool {
    key.starts_with(HELPER_PREFIX)
}

/// Where an addon's documents come from
#[derive(Debug, Clone, PartialEq)]
pub enum RenderSource {
    Plain(FileBundle),
    Template(TemplateBundle),
}

impl RenderSource {
    /// Render with the default engine
    pub fn render(&self, context: &RenderContext) -> Result<RenderedFiles> {
        self.render_with(&Engine::default(), context)
    }

    pub fn render_with(&self, engine: &Engine, context: &RenderContext) -> Result<RenderedFiles> {
        match self {
            RenderSource::Plain(bundle) => Ok(bundle.files.clone()),
            RenderSource::Template(bundle) => engine.render_bundle(bundle, context),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn data(entries: &[(&str, &str)]) -> BTreeMap<String, String> {
        entries
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_from_data_classifies_keys() {
        let bundle = TemplateBundle::from_data(data(&[
            ("deployment.yaml.tmpl", "kind: Deployment"),
            ("_helpers.tmpl", "{% macro x() %}{% endmacro %}"),
            ("nginx.conf", "worker_processes 1;"),
        ]));

        assert_eq!(bundle.templates.len(), 2);
        assert_eq!(bundle.files.keys().collect::<Vec<_>>(), vec!["nginx.conf"]);
        let emitted: Vec<_> = bundle.emitted().map(|(k, _)| k.as_str()).collect();
        assert_eq!(emitted, vec!["deployment.yaml.tmpl"]);
    }

    #[test]
    fn test_from_data_nested_bundles() {
        let bundle = TemplateBundle::from_data(data(&[
            ("service.yaml.tmpl", "a"),
            ("charts.dns.deployment.yaml.tmpl", "b"),
            ("charts.dns.charts.cache.config.yaml.tmpl", "c"),
            ("charts.", "not a bundle"),
        ]));

        let dns = &bundle.bundles["dns"];
        assert!(dns.templates.contains_key("deployment.yaml.tmpl"));
        assert!(dns.bundles["cache"].templates.contains_key("config.yaml.tmpl"));
        assert!(bundle.files.contains_key("charts."));
    }

    #[test]
    fn test_plain_source_emits_files_unchanged() {
        let files = data(&[("a.yaml", "kind: ConfigMap"), ("b.yaml", "")]);
        let source = RenderSource::Plain(FileBundle::new(files.clone()));

        let rendered = source.render(&RenderContext::default()).unwrap();
        assert_eq!(rendered, files);
    }
}
