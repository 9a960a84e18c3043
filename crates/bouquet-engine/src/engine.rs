//! Template engine based on MiniJinja

use minijinja::{Environment, UndefinedBehavior};
use tracing::debug;

use crate::error::{Result, TemplateError};
use crate::filters;
use crate::source::{RenderContext, RenderedFiles, TEMPLATE_SUFFIX, TemplateBundle};

/// Template engine builder
#[derive(Debug, Default)]
pub struct EngineBuilder {
    strict_mode: bool,
}

impl EngineBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail on any use of an undefined value
    pub fn strict(mut self, strict: bool) -> Self {
        self.strict_mode = strict;
        self
    }

    pub fn build(self) -> Engine {
        Engine::new(self.strict_mode)
    }
}

/// The template engine
///
/// Lenient by default: a missing value renders empty and attribute access on
/// it chains, so `values.ingress.host` works when `ingress` is unset.
#[derive(Debug, Default)]
pub struct Engine {
    strict_mode: bool,
}

impl Engine {
    pub fn new(strict_mode: bool) -> Self {
        Self { strict_mode }
    }

    pub fn builder() -> EngineBuilder {
        EngineBuilder::new()
    }

    fn create_environment(&self) -> Environment<'static> {
        let mut env = Environment::new();

        env.set_undefined_behavior(if self.strict_mode {
            UndefinedBehavior::Strict
        } else {
            UndefinedBehavior::Chainable
        });

        env.add_filter("toyaml", filters::toyaml);
        env.add_filter("tojson", filters::tojson);
        env.add_filter("b64encode", filters::b64encode);
        env.add_filter("b64decode", filters::b64decode);
        env.add_filter("quote", filters::quote);
        env.add_filter("indent", filters::indent);
        env.add_filter("nindent", filters::nindent);
        env.add_filter("required", filters::required);
        env.add_filter("sha256", filters::sha256sum);
        env.add_filter("trunc", filters::trunc);
        env.add_filter("version_matches", filters::version_matches);

        env
    }

    /// Render a single template string
    pub fn render_string(
        &self,
        template: &str,
        context: &RenderContext,
        template_name: &str,
    ) -> Result<String> {
        let bundle = TemplateBundle {
            templates: [(template_name.to_string(), template.to_string())].into(),
            ..Default::default()
        };
        let env = self.load(&bundle)?;
        let tmpl = env
            .get_template(template_name)
            .map_err(|e| TemplateError::from_minijinja(e, template_name, template))?;

        tmpl.render(build_context(&bundle, context))
            .map_err(|e| TemplateError::from_minijinja(e, template_name, template).into())
    }

    /// Render every emitted template of a bundle and its nested bundles
    ///
    /// Output keys drop the `.tmpl` suffix; files of a nested bundle `dns`
    /// are keyed `dns/<file>`. Templates rendering to nothing but whitespace
    /// are left out.
    pub fn render_bundle(
        &self,
        bundle: &TemplateBundle,
        context: &RenderContext,
    ) -> Result<RenderedFiles> {
        let mut rendered = RenderedFiles::new();
        self.render_into(bundle, context, "", &mut rendered)?;
        Ok(rendered)
    }

    fn render_into(
        &self,
        bundle: &TemplateBundle,
        context: &RenderContext,
        prefix: &str,
        out: &mut RenderedFiles,
    ) -> Result<()> {
        let env = self.load(bundle)?;
        let ctx = build_context(bundle, context);

        for (name, source) in bundle.emitted() {
            let tmpl = env
                .get_template(name)
                .map_err(|e| TemplateError::from_minijinja(e, name, source))?;
            let text = tmpl
                .render(&ctx)
                .map_err(|e| TemplateError::from_minijinja(e, name, source))?;

            let trimmed = text.trim();
            if trimmed.is_empty() || trimmed == "---" {
                debug!(template = %name, "template rendered empty, skipping");
                continue;
            }

            let output = name.strip_suffix(TEMPLATE_SUFFIX).unwrap_or(name);
            out.insert(format!("{}{}", prefix, output), text);
        }

        for (name, nested) in &bundle.bundles {
            let nested_prefix = format!("{}{}/", prefix, name);
            self.render_into(nested, &context.scoped(name), &nested_prefix, out)?;
        }

        Ok(())
    }

    /// Environment with every template and helper of one bundle loaded
    fn load(&self, bundle: &TemplateBundle) -> Result<Environment<'static>> {
        let mut env = self.create_environment();
        for (name, source) in &bundle.templates {
            env.add_template_owned(name.clone(), source.clone())
                .map_err(|e| TemplateError::from_minijinja(e, name, source))?;
        }
        Ok(env)
    }
}

fn build_context(bundle: &TemplateBundle, context: &RenderContext) -> minijinja::Value {
    minijinja::context! {
        values => context.values.inner(),
        addon => &context.addon,
        instance => &context.instance,
        files => &bundle.files,
    }
}
